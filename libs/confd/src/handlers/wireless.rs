//! `wireless.wifi-iface` sections: access-point interfaces driven by
//! hostapd. `wireless.wifi-device` sections describe the radios and are
//! schema-only.
//!
//! Station (client) mode is not implemented.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::collection::ConfigCollection;
use crate::command::{Command, priority};
use crate::section::{ConfigSection, DerivedState, Package};
use crate::{Error, Result};

use super::{ApplyContext, SectionHandler, interface_ifname};

/// UCI hardware mode to the hostapd `hw_mode` letter.
fn hostapd_hwmode(hwmode: &str) -> Option<&'static str> {
    match hwmode {
        "11b" => Some("b"),
        "11g" => Some("g"),
        "11a" => Some("a"),
        _ => None,
    }
}

const HTMODES: &[&str] = &[
    "HT20", "HT40+", "HT40-", "HT40", "VHT20", "VHT40", "VHT80", "VHT160",
];

/// 20 MHz channels that sit in the lower/upper half of their 40 MHz channel.
const HT40_LOWER_CHANNELS: &[i64] = &[36, 44, 52, 60, 100, 108, 116, 124, 132, 140, 149, 157];
const HT40_UPPER_CHANNELS: &[i64] = &[40, 48, 56, 64, 104, 112, 120, 128, 136, 144, 153, 161];

/// 20 MHz channel to the center index of the 40 MHz channel containing it.
const VHT40_CENTER_INDEX: &[(i64, i64)] = &[
    (36, 38),
    (40, 38),
    (44, 46),
    (48, 46),
    (52, 54),
    (56, 54),
    (60, 62),
    (64, 62),
    (100, 102),
    (104, 102),
    (108, 110),
    (112, 110),
    (116, 118),
    (120, 118),
    (124, 126),
    (128, 126),
    (132, 134),
    (136, 134),
    (140, 142),
    (144, 142),
    (149, 151),
    (153, 151),
    (157, 159),
    (161, 159),
];

/// 20 MHz channel to the center index of the 80 MHz channel containing it.
const VHT80_CENTER_INDEX: &[(i64, i64)] = &[
    (36, 42),
    (40, 42),
    (44, 42),
    (48, 42),
    (52, 58),
    (56, 58),
    (60, 58),
    (64, 58),
    (100, 106),
    (104, 106),
    (108, 106),
    (112, 106),
    (116, 122),
    (120, 122),
    (124, 122),
    (128, 122),
    (132, 138),
    (136, 138),
    (140, 138),
    (144, 138),
    (149, 155),
    (153, 155),
    (157, 155),
    (161, 155),
];

/// 20 MHz channel to the center index of the 160 MHz channel containing it.
const VHT160_CENTER_INDEX: &[(i64, i64)] = &[
    (36, 50),
    (40, 50),
    (44, 50),
    (48, 50),
    (52, 50),
    (56, 50),
    (60, 50),
    (64, 50),
    (100, 114),
    (104, 114),
    (108, 114),
    (112, 114),
    (116, 114),
    (120, 114),
    (124, 114),
    (128, 114),
];

fn center_index(table: &[(i64, i64)], channel: i64) -> Option<i64> {
    table
        .iter()
        .find(|(ch, _)| *ch == channel)
        .map(|(_, center)| *center)
}

fn is_hex_string(data: &str) -> bool {
    !data.is_empty() && data.chars().all(|c| c.is_ascii_hexdigit())
}

/// A random locally-administered MAC address (`02:xx:xx:xx:xx:xx`), so
/// virtual interfaces do not collide with the radio they share.
fn random_mac() -> String {
    let mut mac = "02".to_owned();
    for _ in 0..5 {
        let _ = write!(mac, ":{:02x}", rand::random::<u8>());
    }
    mac
}

pub(crate) struct WifiIfaceHandler;

struct ResolvedIface {
    ifname: String,
    /// True when the section's ifname is the radio itself rather than a
    /// virtual interface on top of it.
    physical: bool,
}

impl WifiIfaceHandler {
    fn resolve<'a>(
        &self,
        section: &ConfigSection,
        all: &'a ConfigCollection,
    ) -> Result<(&'a ConfigSection, &'a ConfigSection, ResolvedIface)> {
        match section.require_string("mode")? {
            "ap" => {}
            "sta" => {
                return Err(Error::validation(
                    "WiFi sta mode is not implemented; only mode 'ap' is supported",
                ));
            }
            other => {
                return Err(Error::validation(format!(
                    "unsupported WiFi mode '{other}' in {section}"
                )));
            }
        }

        let device = all.lookup(
            Package::Wireless,
            "wifi-device",
            section.require_string("device")?,
        )?;
        let interface = all.lookup(
            Package::Network,
            "interface",
            section.require_string("network")?,
        )?;

        let ifname = match section.string("ifname") {
            Some(name) => name.to_owned(),
            None => interface_ifname(interface)?,
        };
        let physical = ifname == device.name();

        Ok((
            device,
            interface,
            ResolvedIface { ifname, physical },
        ))
    }

    fn conf_file(write_dir: &Path, section: &ConfigSection) -> PathBuf {
        write_dir.join(format!("hostapd-{}.conf", section.name()))
    }

    fn pid_file(write_dir: &Path, section: &ConfigSection) -> PathBuf {
        write_dir.join(format!("hostapd-{}.pid", section.name()))
    }

    fn hostapd_command(
        &self,
        section: &ConfigSection,
        conf_file: &Path,
        pid_file: &Path,
    ) -> Command {
        Command::exec(
            priority::START_DAEMON,
            section.key(),
            [
                "hostapd".to_owned(),
                "-P".to_owned(),
                pid_file.display().to_string(),
                "-B".to_owned(),
                conf_file.display().to_string(),
            ],
        )
    }

    /// True when the edit can be handled by restarting hostapd alone.
    fn minor_change(old: &ConfigSection, new: &ConfigSection) -> bool {
        old.string("mode") == new.string("mode")
            && old.string("device") == new.string("device")
            && old.string("network") == new.string("network")
            && old.string("ifname") == new.string("ifname")
    }
}

impl SectionHandler for WifiIfaceHandler {
    fn apply(
        &self,
        section: &ConfigSection,
        all: &ConfigCollection,
        ctx: &mut ApplyContext,
    ) -> Result<(Vec<Command>, DerivedState)> {
        let key = section.key();
        let (device, interface, resolved) = self.resolve(section, all)?;

        let mut commands = Vec::new();
        let mut state = DerivedState::default();

        let ifname = resolved.ifname.as_str();

        if resolved.physical {
            // Using the radio's own interface; switch it to AP mode.
            commands.push(Command::exec(
                priority::CONFIG_IFACE,
                key,
                ["iw", "dev", ifname, "set", "type", "__ap"],
            ));
        } else if ctx.claimed_vifs.insert(resolved.ifname.clone()) {
            // First claimant creates the virtual interface and owns its
            // teardown.
            let mac = random_mac();
            commands.push(Command::exec(
                priority::CREATE_IFACE,
                key,
                [
                    "iw",
                    "dev",
                    device.name(),
                    "interface",
                    "add",
                    ifname,
                    "type",
                    "__ap",
                    "addr",
                    mac.as_str(),
                ],
            ));
            state.created_vif = Some(resolved.ifname.clone());
        } else {
            // The virtual interface already exists; just make sure it is in
            // AP mode.
            commands.push(Command::exec(
                priority::CONFIG_IFACE,
                key,
                ["iw", "dev", ifname, "set", "type", "__ap"],
            ));
        }

        let conf_file = Self::conf_file(&ctx.write_dir, section);
        let pid_file = Self::pid_file(&ctx.write_dir, section);

        let generator = HostapdConf::new(section, device, interface, &resolved.ifname);
        std::fs::write(&conf_file, generator.render()?)?;

        commands.push(self.hostapd_command(section, &conf_file, &pid_file));

        Ok((commands, state))
    }

    fn revert(
        &self,
        section: &ConfigSection,
        _all: &ConfigCollection,
        ctx: &mut ApplyContext,
    ) -> Result<Vec<Command>> {
        let key = section.key();
        let mut commands = vec![Command::kill(
            -priority::START_DAEMON,
            key,
            Self::pid_file(&ctx.write_dir, section),
        )];

        if let Some(vif) = &section.state().created_vif {
            commands.push(Command::exec(
                -priority::CREATE_IFACE,
                key,
                ["iw", "dev", vif.as_str(), "del"],
            ));
            ctx.claimed_vifs.remove(vif);
        }

        Ok(commands)
    }

    fn update_apply(
        &self,
        old: &ConfigSection,
        new: &ConfigSection,
        all: &ConfigCollection,
        ctx: &mut ApplyContext,
    ) -> Option<Result<(Vec<Command>, DerivedState)>> {
        if !Self::minor_change(old, new) {
            return None;
        }

        let result = (|| -> Result<(Vec<Command>, DerivedState)> {
            let (device, interface, resolved) = self.resolve(new, all)?;

            let conf_file = Self::conf_file(&ctx.write_dir, new);
            let pid_file = Self::pid_file(&ctx.write_dir, new);

            let generator = HostapdConf::new(new, device, interface, &resolved.ifname);
            std::fs::write(&conf_file, generator.render()?)?;

            // The virtual interface survives the edit; carry its ownership.
            Ok((
                vec![self.hostapd_command(new, &conf_file, &pid_file)],
                old.state().clone(),
            ))
        })();

        Some(result)
    }

    fn update_revert(
        &self,
        old: &ConfigSection,
        new: &ConfigSection,
        _all: &ConfigCollection,
        ctx: &mut ApplyContext,
    ) -> Option<Result<Vec<Command>>> {
        if !Self::minor_change(old, new) {
            return None;
        }

        Some(Ok(vec![Command::kill(
            -priority::START_DAEMON,
            old.key(),
            Self::pid_file(&ctx.write_dir, old),
        )]))
    }
}

/// Renders a hostapd configuration: main options, optional 802.11n and
/// 802.11ac blocks, and the security block.
struct HostapdConf<'a> {
    iface: &'a ConfigSection,
    device: &'a ConfigSection,
    interface: &'a ConfigSection,
    ifname: &'a str,
    enable_11n: bool,
    enable_11ac: bool,
}

impl<'a> HostapdConf<'a> {
    fn new(
        iface: &'a ConfigSection,
        device: &'a ConfigSection,
        interface: &'a ConfigSection,
        ifname: &'a str,
    ) -> Self {
        let htmode = device.string("htmode");
        let enable_11n = htmode.is_some_and(|m| m.starts_with("HT") || m.starts_with("VHT"));
        let enable_11ac = htmode.is_some_and(|m| m.starts_with("VHT"));

        HostapdConf {
            iface,
            device,
            interface,
            ifname,
            enable_11n,
            enable_11ac,
        }
    }

    fn render(&self) -> Result<String> {
        if let Some(htmode) = self.device.string("htmode") {
            if !HTMODES.contains(&htmode) {
                return Err(Error::validation(format!(
                    "unrecognized htmode '{htmode}' on {}",
                    self.device
                )));
            }
        }

        let mut out = String::new();
        let _ = writeln!(out, "# hostapd configuration generated by paradrop-confd");
        let _ = writeln!(out, "# Source: {}", self.iface.source().display());
        let _ = writeln!(out, "# Section: config wifi-iface {}", self.iface.name());

        write_options(&mut out, None, self.main_options()?);
        if self.enable_11n {
            write_options(&mut out, Some("802.11n"), self.options_11n());
        }
        if self.enable_11ac {
            write_options(&mut out, Some("802.11ac"), self.options_11ac()?);
        }
        write_options(&mut out, Some("Security"), self.security_options()?);

        Ok(out)
    }

    fn main_options(&self) -> Result<Vec<(String, String)>> {
        let mut options = vec![("interface".to_owned(), self.ifname.to_owned())];

        if self.interface.string("type") == Some("bridge") {
            options.push(("bridge".to_owned(), interface_ifname(self.interface)?));
        }

        options.push(("ssid".to_owned(), self.iface.require_string("ssid")?.to_owned()));

        if let Some(country) = self.device.string("country") {
            options.push(("country_code".to_owned(), country.to_owned()));
            options.push(("ieee80211d".to_owned(), "1".to_owned()));
        }

        if let Some(hwmode) = self.device.string("hwmode") {
            let mode = hostapd_hwmode(hwmode).ok_or_else(|| {
                Error::validation(format!("unrecognized hardware mode '{hwmode}'"))
            })?;
            options.push(("hw_mode".to_owned(), mode.to_owned()));
        }

        let channel = self.device.integer("channel").ok_or_else(|| {
            Error::validation(format!("{} has no channel", self.device))
        })?;
        options.push(("channel".to_owned(), channel.to_string()));

        if let Some(beacon_int) = self.device.integer("beacon_int") {
            options.push(("beacon_int".to_owned(), beacon_int.to_string()));
        }
        if let Some(maxassoc) = self.iface.integer("maxassoc") {
            options.push(("max_num_sta".to_owned(), maxassoc.to_string()));
        }
        if let Some(rts) = self.device.integer("rts") {
            options.push(("rts_threshold".to_owned(), rts.to_string()));
        }
        if let Some(frag) = self.device.integer("frag") {
            options.push(("fragm_threshold".to_owned(), frag.to_string()));
        }

        let wmm = if self.iface.boolean("wmm") { "1" } else { "0" };
        options.push(("wmm_enabled".to_owned(), wmm.to_owned()));

        Ok(options)
    }

    fn options_11n(&self) -> Vec<(String, String)> {
        let mut options = vec![("ieee80211n".to_owned(), "1".to_owned())];
        let device = self.device;
        let channel = device.integer("channel").unwrap_or_default();

        let mut ht_capab = String::new();
        match device.string("htmode") {
            Some(htmode) if htmode.starts_with("HT40") => {
                let _ = write!(ht_capab, "[{htmode}]");
            }
            Some("VHT40" | "VHT80" | "VHT160") => {
                if HT40_LOWER_CHANNELS.contains(&channel) {
                    ht_capab.push_str("[HT40+]");
                } else if HT40_UPPER_CHANNELS.contains(&channel) {
                    ht_capab.push_str("[HT40-]");
                }
            }
            _ => {}
        }

        if device.boolean("short_gi_20") {
            ht_capab.push_str("[SHORT-GI-20]");
        }
        if device.boolean("short_gi_40") {
            ht_capab.push_str("[SHORT-GI-40]");
        }
        if device.integer("tx_stbc").unwrap_or_default() > 0 {
            ht_capab.push_str("[TX-STBC]");
        }
        match device.integer("rx_stbc").unwrap_or_default() {
            1 => ht_capab.push_str("[RX-STBC1]"),
            2 => ht_capab.push_str("[RX-STBC12]"),
            n if n >= 3 => ht_capab.push_str("[RX-STBC123]"),
            _ => {}
        }
        if device.boolean("dsss_cck_40") {
            ht_capab.push_str("[DSSS_CCK-40]");
        }

        if !ht_capab.is_empty() {
            options.push(("ht_capab".to_owned(), ht_capab));
        }

        if device.string("require_mode") == Some("n") {
            options.push(("require_ht".to_owned(), "1".to_owned()));
        }

        options
    }

    fn options_11ac(&self) -> Result<Vec<(String, String)>> {
        let mut options = vec![("ieee80211ac".to_owned(), "1".to_owned())];
        let device = self.device;
        let channel = device.integer("channel").unwrap_or_default();

        if device.string("require_mode") == Some("ac") {
            options.push(("require_vht".to_owned(), "1".to_owned()));
        }

        // chwidth 0 covers both 20 and 40 MHz operation. 80+80 (chwidth 3)
        // is not representable here.
        let (chwidth, seg0_idx) = match device.string("htmode") {
            Some("VHT40") => (0, lookup_center(VHT40_CENTER_INDEX, channel, "VHT40")?),
            Some("VHT80") => (1, lookup_center(VHT80_CENTER_INDEX, channel, "VHT80")?),
            Some("VHT160") => (2, lookup_center(VHT160_CENTER_INDEX, channel, "VHT160")?),
            _ => (0, channel),
        };

        let mut vht_capab = String::new();
        if device.boolean("short_gi_80") {
            vht_capab.push_str("[SHORT-GI-80]");
        }
        if device.boolean("short_gi_160") {
            vht_capab.push_str("[SHORT-GI-160]");
        }
        if device.boolean("tx_stbc_2by1") {
            vht_capab.push_str("[TX-STBC-2BY1]");
        }
        match device.integer("rx_stbc").unwrap_or_default() {
            1 => vht_capab.push_str("[RX-STBC-1]"),
            2 => vht_capab.push_str("[RX-STBC-12]"),
            3 => vht_capab.push_str("[RX-STBC-123]"),
            n if n >= 4 => vht_capab.push_str("[RX-STBC-1234]"),
            _ => {}
        }
        if !vht_capab.is_empty() {
            options.push(("vht_capab".to_owned(), vht_capab));
        }

        options.push(("vht_oper_chwidth".to_owned(), chwidth.to_string()));
        options.push((
            "vht_oper_centr_freq_seg0_idx".to_owned(),
            seg0_idx.to_string(),
        ));

        Ok(options)
    }

    fn security_options(&self) -> Result<Vec<(String, String)>> {
        let mut options = Vec::new();

        match self.iface.string("encryption") {
            None | Some("none") => options.push(("wpa".to_owned(), "0".to_owned())),
            Some("psk2") => {
                options.push(("wpa".to_owned(), "1".to_owned()));

                let key = self.iface.string("key").ok_or_else(|| {
                    Error::validation(format!("{} uses psk2 but has no key", self.iface))
                })?;

                // A 64-character hex string is the PSK itself; anything else
                // is a passphrase.
                if key.len() == 64 && is_hex_string(key) {
                    options.push(("wpa_psk".to_owned(), key.to_owned()));
                } else {
                    options.push(("wpa_passphrase".to_owned(), key.to_owned()));
                }

                options.push(("wpa_pairwise".to_owned(), "TKIP CCMP".to_owned()));
                options.push(("rsn_pairwise".to_owned(), "CCMP".to_owned()));
            }
            Some(other) => {
                return Err(Error::validation(format!(
                    "Encryption type not supported: '{other}' (supported: none|psk2)"
                )));
            }
        }

        Ok(options)
    }
}

fn lookup_center(table: &[(i64, i64)], channel: i64, htmode: &str) -> Result<i64> {
    center_index(table, channel).ok_or_else(|| {
        Error::validation(format!("channel {channel} cannot be used with {htmode}"))
    })
}

fn write_options(out: &mut String, title: Option<&str>, options: Vec<(String, String)>) {
    out.push('\n');
    if let Some(title) = title {
        let _ = writeln!(out, "##### {title} #####");
    }
    for (name, value) in options {
        let _ = writeln!(out, "{name}={value}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_search;
    use std::io::Write as _;

    fn collection(content: &str) -> ConfigCollection {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        parse_search(file.path()).unwrap()
    }

    fn render(config: &str) -> Result<String> {
        let all = collection(config);
        let iface = all
            .sections_of(Package::Wireless, "wifi-iface")
            .next()
            .unwrap();
        let device = all
            .sections_of(Package::Wireless, "wifi-device")
            .next()
            .unwrap();
        let interface = all
            .sections_of(Package::Network, "interface")
            .next()
            .unwrap();

        HostapdConf::new(iface, device, interface, "wlan0").render()
    }

    const BASE: &str = "
config interface wifi
    option ifname 'wlan0'
    option proto 'static'
    option ipaddr '192.168.33.1'
    option netmask '255.255.255.0'

config wifi-device radio0
    option type 'auto'
    option channel '36'
    option hwmode '11a'
    option htmode 'VHT80'
    option short_gi_20 '1'
";

    #[test]
    fn hex_key_becomes_wpa_psk() {
        let config = format!(
            "{BASE}
config wifi-iface ap0
    option device 'radio0'
    option mode 'ap'
    option ssid 'TestNet'
    option network 'wifi'
    option encryption 'psk2'
    option key '{}'
",
            "ab".repeat(32)
        );

        let conf = render(&config).unwrap();

        assert!(conf.contains(&format!("wpa_psk={}", "ab".repeat(32))));
        assert!(!conf.contains("wpa_passphrase"));
    }

    #[test]
    fn passphrase_key_becomes_wpa_passphrase() {
        let config = format!(
            "{BASE}
config wifi-iface ap0
    option device 'radio0'
    option mode 'ap'
    option ssid 'TestNet'
    option network 'wifi'
    option encryption 'psk2'
    option key 'hunter22'
"
        );

        let conf = render(&config).unwrap();

        assert!(conf.contains("wpa_passphrase=hunter22"));
        assert!(!conf.contains("wpa_psk="));
    }

    #[test]
    fn vht80_sets_center_index_and_width() {
        let config = format!(
            "{BASE}
config wifi-iface ap0
    option device 'radio0'
    option mode 'ap'
    option ssid 'TestNet'
    option network 'wifi'
    option encryption 'none'
"
        );

        let conf = render(&config).unwrap();

        assert!(conf.contains("ieee80211n=1"));
        assert!(conf.contains("ieee80211ac=1"));
        assert!(conf.contains("vht_oper_chwidth=1"));
        assert!(conf.contains("vht_oper_centr_freq_seg0_idx=42"));
        // Channel 36 is in the lower half of its 40 MHz channel.
        assert!(conf.contains("[HT40+]"));
        assert!(conf.contains("[SHORT-GI-20]"));
        assert!(conf.contains("wpa=0"));
    }

    #[test]
    fn unsupported_encryption_is_rejected() {
        let config = format!(
            "{BASE}
config wifi-iface ap0
    option device 'radio0'
    option mode 'ap'
    option ssid 'TestNet'
    option network 'wifi'
    option encryption 'wep'
    option key 'abc'
"
        );

        let err = render(&config).unwrap_err();

        assert!(err.to_string().contains("Encryption type not supported"));
    }
}
