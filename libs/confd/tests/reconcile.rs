//! End-to-end reconciliation scenarios: parse a config, inspect the emitted
//! command plan, unload, inspect the teardown plan.

use std::path::PathBuf;

use paradrop_confd::{Command, ConfigManager};
use tempfile::TempDir;

const DNSMASQ_CONFIG: &str = "
config interface lan
    option ifname 'eth0'
    option proto 'static'
    option ipaddr '192.168.33.66'
    option netmask '255.255.255.0'

config dnsmasq lan
    list interface 'lan'

config dhcp lan
    option interface 'lan'
    option start '100'
    option limit '100'
    option leasetime '12h'
    list dhcp_option 'option:router,192.168.33.66'
";

const DEFAULT_DNSMASQ_CONFIG: &str = "
config interface lan
    option ifname 'eth0'
    option proto 'static'
    option ipaddr '192.168.33.66'
    option netmask '255.255.255.0'

config dnsmasq lan
    option noresolv '1'
    list server '8.8.8.8'

config dhcp lan
    option interface 'lan'
    option start '100'
    option limit '100'
    option leasetime '12h'
    list dhcp_option 'option:router,192.168.33.66'
";

const FIREWALL_ZONE_CONFIG: &str = "
config interface wan
    option ifname 'eth0'
    option proto 'dhcp'

config zone
    option network 'wan'
    option masq '1'
    option output 'ACCEPT'
    option forward 'REJECT'
    option input 'ACCEPT'
    option name 'wan'
";

const FIREWALL_REDIRECT_CONFIG: &str = "
config interface wan
    option ifname 'eth0'
    option proto 'dhcp'

config zone
    option network 'wan'
    option masq '0'
    option output 'ACCEPT'
    option forward 'REJECT'
    option input 'ACCEPT'
    option name 'wan'

config redirect
    option src 'wan'
    option src_port '6000'
    option proto 'any'
    option dest_ip '192.168.33.66'
    option dest_port '60'

config redirect
    option src 'wan'
    option src_port '7000'
    option proto 'tcp'
    option dest_ip '192.168.33.66'
    option dest_port '70'

config redirect
    option src 'wan'
    option src_ip '1.2.3.4'
    option proto 'tcpudp'
    option dest_ip '192.168.33.66'

config redirect
    option dest 'wan'
    option src_dip '1.2.3.4'
    option proto 'any'
    option target 'SNAT'
";

const NETWORK_WAN_CONFIG: &str = "
config interface eth0
    option ifname 'eth0'
    option proto 'static'
    option ipaddr '192.168.33.66'
    option netmask '255.255.255.0'
    option gateway '192.168.33.1'
";

const NETWORK_BRIDGE_CONFIG: &str = "
config interface lan
    list ifname 'eth1'
    list ifname 'eth2'
    option type 'bridge'
    option proto 'static'
    option ipaddr '192.168.33.66'
    option netmask '255.255.255.0'
";

const WIRELESS_AP_CONFIG: &str = "
config interface wifi
    option ifname 'wlan0'
    option proto 'static'
    option ipaddr '192.168.33.66'
    option netmask '255.255.255.0'

config wifi-device radio
    option type 'auto'
    option channel '1'

config wifi-iface ap1
    option device 'radio'
    option mode 'ap'
    option ssid 'Paradrop1'
    option network 'wifi'
    option encryption 'psk2'
    option key 'password'

config wifi-iface ap2
    option device 'radio'
    option mode 'ap'
    option ssid 'Paradrop2'
    option network 'wifi'
    option encryption 'psk2'
    option key '0000111122223333444455556666777788889999aaaabbbbccccddddeeeeffff'

config wifi-iface ap3
    option device 'radio'
    option mode 'ap'
    option ssid 'Paradrop3'
    option network 'wifi'
    option encryption 'none'
";

const WIRELESS_STA_CONFIG: &str = "
config interface wifi
    option ifname 'wlan0'
    option proto 'dhcp'

config wifi-device radio
    option type 'auto'
    option channel '1'

config wifi-iface sta1
    option device 'radio'
    option mode 'sta'
    option ssid 'Paradrop1'
    option network 'wifi'
    option encryption 'psk2'
    option key 'password'
";

struct Harness {
    dir: TempDir,
    manager: ConfigManager,
}

impl Harness {
    fn new(config: &str) -> Self {
        paradrop_logging::test_global("debug");

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config"), config).unwrap();
        let manager = ConfigManager::new(dir.path());

        Harness { dir, manager }
    }

    fn config_file(&self) -> PathBuf {
        self.dir.path().join("config")
    }

    async fn load(&mut self) {
        self.manager
            .load_config(&self.config_file(), false)
            .await
            .unwrap();
    }

    async fn unload(&mut self) {
        self.manager.unload(false).await.unwrap();
    }

    fn commands(&self) -> &[Command] {
        self.manager.previous_commands()
    }

    fn write_file(&self, name: &str, content: &str) {
        std::fs::write(self.dir.path().join(name), content).unwrap();
    }
}

fn in_commands(needle: &str, commands: &[Command]) -> bool {
    commands.iter().any(|c| c.to_string().contains(needle))
}

#[tokio::test]
async fn default_dnsmasq_settings_reach_the_config_file() {
    let mut h = Harness::new(DEFAULT_DNSMASQ_CONFIG);
    h.load().await;

    assert!(!h.commands().is_empty());

    let conf = std::fs::read_to_string(h.dir.path().join("dnsmasq-lan.conf")).unwrap();
    assert!(conf.contains("dhcp-range=192.168.33.100,192.168.33.200,12h"));
    assert!(conf.contains("no-resolv"));
    assert!(conf.contains("server=8.8.8.8"));
    assert!(conf.contains("dhcp-option=option:router,192.168.33.66"));
}

#[tokio::test]
async fn dnsmasq_lifecycle_generates_config_and_kill() {
    let mut h = Harness::new(DNSMASQ_CONFIG);
    h.load().await;

    assert!(!h.commands().is_empty());
    assert!(h.dir.path().join("dnsmasq-lan.conf").exists());

    // An interface-specific dnsmasq section does not force no-resolv.
    let conf = std::fs::read_to_string(h.dir.path().join("dnsmasq-lan.conf")).unwrap();
    assert!(!conf.contains("no-resolv"));

    h.write_file("dnsmasq-lan.pid", "12345");
    h.unload().await;

    assert!(in_commands("kill 12345", h.commands()));
}

#[tokio::test]
async fn firewall_zone_masquerades_the_wan() {
    let mut h = Harness::new(FIREWALL_ZONE_CONFIG);
    h.load().await;

    assert_eq!(h.commands().len(), 2);
    assert!(in_commands("MASQUERADE", h.commands()));

    h.unload().await;
    assert_eq!(h.commands().len(), 2);
}

#[tokio::test]
async fn firewall_redirects_emit_dnat_but_never_snat() {
    let mut h = Harness::new(FIREWALL_REDIRECT_CONFIG);
    h.load().await;

    assert_eq!(h.commands().len(), 5);
    assert!(in_commands("DNAT", h.commands()));
    assert!(!in_commands("SNAT", h.commands()));

    h.unload().await;
    assert_eq!(h.commands().len(), 5);
}

#[tokio::test]
async fn static_wan_interface_with_gateway() {
    let mut h = Harness::new(NETWORK_WAN_CONFIG);
    h.load().await;

    assert_eq!(h.commands().len(), 4);
    assert!(in_commands("192.168.33.66", h.commands()));
    assert!(in_commands("default via 192.168.33.1", h.commands()));

    h.unload().await;
    assert_eq!(h.commands().len(), 2);
}

#[tokio::test]
async fn bridge_interface_enslaves_its_members() {
    let mut h = Harness::new(NETWORK_BRIDGE_CONFIG);
    h.load().await;

    assert_eq!(h.commands().len(), 10);
    assert!(in_commands("ip link add name br-lan type bridge", h.commands()));
    assert!(in_commands("ip link set dev eth1 master br-lan", h.commands()));
    assert!(in_commands("ip link set dev eth2 master br-lan", h.commands()));

    h.unload().await;

    assert_eq!(h.commands().len(), 8);
    assert!(in_commands("ip link delete br-lan", h.commands()));
}

#[tokio::test]
async fn wireless_ap_creates_vif_and_starts_hostapd() {
    let mut h = Harness::new(WIRELESS_AP_CONFIG);
    h.load().await;

    assert_eq!(h.commands().len(), 9);
    assert!(in_commands("add wlan0 type __ap", h.commands()));
    assert!(in_commands("hostapd", h.commands()));
    assert!(h.dir.path().join("hostapd-ap1.conf").exists());

    // The 64-hex-digit key is used as the PSK directly.
    let ap2 = std::fs::read_to_string(h.dir.path().join("hostapd-ap2.conf")).unwrap();
    assert!(ap2.contains("wpa_psk=0000111122223333"));
    let ap1 = std::fs::read_to_string(h.dir.path().join("hostapd-ap1.conf")).unwrap();
    assert!(ap1.contains("wpa_passphrase=password"));

    h.write_file("hostapd-ap1.pid", "12345");
    h.unload().await;

    assert_eq!(h.commands().len(), 5);
    assert!(in_commands("kill 12345", h.commands()));
}

#[tokio::test]
async fn wireless_sta_mode_is_rejected() {
    let mut h = Harness::new(WIRELESS_STA_CONFIG);

    let err = h
        .manager
        .load_config(&h.config_file(), false)
        .await
        .unwrap_err();

    assert!(err.to_string().contains("sta mode"));
}

#[tokio::test]
async fn commands_are_ordered_by_priority() {
    let mut h = Harness::new(WIRELESS_AP_CONFIG);
    h.load().await;

    let priorities: Vec<i32> = h.commands().iter().map(|c| c.priority).collect();
    let mut sorted = priorities.clone();
    sorted.sort();
    assert_eq!(priorities, sorted);

    h.unload().await;

    // Teardown is all negated priorities, most negative first.
    let priorities: Vec<i32> = h.commands().iter().map(|c| c.priority).collect();
    assert!(priorities.iter().all(|p| *p < 0));
    let mut sorted = priorities.clone();
    sorted.sort();
    assert_eq!(priorities, sorted);
}

#[tokio::test]
async fn editing_an_ap_key_restarts_hostapd_only() {
    let mut h = Harness::new(WIRELESS_AP_CONFIG);
    h.load().await;

    let edited = WIRELESS_AP_CONFIG.replace("option key 'password'", "option key 'resworsap'");
    h.write_file("config", &edited);
    h.write_file("hostapd-ap1.pid", "4242");

    h.manager
        .load_config(&h.config_file(), false)
        .await
        .unwrap();

    let commands = h.commands();
    assert_eq!(commands.len(), 2);
    assert!(in_commands("kill 4242", commands));
    assert!(in_commands("hostapd", commands));

    let ap1 = std::fs::read_to_string(h.dir.path().join("hostapd-ap1.conf")).unwrap();
    assert!(ap1.contains("wpa_passphrase=resworsap"));
}

#[tokio::test]
async fn reloading_identical_config_is_a_noop() {
    let mut h = Harness::new(NETWORK_BRIDGE_CONFIG);
    h.load().await;
    h.load().await;

    assert!(h.commands().is_empty());
}

#[tokio::test]
async fn removing_a_section_reverts_only_that_section() {
    let mut h = Harness::new(FIREWALL_REDIRECT_CONFIG);
    h.load().await;

    // Drop the two port-forwarding redirects, keep the rest.
    let truncated: String = FIREWALL_REDIRECT_CONFIG
        .split("config redirect")
        .take(1)
        .collect();
    h.write_file("config", &truncated);

    h.manager
        .load_config(&h.config_file(), false)
        .await
        .unwrap();

    // Four DNAT rules get removed, nothing gets added.
    let commands = h.commands();
    assert_eq!(commands.len(), 4);
    assert!(commands.iter().all(|c| c.priority < 0));
    assert!(in_commands("-D", commands));
}
