//! Dynamic network allocation and configuration synthesis for chutes.
//!
//! Each declared interface gets a /24 lease, a host-side bridge name, and
//! (for Wi-Fi) a physical radio; the records are then projected into the
//! UCI sections the confd subsystem reconciles.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::net::Ipv4Addr;
use std::path::Path;

use ip_network::Ipv4Network;
use paradrop_confd::OptionValue;
use paradrop_confd::writer::SectionSpec;
use serde::Deserialize;

use crate::chute::{DhcpSpec, NetInterfaceSpec, NetworkDevices};
use crate::pool::NetworkPool;
use crate::{Error, Result};

/// Host-side interface names are limited to 15 characters (IFNAMSIZ minus
/// the terminator).
pub const MAX_INTERFACE_NAME_LEN: usize = 15;

/// Declared names must leave room for the `vc####` prefix used on veth
/// endpoints.
pub const MAX_DECLARED_NAME_LEN: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetType {
    Wan,
    Lan,
    Wifi,
}

impl NetType {
    fn parse(value: &str) -> Result<Self> {
        match value {
            "wan" => Ok(NetType::Wan),
            "lan" => Ok(NetType::Lan),
            "wifi" => Ok(NetType::Wifi),
            other => Err(Error::validation(format!(
                "unknown network type '{other}' (expected wan, lan, or wifi)"
            ))),
        }
    }
}

impl fmt::Display for NetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NetType::Wan => "wan",
            NetType::Lan => "lan",
            NetType::Wifi => "wifi",
        };
        f.write_str(s)
    }
}

/// A fully allocated chute interface.
#[derive(Debug, Clone)]
pub struct InterfaceRecord {
    /// The user-chosen name from the chute definition.
    pub name: String,
    pub net_type: NetType,
    /// Interface name on the host side (bridge / veth endpoint).
    pub external_intf: String,
    /// Interface name inside the chute.
    pub internal_intf: String,
    pub subnet: Ipv4Network,
    pub netmask: Ipv4Addr,
    pub external_ipaddr: Ipv4Addr,
    pub internal_ipaddr: Ipv4Addr,
    /// `internal/prefix`, the format the veth glue tool expects.
    pub ipaddr_with_prefix: String,
    /// Physical radio backing a Wi-Fi interface.
    pub device: Option<String>,
    pub ssid: Option<String>,
    pub encryption: Option<String>,
    pub key: Option<String>,
    pub dhcp: Option<DhcpSpec>,
}

/// Allocates addresses, names, and radios for every declared interface.
///
/// On failure every subnet leased so far goes back to the pool.
pub fn allocate_interfaces(
    chute_name: &str,
    net: &BTreeMap<String, NetInterfaceSpec>,
    devices: &NetworkDevices,
    pool: &mut NetworkPool,
) -> Result<Vec<InterfaceRecord>> {
    let mut leased = Vec::new();

    match try_allocate(chute_name, net, devices, pool, &mut leased) {
        Ok(records) => Ok(records),
        Err(e) => {
            for subnet in leased {
                pool.release(subnet);
            }
            Err(e)
        }
    }
}

fn try_allocate(
    chute_name: &str,
    net: &BTreeMap<String, NetInterfaceSpec>,
    devices: &NetworkDevices,
    pool: &mut NetworkPool,
    leased: &mut Vec<Ipv4Network>,
) -> Result<Vec<InterfaceRecord>> {
    let mut records = Vec::new();
    let mut wifi_cursor = 0usize;

    // Host-side names must not collide with each other or with devices that
    // already exist on the host.
    let mut taken_names: HashSet<String> = devices
        .wifi
        .iter()
        .chain(&devices.lan)
        .chain(&devices.wan)
        .cloned()
        .collect();

    for (name, spec) in net {
        if name.len() > MAX_DECLARED_NAME_LEN {
            return Err(Error::validation(format!(
                "network interface name '{name}' is longer than {MAX_DECLARED_NAME_LEN} characters"
            )));
        }

        let internal_intf = spec
            .intf_name
            .as_deref()
            .ok_or_else(|| {
                Error::validation(format!("network interface '{name}' is missing intfName"))
            })?
            .to_owned();
        let net_type = NetType::parse(spec.net_type.as_deref().ok_or_else(|| {
            Error::validation(format!("network interface '{name}' is missing type"))
        })?)?;

        if internal_intf.len() > MAX_DECLARED_NAME_LEN {
            return Err(Error::validation(format!(
                "intfName '{internal_intf}' is longer than {MAX_DECLARED_NAME_LEN} characters"
            )));
        }

        let subnet = pool.next()?;
        leased.push(subnet);
        let mut hosts = subnet.hosts();
        let external_ipaddr = hosts.next().ok_or_else(|| {
            Error::validation(format!("subnet {subnet} has no usable addresses"))
        })?;
        let internal_ipaddr = hosts.next().ok_or_else(|| {
            Error::validation(format!("subnet {subnet} has no second usable address"))
        })?;

        // Host-side name: truncated chute name, a dot, then the internal
        // name. Must stay within the kernel's interface-name limit.
        let prefix_len = MAX_INTERFACE_NAME_LEN - internal_intf.len() - 1;
        let prefix = &chute_name[..chute_name.len().min(prefix_len)];
        let external_intf = format!("{prefix}.{internal_intf}");

        if !taken_names.insert(external_intf.clone()) {
            return Err(Error::validation(format!(
                "host interface name '{external_intf}' is not unique"
            )));
        }

        let mut record = InterfaceRecord {
            name: name.clone(),
            net_type,
            external_intf,
            internal_intf,
            subnet,
            netmask: subnet.full_netmask(),
            external_ipaddr,
            internal_ipaddr,
            ipaddr_with_prefix: format!("{internal_ipaddr}/{}", subnet.netmask()),
            device: None,
            ssid: None,
            encryption: None,
            key: None,
            dhcp: spec.dhcp.clone(),
        };

        if net_type == NetType::Wifi {
            if devices.wifi.is_empty() {
                return Err(Error::ResourceExhausted(
                    "chute requests a WiFi interface but no radios are available".to_owned(),
                ));
            }

            // Round-robin over the physical radios.
            record.device = Some(devices.wifi[wifi_cursor % devices.wifi.len()].clone());
            wifi_cursor += 1;

            record.ssid = Some(spec.ssid.clone().ok_or_else(|| {
                Error::validation(format!("WiFi interface '{name}' is missing ssid"))
            })?);
            record.encryption = spec.encryption.clone();
            record.key = spec.key.clone();
        }

        records.push(record);
    }

    Ok(records)
}

/// Projects interface records into host network sections: every chute
/// interface is a bridge with static addressing on the host side.
pub fn os_network_sections(records: &[InterfaceRecord]) -> Vec<SectionSpec> {
    records
        .iter()
        .map(|record| {
            SectionSpec::new("interface", Some(record.external_intf.clone()))
                .option("type", "bridge")
                .option("proto", "static")
                .option("ipaddr", record.external_ipaddr.to_string())
                .option("netmask", record.netmask.to_string())
                .value(
                    "ifname",
                    OptionValue::List(vec![record.external_intf.clone()]),
                )
        })
        .collect()
}

/// Wi-Fi and DHCP sections synthesized per interface record.
pub fn wireless_and_dhcp_sections(chute_name: &str, records: &[InterfaceRecord]) -> Vec<SectionSpec> {
    let mut sections = Vec::new();

    for record in records {
        if let (NetType::Wifi, Some(device), Some(ssid)) =
            (record.net_type, &record.device, &record.ssid)
        {
            let mut section =
                SectionSpec::new("wifi-iface", Some(format!("{chute_name}-{}", record.name)))
                    .option("device", device)
                    .option("mode", "ap")
                    .option("ssid", ssid)
                    .option("network", &record.external_intf);

            if let Some(encryption) = &record.encryption {
                section = section.option("encryption", encryption);
            }
            if let Some(key) = &record.key {
                section = section.option("key", key);
            }

            sections.push(section);
        }

        if let Some(dhcp) = &record.dhcp {
            sections.push(
                SectionSpec::new("dhcp", Some(record.external_intf.clone()))
                    .option("interface", &record.external_intf)
                    .option("start", dhcp.start.to_string())
                    .option("limit", dhcp.limit.to_string())
                    .option("leasetime", &dhcp.lease),
            );
        }
    }

    sections
}

/// Scans a sysfs-like directory for network devices. Devices carrying a
/// `phy80211` entry are radios; the remainder are split into one WAN uplink
/// and LAN ports.
pub fn detect_network_devices(sys_net: &Path, wan_interface: &str) -> Result<NetworkDevices> {
    let mut devices = NetworkDevices::default();

    let mut names = Vec::new();
    for entry in std::fs::read_dir(sys_net)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == "lo" {
            continue;
        }
        names.push((name, entry.path()));
    }
    names.sort();

    for (name, path) in names {
        if path.join("phy80211").exists() || path.join("wireless").exists() {
            devices.wifi.push(name);
        } else if name == wan_interface {
            devices.wan.push(name);
        } else {
            devices.lan.push(name);
        }
    }

    Ok(devices)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(intf_name: &str, net_type: &str) -> NetInterfaceSpec {
        NetInterfaceSpec {
            intf_name: Some(intf_name.to_owned()),
            net_type: Some(net_type.to_owned()),
            ..Default::default()
        }
    }

    fn pool() -> NetworkPool {
        NetworkPool::new("192.168.128.0/17".parse().unwrap()).unwrap()
    }

    fn no_devices() -> NetworkDevices {
        NetworkDevices::default()
    }

    #[test]
    fn assigns_host_and_chute_addresses_from_the_lease() {
        let net = BTreeMap::from([("mynet".to_owned(), spec("eth1", "lan"))]);

        let records =
            allocate_interfaces("seismograph", &net, &no_devices(), &mut pool()).unwrap();

        let record = &records[0];
        assert_eq!(record.external_ipaddr.to_string(), "192.168.128.1");
        assert_eq!(record.internal_ipaddr.to_string(), "192.168.128.2");
        assert_eq!(record.netmask.to_string(), "255.255.255.0");
        assert_eq!(record.ipaddr_with_prefix, "192.168.128.2/24");
    }

    #[test]
    fn external_name_is_truncated_chute_name_dot_intf_name() {
        let net = BTreeMap::from([("mynet".to_owned(), spec("eth1", "lan"))]);

        let records =
            allocate_interfaces("averylongchutename", &net, &no_devices(), &mut pool()).unwrap();

        let record = &records[0];
        assert_eq!(record.external_intf, "averylongc.eth1");
        assert!(record.external_intf.len() <= MAX_INTERFACE_NAME_LEN);
    }

    #[test]
    fn declared_names_longer_than_ten_chars_are_rejected() {
        let net = BTreeMap::from([("morethantenchars".to_owned(), spec("eth1", "lan"))]);

        let err = allocate_interfaces("chute", &net, &no_devices(), &mut pool()).unwrap_err();

        assert!(err.to_string().contains("longer than 10"));
    }

    #[test]
    fn missing_intf_name_or_type_is_rejected() {
        let net = BTreeMap::from([(
            "mynet".to_owned(),
            NetInterfaceSpec {
                net_type: Some("lan".to_owned()),
                ..Default::default()
            },
        )]);
        let err = allocate_interfaces("chute", &net, &no_devices(), &mut pool()).unwrap_err();
        assert!(err.to_string().contains("intfName"));

        let net = BTreeMap::from([(
            "mynet".to_owned(),
            NetInterfaceSpec {
                intf_name: Some("eth1".to_owned()),
                ..Default::default()
            },
        )]);
        let err = allocate_interfaces("chute", &net, &no_devices(), &mut pool()).unwrap_err();
        assert!(err.to_string().contains("missing type"));
    }

    #[test]
    fn wifi_interfaces_round_robin_over_radios() {
        let devices = NetworkDevices {
            wifi: vec!["phy0".to_owned(), "phy1".to_owned()],
            ..Default::default()
        };

        let mut wifi_a = spec("wlan0", "wifi");
        wifi_a.ssid = Some("NetA".to_owned());
        let mut wifi_b = spec("wlan1", "wifi");
        wifi_b.ssid = Some("NetB".to_owned());
        let mut wifi_c = spec("wlan2", "wifi");
        wifi_c.ssid = Some("NetC".to_owned());

        let net = BTreeMap::from([
            ("a".to_owned(), wifi_a),
            ("b".to_owned(), wifi_b),
            ("c".to_owned(), wifi_c),
        ]);

        let records = allocate_interfaces("wifichute", &net, &devices, &mut pool()).unwrap();

        let assigned: Vec<_> = records.iter().filter_map(|r| r.device.clone()).collect();
        assert_eq!(assigned, ["phy0", "phy1", "phy0"]);
    }

    #[test]
    fn wifi_without_radios_is_resource_exhaustion() {
        let mut wifi = spec("wlan0", "wifi");
        wifi.ssid = Some("Net".to_owned());
        let net = BTreeMap::from([("a".to_owned(), wifi)]);

        let err = allocate_interfaces("chute", &net, &no_devices(), &mut pool()).unwrap_err();

        assert!(matches!(err, Error::ResourceExhausted(_)));
    }

    #[test]
    fn failed_allocation_returns_its_leases() {
        let devices = NetworkDevices {
            wifi: vec!["phy0".to_owned()],
            ..Default::default()
        };
        // The second interface fails validation after the first already
        // holds a lease.
        let net = BTreeMap::from([
            ("a".to_owned(), spec("eth1", "lan")),
            ("b".to_owned(), spec("wlan0", "wifi")),
        ]);
        let mut pool = pool();

        assert!(allocate_interfaces("chute", &net, &devices, &mut pool).is_err());

        assert_eq!(pool.next().unwrap().to_string(), "192.168.128.0/24");
    }

    #[test]
    fn wifi_without_ssid_is_rejected() {
        let devices = NetworkDevices {
            wifi: vec!["phy0".to_owned()],
            ..Default::default()
        };
        let net = BTreeMap::from([("a".to_owned(), spec("wlan0", "wifi"))]);

        let err = allocate_interfaces("chute", &net, &devices, &mut pool()).unwrap_err();

        assert!(err.to_string().contains("ssid"));
    }

    #[test]
    fn projection_renders_bridge_sections() {
        let net = BTreeMap::from([("mynet".to_owned(), spec("eth1", "lan"))]);
        let records = allocate_interfaces("chute", &net, &no_devices(), &mut pool()).unwrap();

        let sections = os_network_sections(&records);

        assert_eq!(sections.len(), 1);
        let rendered = paradrop_confd::writer::render_sections(&sections);
        assert!(rendered.contains("config interface chute.eth1"));
        assert!(rendered.contains("option type 'bridge'"));
        assert!(rendered.contains("option ipaddr '192.168.128.1'"));
        assert!(rendered.contains("list ifname 'chute.eth1'"));
    }

    #[test]
    fn dhcp_block_synthesizes_a_dhcp_section() {
        let mut lan = spec("eth1", "lan");
        lan.dhcp = Some(DhcpSpec {
            lease: "2h".to_owned(),
            start: 10,
            limit: 50,
        });
        let net = BTreeMap::from([("mynet".to_owned(), lan)]);
        let records = allocate_interfaces("chute", &net, &no_devices(), &mut pool()).unwrap();

        let sections = wireless_and_dhcp_sections("chute", &records);

        let rendered = paradrop_confd::writer::render_sections(&sections);
        assert!(rendered.contains("config dhcp chute.eth1"));
        assert!(rendered.contains("option leasetime '2h'"));
        assert!(rendered.contains("option start '10'"));
    }
}
