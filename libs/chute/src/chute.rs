//! Chute snapshots and their per-update cache.
//!
//! A chute is immutable per version; during an update the old and new
//! snapshots coexist and the stages communicate through the cache record.

use std::collections::BTreeMap;
use std::path::PathBuf;

use paradrop_confd::writer::SectionSpec;
use serde::Deserialize;

use crate::network::InterfaceRecord;

/// A user-deployable containerized workload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Chute {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    /// Image to pull from a registry instead of building locally.
    #[serde(default)]
    pub external_image: Option<String>,
    /// User-supplied environment variables.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub host_config: Option<HostConfigSpec>,
    /// Declared network interfaces, keyed by a short user-chosen name.
    #[serde(default)]
    pub net: BTreeMap<String, NetInterfaceSpec>,
    /// Dockerfile contents for local builds.
    #[serde(default)]
    pub dockerfile: Option<String>,

    #[serde(skip)]
    pub cache: ChuteCache,
}

impl Chute {
    /// The image the container runs: the external image verbatim, otherwise
    /// `name:version` with `latest` as fallback.
    pub fn image_name(&self) -> String {
        if let Some(image) = &self.external_image {
            return image.clone();
        }

        match &self.version {
            Some(version) => format!("{}:{}", self.name, version),
            None => format!("{}:latest", self.name),
        }
    }

    /// Internal ports to expose, parsed from the `port_bindings` keys.
    /// Keys are `"port"` or `"port/protocol"`.
    pub fn port_list(&self) -> Vec<PortSpec> {
        let Some(config) = &self.host_config else {
            return Vec::new();
        };

        config
            .port_bindings
            .keys()
            .filter_map(|key| {
                let (port, proto) = match key.split_once('/') {
                    Some((port, proto)) => (port, Some(proto.to_owned())),
                    None => (key.as_str(), None),
                };
                let port = port.parse().ok()?;

                Some(PortSpec { port, proto })
            })
            .collect()
    }
}

/// An internal port, optionally qualified by protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSpec {
    pub port: u16,
    pub proto: Option<String>,
}

impl std::fmt::Display for PortSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.proto {
            Some(proto) => write!(f, "{}/{proto}", self.port),
            None => write!(f, "{}/tcp", self.port),
        }
    }
}

/// The subset of container host configuration exposed to chute developers.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HostConfigSpec {
    /// Internal port (or `port/proto`) to host port.
    #[serde(default)]
    pub port_bindings: BTreeMap<String, u16>,
    #[serde(default)]
    pub dns: Vec<String>,
    #[serde(default)]
    pub cpu_shares: Option<i64>,
    #[serde(default)]
    pub memory: Option<i64>,
}

/// A declared chute network interface, before allocation.
///
/// `intf_name` and `net_type` are validated by the allocator rather than at
/// parse time so a malformed request still produces a proper update failure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetInterfaceSpec {
    #[serde(rename = "intfName", default)]
    pub intf_name: Option<String>,
    #[serde(rename = "type", default)]
    pub net_type: Option<String>,
    #[serde(default)]
    pub ssid: Option<String>,
    #[serde(default)]
    pub encryption: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub dhcp: Option<DhcpSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DhcpSpec {
    #[serde(default = "default_lease")]
    pub lease: String,
    #[serde(default = "default_start")]
    pub start: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_lease() -> String {
    "12h".to_owned()
}

fn default_start() -> u32 {
    100
}

fn default_limit() -> u32 {
    100
}

/// Scratch state the update stages accumulate on a chute snapshot.
#[derive(Debug, Clone, Default)]
pub struct ChuteCache {
    /// Physical devices available on the host, grouped by role.
    pub network_devices: Option<NetworkDevices>,
    /// Fully allocated interface records.
    pub network_interfaces: Option<Vec<InterfaceRecord>>,
    /// Host-side network sections projected from the interface records.
    pub os_network_config: Option<Vec<SectionSpec>>,
    /// Firewall sections synthesized for the chute's virtual network.
    pub virt_network_config: Option<Vec<SectionSpec>>,
    /// Volume bindings mounted into the container.
    pub volumes: Option<Vec<VolumeBinding>>,
    /// Mount point of the data volume inside the chute.
    pub internal_data_dir: Option<String>,
    /// Mount point of the read-only system volume inside the chute.
    pub internal_system_dir: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeBinding {
    pub host_path: PathBuf,
    pub bind: String,
    pub read_only: bool,
}

impl VolumeBinding {
    /// `host:container:mode` as container engines expect it.
    pub fn render(&self) -> String {
        let mode = if self.read_only { "ro" } else { "rw" };
        format!("{}:{}:{mode}", self.host_path.display(), self.bind)
    }
}

/// Physical network devices found on the host.
#[derive(Debug, Clone, Default)]
pub struct NetworkDevices {
    pub wifi: Vec<String>,
    pub lan: Vec<String>,
    pub wan: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_name_prefers_external_image() {
        let chute = Chute {
            name: "sensor".to_owned(),
            version: Some("3".to_owned()),
            external_image: Some("registry.example.com/sensor:v3".to_owned()),
            ..Default::default()
        };

        assert_eq!(chute.image_name(), "registry.example.com/sensor:v3");
    }

    #[test]
    fn image_name_falls_back_to_latest() {
        let chute = Chute {
            name: "sensor".to_owned(),
            ..Default::default()
        };

        assert_eq!(chute.image_name(), "sensor:latest");

        let versioned = Chute {
            name: "sensor".to_owned(),
            version: Some("2".to_owned()),
            ..Default::default()
        };
        assert_eq!(versioned.image_name(), "sensor:2");
    }

    #[test]
    fn port_list_parses_plain_and_qualified_ports() {
        let chute = Chute {
            name: "web".to_owned(),
            host_config: Some(HostConfigSpec {
                port_bindings: BTreeMap::from([
                    ("1111/udp".to_owned(), 1111),
                    ("2222".to_owned(), 2222),
                ]),
                ..Default::default()
            }),
            ..Default::default()
        };

        let ports = chute.port_list();

        assert_eq!(ports.len(), 2);
        assert!(ports.contains(&PortSpec {
            port: 1111,
            proto: Some("udp".to_owned()),
        }));
        assert!(ports.contains(&PortSpec {
            port: 2222,
            proto: None,
        }));
    }

    #[test]
    fn volume_binding_renders_mode() {
        let binding = VolumeBinding {
            host_path: PathBuf::from("/var/lib/paradrop/chutes/web/data"),
            bind: "/data".to_owned(),
            read_only: false,
        };

        assert_eq!(
            binding.render(),
            "/var/lib/paradrop/chutes/web/data:/data:rw"
        );
    }
}
