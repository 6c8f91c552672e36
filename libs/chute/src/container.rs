//! The port to the container engine.
//!
//! The core only ever talks to this trait; the production implementation
//! (bollard over the local Docker socket) lives in [`crate::docker`], and
//! tests script the engine's behavior.

use async_trait::async_trait;

use crate::chute::{Chute, PortSpec};
use crate::error::ContainerError;

/// Registry credentials for pulls of external images.
#[derive(Clone, Default)]
pub struct RegistryAuth {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for RegistryAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryAuth")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Everything the engine needs to create a container.
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    pub image: String,
    pub name: String,
    /// `KEY=VALUE` pairs.
    pub env: Vec<String>,
    /// Internal ports to expose.
    pub ports: Vec<PortSpec>,
    /// Internal port to host port.
    pub port_bindings: Vec<(PortSpec, u16)>,
    /// `host:container:mode` bind mounts.
    pub binds: Vec<String>,
    pub dns: Vec<String>,
    pub cpu_shares: Option<i64>,
    pub memory: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct ContainerState {
    pub running: bool,
    pub ip_address: Option<String>,
}

/// Sink for human-readable progress lines (image pulls, builds).
pub type ProgressSink<'a> = &'a mut (dyn FnMut(String) + Send);

#[async_trait]
pub trait ContainerEngine: Send + Sync {
    async fn pull(
        &self,
        image: &str,
        auth: Option<&RegistryAuth>,
        progress: ProgressSink<'_>,
    ) -> Result<(), ContainerError>;

    async fn build(
        &self,
        tag: &str,
        dockerfile: &str,
        progress: ProgressSink<'_>,
    ) -> Result<(), ContainerError>;

    async fn create(&self, spec: &ContainerSpec) -> Result<String, ContainerError>;

    async fn start(&self, name: &str) -> Result<(), ContainerError>;

    async fn stop(&self, name: &str) -> Result<(), ContainerError>;

    async fn remove_container(&self, name: &str, force: bool) -> Result<(), ContainerError>;

    async fn remove_image(&self, image: &str) -> Result<(), ContainerError>;

    async fn inspect(&self, name: &str) -> Result<ContainerState, ContainerError>;
}

/// Builds the container spec for a chute the way the agent deploys them.
pub fn container_spec(chute: &Chute, router_id: &str) -> ContainerSpec {
    let mut env: Vec<String> = chute
        .environment
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect();

    env.push(format!("PARADROP_CHUTE_NAME={}", chute.name));
    env.push(format!("PARADROP_ROUTER_ID={router_id}"));
    if let Some(dir) = &chute.cache.internal_data_dir {
        env.push(format!("PARADROP_DATA_DIR={dir}"));
    }
    if let Some(dir) = &chute.cache.internal_system_dir {
        env.push(format!("PARADROP_SYSTEM_DIR={dir}"));
    }
    if let Some(version) = &chute.version {
        env.push(format!("PARADROP_CHUTE_VERSION={version}"));
    }

    let binds = chute
        .cache
        .volumes
        .as_deref()
        .unwrap_or_default()
        .iter()
        .map(|v| v.render())
        .collect();

    let (port_bindings, dns, cpu_shares, memory) = match &chute.host_config {
        Some(config) => (
            config
                .port_bindings
                .iter()
                .filter_map(|(key, host_port)| {
                    let (port, proto) = match key.split_once('/') {
                        Some((port, proto)) => (port, Some(proto.to_owned())),
                        None => (key.as_str(), None),
                    };
                    Some((
                        PortSpec {
                            port: port.parse().ok()?,
                            proto,
                        },
                        *host_port,
                    ))
                })
                .collect(),
            config.dns.clone(),
            config.cpu_shares,
            config.memory,
        ),
        None => (Vec::new(), Vec::new(), None, None),
    };

    ContainerSpec {
        image: chute.image_name(),
        name: chute.name.clone(),
        env,
        ports: chute.port_list(),
        port_bindings,
        binds,
        dns,
        cpu_shares,
        memory,
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::chute::{HostConfigSpec, VolumeBinding};
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    #[test]
    fn spec_carries_paradrop_environment() {
        let mut chute = Chute {
            name: "sensor".to_owned(),
            version: Some("3".to_owned()),
            environment: BTreeMap::from([("MODE".to_owned(), "fast".to_owned())]),
            ..Default::default()
        };
        chute.cache.internal_data_dir = Some("/data".to_owned());
        chute.cache.internal_system_dir = Some("/system".to_owned());
        chute.cache.volumes = Some(vec![VolumeBinding {
            host_path: PathBuf::from("/srv/chutes/sensor/data"),
            bind: "/data".to_owned(),
            read_only: false,
        }]);

        let spec = container_spec(&chute, "router-1");

        assert_eq!(spec.image, "sensor:3");
        assert!(spec.env.contains(&"PARADROP_CHUTE_NAME=sensor".to_owned()));
        assert!(spec.env.contains(&"PARADROP_ROUTER_ID=router-1".to_owned()));
        assert!(spec.env.contains(&"PARADROP_DATA_DIR=/data".to_owned()));
        assert!(spec.env.contains(&"PARADROP_CHUTE_VERSION=3".to_owned()));
        assert!(spec.env.contains(&"MODE=fast".to_owned()));
        assert_eq!(spec.binds, ["/srv/chutes/sensor/data:/data:rw"]);
    }

    #[test]
    fn spec_translates_port_bindings() {
        let chute = Chute {
            name: "web".to_owned(),
            host_config: Some(HostConfigSpec {
                port_bindings: BTreeMap::from([("80".to_owned(), 8080)]),
                ..Default::default()
            }),
            ..Default::default()
        };

        let spec = container_spec(&chute, "router-1");

        assert_eq!(spec.port_bindings.len(), 1);
        assert_eq!(spec.port_bindings[0].1, 8080);
        assert_eq!(spec.port_bindings[0].0.port, 80);
    }
}
