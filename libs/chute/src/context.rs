//! Agent-wide state, passed explicitly instead of living in globals.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use ip_network::Ipv4Network;
use paradrop_confd::ConfigManager;
use parking_lot::Mutex;

use crate::chute::Chute;
use crate::container::{ContainerEngine, RegistryAuth};
use crate::pool::NetworkPool;
use crate::Result;

/// Agent configuration, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Directory of UCI config files the confd manager reconciles.
    pub config_dir: PathBuf,
    /// Directory for derived daemon configs and PID files.
    pub write_dir: PathBuf,
    /// Root for per-chute data and system directories.
    pub data_dir: PathBuf,
    /// Supernet the per-chute /24 leases are drawn from.
    pub dynamic_network_pool: Ipv4Network,
    pub registry_auth: Option<RegistryAuth>,
    pub router_id: String,
    /// The veth glue tool connecting host bridges to container interfaces.
    pub pipework: PathBuf,
    /// Usually `/sys/class/net`; overridable for tests.
    pub sys_net_dir: PathBuf,
    /// Physical interface treated as the WAN uplink.
    pub wan_interface: String,
    /// When false, host commands and glue tools are planned but not run.
    pub apply_commands: bool,
    /// Attach the response log to completed updates.
    pub debug_mode: bool,
}

/// In-memory store of deployed chutes.
#[derive(Default)]
pub struct ChuteStorage {
    inner: Mutex<HashMap<String, Chute>>,
}

impl ChuteStorage {
    pub fn get(&self, name: &str) -> Option<Chute> {
        self.inner.lock().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.lock().contains_key(name)
    }

    pub fn insert(&self, chute: Chute) {
        self.inner.lock().insert(chute.name.clone(), chute);
    }

    pub fn remove(&self, name: &str) -> Option<Chute> {
        self.inner.lock().remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

/// Everything an update needs to execute. One per agent process.
pub struct AgentContext {
    pub settings: Settings,
    pub chutes: ChuteStorage,
    pub pool: Mutex<NetworkPool>,
    /// The reconciler is single-writer; the async mutex serializes reloads.
    pub confd: tokio::sync::Mutex<ConfigManager>,
    pub engine: Arc<dyn ContainerEngine>,
}

impl AgentContext {
    pub fn new(settings: Settings, engine: Arc<dyn ContainerEngine>) -> Result<Self> {
        let pool = NetworkPool::new(settings.dynamic_network_pool)?;
        let confd = ConfigManager::new(&settings.write_dir);

        Ok(AgentContext {
            settings,
            chutes: ChuteStorage::default(),
            pool: Mutex::new(pool),
            confd: tokio::sync::Mutex::new(confd),
            engine,
        })
    }
}
