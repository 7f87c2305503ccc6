//! Control-plane surface
//!
//! The controller owns one engine instance at a time. `start` builds it from
//! the core configuration and captures its features; every node and user
//! operation then runs against those features until `close`.

use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;

use crate::business::{
    AddNodeParams, NodeInfo, NodeManager, ProtocolKind, UserInfo, UserManager, UserTraffic,
};
use crate::config::CoreConfig;
use crate::core::hooks::{Engine, EngineLauncher, Features};
use crate::error::{CoreError, Result};
use crate::limiter::{LimiterRegistry, RateGate};
use crate::logger::log;

/// Name reported by [`Controller::core_type`]
pub const CORE_TYPE: &str = "TenantCore";

/// State that exists while the engine runs
struct Running {
    engine: Arc<dyn Engine>,
    nodes: Arc<NodeManager>,
    users: UserManager,
}

pub struct Controller {
    launcher: Arc<dyn EngineLauncher>,
    state: RwLock<Option<Arc<Running>>>,
}

impl Controller {
    pub fn new(launcher: Arc<dyn EngineLauncher>) -> Self {
        Self {
            launcher,
            state: RwLock::new(None),
        }
    }

    /// Build and start the engine
    pub fn start(&self, data_dir: &Path, raw_config: &[u8]) -> Result<()> {
        let mut state = self.state.write();
        if state.is_some() {
            return Err(CoreError::AlreadyStarted);
        }

        let core_config = CoreConfig::from_slice(raw_config)?;
        let engine_config = core_config.engine_config(data_dir)?;
        let asset_dir = engine_config.asset_dir.clone();
        let engine = self
            .launcher
            .launch(engine_config)
            .map_err(|e| CoreError::engine("launch engine", e))?;
        engine
            .start()
            .map_err(|e| CoreError::engine("start engine", e))?;

        let features = Features::from_engine(engine.as_ref());
        let nodes = Arc::new(NodeManager::new(features.clone(), LimiterRegistry::new()));
        let users = UserManager::new(features, Arc::clone(&nodes));
        *state = Some(Arc::new(Running {
            engine,
            nodes,
            users,
        }));

        log::info!(asset_dir = %asset_dir.display(), "Core started");
        Ok(())
    }

    /// Close the engine and drop its features
    pub fn close(&self) -> Result<()> {
        let running = self.state.write().take().ok_or(CoreError::NotStarted)?;
        let nodes = running.nodes.len();
        running
            .engine
            .close()
            .map_err(|e| CoreError::engine("close engine", e))?;
        log::info!(nodes = nodes, "Core closed");
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.state.read().is_some()
    }

    fn running(&self) -> Result<Arc<Running>> {
        self.state.read().clone().ok_or(CoreError::NotStarted)
    }

    pub fn add_node(&self, params: &AddNodeParams) -> Result<()> {
        self.running()?.nodes.add_node(params)
    }

    pub fn del_node(&self, name: &str) -> Result<()> {
        self.running()?.nodes.del_node(name)
    }

    pub fn add_users(&self, node: &str, users: &[UserInfo]) -> Result<()> {
        self.running()?.users.add_users(node, users)
    }

    pub fn del_users(&self, node: &str, names: &[String]) -> Result<()> {
        self.running()?.users.del_users(node, names)
    }

    /// Traffic of a user; zeros when not started or unknown
    pub fn get_user_traffic(&self, node: &str, user: &str) -> UserTraffic {
        match self.running() {
            Ok(running) => running.users.get_user_traffic(node, user),
            Err(_) => UserTraffic::default(),
        }
    }

    pub fn reset_user_traffic(&self, node: &str, user: &str) -> Result<()> {
        self.running()?.users.reset_user_traffic(node, user)
    }

    /// Gate of a node, for connection dispatch
    pub fn limiter(&self, node: &str) -> Option<Arc<RateGate>> {
        self.running().ok()?.nodes.limiters().get_limiter(node)
    }

    pub fn node(&self, name: &str) -> Option<NodeInfo> {
        self.running().ok()?.nodes.node(name)
    }

    /// Names of live nodes, sorted
    pub fn node_names(&self) -> Vec<String> {
        self.running()
            .map(|r| r.nodes.node_names())
            .unwrap_or_default()
    }

    pub fn protocols(&self) -> Vec<&'static str> {
        ProtocolKind::ALL.iter().map(|p| p.as_str()).collect()
    }

    pub fn core_type(&self) -> &'static str {
        CORE_TYPE
    }
}
