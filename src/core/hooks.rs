//! Hook traits for the proxy engine
//!
//! Defines the capabilities the control layer consumes from the engine that
//! actually terminates connections and moves bytes.

use std::any::Any;
use std::sync::Arc;

use super::objects::{EngineConfig, InboundConfig, OutboundConfig, ProtocolUser, RoutingRule};
use crate::error::EngineResult;

/// A live inbound listener
pub trait InboundHandler: Send + Sync {
    /// Tag the handler is registered under
    fn tag(&self) -> &str;

    /// Per-user account management, if the inbound protocol has accounts
    fn account_manager(&self) -> Option<&dyn AccountManager>;

    fn as_any(&self) -> &dyn Any;
}

/// A live outbound egress
pub trait OutboundHandler: Send + Sync {
    /// Tag the handler is registered under
    fn tag(&self) -> &str;

    fn as_any(&self) -> &dyn Any;
}

/// Account registry of a single inbound
///
/// Users are keyed by their email.
pub trait AccountManager: Send + Sync {
    fn add_user(&self, user: ProtocolUser) -> EngineResult<()>;
    fn remove_user(&self, email: &str) -> EngineResult<()>;
}

/// Inbound handler registry
pub trait InboundManager: Send + Sync {
    fn add_handler(&self, handler: Arc<dyn InboundHandler>) -> EngineResult<()>;
    fn remove_handler(&self, tag: &str) -> EngineResult<()>;
    fn get_handler(&self, tag: &str) -> EngineResult<Arc<dyn InboundHandler>>;
}

/// Outbound handler registry
pub trait OutboundManager: Send + Sync {
    fn add_handler(&self, handler: Arc<dyn OutboundHandler>) -> EngineResult<()>;
    fn remove_handler(&self, tag: &str) -> EngineResult<()>;
    fn get_handler(&self, tag: &str) -> EngineResult<Arc<dyn OutboundHandler>>;
}

/// Routing rule registry
pub trait Router: Send + Sync {
    fn add_rule(&self, rule: RoutingRule) -> EngineResult<()>;
    fn remove_rule(&self, tag: &str) -> EngineResult<()>;
}

/// A named integer counter
pub trait Counter: Send + Sync {
    fn value(&self) -> i64;
    /// Set the value, returning the previous one
    fn set(&self, value: i64) -> i64;
    /// Add a delta, returning the new value
    fn add(&self, delta: i64) -> i64;
}

/// Statistics counter registry
pub trait StatsManager: Send + Sync {
    fn get_counter(&self, name: &str) -> Option<Arc<dyn Counter>>;
    /// Get the counter, creating it on first use
    fn register_counter(&self, name: &str) -> Arc<dyn Counter>;
    fn unregister_counter(&self, name: &str);
}

/// Builds live handlers from declarative objects
pub trait HandlerFactory: Send + Sync {
    fn create_inbound(&self, config: &InboundConfig) -> EngineResult<Arc<dyn InboundHandler>>;
    fn create_outbound(&self, config: &OutboundConfig) -> EngineResult<Arc<dyn OutboundHandler>>;
}

/// A running engine instance and its features
pub trait Engine: Send + Sync {
    fn start(&self) -> EngineResult<()>;
    fn close(&self) -> EngineResult<()>;

    fn inbound_manager(&self) -> Arc<dyn InboundManager>;
    fn outbound_manager(&self) -> Arc<dyn OutboundManager>;
    fn router(&self) -> Arc<dyn Router>;
    fn stats_manager(&self) -> Arc<dyn StatsManager>;
    fn handler_factory(&self) -> Arc<dyn HandlerFactory>;
}

/// Creates engine instances from configuration
pub trait EngineLauncher: Send + Sync {
    fn launch(&self, config: EngineConfig) -> EngineResult<Arc<dyn Engine>>;
}

/// Engine features captured once the engine is started
#[derive(Clone)]
pub struct Features {
    pub inbounds: Arc<dyn InboundManager>,
    pub outbounds: Arc<dyn OutboundManager>,
    pub router: Arc<dyn Router>,
    pub stats: Arc<dyn StatsManager>,
    pub factory: Arc<dyn HandlerFactory>,
}

impl Features {
    pub fn from_engine(engine: &dyn Engine) -> Self {
        Self {
            inbounds: engine.inbound_manager(),
            outbounds: engine.outbound_manager(),
            router: engine.router(),
            stats: engine.stats_manager(),
            factory: engine.handler_factory(),
        }
    }
}
