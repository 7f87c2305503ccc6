//! Proxy engine boundary
//!
//! This module contains what the control layer needs from the engine:
//! - Capability traits (handler managers, router, counters, factory)
//! - Declarative engine objects
//! - An in-process engine implementing every capability

pub mod hooks;
pub mod memory;
pub mod objects;

pub use hooks::{
    AccountManager, Counter, Engine, EngineLauncher, Features, HandlerFactory, InboundHandler,
    InboundManager, OutboundHandler, OutboundManager, Router, StatsManager,
};
pub use memory::{MemoryEngine, MemoryLauncher};
pub use objects::{
    Account, CipherType, EngineConfig, InboundConfig, Network, OutboundConfig, ProtocolUser,
    RoutingRule,
};
