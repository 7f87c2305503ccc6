//! Business logic implementations
//!
//! This module contains the tenant-facing logic:
//! - Node lifecycle (protocol adapters, block rules, limiter install)
//! - User management and account construction
//! - Per-user traffic ledger

pub mod account;
pub mod block_rules;
pub mod ledger;
mod node_manager;
pub mod params;
pub mod protocol;
mod user_manager;

pub use ledger::UserLedger;
pub use node_manager::NodeManager;
pub use params::{
    AddNodeParams, CommonNodeParams, LimitOptions, NodeInfo, ProtocolKind, ProtocolParams,
    ShadowsocksNodeParams, TlsOptions, UserInfo, UserTraffic, V2rayNodeParams, VLessNodeParams,
};
pub use user_manager::UserManager;
