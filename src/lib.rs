//! Multi-tenant control core for a proxy engine
//!
//! Architecture:
//! - `core/`: Engine boundary traits, config objects and an in-process engine
//! - `limiter/`: Per-node IP, speed and content gates
//! - `business/`: Node lifecycle, users and traffic accounting
//! - `controller`: Control-plane surface over a running engine

pub mod business;
pub mod config;
pub mod controller;
pub mod core;
pub mod error;
pub mod limiter;
pub mod logger;
pub mod utils;

pub use controller::Controller;
pub use error::{CoreError, EngineError, Result};
