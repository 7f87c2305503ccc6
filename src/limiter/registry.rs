//! Node name to RateGate mapping used by connection dispatch

use dashmap::DashMap;
use std::sync::Arc;

use super::RateGate;

/// Registry of the rate gates of every live node
///
/// Sharded, so installing or removing one node's gate never blocks lookups
/// for other nodes.
#[derive(Debug, Clone, Default)]
pub struct LimiterRegistry {
    gates: Arc<DashMap<String, Arc<RateGate>>>,
}

impl LimiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a node's gate, replacing any previous one
    pub fn add_limiter(&self, node: &str, gate: Arc<RateGate>) {
        self.gates.insert(node.to_string(), gate);
    }

    pub fn remove_limiter(&self, node: &str) -> Option<Arc<RateGate>> {
        self.gates.remove(node).map(|(_, gate)| gate)
    }

    pub fn get_limiter(&self, node: &str) -> Option<Arc<RateGate>> {
        self.gates.get(node).map(|g| Arc::clone(g.value()))
    }

    pub fn contains(&self, node: &str) -> bool {
        self.gates.contains_key(node)
    }

    pub fn len(&self) -> usize {
        self.gates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gates.is_empty()
    }
}
