//! Per-user traffic counters kept in the engine's stats registry

use std::sync::Arc;

use super::params::UserTraffic;
use crate::core::hooks::StatsManager;
use crate::utils::format_user_email;

/// Name of a user's uplink counter
pub fn uplink_name(node: &str, user: &str) -> String {
    format!("user>>>{}>>>traffic>>>uplink", format_user_email(user, node))
}

/// Name of a user's downlink counter
pub fn downlink_name(node: &str, user: &str) -> String {
    format!("user>>>{}>>>traffic>>>downlink", format_user_email(user, node))
}

/// Uplink/downlink counter pair per user of a node
#[derive(Clone)]
pub struct UserLedger {
    stats: Arc<dyn StatsManager>,
}

impl UserLedger {
    pub fn new(stats: Arc<dyn StatsManager>) -> Self {
        Self { stats }
    }

    /// Create both counters of a user if missing
    pub fn register(&self, node: &str, user: &str) {
        self.stats.register_counter(&uplink_name(node, user));
        self.stats.register_counter(&downlink_name(node, user));
    }

    /// Read both counters; missing counters read as 0
    pub fn traffic(&self, node: &str, user: &str) -> UserTraffic {
        let read = |name: String| {
            self.stats
                .get_counter(&name)
                .map(|c| c.value())
                .unwrap_or(0)
        };
        UserTraffic {
            up: read(uplink_name(node, user)),
            down: read(downlink_name(node, user)),
        }
    }

    /// Zero both counters; missing counters are skipped
    pub fn reset(&self, node: &str, user: &str) {
        for name in [uplink_name(node, user), downlink_name(node, user)] {
            if let Some(counter) = self.stats.get_counter(&name) {
                counter.set(0);
            }
        }
    }

    /// Drop both counters of a user
    pub fn remove(&self, node: &str, user: &str) {
        self.stats.unregister_counter(&uplink_name(node, user));
        self.stats.unregister_counter(&downlink_name(node, user));
    }
}
