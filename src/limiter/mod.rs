//! Per-node traffic limiter
//!
//! This module contains the admission-side state of a node:
//! - IP-count enforcement per user
//! - Lazy issuance of per-connection token buckets
//! - Compiled content-blocking rules
//! - The node-to-gate registry consulted by dispatch

mod bucket;
pub mod io;
mod registry;
pub mod rules;

pub use bucket::TokenBucket;
pub use io::RateLimitedWriter;
pub use registry::LimiterRegistry;
pub use rules::{BlockRule, RuleKind, RuleSet};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;

use crate::business::UserInfo;
use crate::error::{CoreError, Result};
use crate::utils::format_user_email;

/// Per-user override of the node limits
///
/// Zero means "no override"; the node default applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserLimit {
    pub uid: i64,
    pub ip_limit: usize,
    pub speed_limit: u64,
}

/// Admission gate of a single node
#[derive(Debug)]
pub struct RateGate {
    node: String,
    /// Default IP-count ceiling, 0 for unlimited
    ip_limit: usize,
    /// Default speed ceiling in bytes/sec, 0 for unlimited
    speed_limit: u64,
    user_limits: DashMap<String, UserLimit>,
    user_ips: DashMap<String, HashSet<String>>,
    rules: RuleSet,
}

impl RateGate {
    pub fn new(node: &str, ip_limit: usize, speed_limit: u64, rules: &[String]) -> Result<Self> {
        Ok(Self {
            node: node.to_string(),
            ip_limit,
            speed_limit,
            user_limits: DashMap::new(),
            user_ips: DashMap::new(),
            rules: RuleSet::new(rules)?,
        })
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn ip_limit(&self) -> usize {
        self.ip_limit
    }

    pub fn speed_limit(&self) -> u64 {
        self.speed_limit
    }

    /// Attach users, overwriting any existing entry
    ///
    /// Overrides start at zero; see [`RateGate::set_user_limit`].
    pub fn add_user_infos(&self, users: &[UserInfo]) {
        for user in users {
            self.user_limits.insert(
                format_user_email(&user.name, &self.node),
                UserLimit {
                    uid: user.id,
                    ip_limit: 0,
                    speed_limit: 0,
                },
            );
        }
    }

    /// Install a per-user override, keyed by email
    ///
    /// The effective ceilings stay `max(override, node default)`.
    pub fn set_user_limit(&self, email: &str, limit: UserLimit) {
        self.user_limits.insert(email.to_string(), limit);
    }

    /// Forget users along with their recorded IPs
    pub fn del_users(&self, node: &str, names: &[String]) {
        for name in names {
            let email = format_user_email(name, node);
            self.user_ips.remove(&email);
            self.user_limits.remove(&email);
        }
    }

    pub fn user_limit(&self, email: &str) -> Option<UserLimit> {
        self.user_limits.get(email).map(|l| *l.value())
    }

    pub fn user_count(&self) -> usize {
        self.user_limits.len()
    }

    /// Number of distinct IPs recorded for a user
    pub fn ip_count(&self, email: &str) -> usize {
        self.user_ips.get(email).map(|ips| ips.len()).unwrap_or(0)
    }

    fn effective_ip_limit(&self, email: &str) -> Option<usize> {
        self.user_limits
            .get(email)
            .map(|l| l.ip_limit.max(self.ip_limit))
    }

    /// Admission check for a connection from `ip`; returns true to reject
    ///
    /// Unknown users pass. A known IP always passes. A new IP is rejected
    /// once the user already holds as many IPs as the effective ceiling.
    pub fn check_ip_limit_then_record(&self, email: &str, ip: &str) -> bool {
        let Some(ceiling) = self.effective_ip_limit(email) else {
            return false;
        };
        match self.user_ips.entry(email.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(HashSet::from([ip.to_string()]));
                false
            }
            Entry::Occupied(mut slot) => {
                let ips = slot.get_mut();
                if ips.contains(ip) {
                    return false;
                }
                if ceiling > 0 && ips.len() >= ceiling {
                    return true;
                }
                ips.insert(ip.to_string());
                false
            }
        }
    }

    /// Check an externally tracked IP count; returns true to reject
    pub fn check_ip_by_count(&self, email: &str, count: usize) -> bool {
        match self.effective_ip_limit(email) {
            Some(ceiling) => ceiling > 0 && count >= ceiling,
            None => false,
        }
    }

    /// Issue a fresh token bucket for one connection of the user
    ///
    /// `Ok(None)` means the user is not speed limited.
    pub fn check_speed_limit_then_get_rate_limiter(
        &self,
        email: &str,
    ) -> Result<Option<Arc<TokenBucket>>> {
        let limit = self
            .user_limits
            .get(email)
            .map(|l| l.speed_limit.max(self.speed_limit))
            .ok_or_else(|| CoreError::UnknownUser(email.to_string()))?;
        Ok(TokenBucket::from_rate(limit).map(Arc::new))
    }

    /// Check if any block rule matches any of the contents; true to reject
    pub fn check_rule(&self, contents: &[&str]) -> bool {
        self.rules.matches(contents)
    }

    /// Swap in a new rule list; on error the current rules stay
    pub fn update_rule(&self, rules: &[String]) -> Result<()> {
        self.rules.replace(rules)
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }
}
