//! Node lifecycle management
//!
//! A node is absent or active. Adding one builds its engine objects, installs
//! its gate, handlers and block rules, then records it; any failure undoes the
//! steps already taken. Deleting one tears the same pieces down, handlers
//! first so no new connection is admitted while bookkeeping goes away. A
//! delete that failed midway can be retried until the node is gone.

use dashmap::{DashMap, DashSet};
use std::collections::HashSet;
use std::sync::Arc;

use super::block_rules;
use super::ledger::UserLedger;
use super::params::{AddNodeParams, NodeInfo};
use super::protocol;
use crate::config::ExpandNodeOptions;
use crate::core::hooks::Features;
use crate::error::{CoreError, EngineError, Result};
use crate::limiter::{LimiterRegistry, RateGate};
use crate::logger::log;
use crate::utils::{format_default_outbound_name, Rollback};

/// A live node
#[derive(Debug, Clone)]
struct NodeEntry {
    info: NodeInfo,
    /// Router tags installed for the node's block rules
    rule_tags: Vec<String>,
    /// Users with ledger counters on the node
    users: HashSet<String>,
}

/// Releases a name reservation when an add finishes
struct Reservation<'a> {
    pending: &'a DashSet<String>,
    name: &'a str,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.pending.remove(self.name);
    }
}

/// Registry of live nodes
pub struct NodeManager {
    features: Features,
    limiters: LimiterRegistry,
    ledger: UserLedger,
    nodes: DashMap<String, NodeEntry>,
    /// Names with an add in flight
    pending: DashSet<String>,
}

impl NodeManager {
    pub fn new(features: Features, limiters: LimiterRegistry) -> Self {
        let ledger = UserLedger::new(Arc::clone(&features.stats));
        Self {
            features,
            limiters,
            ledger,
            nodes: DashMap::new(),
            pending: DashSet::new(),
        }
    }

    pub fn limiters(&self) -> &LimiterRegistry {
        &self.limiters
    }

    pub fn ledger(&self) -> &UserLedger {
        &self.ledger
    }

    /// Add a node
    pub fn add_node(&self, params: &AddNodeParams) -> Result<()> {
        let info = &params.info;
        let name = info.name.as_str();
        if !self.pending.insert(name.to_string()) {
            return Err(CoreError::NodeExists(name.to_string()));
        }
        let _reservation = Reservation {
            pending: &self.pending,
            name,
        };
        if self.nodes.contains_key(name) {
            return Err(CoreError::NodeExists(name.to_string()));
        }

        let expand = ExpandNodeOptions::from_options(&info.other_options)?;
        let inbound = protocol::build_inbound(info, &expand, &params.tls)?;
        let outbound_tag = format_default_outbound_name(name);
        let outbound = protocol::build_outbound(&outbound_tag, &expand)?;
        let gate = RateGate::new(
            name,
            info.limit.ip_limit,
            info.limit.speed_limit,
            &info.rules,
        )?;

        let features = &self.features;
        let mut rollback = Rollback::new(format!("add node {}", name));

        self.limiters.add_limiter(name, Arc::new(gate));
        rollback.push("limiter", || {
            self.limiters.remove_limiter(name);
            Ok(())
        });

        let handler = features
            .factory
            .create_inbound(&inbound)
            .map_err(|e| CoreError::engine(format!("create inbound {}", name), e))?;
        features
            .inbounds
            .add_handler(handler)
            .map_err(|e| CoreError::engine(format!("add inbound handler {}", name), e))?;
        rollback.push("inbound", || {
            features
                .inbounds
                .remove_handler(name)
                .map_err(|e| CoreError::engine(format!("remove inbound {}", name), e))
        });

        let handler = features
            .factory
            .create_outbound(&outbound)
            .map_err(|e| CoreError::engine(format!("create outbound {}", outbound_tag), e))?;
        features
            .outbounds
            .add_handler(handler)
            .map_err(|e| CoreError::engine(format!("add outbound handler {}", outbound_tag), e))?;
        rollback.push("outbound", || {
            features
                .outbounds
                .remove_handler(&outbound_tag)
                .map_err(|e| CoreError::engine(format!("remove outbound {}", outbound_tag), e))
        });

        let rule_tags = block_rules::add_block_rules(features.router.as_ref(), name, &info.rules)?;

        self.nodes.insert(
            name.to_string(),
            NodeEntry {
                info: info.clone(),
                rule_tags,
                users: HashSet::new(),
            },
        );
        rollback.commit();
        log::node(name, "added");
        Ok(())
    }

    /// Delete a node
    ///
    /// A failure removing either handler aborts the rest of the teardown and
    /// leaves the node registered. Handlers already gone count as removed, so
    /// a retry picks up where the failed call stopped.
    pub fn del_node(&self, name: &str) -> Result<()> {
        let (rule_tags, users) = self
            .nodes
            .get(name)
            .map(|entry| (entry.rule_tags.clone(), entry.users.clone()))
            .ok_or_else(|| CoreError::NodeNotFound(name.to_string()))?;

        match self.features.inbounds.remove_handler(name) {
            Ok(()) | Err(EngineError::TagNotFound(_)) => {}
            Err(e) => return Err(CoreError::engine(format!("remove inbound {}", name), e)),
        }
        let outbound_tag = format_default_outbound_name(name);
        match self.features.outbounds.remove_handler(&outbound_tag) {
            Ok(()) | Err(EngineError::TagNotFound(_)) => {}
            Err(e) => {
                return Err(CoreError::engine(
                    format!("remove outbound {}", outbound_tag),
                    e,
                ))
            }
        }

        self.limiters.remove_limiter(name);
        block_rules::remove_tags(self.features.router.as_ref(), &rule_tags)?;
        for user in &users {
            self.ledger.remove(name, user);
        }
        self.nodes.remove(name);
        log::node(name, "removed");
        Ok(())
    }

    /// Note users that now have ledger counters on a node
    ///
    /// Returns false if the node is not registered.
    pub fn record_users<'a>(&self, name: &str, users: impl IntoIterator<Item = &'a str>) -> bool {
        match self.nodes.get_mut(name) {
            Some(mut entry) => {
                entry.users.extend(users.into_iter().map(str::to_string));
                true
            }
            None => false,
        }
    }

    /// Drop users from a node's bookkeeping
    pub fn forget_users(&self, name: &str, users: &[String]) {
        if let Some(mut entry) = self.nodes.get_mut(name) {
            for user in users {
                entry.users.remove(user);
            }
        }
    }

    /// Names of the users on a node, sorted
    pub fn user_names(&self, name: &str) -> Option<Vec<String>> {
        self.nodes.get(name).map(|entry| {
            let mut users: Vec<String> = entry.users.iter().cloned().collect();
            users.sort();
            users
        })
    }

    pub fn node(&self, name: &str) -> Option<NodeInfo> {
        self.nodes.get(name).map(|entry| entry.info.clone())
    }

    /// Router tags of a node's block rules
    pub fn rule_tags(&self, name: &str) -> Option<Vec<String>> {
        self.nodes.get(name).map(|entry| entry.rule_tags.clone())
    }

    /// Names of all live nodes, sorted
    pub fn node_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.nodes.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::business::params::{CommonNodeParams, LimitOptions, ProtocolParams, TlsOptions};
    use crate::core::hooks::{Engine, OutboundHandler, OutboundManager};
    use crate::core::memory::MemoryEngine;
    use crate::core::objects::{EngineConfig, OutboundConfig};
    use crate::error::EngineResult;
    use serde_json::{json, Map};
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Outbound manager whose first removal fails
    struct FlakyOutbounds {
        inner: Arc<dyn OutboundManager>,
        failed: AtomicBool,
    }

    impl OutboundManager for FlakyOutbounds {
        fn add_handler(&self, handler: Arc<dyn OutboundHandler>) -> EngineResult<()> {
            self.inner.add_handler(handler)
        }

        fn remove_handler(&self, tag: &str) -> EngineResult<()> {
            if !self.failed.swap(true, Ordering::SeqCst) {
                return Err(EngineError::InvalidConfig("transient".to_string()));
            }
            self.inner.remove_handler(tag)
        }

        fn get_handler(&self, tag: &str) -> EngineResult<Arc<dyn OutboundHandler>> {
            self.inner.get_handler(tag)
        }
    }

    fn engine() -> Arc<MemoryEngine> {
        let engine = Arc::new(MemoryEngine::new(EngineConfig {
            outbounds: vec![OutboundConfig {
                tag: "block".to_string(),
                protocol: "blackhole".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        }));
        engine.start().unwrap();
        engine
    }

    fn manager(engine: &MemoryEngine) -> NodeManager {
        NodeManager::new(Features::from_engine(engine), LimiterRegistry::new())
    }

    fn trojan(name: &str, port: &str, rules: &[&str]) -> AddNodeParams {
        AddNodeParams {
            info: NodeInfo {
                name: name.to_string(),
                protocol: ProtocolParams::Trojan(CommonNodeParams {
                    host: String::new(),
                    port: port.to_string(),
                    proxy_protocol: false,
                }),
                limit: LimitOptions {
                    ip_limit: 2,
                    speed_limit: 0,
                },
                rules: rules.iter().map(|r| r.to_string()).collect(),
                other_options: Map::new(),
            },
            tls: TlsOptions {
                cert_path: "/c.pem".to_string(),
                key_path: "/k.pem".to_string(),
            },
        }
    }

    #[test]
    fn test_add_node_registers_everything() {
        let engine = engine();
        let nodes = manager(&engine);
        nodes
            .add_node(&trojan("n1", "443", &["domain:evil.com"]))
            .unwrap();

        assert!(nodes.contains("n1"));
        assert!(engine.inbounds().contains("n1"));
        assert!(engine.outbounds().contains("n1_out"));
        assert!(nodes.limiters().contains("n1"));
        assert_eq!(engine.memory_router().rule_tags(), vec!["block-0@n1"]);
        assert_eq!(nodes.rule_tags("n1").unwrap(), vec!["block-0@n1"]);

        let gate = nodes.limiters().get_limiter("n1").unwrap();
        assert!(gate.check_rule(&["evil.com"]));
        assert_eq!(gate.ip_limit(), 2);
    }

    #[test]
    fn test_round_trip_leaves_no_state() {
        let engine = engine();
        let nodes = manager(&engine);
        nodes
            .add_node(&trojan("n1", "443", &["domain:evil.com", "port:25"]))
            .unwrap();
        nodes.del_node("n1").unwrap();

        assert!(nodes.is_empty());
        assert!(nodes.limiters().is_empty());
        assert!(engine.memory_router().is_empty());
        assert!(!engine.inbounds().contains("n1"));
        assert_eq!(engine.outbounds().tags(), vec!["block"]);
    }

    #[test]
    fn test_duplicate_node_is_rejected() {
        let engine = engine();
        let nodes = manager(&engine);
        nodes.add_node(&trojan("n1", "443", &[])).unwrap();
        let err = nodes.add_node(&trojan("n1", "444", &[])).unwrap_err();
        assert!(matches!(err, CoreError::NodeExists(ref n) if n == "n1"));
        assert_eq!(nodes.node("n1").unwrap().protocol.common().port, "443");
    }

    #[test]
    fn test_validation_failure_leaves_no_state() {
        let engine = engine();
        let nodes = manager(&engine);
        let err = nodes.add_node(&trojan("n1", "0", &[])).unwrap_err();
        assert!(matches!(err, CoreError::InvalidPort(_)));

        let mut params = trojan("n1", "443", &[]);
        params.tls = TlsOptions::default();
        assert!(matches!(
            nodes.add_node(&params),
            Err(CoreError::MissingTls(_))
        ));

        let err = nodes.add_node(&trojan("n1", "443", &["regexp:("])).unwrap_err();
        assert!(matches!(err, CoreError::InvalidRule { .. }));

        assert!(nodes.is_empty());
        assert!(nodes.limiters().is_empty());
        assert!(!engine.inbounds().contains("n1"));
    }

    #[test]
    fn test_outbound_failure_rolls_back_inbound() {
        let engine = engine();
        let nodes = manager(&engine);
        // Occupy the tag the node's outbound will use
        let squatter = engine
            .handler_factory()
            .create_outbound(&OutboundConfig {
                tag: "n1_out".to_string(),
                protocol: "freedom".to_string(),
                ..Default::default()
            })
            .unwrap();
        engine.outbound_manager().add_handler(squatter).unwrap();

        let err = nodes.add_node(&trojan("n1", "443", &[])).unwrap_err();
        assert!(matches!(err, CoreError::Engine { .. }));
        assert!(!engine.inbounds().contains("n1"));
        assert!(nodes.limiters().is_empty());
        assert!(nodes.is_empty());
        // A retry succeeds once the tag is free
        engine.outbound_manager().remove_handler("n1_out").unwrap();
        nodes.add_node(&trojan("n1", "443", &[])).unwrap();
    }

    #[test]
    fn test_del_node_retry_after_outbound_failure() {
        let engine = engine();
        let mut features = Features::from_engine(engine.as_ref());
        features.outbounds = Arc::new(FlakyOutbounds {
            inner: engine.outbound_manager(),
            failed: AtomicBool::new(false),
        });
        let nodes = NodeManager::new(features, LimiterRegistry::new());
        nodes
            .add_node(&trojan("n1", "443", &["domain:evil.com"]))
            .unwrap();

        let err = nodes.del_node("n1").unwrap_err();
        assert!(matches!(err, CoreError::Engine { .. }));
        // Inbound is gone, the rest is still in place
        assert!(!engine.inbounds().contains("n1"));
        assert!(nodes.contains("n1"));
        assert!(nodes.limiters().contains("n1"));

        nodes.del_node("n1").unwrap();
        assert!(nodes.is_empty());
        assert!(nodes.limiters().is_empty());
        assert!(engine.memory_router().is_empty());
        assert_eq!(engine.outbounds().tags(), vec!["block"]);
        assert!(matches!(
            nodes.del_node("n1"),
            Err(CoreError::NodeNotFound(_))
        ));

        nodes.add_node(&trojan("n1", "443", &[])).unwrap();
        assert!(engine.outbounds().contains("n1_out"));
    }

    #[test]
    fn test_del_unknown_node() {
        let engine = engine();
        let nodes = manager(&engine);
        let err = nodes.del_node("ghost").unwrap_err();
        assert!(matches!(err, CoreError::NodeNotFound(ref n) if n == "ghost"));
    }

    #[test]
    fn test_two_nodes_same_rules() {
        let engine = engine();
        let nodes = manager(&engine);
        nodes.add_node(&trojan("n1", "443", &["domain:x.com"])).unwrap();
        nodes.add_node(&trojan("n2", "444", &["domain:x.com"])).unwrap();
        nodes.del_node("n1").unwrap();
        assert_eq!(engine.memory_router().rule_tags(), vec!["block-0@n2"]);
        assert_eq!(nodes.node_names(), vec!["n2"]);
    }

    #[test]
    fn test_bad_expand_options() {
        let engine = engine();
        let nodes = manager(&engine);
        let mut params = trojan("n1", "443", &[]);
        params.info.other_options = json!({ "SendIp": "nope" })
            .as_object()
            .cloned()
            .unwrap();
        assert!(matches!(
            nodes.add_node(&params),
            Err(CoreError::InvalidOptions(_))
        ));
        assert!(nodes.limiters().is_empty());
    }

    #[test]
    fn test_concurrent_same_name_adds() {
        let engine = engine();
        let nodes = Arc::new(manager(&engine));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let nodes = Arc::clone(&nodes);
                std::thread::spawn(move || {
                    nodes
                        .add_node(&trojan("n1", &format!("{}", 1000 + i), &[]))
                        .is_ok()
                })
            })
            .collect();
        let added = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(added, 1);
        assert_eq!(nodes.len(), 1);
        assert_eq!(engine.inbounds().len(), 1);
    }
}
