//! In-process engine
//!
//! Implements every engine capability with concurrent maps and inert handlers
//! (nothing listens on a socket). Used to validate manifests and in tests.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use super::hooks::{
    AccountManager, Counter, Engine, EngineLauncher, HandlerFactory, InboundHandler,
    InboundManager, OutboundHandler, OutboundManager, Router, StatsManager,
};
use super::objects::{EngineConfig, InboundConfig, OutboundConfig, ProtocolUser, RoutingRule};
use crate::error::{EngineError, EngineResult};
use crate::logger::log;

/// Inbound protocols that carry per-user accounts
const ACCOUNT_PROTOCOLS: [&str; 4] = ["vmess", "vless", "shadowsocks", "trojan"];

/// Inert inbound holding its configuration and accounts
#[derive(Debug)]
pub struct MemoryInbound {
    config: InboundConfig,
    accounts: DashMap<String, ProtocolUser>,
}

impl MemoryInbound {
    pub fn new(config: InboundConfig) -> Self {
        Self {
            config,
            accounts: DashMap::new(),
        }
    }

    pub fn config(&self) -> &InboundConfig {
        &self.config
    }

    pub fn user(&self, email: &str) -> Option<ProtocolUser> {
        self.accounts.get(email).map(|u| u.value().clone())
    }

    pub fn user_count(&self) -> usize {
        self.accounts.len()
    }
}

impl InboundHandler for MemoryInbound {
    fn tag(&self) -> &str {
        &self.config.tag
    }

    fn account_manager(&self) -> Option<&dyn AccountManager> {
        if ACCOUNT_PROTOCOLS.contains(&self.config.protocol.as_str()) {
            Some(self)
        } else {
            None
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl AccountManager for MemoryInbound {
    fn add_user(&self, user: ProtocolUser) -> EngineResult<()> {
        match self.accounts.entry(user.email.clone()) {
            Entry::Occupied(_) => Err(EngineError::DuplicateUser(user.email)),
            Entry::Vacant(slot) => {
                slot.insert(user);
                Ok(())
            }
        }
    }

    fn remove_user(&self, email: &str) -> EngineResult<()> {
        self.accounts
            .remove(email)
            .map(|_| ())
            .ok_or_else(|| EngineError::UserNotFound(email.to_string()))
    }
}

/// Inert outbound holding its configuration
#[derive(Debug)]
pub struct MemoryOutbound {
    config: OutboundConfig,
}

impl MemoryOutbound {
    pub fn config(&self) -> &OutboundConfig {
        &self.config
    }
}

impl OutboundHandler for MemoryOutbound {
    fn tag(&self) -> &str {
        &self.config.tag
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Tag-keyed handler registry shared by the inbound and outbound managers
pub struct HandlerRegistry<H: ?Sized> {
    handlers: DashMap<String, Arc<H>>,
}

impl<H: ?Sized> Default for HandlerRegistry<H> {
    fn default() -> Self {
        Self {
            handlers: DashMap::new(),
        }
    }
}

impl<H: ?Sized> HandlerRegistry<H> {
    fn insert(&self, tag: &str, handler: Arc<H>) -> EngineResult<()> {
        match self.handlers.entry(tag.to_string()) {
            Entry::Occupied(_) => Err(EngineError::DuplicateTag(tag.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(handler);
                Ok(())
            }
        }
    }

    fn remove(&self, tag: &str) -> EngineResult<()> {
        self.handlers
            .remove(tag)
            .map(|_| ())
            .ok_or_else(|| EngineError::TagNotFound(tag.to_string()))
    }

    fn get(&self, tag: &str) -> EngineResult<Arc<H>> {
        self.handlers
            .get(tag)
            .map(|h| Arc::clone(h.value()))
            .ok_or_else(|| EngineError::TagNotFound(tag.to_string()))
    }

    /// Check if a tag is registered
    pub fn contains(&self, tag: &str) -> bool {
        self.handlers.contains_key(tag)
    }

    /// Get the number of registered handlers
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// List all registered tags, sorted
    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.handlers.iter().map(|e| e.key().clone()).collect();
        tags.sort();
        tags
    }

    fn clear(&self) {
        self.handlers.clear();
    }
}

impl InboundManager for HandlerRegistry<dyn InboundHandler> {
    fn add_handler(&self, handler: Arc<dyn InboundHandler>) -> EngineResult<()> {
        let tag = handler.tag().to_string();
        self.insert(&tag, handler)
    }

    fn remove_handler(&self, tag: &str) -> EngineResult<()> {
        self.remove(tag)
    }

    fn get_handler(&self, tag: &str) -> EngineResult<Arc<dyn InboundHandler>> {
        self.get(tag)
    }
}

impl OutboundManager for HandlerRegistry<dyn OutboundHandler> {
    fn add_handler(&self, handler: Arc<dyn OutboundHandler>) -> EngineResult<()> {
        let tag = handler.tag().to_string();
        self.insert(&tag, handler)
    }

    fn remove_handler(&self, tag: &str) -> EngineResult<()> {
        self.remove(tag)
    }

    fn get_handler(&self, tag: &str) -> EngineResult<Arc<dyn OutboundHandler>> {
        self.get(tag)
    }
}

/// Rule-tag keyed router
#[derive(Debug, Default)]
pub struct MemoryRouter {
    rules: DashMap<String, RoutingRule>,
}

impl MemoryRouter {
    pub fn rule(&self, tag: &str) -> Option<RoutingRule> {
        self.rules.get(tag).map(|r| r.value().clone())
    }

    /// List all rule tags, sorted
    pub fn rule_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.rules.iter().map(|e| e.key().clone()).collect();
        tags.sort();
        tags
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Router for MemoryRouter {
    fn add_rule(&self, rule: RoutingRule) -> EngineResult<()> {
        match self.rules.entry(rule.rule_tag.clone()) {
            Entry::Occupied(_) => Err(EngineError::DuplicateTag(rule.rule_tag)),
            Entry::Vacant(slot) => {
                slot.insert(rule);
                Ok(())
            }
        }
    }

    fn remove_rule(&self, tag: &str) -> EngineResult<()> {
        self.rules
            .remove(tag)
            .map(|_| ())
            .ok_or_else(|| EngineError::TagNotFound(tag.to_string()))
    }
}

/// Atomic counter
#[derive(Debug, Default)]
pub struct MemoryCounter {
    value: AtomicI64,
}

impl Counter for MemoryCounter {
    fn value(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    fn set(&self, value: i64) -> i64 {
        self.value.swap(value, Ordering::AcqRel)
    }

    fn add(&self, delta: i64) -> i64 {
        self.value.fetch_add(delta, Ordering::AcqRel) + delta
    }
}

/// Name-keyed counter registry
#[derive(Debug, Default)]
pub struct MemoryStatsManager {
    counters: DashMap<String, Arc<MemoryCounter>>,
}

impl MemoryStatsManager {
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

impl StatsManager for MemoryStatsManager {
    fn get_counter(&self, name: &str) -> Option<Arc<dyn Counter>> {
        self.counters
            .get(name)
            .map(|c| Arc::clone(c.value()) as Arc<dyn Counter>)
    }

    fn register_counter(&self, name: &str) -> Arc<dyn Counter> {
        let counter: Arc<MemoryCounter> =
            Arc::clone(self.counters.entry(name.to_string()).or_default().value());
        counter
    }

    fn unregister_counter(&self, name: &str) {
        self.counters.remove(name);
    }
}

/// Builds inert handlers, rejecting objects a real engine could not build
#[derive(Debug, Default)]
pub struct MemoryHandlerFactory;

impl HandlerFactory for MemoryHandlerFactory {
    fn create_inbound(&self, config: &InboundConfig) -> EngineResult<Arc<dyn InboundHandler>> {
        if config.protocol.is_empty() {
            return Err(EngineError::InvalidConfig(format!(
                "inbound {} has no protocol",
                config.tag
            )));
        }
        if config.port == 0 {
            return Err(EngineError::InvalidConfig(format!(
                "inbound {} has no port",
                config.tag
            )));
        }
        Ok(Arc::new(MemoryInbound::new(config.clone())))
    }

    fn create_outbound(&self, config: &OutboundConfig) -> EngineResult<Arc<dyn OutboundHandler>> {
        if config.protocol.is_empty() {
            return Err(EngineError::InvalidConfig(format!(
                "outbound {} has no protocol",
                config.tag
            )));
        }
        Ok(Arc::new(MemoryOutbound {
            config: config.clone(),
        }))
    }
}

/// The in-process engine
pub struct MemoryEngine {
    config: EngineConfig,
    running: AtomicBool,
    inbounds: Arc<HandlerRegistry<dyn InboundHandler>>,
    outbounds: Arc<HandlerRegistry<dyn OutboundHandler>>,
    router: Arc<MemoryRouter>,
    stats: Arc<MemoryStatsManager>,
    factory: Arc<MemoryHandlerFactory>,
}

impl MemoryEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            running: AtomicBool::new(false),
            inbounds: Arc::new(HandlerRegistry::default()),
            outbounds: Arc::new(HandlerRegistry::default()),
            router: Arc::new(MemoryRouter::default()),
            stats: Arc::new(MemoryStatsManager::default()),
            factory: Arc::new(MemoryHandlerFactory),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn inbounds(&self) -> &HandlerRegistry<dyn InboundHandler> {
        &self.inbounds
    }

    pub fn outbounds(&self) -> &HandlerRegistry<dyn OutboundHandler> {
        &self.outbounds
    }

    pub fn memory_router(&self) -> &MemoryRouter {
        &self.router
    }

    pub fn memory_stats(&self) -> &MemoryStatsManager {
        &self.stats
    }

    pub fn inbound(&self, tag: &str) -> Option<Arc<dyn InboundHandler>> {
        self.inbounds.get(tag).ok()
    }

    /// Snapshot of one account on a registered inbound
    pub fn inbound_user(&self, tag: &str, email: &str) -> Option<ProtocolUser> {
        let handler = self.inbounds.get(tag).ok()?;
        handler
            .as_any()
            .downcast_ref::<MemoryInbound>()
            .and_then(|i| i.user(email))
    }

    /// Number of accounts on a registered inbound
    pub fn inbound_user_count(&self, tag: &str) -> usize {
        self.inbounds
            .get(tag)
            .ok()
            .and_then(|h| {
                h.as_any()
                    .downcast_ref::<MemoryInbound>()
                    .map(MemoryInbound::user_count)
            })
            .unwrap_or(0)
    }

    /// Configuration objects of every registered inbound, sorted by tag
    pub fn inbound_configs(&self) -> Vec<InboundConfig> {
        self.inbounds
            .tags()
            .iter()
            .filter_map(|tag| self.inbounds.get(tag).ok())
            .filter_map(|h| {
                h.as_any()
                    .downcast_ref::<MemoryInbound>()
                    .map(|i| i.config().clone())
            })
            .collect()
    }

    /// Configuration objects of every registered outbound, sorted by tag
    pub fn outbound_configs(&self) -> Vec<OutboundConfig> {
        self.outbounds
            .tags()
            .iter()
            .filter_map(|tag| self.outbounds.get(tag).ok())
            .filter_map(|h| {
                h.as_any()
                    .downcast_ref::<MemoryOutbound>()
                    .map(|o| o.config().clone())
            })
            .collect()
    }

    /// Register the handlers declared in the engine config
    fn register_static_handlers(&self) -> EngineResult<()> {
        for inbound in &self.config.inbounds {
            let handler = self.factory.create_inbound(inbound)?;
            self.inbounds.add_handler(handler)?;
        }
        for outbound in &self.config.outbounds {
            let handler = self.factory.create_outbound(outbound)?;
            self.outbounds.add_handler(handler)?;
        }
        Ok(())
    }

    /// Every installed routing rule, sorted by tag
    pub fn rules(&self) -> Vec<RoutingRule> {
        self.router
            .rule_tags()
            .iter()
            .filter_map(|tag| self.router.rule(tag))
            .collect()
    }
}

impl Engine for MemoryEngine {
    fn start(&self) -> EngineResult<()> {
        if self.is_running() {
            return Ok(());
        }
        if let Err(e) = self.register_static_handlers() {
            self.inbounds.clear();
            self.outbounds.clear();
            return Err(e);
        }
        self.running.store(true, Ordering::Release);
        log::debug!(
            inbounds = self.inbounds.len(),
            outbounds = self.outbounds.len(),
            "Memory engine started"
        );
        Ok(())
    }

    fn close(&self) -> EngineResult<()> {
        if !self.running.swap(false, Ordering::AcqRel) {
            return Err(EngineError::Closed);
        }
        self.inbounds.clear();
        self.outbounds.clear();
        self.router.rules.clear();
        self.stats.counters.clear();
        Ok(())
    }

    fn inbound_manager(&self) -> Arc<dyn InboundManager> {
        Arc::clone(&self.inbounds) as Arc<dyn InboundManager>
    }

    fn outbound_manager(&self) -> Arc<dyn OutboundManager> {
        Arc::clone(&self.outbounds) as Arc<dyn OutboundManager>
    }

    fn router(&self) -> Arc<dyn Router> {
        Arc::clone(&self.router) as Arc<dyn Router>
    }

    fn stats_manager(&self) -> Arc<dyn StatsManager> {
        Arc::clone(&self.stats) as Arc<dyn StatsManager>
    }

    fn handler_factory(&self) -> Arc<dyn HandlerFactory> {
        Arc::clone(&self.factory) as Arc<dyn HandlerFactory>
    }
}

/// Launches [`MemoryEngine`]s and keeps a handle on the latest one
#[derive(Default)]
pub struct MemoryLauncher {
    last: Mutex<Option<Arc<MemoryEngine>>>,
}

impl MemoryLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recently launched engine
    pub fn engine(&self) -> Option<Arc<MemoryEngine>> {
        self.last.lock().clone()
    }
}

impl EngineLauncher for MemoryLauncher {
    fn launch(&self, config: EngineConfig) -> EngineResult<Arc<dyn Engine>> {
        let engine = Arc::new(MemoryEngine::new(config));
        *self.last.lock() = Some(Arc::clone(&engine));
        Ok(engine)
    }
}
