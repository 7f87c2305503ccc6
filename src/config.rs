//! Configuration module
//!
//! This module handles CLI argument parsing with environment variable support,
//! the engine-wide core config and the per-node expand options. JSON sections
//! may be given inline or as a path to a JSON file.

use anyhow::{anyhow, Result};
use clap::Parser;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use crate::business::{AddNodeParams, ProtocolKind, UserInfo};
use crate::core::objects::{EngineConfig, InboundConfig, OutboundConfig};
use crate::error::CoreError;
use crate::logger::LogLevel;
use crate::utils::non_empty;

/// Tag of the blackhole outbound block rules route to
pub const BLOCK_OUTBOUND_TAG: &str = "block";

/// Default data directory
const DEFAULT_DATA_DIR: &str = ".";

/// CLI arguments
///
/// Supports environment variables with TENANT_CORE_ prefix
#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about = "Multi-tenant proxy control core (manifest dry run)"
)]
#[command(rename_all = "snake_case")]
pub struct CliArgs {
    /// Core config file (JSON)
    #[arg(long, env = "TENANT_CORE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Data directory; the core config's AssetPath is resolved against it
    #[arg(long = "data_dir", env = "TENANT_CORE_DATA_DIR", default_value = DEFAULT_DATA_DIR)]
    pub data_dir: PathBuf,

    /// Node manifest file (JSON) replayed after start
    #[arg(long, env = "TENANT_CORE_NODES")]
    pub nodes: Option<PathBuf>,

    /// Log mode: trace, debug, info, warn, error, off
    /// (default: the core config's Log.loglevel, then info)
    #[arg(long = "log_mode", env = "TENANT_CORE_LOG_MODE")]
    pub log_mode: Option<String>,

    /// Print the built inbound/outbound objects as JSON
    #[arg(long, env = "TENANT_CORE_DUMP", default_value_t = false)]
    pub dump: bool,
}

impl CliArgs {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the CLI arguments
    pub fn validate(&self) -> Result<()> {
        if let Some(ref path) = self.config {
            if !path.exists() {
                return Err(anyhow!("Core config file not found: {}", path.display()));
            }
        }
        if let Some(ref path) = self.nodes {
            if !path.exists() {
                return Err(anyhow!("Node manifest not found: {}", path.display()));
            }
        }
        if let Some(ref mode) = self.log_mode {
            if LogLevel::from_str(mode).is_none() {
                return Err(anyhow!("Invalid log mode: {}", mode));
            }
        }
        if !self.data_dir.is_dir() {
            return Err(anyhow!(
                "Data directory not found: {}",
                self.data_dir.display()
            ));
        }
        Ok(())
    }
}

// ========== AutoLoad ==========

/// A JSON value that is loaded from a file when given as a string
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct AutoLoad(pub Value);

impl AutoLoad {
    /// Resolve a raw value: a string is a path to a JSON file
    pub fn resolve(value: Value) -> std::result::Result<Value, CoreError> {
        match value {
            Value::String(path) => {
                let data = fs::read(&path).map_err(|e| {
                    CoreError::Config(format!("failed to load {}: {}", path, e))
                })?;
                Ok(serde_json::from_slice(&data)?)
            }
            other => Ok(other),
        }
    }

    pub fn into_inner(self) -> Value {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        match &self.0 {
            Value::Null => true,
            Value::Object(m) => m.is_empty(),
            Value::Array(a) => a.is_empty(),
            _ => false,
        }
    }
}

impl<'de> Deserialize<'de> for AutoLoad {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        AutoLoad::resolve(value)
            .map(AutoLoad)
            .map_err(serde::de::Error::custom)
    }
}

// ========== Core config ==========

/// Engine-wide configuration handed to `Controller::start`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CoreConfig {
    pub asset_path: String,
    pub log: AutoLoad,
    pub dns: AutoLoad,
    pub inbound: AutoLoad,
    pub outbound: AutoLoad,
    pub route: AutoLoad,
    pub policy: AutoLoad,
}

impl CoreConfig {
    pub fn from_slice(raw: &[u8]) -> std::result::Result<Self, CoreError> {
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        Ok(serde_json::from_slice(raw)?)
    }

    /// Log level from the `Log.loglevel` section
    pub fn log_level(&self) -> Option<LogLevel> {
        self.log
            .0
            .get("loglevel")
            .and_then(Value::as_str)
            .and_then(LogLevel::from_str)
    }

    /// Build the engine configuration
    ///
    /// A blackhole outbound tagged `block` is added when none is declared.
    pub fn engine_config(&self, data_dir: &Path) -> std::result::Result<EngineConfig, CoreError> {
        let inbounds: Vec<InboundConfig> = if self.inbound.is_empty() {
            Vec::new()
        } else {
            serde_json::from_value(self.inbound.0.clone())
                .map_err(|e| CoreError::Config(format!("decode inbound config error: {}", e)))?
        };
        let mut outbounds: Vec<OutboundConfig> = if self.outbound.is_empty() {
            Vec::new()
        } else {
            serde_json::from_value(self.outbound.0.clone())
                .map_err(|e| CoreError::Config(format!("decode outbound config error: {}", e)))?
        };
        if !outbounds.iter().any(|o| o.tag == BLOCK_OUTBOUND_TAG) {
            outbounds.push(OutboundConfig {
                tag: BLOCK_OUTBOUND_TAG.to_string(),
                protocol: "blackhole".to_string(),
                ..Default::default()
            });
        }
        let policy = if self.policy.is_empty() {
            Value::Null
        } else {
            json!({ "levels": { "0": self.policy.0 } })
        };
        Ok(EngineConfig {
            asset_dir: data_dir.join(&self.asset_path),
            log: self.log.0.clone(),
            dns: self.dns.0.clone(),
            route: self.route.0.clone(),
            policy,
            inbounds,
            outbounds,
        })
    }
}

// ========== Node expand options ==========

/// Host-specific node options carried in `NodeInfo::other_options`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExpandNodeOptions {
    /// Source address of the node's egress
    #[serde(rename = "SendIp")]
    pub send_ip: Option<String>,
    /// Listen address of the node's inbound
    #[serde(rename = "ListenIp")]
    pub listen_ip: Option<String>,
    /// Inbound object the node's settings are layered onto
    #[serde(rename = "RawInbound")]
    pub raw_inbound: Option<AutoLoad>,
    /// Outbound object replacing the default freedom outbound
    #[serde(rename = "RawOutbound")]
    pub raw_outbound: Option<AutoLoad>,
}

impl ExpandNodeOptions {
    pub fn from_options(options: &Map<String, Value>) -> std::result::Result<Self, CoreError> {
        serde_json::from_value(Value::Object(options.clone()))
            .map_err(|e| CoreError::InvalidOptions(format!("unmarshal expand node options failed: {}", e)))
    }

    pub fn send_ip(&self) -> std::result::Result<Option<IpAddr>, CoreError> {
        parse_ip("SendIp", self.send_ip.as_deref())
    }

    pub fn listen_ip(&self) -> std::result::Result<Option<IpAddr>, CoreError> {
        parse_ip("ListenIp", self.listen_ip.as_deref())
    }
}

fn parse_ip(field: &str, value: Option<&str>) -> std::result::Result<Option<IpAddr>, CoreError> {
    non_empty(value)
        .map(|ip| {
            ip.parse::<IpAddr>()
                .map_err(|_| CoreError::InvalidOptions(format!("{} is not an IP address: {}", field, ip)))
        })
        .transpose()
}

// ========== Node manifest ==========

/// A node and its users, as listed in a manifest
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestNode {
    #[serde(flatten)]
    pub params: AddNodeParams,
    #[serde(default)]
    pub users: Vec<UserInfo>,
}

/// A list of nodes to replay into a started core
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeManifest {
    #[serde(default)]
    pub nodes: Vec<ManifestNode>,
}

impl NodeManifest {
    pub fn from_slice(raw: &[u8]) -> std::result::Result<Self, CoreError> {
        let value: Value = serde_json::from_slice(raw)?;
        // Name the offending protocol instead of serde's variant list
        if let Some(nodes) = value.get("nodes").and_then(Value::as_array) {
            for node in nodes {
                if let Some(kind) = node.pointer("/protocol/type").and_then(Value::as_str) {
                    kind.parse::<ProtocolKind>()?;
                }
            }
        }
        Ok(serde_json::from_value(value)?)
    }

    pub fn load(path: &Path) -> std::result::Result<Self, CoreError> {
        Self::from_slice(&fs::read(path)?)
    }

    pub fn user_count(&self) -> usize {
        self.nodes.iter().map(|n| n.users.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn create_test_cli_args() -> CliArgs {
        CliArgs {
            config: None,
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            nodes: None,
            log_mode: None,
            dump: false,
        }
    }

    fn write_temp(dir: &tempfile::TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    // ========== CliArgs tests ==========

    #[test]
    fn test_validate_defaults() {
        assert!(create_test_cli_args().validate().is_ok());
    }

    #[test]
    fn test_validate_missing_config_file() {
        let mut args = create_test_cli_args();
        args.config = Some(PathBuf::from("/nonexistent/core.json"));
        let result = args.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("not found"));
    }

    #[test]
    fn test_validate_invalid_log_mode() {
        let mut args = create_test_cli_args();
        args.log_mode = Some("verbose".to_string());
        assert!(args.validate().is_err());
        args.log_mode = Some("warning".to_string());
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_validate_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = create_test_cli_args();
        args.config = Some(write_temp(&dir, "core.json", "{}"));
        args.nodes = Some(write_temp(&dir, "nodes.json", "{}"));
        args.data_dir = dir.path().to_path_buf();
        assert!(args.validate().is_ok());
    }

    // ========== AutoLoad tests ==========

    #[test]
    fn test_auto_load_inline() {
        let value: AutoLoad = serde_json::from_str(r#"{"loglevel":"debug"}"#).unwrap();
        assert_eq!(value.0, json!({ "loglevel": "debug" }));
    }

    #[test]
    fn test_auto_load_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_temp(&dir, "log.json", r#"{"loglevel":"warning"}"#);
        let raw = serde_json::to_string(&path.to_string_lossy()).unwrap();
        let value: AutoLoad = serde_json::from_str(&raw).unwrap();
        assert_eq!(value.0, json!({ "loglevel": "warning" }));
    }

    #[test]
    fn test_auto_load_missing_path() {
        let result: std::result::Result<AutoLoad, _> =
            serde_json::from_str(r#""/nonexistent/section.json""#);
        assert!(result.is_err());
    }

    // ========== CoreConfig tests ==========

    #[test]
    fn test_core_config_adds_block_outbound() {
        let config = CoreConfig::from_slice(br#"{"AssetPath":"geo"}"#).unwrap();
        let engine = config.engine_config(Path::new("/data")).unwrap();
        assert_eq!(engine.asset_dir, PathBuf::from("/data/geo"));
        assert_eq!(engine.outbounds.len(), 1);
        assert_eq!(engine.outbounds[0].tag, BLOCK_OUTBOUND_TAG);
        assert_eq!(engine.outbounds[0].protocol, "blackhole");
    }

    #[test]
    fn test_core_config_keeps_declared_block_outbound() {
        let raw = br#"{"Outbound":[{"tag":"block","protocol":"blackhole"},{"tag":"direct","protocol":"freedom"}]}"#;
        let engine = CoreConfig::from_slice(raw)
            .unwrap()
            .engine_config(Path::new("."))
            .unwrap();
        assert_eq!(engine.outbounds.len(), 2);
    }

    #[test]
    fn test_core_config_decodes_inbounds() {
        let raw = br#"{"Inbound":[{"tag":"api","protocol":"dokodemo-door","port":10085}]}"#;
        let engine = CoreConfig::from_slice(raw)
            .unwrap()
            .engine_config(Path::new("."))
            .unwrap();
        assert_eq!(engine.inbounds.len(), 1);
        assert_eq!(engine.inbounds[0].port, 10085);
    }

    #[test]
    fn test_core_config_empty_input() {
        let config = CoreConfig::from_slice(b"  ").unwrap();
        assert!(config.log.is_empty());
        assert_eq!(config.log_level(), None);
    }

    #[test]
    fn test_core_config_log_level() {
        let config = CoreConfig::from_slice(br#"{"Log":{"loglevel":"none"}}"#).unwrap();
        assert_eq!(config.log_level(), Some(LogLevel::Off));
    }

    #[test]
    fn test_core_config_policy_is_level_zero() {
        let config = CoreConfig::from_slice(br#"{"Policy":{"handshake":4}}"#).unwrap();
        let engine = config.engine_config(Path::new(".")).unwrap();
        assert_eq!(engine.policy, json!({ "levels": { "0": { "handshake": 4 } } }));
    }

    // ========== ExpandNodeOptions tests ==========

    #[test]
    fn test_expand_options_decode() {
        let options = json!({
            "SendIp": "10.0.0.1",
            "ListenIp": "",
            "RawOutbound": { "protocol": "freedom", "settings": { "domainStrategy": "UseIP" } },
            "Unrelated": 1
        });
        let options = ExpandNodeOptions::from_options(options.as_object().unwrap()).unwrap();
        assert_eq!(options.send_ip().unwrap(), Some("10.0.0.1".parse().unwrap()));
        assert_eq!(options.listen_ip().unwrap(), None);
        assert!(options.raw_outbound.is_some());
        assert!(options.raw_inbound.is_none());
    }

    #[test]
    fn test_expand_options_bad_ip() {
        let options = json!({ "SendIp": "not-an-ip" });
        let options = ExpandNodeOptions::from_options(options.as_object().unwrap()).unwrap();
        assert!(matches!(options.send_ip(), Err(CoreError::InvalidOptions(_))));
    }

    #[test]
    fn test_expand_options_wrong_type() {
        let options = json!({ "SendIp": 42 });
        let err = ExpandNodeOptions::from_options(options.as_object().unwrap()).unwrap_err();
        assert!(matches!(err, CoreError::InvalidOptions(_)));
    }

    // ========== NodeManifest tests ==========

    #[test]
    fn test_manifest_decode() {
        let raw = br#"{
            "nodes": [{
                "name": "n1",
                "protocol": { "type": "trojan", "port": "443" },
                "tls": { "cert_path": "/c", "key_path": "/k" },
                "users": [{ "id": 1, "name": "alice", "key": "pw" }]
            }]
        }"#;
        let manifest = NodeManifest::from_slice(raw).unwrap();
        assert_eq!(manifest.nodes.len(), 1);
        assert_eq!(manifest.nodes[0].params.info.name, "n1");
        assert_eq!(manifest.user_count(), 1);
    }

    #[test]
    fn test_manifest_unsupported_protocol() {
        let raw = br#"{"nodes":[{"name":"n1","protocol":{"type":"hysteria","port":"443"}}]}"#;
        let err = NodeManifest::from_slice(raw).unwrap_err();
        assert!(matches!(err, CoreError::UnsupportedProtocol(ref p) if p == "hysteria"));
    }
}
