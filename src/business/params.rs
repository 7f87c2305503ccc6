//! Tenant-level parameters
//!
//! What a host hands to the core when it adds a node or users, before any
//! translation into engine objects.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Supported node protocol kinds, in the order they are advertised
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolKind {
    VMess,
    VLess,
    Shadowsocks,
    Trojan,
}

impl ProtocolKind {
    pub const ALL: [ProtocolKind; 4] = [
        ProtocolKind::VMess,
        ProtocolKind::VLess,
        ProtocolKind::Shadowsocks,
        ProtocolKind::Trojan,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolKind::VMess => "vmess",
            ProtocolKind::VLess => "vless",
            ProtocolKind::Shadowsocks => "shadowsocks",
            ProtocolKind::Trojan => "trojan",
        }
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtocolKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProtocolKind::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| CoreError::UnsupportedProtocol(s.to_string()))
    }
}

/// Parameters shared by every protocol
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommonNodeParams {
    #[serde(default)]
    pub host: String,
    /// Listen port as declared by the panel; validated when the node is built
    pub port: String,
    #[serde(default)]
    pub proxy_protocol: bool,
}

/// VMess parameters, also the base of VLess
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct V2rayNodeParams {
    #[serde(flatten)]
    pub common: CommonNodeParams,
    /// 1 enables TLS
    #[serde(default)]
    pub tls_type: u8,
    #[serde(default)]
    pub network: String,
    #[serde(default)]
    pub network_settings: Option<Value>,
    #[serde(default)]
    pub server_name: String,
}

impl V2rayNodeParams {
    pub fn tls_enabled(&self) -> bool {
        self.tls_type == 1
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VLessNodeParams {
    #[serde(flatten)]
    pub v2ray: V2rayNodeParams,
    #[serde(default)]
    pub flow: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShadowsocksNodeParams {
    #[serde(flatten)]
    pub common: CommonNodeParams,
    pub cipher: String,
    /// Pre-shared server key; set for Shadowsocks 2022 ciphers
    #[serde(default)]
    pub server_key: String,
}

/// Protocol of a node and its protocol-specific parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProtocolParams {
    VMess(V2rayNodeParams),
    VLess(VLessNodeParams),
    Shadowsocks(ShadowsocksNodeParams),
    Trojan(CommonNodeParams),
}

impl ProtocolParams {
    pub fn kind(&self) -> ProtocolKind {
        match self {
            ProtocolParams::VMess(_) => ProtocolKind::VMess,
            ProtocolParams::VLess(_) => ProtocolKind::VLess,
            ProtocolParams::Shadowsocks(_) => ProtocolKind::Shadowsocks,
            ProtocolParams::Trojan(_) => ProtocolKind::Trojan,
        }
    }

    pub fn common(&self) -> &CommonNodeParams {
        match self {
            ProtocolParams::VMess(p) => &p.common,
            ProtocolParams::VLess(p) => &p.v2ray.common,
            ProtocolParams::Shadowsocks(p) => &p.common,
            ProtocolParams::Trojan(p) => p,
        }
    }
}

/// Node-wide limits; 0 disables a limit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitOptions {
    #[serde(default)]
    pub ip_limit: usize,
    /// Bytes per second
    #[serde(default)]
    pub speed_limit: u64,
}

/// Everything known about a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,
    pub protocol: ProtocolParams,
    #[serde(default)]
    pub limit: LimitOptions,
    /// Block-rule expressions
    #[serde(default)]
    pub rules: Vec<String>,
    /// Host-specific options, see `ExpandNodeOptions`
    #[serde(default)]
    pub other_options: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsOptions {
    #[serde(default)]
    pub cert_path: String,
    #[serde(default)]
    pub key_path: String,
}

/// A node to add
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddNodeParams {
    #[serde(flatten)]
    pub info: NodeInfo,
    #[serde(default)]
    pub tls: TlsOptions,
}

/// A user to attach to a node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    /// UUID, password or key depending on the node protocol
    pub key: String,
}

/// Traffic counted for a user
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserTraffic {
    pub up: i64,
    pub down: i64,
}
