//! Declarative objects handed to the proxy engine
//!
//! These mirror the engine's JSON configuration shape (camelCase keys), so a
//! raw inbound/outbound override can be decoded straight into them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;

/// Transport network of an inbound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Tcp,
    #[serde(alias = "websocket")]
    Ws,
    Grpc,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Tcp => "tcp",
            Network::Ws => "ws",
            Network::Grpc => "grpc",
        }
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "" | "tcp" => Ok(Network::Tcp),
            "ws" | "websocket" => Ok(Network::Ws),
            "grpc" => Ok(Network::Grpc),
            other => Err(format!("the network type is not valid: {}", other)),
        }
    }
}

/// Inbound handler configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InboundConfig {
    pub tag: String,
    pub protocol: String,
    pub listen: Option<IpAddr>,
    pub port: u16,
    pub settings: Option<Value>,
    pub stream_settings: StreamSettings,
    pub sniffing: Option<SniffingConfig>,
}

/// Stream (transport + security) settings of an inbound
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamSettings {
    pub network: Network,
    pub security: Option<String>,
    pub tls_settings: Option<TlsSettings>,
    pub tcp_settings: Option<TransportSettings>,
    pub ws_settings: Option<TransportSettings>,
    pub grpc_settings: Option<TransportSettings>,
    pub sockopt: Option<SocketSettings>,
}

/// Per-transport settings; only the proxy-protocol flag is interpreted here,
/// everything else is carried through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportSettings {
    #[serde(default)]
    pub accept_proxy_protocol: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Socket options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SocketSettings {
    pub accept_proxy_protocol: bool,
    pub tcp_fast_open: bool,
}

/// TLS settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TlsSettings {
    pub server_name: Option<String>,
    pub certificates: Vec<TlsCertificate>,
}

/// A certificate/key pair on disk
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TlsCertificate {
    pub certificate_file: String,
    pub key_file: String,
    pub ocsp_stapling: u64,
}

/// Content sniffing settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SniffingConfig {
    pub enabled: bool,
    pub dest_override: Vec<String>,
}

/// Outbound handler configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OutboundConfig {
    pub tag: String,
    pub protocol: String,
    pub send_through: Option<IpAddr>,
    pub settings: Option<Value>,
}

/// Routing rule sending matched traffic to an outbound
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoutingRule {
    pub rule_tag: String,
    pub outbound_tag: String,
    pub inbound_tag: Vec<String>,
    pub domain: Vec<String>,
    pub port: Option<String>,
}

/// Shadowsocks cipher understood by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CipherType {
    Aes128Gcm,
    Aes256Gcm,
    Chacha20Poly1305,
    None,
    Unknown,
}

/// Protocol-specific account carried by a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Account {
    VMess { id: String, security: String },
    VLess { id: String, flow: String },
    Shadowsocks { password: String, cipher: CipherType },
    Shadowsocks2022 { key: String },
    Trojan { password: String },
}

/// A user identity as registered on an inbound
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolUser {
    pub email: String,
    pub level: u32,
    pub account: Account,
}

/// Everything an engine needs to come up
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Directory holding geo assets
    pub asset_dir: PathBuf,
    pub log: Value,
    pub dns: Value,
    pub route: Value,
    pub policy: Value,
    /// Static inbounds declared in the core config
    pub inbounds: Vec<InboundConfig>,
    /// Static outbounds declared in the core config
    pub outbounds: Vec<OutboundConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_network_from_str() {
        assert_eq!("".parse::<Network>().unwrap(), Network::Tcp);
        assert_eq!("WS".parse::<Network>().unwrap(), Network::Ws);
        assert_eq!("websocket".parse::<Network>().unwrap(), Network::Ws);
        assert_eq!("grpc".parse::<Network>().unwrap(), Network::Grpc);
        assert!("quic".parse::<Network>().is_err());
    }

    #[test]
    fn test_inbound_config_from_raw_json() {
        let raw = json!({
            "protocol": "vless",
            "streamSettings": {
                "network": "ws",
                "wsSettings": { "path": "/ray", "acceptProxyProtocol": true }
            },
            "sniffing": { "enabled": false }
        });
        let inbound: InboundConfig = serde_json::from_value(raw).unwrap();
        assert_eq!(inbound.protocol, "vless");
        assert_eq!(inbound.stream_settings.network, Network::Ws);
        let ws = inbound.stream_settings.ws_settings.unwrap();
        assert!(ws.accept_proxy_protocol);
        assert_eq!(ws.extra.get("path"), Some(&json!("/ray")));
        assert!(!inbound.sniffing.unwrap().enabled);
    }

    #[test]
    fn test_transport_settings_keep_unknown_keys() {
        let settings = TransportSettings {
            accept_proxy_protocol: true,
            extra: serde_json::from_value(json!({ "serviceName": "tun" })).unwrap(),
        };
        let value = serde_json::to_value(&settings).unwrap();
        assert_eq!(value, json!({ "acceptProxyProtocol": true, "serviceName": "tun" }));
    }

    #[test]
    fn test_account_serializes_tagged() {
        let account = Account::Trojan {
            password: "secret".to_string(),
        };
        let value = serde_json::to_value(&account).unwrap();
        assert_eq!(value, json!({ "type": "trojan", "password": "secret" }));
    }
}
