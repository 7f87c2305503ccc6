//! Protocol adapters
//!
//! Pure translation of a node's declared protocol and transport into the
//! engine's inbound/outbound objects.

use serde_json::{json, Value};

use super::params::{NodeInfo, ProtocolParams, TlsOptions, V2rayNodeParams};
use crate::config::ExpandNodeOptions;
use crate::core::objects::{
    InboundConfig, Network, OutboundConfig, SniffingConfig, SocketSettings, TlsCertificate,
    TransportSettings,
};
use crate::error::{CoreError, Result};

/// OCSP stapling interval of node certificates, in seconds
const OCSP_STAPLING_SECS: u64 = 3600;

/// Outbound protocol used when no raw outbound is given
const DEFAULT_OUTBOUND_PROTOCOL: &str = "freedom";

/// Parse a declared port; 0 and garbage are both invalid
pub fn parse_port(port: &str) -> Result<u16> {
    match port.trim().parse::<u16>() {
        Ok(p) if p != 0 => Ok(p),
        _ => Err(CoreError::InvalidPort(port.to_string())),
    }
}

fn is_unset(settings: &Option<Value>) -> bool {
    match settings {
        None | Some(Value::Null) => true,
        Some(Value::Object(m)) => m.is_empty(),
        Some(_) => false,
    }
}

fn parse_network(network: &str) -> Result<Network> {
    network.parse::<Network>().map_err(CoreError::InvalidOptions)
}

/// Layer VMess/VLess protocol defaults and transport settings
fn apply_v2ray(inbound: &mut InboundConfig, protocol: &str, params: &V2rayNodeParams) -> Result<()> {
    inbound.protocol = protocol.to_string();
    if is_unset(&inbound.settings) {
        inbound.settings = Some(match protocol {
            "vless" => json!({ "decryption": "none", "clients": [] }),
            _ => json!({ "clients": [] }),
        });
    }
    let Some(raw) = params.network_settings.as_ref().filter(|v| !v.is_null()) else {
        return Ok(());
    };
    let settings: TransportSettings = serde_json::from_value(raw.clone()).map_err(|e| {
        CoreError::InvalidOptions(format!("unmarshal {} settings error: {}", params.network, e))
    })?;
    let stream = &mut inbound.stream_settings;
    match parse_network(&params.network)? {
        Network::Tcp => stream.tcp_settings = Some(settings),
        Network::Ws => stream.ws_settings = Some(settings),
        Network::Grpc => stream.grpc_settings = Some(settings),
    }
    Ok(())
}

fn apply_trojan(inbound: &mut InboundConfig) {
    inbound.protocol = "trojan".to_string();
    if is_unset(&inbound.settings) {
        inbound.settings = Some(json!({ "clients": [] }));
    }
}

fn apply_shadowsocks(inbound: &mut InboundConfig, cipher: &str, server_key: &str) {
    inbound.protocol = "shadowsocks".to_string();
    if is_unset(&inbound.settings) {
        let mut settings = json!({
            "method": cipher,
            "network": "tcp,udp",
            "clients": []
        });
        if !server_key.is_empty() {
            settings["password"] = Value::String(server_key.to_string());
        }
        inbound.settings = Some(settings);
    }
}

/// Build the inbound of a node, tagged with the node name
pub fn build_inbound(
    info: &NodeInfo,
    expand: &ExpandNodeOptions,
    tls: &TlsOptions,
) -> Result<InboundConfig> {
    let mut inbound = match &expand.raw_inbound {
        Some(raw) if !raw.is_empty() => serde_json::from_value::<InboundConfig>(raw.0.clone())
            .map_err(|e| CoreError::InvalidOptions(format!("unmarshal raw inbound error: {}", e)))?,
        _ => InboundConfig::default(),
    };

    let (network, enable_tls) = match &info.protocol {
        ProtocolParams::VMess(p) => {
            apply_v2ray(&mut inbound, "vmess", p)?;
            (parse_network(&p.network)?, p.tls_enabled())
        }
        ProtocolParams::VLess(p) => {
            apply_v2ray(&mut inbound, "vless", &p.v2ray)?;
            (parse_network(&p.v2ray.network)?, p.v2ray.tls_enabled())
        }
        ProtocolParams::Trojan(_) => {
            apply_trojan(&mut inbound);
            (Network::Tcp, true)
        }
        ProtocolParams::Shadowsocks(p) => {
            apply_shadowsocks(&mut inbound, &p.cipher, &p.server_key);
            (Network::Tcp, false)
        }
    };
    let common = info.protocol.common();

    inbound.port = parse_port(&common.port)?;
    if let Some(listen) = expand.listen_ip()? {
        inbound.listen = Some(listen);
    }
    if inbound.sniffing.is_none() {
        inbound.sniffing = Some(SniffingConfig {
            enabled: true,
            dest_override: vec!["http".to_string(), "tls".to_string()],
        });
    }

    let stream = &mut inbound.stream_settings;
    stream.network = network;
    let proxy_protocol = common.proxy_protocol;
    match network {
        Network::Tcp => {
            stream
                .tcp_settings
                .get_or_insert_with(TransportSettings::default)
                .accept_proxy_protocol = proxy_protocol;
        }
        Network::Ws => {
            stream
                .ws_settings
                .get_or_insert_with(TransportSettings::default)
                .accept_proxy_protocol = proxy_protocol;
        }
        Network::Grpc => {
            stream.sockopt = Some(SocketSettings {
                accept_proxy_protocol: proxy_protocol,
                tcp_fast_open: proxy_protocol,
            });
        }
    }

    if enable_tls {
        if tls.cert_path.is_empty() || tls.key_path.is_empty() {
            return Err(CoreError::MissingTls(info.name.clone()));
        }
        stream.security = Some("tls".to_string());
        stream
            .tls_settings
            .get_or_insert_with(Default::default)
            .certificates
            .push(TlsCertificate {
                certificate_file: tls.cert_path.clone(),
                key_file: tls.key_path.clone(),
                ocsp_stapling: OCSP_STAPLING_SECS,
            });
    }

    inbound.tag = info.name.clone();
    Ok(inbound)
}

/// Build the egress of a node under the given tag
pub fn build_outbound(tag: &str, expand: &ExpandNodeOptions) -> Result<OutboundConfig> {
    let mut outbound = match &expand.raw_outbound {
        Some(raw) if !raw.is_empty() => serde_json::from_value::<OutboundConfig>(raw.0.clone())
            .map_err(|e| {
                CoreError::InvalidOptions(format!("unmarshal raw outbound error: {}", e))
            })?,
        _ => OutboundConfig::default(),
    };
    if outbound.protocol.is_empty() {
        outbound.protocol = DEFAULT_OUTBOUND_PROTOCOL.to_string();
    }
    if let Some(send_through) = expand.send_ip()? {
        outbound.send_through = Some(send_through);
    }
    outbound.tag = tag.to_string();
    Ok(outbound)
}
