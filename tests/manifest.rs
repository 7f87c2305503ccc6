use std::fs;
use std::sync::Arc;

use tenant_core::config::NodeManifest;
use tenant_core::core::objects::Account;
use tenant_core::core::MemoryLauncher;
use tenant_core::{Controller, CoreError};

const MANIFEST: &str = r#"{
  "nodes": [
    {
      "name": "vless-1",
      "protocol": {
        "type": "vless",
        "host": "a.example.com",
        "port": "443",
        "tls_type": 1,
        "network": "grpc",
        "network_settings": { "serviceName": "tunnel" },
        "flow": "xtls-rprx-vision"
      },
      "limit": { "ip_limit": 3, "speed_limit": 1048576 },
      "rules": ["domain:ads.example.com", "port:25,465"],
      "tls": { "cert_path": "/etc/cert.pem", "key_path": "/etc/key.pem" },
      "users": [
        { "id": 1, "name": "alice", "key": "11111111-1111-1111-1111-111111111111" }
      ]
    },
    {
      "name": "ss-1",
      "protocol": {
        "type": "shadowsocks",
        "port": "8388",
        "cipher": "aes-256-gcm"
      },
      "other_options": { "ListenIp": "127.0.0.1" },
      "users": [
        { "id": 2, "name": "bob", "key": "secret" },
        { "id": 3, "name": "carol", "key": "hunter2" }
      ]
    },
    {
      "name": "trojan-1",
      "protocol": { "type": "trojan", "port": "8443" },
      "tls": { "cert_path": "/etc/cert.pem", "key_path": "/etc/key.pem" }
    }
  ]
}"#;

fn replay(controller: &Controller, manifest: &NodeManifest) {
    for node in &manifest.nodes {
        controller.add_node(&node.params).unwrap();
        if !node.users.is_empty() {
            controller
                .add_users(&node.params.info.name, &node.users)
                .unwrap();
        }
    }
}

#[test]
fn test_manifest_replay() {
    let manifest = NodeManifest::from_slice(MANIFEST.as_bytes()).unwrap();
    assert_eq!(manifest.nodes.len(), 3);
    assert_eq!(manifest.user_count(), 3);

    let launcher = Arc::new(MemoryLauncher::new());
    let controller = Controller::new(launcher.clone());
    let data_dir = tempfile::tempdir().unwrap();
    controller.start(data_dir.path(), b"{}").unwrap();
    replay(&controller, &manifest);

    assert_eq!(controller.node_names(), vec!["ss-1", "trojan-1", "vless-1"]);
    let engine = launcher.engine().unwrap();

    let alice = engine.inbound_user("vless-1", "[alice](vless-1)").unwrap();
    assert_eq!(
        alice.account,
        Account::VLess {
            id: "11111111-1111-1111-1111-111111111111".to_string(),
            flow: "xtls-rprx-vision".to_string(),
        }
    );
    assert_eq!(engine.inbound_user_count("ss-1"), 2);

    let ss = engine
        .inbound_configs()
        .into_iter()
        .find(|i| i.tag == "ss-1")
        .unwrap();
    assert_eq!(ss.listen, Some("127.0.0.1".parse().unwrap()));
    assert!(ss.stream_settings.tls_settings.is_none());

    let rules = engine.rules();
    assert_eq!(rules.len(), 2);
    assert_eq!(rules[1].port.as_deref(), Some("25,465"));

    let gate = controller.limiter("vless-1").unwrap();
    assert_eq!(gate.speed_limit(), 1048576);
    assert!(gate.check_rule(&["ads.example.com"]));
    let bucket = gate
        .check_speed_limit_then_get_rate_limiter("[alice](vless-1)")
        .unwrap()
        .unwrap();
    assert_eq!(bucket.rate(), 1048576);

    controller.close().unwrap();
}

#[test]
fn test_manifest_rejects_unknown_protocol() {
    let raw = br#"{"nodes":[{"name":"x","protocol":{"type":"hysteria","port":"1"}}]}"#;
    let err = NodeManifest::from_slice(raw).unwrap_err();
    assert!(matches!(err, CoreError::UnsupportedProtocol(ref p) if p == "hysteria"));
}

#[test]
fn test_manifest_and_config_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let manifest_path = dir.path().join("nodes.json");
    fs::write(&manifest_path, MANIFEST).unwrap();
    let policy_path = dir.path().join("policy.json");
    fs::write(&policy_path, r#"{"handshake": 4, "connIdle": 300}"#).unwrap();
    let core = format!(
        r#"{{"AssetPath": "assets", "Policy": {}}}"#,
        serde_json::to_string(&policy_path.to_string_lossy()).unwrap()
    );

    let launcher = Arc::new(MemoryLauncher::new());
    let controller = Controller::new(launcher.clone());
    controller.start(dir.path(), core.as_bytes()).unwrap();

    let engine = launcher.engine().unwrap();
    assert_eq!(engine.config().asset_dir, dir.path().join("assets"));
    assert_eq!(engine.config().policy["levels"]["0"]["connIdle"], 300);

    let manifest = NodeManifest::load(&manifest_path).unwrap();
    replay(&controller, &manifest);
    assert_eq!(controller.node_names().len(), 3);
}
