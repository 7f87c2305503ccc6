//! Protocol account construction for users

use base64::{engine::general_purpose::STANDARD, Engine as _};

use super::params::{ProtocolParams, UserInfo};
use crate::core::objects::{Account, CipherType, ProtocolUser};
use crate::error::{CoreError, Result};
use crate::utils::format_user_email;

/// Map a panel cipher name onto the engine cipher type
pub fn cipher_from_str(cipher: &str) -> CipherType {
    match cipher.to_lowercase().as_str() {
        "aes-128-gcm" | "aead_aes_128_gcm" => CipherType::Aes128Gcm,
        "aes-256-gcm" | "aead_aes_256_gcm" => CipherType::Aes256Gcm,
        "chacha20-poly1305" | "aead_chacha20_poly1305" | "chacha20-ietf-poly1305" => {
            CipherType::Chacha20Poly1305
        }
        "none" | "plain" => CipherType::None,
        _ => CipherType::Unknown,
    }
}

/// Length in bytes of a Shadowsocks 2022 user key
pub fn ss2022_key_length(cipher: &str) -> Option<usize> {
    match cipher.to_lowercase().as_str() {
        "2022-blake3-aes-128-gcm" => Some(16),
        "2022-blake3-aes-256-gcm" | "2022-blake3-chacha20-poly1305" => Some(32),
        _ => None,
    }
}

fn invalid_user(user: &UserInfo, reason: impl Into<String>) -> CoreError {
    CoreError::InvalidUser {
        user: user.name.clone(),
        reason: reason.into(),
    }
}

/// Build the protocol account of a user on a node
pub fn build_account(protocol: &ProtocolParams, user: &UserInfo) -> Result<Account> {
    if user.key.is_empty() {
        return Err(invalid_user(user, "empty key"));
    }
    let account = match protocol {
        ProtocolParams::VMess(_) => Account::VMess {
            id: user.key.clone(),
            security: "auto".to_string(),
        },
        ProtocolParams::VLess(p) => Account::VLess {
            id: user.key.clone(),
            flow: p.flow.clone(),
        },
        ProtocolParams::Shadowsocks(p) if p.server_key.is_empty() => Account::Shadowsocks {
            password: user.key.clone(),
            cipher: cipher_from_str(&p.cipher),
        },
        ProtocolParams::Shadowsocks(p) => {
            let len = ss2022_key_length(&p.cipher).ok_or_else(|| {
                invalid_user(user, format!("cipher {} has no server key", p.cipher))
            })?;
            let key = user.key.as_bytes().get(..len).ok_or_else(|| {
                invalid_user(user, format!("key shorter than {} bytes", len))
            })?;
            Account::Shadowsocks2022 {
                key: STANDARD.encode(key),
            }
        }
        ProtocolParams::Trojan(_) => Account::Trojan {
            password: user.key.clone(),
        },
    };
    Ok(account)
}

/// Build the engine-side identity of a user on a node
pub fn build_protocol_user(
    node: &str,
    protocol: &ProtocolParams,
    user: &UserInfo,
) -> Result<ProtocolUser> {
    Ok(ProtocolUser {
        email: format_user_email(&user.name, node),
        level: 0,
        account: build_account(protocol, user)?,
    })
}
