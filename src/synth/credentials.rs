//! Typed credential builders, one per credential-bearing protocol.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::model::{Protocol, TenantCredential};

/// Cipher used for single-secret shadowsocks inbounds unless one is stored.
pub const SHADOWSOCKS_METHOD: &str = "aes-256-gcm";

/// Secret written when a shadowsocks inbound has no enabled member.
///
/// Tenant ids are UUIDs, so this string can never match a real tenant.
// Multi-user shadowsocks would make this special case unnecessary.
pub const SHADOWSOCKS_PLACEHOLDER_SECRET: &str = "no-client-configured";

const SHADOWSOCKS_NETWORK: &str = "tcp,udp";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VmessClient {
    pub id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub email: String,
    #[serde(rename = "alterId")]
    pub alter_id: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VlessClient {
    pub id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrojanClient {
    pub password: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub email: String,
}

/// The credential payload for one inbound.
#[derive(Debug, Clone, PartialEq)]
pub enum CredentialSet {
    Vmess(Vec<VmessClient>),
    Vless(Vec<VlessClient>),
    Trojan(Vec<TrojanClient>),
    /// Single-secret mode: the first enabled member, or the placeholder.
    Shadowsocks { secret: String },
}

impl CredentialSet {
    /// Build the set for `protocol`, `None` when the protocol carries no
    /// credentials. Disabled members are skipped.
    pub fn build(protocol: &Protocol, members: &[TenantCredential]) -> Option<Self> {
        let mut active = members.iter().filter(|m| m.enabled);
        let set = match protocol {
            Protocol::Vmess => CredentialSet::Vmess(
                active
                    .map(|m| VmessClient {
                        id: m.id.to_string(),
                        email: m.stats_key(),
                        alter_id: 0,
                    })
                    .collect(),
            ),
            Protocol::Vless => CredentialSet::Vless(
                active
                    .map(|m| VlessClient {
                        id: m.id.to_string(),
                        email: m.stats_key(),
                    })
                    .collect(),
            ),
            Protocol::Trojan => CredentialSet::Trojan(
                active
                    .map(|m| TrojanClient {
                        password: m.id.to_string(),
                        email: m.stats_key(),
                    })
                    .collect(),
            ),
            Protocol::Shadowsocks => CredentialSet::Shadowsocks {
                secret: active
                    .next()
                    .map(|m| m.id.to_string())
                    .unwrap_or_else(|| SHADOWSOCKS_PLACEHOLDER_SECRET.to_string()),
            },
            _ => return None,
        };
        Some(set)
    }

    /// Overwrite the credential keys of a stored settings object.
    ///
    /// Keys this set does not own (fallbacks, flow defaults, ...) survive.
    pub fn inject(self, mut settings: Map<String, Value>) -> Result<Map<String, Value>, serde_json::Error> {
        match self {
            CredentialSet::Vmess(clients) => {
                settings.insert("clients".into(), serde_json::to_value(clients)?);
            }
            CredentialSet::Vless(clients) => {
                settings.insert("clients".into(), serde_json::to_value(clients)?);
                settings.insert("decryption".into(), Value::String("none".into()));
            }
            CredentialSet::Trojan(clients) => {
                settings.insert("clients".into(), serde_json::to_value(clients)?);
            }
            CredentialSet::Shadowsocks { secret } => {
                settings.remove("clients");
                let method = settings
                    .get("method")
                    .and_then(Value::as_str)
                    .unwrap_or(SHADOWSOCKS_METHOD)
                    .to_string();
                settings.insert("method".into(), Value::String(method));
                settings.insert("password".into(), Value::String(secret));
                settings
                    .entry("network")
                    .or_insert_with(|| Value::String(SHADOWSOCKS_NETWORK.into()));
            }
        }
        Ok(settings)
    }
}
