//! The engine-facing configuration document.
//!
//! Field names follow the engine's camelCase JSON schema. Only the
//! structural contract is typed; per-protocol blobs stay `serde_json::Value`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tag shared by the control-plane inbound, the API block and its route.
pub const CONTROL_PLANE_TAG: &str = "api";

/// Root of the synthesized document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigDocument {
    pub log: LogBlock,
    pub api: ApiBlock,
    pub stats: StatsBlock,
    pub policy: PolicyBlock,
    pub inbounds: Vec<InboundEntry>,
    pub outbounds: Vec<OutboundEntry>,
    pub routing: RoutingBlock,
}

impl ConfigDocument {
    /// Serialize exactly as written to disk.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }

    pub fn inbound(&self, tag: &str) -> Option<&InboundEntry> {
        self.inbounds.iter().find(|ib| ib.tag == tag)
    }

    pub fn outbound(&self, tag: &str) -> Option<&OutboundEntry> {
        self.outbounds.iter().find(|ob| ob.tag == tag)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogBlock {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub loglevel: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiBlock {
    pub tag: String,
    pub services: Vec<String>,
}

/// Presence of the block enables the engine's counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsBlock {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyBlock {
    pub levels: BTreeMap<String, LevelPolicy>,
    pub system: SystemPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelPolicy {
    pub stats_user_uplink: bool,
    pub stats_user_downlink: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemPolicy {
    pub stats_inbound_uplink: bool,
    pub stats_inbound_downlink: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundEntry {
    pub tag: String,
    pub port: u16,
    pub listen: String,
    pub protocol: String,
    pub settings: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_settings: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sniffing: Option<Value>,
}

impl InboundEntry {
    /// Credential ids (`id` or `password`) listed under `settings.clients`.
    pub fn client_ids(&self) -> Vec<String> {
        self.settings
            .get("clients")
            .and_then(Value::as_array)
            .map(|clients| {
                clients
                    .iter()
                    .filter_map(|c| c.get("id").or_else(|| c.get("password")))
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundEntry {
    pub tag: String,
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_settings: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_settings: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mux: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingBlock {
    pub domain_strategy: String,
    pub rules: Vec<RoutingRule>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingRule {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inbound_tag: Vec<String>,
    pub outbound_tag: String,
}
