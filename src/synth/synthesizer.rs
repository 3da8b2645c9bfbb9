//! Document assembly.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::model::{InboundDefinition, OutboundDefinition, SettingsBlob, TenantCredential};
use crate::store::{Store, StoreError};
use crate::synth::credentials::CredentialSet;
use crate::synth::document::{
    ApiBlock, ConfigDocument, InboundEntry, LevelPolicy, LogBlock, OutboundEntry, PolicyBlock,
    RoutingBlock, RoutingRule, StatsBlock, SystemPolicy, CONTROL_PLANE_TAG,
};

const ENGINE_LOG_LEVEL: &str = "warning";

/// Errors that abort a document build.
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("inbound '{tag}': {field} is not valid JSON: {source}")]
    InboundBlob {
        tag: String,
        field: &'static str,
        source: serde_json::Error,
    },

    #[error("inbound '{tag}': settings must be a JSON object")]
    InboundSettingsShape { tag: String },

    #[error("inbound '{tag}': cannot encode credentials: {source}")]
    Credentials { tag: String, source: serde_json::Error },

    #[error("cannot read definitions: {0}")]
    Store(#[source] StoreError),

    #[error("inbound '{tag}': membership lookup failed: {source}")]
    Membership { tag: String, source: StoreError },

    #[error("outbound '{tag}': {field} is not valid JSON: {source}")]
    OutboundBlob {
        tag: String,
        field: &'static str,
        source: serde_json::Error,
    },
}

impl SynthesisError {
    /// Tag of the inbound or outbound that broke the build.
    pub fn tag(&self) -> Option<&str> {
        match self {
            SynthesisError::InboundBlob { tag, .. }
            | SynthesisError::InboundSettingsShape { tag }
            | SynthesisError::Credentials { tag, .. }
            | SynthesisError::Membership { tag, .. }
            | SynthesisError::OutboundBlob { tag, .. } => Some(tag),
            SynthesisError::Store(_) => None,
        }
    }
}

/// Loopback listener the supervisor uses for its own stats queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPlane {
    pub listen: String,
    pub port: u16,
}

/// Builds complete engine documents from store records.
#[derive(Debug, Clone)]
pub struct Synthesizer {
    control: ControlPlane,
}

impl Synthesizer {
    pub fn new(control: ControlPlane) -> Self {
        Self { control }
    }

    /// Build a document from the store's current enabled definitions.
    pub fn synthesize_from(&self, store: &dyn Store) -> Result<ConfigDocument, SynthesisError> {
        let inbounds = store.enabled_inbounds().map_err(SynthesisError::Store)?;
        let outbounds = store.enabled_outbounds().map_err(SynthesisError::Store)?;
        self.synthesize(&inbounds, &outbounds, |inbound| store.enabled_members(inbound.id))
    }

    /// Build one document.
    ///
    /// `members` resolves the live membership of an inbound; it is called
    /// once per enabled inbound, in order.
    pub fn synthesize<F>(
        &self,
        inbounds: &[InboundDefinition],
        outbounds: &[OutboundDefinition],
        mut members: F,
    ) -> Result<ConfigDocument, SynthesisError>
    where
        F: FnMut(&InboundDefinition) -> Result<Vec<TenantCredential>, StoreError>,
    {
        let mut inbound_entries = vec![self.control_inbound()];
        for inbound in inbounds.iter().filter(|ib| ib.enabled) {
            let resolved = members(inbound).map_err(|source| SynthesisError::Membership {
                tag: inbound.tag.clone(),
                source,
            })?;
            inbound_entries.push(build_inbound(inbound, &resolved)?);
        }

        let mut outbound_entries = outbounds
            .iter()
            .filter(|ob| ob.enabled)
            .map(build_outbound)
            .collect::<Result<Vec<_>, _>>()?;
        if outbound_entries.is_empty() {
            outbound_entries = fallback_outbounds();
        }

        Ok(ConfigDocument {
            log: LogBlock {
                access: None,
                error: None,
                loglevel: ENGINE_LOG_LEVEL.to_string(),
            },
            api: ApiBlock {
                tag: CONTROL_PLANE_TAG.to_string(),
                services: vec!["HandlerService".to_string(), "StatsService".to_string()],
            },
            stats: StatsBlock {},
            policy: stats_policy(),
            inbounds: inbound_entries,
            outbounds: outbound_entries,
            routing: RoutingBlock {
                domain_strategy: "AsIs".to_string(),
                rules: vec![RoutingRule {
                    kind: "field".to_string(),
                    inbound_tag: vec![CONTROL_PLANE_TAG.to_string()],
                    outbound_tag: CONTROL_PLANE_TAG.to_string(),
                }],
            },
        })
    }

    fn control_inbound(&self) -> InboundEntry {
        InboundEntry {
            tag: CONTROL_PLANE_TAG.to_string(),
            port: self.control.port,
            listen: self.control.listen.clone(),
            protocol: "dokodemo-door".to_string(),
            settings: serde_json::json!({ "address": self.control.listen }),
            stream_settings: None,
            sniffing: None,
        }
    }
}

fn stats_policy() -> PolicyBlock {
    let mut levels = BTreeMap::new();
    levels.insert(
        "0".to_string(),
        LevelPolicy {
            stats_user_uplink: true,
            stats_user_downlink: true,
        },
    );
    PolicyBlock {
        levels,
        system: SystemPolicy {
            stats_inbound_uplink: true,
            stats_inbound_downlink: true,
        },
    }
}

fn build_inbound(inbound: &InboundDefinition, members: &[TenantCredential]) -> Result<InboundEntry, SynthesisError> {
    let decode = |field: &'static str, blob: &SettingsBlob| {
        blob.decode().map_err(|source| SynthesisError::InboundBlob {
            tag: inbound.tag.clone(),
            field,
            source,
        })
    };

    let stored = decode("settings", &inbound.settings)?;
    let settings = match CredentialSet::build(&inbound.protocol, members) {
        Some(credentials) => {
            let base = match stored {
                None => Map::new(),
                Some(Value::Object(map)) => map,
                Some(_) => {
                    return Err(SynthesisError::InboundSettingsShape {
                        tag: inbound.tag.clone(),
                    })
                }
            };
            let injected = credentials.inject(base).map_err(|source| SynthesisError::Credentials {
                tag: inbound.tag.clone(),
                source,
            })?;
            Value::Object(injected)
        }
        None => stored.unwrap_or_else(|| Value::Object(Map::new())),
    };

    Ok(InboundEntry {
        tag: inbound.tag.clone(),
        port: inbound.port,
        listen: inbound.listen.clone(),
        protocol: inbound.protocol.as_str().to_string(),
        settings,
        stream_settings: decode("streamSettings", &inbound.stream_settings)?,
        sniffing: decode("sniffing", &inbound.sniffing)?,
    })
}

fn build_outbound(outbound: &OutboundDefinition) -> Result<OutboundEntry, SynthesisError> {
    let decode = |field: &'static str, blob: &SettingsBlob| {
        blob.decode().map_err(|source| SynthesisError::OutboundBlob {
            tag: outbound.tag.clone(),
            field,
            source,
        })
    };

    Ok(OutboundEntry {
        tag: outbound.tag.clone(),
        protocol: outbound.protocol.as_str().to_string(),
        settings: decode("settings", &outbound.settings)?,
        stream_settings: decode("streamSettings", &outbound.stream_settings)?,
        proxy_settings: decode("proxySettings", &outbound.proxy_settings)?,
        mux: decode("mux", &outbound.mux)?,
    })
}

/// Unconditional-forward and black-hole, used when nothing is configured.
fn fallback_outbounds() -> Vec<OutboundEntry> {
    ["direct:freedom", "blocked:blackhole"]
        .iter()
        .filter_map(|pair| pair.split_once(':'))
        .map(|(tag, protocol)| OutboundEntry {
            tag: tag.to_string(),
            protocol: protocol.to_string(),
            settings: Some(Value::Object(Map::new())),
            stream_settings: None,
            proxy_settings: None,
            mux: None,
        })
        .collect()
}
