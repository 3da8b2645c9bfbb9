//! Record types shared by the store, the synthesizer and the control loop.

use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::model::Protocol;

/// Primary key of a persisted row.
pub type RowId = i64;

/// An opaque per-protocol JSON blob, kept as text at rest.
///
/// Only the synthesizer decodes it, and only for the duration of one build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsBlob(String);

impl SettingsBlob {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Empty text and a literal `null` both mean "not configured".
    pub fn is_absent(&self) -> bool {
        let trimmed = self.0.trim();
        trimmed.is_empty() || trimmed == "null"
    }

    /// Decode the blob, `None` when absent.
    pub fn decode(&self) -> Result<Option<serde_json::Value>, serde_json::Error> {
        if self.is_absent() {
            return Ok(None);
        }
        serde_json::from_str(&self.0).map(Some)
    }
}

impl From<&str> for SettingsBlob {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for SettingsBlob {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

/// A listener-side protocol configuration unit.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundDefinition {
    pub id: RowId,
    /// Unique tag, also the counter entity id for `inbound>>>` stats.
    pub tag: String,
    pub protocol: Protocol,
    pub listen: String,
    pub port: u16,
    pub enabled: bool,
    pub settings: SettingsBlob,
    pub stream_settings: SettingsBlob,
    pub sniffing: SettingsBlob,
}

/// An egress-side protocol configuration unit.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundDefinition {
    pub id: RowId,
    pub tag: String,
    pub protocol: Protocol,
    pub enabled: bool,
    pub settings: SettingsBlob,
    pub stream_settings: SettingsBlob,
    pub proxy_settings: SettingsBlob,
    pub mux: SettingsBlob,
}

/// A tenant ("client") credential with quota and expiry.
#[derive(Debug, Clone, PartialEq)]
pub struct TenantCredential {
    pub row_id: RowId,
    pub id: Uuid,
    pub label: String,
    pub enabled: bool,
    /// Cumulative byte quota, 0 = unlimited.
    pub quota_bytes: u64,
    pub used_bytes: u64,
    pub expires_at: Option<DateTime<Utc>>,
}

impl TenantCredential {
    /// Key under which the engine reports this tenant's counters.
    ///
    /// Written as the credential label in the engine document and mapped
    /// back to `row_id` by the traffic task.
    pub fn stats_key(&self) -> String {
        if self.label.trim().is_empty() {
            self.id.to_string()
        } else {
            self.label.clone()
        }
    }

    pub fn is_over_quota(&self) -> bool {
        self.quota_bytes > 0 && self.used_bytes >= self.quota_bytes
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at < now)
    }

    /// Enabled tenants that are expired or over quota.
    pub fn should_disable(&self, now: DateTime<Utc>) -> bool {
        self.enabled && (self.is_expired(now) || self.is_over_quota())
    }
}

/// TLS certificate tracked for renewal.
#[derive(Debug, Clone, PartialEq)]
pub struct Certificate {
    pub id: RowId,
    pub domain: String,
    pub expires_at: DateTime<Utc>,
    pub auto_renew: bool,
    /// `pending`, `active` or `error`.
    pub status: String,
    /// Diagnostic from the last failed renewal.
    pub last_error: Option<String>,
}

/// Administrative history row; only pruned by this crate.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub id: RowId,
    pub action: String,
    pub resource: String,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}

/// Entity a traffic row is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrafficSubject {
    Inbound(RowId),
    Tenant(RowId),
}

/// Upload/download byte pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Traffic {
    pub upload: u64,
    pub download: u64,
}

impl Traffic {
    pub fn new(upload: u64, download: u64) -> Self {
        Self { upload, download }
    }

    pub fn is_zero(&self) -> bool {
        self.upload == 0 && self.download == 0
    }

    pub fn total(&self) -> u64 {
        self.upload.saturating_add(self.download)
    }
}

/// Accumulated traffic for one subject on one calendar day.
#[derive(Debug, Clone, PartialEq)]
pub struct TrafficRow {
    pub subject: TrafficSubject,
    pub date: NaiveDate,
    pub traffic: Traffic,
}
