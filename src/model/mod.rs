//! Domain records read from the configuration store.
//!
//! # Ownership
//! ```text
//! admin CRUD layer ──writes──▶ InboundDefinition / OutboundDefinition / TenantCredential
//! synth            ──reads───▶ enabled inbounds, outbounds, memberships
//! control (quota)  ──writes──▶ TenantCredential.enabled, TenantCredential.used_bytes
//! control (traffic)──writes──▶ TrafficRow (append-or-increment per day)
//! ```
//!
//! Settings blobs stay opaque (`SettingsBlob`) until the synthesizer decodes
//! them for a single document build.

pub mod protocol;
pub mod records;

pub use protocol::Protocol;
pub use records::{
    AuditEntry, Certificate, InboundDefinition, OutboundDefinition, RowId, SettingsBlob,
    TenantCredential, Traffic, TrafficRow, TrafficSubject,
};
