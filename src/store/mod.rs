//! Persistence collaborator.
//!
//! # Responsibilities
//! - Read enabled inbounds/outbounds and live memberships for synthesis
//! - Read/write tenant enabled flag and used bytes
//! - Record certificate renewal outcomes
//! - Append-or-increment daily traffic rows, prune traffic and audit rows
//! - Snapshot the whole store for backups
//!
//! # Design Decisions
//! - Every call is atomic on its own; callers never hold a transaction
//! - Ordering of listed rows is insertion order (row id), which keeps
//!   synthesized documents byte-stable
//! - Methods are synchronous and may block; async callers go through
//!   `spawn_blocking`

pub mod sqlite;

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

use crate::model::{
    Certificate, InboundDefinition, OutboundDefinition, RowId, TenantCredential, Traffic,
    TrafficSubject,
};

pub use sqlite::SqliteStore;

/// Errors raised by a store implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Operations the supervisor and the control loop need from persistence.
pub trait Store: Send + Sync {
    /// Enabled inbounds in insertion order.
    fn enabled_inbounds(&self) -> StoreResult<Vec<InboundDefinition>>;

    /// Enabled outbounds in insertion order.
    fn enabled_outbounds(&self) -> StoreResult<Vec<OutboundDefinition>>;

    /// Enabled tenants attached to an inbound, in tenant insertion order.
    fn enabled_members(&self, inbound: RowId) -> StoreResult<Vec<TenantCredential>>;

    /// Inbound tag → row id for every inbound, enabled or not.
    fn inbound_keys(&self) -> StoreResult<HashMap<String, RowId>>;

    /// Tenant stats key → row id for every tenant.
    fn tenant_keys(&self) -> StoreResult<HashMap<String, RowId>>;

    /// Add `traffic` to a tenant's used bytes and to its row for `date`,
    /// both or neither.
    fn record_tenant_traffic(&self, tenant: RowId, date: NaiveDate, traffic: Traffic) -> StoreResult<()>;

    /// Increment the subject's row for `date`, creating it if missing.
    fn record_traffic(&self, subject: TrafficSubject, date: NaiveDate, traffic: Traffic) -> StoreResult<()>;

    /// Enabled tenants that are expired at `now` or at/over a nonzero quota.
    fn tenants_due_for_disable(&self, now: DateTime<Utc>) -> StoreResult<Vec<TenantCredential>>;

    /// Clear a tenant's enabled flag. Disabling a disabled tenant is a no-op.
    fn disable_tenant(&self, tenant: RowId) -> StoreResult<()>;

    /// Active certificates expiring before `horizon`.
    fn expiring_certificates(&self, horizon: DateTime<Utc>) -> StoreResult<Vec<Certificate>>;

    /// Set a new expiry, mark active and clear the last error.
    fn mark_certificate_renewed(&self, id: RowId, expires_at: DateTime<Utc>) -> StoreResult<()>;

    /// Mark `error` and keep the diagnostic. Errored certificates are not
    /// listed as expiring again until an operator reactivates them.
    fn mark_certificate_failed(&self, id: RowId, error: &str) -> StoreResult<()>;

    /// Delete traffic rows dated before `before`. Returns rows removed.
    fn prune_traffic(&self, before: NaiveDate) -> StoreResult<usize>;

    /// Delete audit rows created before `before`. Returns rows removed.
    fn prune_audit(&self, before: DateTime<Utc>) -> StoreResult<usize>;

    /// Write a consistent copy of the store to `dest`.
    fn snapshot_to(&self, dest: &Path) -> StoreResult<()>;
}
