//! Engine traffic counters.
//!
//! # Data Flow
//! ```text
//! GET /stats/query?reset=true   (engine API inbound, loopback)
//!     → client.rs (timeout, status, JSON decode)
//!     → counters.rs (name parsing: scope>>>id>>>traffic>>>direction)
//!     → TrafficSnapshot { inbounds, tenants }  (deltas since last poll)
//! ```
//!
//! # Design Decisions
//! - Every read zeroes the counters it returns, so a failed poll is lost
//!   data for that interval. Nothing here retries.
//! - A bulk poll is one request; inbound and tenant maps come from the
//!   same response
//! - Unrecognized counter names are skipped, not errors

pub mod client;
pub mod counters;

pub use client::{StatsClient, TelemetryError};
pub use counters::{CounterName, Direction, Scope, TrafficSnapshot};
