//! Resilience helpers.
//!
//! # Data Flow
//! ```text
//! Engine start at boot:
//!     → lifecycle::startup (bounded attempts)
//!     → backoff.rs (delay between attempts)
//! ```
//!
//! # Design Decisions
//! - Jittered backoff so restarts of many instances do not align
//! - Stats polls are never retried: the endpoint resets on read

pub mod backoff;
