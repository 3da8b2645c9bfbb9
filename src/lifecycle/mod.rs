//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Open store → Build supervisor → Start engine (bounded retries)
//!         → Spawn control loop
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Broadcast to scheduled tasks → Stop engine → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//!     SIGHUP → Rebuild and reload the engine config
//! ```
//!
//! # Design Decisions
//! - Engine start failure is not fatal; the service keeps running and a
//!   later reload or restart can bring the engine up
//! - Ordered shutdown: stop timers, then the engine

pub mod shutdown;
pub mod signals;
pub mod startup;
