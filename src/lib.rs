//! Proxy engine steward library.
//!
//! Synthesizes the engine document from the tenant store, supervises the
//! engine process, and runs the scheduled traffic/quota/maintenance loop.

// Core subsystems
pub mod engine;
pub mod model;
pub mod stats;
pub mod synth;

// Collaborators
pub mod certs;
pub mod store;

// Scheduling
pub mod control;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::schema::StewardConfig;
pub use control::ControlLoop;
pub use engine::Supervisor;
pub use lifecycle::shutdown::Shutdown;
