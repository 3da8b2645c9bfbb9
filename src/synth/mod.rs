//! Engine configuration synthesis.
//!
//! # Data Flow
//! ```text
//! store snapshot (enabled inbounds, enabled outbounds, memberships)
//!     → credentials.rs (typed per-protocol credential sets)
//!     → synthesizer.rs (assemble + inject + fallbacks)
//!     → document.rs (ConfigDocument, serialized as pretty JSON)
//! ```
//!
//! # Design Decisions
//! - Pure over its inputs: the same snapshot always yields the same bytes
//! - Disabled tenants are filtered here as well as in the store query
//! - Any undecodable blob aborts the whole build; nothing partial is returned

pub mod credentials;
pub mod document;
pub mod synthesizer;

pub use document::ConfigDocument;
pub use synthesizer::{ControlPlane, SynthesisError, Synthesizer};
