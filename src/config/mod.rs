//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → StewardConfig (validated, immutable)
//!     → sections handed to supervisor, stats client, control loop
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    BackupConfig, CertificatesConfig, DatabaseConfig, EngineConfig, ObservabilityConfig, RetentionConfig,
    SchedulerConfig, StatsConfig, StewardConfig,
};
pub use validation::ValidationError;
