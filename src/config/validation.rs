//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (intervals > 0, ports valid)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: StewardConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::StewardConfig;

/// One semantic problem, named by its dotted key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &StewardConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let engine = &config.engine;
    if engine.binary_path.trim().is_empty() {
        errors.push(ValidationError::new("engine.binary_path", "must not be empty"));
    }
    if engine.config_path.trim().is_empty() {
        errors.push(ValidationError::new("engine.config_path", "must not be empty"));
    }
    if engine.api_port == 0 {
        errors.push(ValidationError::new("engine.api_port", "must be between 1 and 65535"));
    }
    if engine.self_test_timeout_secs == 0 {
        errors.push(ValidationError::new("engine.self_test_timeout_secs", "must be greater than 0"));
    }
    if engine.start_attempts == 0 {
        errors.push(ValidationError::new("engine.start_attempts", "must be at least 1"));
    }

    if config.stats.query_timeout_secs == 0 {
        errors.push(ValidationError::new("stats.query_timeout_secs", "must be greater than 0"));
    }
    if config.stats.bulk_timeout_secs == 0 {
        errors.push(ValidationError::new("stats.bulk_timeout_secs", "must be greater than 0"));
    }

    if config.database.path.trim().is_empty() {
        errors.push(ValidationError::new("database.path", "must not be empty"));
    }

    let schedule = &config.scheduler;
    for (field, secs) in [
        ("scheduler.traffic_interval_secs", schedule.traffic_interval_secs),
        ("scheduler.quota_interval_secs", schedule.quota_interval_secs),
        ("scheduler.certificate_interval_secs", schedule.certificate_interval_secs),
        ("scheduler.backup_interval_secs", schedule.backup_interval_secs),
        ("scheduler.cleanup_interval_secs", schedule.cleanup_interval_secs),
    ] {
        if secs == 0 {
            errors.push(ValidationError::new(field, "must be greater than 0"));
        }
    }

    if config.backup.retention_days == 0 {
        errors.push(ValidationError::new("backup.retention_days", "must be greater than 0"));
    }
    if config.backup.file_prefix.trim().is_empty() {
        errors.push(ValidationError::new("backup.file_prefix", "must not be empty"));
    }
    if config.retention.traffic_days == 0 {
        errors.push(ValidationError::new("retention.traffic_days", "must be greater than 0"));
    }
    if config.retention.audit_days == 0 {
        errors.push(ValidationError::new("retention.audit_days", "must be greater than 0"));
    }
    if config.certificates.timeout_secs == 0 {
        errors.push(ValidationError::new("certificates.timeout_secs", "must be greater than 0"));
    }
    if config.certificates.lifetime_days == 0 {
        errors.push(ValidationError::new("certificates.lifetime_days", "must be greater than 0"));
    }

    let observability = &config.observability;
    if observability.metrics_enabled && observability.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate_config(&StewardConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = StewardConfig::default();
        config.engine.api_port = 0;
        config.engine.binary_path = String::new();
        config.scheduler.quota_interval_secs = 0;
        config.engine.start_attempts = 0;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec![
                "engine.binary_path",
                "engine.api_port",
                "engine.start_attempts",
                "scheduler.quota_interval_secs",
            ]
        );
    }

    #[test]
    fn test_zero_certificate_lifetime_rejected() {
        let mut config = StewardConfig::default();
        config.certificates.lifetime_days = 0;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "certificates.lifetime_days");
    }

    #[test]
    fn test_metrics_address_checked_only_when_enabled() {
        let mut config = StewardConfig::default();
        config.observability.metrics_address = "not-an-address".to_string();
        assert!(validate_config(&config).is_ok());

        config.observability.metrics_enabled = true;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "observability.metrics_address");
    }
}
