//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the steward.
//! All types derive Serde traits for deserialization from config files.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct StewardConfig {
    /// Engine binary, document path and control-plane listener.
    pub engine: EngineConfig,

    /// Stats endpoint timeouts.
    pub stats: StatsConfig,

    /// SQLite store.
    pub database: DatabaseConfig,

    /// Periods of the control loop tasks.
    pub scheduler: SchedulerConfig,

    pub backup: BackupConfig,

    pub retention: RetentionConfig,

    pub certificates: CertificatesConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl StewardConfig {
    /// Backup directory, defaulting to `backups/` next to the database.
    pub fn backup_dir(&self) -> PathBuf {
        match &self.backup.dir {
            Some(dir) => PathBuf::from(dir),
            None => Path::new(&self.database.path)
                .parent()
                .unwrap_or_else(|| Path::new(""))
                .join("backups"),
        }
    }
}

/// Engine process settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Path to the engine executable.
    pub binary_path: String,

    /// Where the synthesized document lives.
    pub config_path: String,

    /// Exported to the engine as `XRAY_LOCATION_ASSET`.
    pub assets_path: Option<String>,

    /// Control-plane inbound address (loopback).
    pub api_listen: String,

    pub api_port: u16,

    pub self_test_timeout_secs: u64,

    /// Pause between stop and start on restart.
    pub restart_settle_ms: u64,

    /// Attempts made by the binary at startup before giving up.
    pub start_attempts: u32,

    pub start_backoff_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            binary_path: "/usr/local/bin/xray".to_string(),
            config_path: "/etc/xray/config.json".to_string(),
            assets_path: None,
            api_listen: "127.0.0.1".to_string(),
            api_port: 10085,
            self_test_timeout_secs: 10,
            restart_settle_ms: 500,
            start_attempts: 3,
            start_backoff_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StatsConfig {
    /// Single-counter query timeout.
    pub query_timeout_secs: u64,

    /// Bulk poll timeout.
    pub bulk_timeout_secs: u64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            query_timeout_secs: 5,
            bulk_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "steward.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub traffic_interval_secs: u64,
    pub quota_interval_secs: u64,
    pub certificate_interval_secs: u64,
    pub backup_interval_secs: u64,
    pub cleanup_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            traffic_interval_secs: 300,
            quota_interval_secs: 1800,
            certificate_interval_secs: 86_400,
            backup_interval_secs: 86_400,
            cleanup_interval_secs: 604_800,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Defaults to `<database dir>/backups`.
    pub dir: Option<String>,

    /// Backups older than this (by mtime) are deleted.
    pub retention_days: u32,

    pub file_prefix: String,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            dir: None,
            retention_days: 7,
            file_prefix: "steward".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub traffic_days: u32,
    pub audit_days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            traffic_days: 90,
            audit_days: 180,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CertificatesConfig {
    /// Renewal horizon.
    pub renew_within_days: u32,

    /// Argv run per certificate; `{domain}` is substituted. Empty disables
    /// renewal.
    pub renew_command: Vec<String>,

    pub timeout_secs: u64,

    /// Validity of a freshly issued certificate; a successful renewal sets
    /// the expiry this far out.
    pub lifetime_days: u32,
}

impl Default for CertificatesConfig {
    fn default() -> Self {
        Self {
            renew_within_days: 30,
            renew_command: Vec::new(),
            timeout_secs: 120,
            lifetime_days: 90,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config: StewardConfig = toml::from_str("").unwrap();
        assert_eq!(config.engine.api_port, 10085);
        assert_eq!(config.scheduler.quota_interval_secs, 1800);
        assert_eq!(config.backup_dir(), PathBuf::from("backups"));
    }

    #[test]
    fn test_partial_sections() {
        let config: StewardConfig = toml::from_str(
            r#"
            [engine]
            binary_path = "/opt/xray/xray"

            [database]
            path = "/var/lib/steward/steward.db"

            [certificates]
            renew_command = ["certbot", "renew", "--cert-name", "{domain}"]
            "#,
        )
        .unwrap();
        assert_eq!(config.engine.binary_path, "/opt/xray/xray");
        assert_eq!(config.engine.config_path, "/etc/xray/config.json");
        assert_eq!(config.backup_dir(), PathBuf::from("/var/lib/steward/backups"));
        assert_eq!(config.certificates.renew_command.len(), 4);
    }
}
