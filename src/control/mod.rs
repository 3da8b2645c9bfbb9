//! Scheduled control loop.
//!
//! # Data Flow
//! ```text
//! traffic (5m):   engine running? → stats.poll_all → store.record_traffic / record_tenant_traffic
//! quota (30m):    store.tenants_due_for_disable → disable each → engine.reload() once
//! certs (daily):  certs.expiring(30d) → renew each auto-renew cert
//! backup (daily): reserve <dir>/<prefix>_<ts>.db (0600) → store.snapshot_to → prune by mtime
//! cleanup (7d):   store.prune_traffic(90d) → store.prune_audit(180d)
//! ```
//!
//! # Design Decisions
//! - All five tasks take the same mutex; they never overlap each other
//! - A failed record is logged and the batch continues; failing to read
//!   the batch itself ends that run
//! - First run of each task is one period after startup
//! - Store work runs on the blocking pool, never on the async workers

pub mod backup;
pub mod tasks;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::certs::{CertificateAuthority, CertificateError};
use crate::config::{RetentionConfig, SchedulerConfig, StewardConfig};
use crate::engine::EngineControl;
use crate::lifecycle::shutdown::Shutdown;
use crate::observability::metrics;
use crate::stats::StatsClient;
use crate::store::{Store, StoreError};

pub use tasks::{CleanupSummary, CollectionOutcome, RenewalSummary};

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("certificate error: {0}")]
    Certificate(#[from] CertificateError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The periodic tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    Traffic,
    Quota,
    Certificates,
    Backup,
    Cleanup,
}

impl Task {
    pub const ALL: [Task; 5] = [Task::Traffic, Task::Quota, Task::Certificates, Task::Backup, Task::Cleanup];

    pub fn as_str(&self) -> &'static str {
        match self {
            Task::Traffic => "traffic",
            Task::Quota => "quota",
            Task::Certificates => "certificates",
            Task::Backup => "backup",
            Task::Cleanup => "cleanup",
        }
    }

    fn period(&self, schedule: &SchedulerConfig) -> Duration {
        let secs = match self {
            Task::Traffic => schedule.traffic_interval_secs,
            Task::Quota => schedule.quota_interval_secs,
            Task::Certificates => schedule.certificate_interval_secs,
            Task::Backup => schedule.backup_interval_secs,
            Task::Cleanup => schedule.cleanup_interval_secs,
        };
        Duration::from_secs(secs)
    }
}

#[derive(Debug, Clone)]
struct BackupPolicy {
    dir: PathBuf,
    prefix: String,
    retention: Duration,
}

pub struct ControlLoop {
    store: Arc<dyn Store>,
    engine: Arc<dyn EngineControl>,
    stats: StatsClient,
    certs: Arc<dyn CertificateAuthority>,
    schedule: SchedulerConfig,
    retention: RetentionConfig,
    backup: BackupPolicy,
    renew_within: chrono::Duration,
    lock: Mutex<()>,
}

impl ControlLoop {
    pub fn new(
        store: Arc<dyn Store>,
        engine: Arc<dyn EngineControl>,
        stats: StatsClient,
        certs: Arc<dyn CertificateAuthority>,
        config: &StewardConfig,
    ) -> Self {
        Self {
            store,
            engine,
            stats,
            certs,
            schedule: config.scheduler.clone(),
            retention: config.retention.clone(),
            backup: BackupPolicy {
                dir: config.backup_dir(),
                prefix: config.backup.file_prefix.clone(),
                retention: Duration::from_secs(u64::from(config.backup.retention_days) * 86_400),
            },
            renew_within: chrono::Duration::days(i64::from(config.certificates.renew_within_days)),
            lock: Mutex::new(()),
        }
    }

    /// Start one timer task per periodic task. Each exits on shutdown.
    pub fn spawn(self: Arc<Self>, shutdown: &Shutdown) -> Vec<JoinHandle<()>> {
        Task::ALL
            .iter()
            .map(|&task| {
                let period = task.period(&self.schedule);
                tokio::spawn(self.clone().run_periodic(task, period, shutdown.subscribe()))
            })
            .collect()
    }

    async fn run_periodic(self: Arc<Self>, task: Task, period: Duration, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(task = task.as_str(), period_secs = period.as_secs(), "Scheduled task starting");

        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_task(task).await;
                }
                _ = shutdown.recv() => {
                    tracing::info!(task = task.as_str(), "Scheduled task received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Run store work on the blocking pool.
    async fn with_store<T, F>(&self, work: F) -> Result<T, ControlError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Store) -> Result<T, ControlError> + Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || work(store.as_ref()))
            .await
            .map_err(std::io::Error::other)?
    }

    /// Run one task now and log its outcome.
    pub async fn run_task(&self, task: Task) {
        let result = match task {
            Task::Traffic => self.collect_traffic().await.map(|outcome| format!("{:?}", outcome)),
            Task::Quota => self.enforce_quota().await.map(|n| format!("{} tenants disabled", n)),
            Task::Certificates => self.renew_certificates().await.map(|s| format!("{:?}", s)),
            Task::Backup => self.backup().await.map(|p| p.display().to_string()),
            Task::Cleanup => self.cleanup().await.map(|s| format!("{:?}", s)),
        };

        match &result {
            Ok(summary) => tracing::debug!(task = task.as_str(), summary = %summary, "Task finished"),
            Err(e) => tracing::error!(task = task.as_str(), error = %e, "Task failed"),
        }
        metrics::record_task_run(task.as_str(), result.is_ok());
    }
}
