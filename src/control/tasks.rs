//! Bodies of the periodic tasks. Each takes the loop mutex for its whole run.

use std::fs::Permissions;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::SystemTime;

use chrono::{Days, Local, NaiveDate, Utc};
use tokio::fs;

use crate::control::{backup, ControlError, ControlLoop};
use crate::model::TrafficSubject;
use crate::observability::metrics;

/// Result of one traffic collection run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionOutcome {
    /// Engine not running; nothing polled.
    EngineStopped,
    /// Poll failed; that interval's counters are lost.
    PollFailed,
    /// Rows written (zero deltas and unknown entities excluded).
    Recorded { inbounds: usize, tenants: usize },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenewalSummary {
    pub renewed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupSummary {
    pub traffic_rows: usize,
    pub audit_rows: usize,
}

impl ControlLoop {
    /// Attribute one poll's deltas to today's rows.
    pub async fn collect_traffic(&self) -> Result<CollectionOutcome, ControlError> {
        let _guard = self.lock.lock().await;

        if !self.engine.is_running() {
            tracing::debug!("Engine not running, skipping traffic collection");
            return Ok(CollectionOutcome::EngineStopped);
        }

        // Read the key maps before the poll; the poll is destructive.
        let (inbound_keys, tenant_keys) = self
            .with_store(|store| Ok((store.inbound_keys()?, store.tenant_keys()?)))
            .await?;

        let snapshot = match self.stats.poll_all().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(error = %e, "Traffic poll failed, skipping cycle");
                metrics::record_poll_failure();
                return Ok(CollectionOutcome::PollFailed);
            }
        };

        let today = Local::now().date_naive();
        self.with_store(move |store| {
            let mut inbounds = 0;
            for (tag, traffic) in &snapshot.inbounds {
                if traffic.is_zero() {
                    continue;
                }
                let Some(&row) = inbound_keys.get(tag) else {
                    tracing::debug!(tag = %tag, "Counter for unknown inbound");
                    continue;
                };
                match store.record_traffic(TrafficSubject::Inbound(row), today, *traffic) {
                    Ok(()) => {
                        inbounds += 1;
                        metrics::record_traffic("inbound", traffic);
                    }
                    Err(e) => tracing::warn!(tag = %tag, error = %e, "Failed to record inbound traffic"),
                }
            }

            let mut tenants = 0;
            for (key, traffic) in &snapshot.tenants {
                if traffic.is_zero() {
                    continue;
                }
                let Some(&row) = tenant_keys.get(key) else {
                    tracing::debug!(tenant = %key, "Counter for unknown tenant");
                    continue;
                };
                match store.record_tenant_traffic(row, today, *traffic) {
                    Ok(()) => {
                        tenants += 1;
                        metrics::record_traffic("user", traffic);
                    }
                    Err(e) => tracing::warn!(tenant = %key, error = %e, "Failed to record tenant traffic"),
                }
            }

            Ok(CollectionOutcome::Recorded { inbounds, tenants })
        })
        .await
    }

    /// Disable expired or over-quota tenants, then reload once if any were.
    pub async fn enforce_quota(&self) -> Result<usize, ControlError> {
        let _guard = self.lock.lock().await;

        let disabled = self
            .with_store(|store| {
                let due = store.tenants_due_for_disable(Utc::now())?;
                let mut disabled = 0;
                for tenant in &due {
                    match store.disable_tenant(tenant.row_id) {
                        Ok(()) => {
                            disabled += 1;
                            tracing::info!(
                                tenant = %tenant.stats_key(),
                                used_bytes = tenant.used_bytes,
                                quota_bytes = tenant.quota_bytes,
                                over_quota = tenant.is_over_quota(),
                                "Tenant disabled"
                            );
                        }
                        Err(e) => tracing::warn!(tenant = %tenant.stats_key(), error = %e, "Failed to disable tenant"),
                    }
                }
                Ok(disabled)
            })
            .await?;

        if disabled > 0 {
            metrics::record_tenants_disabled(disabled);
            match self.engine.reload().await {
                Ok(outcome) => tracing::info!(disabled, outcome = outcome.as_str(), "Engine reloaded after quota pass"),
                Err(e) => tracing::error!(disabled, error = %e, "Engine reload after quota pass failed"),
            }
        }
        Ok(disabled)
    }

    /// Renew auto-renew certificates close to expiry.
    pub async fn renew_certificates(&self) -> Result<RenewalSummary, ControlError> {
        let _guard = self.lock.lock().await;

        let expiring = self.certs.expiring(self.renew_within).await?;
        let mut summary = RenewalSummary::default();
        for cert in expiring.iter().filter(|c| c.auto_renew) {
            match self.certs.renew(cert).await {
                Ok(()) => {
                    summary.renewed += 1;
                    tracing::info!(domain = %cert.domain, "Certificate renewed");
                }
                Err(e) => {
                    summary.failed += 1;
                    tracing::warn!(domain = %cert.domain, error = %e, "Certificate renewal failed");
                }
            }
        }
        Ok(summary)
    }

    /// Snapshot the store and prune old snapshots. Returns the new file.
    pub async fn backup(&self) -> Result<PathBuf, ControlError> {
        let _guard = self.lock.lock().await;

        fs::create_dir_all(&self.backup.dir).await?;
        let path = self.backup.dir.join(backup::file_name(&self.backup.prefix, Local::now()));

        backup::reserve(&path).await?;
        let dest = path.clone();
        if let Err(e) = self.with_store(move |store| Ok(store.snapshot_to(&dest)?)).await {
            if let Err(cleanup) = fs::remove_file(&path).await {
                tracing::warn!(path = %path.display(), error = %cleanup, "Failed to remove partial backup");
            }
            return Err(e);
        }
        fs::set_permissions(&path, Permissions::from_mode(0o600)).await?;
        tracing::info!(path = %path.display(), "Store backed up");

        match backup::prune(&self.backup.dir, &self.backup.prefix, self.backup.retention, SystemTime::now()).await {
            Ok(removed) if removed > 0 => tracing::info!(removed, "Pruned old backups"),
            Ok(_) => {}
            Err(e) => tracing::warn!(dir = %self.backup.dir.display(), error = %e, "Backup pruning failed"),
        }
        Ok(path)
    }

    /// Delete traffic and audit rows past their retention windows.
    pub async fn cleanup(&self) -> Result<CleanupSummary, ControlError> {
        let _guard = self.lock.lock().await;

        let traffic_cutoff = Local::now()
            .date_naive()
            .checked_sub_days(Days::new(u64::from(self.retention.traffic_days)))
            .unwrap_or(NaiveDate::MIN);
        let audit_cutoff = Utc::now() - chrono::Duration::days(i64::from(self.retention.audit_days));

        let summary = self
            .with_store(move |store| {
                let traffic = store.prune_traffic(traffic_cutoff);
                let audit = store.prune_audit(audit_cutoff);
                Ok(CleanupSummary {
                    traffic_rows: traffic?,
                    audit_rows: audit?,
                })
            })
            .await?;
        tracing::info!(
            traffic_rows = summary.traffic_rows,
            audit_rows = summary.audit_rows,
            "Retention cleanup finished"
        );
        Ok(summary)
    }
}
