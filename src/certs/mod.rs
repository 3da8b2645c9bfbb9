//! Certificate renewal collaborator.
//!
//! # Responsibilities
//! - List active certificates close to expiry
//! - Renew one certificate at a time and record the outcome: a renewed
//!   certificate gets a fresh expiry, a failed one is marked `error`
//!
//! # Design Decisions
//! - Acquisition itself is delegated to an operator-supplied command
//!   (`certificates.renew_command`, `{domain}` substituted); this crate
//!   never speaks ACME
//! - Every renewal is bounded by a timeout and the child is killed on expiry
//! - The command reports only success, so the new expiry is now plus the
//!   configured certificate lifetime

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::process::Command;

use crate::model::{Certificate, RowId};
use crate::store::{Store, StoreError};

const DOMAIN_PLACEHOLDER: &str = "{domain}";

#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("no renewal command configured")]
    NotConfigured,

    #[error("cannot run renewal command: {0}")]
    Spawn(#[from] io::Error),

    #[error("renewal timed out after {0:?}")]
    Timeout(Duration),

    #[error("renewal for {domain} failed ({status}): {output}")]
    Failed {
        domain: String,
        status: String,
        output: String,
    },
}

#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    /// Active certificates that expire within `within` from now.
    async fn expiring(&self, within: chrono::Duration) -> Result<Vec<Certificate>, CertificateError>;

    async fn renew(&self, certificate: &Certificate) -> Result<(), CertificateError>;
}

/// Renews by running a configured command per certificate.
pub struct CommandRenewer {
    store: Arc<dyn Store>,
    command: Vec<String>,
    timeout: Duration,
    lifetime: chrono::Duration,
}

impl CommandRenewer {
    pub fn new(store: Arc<dyn Store>, command: Vec<String>, timeout: Duration, lifetime: chrono::Duration) -> Self {
        Self {
            store,
            command,
            timeout,
            lifetime,
        }
    }

    async fn run(&self, certificate: &Certificate, argv: &[String]) -> Result<(), CertificateError> {
        let (program, args) = argv.split_first().ok_or(CertificateError::NotConfigured)?;

        tracing::info!(domain = %certificate.domain, program = %program, "Renewing certificate");
        let output = Command::new(program).args(args).kill_on_drop(true).output();
        let output = tokio::time::timeout(self.timeout, output)
            .await
            .map_err(|_| CertificateError::Timeout(self.timeout))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let text = if stderr.trim().is_empty() { stdout } else { stderr };
            return Err(CertificateError::Failed {
                domain: certificate.domain.clone(),
                status: output.status.to_string(),
                output: text.trim().to_string(),
            });
        }
        Ok(())
    }

    async fn with_store<T, F>(&self, work: F) -> Result<T, CertificateError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Store) -> Result<T, StoreError> + Send + 'static,
    {
        let store = self.store.clone();
        let result = tokio::task::spawn_blocking(move || work(store.as_ref()))
            .await
            .map_err(io::Error::other)?;
        Ok(result?)
    }

    async fn record_failure(&self, id: RowId, error: &CertificateError) {
        let message = error.to_string();
        if let Err(e) = self
            .with_store(move |store| store.mark_certificate_failed(id, &message))
            .await
        {
            tracing::warn!(certificate = id, error = %e, "Failed to record renewal failure");
        }
    }

    fn argv(&self, domain: &str) -> Option<Vec<String>> {
        if self.command.is_empty() {
            return None;
        }
        Some(
            self.command
                .iter()
                .map(|arg| arg.replace(DOMAIN_PLACEHOLDER, domain))
                .collect(),
        )
    }
}

#[async_trait]
impl CertificateAuthority for CommandRenewer {
    async fn expiring(&self, within: chrono::Duration) -> Result<Vec<Certificate>, CertificateError> {
        let horizon = Utc::now() + within;
        self.with_store(move |store| store.expiring_certificates(horizon)).await
    }

    async fn renew(&self, certificate: &Certificate) -> Result<(), CertificateError> {
        // Nothing ran: the certificate itself is not at fault.
        let argv = self.argv(&certificate.domain).ok_or(CertificateError::NotConfigured)?;

        if let Err(e) = self.run(certificate, &argv).await {
            self.record_failure(certificate.id, &e).await;
            return Err(e);
        }

        let id = certificate.id;
        let expires_at = Utc::now() + self.lifetime;
        self.with_store(move |store| store.mark_certificate_renewed(id, expires_at))
            .await?;
        tracing::info!(domain = %certificate.domain, expires_at = %expires_at, "Certificate expiry updated");
        Ok(())
    }
}
