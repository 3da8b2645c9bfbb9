//! Startup orchestration.
//!
//! # Responsibilities
//! - Bring the engine up with a bounded number of attempts
//!
//! # Design Decisions
//! - Backoff between attempts is exponential with jitter
//! - An engine that is already running counts as started

use std::time::Duration;

use crate::engine::{Supervisor, SupervisorError};
use crate::resilience::backoff::calculate_backoff;

/// Call `start` up to `attempts` times. Returns the last error on failure.
pub async fn start_engine(supervisor: &Supervisor, attempts: u32, backoff_base: Duration) -> Result<(), SupervisorError> {
    let attempts = attempts.max(1);
    let base_ms = u64::try_from(backoff_base.as_millis()).unwrap_or(u64::MAX);
    let max_ms = base_ms.saturating_mul(8);

    let mut attempt = 1;
    loop {
        match supervisor.start().await {
            Ok(()) | Err(SupervisorError::AlreadyRunning) => {
                tracing::info!(attempt, version = supervisor.version(), "Engine is up");
                return Ok(());
            }
            Err(e) if attempt >= attempts => {
                tracing::error!(attempts, error = %e, "Engine failed to start");
                return Err(e);
            }
            Err(e) => {
                let delay = calculate_backoff(attempt, base_ms, max_ms);
                tracing::warn!(attempt, attempts, delay_ms = delay.as_millis() as u64, error = %e, "Engine start failed, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
