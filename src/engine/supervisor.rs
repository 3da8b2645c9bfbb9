//! The engine supervisor.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Child;
use tokio::sync::{watch, Mutex};

use crate::config::EngineConfig;
use crate::engine::config_file;
use crate::engine::process::{is_gone, EngineRuntime, EngineSignal};
use crate::engine::state::{EngineState, ReloadOutcome};
use crate::observability::metrics;
use crate::store::{Store, StoreError};
use crate::synth::{ConfigDocument, ControlPlane, SynthesisError, Synthesizer};

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("engine is already running")]
    AlreadyRunning,

    #[error("synthesis failed: {0}")]
    Synthesis(#[from] SynthesisError),

    #[error("engine rejected configuration: {0}")]
    Validation(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("config file error: {0}")]
    Io(#[from] io::Error),

    #[error("engine process error: {0}")]
    Process(String),
}

/// What the control loop needs from the supervisor.
#[async_trait]
pub trait EngineControl: Send + Sync {
    fn is_running(&self) -> bool;

    async fn reload(&self) -> Result<ReloadOutcome, SupervisorError>;
}

#[derive(Debug, Default)]
struct ProcessSlot {
    pid: Option<u32>,
    generation: u64,
}

struct Shared {
    slot: Mutex<ProcessSlot>,
    state: watch::Sender<EngineState>,
}

impl Shared {
    fn publish(&self, state: EngineState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(from = %previous, to = %state, "Engine state changed");
            metrics::record_engine_state(state.as_str());
        }
    }
}

/// Owns the engine process and its configuration file.
pub struct Supervisor {
    runtime: Arc<dyn EngineRuntime>,
    store: Arc<dyn Store>,
    synthesizer: Synthesizer,
    config_path: PathBuf,
    restart_settle: Duration,
    version: String,
    shared: Arc<Shared>,
}

impl Supervisor {
    /// Build a supervisor in the `Stopped` state. Probes the engine version.
    pub async fn new(runtime: Arc<dyn EngineRuntime>, store: Arc<dyn Store>, config: &EngineConfig) -> Self {
        let version = runtime.version().await;
        tracing::info!(version = %version, config_path = %config.config_path, "Engine supervisor ready");

        let (state, _) = watch::channel(EngineState::Stopped);
        Self {
            runtime,
            store,
            synthesizer: Synthesizer::new(ControlPlane {
                listen: config.api_listen.clone(),
                port: config.api_port,
            }),
            config_path: PathBuf::from(&config.config_path),
            restart_settle: Duration::from_millis(config.restart_settle_ms),
            version,
            shared: Arc::new(Shared {
                slot: Mutex::new(ProcessSlot::default()),
                state,
            }),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn state(&self) -> EngineState {
        *self.shared.state.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<EngineState> {
        self.shared.state.subscribe()
    }

    /// The live document as last committed.
    pub async fn current_config(&self) -> Result<serde_json::Value, SupervisorError> {
        Ok(config_file::read_live(&self.config_path).await?)
    }

    /// Synthesize, validate and spawn. Fails fast if a process is running.
    pub async fn start(&self) -> Result<(), SupervisorError> {
        let mut slot = self.shared.slot.lock().await;
        if slot.pid.is_some() {
            return Err(SupervisorError::AlreadyRunning);
        }
        self.start_locked(&mut slot).await
    }

    /// Request graceful termination. No-op when nothing is running.
    pub async fn stop(&self) -> Result<(), SupervisorError> {
        let mut slot = self.shared.slot.lock().await;
        self.stop_locked(&mut slot)
    }

    pub async fn restart(&self) -> Result<(), SupervisorError> {
        {
            let mut slot = self.shared.slot.lock().await;
            self.stop_locked(&mut slot)?;
        }

        tokio::time::sleep(self.restart_settle).await;

        let mut slot = self.shared.slot.lock().await;
        if slot.pid.is_some() {
            // Another caller started the engine during the settle delay; it
            // already runs the latest document.
            tracing::debug!("Engine started concurrently during restart");
            return Ok(());
        }
        self.start_locked(&mut slot).await
    }

    /// Rebuild the document and apply it.
    pub async fn reload(&self) -> Result<ReloadOutcome, SupervisorError> {
        let signal_error = {
            let slot = self.shared.slot.lock().await;
            if let Err(e) = self.write_validated_config().await {
                metrics::record_reload("failed");
                return Err(e);
            }

            let Some(pid) = slot.pid else {
                tracing::info!("Engine not running, new config applies on next start");
                metrics::record_reload(ReloadOutcome::Deferred.as_str());
                return Ok(ReloadOutcome::Deferred);
            };

            match self.runtime.signal(pid, EngineSignal::Reload) {
                Ok(()) => {
                    tracing::info!(pid, "Engine hot-reloaded");
                    metrics::record_reload(ReloadOutcome::Hot.as_str());
                    return Ok(ReloadOutcome::Hot);
                }
                Err(e) => e,
            }
        };

        tracing::warn!(error = %signal_error, "Reload signal failed, restarting engine");
        if let Err(e) = self.restart().await {
            metrics::record_reload("failed");
            return Err(e);
        }
        metrics::record_reload(ReloadOutcome::Restarted.as_str());
        Ok(ReloadOutcome::Restarted)
    }

    async fn start_locked(&self, slot: &mut ProcessSlot) -> Result<(), SupervisorError> {
        self.shared.publish(EngineState::Starting);

        if let Err(e) = self.write_validated_config().await {
            self.shared.publish(EngineState::Stopped);
            return Err(e);
        }

        let child = match self.runtime.spawn(&self.config_path) {
            Ok(child) => child,
            Err(e) => {
                self.shared.publish(EngineState::Stopped);
                return Err(SupervisorError::Process(format!("spawn failed: {}", e)));
            }
        };
        let Some(pid) = child.id() else {
            self.shared.publish(EngineState::Stopped);
            return Err(SupervisorError::Process("engine exited immediately after spawn".to_string()));
        };

        slot.generation += 1;
        slot.pid = Some(pid);
        self.shared.publish(EngineState::Running);
        tracing::info!(pid, generation = slot.generation, "Engine started");

        spawn_monitor(self.shared.clone(), slot.generation, child);
        Ok(())
    }

    fn stop_locked(&self, slot: &mut ProcessSlot) -> Result<(), SupervisorError> {
        let Some(pid) = slot.pid.take() else {
            return Ok(());
        };
        self.shared.publish(EngineState::Stopping);

        let result = match self.runtime.signal(pid, EngineSignal::Terminate) {
            Ok(()) => Ok(()),
            Err(e) if is_gone(&e) => Ok(()),
            Err(e) => {
                tracing::warn!(pid, error = %e, "Graceful stop failed, killing engine");
                match self.runtime.signal(pid, EngineSignal::Kill) {
                    Ok(()) => Ok(()),
                    Err(e) if is_gone(&e) => Ok(()),
                    Err(e) => Err(SupervisorError::Process(format!("cannot signal pid {}: {}", pid, e))),
                }
            }
        };

        self.shared.publish(EngineState::Stopped);
        tracing::info!(pid, "Engine stop requested");
        result
    }

    /// Synthesize, stage, self-test and commit. Caller holds the slot lock.
    async fn write_validated_config(&self) -> Result<(), SupervisorError> {
        let document = self.synthesize().await?;
        let bytes = document.to_json_bytes().map_err(io::Error::from)?;

        let staged = config_file::stage(&self.config_path, &bytes).await?;
        if let Err(diagnostic) = self.runtime.self_test(staged.path()).await {
            staged.discard().await;
            tracing::warn!(diagnostic = %diagnostic, "Engine rejected candidate config");
            return Err(SupervisorError::Validation(diagnostic));
        }
        staged.commit().await?;

        tracing::debug!(path = %self.config_path.display(), inbounds = document.inbounds.len(), "Engine config committed");
        Ok(())
    }

    /// Store reads happen on the blocking pool.
    async fn synthesize(&self) -> Result<ConfigDocument, SupervisorError> {
        let synthesizer = self.synthesizer.clone();
        let store = self.store.clone();
        let document = tokio::task::spawn_blocking(move || synthesizer.synthesize_from(store.as_ref()))
            .await
            .map_err(io::Error::other)?
            .inspect_err(|e| tracing::warn!(tag = e.tag().unwrap_or("-"), error = %e, "Config synthesis failed"))?;
        Ok(document)
    }
}

#[async_trait]
impl EngineControl for Supervisor {
    fn is_running(&self) -> bool {
        Supervisor::is_running(self)
    }

    async fn reload(&self) -> Result<ReloadOutcome, SupervisorError> {
        Supervisor::reload(self).await
    }
}

/// Wait for the process to exit and clear the slot if it is still ours.
fn spawn_monitor(shared: Arc<Shared>, generation: u64, mut child: Child) {
    tokio::spawn(async move {
        let status = child.wait().await;

        let mut slot = shared.slot.lock().await;
        if slot.generation == generation && slot.pid.is_some() {
            slot.pid = None;
            shared.publish(EngineState::Stopped);
            match status {
                Ok(status) => tracing::warn!(generation, status = %status, "Engine exited unexpectedly"),
                Err(e) => tracing::error!(generation, error = %e, "Lost track of engine process"),
            }
        } else {
            tracing::debug!(generation, "Engine process exited");
        }
    });
}
