//! OS-level engine process control.
//!
//! # Responsibilities
//! - Probe the engine version
//! - Run the engine's self-test against a candidate document
//! - Spawn the engine and deliver signals to it

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};

const ASSET_ENV: &str = "XRAY_LOCATION_ASSET";
const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Signals the supervisor sends to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineSignal {
    /// Re-read configuration from disk.
    Reload,
    /// Graceful termination.
    Terminate,
    Kill,
}

impl EngineSignal {
    fn raw(self) -> libc::c_int {
        match self {
            EngineSignal::Reload => libc::SIGHUP,
            EngineSignal::Terminate => libc::SIGTERM,
            EngineSignal::Kill => libc::SIGKILL,
        }
    }
}

/// Deliver `signal` to `pid`.
pub fn send_signal(pid: u32, signal: EngineSignal) -> io::Result<()> {
    let pid = libc::pid_t::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    // SAFETY: kill(2) has no memory-safety preconditions.
    let rc = unsafe { libc::kill(pid, signal.raw()) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// True when a signal failed because the process no longer exists.
pub fn is_gone(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::ESRCH)
}

/// The external engine, as seen by the supervisor.
#[async_trait]
pub trait EngineRuntime: Send + Sync {
    /// Version string, or "unknown".
    async fn version(&self) -> String;

    /// Validate a document without running it. `Err` carries the engine's
    /// diagnostic output.
    async fn self_test(&self, config: &Path) -> Result<(), String>;

    /// Start the engine on `config`. The returned child is owned by the
    /// liveness monitor.
    fn spawn(&self, config: &Path) -> io::Result<Child>;

    fn signal(&self, pid: u32, signal: EngineSignal) -> io::Result<()>;
}

/// Runtime for an Xray-compatible binary.
#[derive(Debug, Clone)]
pub struct XrayRuntime {
    binary: PathBuf,
    assets: Option<PathBuf>,
    self_test_timeout: Duration,
}

impl XrayRuntime {
    pub fn new(binary: impl Into<PathBuf>, assets: Option<PathBuf>, self_test_timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            assets,
            self_test_timeout,
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        if let Some(assets) = &self.assets {
            cmd.env(ASSET_ENV, assets);
        }
        cmd.stdin(Stdio::null());
        cmd
    }
}

#[async_trait]
impl EngineRuntime for XrayRuntime {
    async fn version(&self) -> String {
        let mut cmd = self.command();
        cmd.arg("version").kill_on_drop(true);
        match tokio::time::timeout(VERSION_PROBE_TIMEOUT, cmd.output()).await {
            Ok(Ok(output)) => parse_version(&String::from_utf8_lossy(&output.stdout)),
            Ok(Err(e)) => {
                tracing::warn!(binary = %self.binary.display(), error = %e, "Engine version probe failed");
                UNKNOWN_VERSION.to_string()
            }
            Err(_) => {
                tracing::warn!(binary = %self.binary.display(), "Engine version probe timed out");
                UNKNOWN_VERSION.to_string()
            }
        }
    }

    async fn self_test(&self, config: &Path) -> Result<(), String> {
        let mut cmd = self.command();
        cmd.arg("-test").arg("-c").arg(config).kill_on_drop(true);

        let output = tokio::time::timeout(self.self_test_timeout, cmd.output())
            .await
            .map_err(|_| format!("self-test timed out after {:?}", self.self_test_timeout))?
            .map_err(|e| format!("cannot run {}: {}", self.binary.display(), e))?;

        if output.status.success() {
            return Ok(());
        }
        let mut diagnostic = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            if !diagnostic.is_empty() {
                diagnostic.push('\n');
            }
            diagnostic.push_str(stderr.trim());
        }
        if diagnostic.is_empty() {
            diagnostic = format!("self-test exited with {}", output.status);
        }
        Err(diagnostic)
    }

    fn spawn(&self, config: &Path) -> io::Result<Child> {
        self.command()
            .arg("run")
            .arg("-c")
            .arg(config)
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
    }

    fn signal(&self, pid: u32, signal: EngineSignal) -> io::Result<()> {
        send_signal(pid, signal)
    }
}

pub const UNKNOWN_VERSION: &str = "unknown";

/// Second whitespace field of the first line, e.g. `Xray 1.8.4 (Xray, Penetrates Everything.)`.
pub fn parse_version(output: &str) -> String {
    output
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .map(str::to_string)
        .unwrap_or_else(|| UNKNOWN_VERSION.to_string())
}
