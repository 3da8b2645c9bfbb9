use std::fmt;

/// Lifecycle of the supervised engine process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl EngineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineState::Stopped => "stopped",
            EngineState::Starting => "starting",
            EngineState::Running => "running",
            EngineState::Stopping => "stopping",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, EngineState::Running)
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a successful reload took effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// Running engine accepted the reload signal.
    Hot,
    /// Engine not running; the new document applies on next start.
    Deferred,
    /// Signal delivery failed and the engine was restarted instead.
    Restarted,
}

impl ReloadOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReloadOutcome::Hot => "hot",
            ReloadOutcome::Deferred => "deferred",
            ReloadOutcome::Restarted => "restarted",
        }
    }
}
