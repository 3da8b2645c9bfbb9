//! Engine process supervision.
//!
//! # Data Flow
//! ```text
//! start():
//!     store → synth (document) → config_file::stage (0600, hidden sibling)
//!         → runtime.self_test(staged) → commit (rename over live path)
//!         → runtime.spawn → monitor task (waits on exit)
//!
//! reload():
//!     [under lock]  synthesize → stage → self-test → commit → SIGHUP
//!     [no lock]     signal failed → restart()
//! ```
//!
//! # States
//! ```text
//! Stopped → Starting → Running → Stopping → Stopped
//!                         │
//!                         └── process exits on its own → Stopped (monitor)
//! ```
//!
//! # Design Decisions
//! - One async mutex guards the process slot and the write-then-validate
//!   sequence, so concurrent start/reload calls cannot interleave
//! - State is published on a `watch` channel: reads never block on the lock
//! - Each spawned process carries a generation number; a monitor only
//!   clears the slot for its own generation
//! - A failed synthesis or self-test never touches the live config file or
//!   the running process

pub mod config_file;
pub mod process;
pub mod state;
pub mod supervisor;

pub use process::{EngineRuntime, EngineSignal, XrayRuntime};
pub use state::{EngineState, ReloadOutcome};
pub use supervisor::{EngineControl, Supervisor, SupervisorError};
