//! OS signal handling.
//!
//! # Responsibilities
//! - Register signal handlers (SIGTERM, SIGINT, SIGHUP)
//! - Translate signals to internal events
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - SIGHUP triggers an engine config reload, not shutdown

use std::io;

use tokio::signal::unix::{signal, Signal, SignalKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalEvent {
    Shutdown,
    Reload,
}

pub struct SignalListener {
    terminate: Signal,
    interrupt: Signal,
    hangup: Signal,
}

impl SignalListener {
    pub fn install() -> io::Result<Self> {
        Ok(Self {
            terminate: signal(SignalKind::terminate())?,
            interrupt: signal(SignalKind::interrupt())?,
            hangup: signal(SignalKind::hangup())?,
        })
    }

    /// Wait for the next signal of interest.
    pub async fn recv(&mut self) -> SignalEvent {
        tokio::select! {
            _ = self.terminate.recv() => {
                tracing::info!("Received SIGTERM");
                SignalEvent::Shutdown
            }
            _ = self.interrupt.recv() => {
                tracing::info!("Received SIGINT");
                SignalEvent::Shutdown
            }
            received = self.hangup.recv() => match received {
                Some(()) => {
                    tracing::info!("Received SIGHUP");
                    SignalEvent::Reload
                }
                None => SignalEvent::Shutdown,
            },
        }
    }
}
