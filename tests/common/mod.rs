//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::process::{Child, Command};
use tokio::sync::watch;

use proxy_steward::config::EngineConfig;
use proxy_steward::engine::process::send_signal;
use proxy_steward::engine::{EngineRuntime, EngineSignal, EngineState};
use proxy_steward::model::{InboundDefinition, Protocol, RowId, SettingsBlob, TenantCredential};
use proxy_steward::store::SqliteStore;

/// Start a programmable stats endpoint on an ephemeral loopback port.
///
/// `f` receives the request target (path and query) and returns status and body.
pub async fn start_stats_endpoint<F>(f: F) -> SocketAddr
where
    F: Fn(&str) -> (u16, String) + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        let mut buf = Vec::new();
                        let mut chunk = [0u8; 1024];
                        while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                            match socket.read(&mut chunk).await {
                                Ok(0) | Err(_) => return,
                                Ok(n) => buf.extend_from_slice(&chunk[..n]),
                            }
                        }
                        let head = String::from_utf8_lossy(&buf);
                        let target = head.split_whitespace().nth(1).unwrap_or("/").to_string();

                        let (status, body) = f(&target);
                        let status_text = match status {
                            200 => "200 OK",
                            404 => "404 Not Found",
                            500 => "500 Internal Server Error",
                            503 => "503 Service Unavailable",
                            _ => "200 OK",
                        };
                        let response = format!(
                            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// Body of a bulk stats response.
pub fn bulk_body(counters: &[(&str, i64)]) -> String {
    let stat: Vec<_> = counters
        .iter()
        .map(|(name, value)| serde_json::json!({ "name": name, "value": value }))
        .collect();
    serde_json::json!({ "stat": stat }).to_string()
}

/// Engine runtime that runs `sleep` instead of a proxy and can be told to
/// misbehave.
#[derive(Default)]
pub struct FakeRuntime {
    pub fail_self_test: AtomicBool,
    pub fail_reload_signal: AtomicBool,
    pub spawns: AtomicU32,
    pub reload_signals: AtomicU32,
    pub self_tests: AtomicU32,
    pub pids: Mutex<Vec<u32>>,
    /// Documents seen by self-test, in order.
    pub validated: Mutex<Vec<serde_json::Value>>,
}

impl FakeRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn last_pid(&self) -> u32 {
        *self.pids.lock().last().expect("no process spawned")
    }
}

#[async_trait]
impl EngineRuntime for FakeRuntime {
    async fn version(&self) -> String {
        "1.8.4-test".to_string()
    }

    async fn self_test(&self, config: &Path) -> Result<(), String> {
        self.self_tests.fetch_add(1, Ordering::SeqCst);
        let raw = tokio::fs::read(config).await.map_err(|e| e.to_string())?;
        let doc: serde_json::Value = serde_json::from_slice(&raw).map_err(|e| e.to_string())?;
        self.validated.lock().push(doc);
        if self.fail_self_test.load(Ordering::SeqCst) {
            return Err("Failed to start: main: failed to load config files".to_string());
        }
        Ok(())
    }

    fn spawn(&self, _config: &Path) -> io::Result<Child> {
        let child = Command::new("sleep").arg("30").kill_on_drop(true).spawn()?;
        if let Some(pid) = child.id() {
            self.pids.lock().push(pid);
        }
        self.spawns.fetch_add(1, Ordering::SeqCst);
        Ok(child)
    }

    fn signal(&self, pid: u32, signal: EngineSignal) -> io::Result<()> {
        match signal {
            EngineSignal::Reload => {
                if self.fail_reload_signal.load(Ordering::SeqCst) {
                    return Err(io::Error::new(io::ErrorKind::PermissionDenied, "simulated signal failure"));
                }
                self.reload_signals.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            other => send_signal(pid, other),
        }
    }
}

/// Fresh scratch directory under the system temp dir.
pub fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("steward-it-{}-{}", name, uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

pub fn engine_config(dir: &Path) -> EngineConfig {
    EngineConfig {
        config_path: dir.join("config.json").display().to_string(),
        restart_settle_ms: 50,
        ..EngineConfig::default()
    }
}

pub fn add_inbound(store: &SqliteStore, tag: &str, protocol: Protocol, port: u16) -> RowId {
    store
        .add_inbound(&InboundDefinition {
            id: 0,
            tag: tag.to_string(),
            protocol,
            listen: "0.0.0.0".to_string(),
            port,
            enabled: true,
            settings: SettingsBlob::default(),
            stream_settings: SettingsBlob::default(),
            sniffing: SettingsBlob::default(),
        })
        .unwrap()
}

pub fn add_tenant(store: &SqliteStore, label: &str, quota_bytes: u64, used_bytes: u64) -> (RowId, uuid::Uuid) {
    let id = uuid::Uuid::new_v4();
    let row = store
        .add_tenant(&TenantCredential {
            row_id: 0,
            id,
            label: label.to_string(),
            enabled: true,
            quota_bytes,
            used_bytes,
            expires_at: None,
        })
        .unwrap();
    (row, id)
}

/// Wait until the watched state equals `want`.
pub async fn wait_for_state(rx: &mut watch::Receiver<EngineState>, want: EngineState) {
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == want))
        .await
        .expect("timed out waiting for engine state")
        .expect("supervisor dropped");
}

/// IDs listed in an inbound's `settings.clients` in a raw document.
pub fn client_ids(doc: &serde_json::Value, tag: &str) -> Vec<String> {
    doc["inbounds"]
        .as_array()
        .into_iter()
        .flatten()
        .filter(|ib| ib["tag"] == tag)
        .flat_map(|ib| ib["settings"]["clients"].as_array().cloned().unwrap_or_default())
        .filter_map(|c| c["id"].as_str().or_else(|| c["password"].as_str()).map(str::to_string))
        .collect()
}
