//! Engine supervisor lifecycle tests against a fake runtime.

use std::os::unix::fs::PermissionsExt;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use proxy_steward::engine::config_file::staging_path;
use proxy_steward::engine::process::send_signal;
use proxy_steward::engine::{EngineSignal, EngineState, ReloadOutcome, Supervisor, SupervisorError};
use proxy_steward::lifecycle::startup::start_engine;
use proxy_steward::model::{InboundDefinition, Protocol, SettingsBlob};
use proxy_steward::store::SqliteStore;

mod common;

struct Harness {
    runtime: Arc<common::FakeRuntime>,
    store: Arc<SqliteStore>,
    supervisor: Supervisor,
    dir: std::path::PathBuf,
}

async fn harness(name: &str) -> Harness {
    let dir = common::temp_dir(name);
    let runtime = common::FakeRuntime::new();
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let supervisor = Supervisor::new(runtime.clone(), store.clone(), &common::engine_config(&dir)).await;
    Harness {
        runtime,
        store,
        supervisor,
        dir,
    }
}

#[tokio::test]
async fn test_start_and_stop() {
    let h = harness("start-stop").await;
    assert_eq!(h.supervisor.version(), "1.8.4-test");
    assert_eq!(h.supervisor.state(), EngineState::Stopped);

    h.supervisor.start().await.unwrap();
    assert!(h.supervisor.is_running());

    let doc = h.supervisor.current_config().await.unwrap();
    assert_eq!(doc["inbounds"][0]["tag"], "api");
    assert_eq!(doc["inbounds"][0]["port"], 10085);
    let mode = std::fs::metadata(h.supervisor.config_path()).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode, 0o600);

    let mut rx = h.supervisor.subscribe();
    h.supervisor.stop().await.unwrap();
    assert_eq!(h.supervisor.state(), EngineState::Stopped);
    common::wait_for_state(&mut rx, EngineState::Stopped).await;

    // Second stop is a no-op.
    h.supervisor.stop().await.unwrap();
    assert_eq!(h.runtime.spawns.load(Ordering::SeqCst), 1);
    std::fs::remove_dir_all(h.dir).unwrap();
}

#[tokio::test]
async fn test_concurrent_start_spawns_once() {
    let h = harness("concurrent").await;

    let (a, b) = tokio::join!(h.supervisor.start(), h.supervisor.start());
    let results = [a, b];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(SupervisorError::AlreadyRunning))));
    assert_eq!(h.runtime.spawns.load(Ordering::SeqCst), 1);

    h.supervisor.stop().await.unwrap();
    std::fs::remove_dir_all(h.dir).unwrap();
}

#[tokio::test]
async fn test_failed_self_test_never_spawns() {
    let h = harness("self-test").await;
    h.runtime.fail_self_test.store(true, Ordering::SeqCst);

    let err = h.supervisor.start().await.unwrap_err();
    assert!(matches!(err, SupervisorError::Validation(_)));
    assert_eq!(h.supervisor.state(), EngineState::Stopped);
    assert_eq!(h.runtime.spawns.load(Ordering::SeqCst), 0);
    assert!(!h.supervisor.config_path().exists());
    assert!(!staging_path(h.supervisor.config_path()).exists());
    std::fs::remove_dir_all(h.dir).unwrap();
}

#[tokio::test]
async fn test_reload_failure_is_non_destructive() {
    let h = harness("non-destructive").await;
    h.supervisor.start().await.unwrap();
    let before = h.supervisor.current_config().await.unwrap();

    common::add_inbound(&h.store, "late-in", Protocol::Vless, 24001);
    h.runtime.fail_self_test.store(true, Ordering::SeqCst);

    let err = h.supervisor.reload().await.unwrap_err();
    assert!(matches!(err, SupervisorError::Validation(_)));
    assert!(h.supervisor.is_running());
    assert_eq!(h.supervisor.current_config().await.unwrap(), before);
    assert!(!staging_path(h.supervisor.config_path()).exists());

    // The candidate that was rejected did contain the new inbound.
    let rejected = h.runtime.validated.lock().last().cloned().unwrap();
    assert!(rejected["inbounds"].as_array().unwrap().iter().any(|ib| ib["tag"] == "late-in"));

    h.supervisor.stop().await.unwrap();
    std::fs::remove_dir_all(h.dir).unwrap();
}

#[tokio::test]
async fn test_synthesis_failure_is_non_destructive() {
    let h = harness("synthesis").await;
    h.supervisor.start().await.unwrap();
    let before = h.supervisor.current_config().await.unwrap();

    h.store
        .add_inbound(&InboundDefinition {
            id: 0,
            tag: "broken-in".to_string(),
            protocol: Protocol::Vmess,
            listen: "0.0.0.0".to_string(),
            port: 24002,
            enabled: true,
            settings: SettingsBlob::default(),
            stream_settings: SettingsBlob::from("{\"network\":"),
            sniffing: SettingsBlob::default(),
        })
        .unwrap();

    let err = h.supervisor.reload().await.unwrap_err();
    match err {
        SupervisorError::Synthesis(e) => assert_eq!(e.tag(), Some("broken-in")),
        other => panic!("unexpected error: {other}"),
    }
    assert!(h.supervisor.is_running());
    assert_eq!(h.supervisor.current_config().await.unwrap(), before);
    assert_eq!(h.runtime.self_tests.load(Ordering::SeqCst), 1);

    h.supervisor.stop().await.unwrap();
    std::fs::remove_dir_all(h.dir).unwrap();
}

#[tokio::test]
async fn test_hot_reload_and_deferred_reload() {
    let h = harness("hot").await;

    // Not running: document written, nothing signalled.
    assert_eq!(h.supervisor.reload().await.unwrap(), ReloadOutcome::Deferred);
    assert!(h.supervisor.config_path().exists());
    assert!(!h.supervisor.is_running());

    h.supervisor.start().await.unwrap();
    assert_eq!(h.supervisor.reload().await.unwrap(), ReloadOutcome::Hot);
    assert_eq!(h.runtime.reload_signals.load(Ordering::SeqCst), 1);
    assert_eq!(h.runtime.spawns.load(Ordering::SeqCst), 1);

    h.supervisor.stop().await.unwrap();
    std::fs::remove_dir_all(h.dir).unwrap();
}

#[tokio::test]
async fn test_reload_falls_back_to_restart_when_signal_fails() {
    let h = harness("fallback").await;
    let inbound = common::add_inbound(&h.store, "vmess-in", Protocol::Vmess, 24003);
    h.supervisor.start().await.unwrap();
    let first_pid = h.runtime.last_pid();

    let (tenant, id) = common::add_tenant(&h.store, "carol", 0, 0);
    h.store.attach(inbound, tenant).unwrap();
    h.runtime.fail_reload_signal.store(true, Ordering::SeqCst);

    assert_eq!(h.supervisor.reload().await.unwrap(), ReloadOutcome::Restarted);
    assert!(h.supervisor.is_running());
    assert_eq!(h.runtime.spawns.load(Ordering::SeqCst), 2);
    assert_ne!(h.runtime.last_pid(), first_pid);

    let doc = h.supervisor.current_config().await.unwrap();
    assert_eq!(common::client_ids(&doc, "vmess-in"), vec![id.to_string()]);

    h.supervisor.stop().await.unwrap();
    std::fs::remove_dir_all(h.dir).unwrap();
}

#[tokio::test]
async fn test_crash_is_detected_and_restart_possible() {
    let h = harness("crash").await;
    h.supervisor.start().await.unwrap();
    let mut rx = h.supervisor.subscribe();

    send_signal(h.runtime.last_pid(), EngineSignal::Kill).unwrap();
    common::wait_for_state(&mut rx, EngineState::Stopped).await;
    assert!(!h.supervisor.is_running());

    h.supervisor.start().await.unwrap();
    assert!(h.supervisor.is_running());
    assert_eq!(h.runtime.spawns.load(Ordering::SeqCst), 2);

    h.supervisor.stop().await.unwrap();
    std::fs::remove_dir_all(h.dir).unwrap();
}

#[tokio::test]
async fn test_old_monitor_does_not_clear_new_process() {
    let h = harness("generation").await;
    h.supervisor.start().await.unwrap();
    h.supervisor.restart().await.unwrap();

    // Give the first process's monitor time to observe its exit.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(h.supervisor.is_running());
    assert_eq!(h.runtime.spawns.load(Ordering::SeqCst), 2);

    h.supervisor.stop().await.unwrap();
    std::fs::remove_dir_all(h.dir).unwrap();
}

#[tokio::test]
async fn test_start_engine_gives_up_after_bounded_attempts() {
    let h = harness("retries").await;
    h.runtime.fail_self_test.store(true, Ordering::SeqCst);

    let err = start_engine(&h.supervisor, 3, Duration::from_millis(10)).await.unwrap_err();
    assert!(matches!(err, SupervisorError::Validation(_)));
    assert_eq!(h.runtime.self_tests.load(Ordering::SeqCst), 3);

    h.runtime.fail_self_test.store(false, Ordering::SeqCst);
    start_engine(&h.supervisor, 3, Duration::from_millis(10)).await.unwrap();
    // Already running counts as started.
    start_engine(&h.supervisor, 3, Duration::from_millis(10)).await.unwrap();
    assert_eq!(h.runtime.spawns.load(Ordering::SeqCst), 1);

    h.supervisor.stop().await.unwrap();
    std::fs::remove_dir_all(h.dir).unwrap();
}
