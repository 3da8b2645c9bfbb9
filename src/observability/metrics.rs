//! Metrics collection and exposition.
//!
//! # Metrics
//! - `steward_engine_state` (gauge, label `state`): 1 for the current state
//! - `steward_engine_reloads_total` (counter, label `outcome`): hot, deferred, restarted, failed
//! - `steward_traffic_bytes_total` (counter, labels `scope`, `direction`)
//! - `steward_stats_poll_failures_total` (counter)
//! - `steward_tenants_disabled_total` (counter)
//! - `steward_task_runs_total` (counter, labels `task`, `result`)
//!
//! # Design Decisions
//! - Helpers wrap the `metrics` macros so call sites stay one line
//! - Without an installed recorder every call is a no-op (tests, metrics off)

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::model::Traffic;

const ENGINE_STATES: [&str; 4] = ["stopped", "starting", "running", "stopping"];

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_engine_state(current: &str) {
    for state in ENGINE_STATES {
        let value = if state == current { 1.0 } else { 0.0 };
        metrics::gauge!("steward_engine_state", "state" => state).set(value);
    }
}

pub fn record_reload(outcome: &'static str) {
    metrics::counter!("steward_engine_reloads_total", "outcome" => outcome).increment(1);
}

pub fn record_traffic(scope: &'static str, traffic: &Traffic) {
    metrics::counter!("steward_traffic_bytes_total", "scope" => scope, "direction" => "uplink")
        .increment(traffic.upload);
    metrics::counter!("steward_traffic_bytes_total", "scope" => scope, "direction" => "downlink")
        .increment(traffic.download);
}

pub fn record_poll_failure() {
    metrics::counter!("steward_stats_poll_failures_total").increment(1);
}

pub fn record_tenants_disabled(count: usize) {
    metrics::counter!("steward_tenants_disabled_total").increment(count as u64);
}

pub fn record_task_run(task: &'static str, ok: bool) {
    let result = if ok { "ok" } else { "error" };
    metrics::counter!("steward_task_runs_total", "task" => task, "result" => result).increment(1);
}
