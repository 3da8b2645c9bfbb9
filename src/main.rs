//! Proxy engine steward.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌────────────────────────────────────────────────────────────┐
//!                 │                       STEWARD                              │
//!                 │                                                            │
//!   SQLite  ◀─────┼──┬── store ◀──────────────┐                                │
//!                 │  │                         │                               │
//!                 │  ▼                         │                               │
//!                 │ synth ──▶ engine::Supervisor ──spawn/signal──▶ engine ─────┼──▶ proxy
//!                 │              ▲                                   │         │     traffic
//!                 │              │ reload (quota, SIGHUP)            │ stats   │
//!                 │              │                                   ▼  API    │
//!                 │           control loop ◀───────────────── stats client     │
//!                 │   traffic · quota · certs · backup · cleanup               │
//!                 │                                                            │
//!                 │  ┌──────────────────────────────────────────────────────┐  │
//!                 │  │ config · lifecycle · observability · resilience      │  │
//!                 │  └──────────────────────────────────────────────────────┘  │
//!                 └────────────────────────────────────────────────────────────┘
//! ```

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use proxy_steward::certs::CommandRenewer;
use proxy_steward::config::{load_config, StewardConfig};
use proxy_steward::control::ControlLoop;
use proxy_steward::engine::{Supervisor, XrayRuntime};
use proxy_steward::lifecycle::shutdown::Shutdown;
use proxy_steward::lifecycle::signals::{SignalEvent, SignalListener};
use proxy_steward::lifecycle::startup::start_engine;
use proxy_steward::observability::{logging, metrics};
use proxy_steward::stats::StatsClient;
use proxy_steward::store::{SqliteStore, Store};
use proxy_steward::synth::{ControlPlane, Synthesizer};

#[derive(Parser)]
#[command(name = "proxy-steward")]
#[command(about = "Supervises a proxy engine and enforces tenant quotas", long_about = None)]
struct Cli {
    /// Service configuration (TOML). Defaults apply when the file is missing.
    #[arg(short, long, default_value = "steward.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Supervise the engine and run the control loop (default)
    Run,
    /// Print the engine document the current store would produce
    Render,
    /// Validate the configuration file and exit
    Check,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let config_found = cli.config.exists();
    let config = if config_found {
        load_config(&cli.config)?
    } else {
        StewardConfig::default()
    };

    logging::init(&config.observability.log_level);
    if !config_found {
        tracing::warn!(path = %cli.config.display(), "Config file not found, using defaults");
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config).await,
        Commands::Render => render(&config),
        Commands::Check => {
            println!("{}: ok", cli.config.display());
            Ok(())
        }
    }
}

async fn run(config: StewardConfig) -> Result<(), Box<dyn Error>> {
    tracing::info!("proxy-steward v{} starting", env!("CARGO_PKG_VERSION"));

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let store: Arc<dyn Store> = Arc::new(SqliteStore::open(&config.database.path)?);
    tracing::info!(path = %config.database.path, "Store opened");

    let engine = &config.engine;
    let runtime = Arc::new(XrayRuntime::new(
        &engine.binary_path,
        engine.assets_path.as_ref().map(PathBuf::from),
        Duration::from_secs(engine.self_test_timeout_secs),
    ));
    let supervisor = Arc::new(Supervisor::new(runtime, store.clone(), engine).await);

    if let Err(e) = start_engine(
        &supervisor,
        engine.start_attempts,
        Duration::from_millis(engine.start_backoff_ms),
    )
    .await
    {
        tracing::error!(error = %e, "Continuing without a running engine");
    }

    let stats = StatsClient::for_control_plane(
        &engine.api_listen,
        engine.api_port,
        Duration::from_secs(config.stats.query_timeout_secs),
        Duration::from_secs(config.stats.bulk_timeout_secs),
    )?;
    let certs = Arc::new(CommandRenewer::new(
        store.clone(),
        config.certificates.renew_command.clone(),
        Duration::from_secs(config.certificates.timeout_secs),
        chrono::Duration::days(i64::from(config.certificates.lifetime_days)),
    ));
    let control = Arc::new(ControlLoop::new(store, supervisor.clone(), stats, certs, &config));

    let shutdown = Shutdown::new();
    let tasks = control.spawn(&shutdown);

    let mut signals = SignalListener::install()?;
    loop {
        match signals.recv().await {
            SignalEvent::Reload => match supervisor.reload().await {
                Ok(outcome) => tracing::info!(outcome = outcome.as_str(), "Reload complete"),
                Err(e) => tracing::error!(error = %e, "Reload failed"),
            },
            SignalEvent::Shutdown => break,
        }
    }

    tracing::info!("Shutting down");
    shutdown.trigger();
    for task in tasks {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "Scheduled task ended abnormally");
        }
    }
    if let Err(e) = supervisor.stop().await {
        tracing::error!(error = %e, "Failed to stop engine");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

fn render(config: &StewardConfig) -> Result<(), Box<dyn Error>> {
    let store = SqliteStore::open(&config.database.path)?;
    let synthesizer = Synthesizer::new(ControlPlane {
        listen: config.engine.api_listen.clone(),
        port: config.engine.api_port,
    });
    let document = synthesizer.synthesize_from(&store)?;
    println!("{}", String::from_utf8(document.to_json_bytes()?)?);
    Ok(())
}
