// src/main.rs
use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod api;
mod calendar;
mod config;
mod engine;
mod error;
mod model;
mod policy;
mod scheduler;
mod store;
mod verification;


use api::AppState;
use calendar::SystemClock;
use config::AppConfig;
use engine::PayrollEngine;
use scheduler::{MonthEndTrigger, RecalcScheduler, RetryPolicy};
use store::{MemoryStore, PayrollStore};

#[derive(Parser, Debug)]
#[command(name = "paycore", about = "Payroll calculation core service")]
struct Args {
    /// Override PAYCORE_BIND_ADDR.
    #[arg(long)]
    bind: Option<String>,
    /// Override PAYCORE_WORKERS.
    #[arg(long)]
    workers: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    let args = Args::parse();
    let mut config = AppConfig::load().context("Failed to load configuration")?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    info!("Starting paycore with config {:?}", config);

    // Collaborator subsystems populate the store out of band; the engine
    // only reads their approved snapshots and owns the payroll ledger.
    let store: Arc<dyn PayrollStore> = Arc::new(MemoryStore::new());
    let engine = Arc::new(PayrollEngine::new(Arc::clone(&store), config.calendar()));
    let retry = RetryPolicy {
        max_attempts: config.retry_max_attempts,
        base_delay: Duration::from_millis(config.retry_base_delay_ms),
    };
    let scheduler = Arc::new(RecalcScheduler::start(
        Arc::clone(&engine),
        retry,
        config.workers,
    ));

    let trigger_handle = MonthEndTrigger::new(
        Arc::clone(&scheduler),
        Arc::clone(&store),
        Arc::new(SystemClock),
        Duration::from_secs(config.trigger_tick_secs),
    )
    .spawn();

    let app = api::router(AppState {
        engine,
        scheduler: Arc::clone(&scheduler),
        store,
    });

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!("Listening on {}", config.bind_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("Server terminated")?;

    // Drain in-flight recalculation jobs before exiting. The router is
    // gone at this point and the trigger task is stopped below, so ours
    // is the last scheduler handle.
    info!("Shutting down; draining recalculation workers");
    trigger_handle.abort();
    let _ = trigger_handle.await;
    match Arc::try_unwrap(scheduler) {
        Ok(scheduler) => scheduler.shutdown().await,
        Err(_) => tracing::warn!("Recalculation scheduler still referenced; skipping drain"),
    }
    Ok(())
}
