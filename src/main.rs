//! JobHub Server: background job scheduling service
//!
//! Main entry point that wires the crates together, runs the scheduler and
//! shuts it down gracefully.

use std::path::Path;
use std::time::Duration;

use tracing;
use tracing_subscriber::{EnvFilter, fmt};

use jobhub_core::config::AppConfig;
use jobhub_core::error::AppError;
use jobhub_worker::jobs::TempCleanup;
use jobhub_worker::{CronScheduler, RecurringJob, Scheduler};

/// Scratch directory swept by the daily temp cleanup.
const TEMP_DIR: &str = "data/temp";

#[tokio::main]
async fn main() {
    let config = match load_configuration() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if let Err(e) = run(config).await {
        tracing::error!(error = %e, "Server error");
        std::process::exit(1);
    }
}

/// Load configuration from file and environment
fn load_configuration() -> Result<AppConfig, AppError> {
    let config_path =
        std::env::var("JOBHUB_CONFIG").unwrap_or_else(|_| "config/default.toml".to_string());
    let env = std::env::var("JOBHUB_ENV").unwrap_or_else(|_| "development".to_string());

    AppConfig::load(&config_path, &env)
}

/// Initialize tracing/logging
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

/// Main server run function
async fn run(config: AppConfig) -> Result<(), AppError> {
    tracing::info!("Starting JobHub v{}", env!("CARGO_PKG_VERSION"));

    if !config.scheduler.enabled {
        tracing::warn!("Background job scheduler is disabled by configuration");
        return Ok(());
    }

    create_data_directories(&config).await?;

    // ── Step 1: Scheduler ────────────────────────────────────────
    let scheduler = Scheduler::from_app_config(&config);

    // Must run before the first write replaces the previous state.
    scheduler.previous_pending().await?;

    scheduler.start()?;

    // ── Step 2: Recurring jobs ───────────────────────────────────
    let cron = CronScheduler::new(scheduler.clone()).await?;
    cron.register_retention_sweep(&config.retention).await?;
    cron.register(
        RecurringJob::new(
            "temp-cleanup",
            "0 30 3 * * *",
            std::sync::Arc::new(TempCleanup::new(TEMP_DIR, Duration::from_secs(24 * 3600))),
        )
        .priority(0)
        .max_retries(1),
    )
    .await?;
    cron.start().await?;

    tracing::info!(
        max_workers = config.scheduler.max_workers,
        persistence = %config.persistence.path,
        "JobHub ready"
    );

    // ── Step 3: Graceful shutdown ────────────────────────────────
    shutdown_signal().await?;
    tracing::info!("Shutdown signal received, starting graceful shutdown...");

    if let Err(e) = cron.shutdown().await {
        tracing::warn!(error = %e, "Cron scheduler did not shut down cleanly");
    }
    scheduler.stop().await?;

    let stats = scheduler.stats();
    tracing::info!(
        total = stats.total,
        queued = stats.queue_size,
        "JobHub shut down gracefully"
    );
    Ok(())
}

/// Create required data directories
async fn create_data_directories(config: &AppConfig) -> Result<(), AppError> {
    let mut dirs = vec![TEMP_DIR.to_string()];
    if config.persistence.enabled {
        if let Some(parent) = Path::new(&config.persistence.path).parent() {
            dirs.push(parent.display().to_string());
        }
    }

    for dir in dirs.iter().filter(|d| !d.is_empty()) {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| AppError::internal(format!("Failed to create dir '{}': {}", dir, e)))?;
    }

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() -> Result<(), AppError> {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = ctrl_c => result?,
            _ = terminate.recv() => {},
        }
    }

    #[cfg(not(unix))]
    ctrl_c.await?;

    Ok(())
}
