use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::signal::unix::SignalKind;

mod config;
mod core;
mod scheduler;

use config::AppConfig;
use core::Core;
use scheduler::Scheduler;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load .env, init tracing
    dotenvy::dotenv().ok();

    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    }

    // Panic hook: log panic info before crashing
    std::panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
        tracing::error!("PANIC: {info}");
    }));

    tracing::info!("Starting MarketPulse signal pipeline");

    // 2. Load and validate configuration; missing settings are fatal
    let config = AppConfig::from_env()?;
    tracing::info!("Configuration loaded and validated");
    tracing::info!("  Symbols: {}", config.watch_symbols.join(", "));
    tracing::info!(
        "  Timeframes: {}",
        config
            .watch_timeframes
            .iter()
            .map(|t| t.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    tracing::info!("  Outcome pass: every {}s", config.outcome_tick_seconds);
    tracing::info!(
        "  Slow query threshold: {:.1}s",
        config.slow_query_threshold_seconds
    );
    tracing::info!(
        "  Pool: {}..{} (+{} overflow), adjust every {}s",
        config.pool.min_size,
        config.pool.max_size,
        config.pool.max_overflow,
        config.pool.adjustment_interval_seconds
    );

    let grace = Duration::from_secs(config.shutdown_grace_seconds);

    // 3. Boot the core: pool, schemas, monitors, components. Failure here
    // exits non-zero.
    let core = Arc::new(Core::start(config).await?);

    // 4. Start the periodic tasks
    let scheduler = Scheduler::start(core.clone());

    tracing::info!("Pipeline is running. Press Ctrl+C to stop.");

    // 5. Wait for SIGINT or SIGTERM
    let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received SIGINT");
        }
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
    }

    // 6. Graceful shutdown: stop the task group, drain the slow-query batch,
    // dispose the pool
    tracing::info!("Shutdown signal received, stopping tasks...");
    scheduler.shutdown(grace).await;
    core.shutdown().await;

    tracing::info!("MarketPulse shut down.");
    Ok(())
}
