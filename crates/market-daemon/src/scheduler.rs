//! Periodic task ownership.
//!
//! Every loop lives in one `JoinSet` behind a shared `CancellationToken`.
//! Symbol work runs under a bounded semaphore so a wide watchlist cannot
//! stampede the provider or the database. Shutdown cancels the token, waits
//! out the grace period, then abandons stragglers.

use std::sync::Arc;
use std::time::Duration;

use alert_dispatcher::{Alert, AlertLevel};
use anyhow::Result;
use market_core::Timeframe;
use price_cache::AppendOutcome;
use serde_json::json;
use signal_store::{SaveOutcome, SignalRecord};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::core::Core;

pub struct Scheduler {
    cancel: CancellationToken,
    tasks: JoinSet<()>,
}

impl Scheduler {
    pub fn start(core: Arc<Core>) -> Self {
        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();
        let worker_slots = Arc::new(Semaphore::new(core.config.worker_limit));

        for symbol in core.config.watch_symbols.clone() {
            for timeframe in core.config.watch_timeframes.clone() {
                tasks.spawn(refresh_loop(
                    core.clone(),
                    symbol.clone(),
                    timeframe,
                    cancel.clone(),
                    worker_slots.clone(),
                ));
            }
        }

        tasks.spawn(outcome_loop(core.clone(), cancel.clone()));
        tasks.spawn(pattern_loop(core.clone(), cancel.clone()));
        tasks.spawn(pool_loop(core.clone(), cancel.clone()));
        tasks.spawn(maintenance_loop(core.clone(), cancel.clone()));
        tasks.spawn(core.slow_writer.clone().run(cancel.clone()));

        tracing::info!("scheduler started");
        Self { cancel, tasks }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop accepting work, let in-flight tasks wind down within `grace`,
    /// then abandon whatever is left.
    pub async fn shutdown(mut self, grace: Duration) {
        self.cancel.cancel();
        let deadline = tokio::time::Instant::now() + grace;
        loop {
            match tokio::time::timeout_at(deadline, self.tasks.join_next()).await {
                Ok(Some(_)) => continue,
                Ok(None) => {
                    tracing::info!("all scheduler tasks stopped");
                    return;
                }
                Err(_) => {
                    tracing::warn!(
                        remaining = self.tasks.len(),
                        "shutdown grace period expired, abandoning tasks"
                    );
                    self.tasks.abort_all();
                    return;
                }
            }
        }
    }
}

async fn refresh_loop(
    core: Arc<Core>,
    symbol: String,
    timeframe: Timeframe,
    cancel: CancellationToken,
    worker_slots: Arc<Semaphore>,
) {
    let mut ticker = tokio::time::interval(timeframe.refresh_interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let Ok(_permit) = worker_slots.acquire().await else { break };
                if let Err(e) = refresh_and_detect(&core, &symbol, timeframe).await {
                    tracing::warn!(
                        symbol = %symbol,
                        timeframe = timeframe.as_str(),
                        error = %e,
                        "refresh cycle failed"
                    );
                }
            }
        }
    }
}

/// Refresh one series from the provider and run the detector when a new bar
/// arrived. Save failures are logged per proposal; remaining rules proceed.
pub(crate) async fn refresh_and_detect(
    core: &Core,
    symbol: &str,
    timeframe: Timeframe,
) -> Result<()> {
    let mut new_bar = false;

    if core.cache.series_len(symbol, timeframe) == 0 {
        let bars = core
            .provider
            .get_bars(symbol, timeframe, core.config.cache_max_bars)
            .await?;
        let loaded = core.cache.replace_series(symbol, timeframe, bars);
        tracing::info!(
            symbol,
            timeframe = timeframe.as_str(),
            loaded,
            "price series loaded"
        );
        new_bar = loaded > 0;
    } else if core.cache.needs_refresh(symbol, timeframe) {
        let bars = core.provider.get_bars(symbol, timeframe, 2).await?;
        for bar in bars {
            if core.cache.append(symbol, timeframe, bar) == AppendOutcome::Appended {
                new_bar = true;
            }
        }
    }

    if !new_bar {
        return Ok(());
    }

    let series = core.cache.get_series(symbol, timeframe);
    let proposals = core.detector.evaluate(symbol, timeframe, &series);

    for proposal in proposals {
        let window = core.config.dedup_window_for(&proposal.signal_type, timeframe);
        match core.store.save(&proposal, window).await {
            Ok(SaveOutcome::Saved(record)) => {
                let report = core.alerts.dispatch(signal_alert(&record)).await;
                if report.delivered > 0 {
                    if let Err(e) = core.store.mark_alert_sent(record.id).await {
                        tracing::warn!(id = record.id, error = %e, "alert flag update failed");
                    }
                }
            }
            Ok(SaveOutcome::Duplicate) => {}
            Err(e) => {
                tracing::error!(
                    symbol,
                    error = %e,
                    "signal save failed, continuing with next rule"
                );
            }
        }
    }
    Ok(())
}

fn signal_alert(record: &SignalRecord) -> Alert {
    let strength = record
        .signal_strength
        .map(|s| format!("{:.2}", s))
        .unwrap_or_else(|| "-".to_string());
    Alert::new(
        AlertLevel::Info,
        format!("{} {}", record.symbol, record.signal_type),
        format!(
            "Price {:.2} | strength {} | {}",
            record.current_price,
            strength,
            record.market_condition.as_deref().unwrap_or("unknown"),
        ),
        "technical_analysis",
    )
    .with_details(json!({
        "signal_id": record.id,
        "timeframe": record.timeframe,
        "indicator_value": record.indicator_value,
    }))
}

async fn outcome_loop(core: Arc<Core>, cancel: CancellationToken) {
    let mut ticker =
        tokio::time::interval(Duration::from_secs(core.config.outcome_tick_seconds));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = core.tracker.run_pass().await {
                    tracing::error!(error = %e, "outcome pass failed");
                }
            }
        }
    }
}

async fn pattern_loop(core: Arc<Core>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(Duration::from_secs(24 * 60 * 60));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                match core.patterns.run().await {
                    Ok(summary) => tracing::info!(
                        upserted = summary.patterns_upserted,
                        "pattern pass finished"
                    ),
                    Err(e) => tracing::error!(error = %e, "pattern pass failed"),
                }
            }
        }
    }
}

async fn pool_loop(core: Arc<Core>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(Duration::from_secs(
        core.config.pool.adjustment_interval_seconds.max(1) as u64,
    ));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let outcome = core.pool_manager.check_cycle().await;
                tracing::debug!(?outcome, "pool check cycle");
            }
        }
    }
}

async fn maintenance_loop(core: Arc<Core>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(Duration::from_secs(24 * 60 * 60));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                match core
                    .slow_store
                    .cleanup_old_logs(core.config.slow_query_retention_days)
                    .await
                {
                    Ok(deleted) if deleted > 0 => {
                        tracing::info!(deleted, "slow query log maintenance finished")
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "slow query log maintenance failed"),
                }
            }
        }
    }
}
