//! Horizon-price tracking for persisted signals.
//!
//! Each pass walks the open outcomes in ascending signal id, fetches one
//! current price per outcome, fills every elapsed-and-empty horizon slot in
//! strict horizon order, recomputes returns, and completes the outcome when
//! the 1-month slot lands. A per-outcome async lock keeps concurrent passes
//! off the same row.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use market_core::PriceProvider;
use price_cache::PriceSeriesCache;
use serde::Serialize;
use signal_store::{Horizon, OutcomeRecord, SignalStore};

/// A cached quote older than this is considered stale and the tracker falls
/// back to the price provider.
const CACHE_FRESHNESS_MINUTES: i64 = 15;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PassSummary {
    pub processed: usize,
    pub updated: usize,
    pub completed: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackingSummary {
    pub total: i64,
    pub completed: i64,
    pub incomplete: i64,
    pub completion_rate: f64,
    pub with_1h: i64,
    pub with_4h: i64,
    pub with_1d: i64,
    pub with_1w: i64,
    pub with_1m: i64,
}

#[derive(Debug, Default)]
struct OutcomeProgress {
    updated: bool,
    completed: bool,
}

pub struct OutcomeTracker {
    store: SignalStore,
    cache: Arc<PriceSeriesCache>,
    provider: Arc<dyn PriceProvider>,
    locks: DashMap<i64, Arc<tokio::sync::Mutex<()>>>,
}

impl OutcomeTracker {
    pub fn new(
        store: SignalStore,
        cache: Arc<PriceSeriesCache>,
        provider: Arc<dyn PriceProvider>,
    ) -> Self {
        Self {
            store,
            cache,
            provider,
            locks: DashMap::new(),
        }
    }

    pub async fn run_pass(&self) -> Result<PassSummary> {
        self.run_pass_at(Utc::now()).await
    }

    pub async fn run_pass_at(&self, now: DateTime<Utc>) -> Result<PassSummary> {
        let outcomes = self.store.open_outcomes().await?;
        let mut summary = PassSummary {
            processed: outcomes.len(),
            ..Default::default()
        };

        for outcome in outcomes {
            let lock = self
                .locks
                .entry(outcome.id)
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone();
            let _guard = lock.lock().await;

            match self.process_outcome(&outcome, now).await {
                Ok(progress) => {
                    if progress.updated {
                        summary.updated += 1;
                    }
                    if progress.completed {
                        summary.completed += 1;
                        self.locks.remove(&outcome.id);
                    }
                }
                Err(e) => {
                    summary.errors += 1;
                    tracing::error!(
                        outcome_id = outcome.id,
                        signal_id = outcome.signal_id,
                        error = %e,
                        "outcome update failed"
                    );
                }
            }
        }

        tracing::info!(
            processed = summary.processed,
            updated = summary.updated,
            completed = summary.completed,
            errors = summary.errors,
            "outcome tracking pass finished"
        );
        Ok(summary)
    }

    async fn process_outcome(
        &self,
        outcome: &OutcomeRecord,
        now: DateTime<Utc>,
    ) -> Result<OutcomeProgress> {
        let signal = self
            .store
            .find_by_id(outcome.signal_id)
            .await?
            .ok_or_else(|| {
                anyhow!(
                    "outcome {} references missing signal {}",
                    outcome.id,
                    outcome.signal_id
                )
            })?;
        let triggered_at = signal
            .triggered_at_utc()
            .ok_or_else(|| anyhow!("signal {} has unparseable triggered_at", signal.id))?;

        let elapsed_hours = (now - triggered_at).num_seconds() as f64 / 3600.0;

        // Horizons considered strictly earliest-first; a stale outcome
        // back-fills from 1h upward within one pass.
        let due: Vec<Horizon> = Horizon::ALL
            .into_iter()
            .filter(|h| elapsed_hours >= h.hours() as f64 && outcome.price_for(*h).is_none())
            .collect();
        if due.is_empty() {
            return Ok(OutcomeProgress::default());
        }

        let price = self.lookup_price(&signal.symbol, now).await?;

        let mut progress = OutcomeProgress::default();
        for horizon in &due {
            if self.store.fill_slot(outcome.id, *horizon, price).await? {
                progress.updated = true;
                tracing::debug!(
                    outcome_id = outcome.id,
                    horizon = horizon.label(),
                    price,
                    "horizon slot filled"
                );
            }
        }

        self.store
            .recompute_returns(outcome.id, signal.current_price)
            .await?;

        if due.contains(&Horizon::Month1) && self.store.mark_complete(outcome.id).await? {
            progress.completed = true;
            tracing::info!(
                outcome_id = outcome.id,
                signal_id = signal.id,
                "outcome tracking completed"
            );
        }

        Ok(progress)
    }

    /// Current price for a symbol: fresh cache quote first, provider
    /// otherwise.
    async fn lookup_price(&self, symbol: &str, now: DateTime<Utc>) -> Result<f64> {
        if let Some(quote) = self.cache.latest_price(symbol) {
            if now - quote.timestamp <= Duration::minutes(CACHE_FRESHNESS_MINUTES) {
                return Ok(quote.price);
            }
        }
        let quote = self.provider.get_current_price(symbol).await?;
        Ok(quote.price)
    }

    pub async fn tracking_summary(&self) -> Result<TrackingSummary> {
        let counts = self.store.outcome_fill_counts().await?;
        Ok(TrackingSummary {
            total: counts.total,
            completed: counts.completed,
            incomplete: counts.total - counts.completed,
            completion_rate: if counts.total > 0 {
                counts.completed as f64 / counts.total as f64 * 100.0
            } else {
                0.0
            },
            with_1h: counts.with_1h,
            with_4h: counts.with_4h,
            with_1d: counts.with_1d,
            with_1w: counts.with_1w,
            with_1m: counts.with_1m,
        })
    }
}
