//! Persistence for signals and their paired outcomes.
//!
//! Saving a signal inserts the signal row and its all-null outcome row in
//! one transaction; deduplication suppresses a second signal with the same
//! (symbol, signal_type) inside the window. Every statement is timed
//! through the query monitor.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::{Duration, Utc};
use db_monitor::QueryMonitor;
use market_core::timefmt::format_ts;
use market_core::NewSignal;
use sqlx::AnyPool;

use crate::models::{Horizon, OutcomeRecord, SignalFilter, SignalRecord};

/// Result of a save attempt. A duplicate is a normal outcome of the
/// detection loop, not an error.
#[derive(Debug)]
pub enum SaveOutcome {
    Saved(SignalRecord),
    Duplicate,
}

impl SaveOutcome {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, SaveOutcome::Duplicate)
    }
}

#[derive(Clone)]
pub struct SignalStore {
    pool: AnyPool,
    monitor: Arc<QueryMonitor>,
}

impl SignalStore {
    pub fn new(pool: AnyPool, monitor: Arc<QueryMonitor>) -> Self {
        Self { pool, monitor }
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    pub fn monitor(&self) -> &Arc<QueryMonitor> {
        &self.monitor
    }

    pub async fn init_schema(&self) -> Result<()> {
        let statements = [
            "CREATE TABLE IF NOT EXISTS technical_signals (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                signal_type TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                triggered_at TEXT NOT NULL,
                current_price REAL NOT NULL,
                indicator_value REAL,
                signal_strength REAL,
                volume REAL,
                market_condition TEXT,
                additional_context TEXT,
                alert_sent INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_signals_symbol_type_time
             ON technical_signals (symbol, signal_type, triggered_at)",
            "CREATE TABLE IF NOT EXISTS signal_outcomes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                signal_id INTEGER NOT NULL UNIQUE,
                price_1h REAL,
                price_4h REAL,
                price_1d REAL,
                price_1w REAL,
                price_1m REAL,
                return_1h REAL,
                return_4h REAL,
                return_1d REAL,
                return_1w REAL,
                return_1m REAL,
                is_complete INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (signal_id) REFERENCES technical_signals (id) ON DELETE CASCADE
            )",
            "CREATE INDEX IF NOT EXISTS idx_outcomes_incomplete
             ON signal_outcomes (is_complete, signal_id)",
            "CREATE TABLE IF NOT EXISTS signal_patterns (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                pattern_signature TEXT NOT NULL,
                component_signal_ids TEXT NOT NULL,
                discovered_at TEXT NOT NULL,
                sample_count INTEGER NOT NULL DEFAULT 0,
                avg_return_1d REAL,
                success_rate_1d REAL,
                updated_at TEXT NOT NULL,
                UNIQUE (symbol, pattern_signature)
            )",
        ];
        for sql in statements {
            sqlx::query(sql).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Persist a proposed signal together with its empty outcome row.
    ///
    /// Returns `Duplicate` when a signal with the same (symbol, signal_type)
    /// was already persisted inside `dedup_window`. Both rows commit or
    /// neither does.
    pub async fn save(&self, signal: &NewSignal, dedup_window: Duration) -> Result<SaveOutcome> {
        let dedup_sql = "SELECT id FROM technical_signals \
                         WHERE symbol = ? AND signal_type = ? AND triggered_at >= ? LIMIT 1";
        let cutoff = format_ts(signal.triggered_at - dedup_window);

        let timer = self.monitor.begin(dedup_sql);
        let existing: Option<(i64,)> = sqlx::query_as(dedup_sql)
            .bind(&signal.symbol)
            .bind(&signal.signal_type)
            .bind(&cutoff)
            .fetch_optional(&self.pool)
            .await?;
        timer.finish(u64::from(existing.is_some()));

        if existing.is_some() {
            tracing::debug!(
                symbol = %signal.symbol,
                signal_type = %signal.signal_type,
                window_minutes = dedup_window.num_minutes(),
                "duplicate signal suppressed"
            );
            return Ok(SaveOutcome::Duplicate);
        }

        let now = format_ts(Utc::now());
        let mut tx = self.pool.begin().await?;

        let insert_signal = "INSERT INTO technical_signals \
            (symbol, signal_type, timeframe, triggered_at, current_price, indicator_value, \
             signal_strength, volume, market_condition, additional_context, alert_sent, created_at) \
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?)";
        let timer = self.monitor.begin(insert_signal);
        let result = sqlx::query(insert_signal)
            .bind(&signal.symbol)
            .bind(&signal.signal_type)
            .bind(signal.timeframe.as_str())
            .bind(format_ts(signal.triggered_at))
            .bind(signal.current_price)
            .bind(signal.indicator_value)
            .bind(signal.signal_strength)
            .bind(signal.volume)
            .bind(signal.market_condition.as_str())
            .bind(
                signal
                    .additional_context
                    .as_ref()
                    .map(|c| c.to_string()),
            )
            .bind(&now)
            .execute(&mut *tx)
            .await
            .context("signal insert failed")?;
        timer.finish(result.rows_affected());

        let signal_id = result
            .last_insert_id()
            .ok_or_else(|| anyhow!("driver returned no insert id for technical_signals"))?;

        let insert_outcome = "INSERT INTO signal_outcomes \
            (signal_id, is_complete, created_at, updated_at) VALUES (?, 0, ?, ?)";
        let timer = self.monitor.begin(insert_outcome);
        let result = sqlx::query(insert_outcome)
            .bind(signal_id)
            .bind(&now)
            .bind(&now)
            .execute(&mut *tx)
            .await
            .context("outcome pairing insert failed")?;
        timer.finish(result.rows_affected());

        tx.commit().await?;

        let record = self
            .find_by_id(signal_id)
            .await?
            .ok_or_else(|| anyhow!("signal {} vanished after insert", signal_id))?;
        tracing::info!(
            id = signal_id,
            symbol = %record.symbol,
            signal_type = %record.signal_type,
            "signal saved"
        );
        Ok(SaveOutcome::Saved(record))
    }

    pub async fn mark_alert_sent(&self, signal_id: i64) -> Result<bool> {
        let sql = "UPDATE technical_signals SET alert_sent = 1 WHERE id = ?";
        let timer = self.monitor.begin(sql);
        let result = sqlx::query(sql)
            .bind(signal_id)
            .execute(&self.pool)
            .await?;
        timer.finish(result.rows_affected());
        Ok(result.rows_affected() > 0)
    }

    pub async fn find_by_id(&self, signal_id: i64) -> Result<Option<SignalRecord>> {
        let sql = "SELECT * FROM technical_signals WHERE id = ?";
        let timer = self.monitor.begin(sql);
        let record = sqlx::query_as::<_, SignalRecord>(sql)
            .bind(signal_id)
            .fetch_optional(&self.pool)
            .await?;
        timer.finish(u64::from(record.is_some()));
        Ok(record)
    }

    /// Recent signals, newest first.
    pub async fn recent(&self, filter: &SignalFilter, limit: i64) -> Result<Vec<SignalRecord>> {
        let hours = if filter.hours > 0 { filter.hours } else { 24 };
        let cutoff = format_ts(Utc::now() - Duration::hours(hours));

        let mut sql = String::from("SELECT * FROM technical_signals WHERE triggered_at >= ?");
        if filter.symbol.is_some() {
            sql.push_str(" AND symbol = ?");
        }
        if filter.signal_type.is_some() {
            sql.push_str(" AND signal_type = ?");
        }
        sql.push_str(" ORDER BY triggered_at DESC LIMIT ?");

        let timer = self.monitor.begin(&sql);
        let mut query = sqlx::query_as::<_, SignalRecord>(&sql).bind(&cutoff);
        if let Some(symbol) = &filter.symbol {
            query = query.bind(symbol);
        }
        if let Some(signal_type) = &filter.signal_type {
            query = query.bind(signal_type);
        }
        let records = query.bind(limit).fetch_all(&self.pool).await?;
        timer.finish(records.len() as u64);
        Ok(records)
    }

    pub async fn signal_count_today(&self, symbol: Option<&str>) -> Result<i64> {
        let filter = SignalFilter {
            symbol: symbol.map(str::to_string),
            signal_type: None,
            hours: 24,
        };
        Ok(self.recent(&filter, i64::MAX).await?.len() as i64)
    }

    // ---------------------------------------------------------------
    // Outcome access
    // ---------------------------------------------------------------

    pub async fn outcome_for_signal(&self, signal_id: i64) -> Result<Option<OutcomeRecord>> {
        let sql = "SELECT * FROM signal_outcomes WHERE signal_id = ?";
        let timer = self.monitor.begin(sql);
        let record = sqlx::query_as::<_, OutcomeRecord>(sql)
            .bind(signal_id)
            .fetch_optional(&self.pool)
            .await?;
        timer.finish(u64::from(record.is_some()));
        Ok(record)
    }

    /// Open outcomes in ascending signal id, for deterministic passes.
    pub async fn open_outcomes(&self) -> Result<Vec<OutcomeRecord>> {
        let sql = "SELECT * FROM signal_outcomes WHERE is_complete = 0 ORDER BY signal_id ASC";
        let timer = self.monitor.begin(sql);
        let records = sqlx::query_as::<_, OutcomeRecord>(sql)
            .fetch_all(&self.pool)
            .await?;
        timer.finish(records.len() as u64);
        Ok(records)
    }

    /// Write a horizon price slot, once. Returns false when the slot was
    /// already filled.
    pub async fn fill_slot(&self, outcome_id: i64, horizon: Horizon, price: f64) -> Result<bool> {
        let column = horizon.price_column();
        let sql = format!(
            "UPDATE signal_outcomes SET {column} = ?, updated_at = ? \
             WHERE id = ? AND {column} IS NULL"
        );
        let timer = self.monitor.begin(&sql);
        let result = sqlx::query(&sql)
            .bind(price)
            .bind(format_ts(Utc::now()))
            .bind(outcome_id)
            .execute(&self.pool)
            .await?;
        timer.finish(result.rows_affected());
        Ok(result.rows_affected() > 0)
    }

    /// Recompute every return column from its filled price slot and the
    /// signal's reference price.
    pub async fn recompute_returns(&self, outcome_id: i64, reference_price: f64) -> Result<()> {
        if reference_price <= 0.0 {
            return Err(anyhow!(
                "reference price {} is not positive for outcome {}",
                reference_price,
                outcome_id
            ));
        }
        let sql = "UPDATE signal_outcomes SET \
            return_1h = CASE WHEN price_1h IS NOT NULL THEN (price_1h - ?) * 100.0 / ? ELSE NULL END, \
            return_4h = CASE WHEN price_4h IS NOT NULL THEN (price_4h - ?) * 100.0 / ? ELSE NULL END, \
            return_1d = CASE WHEN price_1d IS NOT NULL THEN (price_1d - ?) * 100.0 / ? ELSE NULL END, \
            return_1w = CASE WHEN price_1w IS NOT NULL THEN (price_1w - ?) * 100.0 / ? ELSE NULL END, \
            return_1m = CASE WHEN price_1m IS NOT NULL THEN (price_1m - ?) * 100.0 / ? ELSE NULL END, \
            updated_at = ? \
            WHERE id = ?";
        let timer = self.monitor.begin(sql);
        let mut query = sqlx::query(sql);
        for _ in 0..5 {
            query = query.bind(reference_price).bind(reference_price);
        }
        let result = query
            .bind(format_ts(Utc::now()))
            .bind(outcome_id)
            .execute(&self.pool)
            .await?;
        timer.finish(result.rows_affected());
        Ok(())
    }

    pub async fn outcome_fill_counts(&self) -> Result<crate::models::OutcomeFillCounts> {
        let sql = "SELECT COUNT(*), \
            COALESCE(SUM(is_complete), 0), \
            COALESCE(SUM(CASE WHEN price_1h IS NOT NULL THEN 1 ELSE 0 END), 0), \
            COALESCE(SUM(CASE WHEN price_4h IS NOT NULL THEN 1 ELSE 0 END), 0), \
            COALESCE(SUM(CASE WHEN price_1d IS NOT NULL THEN 1 ELSE 0 END), 0), \
            COALESCE(SUM(CASE WHEN price_1w IS NOT NULL THEN 1 ELSE 0 END), 0), \
            COALESCE(SUM(CASE WHEN price_1m IS NOT NULL THEN 1 ELSE 0 END), 0) \
            FROM signal_outcomes";
        let timer = self.monitor.begin(sql);
        let row: (i64, i64, i64, i64, i64, i64, i64) =
            sqlx::query_as(sql).fetch_one(&self.pool).await?;
        timer.finish(1);
        Ok(crate::models::OutcomeFillCounts {
            total: row.0,
            completed: row.1,
            with_1h: row.2,
            with_4h: row.3,
            with_1d: row.4,
            with_1w: row.5,
            with_1m: row.6,
        })
    }

    /// Mark an outcome complete; only takes effect once the 1-month slot is
    /// filled.
    pub async fn mark_complete(&self, outcome_id: i64) -> Result<bool> {
        let sql = "UPDATE signal_outcomes SET is_complete = 1, updated_at = ? \
                   WHERE id = ? AND price_1m IS NOT NULL";
        let timer = self.monitor.begin(sql);
        let result = sqlx::query(sql)
            .bind(format_ts(Utc::now()))
            .bind(outcome_id)
            .execute(&self.pool)
            .await?;
        timer.finish(result.rows_affected());
        Ok(result.rows_affected() > 0)
    }
}
