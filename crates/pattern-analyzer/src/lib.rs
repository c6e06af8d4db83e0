//! Signal pattern discovery.
//!
//! Recent signals per symbol cluster into sequential patterns (each signal
//! within the gap window of its predecessor, ordered signature) and
//! concurrent patterns (minutes apart, sorted signature). Each signature is
//! upserted once per run with outcome statistics joined from `return_1d`.

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use market_core::timefmt::{format_ts, parse_ts};
use serde::Serialize;
use signal_store::SignalStore;

#[derive(Debug, Clone)]
pub struct PatternConfig {
    pub window_days: i64,
    pub sequential_gap_days: i64,
    pub concurrent_gap_minutes: i64,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            window_days: 90,
            sequential_gap_days: 7,
            concurrent_gap_minutes: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PatternRecord {
    pub id: i64,
    pub symbol: String,
    pub pattern_signature: String,
    pub component_signal_ids: String,
    pub discovered_at: String,
    pub sample_count: i64,
    pub avg_return_1d: Option<f64>,
    pub success_rate_1d: Option<f64>,
    pub updated_at: String,
}

impl PatternRecord {
    pub fn component_ids(&self) -> Vec<i64> {
        serde_json::from_str(&self.component_signal_ids).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PatternRunSummary {
    pub sequential_groups: usize,
    pub concurrent_groups: usize,
    pub patterns_upserted: usize,
}

#[derive(Debug, Clone)]
struct SignalPoint {
    id: i64,
    signal_type: String,
    triggered_at: DateTime<Utc>,
}

pub struct PatternAnalyzer {
    store: SignalStore,
    config: PatternConfig,
}

impl PatternAnalyzer {
    pub fn new(store: SignalStore, config: PatternConfig) -> Self {
        Self { store, config }
    }

    /// Analyse every symbol with signals inside the window.
    pub async fn run(&self) -> Result<PatternRunSummary> {
        let now = Utc::now();
        let symbols = self.symbols_in_window(now).await?;
        let mut total = PatternRunSummary::default();
        for symbol in symbols {
            let summary = self.run_for_symbol(&symbol, now).await?;
            total.sequential_groups += summary.sequential_groups;
            total.concurrent_groups += summary.concurrent_groups;
            total.patterns_upserted += summary.patterns_upserted;
        }
        Ok(total)
    }

    async fn symbols_in_window(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let cutoff = format_ts(now - Duration::days(self.config.window_days));
        let sql = "SELECT DISTINCT symbol FROM technical_signals WHERE triggered_at >= ?";
        let timer = self.store.monitor().begin(sql);
        let rows: Vec<(String,)> = sqlx::query_as(sql)
            .bind(&cutoff)
            .fetch_all(self.store.pool())
            .await?;
        timer.finish(rows.len() as u64);
        Ok(rows.into_iter().map(|(s,)| s).collect())
    }

    pub async fn run_for_symbol(
        &self,
        symbol: &str,
        now: DateTime<Utc>,
    ) -> Result<PatternRunSummary> {
        let signals = self.load_signals(symbol, now).await?;
        let mut summary = PatternRunSummary::default();
        if signals.len() < 2 {
            return Ok(summary);
        }

        // signature -> component ids across all groups of this run
        let mut signatures: BTreeMap<String, Vec<i64>> = BTreeMap::new();

        let sequential = group_by_gap(
            &signals,
            Duration::days(self.config.sequential_gap_days),
        );
        for group in &sequential {
            if group.len() < 2 {
                continue;
            }
            summary.sequential_groups += 1;
            let types: Vec<&str> = group.iter().map(|s| s.signal_type.as_str()).collect();
            let signature = format!("seq:{}", types.join(">"));
            signatures
                .entry(signature)
                .or_default()
                .extend(group.iter().map(|s| s.id));
        }

        let concurrent = group_by_gap(
            &signals,
            Duration::minutes(self.config.concurrent_gap_minutes),
        );
        for group in &concurrent {
            if group.len() < 2 {
                continue;
            }
            summary.concurrent_groups += 1;
            let mut types: Vec<&str> = group.iter().map(|s| s.signal_type.as_str()).collect();
            types.sort_unstable();
            let signature = format!("con:{}", types.join("+"));
            signatures
                .entry(signature)
                .or_default()
                .extend(group.iter().map(|s| s.id));
        }

        for (signature, mut ids) in signatures {
            ids.sort_unstable();
            ids.dedup();
            let stats = self.outcome_stats(&ids).await?;
            self.upsert_pattern(symbol, &signature, &ids, &stats, now)
                .await?;
            summary.patterns_upserted += 1;
        }

        if summary.patterns_upserted > 0 {
            tracing::info!(
                symbol,
                sequential = summary.sequential_groups,
                concurrent = summary.concurrent_groups,
                upserted = summary.patterns_upserted,
                "pattern analysis finished"
            );
        }
        Ok(summary)
    }

    async fn load_signals(&self, symbol: &str, now: DateTime<Utc>) -> Result<Vec<SignalPoint>> {
        let cutoff = format_ts(now - Duration::days(self.config.window_days));
        let sql = "SELECT id, signal_type, triggered_at FROM technical_signals \
                   WHERE symbol = ? AND triggered_at >= ? ORDER BY triggered_at ASC, id ASC";
        let timer = self.store.monitor().begin(sql);
        let rows: Vec<(i64, String, String)> = sqlx::query_as(sql)
            .bind(symbol)
            .bind(&cutoff)
            .fetch_all(self.store.pool())
            .await?;
        timer.finish(rows.len() as u64);

        Ok(rows
            .into_iter()
            .filter_map(|(id, signal_type, triggered_at)| {
                parse_ts(&triggered_at).map(|ts| SignalPoint {
                    id,
                    signal_type,
                    triggered_at: ts,
                })
            })
            .collect())
    }

    async fn outcome_stats(&self, ids: &[i64]) -> Result<PatternStats> {
        if ids.is_empty() {
            return Ok(PatternStats::default());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT return_1d FROM signal_outcomes \
             WHERE signal_id IN ({placeholders}) AND return_1d IS NOT NULL"
        );
        let timer = self.store.monitor().begin(&sql);
        let mut query = sqlx::query_as::<_, (f64,)>(&sql);
        for id in ids {
            query = query.bind(id);
        }
        let returns: Vec<(f64,)> = query.fetch_all(self.store.pool()).await?;
        timer.finish(returns.len() as u64);

        let values: Vec<f64> = returns.into_iter().map(|(r,)| r).collect();
        if values.is_empty() {
            return Ok(PatternStats::default());
        }
        let sample_count = values.len() as i64;
        let avg = values.iter().sum::<f64>() / values.len() as f64;
        let winners = values.iter().filter(|&&r| r > 0.0).count();
        Ok(PatternStats {
            sample_count,
            avg_return_1d: Some(avg),
            success_rate_1d: Some(winners as f64 / values.len() as f64),
        })
    }

    async fn upsert_pattern(
        &self,
        symbol: &str,
        signature: &str,
        ids: &[i64],
        stats: &PatternStats,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let ids_json = serde_json::to_string(ids)?;
        let now_text = format_ts(now);

        let select = "SELECT id FROM signal_patterns WHERE symbol = ? AND pattern_signature = ?";
        let timer = self.store.monitor().begin(select);
        let existing: Option<(i64,)> = sqlx::query_as(select)
            .bind(symbol)
            .bind(signature)
            .fetch_optional(self.store.pool())
            .await?;
        timer.finish(u64::from(existing.is_some()));

        if let Some((id,)) = existing {
            let sql = "UPDATE signal_patterns SET component_signal_ids = ?, sample_count = ?, \
                       avg_return_1d = ?, success_rate_1d = ?, updated_at = ? WHERE id = ?";
            let timer = self.store.monitor().begin(sql);
            let result = sqlx::query(sql)
                .bind(&ids_json)
                .bind(stats.sample_count)
                .bind(stats.avg_return_1d)
                .bind(stats.success_rate_1d)
                .bind(&now_text)
                .bind(id)
                .execute(self.store.pool())
                .await?;
            timer.finish(result.rows_affected());
        } else {
            let sql = "INSERT INTO signal_patterns \
                       (symbol, pattern_signature, component_signal_ids, discovered_at, \
                        sample_count, avg_return_1d, success_rate_1d, updated_at) \
                       VALUES (?, ?, ?, ?, ?, ?, ?, ?)";
            let timer = self.store.monitor().begin(sql);
            let result = sqlx::query(sql)
                .bind(symbol)
                .bind(signature)
                .bind(&ids_json)
                .bind(&now_text)
                .bind(stats.sample_count)
                .bind(stats.avg_return_1d)
                .bind(stats.success_rate_1d)
                .bind(&now_text)
                .execute(self.store.pool())
                .await?;
            timer.finish(result.rows_affected());
        }
        Ok(())
    }

    pub async fn patterns_for_symbol(&self, symbol: &str) -> Result<Vec<PatternRecord>> {
        let sql = "SELECT * FROM signal_patterns WHERE symbol = ? ORDER BY pattern_signature";
        let timer = self.store.monitor().begin(sql);
        let rows = sqlx::query_as::<_, PatternRecord>(sql)
            .bind(symbol)
            .fetch_all(self.store.pool())
            .await?;
        timer.finish(rows.len() as u64);
        Ok(rows)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct PatternStats {
    sample_count: i64,
    avg_return_1d: Option<f64>,
    success_rate_1d: Option<f64>,
}

/// Split time-ordered signals into runs where each member follows its
/// predecessor within `gap`.
fn group_by_gap(signals: &[SignalPoint], gap: Duration) -> Vec<Vec<SignalPoint>> {
    let mut groups: Vec<Vec<SignalPoint>> = Vec::new();
    for signal in signals {
        match groups.last_mut() {
            Some(group)
                if signal.triggered_at - group.last().unwrap().triggered_at <= gap =>
            {
                group.push(signal.clone());
            }
            _ => groups.push(vec![signal.clone()]),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use db_monitor::{QueryMonitor, SlowQueryQueue};
    use market_core::{MarketCondition, NewSignal, Timeframe};
    use signal_store::{Horizon, SaveOutcome};
    use std::sync::Arc;

    async fn setup() -> (SignalStore, PatternAnalyzer) {
        sqlx::any::install_default_drivers();
        let pool = sqlx::any::AnyPoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory SQLite");
        let monitor = Arc::new(QueryMonitor::new(
            1.0,
            Arc::new(SlowQueryQueue::new(1000, 100)),
        ));
        let store = SignalStore::new(pool, monitor);
        store.init_schema().await.unwrap();
        let analyzer = PatternAnalyzer::new(store.clone(), PatternConfig::default());
        (store, analyzer)
    }

    async fn save_at(
        store: &SignalStore,
        symbol: &str,
        signal_type: &str,
        triggered_at: DateTime<Utc>,
        return_1d: Option<f64>,
    ) -> i64 {
        let signal = NewSignal {
            symbol: symbol.to_string(),
            signal_type: signal_type.to_string(),
            timeframe: Timeframe::Day1,
            triggered_at,
            current_price: 100.0,
            indicator_value: None,
            signal_strength: None,
            volume: None,
            market_condition: MarketCondition::Bullish,
            additional_context: None,
        };
        let SaveOutcome::Saved(record) = store.save(&signal, Duration::zero()).await.unwrap()
        else {
            panic!("unexpected duplicate for {signal_type}");
        };

        if let Some(return_pct) = return_1d {
            let outcome = store.outcome_for_signal(record.id).await.unwrap().unwrap();
            store
                .fill_slot(outcome.id, Horizon::Day1, 100.0 * (1.0 + return_pct / 100.0))
                .await
                .unwrap();
            store.recompute_returns(outcome.id, 100.0).await.unwrap();
        }
        record.id
    }

    #[tokio::test]
    async fn test_sequential_pattern_with_stats() {
        let (store, analyzer) = setup().await;
        let now = Utc::now();
        let base = now - Duration::days(30);

        save_at(&store, "^IXIC", "MA200_breakout_up", base, Some(2.0)).await;
        save_at(
            &store,
            "^IXIC",
            "RSI_overbought",
            base + Duration::days(3),
            Some(-1.0),
        )
        .await;
        save_at(
            &store,
            "^IXIC",
            "BB_break_upper",
            base + Duration::days(5),
            Some(4.0),
        )
        .await;
        // Too far away to join the sequence
        save_at(
            &store,
            "^IXIC",
            "golden_cross",
            base + Duration::days(20),
            None,
        )
        .await;

        let summary = analyzer.run_for_symbol("^IXIC", now).await.unwrap();
        assert_eq!(summary.sequential_groups, 1);
        assert_eq!(summary.patterns_upserted, 1);

        let patterns = analyzer.patterns_for_symbol("^IXIC").await.unwrap();
        assert_eq!(patterns.len(), 1);
        let pattern = &patterns[0];
        assert_eq!(
            pattern.pattern_signature,
            "seq:MA200_breakout_up>RSI_overbought>BB_break_upper"
        );
        assert_eq!(pattern.sample_count, 3);
        assert_eq!(pattern.component_ids().len(), 3);
        assert!((pattern.avg_return_1d.unwrap() - (2.0 - 1.0 + 4.0) / 3.0).abs() < 1e-6);
        assert!((pattern.success_rate_1d.unwrap() - 2.0 / 3.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_concurrent_pattern_sorted_signature() {
        let (store, analyzer) = setup().await;
        let now = Utc::now();
        let base = now - Duration::days(2);

        save_at(&store, "^GSPC", "RSI_overbought", base, None).await;
        save_at(
            &store,
            "^GSPC",
            "BB_touch_upper",
            base + Duration::minutes(10),
            None,
        )
        .await;

        let summary = analyzer.run_for_symbol("^GSPC", now).await.unwrap();
        assert_eq!(summary.concurrent_groups, 1);

        let patterns = analyzer.patterns_for_symbol("^GSPC").await.unwrap();
        let signatures: Vec<&str> = patterns
            .iter()
            .map(|p| p.pattern_signature.as_str())
            .collect();
        // Concurrent signature is sorted; the pair is also a (short) sequence
        assert!(signatures.contains(&"con:BB_touch_upper+RSI_overbought"));
    }

    #[tokio::test]
    async fn test_rerun_replaces_stats() {
        let (store, analyzer) = setup().await;
        let now = Utc::now();
        let base = now - Duration::days(10);

        let first = save_at(&store, "^IXIC", "RSI_oversold", base, None).await;
        save_at(
            &store,
            "^IXIC",
            "MA50_breakout_up",
            base + Duration::days(1),
            None,
        )
        .await;

        analyzer.run_for_symbol("^IXIC", now).await.unwrap();
        let before = analyzer.patterns_for_symbol("^IXIC").await.unwrap();
        let seq_before = before
            .iter()
            .find(|p| p.pattern_signature.starts_with("seq:"))
            .unwrap();
        assert_eq!(seq_before.sample_count, 0);
        assert!(seq_before.avg_return_1d.is_none());

        // Outcomes fill in later; a rerun refreshes the stats in place
        let outcome = store.outcome_for_signal(first).await.unwrap().unwrap();
        store.fill_slot(outcome.id, Horizon::Day1, 103.0).await.unwrap();
        store.recompute_returns(outcome.id, 100.0).await.unwrap();

        analyzer.run_for_symbol("^IXIC", now).await.unwrap();
        let after = analyzer.patterns_for_symbol("^IXIC").await.unwrap();
        assert_eq!(after.len(), before.len());
        let seq_after = after
            .iter()
            .find(|p| p.pattern_signature.starts_with("seq:"))
            .unwrap();
        assert_eq!(seq_after.sample_count, 1);
        assert!((seq_after.avg_return_1d.unwrap() - 3.0).abs() < 1e-6);
        assert_eq!(seq_after.id, seq_before.id);
    }

    #[tokio::test]
    async fn test_window_excludes_old_signals() {
        let (store, analyzer) = setup().await;
        let now = Utc::now();

        save_at(
            &store,
            "^IXIC",
            "RSI_oversold",
            now - Duration::days(120),
            None,
        )
        .await;
        save_at(
            &store,
            "^IXIC",
            "MA50_breakout_up",
            now - Duration::days(119),
            None,
        )
        .await;

        let summary = analyzer.run_for_symbol("^IXIC", now).await.unwrap();
        assert_eq!(summary.patterns_upserted, 0);
    }
}
