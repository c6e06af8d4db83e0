//! Memoising layer over the pure indicator functions.
//!
//! Results are keyed by series identity (symbol + timeframe) and the
//! indicator parameters. Running averages (SMA/EMA/volume-SMA) extend
//! incrementally as the source series grows; the oscillator families are
//! recomputed only once the source has grown by more than their period since
//! the last materialisation, otherwise the cached (possibly short) series is
//! returned unchanged.

use std::sync::Arc;

use dashmap::DashMap;
use market_core::{Bar, Timeframe};

use crate::indicators::{self, finite_or, BollingerSeries, MacdSeries, StochasticSeries};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum IndicatorSpec {
    Sma(usize),
    Ema(usize),
    VolumeSma(usize),
    Rsi(usize),
    Bollinger(usize, u64),
    Macd(usize, usize, usize),
    Stochastic(usize, usize),
    Vwap,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    symbol: String,
    timeframe: Timeframe,
    spec: IndicatorSpec,
}

enum CachedData {
    Series(Arc<Vec<f64>>),
    Bollinger(Arc<BollingerSeries>),
    Macd(Arc<MacdSeries>),
    Stochastic(Arc<StochasticSeries>),
}

struct CacheEntry {
    /// Timestamp (millis) of the last source bar at materialisation time.
    last_ts: i64,
    source_len: usize,
    data: CachedData,
}

/// Number of bars appended after the cached tail, when the cached tail is
/// still present in the series. `None` means the series was replaced or the
/// tail was evicted, so nothing can be reused.
fn appended_since(bars: &[Bar], cached_last_ts: i64) -> Option<usize> {
    let mut count = 0;
    for bar in bars.iter().rev() {
        let ts = bar.timestamp.timestamp_millis();
        if ts > cached_last_ts {
            count += 1;
        } else if ts == cached_last_ts {
            return Some(count);
        } else {
            return None;
        }
    }
    None
}

fn last_ts(bars: &[Bar]) -> i64 {
    bars.last()
        .map(|b| b.timestamp.timestamp_millis())
        .unwrap_or(0)
}

pub struct IndicatorEngine {
    cache: DashMap<CacheKey, CacheEntry>,
}

impl Default for IndicatorEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl IndicatorEngine {
    pub fn new() -> Self {
        Self {
            cache: DashMap::new(),
        }
    }

    fn key(symbol: &str, timeframe: Timeframe, spec: IndicatorSpec) -> CacheKey {
        CacheKey {
            symbol: symbol.to_string(),
            timeframe,
            spec,
        }
    }

    pub fn cached_series_count(&self) -> usize {
        self.cache.len()
    }

    /// Drop every derived series for a (symbol, timeframe) source.
    pub fn invalidate(&self, symbol: &str, timeframe: Timeframe) {
        self.cache
            .retain(|k, _| !(k.symbol == symbol && k.timeframe == timeframe));
    }

    // ---------------------------------------------------------------
    // Incrementally-extended families
    // ---------------------------------------------------------------

    pub fn sma(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        bars: &[Bar],
        period: usize,
    ) -> Arc<Vec<f64>> {
        let values: Vec<f64> = bars.iter().map(|b| b.close).collect();
        self.windowed_mean(
            Self::key(symbol, timeframe, IndicatorSpec::Sma(period)),
            bars,
            &values,
            period,
        )
    }

    pub fn volume_sma(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        bars: &[Bar],
        period: usize,
    ) -> Arc<Vec<f64>> {
        let values: Vec<f64> = bars.iter().map(|b| b.volume).collect();
        self.windowed_mean(
            Self::key(symbol, timeframe, IndicatorSpec::VolumeSma(period)),
            bars,
            &values,
            period,
        )
    }

    fn windowed_mean(
        &self,
        key: CacheKey,
        bars: &[Bar],
        values: &[f64],
        period: usize,
    ) -> Arc<Vec<f64>> {
        if period == 0 || values.len() < period {
            return Arc::new(vec![]);
        }
        let tail_ts = last_ts(bars);
        let target_len = values.len() - period + 1;

        if let Some(entry) = self.cache.get(&key) {
            if let CachedData::Series(cached) = &entry.data {
                if entry.last_ts == tail_ts && entry.source_len == values.len() {
                    return cached.clone();
                }
                if let Some(new_count) = appended_since(bars, entry.last_ts) {
                    let mut extended = cached.as_ref().clone();
                    for end in (values.len() - new_count)..values.len() {
                        if end + 1 >= period {
                            let window = &values[end + 1 - period..=end];
                            extended.push(finite_or(
                                window.iter().sum::<f64>() / period as f64,
                                0.0,
                            ));
                        }
                    }
                    if extended.len() >= target_len {
                        let excess = extended.len() - target_len;
                        extended.drain(..excess);
                        let arc = Arc::new(extended);
                        drop(entry);
                        self.store_series(key, tail_ts, values.len(), arc.clone());
                        return arc;
                    }
                }
            }
        }

        let arc = Arc::new(indicators::sma(values, period));
        self.store_series(key, tail_ts, values.len(), arc.clone());
        arc
    }

    pub fn ema(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        bars: &[Bar],
        period: usize,
    ) -> Arc<Vec<f64>> {
        let values: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let key = Self::key(symbol, timeframe, IndicatorSpec::Ema(period));
        if period == 0 || values.is_empty() {
            return Arc::new(vec![]);
        }
        let tail_ts = last_ts(bars);

        if values.len() >= period {
            if let Some(entry) = self.cache.get(&key) {
                if let CachedData::Series(cached) = &entry.data {
                    if entry.last_ts == tail_ts && entry.source_len == values.len() {
                        return cached.clone();
                    }
                    // Continue the recursion from the cached tail value
                    if entry.source_len >= period && cached.len() == entry.source_len {
                        if let Some(new_count) = appended_since(bars, entry.last_ts) {
                            let multiplier = 2.0 / (period as f64 + 1.0);
                            let mut extended = cached.as_ref().clone();
                            let mut prev = *extended.last().expect("non-empty cached ema");
                            for value in &values[values.len() - new_count..] {
                                let next = (value - prev) * multiplier + prev;
                                extended.push(finite_or(next, prev));
                                prev = finite_or(next, prev);
                            }
                            if extended.len() >= values.len() {
                                let excess = extended.len() - values.len();
                                extended.drain(..excess);
                                let arc = Arc::new(extended);
                                drop(entry);
                                self.store_series(key, tail_ts, values.len(), arc.clone());
                                return arc;
                            }
                        }
                    }
                }
            }
        }

        let arc = Arc::new(indicators::ema(&values, period));
        self.store_series(key, tail_ts, values.len(), arc.clone());
        arc
    }

    fn store_series(&self, key: CacheKey, tail_ts: i64, source_len: usize, data: Arc<Vec<f64>>) {
        self.cache.insert(
            key,
            CacheEntry {
                last_ts: tail_ts,
                source_len,
                data: CachedData::Series(data),
            },
        );
    }

    // ---------------------------------------------------------------
    // Recompute-on-growth families
    // ---------------------------------------------------------------

    /// Reuse the cached value while the source has grown by at most
    /// `staleness` bars since materialisation.
    fn reusable(entry: &CacheEntry, bars: &[Bar], staleness: usize) -> bool {
        if entry.last_ts == last_ts(bars) && entry.source_len == bars.len() {
            return true;
        }
        matches!(appended_since(bars, entry.last_ts), Some(n) if n <= staleness)
    }

    pub fn rsi(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        bars: &[Bar],
        period: usize,
    ) -> Arc<Vec<f64>> {
        let key = Self::key(symbol, timeframe, IndicatorSpec::Rsi(period));
        if let Some(entry) = self.cache.get(&key) {
            if let CachedData::Series(cached) = &entry.data {
                if Self::reusable(&entry, bars, period) {
                    return cached.clone();
                }
            }
        }
        let values: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let arc = Arc::new(indicators::rsi(&values, period));
        self.store_series(key, last_ts(bars), bars.len(), arc.clone());
        arc
    }

    pub fn vwap(&self, symbol: &str, timeframe: Timeframe, bars: &[Bar]) -> Arc<Vec<f64>> {
        let key = Self::key(symbol, timeframe, IndicatorSpec::Vwap);
        if let Some(entry) = self.cache.get(&key) {
            if let CachedData::Series(cached) = &entry.data {
                if Self::reusable(&entry, bars, 0) {
                    return cached.clone();
                }
            }
        }
        let arc = Arc::new(indicators::vwap(bars));
        self.store_series(key, last_ts(bars), bars.len(), arc.clone());
        arc
    }

    pub fn bollinger(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        bars: &[Bar],
        period: usize,
        std_dev: f64,
    ) -> Arc<BollingerSeries> {
        let key = Self::key(
            symbol,
            timeframe,
            IndicatorSpec::Bollinger(period, std_dev.to_bits()),
        );
        if let Some(entry) = self.cache.get(&key) {
            if let CachedData::Bollinger(cached) = &entry.data {
                if Self::reusable(&entry, bars, period) {
                    return cached.clone();
                }
            }
        }
        let values: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let arc = Arc::new(indicators::bollinger_bands(&values, period, std_dev));
        self.cache.insert(
            key,
            CacheEntry {
                last_ts: last_ts(bars),
                source_len: bars.len(),
                data: CachedData::Bollinger(arc.clone()),
            },
        );
        arc
    }

    pub fn macd(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        bars: &[Bar],
        fast: usize,
        slow: usize,
        signal: usize,
    ) -> Arc<MacdSeries> {
        let key = Self::key(symbol, timeframe, IndicatorSpec::Macd(fast, slow, signal));
        if let Some(entry) = self.cache.get(&key) {
            if let CachedData::Macd(cached) = &entry.data {
                if Self::reusable(&entry, bars, slow) {
                    return cached.clone();
                }
            }
        }
        let values: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let arc = Arc::new(indicators::macd(&values, fast, slow, signal));
        self.cache.insert(
            key,
            CacheEntry {
                last_ts: last_ts(bars),
                source_len: bars.len(),
                data: CachedData::Macd(arc.clone()),
            },
        );
        arc
    }

    pub fn stochastic(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        bars: &[Bar],
        k_period: usize,
        d_period: usize,
    ) -> Arc<StochasticSeries> {
        let key = Self::key(
            symbol,
            timeframe,
            IndicatorSpec::Stochastic(k_period, d_period),
        );
        if let Some(entry) = self.cache.get(&key) {
            if let CachedData::Stochastic(cached) = &entry.data {
                if Self::reusable(&entry, bars, k_period) {
                    return cached.clone();
                }
            }
        }
        let arc = Arc::new(indicators::stochastic(bars, k_period, d_period));
        self.cache.insert(
            key,
            CacheEntry {
                last_ts: last_ts(bars),
                source_len: bars.len(),
                data: CachedData::Stochastic(arc.clone()),
            },
        );
        arc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn bars(closes: &[f64]) -> Vec<Bar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Bar {
                timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                    + chrono::Duration::days(i as i64),
                open: close,
                high: close + 1.0,
                low: close - 1.0,
                close,
                volume: 1_000.0 + i as f64,
            })
            .collect()
    }

    #[test]
    fn test_sma_incremental_matches_full_recompute() {
        let engine = IndicatorEngine::new();
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let mut series = bars(&closes[..20]);
        engine.sma("^IXIC", Timeframe::Day1, &series, 5);

        series = bars(&closes);
        let extended = engine.sma("^IXIC", Timeframe::Day1, &series, 5);
        let full = indicators::sma(&closes, 5);
        assert_eq!(extended.len(), full.len());
        for (a, b) in extended.iter().zip(&full) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn test_sma_cache_hit_returns_same_allocation() {
        let engine = IndicatorEngine::new();
        let series = bars(&(0..25).map(|i| 50.0 + i as f64).collect::<Vec<_>>());
        let first = engine.sma("^GSPC", Timeframe::Day1, &series, 20);
        let second = engine.sma("^GSPC", Timeframe::Day1, &series, 20);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_ema_incremental_matches_full_recompute() {
        let engine = IndicatorEngine::new();
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + (i as f64).sin()).collect();
        let mut series = bars(&closes[..30]);
        engine.ema("^IXIC", Timeframe::Day1, &series, 9);

        series = bars(&closes);
        let extended = engine.ema("^IXIC", Timeframe::Day1, &series, 9);
        let full = indicators::ema(&closes, 9);
        assert_eq!(extended.len(), full.len());
        for (a, b) in extended.iter().zip(&full) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn test_rsi_reuses_stale_cache_within_period() {
        let engine = IndicatorEngine::new();
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + (i % 7) as f64).collect();
        let series = bars(&closes[..30]);
        let first = engine.rsi("^IXIC", Timeframe::Day1, &series, 14);

        // Grow by fewer than `period` bars: cached value is returned as-is
        let grown = bars(&closes[..35]);
        let second = engine.rsi("^IXIC", Timeframe::Day1, &grown, 14);
        assert!(Arc::ptr_eq(&first, &second));

        // Grow past the period: recomputed
        let grown_more = bars(&closes);
        let third = engine.rsi("^IXIC", Timeframe::Day1, &grown_more, 14);
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(third.len(), indicators::rsi(&closes, 14).len());
    }

    #[test]
    fn test_replaced_series_recomputes() {
        let engine = IndicatorEngine::new();
        let series_a = bars(&(0..25).map(|i| 10.0 + i as f64).collect::<Vec<_>>());
        let first = engine.sma("^IXIC", Timeframe::Day1, &series_a, 5);

        // Entirely different series under the same key
        let mut series_b = bars(&(0..25).map(|i| 90.0 - i as f64).collect::<Vec<_>>());
        for (i, bar) in series_b.iter_mut().enumerate() {
            bar.timestamp = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
                + chrono::Duration::days(i as i64);
        }
        let second = engine.sma("^IXIC", Timeframe::Day1, &series_b, 5);
        assert!(!Arc::ptr_eq(&first, &second));
        assert!((second[0] - (90.0 + 89.0 + 88.0 + 87.0 + 86.0) / 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_invalidate_clears_symbol_entries() {
        let engine = IndicatorEngine::new();
        let series = bars(&(0..25).map(|i| 10.0 + i as f64).collect::<Vec<_>>());
        engine.sma("^IXIC", Timeframe::Day1, &series, 5);
        engine.sma("^GSPC", Timeframe::Day1, &series, 5);
        assert_eq!(engine.cached_series_count(), 2);
        engine.invalidate("^IXIC", Timeframe::Day1);
        assert_eq!(engine.cached_series_count(), 1);
    }
}
