//! In-memory, TTL-bounded store of recent OHLCV bars per (symbol, timeframe).
//!
//! Each series keeps at most `max_bars` bars and is refreshed by a single
//! writer (the scheduler's refresh task); readers clone snapshots out of the
//! map. Out-of-order bars never advance a series.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use market_core::{Bar, PriceQuote, Timeframe};

/// Result of appending a bar to a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    /// Timestamp not strictly after the series tail; the bar is dropped.
    Stale,
    /// Bar violates the OHLCV invariant; the bar is dropped.
    Malformed,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SeriesKey {
    symbol: String,
    timeframe: Timeframe,
}

struct SeriesEntry {
    bars: VecDeque<Bar>,
    refreshed_at: Instant,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum bars retained per series. Must exceed the longest indicator
    /// period in use (200) so derived series stay computable.
    pub max_bars: usize,
    /// Overrides the timeframe's natural cadence when set.
    pub ttl: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_bars: 400,
            ttl: None,
        }
    }
}

pub struct PriceSeriesCache {
    series: DashMap<SeriesKey, SeriesEntry>,
    config: CacheConfig,
}

impl PriceSeriesCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            series: DashMap::new(),
            config,
        }
    }

    fn key(symbol: &str, timeframe: Timeframe) -> SeriesKey {
        SeriesKey {
            symbol: symbol.to_string(),
            timeframe,
        }
    }

    /// Snapshot of the cached bars, oldest first. Empty when nothing is cached.
    pub fn get_series(&self, symbol: &str, timeframe: Timeframe) -> Vec<Bar> {
        self.series
            .get(&Self::key(symbol, timeframe))
            .map(|e| e.bars.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn series_len(&self, symbol: &str, timeframe: Timeframe) -> usize {
        self.series
            .get(&Self::key(symbol, timeframe))
            .map(|e| e.bars.len())
            .unwrap_or(0)
    }

    /// Append one bar, evicting the oldest once the series exceeds its cap.
    pub fn append(&self, symbol: &str, timeframe: Timeframe, bar: Bar) -> AppendOutcome {
        if !bar.is_well_formed() {
            tracing::debug!(symbol, timeframe = timeframe.as_str(), "dropping malformed bar");
            return AppendOutcome::Malformed;
        }

        let mut entry = self
            .series
            .entry(Self::key(symbol, timeframe))
            .or_insert_with(|| SeriesEntry {
                bars: VecDeque::new(),
                refreshed_at: Instant::now(),
            });

        if let Some(last) = entry.bars.back() {
            if bar.timestamp <= last.timestamp {
                tracing::debug!(
                    symbol,
                    timeframe = timeframe.as_str(),
                    ts = %bar.timestamp,
                    last_ts = %last.timestamp,
                    "dropping stale bar"
                );
                return AppendOutcome::Stale;
            }
        }

        entry.bars.push_back(bar);
        while entry.bars.len() > self.config.max_bars {
            entry.bars.pop_front();
        }
        entry.refreshed_at = Instant::now();
        AppendOutcome::Appended
    }

    /// Replace a series wholesale (cold load / TTL reload). Bars must arrive
    /// oldest first; out-of-order and malformed bars are skipped.
    pub fn replace_series(&self, symbol: &str, timeframe: Timeframe, bars: Vec<Bar>) -> usize {
        let mut deque: VecDeque<Bar> = VecDeque::with_capacity(bars.len());
        for bar in bars {
            if !bar.is_well_formed() {
                continue;
            }
            if deque.back().is_some_and(|last| bar.timestamp <= last.timestamp) {
                continue;
            }
            deque.push_back(bar);
        }
        while deque.len() > self.config.max_bars {
            deque.pop_front();
        }

        let loaded = deque.len();
        self.series.insert(
            Self::key(symbol, timeframe),
            SeriesEntry {
                bars: deque,
                refreshed_at: Instant::now(),
            },
        );
        loaded
    }

    /// Latest close for a symbol from the finest cached timeframe.
    pub fn latest_price(&self, symbol: &str) -> Option<PriceQuote> {
        for timeframe in [
            Timeframe::Minute1,
            Timeframe::Minute15,
            Timeframe::Hour1,
            Timeframe::Day1,
        ] {
            if let Some(entry) = self.series.get(&Self::key(symbol, timeframe)) {
                if let Some(last) = entry.bars.back() {
                    return Some(PriceQuote {
                        price: last.close,
                        timestamp: last.timestamp,
                    });
                }
            }
        }
        None
    }

    /// True when the series is absent, empty, or older than its TTL.
    pub fn needs_refresh(&self, symbol: &str, timeframe: Timeframe) -> bool {
        let ttl = self.config.ttl.unwrap_or_else(|| timeframe.refresh_interval());
        match self.series.get(&Self::key(symbol, timeframe)) {
            Some(entry) => entry.bars.is_empty() || entry.refreshed_at.elapsed() >= ttl,
            None => true,
        }
    }

    /// Symbols currently cached on any timeframe.
    pub fn symbols(&self) -> Vec<String> {
        let mut out: Vec<String> = self.series.iter().map(|e| e.key().symbol.clone()).collect();
        out.sort();
        out.dedup();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn bar_at(minutes: i64, close: f64) -> Bar {
        let ts = Utc.with_ymd_and_hms(2024, 6, 3, 14, 0, 0).unwrap()
            + chrono::Duration::minutes(minutes);
        Bar {
            timestamp: ts,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 1000.0,
        }
    }

    fn ts(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, 14, 0, 0).unwrap() + chrono::Duration::minutes(minutes)
    }

    #[test]
    fn test_append_and_get() {
        let cache = PriceSeriesCache::new(CacheConfig::default());
        for i in 0..3 {
            assert_eq!(
                cache.append("^IXIC", Timeframe::Minute1, bar_at(i, 100.0 + i as f64)),
                AppendOutcome::Appended
            );
        }
        let series = cache.get_series("^IXIC", Timeframe::Minute1);
        assert_eq!(series.len(), 3);
        assert_eq!(series[2].close, 102.0);
    }

    #[test]
    fn test_stale_bar_rejected() {
        let cache = PriceSeriesCache::new(CacheConfig::default());
        cache.append("^IXIC", Timeframe::Minute1, bar_at(5, 100.0));
        assert_eq!(
            cache.append("^IXIC", Timeframe::Minute1, bar_at(5, 101.0)),
            AppendOutcome::Stale
        );
        assert_eq!(
            cache.append("^IXIC", Timeframe::Minute1, bar_at(3, 101.0)),
            AppendOutcome::Stale
        );
        assert_eq!(cache.series_len("^IXIC", Timeframe::Minute1), 1);
    }

    #[test]
    fn test_malformed_bar_rejected() {
        let cache = PriceSeriesCache::new(CacheConfig::default());
        let mut bad = bar_at(0, 100.0);
        bad.high = 98.0;
        assert_eq!(
            cache.append("^IXIC", Timeframe::Minute1, bad),
            AppendOutcome::Malformed
        );
        assert_eq!(cache.series_len("^IXIC", Timeframe::Minute1), 0);
    }

    #[test]
    fn test_eviction_keeps_most_recent() {
        let cache = PriceSeriesCache::new(CacheConfig {
            max_bars: 5,
            ttl: None,
        });
        for i in 0..8 {
            cache.append("^GSPC", Timeframe::Day1, bar_at(i * 1440, i as f64));
        }
        let series = cache.get_series("^GSPC", Timeframe::Day1);
        assert_eq!(series.len(), 5);
        assert_eq!(series[0].close, 3.0);
        assert_eq!(series[4].close, 7.0);
    }

    #[test]
    fn test_latest_price_prefers_finest_timeframe() {
        let cache = PriceSeriesCache::new(CacheConfig::default());
        cache.append("^IXIC", Timeframe::Day1, bar_at(0, 200.0));
        cache.append("^IXIC", Timeframe::Minute1, bar_at(10, 201.5));
        let quote = cache.latest_price("^IXIC").unwrap();
        assert_eq!(quote.price, 201.5);
        assert_eq!(quote.timestamp, ts(10));
    }

    #[test]
    fn test_replace_series_skips_out_of_order() {
        let cache = PriceSeriesCache::new(CacheConfig::default());
        let bars = vec![bar_at(0, 1.0), bar_at(2, 2.0), bar_at(1, 9.0), bar_at(3, 3.0)];
        let loaded = cache.replace_series("^IXIC", Timeframe::Minute1, bars);
        assert_eq!(loaded, 3);
        let series = cache.get_series("^IXIC", Timeframe::Minute1);
        assert_eq!(series.iter().map(|b| b.close).collect::<Vec<_>>(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_needs_refresh_when_empty_or_expired() {
        let cache = PriceSeriesCache::new(CacheConfig {
            max_bars: 400,
            ttl: Some(Duration::ZERO),
        });
        assert!(cache.needs_refresh("^IXIC", Timeframe::Minute1));
        cache.append("^IXIC", Timeframe::Minute1, bar_at(0, 100.0));
        // Zero TTL: immediately stale again
        assert!(cache.needs_refresh("^IXIC", Timeframe::Minute1));
    }
}
