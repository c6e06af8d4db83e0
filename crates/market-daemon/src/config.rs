//! Environment-driven configuration with validation.
//!
//! All knobs load once at startup; a missing required setting is fatal.

use std::collections::HashMap;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use chrono::Duration;
use db_monitor::PoolConfig;
use market_core::{tuning, Timeframe};

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,

    pub watch_symbols: Vec<String>,
    pub watch_timeframes: Vec<Timeframe>,

    pub price_api_base_url: String,
    pub price_requests_per_minute: usize,

    pub cache_max_bars: usize,
    pub cache_ttl_seconds: Option<u64>,

    pub min_breakout_pct: f64,
    pub dedup_default_minutes: i64,
    pub dedup_overrides: HashMap<String, i64>,

    pub outcome_tick_seconds: u64,

    pub pattern_window_days: i64,
    pub sequential_gap_days: i64,
    pub concurrent_gap_minutes: i64,

    pub alert_rate_limit_per_hour: usize,
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub slack_webhook_url: Option<String>,
    pub alert_webhook_url: Option<String>,
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub smtp_from: Option<String>,
    pub smtp_to: Vec<String>,

    pub slow_query_threshold_seconds: f64,
    pub slow_query_flush_interval_seconds: u64,
    pub slow_query_retention_days: i64,

    pub pool: PoolConfig,

    pub worker_limit: usize,
    pub shutdown_grace_seconds: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            watch_symbols: vec!["^IXIC".to_string(), "^GSPC".to_string()],
            watch_timeframes: vec![Timeframe::Day1],
            price_api_base_url: "https://query1.finance.yahoo.com".to_string(),
            price_requests_per_minute: 60,
            cache_max_bars: 400,
            cache_ttl_seconds: None,
            min_breakout_pct: tuning::MIN_BREAKOUT_PCT,
            dedup_default_minutes: 60,
            dedup_overrides: HashMap::new(),
            outcome_tick_seconds: 300,
            pattern_window_days: 90,
            sequential_gap_days: 7,
            concurrent_gap_minutes: 30,
            alert_rate_limit_per_hour: 5,
            telegram_bot_token: None,
            telegram_chat_id: None,
            slack_webhook_url: None,
            alert_webhook_url: None,
            smtp_host: None,
            smtp_port: 587,
            smtp_username: None,
            smtp_password: None,
            smtp_from: None,
            smtp_to: Vec::new(),
            slow_query_threshold_seconds: 1.0,
            slow_query_flush_interval_seconds: 30,
            slow_query_retention_days: 30,
            pool: PoolConfig::default(),
            worker_limit: 5,
            shutdown_grace_seconds: 30,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let database_url = env_opt("DATABASE_URL")
            .context("DATABASE_URL is required (e.g. sqlite:marketpulse.db?mode=rwc)")?;

        let watch_symbols = env_opt("WATCH_SYMBOLS")
            .map(|v| parse_list(&v))
            .unwrap_or(defaults.watch_symbols);

        let watch_timeframes = match env_opt("WATCH_TIMEFRAMES") {
            Some(v) => parse_timeframes(&v)?,
            None => defaults.watch_timeframes,
        };

        let config = Self {
            database_url,
            watch_symbols,
            watch_timeframes,
            price_api_base_url: env_opt("PRICE_API_BASE_URL")
                .unwrap_or(defaults.price_api_base_url),
            price_requests_per_minute: env_parse(
                "PRICE_REQUESTS_PER_MINUTE",
                defaults.price_requests_per_minute,
            ),
            cache_max_bars: env_parse("CACHE_MAX_BARS", defaults.cache_max_bars),
            cache_ttl_seconds: env_opt("CACHE_TTL_SECONDS").and_then(|v| v.parse().ok()),
            min_breakout_pct: env_parse("MIN_BREAKOUT_PCT", defaults.min_breakout_pct),
            dedup_default_minutes: env_parse(
                "DEDUP_WINDOW_MINUTES",
                defaults.dedup_default_minutes,
            ),
            dedup_overrides: env_opt("DEDUP_WINDOW_OVERRIDES")
                .map(|v| parse_overrides(&v))
                .unwrap_or_default(),
            outcome_tick_seconds: env_parse("OUTCOME_TICK_SECONDS", defaults.outcome_tick_seconds),
            pattern_window_days: env_parse("PATTERN_WINDOW_DAYS", defaults.pattern_window_days),
            sequential_gap_days: env_parse("SEQUENTIAL_GAP_DAYS", defaults.sequential_gap_days),
            concurrent_gap_minutes: env_parse(
                "CONCURRENT_GAP_MINUTES",
                defaults.concurrent_gap_minutes,
            ),
            alert_rate_limit_per_hour: env_parse(
                "ALERT_RATE_LIMIT_PER_HOUR",
                defaults.alert_rate_limit_per_hour,
            ),
            telegram_bot_token: env_opt("TELEGRAM_BOT_TOKEN"),
            telegram_chat_id: env_opt("TELEGRAM_CHAT_ID"),
            slack_webhook_url: env_opt("SLACK_WEBHOOK_URL"),
            alert_webhook_url: env_opt("ALERT_WEBHOOK_URL"),
            smtp_host: env_opt("SMTP_HOST"),
            smtp_port: env_parse("SMTP_PORT", defaults.smtp_port),
            smtp_username: env_opt("SMTP_USERNAME"),
            smtp_password: env_opt("SMTP_PASSWORD"),
            smtp_from: env_opt("SMTP_FROM_ADDRESS"),
            smtp_to: env_opt("ALERT_EMAIL_TO")
                .map(|v| parse_list(&v))
                .unwrap_or_default(),
            slow_query_threshold_seconds: env_parse(
                "SLOW_QUERY_THRESHOLD_SECONDS",
                defaults.slow_query_threshold_seconds,
            ),
            slow_query_flush_interval_seconds: env_parse(
                "SLOW_QUERY_FLUSH_INTERVAL_SECONDS",
                defaults.slow_query_flush_interval_seconds,
            ),
            slow_query_retention_days: env_parse(
                "SLOW_QUERY_RETENTION_DAYS",
                defaults.slow_query_retention_days,
            ),
            pool: PoolConfig {
                min_size: env_parse("POOL_MIN_SIZE", defaults.pool.min_size),
                max_size: env_parse("POOL_MAX_SIZE", defaults.pool.max_size),
                max_overflow: env_parse("POOL_MAX_OVERFLOW", defaults.pool.max_overflow),
                timeout_seconds: env_parse("POOL_TIMEOUT_SECONDS", defaults.pool.timeout_seconds),
                recycle_seconds: env_parse("POOL_RECYCLE_SECONDS", defaults.pool.recycle_seconds),
                adjustment_interval_seconds: env_parse(
                    "POOL_ADJUSTMENT_INTERVAL_SECONDS",
                    defaults.pool.adjustment_interval_seconds,
                ),
                utilization_threshold_high: env_parse(
                    "POOL_UTIL_HIGH",
                    defaults.pool.utilization_threshold_high,
                ),
                utilization_threshold_low: env_parse(
                    "POOL_UTIL_LOW",
                    defaults.pool.utilization_threshold_low,
                ),
                adjustment_step: env_parse("POOL_STEP", defaults.pool.adjustment_step),
            },
            worker_limit: env_parse("WORKER_LIMIT", defaults.worker_limit),
            shutdown_grace_seconds: env_parse(
                "SHUTDOWN_GRACE_SECONDS",
                defaults.shutdown_grace_seconds,
            ),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.database_url.is_empty() {
            bail!("DATABASE_URL must not be empty");
        }
        if self.watch_symbols.is_empty() {
            bail!("WATCH_SYMBOLS must name at least one symbol");
        }
        if self.watch_timeframes.is_empty() {
            bail!("WATCH_TIMEFRAMES must name at least one timeframe");
        }
        if self.cache_max_bars < 201 {
            bail!(
                "CACHE_MAX_BARS ({}) must exceed the longest indicator period (200)",
                self.cache_max_bars
            );
        }
        if self.pool.min_size == 0 || self.pool.min_size > self.pool.max_size {
            bail!(
                "pool bounds invalid: min {} max {}",
                self.pool.min_size,
                self.pool.max_size
            );
        }
        if self.pool.utilization_threshold_low >= self.pool.utilization_threshold_high {
            bail!("POOL_UTIL_LOW must be below POOL_UTIL_HIGH");
        }
        if !(self.min_breakout_pct >= 0.0 && self.min_breakout_pct < 0.5) {
            bail!("MIN_BREAKOUT_PCT ({}) out of range", self.min_breakout_pct);
        }
        if self.worker_limit == 0 {
            bail!("WORKER_LIMIT must be positive");
        }
        Ok(())
    }

    /// Resolve the dedup window for a signal type: explicit override, then
    /// the class table, then the configured default.
    pub fn dedup_window_for(&self, signal_type: &str, timeframe: Timeframe) -> Duration {
        let minutes = self
            .dedup_overrides
            .get(signal_type)
            .copied()
            .or_else(|| tuning::class_dedup_minutes(signal_type, timeframe))
            .unwrap_or(self.dedup_default_minutes);
        Duration::minutes(minutes)
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_timeframes(value: &str) -> Result<Vec<Timeframe>> {
    parse_list(value)
        .iter()
        .map(|s| {
            Timeframe::parse(s).with_context(|| format!("unknown timeframe {s:?} in WATCH_TIMEFRAMES"))
        })
        .collect()
}

fn parse_overrides(value: &str) -> HashMap<String, i64> {
    parse_list(value)
        .iter()
        .filter_map(|pair| {
            let (key, minutes) = pair.split_once('=')?;
            Some((key.trim().to_string(), minutes.trim().parse().ok()?))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list_and_overrides() {
        assert_eq!(parse_list(" ^IXIC, ^GSPC ,"), vec!["^IXIC", "^GSPC"]);
        let overrides = parse_overrides("golden_cross=120, RSI_overbought=30, bad");
        assert_eq!(overrides.get("golden_cross"), Some(&120));
        assert_eq!(overrides.get("RSI_overbought"), Some(&30));
        assert_eq!(overrides.len(), 2);
    }

    #[test]
    fn test_parse_timeframes_rejects_unknown() {
        assert!(parse_timeframes("1day,15min").is_ok());
        assert!(parse_timeframes("1day,2day").is_err());
    }

    #[test]
    fn test_dedup_window_resolution() {
        let mut config = AppConfig {
            database_url: "sqlite::memory:".to_string(),
            ..Default::default()
        };
        config
            .dedup_overrides
            .insert("golden_cross".to_string(), 120);

        // Explicit override wins
        assert_eq!(
            config.dedup_window_for("golden_cross", Timeframe::Day1),
            Duration::minutes(120)
        );
        // Class table applies next
        assert_eq!(
            config.dedup_window_for("MA200_breakout_up", Timeframe::Day1),
            Duration::minutes(1440)
        );
        // Unknown types use the configured default
        assert_eq!(
            config.dedup_window_for("sentiment_shift", Timeframe::Day1),
            Duration::minutes(60)
        );
    }

    #[test]
    fn test_validation_catches_bad_bounds() {
        let valid = AppConfig {
            database_url: "sqlite::memory:".to_string(),
            ..Default::default()
        };
        assert!(valid.validate().is_ok());

        let mut bad_pool = valid.clone();
        bad_pool.pool.min_size = 50;
        assert!(bad_pool.validate().is_err());

        let mut bad_cache = valid.clone();
        bad_cache.cache_max_bars = 100;
        assert!(bad_cache.validate().is_err());

        let mut no_db = valid.clone();
        no_db.database_url.clear();
        assert!(no_db.validate().is_err());
    }
}
