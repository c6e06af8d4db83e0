//! HTTP price provider speaking the chart-API JSON shape.
//!
//! Carries a local sliding-window rate limiter and retries transient
//! failures (timeouts, 429, 5xx) with exponential backoff before surfacing
//! `DataSourceUnavailable`.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use market_core::{Bar, MarketError, PriceProvider, PriceQuote, Timeframe};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

pub const BACKOFF_BASE_SECONDS: u64 = 2;
pub const BACKOFF_CAP_SECONDS: u64 = 30;
pub const MAX_RETRIES: u32 = 3;

/// Backoff before retry `attempt` (0-based): 2s, 4s, 8s, ... capped at 30s.
pub fn backoff_delay(attempt: u32) -> Duration {
    let exp = BACKOFF_BASE_SECONDS.saturating_mul(1u64 << attempt.min(16));
    Duration::from_secs(exp.min(BACKOFF_CAP_SECONDS))
}

/// Sliding-window rate limiter: at most `max_requests` per `window`.
#[derive(Clone)]
struct RateLimiter {
    timestamps: Arc<Mutex<VecDeque<Instant>>>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            timestamps: Arc::new(Mutex::new(VecDeque::new())),
            max_requests,
            window,
        }
    }

    async fn acquire(&self) {
        loop {
            let mut ts = self.timestamps.lock().await;
            let now = Instant::now();

            while let Some(&front) = ts.front() {
                if now.duration_since(front) >= self.window {
                    ts.pop_front();
                } else {
                    break;
                }
            }

            if ts.len() < self.max_requests {
                ts.push_back(now);
                return;
            }

            let wait_until = *ts.front().expect("non-empty at capacity") + self.window;
            let sleep_for = wait_until.duration_since(now) + Duration::from_millis(50);
            drop(ts);
            tracing::debug!(
                "price client rate limiter: waiting {:.1}s for a slot",
                sleep_for.as_secs_f64()
            );
            tokio::time::sleep(sleep_for).await;
        }
    }
}

// Chart-API response shape
#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartBody,
}

#[derive(Debug, Deserialize)]
struct ChartBody {
    result: Option<Vec<ChartResult>>,
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: ChartIndicators,
}

#[derive(Debug, Deserialize)]
struct ChartMeta {
    #[serde(rename = "regularMarketPrice")]
    regular_market_price: Option<f64>,
    #[serde(rename = "regularMarketTime")]
    regular_market_time: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ChartIndicators {
    quote: Vec<ChartQuote>,
}

#[derive(Debug, Default, Deserialize)]
struct ChartQuote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

fn interval_param(timeframe: Timeframe) -> &'static str {
    match timeframe {
        Timeframe::Minute1 => "1m",
        Timeframe::Minute15 => "15m",
        Timeframe::Hour1 => "60m",
        Timeframe::Day1 => "1d",
    }
}

fn range_param(timeframe: Timeframe, count: usize) -> &'static str {
    let minutes = timeframe.to_minutes() * count as i64;
    match timeframe {
        Timeframe::Day1 => {
            if count <= 250 {
                "1y"
            } else {
                "2y"
            }
        }
        _ if minutes <= 24 * 60 => "1d",
        _ => "5d",
    }
}

/// Rows with any missing field are skipped; timestamps must come back
/// non-decreasing and duplicates collapse to the first occurrence.
fn bars_from_chart(result: &ChartResult) -> Vec<Bar> {
    let Some(quote) = result.indicators.quote.first() else {
        return vec![];
    };

    let mut bars: Vec<Bar> = Vec::with_capacity(result.timestamp.len());
    for (i, &ts) in result.timestamp.iter().enumerate() {
        let (Some(open), Some(high), Some(low), Some(close)) = (
            quote.open.get(i).copied().flatten(),
            quote.high.get(i).copied().flatten(),
            quote.low.get(i).copied().flatten(),
            quote.close.get(i).copied().flatten(),
        ) else {
            continue;
        };
        let volume = quote.volume.get(i).copied().flatten().unwrap_or(0.0);
        let Some(timestamp) = DateTime::<Utc>::from_timestamp(ts, 0) else {
            continue;
        };
        if bars
            .last()
            .is_some_and(|prev: &Bar| timestamp <= prev.timestamp)
        {
            continue;
        }
        bars.push(Bar {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        });
    }
    bars
}

#[derive(Clone)]
pub struct HttpPriceClient {
    base_url: String,
    client: Client,
    rate_limiter: RateLimiter,
}

impl HttpPriceClient {
    pub fn new(base_url: impl Into<String>, requests_per_minute: usize) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            base_url: base_url.into(),
            client,
            rate_limiter: RateLimiter::new(requests_per_minute, Duration::from_secs(60)),
        }
    }

    async fn fetch_chart(
        &self,
        symbol: &str,
        interval: &str,
        range: &str,
    ) -> Result<ChartResult, MarketError> {
        let url = format!("{}/v8/finance/chart/{}", self.base_url, symbol);

        let mut last_error = String::new();
        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let delay = backoff_delay(attempt - 1);
                tracing::debug!(
                    symbol,
                    attempt,
                    delay_secs = delay.as_secs(),
                    "retrying price request"
                );
                tokio::time::sleep(delay).await;
            }
            self.rate_limiter.acquire().await;

            let response = self
                .client
                .get(&url)
                .query(&[("interval", interval), ("range", range)])
                .send()
                .await;

            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    // Timeouts and connection errors are transient
                    last_error = e.to_string();
                    continue;
                }
            };

            let status = response.status();
            if status.as_u16() == 429 {
                last_error = "rate limited by provider".to_string();
                tracing::warn!(symbol, attempt, "price provider returned 429");
                continue;
            }
            if status.is_server_error() {
                last_error = format!("HTTP {}", status);
                continue;
            }
            if !status.is_success() {
                return Err(MarketError::ApiError(format!(
                    "HTTP {}: {}",
                    status,
                    response.text().await.unwrap_or_default()
                )));
            }

            let parsed: ChartResponse = response
                .json()
                .await
                .map_err(|e| MarketError::ApiError(e.to_string()))?;
            if let Some(error) = parsed.chart.error {
                return Err(MarketError::ApiError(error.to_string()));
            }
            return parsed
                .chart
                .result
                .and_then(|mut results| {
                    if results.is_empty() {
                        None
                    } else {
                        Some(results.remove(0))
                    }
                })
                .ok_or_else(|| {
                    MarketError::InsufficientData(format!("no chart data for {}", symbol))
                });
        }

        Err(MarketError::DataSourceUnavailable(format!(
            "{} after {} retries: {}",
            symbol, MAX_RETRIES, last_error
        )))
    }
}

#[async_trait]
impl PriceProvider for HttpPriceClient {
    async fn get_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        count: usize,
    ) -> Result<Vec<Bar>, MarketError> {
        let result = self
            .fetch_chart(symbol, interval_param(timeframe), range_param(timeframe, count))
            .await?;
        let mut bars = bars_from_chart(&result);
        if bars.len() > count {
            bars.drain(..bars.len() - count);
        }
        Ok(bars)
    }

    async fn get_current_price(&self, symbol: &str) -> Result<PriceQuote, MarketError> {
        let result = self.fetch_chart(symbol, "1m", "1d").await?;

        if let (Some(price), Some(ts)) = (
            result.meta.regular_market_price,
            result.meta.regular_market_time,
        ) {
            if let Some(timestamp) = DateTime::<Utc>::from_timestamp(ts, 0) {
                return Ok(PriceQuote { price, timestamp });
            }
        }

        // Fall back to the last complete bar
        bars_from_chart(&result)
            .last()
            .map(|bar| PriceQuote {
                price: bar.close,
                timestamp: bar.timestamp,
            })
            .ok_or_else(|| {
                MarketError::InsufficientData(format!("no recent price for {}", symbol))
            })
    }
}
