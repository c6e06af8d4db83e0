use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// OHLCV bar data
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// A bar is well-formed when high/low bracket the body and volume is
    /// non-negative. Malformed bars are dropped at the cache boundary.
    pub fn is_well_formed(&self) -> bool {
        self.high >= self.open.max(self.close)
            && self.low <= self.open.min(self.close)
            && self.volume >= 0.0
            && self.open.is_finite()
            && self.high.is_finite()
            && self.low.is_finite()
            && self.close.is_finite()
    }
}

/// Latest traded price for a symbol, as reported by a price provider.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PriceQuote {
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

/// Timeframe of a bar series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    Minute1,
    Minute15,
    Hour1,
    Day1,
}

impl Timeframe {
    pub fn to_minutes(&self) -> i64 {
        match self {
            Timeframe::Minute1 => 1,
            Timeframe::Minute15 => 15,
            Timeframe::Hour1 => 60,
            Timeframe::Day1 => 1440,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::Minute1 => "1min",
            Timeframe::Minute15 => "15min",
            Timeframe::Hour1 => "1hour",
            Timeframe::Day1 => "1day",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "1min" => Some(Timeframe::Minute1),
            "15min" => Some(Timeframe::Minute15),
            "1hour" => Some(Timeframe::Hour1),
            "1day" => Some(Timeframe::Day1),
            _ => None,
        }
    }

    /// Natural refresh cadence for a series of this timeframe.
    pub fn refresh_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.to_minutes() as u64 * 60)
    }
}

/// Market condition attached to an emitted signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketCondition {
    Bullish,
    Bearish,
    Sideways,
}

impl MarketCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketCondition::Bullish => "bullish",
            MarketCondition::Bearish => "bearish",
            MarketCondition::Sideways => "sideways",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "bullish" => Some(MarketCondition::Bullish),
            "bearish" => Some(MarketCondition::Bearish),
            "sideways" => Some(MarketCondition::Sideways),
            _ => None,
        }
    }
}

/// A signal proposed by the detector, not yet persisted.
///
/// `signal_type` uses the canonical codes (`MA200_breakout_up`,
/// `golden_cross`, `RSI_overbought`, `BB_break_upper`, `sentiment_shift`, ...)
/// shared with the persisted rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSignal {
    pub symbol: String,
    pub signal_type: String,
    pub timeframe: Timeframe,
    pub triggered_at: DateTime<Utc>,
    pub current_price: f64,
    pub indicator_value: Option<f64>,
    pub signal_strength: Option<f64>,
    pub volume: Option<f64>,
    pub market_condition: MarketCondition,
    pub additional_context: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn bar(open: f64, high: f64, low: f64, close: f64, volume: f64) -> Bar {
        Bar {
            timestamp: Utc::now(),
            open,
            high,
            low,
            close,
            volume,
        }
    }

    #[test]
    fn test_well_formed_bar() {
        assert!(bar(100.0, 102.0, 99.0, 101.0, 1000.0).is_well_formed());
    }

    #[test]
    fn test_bar_high_below_body_rejected() {
        assert!(!bar(100.0, 100.5, 99.0, 101.0, 1000.0).is_well_formed());
    }

    #[test]
    fn test_bar_negative_volume_rejected() {
        assert!(!bar(100.0, 102.0, 99.0, 101.0, -1.0).is_well_formed());
    }

    #[test]
    fn test_timeframe_round_trip() {
        for tf in [
            Timeframe::Minute1,
            Timeframe::Minute15,
            Timeframe::Hour1,
            Timeframe::Day1,
        ] {
            assert_eq!(Timeframe::parse(tf.as_str()), Some(tf));
        }
        assert_eq!(Timeframe::parse("2day"), None);
    }
}
