use chrono::{DateTime, Utc};
use market_core::timefmt::parse_ts;
use serde::{Deserialize, Serialize};

/// A persisted row of `technical_signals`. Immutable after creation except
/// for `alert_sent`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SignalRecord {
    pub id: i64,
    pub symbol: String,
    pub signal_type: String,
    pub timeframe: String,
    pub triggered_at: String,
    pub current_price: f64,
    pub indicator_value: Option<f64>,
    pub signal_strength: Option<f64>,
    pub volume: Option<f64>,
    pub market_condition: Option<String>,
    pub additional_context: Option<String>,
    pub alert_sent: i64,
    pub created_at: String,
}

impl SignalRecord {
    pub fn triggered_at_utc(&self) -> Option<DateTime<Utc>> {
        parse_ts(&self.triggered_at)
    }

    pub fn alert_sent(&self) -> bool {
        self.alert_sent != 0
    }
}

/// A persisted row of `signal_outcomes`, 1:1 with a signal. Horizon price
/// slots are write-once.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OutcomeRecord {
    pub id: i64,
    pub signal_id: i64,
    pub price_1h: Option<f64>,
    pub price_4h: Option<f64>,
    pub price_1d: Option<f64>,
    pub price_1w: Option<f64>,
    pub price_1m: Option<f64>,
    pub return_1h: Option<f64>,
    pub return_4h: Option<f64>,
    pub return_1d: Option<f64>,
    pub return_1w: Option<f64>,
    pub return_1m: Option<f64>,
    pub is_complete: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl OutcomeRecord {
    pub fn is_complete(&self) -> bool {
        self.is_complete != 0
    }

    pub fn price_for(&self, horizon: Horizon) -> Option<f64> {
        match horizon {
            Horizon::Hour1 => self.price_1h,
            Horizon::Hour4 => self.price_4h,
            Horizon::Day1 => self.price_1d,
            Horizon::Week1 => self.price_1w,
            Horizon::Month1 => self.price_1m,
        }
    }

    pub fn return_for(&self, horizon: Horizon) -> Option<f64> {
        match horizon {
            Horizon::Hour1 => self.return_1h,
            Horizon::Hour4 => self.return_4h,
            Horizon::Day1 => self.return_1d,
            Horizon::Week1 => self.return_1w,
            Horizon::Month1 => self.return_1m,
        }
    }
}

/// Fixed outcome horizons, in fill order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Horizon {
    Hour1,
    Hour4,
    Day1,
    Week1,
    Month1,
}

impl Horizon {
    pub const ALL: [Horizon; 5] = [
        Horizon::Hour1,
        Horizon::Hour4,
        Horizon::Day1,
        Horizon::Week1,
        Horizon::Month1,
    ];

    pub fn hours(&self) -> i64 {
        match self {
            Horizon::Hour1 => 1,
            Horizon::Hour4 => 4,
            Horizon::Day1 => 24,
            Horizon::Week1 => 168,
            Horizon::Month1 => 720,
        }
    }

    pub fn price_column(&self) -> &'static str {
        match self {
            Horizon::Hour1 => "price_1h",
            Horizon::Hour4 => "price_4h",
            Horizon::Day1 => "price_1d",
            Horizon::Week1 => "price_1w",
            Horizon::Month1 => "price_1m",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Horizon::Hour1 => "1h",
            Horizon::Hour4 => "4h",
            Horizon::Day1 => "1d",
            Horizon::Week1 => "1w",
            Horizon::Month1 => "1m",
        }
    }
}

/// Filter for `SignalStore::recent`.
#[derive(Debug, Clone, Default)]
pub struct SignalFilter {
    pub symbol: Option<String>,
    pub signal_type: Option<String>,
    pub hours: i64,
}

/// Aggregate fill state of the outcome table.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct OutcomeFillCounts {
    pub total: i64,
    pub completed: i64,
    pub with_1h: i64,
    pub with_4h: i64,
    pub with_1d: i64,
    pub with_1w: i64,
    pub with_1m: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_horizons_ordered_ascending() {
        let hours: Vec<i64> = Horizon::ALL.iter().map(|h| h.hours()).collect();
        assert_eq!(hours, vec![1, 4, 24, 168, 720]);
    }
}
