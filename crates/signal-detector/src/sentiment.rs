//! Composite market-sentiment scoring across five indicator families.

use serde_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SentimentLabel {
    VeryBearish,
    Bearish,
    SlightlyBearish,
    Neutral,
    SlightlyBullish,
    Bullish,
    VeryBullish,
}

impl SentimentLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SentimentLabel::VeryBearish => "very_bearish",
            SentimentLabel::Bearish => "bearish",
            SentimentLabel::SlightlyBearish => "slightly_bearish",
            SentimentLabel::Neutral => "neutral",
            SentimentLabel::SlightlyBullish => "slightly_bullish",
            SentimentLabel::Bullish => "bullish",
            SentimentLabel::VeryBullish => "very_bullish",
        }
    }

    pub fn from_total(total: i32) -> Self {
        if total >= 4 {
            SentimentLabel::VeryBullish
        } else if total >= 2 {
            SentimentLabel::Bullish
        } else if total >= 1 {
            SentimentLabel::SlightlyBullish
        } else if total <= -4 {
            SentimentLabel::VeryBearish
        } else if total <= -2 {
            SentimentLabel::Bearish
        } else if total <= -1 {
            SentimentLabel::SlightlyBearish
        } else {
            SentimentLabel::Neutral
        }
    }
}

/// Per-family scores in {-2..2} (volume in {-1..1}).
#[derive(Debug, Clone, Copy, Default)]
pub struct SentimentScores {
    pub rsi: i32,
    pub macd: i32,
    pub stochastic: i32,
    pub moving_average: i32,
    pub volume: i32,
}

impl SentimentScores {
    pub fn total(&self) -> i32 {
        self.rsi + self.macd + self.stochastic + self.moving_average + self.volume
    }

    pub fn label(&self) -> SentimentLabel {
        SentimentLabel::from_total(self.total())
    }

    /// Normalised score in [0, 1]; 0.5 is neutral.
    pub fn ratio(&self) -> f64 {
        let max = 5 * 2;
        let min = -max;
        (self.total() - min) as f64 / (max - min) as f64
    }

    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "rsi": self.rsi,
            "macd": self.macd,
            "stochastic": self.stochastic,
            "moving_average": self.moving_average,
            "volume": self.volume,
        })
    }
}

pub fn score_rsi(rsi: f64) -> i32 {
    if rsi >= 70.0 {
        -2
    } else if rsi >= 60.0 {
        -1
    } else if rsi <= 30.0 {
        2
    } else if rsi <= 40.0 {
        1
    } else {
        0
    }
}

pub fn score_macd(macd: f64, signal: f64, histogram: f64) -> i32 {
    if macd > signal && histogram > 0.0 {
        2
    } else if macd > signal {
        1
    } else if macd < signal && histogram < 0.0 {
        -2
    } else if macd < signal {
        -1
    } else {
        0
    }
}

pub fn score_stochastic(k: f64, d: f64) -> i32 {
    if k >= 80.0 && d >= 80.0 {
        -2
    } else if k >= 70.0 || d >= 70.0 {
        -1
    } else if k <= 20.0 && d <= 20.0 {
        2
    } else if k <= 30.0 || d <= 30.0 {
        1
    } else {
        0
    }
}

pub fn score_moving_average(price: f64, sma20: f64, sma50: f64) -> i32 {
    if price > sma20 && sma20 > sma50 {
        2
    } else if price > sma20 {
        1
    } else if price < sma20 && sma20 < sma50 {
        -2
    } else if price < sma20 {
        -1
    } else {
        0
    }
}

pub fn score_volume(volume_ratio: f64) -> i32 {
    if volume_ratio >= 1.5 {
        1
    } else if volume_ratio <= 0.7 {
        -1
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_thresholds() {
        assert_eq!(SentimentLabel::from_total(6), SentimentLabel::VeryBullish);
        assert_eq!(SentimentLabel::from_total(4), SentimentLabel::VeryBullish);
        assert_eq!(SentimentLabel::from_total(3), SentimentLabel::Bullish);
        assert_eq!(SentimentLabel::from_total(1), SentimentLabel::SlightlyBullish);
        assert_eq!(SentimentLabel::from_total(0), SentimentLabel::Neutral);
        assert_eq!(SentimentLabel::from_total(-1), SentimentLabel::SlightlyBearish);
        assert_eq!(SentimentLabel::from_total(-3), SentimentLabel::Bearish);
        assert_eq!(SentimentLabel::from_total(-5), SentimentLabel::VeryBearish);
    }

    #[test]
    fn test_rsi_scoring_bands() {
        assert_eq!(score_rsi(75.0), -2);
        assert_eq!(score_rsi(62.0), -1);
        assert_eq!(score_rsi(50.0), 0);
        assert_eq!(score_rsi(38.0), 1);
        assert_eq!(score_rsi(25.0), 2);
    }

    #[test]
    fn test_macd_scoring() {
        assert_eq!(score_macd(1.0, 0.5, 0.5), 2);
        assert_eq!(score_macd(1.0, 0.5, -0.1), 1);
        assert_eq!(score_macd(0.5, 1.0, -0.5), -2);
        assert_eq!(score_macd(0.5, 1.0, 0.1), -1);
    }

    #[test]
    fn test_stochastic_scoring() {
        assert_eq!(score_stochastic(85.0, 82.0), -2);
        assert_eq!(score_stochastic(72.0, 60.0), -1);
        assert_eq!(score_stochastic(15.0, 18.0), 2);
        assert_eq!(score_stochastic(25.0, 40.0), 1);
        assert_eq!(score_stochastic(50.0, 50.0), 0);
    }

    #[test]
    fn test_moving_average_scoring() {
        assert_eq!(score_moving_average(110.0, 105.0, 100.0), 2);
        assert_eq!(score_moving_average(110.0, 105.0, 108.0), 1);
        assert_eq!(score_moving_average(95.0, 100.0, 105.0), -2);
        assert_eq!(score_moving_average(95.0, 100.0, 98.0), -1);
    }

    #[test]
    fn test_volume_scoring() {
        assert_eq!(score_volume(2.0), 1);
        assert_eq!(score_volume(1.0), 0);
        assert_eq!(score_volume(0.5), -1);
    }

    #[test]
    fn test_ratio_normalisation() {
        let neutral = SentimentScores::default();
        assert!((neutral.ratio() - 0.5).abs() < 1e-9);

        let bullish = SentimentScores {
            rsi: 2,
            macd: 2,
            stochastic: 2,
            moving_average: 2,
            volume: 1,
        };
        assert!(bullish.ratio() > 0.9);
    }
}
