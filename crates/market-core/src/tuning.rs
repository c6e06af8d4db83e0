//! Indicator and alerting defaults shared across the pipeline.

use crate::Timeframe;

// Moving averages watched for breakouts
pub const MA_BREAKOUT_PERIODS: [usize; 3] = [20, 50, 200];

// Golden/dead cross pair
pub const CROSS_SHORT_PERIOD: usize = 50;
pub const CROSS_LONG_PERIOD: usize = 200;

// Minimum breakout distance above/below the moving average (fraction)
pub const MIN_BREAKOUT_PCT: f64 = 0.005;

// RSI
pub const RSI_PERIOD: usize = 14;
pub const RSI_OVERBOUGHT: f64 = 70.0;
pub const RSI_OVERSOLD: f64 = 30.0;

// Bollinger bands
pub const BOLLINGER_PERIOD: usize = 20;
pub const BOLLINGER_STD_DEV: f64 = 2.0;
pub const BOLLINGER_TOUCH_PCT: f64 = 0.01;

// MACD
pub const MACD_FAST_PERIOD: usize = 12;
pub const MACD_SLOW_PERIOD: usize = 26;
pub const MACD_SIGNAL_PERIOD: usize = 9;

// Stochastic
pub const STOCHASTIC_K_PERIOD: usize = 14;
pub const STOCHASTIC_D_PERIOD: usize = 3;

// Volume
pub const VOLUME_SMA_PERIOD: usize = 20;
pub const VOLUME_RATIO_HIGH: f64 = 1.5;
pub const VOLUME_RATIO_LOW: f64 = 0.7;

/// Class-specific deduplication window in minutes for a signal type on a
/// timeframe, when the type belongs to a known family.
///
/// Cross signals repeat rarely and keep a short window; MA breakouts on the
/// daily timeframe are suppressed for a full day.
pub fn class_dedup_minutes(signal_type: &str, timeframe: Timeframe) -> Option<i64> {
    if signal_type.contains("_breakout_") {
        Some(match timeframe {
            Timeframe::Minute1 => 30,
            Timeframe::Minute15 => 120,
            Timeframe::Hour1 => 240,
            Timeframe::Day1 => 1440,
        })
    } else if signal_type.starts_with("RSI_") {
        Some(match timeframe {
            Timeframe::Minute1 => 60,
            Timeframe::Minute15 => 240,
            Timeframe::Hour1 => 480,
            Timeframe::Day1 => 1440,
        })
    } else if signal_type.starts_with("BB_") {
        Some(match timeframe {
            Timeframe::Minute1 => 60,
            Timeframe::Minute15 => 180,
            Timeframe::Hour1 => 360,
            Timeframe::Day1 => 720,
        })
    } else if signal_type.ends_with("_cross") {
        Some(60)
    } else {
        None
    }
}

/// Deduplication window with the 60-minute fallback for unknown types.
pub fn default_dedup_minutes(signal_type: &str, timeframe: Timeframe) -> i64 {
    class_dedup_minutes(signal_type, timeframe).unwrap_or(60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_windows_by_class() {
        assert_eq!(
            default_dedup_minutes("MA200_breakout_up", Timeframe::Day1),
            1440
        );
        assert_eq!(
            default_dedup_minutes("MA20_breakout_down", Timeframe::Minute1),
            30
        );
        assert_eq!(default_dedup_minutes("golden_cross", Timeframe::Day1), 60);
        assert_eq!(
            default_dedup_minutes("RSI_overbought", Timeframe::Minute15),
            240
        );
        assert_eq!(default_dedup_minutes("BB_touch_upper", Timeframe::Day1), 720);
        assert_eq!(
            default_dedup_minutes("sentiment_shift", Timeframe::Day1),
            60
        );
    }
}
