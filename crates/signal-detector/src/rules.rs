//! Pure detection rules over the latest two data points of each indicator.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakoutDirection {
    Up,
    Down,
}

impl BreakoutDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakoutDirection::Up => "up",
            BreakoutDirection::Down => "down",
        }
    }
}

/// Moving-average breakout. The previous close must sit within 1% of (or
/// beyond) the average on the wrong side, and the current close must clear
/// it by at least `min_breakout_pct`.
pub fn detect_ma_breakout(
    prev_price: f64,
    prev_ma: f64,
    curr_price: f64,
    curr_ma: f64,
    min_breakout_pct: f64,
) -> Option<(BreakoutDirection, f64)> {
    if !(prev_ma.is_finite() && curr_ma.is_finite()) || curr_ma <= 0.0 {
        return None;
    }

    if prev_price <= prev_ma * 1.01 && curr_price > curr_ma * (1.0 + min_breakout_pct) {
        let strength = (curr_price - curr_ma) / curr_ma * 100.0;
        return Some((BreakoutDirection::Up, strength));
    }

    if prev_price >= prev_ma * 0.99 && curr_price < curr_ma * (1.0 - min_breakout_pct) {
        let strength = (curr_ma - curr_price) / curr_ma * 100.0;
        return Some((BreakoutDirection::Down, strength));
    }

    None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrossKind {
    Golden,
    Dead,
}

impl CrossKind {
    pub fn code(&self) -> &'static str {
        match self {
            CrossKind::Golden => "golden_cross",
            CrossKind::Dead => "dead_cross",
        }
    }
}

/// Golden/dead cross of a short moving average over a long one.
pub fn detect_cross(
    prev_short: f64,
    prev_long: f64,
    curr_short: f64,
    curr_long: f64,
) -> Option<CrossKind> {
    if prev_short <= prev_long && curr_short > curr_long {
        Some(CrossKind::Golden)
    } else if prev_short >= prev_long && curr_short < curr_long {
        Some(CrossKind::Dead)
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RsiSignal {
    Overbought,
    Oversold,
    Bullish,
    Bearish,
}

impl RsiSignal {
    pub fn suffix(&self) -> &'static str {
        match self {
            RsiSignal::Overbought => "overbought",
            RsiSignal::Oversold => "oversold",
            RsiSignal::Bullish => "bullish",
            RsiSignal::Bearish => "bearish",
        }
    }
}

/// RSI band entries and 50-line crosses.
///
/// Band entries trigger inside the 68..72 / 28..32 transition zones with a
/// minimum 2-point move; 50-crosses require the current value at least 3
/// points past the midline.
pub fn detect_rsi_signal(prev_rsi: f64, curr_rsi: f64) -> Option<RsiSignal> {
    if prev_rsi <= 72.0 && curr_rsi > 68.0 && curr_rsi >= prev_rsi + 2.0 {
        Some(RsiSignal::Overbought)
    } else if prev_rsi >= 28.0 && curr_rsi < 32.0 && curr_rsi <= prev_rsi - 2.0 {
        Some(RsiSignal::Oversold)
    } else if prev_rsi <= 50.0 && curr_rsi > 50.0 && curr_rsi - 50.0 >= 3.0 {
        Some(RsiSignal::Bullish)
    } else if prev_rsi >= 50.0 && curr_rsi < 50.0 && 50.0 - curr_rsi >= 3.0 {
        Some(RsiSignal::Bearish)
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BollingerSignal {
    BreakUpper,
    BreakLower,
    TouchUpper,
    TouchLower,
}

impl BollingerSignal {
    pub fn suffix(&self) -> &'static str {
        match self {
            BollingerSignal::BreakUpper => "break_upper",
            BollingerSignal::BreakLower => "break_lower",
            BollingerSignal::TouchUpper => "touch_upper",
            BollingerSignal::TouchLower => "touch_lower",
        }
    }

    pub fn is_upper(&self) -> bool {
        matches!(self, BollingerSignal::BreakUpper | BollingerSignal::TouchUpper)
    }

    /// Band the signal refers to.
    pub fn band_value(&self, upper: f64, lower: f64) -> f64 {
        if self.is_upper() {
            upper
        } else {
            lower
        }
    }
}

/// Bollinger band breaks and touches; a break supersedes a touch.
#[allow(clippy::too_many_arguments)]
pub fn detect_bollinger_signal(
    prev_price: f64,
    prev_upper: f64,
    prev_lower: f64,
    curr_price: f64,
    curr_upper: f64,
    curr_lower: f64,
    touch_pct: f64,
) -> Option<BollingerSignal> {
    if prev_price <= prev_upper && curr_price > curr_upper {
        Some(BollingerSignal::BreakUpper)
    } else if prev_price >= prev_lower && curr_price < curr_lower {
        Some(BollingerSignal::BreakLower)
    } else if curr_upper > 0.0 && ((curr_price - curr_upper).abs() / curr_upper) < touch_pct {
        Some(BollingerSignal::TouchUpper)
    } else if curr_lower > 0.0 && ((curr_price - curr_lower).abs() / curr_lower) < touch_pct {
        Some(BollingerSignal::TouchLower)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ma_breakout_up() {
        // Previous close just under the MA, current clearly above
        let result = detect_ma_breakout(22990.0, 22995.0, 23200.0, 23000.25, 0.005);
        let (direction, strength) = result.unwrap();
        assert_eq!(direction, BreakoutDirection::Up);
        assert!((strength - (23200.0 - 23000.25) / 23000.25 * 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_ma_breakout_needs_minimum_distance() {
        // 0.22% above the MA fails the default 0.5% minimum...
        assert!(detect_ma_breakout(22990.0, 22995.0, 23050.75, 23000.25, 0.005).is_none());
        // ...but passes a 0.1% minimum with the documented strength
        let (_, strength) =
            detect_ma_breakout(22990.0, 22995.0, 23050.75, 23000.25, 0.001).unwrap();
        assert!((strength - 0.2196).abs() < 1e-3);
    }

    #[test]
    fn test_ma_breakout_down() {
        let result = detect_ma_breakout(101.0, 100.0, 98.0, 100.0, 0.005);
        let (direction, strength) = result.unwrap();
        assert_eq!(direction, BreakoutDirection::Down);
        assert!((strength - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_ma_breakout_requires_prior_proximity() {
        // Already far above the MA before: not a breakout
        assert!(detect_ma_breakout(105.0, 100.0, 106.0, 100.0, 0.005).is_none());
    }

    #[test]
    fn test_golden_and_dead_cross() {
        assert_eq!(
            detect_cross(99.0, 100.0, 101.0, 100.0),
            Some(CrossKind::Golden)
        );
        assert_eq!(
            detect_cross(101.0, 100.0, 99.0, 100.0),
            Some(CrossKind::Dead)
        );
        assert_eq!(detect_cross(101.0, 100.0, 102.0, 100.0), None);
    }

    #[test]
    fn test_rsi_overbought_entry() {
        assert_eq!(detect_rsi_signal(67.0, 70.5), Some(RsiSignal::Overbought));
        // Too small a move
        assert_eq!(detect_rsi_signal(68.5, 69.0), None);
        // Already overbought before (prev > 72)
        assert_eq!(detect_rsi_signal(75.0, 78.0), None);
    }

    #[test]
    fn test_rsi_oversold_entry() {
        assert_eq!(detect_rsi_signal(33.0, 29.5), Some(RsiSignal::Oversold));
        assert_eq!(detect_rsi_signal(25.0, 24.0), None);
    }

    #[test]
    fn test_rsi_midline_crosses() {
        assert_eq!(detect_rsi_signal(48.0, 54.0), Some(RsiSignal::Bullish));
        assert_eq!(detect_rsi_signal(52.0, 46.0), Some(RsiSignal::Bearish));
        // Crossed but not far enough from the midline
        assert_eq!(detect_rsi_signal(49.0, 51.0), None);
    }

    #[test]
    fn test_bollinger_break_supersedes_touch() {
        // Current price both beyond and within 1% of the upper band
        let signal = detect_bollinger_signal(100.0, 100.5, 95.0, 101.0, 100.7, 95.0, 0.01);
        assert_eq!(signal, Some(BollingerSignal::BreakUpper));
    }

    #[test]
    fn test_bollinger_touch_lower() {
        let signal = detect_bollinger_signal(96.0, 104.0, 95.0, 95.5, 104.0, 95.2, 0.01);
        assert_eq!(signal, Some(BollingerSignal::TouchLower));
    }

    #[test]
    fn test_bollinger_quiet_mid_band() {
        assert_eq!(
            detect_bollinger_signal(100.0, 104.0, 96.0, 100.2, 104.0, 96.0, 0.01),
            None
        );
    }
}
