#[cfg(test)]
mod tests {
    use crate::indicators::*;
    use chrono::{TimeZone, Utc};
    use market_core::Bar;

    // Classic 14-period RSI worked example prices
    fn sample_prices() -> Vec<f64> {
        vec![
            44.34, 44.09, 44.15, 43.61, 44.33, 44.83, 45.10, 45.42, 45.84, 46.08,
            45.89, 46.03, 45.61, 46.28, 46.28, 46.00, 46.03, 46.41, 46.22, 45.64,
        ]
    }

    fn sample_bars(count: usize) -> Vec<Bar> {
        (0..count)
            .map(|i| {
                let close = 100.0 + i as f64;
                Bar {
                    timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                        + chrono::Duration::days(i as i64),
                    open: close - 0.5,
                    high: close + 2.0,
                    low: close - 2.0,
                    close,
                    volume: 1_000_000.0,
                }
            })
            .collect()
    }

    #[test]
    fn test_sma_basic() {
        let result = sma(&[1.0, 2.0, 3.0, 4.0, 5.0], 3);
        assert_eq!(result.len(), 3);
        assert!((result[0] - 2.0).abs() < 1e-9);
        assert!((result[1] - 3.0).abs() < 1e-9);
        assert!((result[2] - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_sma_insufficient_data() {
        assert!(sma(&[1.0, 2.0], 5).is_empty());
        assert!(sma(&[1.0, 2.0], 0).is_empty());
    }

    #[test]
    fn test_ema_seeds_with_sma() {
        let data = [22.0, 24.0, 23.0, 25.0, 26.0];
        let result = ema(&data, 3);
        assert_eq!(result.len(), data.len());
        let seed = (22.0 + 24.0 + 23.0) / 3.0;
        assert!((result[0] - seed).abs() < 1e-9);
        assert!((result[2] - seed).abs() < 1e-9);
        // First smoothed value: (25 - seed) * 0.5 + seed
        assert!((result[3] - ((25.0 - seed) * 0.5 + seed)).abs() < 1e-9);
    }

    #[test]
    fn test_ema_tracks_uptrend() {
        let data: Vec<f64> = (1..=10).map(|i| i as f64).collect();
        let result = ema(&data, 3);
        for pair in result.windows(2).skip(2) {
            assert!(pair[1] > pair[0]);
        }
    }

    #[test]
    fn test_rsi_bounded_and_matches_worked_example() {
        let result = rsi(&sample_prices(), 14);
        assert_eq!(result.len(), sample_prices().len() - 14);
        for &value in &result {
            assert!((0.0..=100.0).contains(&value));
        }
        // First Wilder RSI of the classic dataset is ~70.5
        assert!((result[0] - 70.46).abs() < 0.5);
    }

    #[test]
    fn test_rsi_all_gains_saturates() {
        let data: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        let result = rsi(&data, 14);
        assert!(result.iter().all(|&v| v > 98.0));
    }

    #[test]
    fn test_bollinger_bands_bracket_middle() {
        let prices = sample_prices();
        let bands = bollinger_bands(&prices, 5, 2.0);
        assert_eq!(bands.upper.len(), prices.len() - 4);
        for i in 0..bands.middle.len() {
            assert!(bands.upper[i] >= bands.middle[i]);
            assert!(bands.lower[i] <= bands.middle[i]);
        }
    }

    #[test]
    fn test_bollinger_flat_series_collapses() {
        let prices = vec![50.0; 30];
        let bands = bollinger_bands(&prices, 20, 2.0);
        let last = bands.upper.len() - 1;
        assert!((bands.upper[last] - 50.0).abs() < 1e-9);
        assert!((bands.lower[last] - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_macd_lengths_and_uptrend_sign() {
        let data: Vec<f64> = (0..60).map(|i| 100.0 + i as f64 * 0.8).collect();
        let result = macd(&data, 12, 26, 9);
        assert_eq!(result.macd_line.len(), data.len());
        assert_eq!(result.signal_line.len(), data.len());
        assert_eq!(result.histogram.len(), data.len());
        // Steady uptrend: fast EMA above slow EMA at the end
        assert!(*result.macd_line.last().unwrap() > 0.0);
    }

    #[test]
    fn test_macd_invalid_params() {
        let data: Vec<f64> = (0..40).map(|i| i as f64).collect();
        assert!(macd(&data, 26, 12, 9).macd_line.is_empty());
        assert!(macd(&data, 0, 26, 9).macd_line.is_empty());
    }

    #[test]
    fn test_stochastic_in_range() {
        let bars = sample_bars(30);
        let result = stochastic(&bars, 14, 3);
        assert_eq!(result.k.len(), bars.len() - 13);
        assert_eq!(result.d.len(), result.k.len() - 2);
        for &v in result.k.iter().chain(&result.d) {
            assert!((0.0..=100.0).contains(&v));
        }
        // Monotonic uptrend closes near the top of the range
        assert!(*result.k.last().unwrap() > 80.0);
    }

    #[test]
    fn test_vwap_between_low_and_high() {
        let bars = sample_bars(10);
        let result = vwap(&bars);
        assert_eq!(result.len(), bars.len());
        let min_low = bars.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
        let max_high = bars
            .iter()
            .map(|b| b.high)
            .fold(f64::NEG_INFINITY, f64::max);
        for &v in &result {
            assert!(v >= min_low && v <= max_high);
        }
    }

    #[test]
    fn test_volume_sma_matches_sma() {
        let volumes = vec![10.0, 20.0, 30.0, 40.0];
        assert_eq!(volume_sma(&volumes, 2), sma(&volumes, 2));
    }
}
