use market_core::Bar;

/// Return val if it is finite, otherwise return default.
#[inline]
pub fn finite_or(val: f64, default: f64) -> f64 {
    if val.is_finite() {
        val
    } else {
        default
    }
}

/// Simple Moving Average. Output is end-aligned: `result[i]` is the mean of
/// the window ending at `data[period - 1 + i]`.
pub fn sma(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.len() < period {
        return vec![];
    }

    data.windows(period)
        .map(|w| finite_or(w.iter().sum::<f64>() / period as f64, 0.0))
        .collect()
}

/// Exponential Moving Average. Output length matches the input length; the
/// first `period` slots carry the SMA seed.
pub fn ema(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.is_empty() {
        return vec![];
    }

    // Not enough data for a full SMA seed: collapse to the plain average
    if data.len() < period {
        let avg = data.iter().sum::<f64>() / data.len() as f64;
        return vec![finite_or(avg, 0.0)];
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let seed = finite_or(data[..period].iter().sum::<f64>() / period as f64, 0.0);

    let mut result = vec![seed; period];
    for value in &data[period..] {
        let prev = *result.last().expect("seeded above");
        result.push(finite_or((value - prev) * multiplier + prev, prev));
    }
    result
}

/// Relative Strength Index with Wilder smoothing.
pub fn rsi(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.len() < period + 1 {
        return vec![];
    }

    let (gains, losses): (Vec<f64>, Vec<f64>) = data
        .windows(2)
        .map(|w| {
            let change = w[1] - w[0];
            if change > 0.0 {
                (change, 0.0)
            } else {
                (0.0, -change)
            }
        })
        .unzip();

    let mut avg_gain = gains[..period].iter().sum::<f64>() / period as f64;
    let mut avg_loss = losses[..period].iter().sum::<f64>() / period as f64;

    let mut values = Vec::with_capacity(gains.len() - period + 1);
    let mut push_rsi = |avg_gain: f64, avg_loss: f64, values: &mut Vec<f64>| {
        let rs = if avg_loss == 0.0 {
            100.0
        } else {
            avg_gain / avg_loss
        };
        values.push(finite_or(100.0 - 100.0 / (1.0 + rs), 50.0));
    };

    push_rsi(avg_gain, avg_loss, &mut values);
    for i in period..gains.len() {
        avg_gain = (avg_gain * (period - 1) as f64 + gains[i]) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + losses[i]) / period as f64;
        push_rsi(avg_gain, avg_loss, &mut values);
    }

    values
}

/// Bollinger Bands around an SMA midline.
#[derive(Debug, Clone, Default)]
pub struct BollingerSeries {
    pub upper: Vec<f64>,
    pub middle: Vec<f64>,
    pub lower: Vec<f64>,
}

pub fn bollinger_bands(data: &[f64], period: usize, std_dev: f64) -> BollingerSeries {
    if period == 0 || data.len() < period {
        return BollingerSeries::default();
    }

    let middle = sma(data, period);
    let mut upper = Vec::with_capacity(middle.len());
    let mut lower = Vec::with_capacity(middle.len());

    for (i, window) in data.windows(period).enumerate() {
        let mean = middle[i];
        let variance =
            window.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / period as f64;
        let std = variance.sqrt();
        upper.push(finite_or(mean + std_dev * std, mean));
        lower.push(finite_or(mean - std_dev * std, mean));
    }

    BollingerSeries {
        upper,
        middle,
        lower,
    }
}

/// MACD line, signal line, and histogram.
#[derive(Debug, Clone, Default)]
pub struct MacdSeries {
    pub macd_line: Vec<f64>,
    pub signal_line: Vec<f64>,
    pub histogram: Vec<f64>,
}

pub fn macd(
    data: &[f64],
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
) -> MacdSeries {
    if fast_period == 0 || slow_period == 0 || signal_period == 0 || slow_period < fast_period
    {
        return MacdSeries::default();
    }

    let ema_fast = ema(data, fast_period);
    let ema_slow = ema(data, slow_period);
    if ema_fast.len() != data.len() || ema_slow.len() != data.len() {
        return MacdSeries::default();
    }

    let macd_line: Vec<f64> = ema_fast
        .iter()
        .zip(&ema_slow)
        .map(|(f, s)| f - s)
        .collect();

    let signal_line = ema(&macd_line, signal_period);

    let offset = macd_line.len().saturating_sub(signal_line.len());
    let histogram: Vec<f64> = signal_line
        .iter()
        .enumerate()
        .map(|(i, s)| macd_line[i + offset] - s)
        .collect();

    MacdSeries {
        macd_line,
        signal_line,
        histogram,
    }
}

/// Stochastic oscillator (%K and %D).
#[derive(Debug, Clone, Default)]
pub struct StochasticSeries {
    pub k: Vec<f64>,
    pub d: Vec<f64>,
}

pub fn stochastic(bars: &[Bar], k_period: usize, d_period: usize) -> StochasticSeries {
    if k_period == 0 || bars.len() < k_period {
        return StochasticSeries::default();
    }

    let k: Vec<f64> = bars
        .windows(k_period)
        .map(|w| {
            let highest = w.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
            let lowest = w.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
            let close = w[w.len() - 1].close;
            let value = if highest == lowest {
                50.0
            } else {
                100.0 * (close - lowest) / (highest - lowest)
            };
            finite_or(value, 50.0)
        })
        .collect();

    let d = sma(&k, d_period);

    StochasticSeries { k, d }
}

/// Volume-Weighted Average Price, cumulative over the series.
pub fn vwap(bars: &[Bar]) -> Vec<f64> {
    let mut values = Vec::with_capacity(bars.len());
    let mut cumulative_tpv = 0.0;
    let mut cumulative_volume = 0.0;

    for bar in bars {
        let typical = (bar.high + bar.low + bar.close) / 3.0;
        cumulative_tpv += typical * bar.volume;
        cumulative_volume += bar.volume;

        let value = if cumulative_volume > 0.0 {
            cumulative_tpv / cumulative_volume
        } else {
            typical
        };
        values.push(finite_or(value, typical));
    }

    values
}

/// Simple moving average over volumes, used for volume-ratio scoring.
pub fn volume_sma(volumes: &[f64], period: usize) -> Vec<f64> {
    sma(volumes, period)
}
