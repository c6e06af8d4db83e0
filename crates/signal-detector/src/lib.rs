//! Signal detection over cached bar series and derived indicators.
//!
//! Rules are evaluated in a fixed order for every fresh bar: moving-average
//! breakouts, golden/dead crosses, RSI bands, Bollinger bands, and the
//! composite sentiment classifier. Each hit becomes a `NewSignal` proposal;
//! deduplication happens later, at the store.

pub mod rules;
pub mod sentiment;

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use indicator_engine::IndicatorEngine;
use market_core::{tuning, Bar, MarketCondition, NewSignal, Timeframe};
use serde_json::json;

use rules::{BreakoutDirection, RsiSignal};
use sentiment::{SentimentLabel, SentimentScores};

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Minimum distance past the moving average for a breakout, as a
    /// fraction of the average.
    pub min_breakout_pct: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_breakout_pct: tuning::MIN_BREAKOUT_PCT,
        }
    }
}

pub struct SignalDetector {
    engine: Arc<IndicatorEngine>,
    config: DetectorConfig,
    last_sentiment: DashMap<(String, Timeframe), SentimentLabel>,
}

impl SignalDetector {
    pub fn new(engine: Arc<IndicatorEngine>, config: DetectorConfig) -> Self {
        Self {
            engine,
            config,
            last_sentiment: DashMap::new(),
        }
    }

    /// Evaluate every rule against the latest two bars of `bars`.
    /// Returns proposals in rule-evaluation order.
    pub fn evaluate(&self, symbol: &str, timeframe: Timeframe, bars: &[Bar]) -> Vec<NewSignal> {
        let mut signals = Vec::new();
        if bars.len() < 2 {
            return signals;
        }
        let prev = &bars[bars.len() - 2];
        let curr = &bars[bars.len() - 1];

        self.check_ma_breakouts(symbol, timeframe, bars, prev, curr, &mut signals);
        if timeframe == Timeframe::Day1 {
            self.check_crosses(symbol, bars, curr, &mut signals);
        }
        self.check_rsi(symbol, timeframe, bars, curr, &mut signals);
        self.check_bollinger(symbol, timeframe, bars, prev, curr, &mut signals);
        self.check_sentiment_shift(symbol, timeframe, bars, curr, &mut signals);

        if !signals.is_empty() {
            tracing::debug!(
                symbol,
                timeframe = timeframe.as_str(),
                count = signals.len(),
                "detector proposed signals"
            );
        }
        signals
    }

    fn check_ma_breakouts(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        bars: &[Bar],
        prev: &Bar,
        curr: &Bar,
        signals: &mut Vec<NewSignal>,
    ) {
        for period in tuning::MA_BREAKOUT_PERIODS {
            let ma = self.engine.sma(symbol, timeframe, bars, period);
            if ma.len() < 2 {
                continue;
            }
            let curr_ma = ma[ma.len() - 1];
            let prev_ma = ma[ma.len() - 2];

            if let Some((direction, strength)) = rules::detect_ma_breakout(
                prev.close,
                prev_ma,
                curr.close,
                curr_ma,
                self.config.min_breakout_pct,
            ) {
                let market_condition = match direction {
                    BreakoutDirection::Up => MarketCondition::Bullish,
                    BreakoutDirection::Down => MarketCondition::Bearish,
                };
                signals.push(NewSignal {
                    symbol: symbol.to_string(),
                    signal_type: format!("MA{}_breakout_{}", period, direction.as_str()),
                    timeframe,
                    triggered_at: Utc::now(),
                    current_price: curr.close,
                    indicator_value: Some(curr_ma),
                    signal_strength: Some(strength),
                    volume: Some(curr.volume),
                    market_condition,
                    additional_context: Some(json!({
                        "ma_period": period,
                        "breakout_direction": direction.as_str(),
                    })),
                });
            }
        }
    }

    fn check_crosses(
        &self,
        symbol: &str,
        bars: &[Bar],
        curr: &Bar,
        signals: &mut Vec<NewSignal>,
    ) {
        let short = self
            .engine
            .sma(symbol, Timeframe::Day1, bars, tuning::CROSS_SHORT_PERIOD);
        let long = self
            .engine
            .sma(symbol, Timeframe::Day1, bars, tuning::CROSS_LONG_PERIOD);
        if short.len() < 2 || long.len() < 2 {
            return;
        }
        let (curr_short, prev_short) = (short[short.len() - 1], short[short.len() - 2]);
        let (curr_long, prev_long) = (long[long.len() - 1], long[long.len() - 2]);

        if let Some(kind) = rules::detect_cross(prev_short, prev_long, curr_short, curr_long) {
            let market_condition = match kind {
                rules::CrossKind::Golden => MarketCondition::Bullish,
                rules::CrossKind::Dead => MarketCondition::Bearish,
            };
            let strength = if curr_long > 0.0 {
                (curr_short - curr_long).abs() / curr_long * 100.0
            } else {
                0.0
            };
            signals.push(NewSignal {
                symbol: symbol.to_string(),
                signal_type: kind.code().to_string(),
                timeframe: Timeframe::Day1,
                triggered_at: Utc::now(),
                current_price: curr.close,
                indicator_value: Some(curr_long),
                signal_strength: Some(strength),
                volume: Some(curr.volume),
                market_condition,
                additional_context: Some(json!({
                    "ma_short": curr_short,
                    "ma_long": curr_long,
                    "cross_type": kind.code(),
                })),
            });
        }
    }

    fn check_rsi(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        bars: &[Bar],
        curr: &Bar,
        signals: &mut Vec<NewSignal>,
    ) {
        let rsi = self.engine.rsi(symbol, timeframe, bars, tuning::RSI_PERIOD);
        if rsi.len() < 2 {
            return;
        }
        let curr_rsi = rsi[rsi.len() - 1];
        let prev_rsi = rsi[rsi.len() - 2];

        if let Some(kind) = rules::detect_rsi_signal(prev_rsi, curr_rsi) {
            let (strength, market_condition) = match kind {
                RsiSignal::Overbought => (curr_rsi - tuning::RSI_OVERBOUGHT, MarketCondition::Bearish),
                RsiSignal::Oversold => (tuning::RSI_OVERSOLD - curr_rsi, MarketCondition::Bullish),
                RsiSignal::Bullish => ((curr_rsi - 50.0).abs(), MarketCondition::Bullish),
                RsiSignal::Bearish => ((curr_rsi - 50.0).abs(), MarketCondition::Bearish),
            };
            signals.push(NewSignal {
                symbol: symbol.to_string(),
                signal_type: format!("RSI_{}", kind.suffix()),
                timeframe,
                triggered_at: Utc::now(),
                current_price: curr.close,
                indicator_value: Some(curr_rsi),
                signal_strength: Some(strength),
                volume: Some(curr.volume),
                market_condition,
                additional_context: Some(json!({
                    "rsi_value": curr_rsi,
                    "signal_reason": kind.suffix(),
                })),
            });
        }
    }

    fn check_bollinger(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        bars: &[Bar],
        prev: &Bar,
        curr: &Bar,
        signals: &mut Vec<NewSignal>,
    ) {
        let bands = self.engine.bollinger(
            symbol,
            timeframe,
            bars,
            tuning::BOLLINGER_PERIOD,
            tuning::BOLLINGER_STD_DEV,
        );
        let n = bands.upper.len();
        if n < 2 {
            return;
        }

        if let Some(kind) = rules::detect_bollinger_signal(
            prev.close,
            bands.upper[n - 2],
            bands.lower[n - 2],
            curr.close,
            bands.upper[n - 1],
            bands.lower[n - 1],
            tuning::BOLLINGER_TOUCH_PCT,
        ) {
            let band = kind.band_value(bands.upper[n - 1], bands.lower[n - 1]);
            let strength = if band > 0.0 {
                (curr.close - band).abs() / band * 100.0
            } else {
                0.0
            };
            // Upper-band pressure reads bearish, lower-band bullish
            let market_condition = if kind.is_upper() {
                MarketCondition::Bearish
            } else {
                MarketCondition::Bullish
            };
            signals.push(NewSignal {
                symbol: symbol.to_string(),
                signal_type: format!("BB_{}", kind.suffix()),
                timeframe,
                triggered_at: Utc::now(),
                current_price: curr.close,
                indicator_value: Some(band),
                signal_strength: Some(strength),
                volume: Some(curr.volume),
                market_condition,
                additional_context: Some(json!({
                    "band_type": if kind.is_upper() { "upper" } else { "lower" },
                    "action": if matches!(
                        kind,
                        rules::BollingerSignal::BreakUpper | rules::BollingerSignal::BreakLower
                    ) {
                        "break"
                    } else {
                        "touch"
                    },
                })),
            });
        }
    }

    /// Score the current bar across the five sentiment families.
    /// `None` when the series is too short for any family.
    pub fn compute_sentiment(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        bars: &[Bar],
    ) -> Option<SentimentScores> {
        let curr = bars.last()?;

        let rsi = self.engine.rsi(symbol, timeframe, bars, tuning::RSI_PERIOD);
        let macd = self.engine.macd(
            symbol,
            timeframe,
            bars,
            tuning::MACD_FAST_PERIOD,
            tuning::MACD_SLOW_PERIOD,
            tuning::MACD_SIGNAL_PERIOD,
        );
        let stochastic = self.engine.stochastic(
            symbol,
            timeframe,
            bars,
            tuning::STOCHASTIC_K_PERIOD,
            tuning::STOCHASTIC_D_PERIOD,
        );
        let sma20 = self.engine.sma(symbol, timeframe, bars, 20);
        let sma50 = self.engine.sma(symbol, timeframe, bars, 50);
        let volume_sma = self
            .engine
            .volume_sma(symbol, timeframe, bars, tuning::VOLUME_SMA_PERIOD);

        let rsi_value = *rsi.last()?;
        let macd_value = *macd.macd_line.last()?;
        let signal_value = *macd.signal_line.last()?;
        let histogram_value = *macd.histogram.last()?;
        let k = *stochastic.k.last()?;
        let d = *stochastic.d.last()?;
        let sma20_value = *sma20.last()?;
        let sma50_value = *sma50.last()?;
        let avg_volume = *volume_sma.last()?;
        let volume_ratio = if avg_volume > 0.0 {
            curr.volume / avg_volume
        } else {
            1.0
        };

        Some(SentimentScores {
            rsi: sentiment::score_rsi(rsi_value),
            macd: sentiment::score_macd(macd_value, signal_value, histogram_value),
            stochastic: sentiment::score_stochastic(k, d),
            moving_average: sentiment::score_moving_average(
                curr.close,
                sma20_value,
                sma50_value,
            ),
            volume: sentiment::score_volume(volume_ratio),
        })
    }

    fn check_sentiment_shift(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        bars: &[Bar],
        curr: &Bar,
        signals: &mut Vec<NewSignal>,
    ) {
        let Some(scores) = self.compute_sentiment(symbol, timeframe, bars) else {
            return;
        };
        let label = scores.label();
        let key = (symbol.to_string(), timeframe);

        let previous = self.last_sentiment.insert(key, label);
        let Some(previous) = previous else {
            // First evaluation establishes the baseline without emitting
            return;
        };
        if previous == label {
            return;
        }

        let total = scores.total();
        let market_condition = if total >= 1 {
            MarketCondition::Bullish
        } else if total <= -1 {
            MarketCondition::Bearish
        } else {
            MarketCondition::Sideways
        };
        signals.push(NewSignal {
            symbol: symbol.to_string(),
            signal_type: "sentiment_shift".to_string(),
            timeframe,
            triggered_at: Utc::now(),
            current_price: curr.close,
            indicator_value: Some(scores.ratio()),
            signal_strength: Some(total as f64),
            volume: Some(curr.volume),
            market_condition,
            additional_context: Some(json!({
                "sentiment": label.as_str(),
                "previous": previous.as_str(),
                "scores": scores.to_json(),
            })),
        });
    }

    #[cfg(test)]
    fn set_last_sentiment(&self, symbol: &str, timeframe: Timeframe, label: SentimentLabel) {
        self.last_sentiment
            .insert((symbol.to_string(), timeframe), label);
    }
}
