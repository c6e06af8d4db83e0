pub mod engine;
pub mod indicators;

mod indicators_tests;

pub use engine::IndicatorEngine;
pub use indicators::{BollingerSeries, MacdSeries, StochasticSeries};
