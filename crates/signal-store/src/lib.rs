pub mod models;
pub mod store;

#[cfg(test)]
mod tests;

pub use models::{Horizon, OutcomeRecord, SignalFilter, SignalRecord};
pub use store::{SaveOutcome, SignalStore};
