use thiserror::Error;

#[derive(Error, Debug)]
pub enum MarketError {
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Invalid bar: {0}")]
    InvalidBar(String),

    #[error("Data source unavailable: {0}")]
    DataSourceUnavailable(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
