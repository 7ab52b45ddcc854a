// Base asset (SOL/USD) price history: the Binance klines client that fills it,
// the sync job that keeps it current and the oracle the classifier reads.

pub mod binance_client;
pub mod history_oracle;
pub mod price_sync;

pub use binance_client::{BinanceKlinesClient, KlinesSource};
pub use history_oracle::HistoricalPriceOracle;
pub use price_sync::{PriceHistorySync, PriceSyncSummary};

use persistence_layer::PersistenceError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PriceOracleError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
    #[error("Invalid price data: {0}")]
    InvalidPriceData(String),
    #[error("Exchange API error: {status} - {message}")]
    Api { status: u16, message: String },
    #[error("Rate limit exceeded")]
    RateLimit,
    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, PriceOracleError>;
