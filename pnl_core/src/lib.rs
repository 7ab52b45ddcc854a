pub mod analytics;
pub mod classifier;
pub mod ledger;
pub mod models;
pub mod swap;
pub mod timeframe;

pub use analytics::{
    balance_max_holdings, wallet_analytics, HoldingStats, TokenWindowStats, WalletAnalytics,
    WindowStats,
};
pub use classifier::TradeClassifier;
pub use ledger::{CostBasisLedger, LedgerEntry, SaleOutcome};
pub use models::{
    Coin, ImportStatus, MarketCap, PricePoint, Task, TokenHolding, TradeAction, TradeLeg,
    Transaction, Wallet,
};
pub use swap::{SwapEvent, TokenLeg, SWAP_TYPE};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PnLError {
    #[error("Price fetching error: {0}")]
    PriceFetch(String),
    #[error("No base asset price recorded at or before {0}")]
    PriceNotFound(DateTime<Utc>),
    #[error("Invalid swap event: {0}")]
    InvalidEvent(String),
    #[error("Calculation error: {0}")]
    Calculation(String),
    #[error("Timeframe parsing error: {0}")]
    TimeframeParse(String),
}

pub type Result<T> = std::result::Result<T, PnLError>;

/// Reference price of the base asset (SOL in USD) at a point in time.
///
/// Implementations return the latest recorded point at or before `at`;
/// a missing point is `PnLError::PriceNotFound`, never a default.
#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn price_at(&self, at: DateTime<Utc>) -> Result<PricePoint>;
}
