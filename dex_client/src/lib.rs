// External data providers: the Helius indexer (swap history, balances, DAS
// assets) and CoinGecko (coin list, historical market caps).

pub mod coingecko_client;
pub mod helius_client;
pub mod token_metadata_service;

pub use coingecko_client::CoinGeckoClient;
pub use helius_client::HeliusClient;
pub use token_metadata_service::TokenMetadataService;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use pnl_core::{Coin, SwapEvent};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use retry_utils::RetryableError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),
    #[error("JSON parsing failed: {0}")]
    JsonParsingFailed(#[from] serde_json::Error),
    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },
    #[error("Rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },
    #[error("Invalid wallet address: {0}")]
    InvalidWalletAddress(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type Result<T> = std::result::Result<T, ProviderError>;

impl ProviderError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ProviderError::RateLimited { .. })
    }

    /// Retry classification used with `retry_utils::retry_with_backoff`
    pub fn retry_class(&self) -> RetryableError {
        match self {
            ProviderError::RateLimited { retry_after } => RetryableError::RateLimit {
                retry_after: *retry_after,
            },
            ProviderError::ApiError { status, .. } if *status >= 500 => {
                RetryableError::ServerError
            }
            ProviderError::RequestFailed(e) if e.is_timeout() => RetryableError::Timeout,
            _ => RetryableError::Other,
        }
    }
}

/// Retry-After in whole seconds, as sent by both providers
pub(crate) fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Map a non-success response to a provider error
pub(crate) async fn error_for_response(response: reqwest::Response) -> ProviderError {
    let status = response.status();
    if status.as_u16() == 429 {
        return ProviderError::RateLimited {
            retry_after: parse_retry_after(response.headers()),
        };
    }
    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    ProviderError::ApiError {
        status: status.as_u16(),
        message,
    }
}

/// One page of indexer history, newest first.
#[derive(Debug, Clone, Default)]
pub struct TransactionPage {
    /// Events that passed validation
    pub events: Vec<SwapEvent>,

    /// Signature of the last raw item; the `before` cursor for the next page
    pub cursor: Option<String>,

    /// Timestamp of the oldest raw item
    pub oldest_timestamp: Option<DateTime<Utc>>,

    /// Raw items dropped at validation
    pub rejected: usize,
}

impl TransactionPage {
    pub fn is_empty(&self) -> bool {
        self.cursor.is_none()
    }
}

/// Fungible token held by a wallet, amounts in UI units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletAsset {
    pub mint: String,
    pub symbol: String,
    pub name: String,
    pub icon: Option<String>,
    pub balance: Decimal,
    pub supply: Option<Decimal>,
    pub price_per_token: Decimal,
    pub total_price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetMetadata {
    pub mint: String,
    pub symbol: String,
    pub name: String,
}

#[async_trait]
pub trait TransactionIndexer: Send + Sync {
    /// Enhanced transaction history of `address` older than `before`
    async fn get_transactions(&self, address: &str, before: Option<&str>)
        -> Result<TransactionPage>;

    /// Native balance in SOL
    async fn get_balance(&self, address: &str) -> Result<Decimal>;

    /// One page (1-based) of fungible assets; a short page is the last one
    async fn get_assets(&self, address: &str, page: u32) -> Result<Vec<WalletAsset>>;

    fn assets_page_size(&self) -> u32;

    async fn get_asset_metadata(&self, mints: &[String]) -> Result<Vec<AssetMetadata>>;
}

#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Full coin list, symbol and name lowercased
    async fn coin_list(&self) -> Result<Vec<Coin>>;

    /// USD market cap of `coin_id` on `date`; `None` when the provider has no figure
    async fn market_cap_on(&self, coin_id: &str, date: NaiveDate) -> Result<Option<Decimal>>;
}
