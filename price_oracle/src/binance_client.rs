use crate::{PriceOracleError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use config_manager::BinanceConfig;
use pnl_core::PricePoint;
use reqwest::Client;
use retry_utils::{retry_with_backoff, RetryConfig, RetryableError};
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// A page of base asset candles starting at `start`, oldest first
#[async_trait]
pub trait KlinesSource: Send + Sync {
    async fn klines(&self, start: DateTime<Utc>) -> Result<Vec<PricePoint>>;

    /// Candles per full page; a shorter page means the history is caught up
    fn page_limit(&self) -> u32;
}

/// Binance spot klines client
#[derive(Clone)]
pub struct BinanceKlinesClient {
    config: BinanceConfig,
    http_client: Client,
    retry_config: RetryConfig,
}

impl BinanceKlinesClient {
    pub fn new(config: BinanceConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| PriceOracleError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            http_client,
            retry_config: RetryConfig::default(),
        })
    }

    fn classify(error: &PriceOracleError) -> RetryableError {
        match error {
            PriceOracleError::RateLimit => RetryableError::RateLimit { retry_after: None },
            PriceOracleError::Api { status, .. } if *status >= 500 => RetryableError::ServerError,
            PriceOracleError::Http(e) if e.is_timeout() => RetryableError::Timeout,
            _ => RetryableError::Other,
        }
    }

    async fn fetch_page(&self, start: DateTime<Utc>) -> Result<Vec<PricePoint>> {
        let url = format!("{}/klines", self.config.api_base_url.trim_end_matches('/'));
        let params = [
            ("symbol", self.config.symbol.clone()),
            ("interval", self.config.interval.clone()),
            ("limit", self.config.klines_limit.to_string()),
            ("startTime", start.timestamp_millis().to_string()),
        ];

        debug!("Fetching {} klines from {}", self.config.symbol, start);
        let response = self.http_client.get(&url).query(&params).send().await?;

        let status = response.status();
        // Binance answers 418 once an IP keeps ignoring 429s
        if status.as_u16() == 429 || status.as_u16() == 418 {
            return Err(PriceOracleError::RateLimit);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(PriceOracleError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let rows: Vec<Vec<Value>> = response.json().await?;
        parse_klines(&rows)
    }
}

#[async_trait]
impl KlinesSource for BinanceKlinesClient {
    async fn klines(&self, start: DateTime<Utc>) -> Result<Vec<PricePoint>> {
        retry_with_backoff(
            move || self.fetch_page(start),
            &self.retry_config,
            Self::classify,
        )
        .await
    }

    fn page_limit(&self) -> u32 {
        self.config.klines_limit
    }
}

/// Each kline row is `[openTime, open, high, low, close, ...]`; the open price
/// at the open time becomes one price point.
pub fn parse_klines(rows: &[Vec<Value>]) -> Result<Vec<PricePoint>> {
    rows.iter()
        .map(|row| {
            let open_time = row
                .first()
                .and_then(Value::as_i64)
                .and_then(DateTime::<Utc>::from_timestamp_millis)
                .ok_or_else(|| {
                    PriceOracleError::InvalidPriceData(format!("bad kline open time: {:?}", row.first()))
                })?;

            let open = row.get(1).and_then(Value::as_str).ok_or_else(|| {
                PriceOracleError::InvalidPriceData(format!("missing kline open price at {}", open_time))
            })?;
            let price = Decimal::from_str(open).map_err(|e| {
                PriceOracleError::InvalidPriceData(format!("kline open price {}: {}", open, e))
            })?;

            Ok(PricePoint {
                date: open_time,
                price,
            })
        })
        .collect()
}
