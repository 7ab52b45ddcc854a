use crate::{error_for_response, MarketDataProvider, ProviderError, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use config_manager::CoinGeckoConfig;
use pnl_core::Coin;
use reqwest::{Client, RequestBuilder};
use retry_utils::{retry_with_backoff, RetryConfig};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// CoinGecko client for the coin list and historical market caps.
///
/// Requests are paced by `rate_limit_delay_ms`; 429 and 5xx responses are
/// retried with exponential backoff, honoring `Retry-After` when present.
pub struct CoinGeckoClient {
    http_client: Client,
    config: CoinGeckoConfig,
    retry_config: RetryConfig,
    last_request: Mutex<Option<Instant>>,
}

#[derive(Debug, Deserialize)]
struct CoinListEntry {
    id: String,
    symbol: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct CoinHistoryResponse {
    #[serde(default)]
    market_data: Option<HistoryMarketData>,
}

#[derive(Debug, Deserialize)]
struct HistoryMarketData {
    #[serde(default)]
    market_cap: Option<CurrencyValues>,
}

#[derive(Debug, Deserialize)]
struct CurrencyValues {
    #[serde(default)]
    usd: Option<f64>,
}

impl CoinGeckoClient {
    pub fn new(config: CoinGeckoConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .user_agent("wallet-tracker/1.0")
            .build()
            .map_err(|e| ProviderError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        let retry_config = RetryConfig {
            max_attempts: config.max_retries,
            ..RetryConfig::default()
        };

        Ok(Self {
            http_client,
            config,
            retry_config,
            last_request: Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base_url.trim_end_matches('/'), path)
    }

    fn with_auth(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.api_key {
            Some(key) if !key.is_empty() => request.header("x-cg-demo-api-key", key),
            _ => request,
        }
    }

    /// Keep consecutive requests at least `rate_limit_delay_ms` apart
    async fn pace(&self) {
        let min_gap = Duration::from_millis(self.config.rate_limit_delay_ms);
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < min_gap {
                tokio::time::sleep(min_gap - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = self.url(path);
        let url = url.as_str();
        retry_with_backoff(
            move || async move {
                self.pace().await;
                debug!("CoinGecko request: {}", url);
                let response = self
                    .with_auth(self.http_client.get(url).query(query))
                    .send()
                    .await?;
                if !response.status().is_success() {
                    return Err(error_for_response(response).await);
                }
                let body = response.text().await?;
                Ok::<T, ProviderError>(serde_json::from_str::<T>(&body)?)
            },
            &self.retry_config,
            ProviderError::retry_class,
        )
        .await
    }
}

/// CoinGecko expects history dates as dd-mm-yyyy
pub fn history_date_param(date: NaiveDate) -> String {
    date.format("%d-%m-%Y").to_string()
}

#[async_trait]
impl MarketDataProvider for CoinGeckoClient {
    async fn coin_list(&self) -> Result<Vec<Coin>> {
        let entries: Vec<CoinListEntry> = self.get_json("/coins/list", &[]).await?;
        info!("Fetched {} coins from CoinGecko", entries.len());

        Ok(entries
            .into_iter()
            .map(|e| Coin::normalized(e.id, &e.symbol, &e.name))
            .collect())
    }

    async fn market_cap_on(&self, coin_id: &str, date: NaiveDate) -> Result<Option<Decimal>> {
        let path = format!("/coins/{}/history", coin_id);
        let query = [
            ("date", history_date_param(date)),
            ("localization", "false".to_string()),
        ];
        let history: CoinHistoryResponse = self.get_json(&path, &query).await?;

        let market_cap = history
            .market_data
            .and_then(|m| m.market_cap)
            .and_then(|c| c.usd)
            .and_then(Decimal::from_f64);

        if market_cap.is_none() {
            warn!("No market cap for {} on {}", coin_id, date);
        }
        Ok(market_cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_date_param() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        assert_eq!(history_date_param(date), "02-01-2024");
    }

    #[test]
    fn test_history_payload_without_market_data() {
        let parsed: CoinHistoryResponse =
            serde_json::from_str(r#"{"id":"bonk","symbol":"bonk","name":"Bonk"}"#).unwrap();
        assert!(parsed.market_data.is_none());

        let parsed: CoinHistoryResponse = serde_json::from_str(
            r#"{"id":"bonk","market_data":{"market_cap":{"usd":1000000.0,"eur":900000.0}}}"#,
        )
        .unwrap();
        let usd = parsed
            .market_data
            .and_then(|m| m.market_cap)
            .and_then(|c| c.usd)
            .and_then(Decimal::from_f64);
        assert_eq!(usd, Some(Decimal::from(1_000_000)));
    }

    #[test]
    fn test_url_joins_base_and_path() {
        let config = CoinGeckoConfig {
            api_base_url: "https://api.coingecko.com/api/v3/".to_string(),
            api_key: None,
            request_timeout_seconds: 10,
            rate_limit_delay_ms: 0,
            max_retries: 0,
        };
        let client = CoinGeckoClient::new(config).unwrap();
        assert_eq!(
            client.url("/coins/list"),
            "https://api.coingecko.com/api/v3/coins/list"
        );
    }
}
