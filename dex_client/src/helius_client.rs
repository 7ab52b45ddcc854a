use crate::{
    error_for_response, AssetMetadata, ProviderError, Result, TransactionIndexer, TransactionPage,
    WalletAsset,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use config_manager::HeliusConfig;
use pnl_core::{SwapEvent, TokenLeg};
use reqwest::{Client, RequestBuilder};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Helius returns at most this many enhanced transactions per request
const TRANSACTIONS_PAGE_LIMIT: u32 = 100;

const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// Helius API client for enhanced transactions, balances and DAS asset queries
#[derive(Debug, Clone)]
pub struct HeliusClient {
    /// HTTP client for making requests
    http_client: Client,

    /// Helius API configuration
    config: HeliusConfig,
}

impl HeliusClient {
    /// Create a new Helius client with the given configuration
    pub fn new(config: HeliusConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(ProviderError::ConfigError(
                "Helius API key is required".to_string(),
            ));
        }

        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .user_agent("wallet-tracker/1.0")
            .build()
            .map_err(|e| ProviderError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            config,
        })
    }

    /// Send a request once; 429 surfaces as `RateLimited` so callers own the backoff
    async fn make_request(&self, request_builder: RequestBuilder) -> Result<reqwest::Response> {
        let response = request_builder.send().await?;

        if response.status().is_success() {
            return Ok(response);
        }

        let err = error_for_response(response).await;
        match &err {
            ProviderError::RateLimited { retry_after } => {
                warn!("Helius rate limit exceeded, retry after {:?}", retry_after)
            }
            other => error!("Helius API error: {}", other),
        }
        Err(err)
    }

    /// Validate wallet address format
    fn validate_wallet_address(&self, wallet_address: &str) -> Result<()> {
        if wallet_address.is_empty() {
            return Err(ProviderError::InvalidWalletAddress(
                "Wallet address cannot be empty".to_string(),
            ));
        }

        // Base58 Solana public keys are 32 to 44 characters
        if wallet_address.len() < 32 || wallet_address.len() > 44 {
            return Err(ProviderError::InvalidWalletAddress(format!(
                "Invalid wallet address length: {}",
                wallet_address.len()
            )));
        }

        Ok(())
    }

    /// Build the Helius API URL for fetching wallet transactions
    fn build_transactions_url(&self, wallet_address: &str, before: Option<&str>) -> String {
        let mut url = format!(
            "{}/addresses/{}/transactions?api-key={}&limit={}",
            self.config.api_base_url.trim_end_matches('/'),
            wallet_address,
            self.config.api_key,
            TRANSACTIONS_PAGE_LIMIT
        );

        if let Some(before_signature) = before {
            url.push_str(&format!("&before={}", before_signature));
        }

        url
    }

    fn rpc_url(&self) -> String {
        format!(
            "{}/?api-key={}",
            self.config.rpc_url.trim_end_matches('/'),
            self.config.api_key
        )
    }

    /// JSON-RPC call against the Helius RPC endpoint, returning `result`
    async fn rpc_call(&self, method: &str, params: Value) -> Result<Value> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": "wallet-tracker",
            "method": method,
            "params": params,
        });

        debug!("Helius RPC call: {}", method);
        let response = self
            .make_request(self.http_client.post(self.rpc_url()).json(&body))
            .await?;
        let envelope: RpcEnvelope = response.json().await?;

        if let Some(err) = envelope.error {
            return Err(ProviderError::ApiError {
                status: 200,
                message: format!("{} failed: {}", method, err),
            });
        }
        envelope.result.ok_or_else(|| ProviderError::ApiError {
            status: 200,
            message: format!("{} returned no result", method),
        })
    }
}

#[async_trait]
impl TransactionIndexer for HeliusClient {
    async fn get_transactions(
        &self,
        address: &str,
        before: Option<&str>,
    ) -> Result<TransactionPage> {
        self.validate_wallet_address(address)?;

        let url = self.build_transactions_url(address, before);
        debug!("Fetching transaction page for {} before {:?}", address, before);

        let response = self.make_request(self.http_client.get(&url)).await?;
        let raw: Vec<HeliusTransaction> = response.json().await?;

        Ok(page_from_raw(raw))
    }

    async fn get_balance(&self, address: &str) -> Result<Decimal> {
        self.validate_wallet_address(address)?;

        let result = self.rpc_call("getBalance", json!([address])).await?;
        let balance: RpcBalance = serde_json::from_value(result)?;

        Ok(lamports_to_sol(balance.value))
    }

    async fn get_assets(&self, address: &str, page: u32) -> Result<Vec<WalletAsset>> {
        self.validate_wallet_address(address)?;

        let params = json!({
            "ownerAddress": address,
            "page": page,
            "limit": self.config.assets_page_size,
            "displayOptions": { "showFungible": true },
        });
        let result = self.rpc_call("getAssetsByOwner", params).await?;
        let list: DasAssetList = serde_json::from_value(result)?;

        debug!("Fetched {} assets for {} (page {})", list.items.len(), address, page);
        Ok(list.items.into_iter().filter_map(DasAsset::into_wallet_asset).collect())
    }

    fn assets_page_size(&self) -> u32 {
        self.config.assets_page_size
    }

    async fn get_asset_metadata(&self, mints: &[String]) -> Result<Vec<AssetMetadata>> {
        if mints.is_empty() {
            return Ok(Vec::new());
        }

        let result = self.rpc_call("getAssetBatch", json!({ "ids": mints })).await?;
        // Unknown ids come back as null entries
        let assets: Vec<Option<DasAsset>> = serde_json::from_value(result)?;

        Ok(assets.into_iter().flatten().map(DasAsset::into_metadata).collect())
    }
}

/// Convert one raw page, keeping the cursor and horizon anchored to raw items
pub fn page_from_raw(raw: Vec<HeliusTransaction>) -> TransactionPage {
    let cursor = raw.last().map(|tx| tx.signature.clone());
    let oldest_timestamp = raw
        .iter()
        .map(|tx| tx.timestamp)
        .min()
        .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0));

    let mut events = Vec::with_capacity(raw.len());
    let mut rejected = 0;
    for tx in raw {
        let signature = tx.signature.clone();
        match tx.into_swap_event() {
            Ok(event) => events.push(event),
            Err(e) => {
                warn!("Rejected transaction {}: {}", signature, e);
                rejected += 1;
            }
        }
    }

    TransactionPage {
        events,
        cursor,
        oldest_timestamp,
        rejected,
    }
}

pub fn lamports_to_sol(lamports: u64) -> Decimal {
    Decimal::from(lamports) / Decimal::from(LAMPORTS_PER_SOL)
}

/// Scale a raw integer amount by its decimals
fn scale_raw_amount(raw: Decimal, decimals: u32) -> Decimal {
    let mut scaled = raw;
    for _ in 0..decimals {
        scaled /= Decimal::TEN;
    }
    scaled.normalize()
}

// Helius API response structures based on the Enhanced Transactions API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeliusTransaction {
    pub signature: String,
    pub timestamp: i64,
    #[serde(rename = "type", default)]
    pub transaction_type: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub description: String,
    pub fee: i64,
    #[serde(rename = "feePayer", default)]
    pub fee_payer: String,
    #[serde(rename = "tokenTransfers", default)]
    pub token_transfers: Vec<HeliusTokenTransfer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeliusTokenTransfer {
    #[serde(rename = "fromUserAccount", default)]
    pub from_user_account: Option<String>,
    #[serde(rename = "toUserAccount", default)]
    pub to_user_account: Option<String>,
    #[serde(rename = "tokenAmount")]
    pub token_amount: f64,
    pub mint: String,
}

impl HeliusTransaction {
    /// Validate and convert into the domain event
    pub fn into_swap_event(self) -> pnl_core::Result<SwapEvent> {
        let timestamp = DateTime::<Utc>::from_timestamp(self.timestamp, 0).ok_or_else(|| {
            pnl_core::PnLError::InvalidEvent(format!("timestamp out of range: {}", self.timestamp))
        })?;

        let legs = self
            .token_transfers
            .into_iter()
            .map(|transfer| {
                let amount = Decimal::from_f64(transfer.token_amount).ok_or_else(|| {
                    pnl_core::PnLError::InvalidEvent(format!(
                        "token amount is not finite: {}",
                        transfer.token_amount
                    ))
                })?;
                Ok(TokenLeg {
                    mint: transfer.mint,
                    amount: amount.normalize(),
                    from_user_account: transfer
                        .from_user_account
                        .filter(|account| !account.is_empty()),
                    to_user_account: transfer
                        .to_user_account
                        .filter(|account| !account.is_empty()),
                })
            })
            .collect::<pnl_core::Result<Vec<_>>>()?;

        SwapEvent {
            signature: self.signature,
            timestamp,
            tx_type: self.transaction_type,
            source: self.source,
            description: self.description,
            fee_lamports: self.fee,
            fee_payer: self.fee_payer,
            legs,
        }
        .validate()
    }
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    result: Option<Value>,
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RpcBalance {
    value: u64,
}

#[derive(Debug, Deserialize)]
struct DasAssetList {
    #[serde(default)]
    items: Vec<DasAsset>,
}

#[derive(Debug, Deserialize)]
struct DasAsset {
    id: String,
    #[serde(default)]
    content: Option<DasContent>,
    #[serde(default)]
    token_info: Option<DasTokenInfo>,
}

#[derive(Debug, Deserialize)]
struct DasContent {
    #[serde(default)]
    metadata: Option<DasMetadata>,
    #[serde(default)]
    files: Vec<DasFile>,
}

#[derive(Debug, Deserialize)]
struct DasMetadata {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    symbol: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DasFile {
    #[serde(default)]
    cdn_uri: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DasTokenInfo {
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default)]
    balance: Option<u64>,
    #[serde(default)]
    supply: Option<u64>,
    #[serde(default)]
    decimals: Option<u32>,
    #[serde(default)]
    price_info: Option<DasPriceInfo>,
}

#[derive(Debug, Deserialize)]
struct DasPriceInfo {
    #[serde(default)]
    price_per_token: Option<f64>,
    #[serde(default)]
    total_price: Option<f64>,
}

impl DasAsset {
    fn name(&self) -> String {
        self.content
            .as_ref()
            .and_then(|c| c.metadata.as_ref())
            .and_then(|m| m.name.clone())
            .unwrap_or_default()
    }

    fn symbol(&self) -> String {
        self.content
            .as_ref()
            .and_then(|c| c.metadata.as_ref())
            .and_then(|m| m.symbol.clone())
            .or_else(|| self.token_info.as_ref().and_then(|t| t.symbol.clone()))
            .unwrap_or_default()
    }

    fn into_metadata(self) -> AssetMetadata {
        AssetMetadata {
            symbol: self.symbol(),
            name: self.name(),
            mint: self.id,
        }
    }

    /// Only fungible assets carry `token_info`
    fn into_wallet_asset(self) -> Option<WalletAsset> {
        let name = self.name();
        let symbol = self.symbol();
        let icon = self
            .content
            .as_ref()
            .and_then(|c| c.files.first())
            .and_then(|f| f.cdn_uri.clone());
        let info = self.token_info?;
        let decimals = info.decimals.unwrap_or(0);

        let balance = scale_raw_amount(Decimal::from(info.balance.unwrap_or(0)), decimals);
        let supply = info
            .supply
            .map(|s| scale_raw_amount(Decimal::from(s), decimals));
        let (price_per_token, total_price) = info
            .price_info
            .map(|p| {
                (
                    p.price_per_token.and_then(Decimal::from_f64).unwrap_or_default(),
                    p.total_price.and_then(Decimal::from_f64).unwrap_or_default(),
                )
            })
            .unwrap_or_default();

        Some(WalletAsset {
            mint: self.id,
            symbol,
            name,
            icon,
            balance,
            supply,
            price_per_token,
            total_price,
        })
    }
}
