#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use config_manager::{ImporterConfig, SystemConfig, SOL_MINT};
use dex_client::{
    AssetMetadata, MarketDataProvider, ProviderError, TransactionIndexer, TransactionPage,
    WalletAsset,
};
use job_orchestrator::{JobOrchestrator, Providers};
use persistence_layer::{MemoryStore, PriceHistoryStore};
use pnl_core::{
    Coin, PricePoint, SwapEvent, TokenLeg, TradeAction, TradeLeg, Transaction,
};
use price_oracle::{KlinesSource, PriceOracleError};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

pub const TOKEN: &str = "TokenX11111111111111111111111111111111111111";

/// Indexer serving canned pages keyed by the `before` cursor
#[derive(Default)]
pub struct FakeIndexer {
    pub pages: HashMap<Option<String>, TransactionPage>,
    /// Number of rate-limited responses to return before serving pages
    pub rate_limits: Mutex<u32>,
    pub retry_after: Option<std::time::Duration>,
    pub calls: Mutex<Vec<Option<String>>>,
    pub balance: Decimal,
    pub assets: Vec<WalletAsset>,
    pub metadata: Vec<AssetMetadata>,
}

impl FakeIndexer {
    pub fn with_pages(pages: Vec<(Option<&str>, TransactionPage)>) -> Self {
        Self {
            pages: pages
                .into_iter()
                .map(|(cursor, page)| (cursor.map(str::to_string), page))
                .collect(),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<Option<String>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransactionIndexer for FakeIndexer {
    async fn get_transactions(
        &self,
        _address: &str,
        before: Option<&str>,
    ) -> Result<TransactionPage, ProviderError> {
        {
            let mut remaining = self.rate_limits.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ProviderError::RateLimited {
                    retry_after: self.retry_after,
                });
            }
        }
        self.calls.lock().unwrap().push(before.map(str::to_string));
        Ok(self
            .pages
            .get(&before.map(str::to_string))
            .cloned()
            .unwrap_or_default())
    }

    async fn get_balance(&self, _address: &str) -> Result<Decimal, ProviderError> {
        Ok(self.balance)
    }

    async fn get_assets(&self, _address: &str, page: u32) -> Result<Vec<WalletAsset>, ProviderError> {
        Ok(if page == 1 { self.assets.clone() } else { Vec::new() })
    }

    fn assets_page_size(&self) -> u32 {
        1000
    }

    async fn get_asset_metadata(&self, mints: &[String]) -> Result<Vec<AssetMetadata>, ProviderError> {
        Ok(self
            .metadata
            .iter()
            .filter(|m| mints.contains(&m.mint))
            .cloned()
            .collect())
    }
}

/// Market data with fixed market caps per (coin, day), counting calls
#[derive(Default)]
pub struct FakeMarketData {
    pub coins: Vec<Coin>,
    pub market_caps: HashMap<(String, NaiveDate), Decimal>,
    pub market_cap_calls: Mutex<usize>,
    pub coin_list_delay: Option<std::time::Duration>,
}

impl FakeMarketData {
    pub fn market_cap_calls(&self) -> usize {
        *self.market_cap_calls.lock().unwrap()
    }
}

#[async_trait]
impl MarketDataProvider for FakeMarketData {
    async fn coin_list(&self) -> Result<Vec<Coin>, ProviderError> {
        if let Some(delay) = self.coin_list_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.coins.clone())
    }

    async fn market_cap_on(
        &self,
        coin_id: &str,
        date: NaiveDate,
    ) -> Result<Option<Decimal>, ProviderError> {
        *self.market_cap_calls.lock().unwrap() += 1;
        Ok(self.market_caps.get(&(coin_id.to_string(), date)).copied())
    }
}

/// Exchange with no candles
pub struct NoKlines;

#[async_trait]
impl KlinesSource for NoKlines {
    async fn klines(&self, _start: DateTime<Utc>) -> Result<Vec<PricePoint>, PriceOracleError> {
        Ok(Vec::new())
    }

    fn page_limit(&self) -> u32 {
        1000
    }
}

pub fn importer_config() -> ImporterConfig {
    ImporterConfig {
        retention_months: 6,
        initial_retry_delay_ms: 1,
        max_retry_delay_ms: 5,
        max_total_backoff_ms: 50,
        iteration_pause_ms: 0,
        max_pages: None,
        pass_deadline_seconds: None,
        import_lease_seconds: 3600,
    }
}

pub fn test_config() -> SystemConfig {
    let mut config = SystemConfig::default();
    config.importer = importer_config();
    config.scheduler.lock_lease_seconds = 60;
    config
}

/// Store with a base asset price recorded well before any test event
pub async fn store_with_price(price: Decimal) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store
        .insert_prices(&[PricePoint {
            date: Utc::now() - Duration::days(400),
            price,
        }])
        .await
        .unwrap();
    store
}

pub fn orchestrator(
    store: Arc<MemoryStore>,
    indexer: Arc<FakeIndexer>,
    market_data: Arc<FakeMarketData>,
) -> JobOrchestrator {
    let providers = Providers {
        indexer,
        market_data,
        klines: Arc::new(NoKlines),
    };
    JobOrchestrator::new(test_config(), store.clone(), store, providers).unwrap()
}

pub fn swap(signature: &str, days_ago: i64, from: (&str, Decimal), to: (&str, Decimal)) -> SwapEvent {
    let leg = |(mint, amount): (&str, Decimal)| TokenLeg {
        mint: mint.to_string(),
        amount,
        from_user_account: None,
        to_user_account: None,
    };
    SwapEvent {
        signature: signature.to_string(),
        timestamp: Utc::now() - Duration::days(days_ago),
        tx_type: "SWAP".to_string(),
        source: "JUPITER".to_string(),
        description: String::new(),
        fee_lamports: 5000,
        fee_payer: "wallet".to_string(),
        legs: vec![leg(from), leg(to)],
    }
}

pub fn buy(signature: &str, days_ago: i64, sol: Decimal, tokens: Decimal) -> SwapEvent {
    swap(signature, days_ago, (SOL_MINT, sol), (TOKEN, tokens))
}

pub fn sell(signature: &str, days_ago: i64, tokens: Decimal, sol: Decimal) -> SwapEvent {
    swap(signature, days_ago, (TOKEN, tokens), (SOL_MINT, sol))
}

/// Page whose cursor is its last event's signature
pub fn page(events: Vec<SwapEvent>) -> TransactionPage {
    TransactionPage {
        cursor: events.last().map(|e| e.signature.clone()),
        oldest_timestamp: events.iter().map(|e| e.timestamp).min(),
        events,
        rejected: 0,
    }
}

/// Stored trade of `TOKEN` with explicit USD prices
pub fn trade(
    wallet_id: Uuid,
    signature: &str,
    date: DateTime<Utc>,
    action: TradeAction,
    token_amount: Decimal,
    token_price: Decimal,
) -> Transaction {
    let token = TradeLeg::priced(TOKEN, token_amount, token_price);
    let sol = TradeLeg::priced(SOL_MINT, token_amount * token_price / Decimal::ONE_HUNDRED, Decimal::ONE_HUNDRED);
    let (from, to) = match action {
        TradeAction::Buy => (sol, token),
        _ => (token, sol),
    };
    Transaction {
        id: Uuid::new_v4(),
        signature: signature.to_string(),
        wallet_id,
        date,
        fee_lamports: 5000,
        fee_payer: "wallet".to_string(),
        description: String::new(),
        tx_type: "SWAP".to_string(),
        source: "JUPITER".to_string(),
        from,
        to,
        action,
        tradable_token_mint: TOKEN.to_string(),
        market_cap: None,
        pnl: None,
        roi: None,
    }
}
