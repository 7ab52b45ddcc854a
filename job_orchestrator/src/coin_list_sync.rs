use crate::Result;
use dex_client::MarketDataProvider;
use persistence_layer::Storage;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CoinSyncSummary {
    pub fetched: usize,
    pub written: usize,
    pub unchanged: usize,
}

/// Refreshes the stored coin list used to map token symbols to coin ids
pub struct CoinListSync {
    store: Arc<dyn Storage>,
    market_data: Arc<dyn MarketDataProvider>,
}

impl CoinListSync {
    pub fn new(store: Arc<dyn Storage>, market_data: Arc<dyn MarketDataProvider>) -> Self {
        Self { store, market_data }
    }

    pub async fn run(&self) -> Result<CoinSyncSummary> {
        let coins = self.market_data.coin_list().await?;
        let written = self.store.upsert_coins(&coins).await?.into_result()?;

        info!(
            "Coin list synced: {} coins, {} written",
            coins.len(),
            written.written
        );
        Ok(CoinSyncSummary {
            fetched: coins.len(),
            written: written.written,
            unchanged: written.skipped,
        })
    }
}
