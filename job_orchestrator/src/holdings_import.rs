use crate::Result;
use chrono::Utc;
use dex_client::{TransactionIndexer, WalletAsset};
use persistence_layer::Storage;
use pnl_core::{TokenHolding, Wallet};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Safety stop for a misbehaving indexer that keeps returning full pages
const MAX_ASSET_PAGES: u32 = 100;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HoldingsSummary {
    pub wallets: usize,
    pub holdings: usize,
    pub failed_wallets: usize,
}

/// Rebuilds each wallet's balance and token holdings snapshot
pub struct HoldingsImport {
    store: Arc<dyn Storage>,
    indexer: Arc<dyn TransactionIndexer>,
}

impl HoldingsImport {
    pub fn new(store: Arc<dyn Storage>, indexer: Arc<dyn TransactionIndexer>) -> Self {
        Self { store, indexer }
    }

    pub async fn run_all(&self) -> Result<HoldingsSummary> {
        let wallets = self.store.list_wallets().await?;
        let mut summary = HoldingsSummary {
            wallets: wallets.len(),
            ..HoldingsSummary::default()
        };

        for wallet in &wallets {
            match self.import_wallet(wallet).await {
                Ok(count) => summary.holdings += count,
                Err(e) => {
                    error!("Holdings import for {} failed: {}", wallet.address, e);
                    summary.failed_wallets += 1;
                }
            }
        }

        info!(
            "Holdings imported for {} wallets ({} failed), {} holdings",
            summary.wallets, summary.failed_wallets, summary.holdings
        );
        Ok(summary)
    }

    /// Refresh one wallet; returns the number of holdings stored
    pub async fn import_wallet(&self, wallet: &Wallet) -> Result<usize> {
        let balance = self.indexer.get_balance(&wallet.address).await?;
        self.store.set_balance(wallet.id, balance).await?;

        let page_size = self.indexer.assets_page_size() as usize;
        let mut assets = Vec::new();
        for page in 1..=MAX_ASSET_PAGES {
            let batch = self.indexer.get_assets(&wallet.address, page).await?;
            let full = batch.len() >= page_size;
            debug!("Assets page {} of {}: {} items", page, wallet.address, batch.len());
            assets.extend(batch);
            if !full {
                break;
            }
        }

        let now = Utc::now();
        let holdings: Vec<TokenHolding> = assets
            .into_iter()
            .map(|asset| to_holding(wallet.id, asset, now))
            .collect();
        self.store.replace_holdings(wallet.id, &holdings).await?;

        debug!(
            "Wallet {}: balance {} SOL, {} holdings",
            wallet.address,
            balance,
            holdings.len()
        );
        Ok(holdings.len())
    }
}

fn to_holding(wallet_id: Uuid, asset: WalletAsset, now: chrono::DateTime<Utc>) -> TokenHolding {
    TokenHolding {
        wallet_id,
        mint_address: asset.mint,
        symbol: asset.symbol,
        name: asset.name,
        icon: asset.icon,
        balance: asset.balance,
        supply: asset.supply,
        price_per_token: asset.price_per_token,
        total_price: asset.total_price,
        updated_at: now,
    }
}
