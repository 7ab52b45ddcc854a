use crate::{ImportOutcome, OrchestratorError, Result, TransactionImporter};
use chrono::Utc;
use config_manager::AnalyticsConfig;
use persistence_layer::Storage;
use pnl_core::timeframe::period_cutoff;
use pnl_core::{Wallet, WalletAnalytics};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// A tracked wallet and the import pass its registration triggered, if any
#[derive(Debug, Clone, Serialize)]
pub struct TrackedWallet {
    pub wallet: Wallet,
    pub import: Option<ImportOutcome>,
}

/// Entry points for registering wallets and reading their statistics
pub struct WalletService {
    store: Arc<dyn Storage>,
    importer: Arc<TransactionImporter>,
    config: AnalyticsConfig,
}

impl WalletService {
    pub fn new(
        store: Arc<dyn Storage>,
        importer: Arc<TransactionImporter>,
        config: AnalyticsConfig,
    ) -> Self {
        Self {
            store,
            importer,
            config,
        }
    }

    pub fn importer(&self) -> &TransactionImporter {
        &self.importer
    }

    /// Wallets whose history has not been walked back to the horizon yet
    pub async fn pending_imports(&self) -> Result<Vec<Wallet>> {
        let wallets = self.store.list_wallets().await?;
        Ok(wallets
            .into_iter()
            .filter(|w| !w.import_status.done)
            .collect())
    }

    /// Register `address` and import its history unless that already finished.
    /// Calling it again for the same address never creates a second wallet.
    pub async fn track_wallet(&self, address: &str) -> Result<TrackedWallet> {
        let address = address.trim();
        if address.is_empty() {
            return Err(OrchestratorError::InvalidWallet(
                "wallet address is empty".to_string(),
            ));
        }

        let wallet = self.store.find_or_create_wallet(address).await?;
        if wallet.import_status.done {
            debug!("Wallet {} already imported", address);
            return Ok(TrackedWallet {
                wallet,
                import: None,
            });
        }

        info!("Tracking wallet {}", address);
        let outcome = self.importer.import_transactions(&wallet).await?;
        let wallet = self.store.get_wallet(wallet.id).await?;

        Ok(TrackedWallet {
            wallet,
            import: Some(outcome),
        })
    }

    /// Statistics of a tracked wallet over `period` (the configured default when absent)
    pub async fn wallet_analytics(
        &self,
        address: &str,
        period: Option<&str>,
    ) -> Result<WalletAnalytics> {
        let period = period.unwrap_or(&self.config.default_period);
        let since = period_cutoff(period, Utc::now())?;

        let wallet = self
            .store
            .find_wallet_by_address(address.trim())
            .await?
            .ok_or_else(|| {
                OrchestratorError::NotFound(format!("wallet {} is not tracked", address))
            })?;

        let transactions = self.store.transactions_for_wallet(wallet.id).await?;
        let holdings = self.store.holdings_for_wallet(wallet.id).await?;

        debug!(
            "Analytics for {} over {}: {} trades, {} holdings",
            wallet.address,
            period,
            transactions.len(),
            holdings.len()
        );
        Ok(pnl_core::wallet_analytics(
            &wallet.address,
            period,
            since,
            &transactions,
            &holdings,
        ))
    }
}
