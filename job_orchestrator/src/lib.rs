use chrono::Duration as LeaseDuration;
use config_manager::SystemConfig;
use dex_client::{MarketDataProvider, ProviderError, TransactionIndexer};
use persistence_layer::{PersistenceError, Storage, TaskLock};
use pnl_core::{PriceOracle, TradeClassifier};
use price_oracle::{HistoricalPriceOracle, KlinesSource, PriceHistorySync, PriceOracleError};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, error, info};

pub mod coin_list_sync;
pub mod holdings_import;
pub mod market_cap_backfill;
pub mod pnl_enrichment;
pub mod task_lock;
pub mod transaction_importer;
pub mod wallet_service;

pub use coin_list_sync::{CoinListSync, CoinSyncSummary};
pub use holdings_import::{HoldingsImport, HoldingsSummary};
pub use market_cap_backfill::{BackfillSummary, MarketCapBackfill};
pub use pnl_enrichment::{PnlEnrichment, PnlSummary};
pub use task_lock::{run_exclusive, LockOutcome};
pub use transaction_importer::{ImportOutcome, ImportSummary, TransactionImporter};
pub use wallet_service::{TrackedWallet, WalletService};

#[derive(Error, Debug, Clone)]
pub enum OrchestratorError {
    #[error("Persistence error: {0}")]
    Persistence(String),
    #[error("P&L calculation error: {0}")]
    PnL(String),
    #[error("Provider error: {0}")]
    Provider(String),
    #[error("Price oracle error: {0}")]
    PriceOracle(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Rate limit backoff budget exhausted after {waited_ms}ms")]
    BackoffExhausted { waited_ms: u64 },
    #[error("Job execution failed: {0}")]
    JobExecution(String),
    #[error("Invalid wallet address: {0}")]
    InvalidWallet(String),
    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<PersistenceError> for OrchestratorError {
    fn from(err: PersistenceError) -> Self {
        match err {
            PersistenceError::NotFound(what) => OrchestratorError::NotFound(what),
            other => OrchestratorError::Persistence(other.to_string()),
        }
    }
}

impl From<pnl_core::PnLError> for OrchestratorError {
    fn from(err: pnl_core::PnLError) -> Self {
        OrchestratorError::PnL(err.to_string())
    }
}

impl From<ProviderError> for OrchestratorError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::InvalidWalletAddress(address) => OrchestratorError::InvalidWallet(address),
            other => OrchestratorError::Provider(other.to_string()),
        }
    }
}

impl From<PriceOracleError> for OrchestratorError {
    fn from(err: PriceOracleError) -> Self {
        OrchestratorError::PriceOracle(err.to_string())
    }
}

impl From<config_manager::ConfigurationError> for OrchestratorError {
    fn from(err: config_manager::ConfigurationError) -> Self {
        OrchestratorError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// External services the jobs talk to
#[derive(Clone)]
pub struct Providers {
    pub indexer: Arc<dyn TransactionIndexer>,
    pub market_data: Arc<dyn MarketDataProvider>,
    pub klines: Arc<dyn KlinesSource>,
}

/// Scheduled jobs, each guarded by the task lock under its own name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScheduledJob {
    MarketCapBackfill,
    CoinList,
    PriceHistory,
    Holdings,
    RealizedPnl,
    WalletImports,
}

impl ScheduledJob {
    pub const ALL: [ScheduledJob; 6] = [
        ScheduledJob::PriceHistory,
        ScheduledJob::CoinList,
        ScheduledJob::WalletImports,
        ScheduledJob::MarketCapBackfill,
        ScheduledJob::RealizedPnl,
        ScheduledJob::Holdings,
    ];

    /// Task lock name
    pub fn name(&self) -> &'static str {
        match self {
            ScheduledJob::MarketCapBackfill => "setTransactionsMarketCap",
            ScheduledJob::CoinList => "importCoinList",
            ScheduledJob::PriceHistory => "syncPriceHistory",
            ScheduledJob::Holdings => "importHoldings",
            ScheduledJob::RealizedPnl => "setTransactionsPnl",
            ScheduledJob::WalletImports => "importWallets",
        }
    }

    pub fn interval(&self, config: &SystemConfig) -> Duration {
        let seconds = match self {
            ScheduledJob::MarketCapBackfill => config.scheduler.backfill_interval_seconds,
            ScheduledJob::CoinList => config.scheduler.coin_list_interval_seconds,
            ScheduledJob::PriceHistory => config.scheduler.price_history_interval_seconds,
            ScheduledJob::Holdings => config.scheduler.holdings_interval_seconds,
            ScheduledJob::RealizedPnl => config.scheduler.pnl_interval_seconds,
            ScheduledJob::WalletImports => config.scheduler.import_interval_seconds,
        };
        Duration::from_secs(seconds)
    }
}

/// Summary of one job run, tagged by job
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "job", rename_all = "snake_case")]
pub enum JobReport {
    MarketCaps(BackfillSummary),
    Coins(CoinSyncSummary),
    Prices(price_oracle::PriceSyncSummary),
    Holdings(HoldingsSummary),
    RealizedPnl(PnlSummary),
    WalletImports { wallets: usize, completed: usize, paused: usize, failed: usize },
}

/// Wires the stores and providers into the jobs and runs them on schedule
pub struct JobOrchestrator {
    config: SystemConfig,
    lock: Arc<dyn TaskLock>,
    wallets: WalletService,
    backfill: MarketCapBackfill,
    coin_sync: CoinListSync,
    price_sync: PriceHistorySync,
    holdings: HoldingsImport,
    pnl: PnlEnrichment,
}

impl JobOrchestrator {
    pub fn new<S>(
        config: SystemConfig,
        store: Arc<S>,
        lock: Arc<dyn TaskLock>,
        providers: Providers,
    ) -> Result<Self>
    where
        S: Storage + 'static,
    {
        let oracle: Arc<dyn PriceOracle> = Arc::new(HistoricalPriceOracle::new(store.clone()));
        let classifier = TradeClassifier::new(oracle, config.system.base_asset_mint.clone());
        let storage: Arc<dyn Storage> = store.clone();

        let importer = Arc::new(TransactionImporter::new(
            storage.clone(),
            providers.indexer.clone(),
            classifier,
            config.importer.clone(),
        ));
        let wallets = WalletService::new(storage.clone(), importer, config.analytics.clone());
        let backfill = MarketCapBackfill::new(
            storage.clone(),
            providers.indexer.clone(),
            providers.market_data.clone(),
        );
        let coin_sync = CoinListSync::new(storage.clone(), providers.market_data.clone());
        let price_sync =
            PriceHistorySync::new(providers.klines.clone(), store, &config.binance.history_start)?;
        let holdings = HoldingsImport::new(storage.clone(), providers.indexer.clone());
        let pnl = PnlEnrichment::new(storage);

        Ok(Self {
            config,
            lock,
            wallets,
            backfill,
            coin_sync,
            price_sync,
            holdings,
            pnl,
        })
    }

    pub fn wallets(&self) -> &WalletService {
        &self.wallets
    }

    fn lock_lease(&self) -> LeaseDuration {
        LeaseDuration::seconds(self.config.scheduler.lock_lease_seconds)
    }

    /// Run one job under its task lock; `Skipped` when another worker holds it
    pub async fn run_job(&self, job: ScheduledJob) -> Result<LockOutcome<JobReport>> {
        let lease = self.lock_lease();
        run_exclusive(self.lock.as_ref(), job.name(), lease, || self.execute(job)).await
    }

    async fn execute(&self, job: ScheduledJob) -> Result<JobReport> {
        match job {
            ScheduledJob::MarketCapBackfill => Ok(JobReport::MarketCaps(self.backfill.run().await?)),
            ScheduledJob::CoinList => Ok(JobReport::Coins(self.coin_sync.run().await?)),
            ScheduledJob::PriceHistory => Ok(JobReport::Prices(self.price_sync.run().await?)),
            ScheduledJob::Holdings => Ok(JobReport::Holdings(self.holdings.run_all().await?)),
            ScheduledJob::RealizedPnl => Ok(JobReport::RealizedPnl(self.pnl.run().await?)),
            ScheduledJob::WalletImports => self.resume_pending_imports().await,
        }
    }

    async fn resume_pending_imports(&self) -> Result<JobReport> {
        let pending = self.wallets.pending_imports().await?;
        let (mut completed, mut paused, mut failed) = (0, 0, 0);

        for wallet in &pending {
            match self.wallets.importer().import_transactions(wallet).await {
                Ok(ImportOutcome::Completed(_)) => completed += 1,
                Ok(ImportOutcome::Paused(_)) => paused += 1,
                Ok(ImportOutcome::AlreadyImporting | ImportOutcome::Superseded(_)) => {}
                Err(e) => {
                    error!("Import of wallet {} failed: {}", wallet.address, e);
                    failed += 1;
                }
            }
        }

        Ok(JobReport::WalletImports {
            wallets: pending.len(),
            completed,
            paused,
            failed,
        })
    }

    /// Start continuous mode: each job on its own interval until Ctrl-C
    pub async fn start_continuous_mode(&self) -> Result<()> {
        info!("Starting scheduler with {} jobs", ScheduledJob::ALL.len());

        let mut last_run: HashMap<ScheduledJob, Instant> = HashMap::new();
        let tick = Duration::from_millis(self.config.system.process_loop_ms);
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        loop {
            for job in ScheduledJob::ALL {
                let due = last_run
                    .get(&job)
                    .map_or(true, |at| at.elapsed() >= job.interval(&self.config));
                if !due {
                    continue;
                }
                last_run.insert(job, Instant::now());

                match self.run_job(job).await {
                    Ok(LockOutcome::Ran(report)) => {
                        debug!("Job {} finished: {:?}", job.name(), report);
                    }
                    Ok(LockOutcome::Skipped) => {
                        debug!("Job {} is running elsewhere, skipped", job.name());
                    }
                    Err(e) => {
                        error!("Job {} failed: {}", job.name(), e);
                    }
                }
            }

            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown signal received, stopping scheduler");
                    break;
                }
                _ = sleep(tick) => {}
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_names_are_unique() {
        let mut names: Vec<&str> = ScheduledJob::ALL.iter().map(|j| j.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), ScheduledJob::ALL.len());
        assert_eq!(ScheduledJob::MarketCapBackfill.name(), "setTransactionsMarketCap");
    }

    #[test]
    fn test_job_intervals_follow_config() {
        let config = SystemConfig::default();
        assert_eq!(
            ScheduledJob::CoinList.interval(&config),
            Duration::from_secs(4 * 60 * 60)
        );
        assert_eq!(
            ScheduledJob::MarketCapBackfill.interval(&config),
            Duration::from_secs(config.scheduler.backfill_interval_seconds)
        );
    }

    #[test]
    fn test_provider_errors_convert() {
        let err: OrchestratorError =
            ProviderError::InvalidWalletAddress("bad".to_string()).into();
        assert!(matches!(err, OrchestratorError::InvalidWallet(_)));

        let err: OrchestratorError = ProviderError::RateLimited { retry_after: None }.into();
        assert!(matches!(err, OrchestratorError::Provider(_)));
    }

    #[test]
    fn test_missing_record_stays_not_found() {
        let err: OrchestratorError = PersistenceError::NotFound("wallet".to_string()).into();
        assert!(matches!(err, OrchestratorError::NotFound(ref what) if what == "wallet"));
    }
}
