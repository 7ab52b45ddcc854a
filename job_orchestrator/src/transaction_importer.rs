use crate::{OrchestratorError, Result};
use chrono::{DateTime, Duration as LeaseDuration, Utc};
use config_manager::ImporterConfig;
use dex_client::{ProviderError, TransactionIndexer, TransactionPage};
use futures::future::join_all;
use persistence_layer::Storage;
use pnl_core::timeframe::retention_horizon;
use pnl_core::{SwapEvent, TradeClassifier, Transaction, Wallet};
use retry_utils::ExponentialBackoff;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Counters of one import pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportSummary {
    pub pages: u32,
    /// Raw items returned by the indexer
    pub fetched: usize,
    /// Raw items that failed validation
    pub rejected: usize,
    /// Events outside the retention horizon or not a 2-3 leg swap
    pub ignored: usize,
    /// Swaps the classifier could not attribute to a buy or sell
    pub unclassified: usize,
    pub inserted: usize,
    pub already_stored: usize,
    pub rate_limited: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "summary", rename_all = "snake_case")]
pub enum ImportOutcome {
    /// History walked back to the horizon; `done` is set
    Completed(ImportSummary),
    /// Stopped by deadline or page budget; the next pass resumes from the cursor
    Paused(ImportSummary),
    /// Another pass holds the wallet
    AlreadyImporting,
    /// The claim went stale and another pass took it over; this one stopped
    Superseded(ImportSummary),
}

enum PassEnd {
    Done,
    Paused,
    Superseded,
}

/// Walks a wallet's swap history backwards from its saved cursor, classifying
/// and storing each page until the retention horizon.
pub struct TransactionImporter {
    store: Arc<dyn Storage>,
    indexer: Arc<dyn TransactionIndexer>,
    classifier: TradeClassifier,
    config: ImporterConfig,
}

impl TransactionImporter {
    pub fn new(
        store: Arc<dyn Storage>,
        indexer: Arc<dyn TransactionIndexer>,
        classifier: TradeClassifier,
        config: ImporterConfig,
    ) -> Self {
        Self {
            store,
            indexer,
            classifier,
            config,
        }
    }

    /// Run one import pass for `wallet`.
    ///
    /// The pass clears its own claim on every exit path, and never one that
    /// another pass took over. A failed pass leaves the committed cursor in
    /// place for the next one.
    pub async fn import_transactions(&self, wallet: &Wallet) -> Result<ImportOutcome> {
        let lease = LeaseDuration::seconds(self.config.import_lease_seconds);
        let owner = Uuid::new_v4().to_string();
        if !self.store.try_claim_import(wallet.id, &owner, lease).await? {
            info!("Wallet {} is already being imported, skipping", wallet.address);
            return Ok(ImportOutcome::AlreadyImporting);
        }

        // Re-read so the pass starts from the latest committed cursor
        let wallet = match self.store.get_wallet(wallet.id).await {
            Ok(fresh) => fresh,
            Err(e) => {
                self.release_claim(wallet, &owner).await;
                return Err(e.into());
            }
        };

        info!(
            "Importing transactions for {} from cursor {:?}",
            wallet.address, wallet.import_status.last_cursor
        );

        let mut summary = ImportSummary::default();
        let pass = self.run_pass(&wallet, &owner, &mut summary).await;

        match pass {
            Ok(PassEnd::Done) => {
                if !self.store.finish_import(wallet.id, &owner, true).await? {
                    warn!("Import claim of {} was taken over before completion", wallet.address);
                    return Ok(ImportOutcome::Superseded(summary));
                }
                self.backfill_creation_date(&wallet).await?;
                info!(
                    "Import of {} completed: {} pages, {} new transactions",
                    wallet.address, summary.pages, summary.inserted
                );
                Ok(ImportOutcome::Completed(summary))
            }
            Ok(PassEnd::Paused) => {
                if !self.store.finish_import(wallet.id, &owner, false).await? {
                    warn!("Import claim of {} was taken over before pausing", wallet.address);
                    return Ok(ImportOutcome::Superseded(summary));
                }
                info!(
                    "Import of {} paused after {} pages, will resume from cursor",
                    wallet.address, summary.pages
                );
                Ok(ImportOutcome::Paused(summary))
            }
            Ok(PassEnd::Superseded) => {
                warn!(
                    "Import claim of {} was taken over after {} pages, stopping",
                    wallet.address, summary.pages
                );
                Ok(ImportOutcome::Superseded(summary))
            }
            Err(e) => {
                error!("Import of {} failed: {}", wallet.address, e);
                self.release_claim(&wallet, &owner).await;
                Err(e)
            }
        }
    }

    async fn release_claim(&self, wallet: &Wallet, owner: &str) {
        if let Err(e) = self.store.finish_import(wallet.id, owner, false).await {
            error!("Failed to clear import claim of {}: {}", wallet.address, e);
        }
    }

    async fn run_pass(
        &self,
        wallet: &Wallet,
        owner: &str,
        summary: &mut ImportSummary,
    ) -> Result<PassEnd> {
        let horizon = retention_horizon(self.config.retention_months, Utc::now());
        let deadline = self
            .config
            .pass_deadline_seconds
            .map(|seconds| Instant::now() + Duration::from_secs(seconds));
        let mut backoff = ExponentialBackoff::new(
            Duration::from_millis(self.config.initial_retry_delay_ms),
            Duration::from_millis(self.config.max_retry_delay_ms),
        )
        .with_budget(Duration::from_millis(self.config.max_total_backoff_ms));
        let mut cursor = wallet.import_status.last_cursor.clone();

        loop {
            if self
                .config
                .max_pages
                .is_some_and(|max_pages| summary.pages >= max_pages)
            {
                return Ok(PassEnd::Paused);
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                warn!("Import pass of {} reached its deadline", wallet.address);
                return Ok(PassEnd::Paused);
            }

            let page = match self
                .indexer
                .get_transactions(&wallet.address, cursor.as_deref())
                .await
            {
                Ok(page) => page,
                Err(ProviderError::RateLimited { retry_after }) => {
                    summary.rate_limited += 1;
                    let Some(delay) = backoff.next_delay(retry_after) else {
                        return Err(OrchestratorError::BackoffExhausted {
                            waited_ms: backoff.spent().as_millis() as u64,
                        });
                    };
                    warn!(
                        "Rate limited importing {}, retrying in {}ms",
                        wallet.address,
                        delay.as_millis()
                    );
                    if !self.store.refresh_import_claim(wallet.id, owner).await? {
                        return Ok(PassEnd::Superseded);
                    }
                    sleep(delay).await;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            if page.is_empty() {
                debug!("Empty page for {}, history exhausted", wallet.address);
                return Ok(PassEnd::Done);
            }
            summary.pages += 1;

            let reached_horizon = page.oldest_timestamp.is_some_and(|oldest| oldest < horizon);
            self.store_page(wallet, &page, horizon, summary).await?;

            if reached_horizon {
                debug!("Page reached the retention horizon {} for {}", horizon, wallet.address);
                return Ok(PassEnd::Done);
            }

            if !self.store.refresh_import_claim(wallet.id, owner).await? {
                return Ok(PassEnd::Superseded);
            }
            if let Some(next) = &page.cursor {
                self.store
                    .save_import_cursor(wallet.id, next, Utc::now())
                    .await?;
            }
            cursor = page.cursor;

            sleep(Duration::from_millis(self.config.iteration_pause_ms)).await;
        }
    }

    /// Classify the in-horizon swaps of a page and insert them by signature
    async fn store_page(
        &self,
        wallet: &Wallet,
        page: &TransactionPage,
        horizon: DateTime<Utc>,
        summary: &mut ImportSummary,
    ) -> Result<()> {
        summary.fetched += page.events.len() + page.rejected;
        summary.rejected += page.rejected;

        let swaps: Vec<&SwapEvent> = page
            .events
            .iter()
            .filter(|event| event.timestamp >= horizon && event.is_classifiable())
            .collect();
        summary.ignored += page.events.len() - swaps.len();

        let classified = join_all(
            swaps
                .iter()
                .map(|event| self.classifier.classify(wallet.id, event)),
        )
        .await;

        let mut records: Vec<Transaction> = Vec::with_capacity(classified.len());
        for result in classified {
            match result? {
                Some(record) => records.push(record),
                None => summary.unclassified += 1,
            }
        }

        if records.is_empty() {
            return Ok(());
        }

        let written = self
            .store
            .insert_transactions(&records)
            .await?
            .into_result()?;
        summary.inserted += written.written;
        summary.already_stored += written.skipped;
        debug!(
            "Stored page {} for {}: {} new, {} already stored",
            summary.pages, wallet.address, written.written, written.skipped
        );
        Ok(())
    }

    async fn backfill_creation_date(&self, wallet: &Wallet) -> Result<()> {
        if let Some(earliest) = self.store.earliest_transaction_date(wallet.id).await? {
            self.store.set_creation_date(wallet.id, earliest).await?;
            debug!("Creation date of {} set to {}", wallet.address, earliest);
        }
        Ok(())
    }
}
