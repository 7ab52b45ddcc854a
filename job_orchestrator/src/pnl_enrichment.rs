use crate::Result;
use persistence_layer::Storage;
use pnl_core::{CostBasisLedger, TradeAction};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PnlSummary {
    pub pending_sales: usize,
    pub positions: usize,
    /// Positions left for a later run because their wallet is still importing
    pub deferred_positions: usize,
    pub updated: usize,
}

/// Writes realized pnl/roi onto sell transactions by replaying each
/// (wallet, token) cost basis up to the sale.
///
/// A wallet's history arrives newest first, so a sale can be stored before
/// the buys it closes. Positions are only settled once the wallet's import
/// is done and no pass holds it; every sell of a settled position is
/// rewritten when its stored figures differ from the replay.
pub struct PnlEnrichment {
    store: Arc<dyn Storage>,
}

impl PnlEnrichment {
    pub fn new(store: Arc<dyn Storage>) -> Self {
        Self { store }
    }

    pub async fn run(&self) -> Result<PnlSummary> {
        let pending = self.store.sells_without_pnl().await?;
        let mut summary = PnlSummary {
            pending_sales: pending.len(),
            ..PnlSummary::default()
        };
        if pending.is_empty() {
            return Ok(summary);
        }

        let positions: BTreeSet<(Uuid, String)> = pending
            .iter()
            .map(|sale| (sale.wallet_id, sale.tradable_token_mint.clone()))
            .collect();
        summary.positions = positions.len();

        let mut settled: HashMap<Uuid, bool> = HashMap::new();
        for (wallet_id, mint) in &positions {
            if !self.history_complete(*wallet_id, &mut settled).await? {
                summary.deferred_positions += 1;
                continue;
            }

            let history = self.store.transactions_for_token(*wallet_id, mint).await?;
            let (_, entries) = CostBasisLedger::replay(&history);

            for entry in entries {
                let Some(sale) = entry.sale else {
                    continue;
                };
                let Some(tx) = history
                    .iter()
                    .find(|tx| tx.action == TradeAction::Sell && tx.signature == entry.signature)
                else {
                    continue;
                };
                if tx.pnl == Some(sale.realized_pnl) && tx.roi == sale.realized_roi {
                    continue;
                }

                self.store
                    .set_realized_pnl(tx.id, sale.realized_pnl, sale.realized_roi)
                    .await?;
                summary.updated += 1;
            }
            debug!("Realized pnl written for {} in wallet {}", mint, wallet_id);
        }

        if summary.deferred_positions > 0 {
            debug!(
                "{} positions deferred until their wallet import completes",
                summary.deferred_positions
            );
        }
        info!(
            "Realized pnl: {} sales updated, {} pending across {} positions",
            summary.updated, summary.pending_sales, summary.positions
        );
        Ok(summary)
    }

    /// Import walked back to the horizon and no pass is adding history
    async fn history_complete(&self, wallet_id: Uuid, settled: &mut HashMap<Uuid, bool>) -> Result<bool> {
        if let Some(complete) = settled.get(&wallet_id) {
            return Ok(*complete);
        }
        let status = self.store.get_wallet(wallet_id).await?.import_status;
        let complete = status.done && !status.is_importing;
        settled.insert(wallet_id, complete);
        Ok(complete)
    }
}
