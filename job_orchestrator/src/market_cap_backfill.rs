use crate::Result;
use chrono::NaiveDate;
use dex_client::{AssetMetadata, MarketDataProvider, TokenMetadataService, TransactionIndexer};
use persistence_layer::Storage;
use pnl_core::{Coin, MarketCap};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BackfillSummary {
    pub transactions: usize,
    pub mints: usize,
    pub resolved_mints: usize,
    /// Mints whose symbol matched several coins and no name settled it
    pub ambiguous_mints: usize,
    pub cache_hits: usize,
    pub provider_calls: usize,
    pub inserted_market_caps: usize,
    pub updated_transactions: usize,
}

/// Transaction ids grouped by tradable mint, then by trade day
type MintDays = BTreeMap<String, BTreeMap<NaiveDate, Vec<Uuid>>>;

/// Fills `market_cap` on stored trades from the provider's daily history,
/// caching every (coin, day) figure it fetches.
pub struct MarketCapBackfill {
    store: Arc<dyn Storage>,
    metadata: TokenMetadataService,
    market_data: Arc<dyn MarketDataProvider>,
}

impl MarketCapBackfill {
    pub fn new(
        store: Arc<dyn Storage>,
        indexer: Arc<dyn TransactionIndexer>,
        market_data: Arc<dyn MarketDataProvider>,
    ) -> Self {
        Self {
            store,
            metadata: TokenMetadataService::new(indexer),
            market_data,
        }
    }

    pub async fn run(&self) -> Result<BackfillSummary> {
        let mut summary = BackfillSummary::default();

        let transactions = self.store.transactions_without_market_cap().await?;
        if transactions.is_empty() {
            debug!("No transactions without market cap");
            return Ok(summary);
        }
        summary.transactions = transactions.len();

        let mut by_mint: MintDays = BTreeMap::new();
        for tx in &transactions {
            by_mint
                .entry(tx.tradable_token_mint.clone())
                .or_default()
                .entry(tx.day())
                .or_default()
                .push(tx.id);
        }
        summary.mints = by_mint.len();

        let mints: Vec<String> = by_mint.keys().cloned().collect();
        let metadata = self.resolve_metadata(&mints).await?;
        let coin_ids = self.resolve_coins(&metadata, &mut summary).await?;
        summary.resolved_mints = coin_ids.len();

        let mut updates: Vec<(Uuid, Decimal)> = Vec::new();
        for (mint, coin_id) in &coin_ids {
            let Some(days) = by_mint.get(mint) else {
                continue;
            };
            let dates: Vec<NaiveDate> = days.keys().copied().collect();
            let values = self.market_caps_for(coin_id, &dates, &mut summary).await?;

            for (date, ids) in days {
                if let Some(value) = values.get(date) {
                    updates.extend(ids.iter().map(|id| (*id, *value)));
                }
            }
        }

        if !updates.is_empty() {
            let written = self.store.set_market_caps(&updates).await?.into_result()?;
            summary.updated_transactions = written.written;
        }

        info!(
            "Market cap backfill: {} of {} transactions updated, {} of {} mints resolved",
            summary.updated_transactions, summary.transactions, summary.resolved_mints, summary.mints
        );
        Ok(summary)
    }

    /// Symbol and name per mint, from stored holdings first and the indexer after
    async fn resolve_metadata(&self, mints: &[String]) -> Result<HashMap<String, AssetMetadata>> {
        let holdings = self.store.holdings_by_mints(mints).await?;
        self.metadata.prime(holdings.into_iter().map(|h| AssetMetadata {
            mint: h.mint_address,
            symbol: h.symbol,
            name: h.name,
        }));

        let found = self.metadata.get_metadata_batch(mints).await?;
        for mint in mints.iter().filter(|m| !found.contains_key(*m)) {
            warn!("No metadata for mint {}, market cap cannot be resolved", mint);
        }
        Ok(found)
    }

    /// Map mints to coin ids by symbol; a symbol shared by several coins is
    /// settled by exact name, otherwise the mint is left out.
    async fn resolve_coins(
        &self,
        metadata: &HashMap<String, AssetMetadata>,
        summary: &mut BackfillSummary,
    ) -> Result<BTreeMap<String, String>> {
        let mut symbols: Vec<String> = metadata
            .values()
            .map(|m| m.symbol.to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        symbols.sort();
        symbols.dedup();

        let coins = self.store.coins_by_symbols(&symbols).await?;
        let mut by_symbol: HashMap<&str, Vec<&Coin>> = HashMap::new();
        for coin in &coins {
            by_symbol.entry(coin.symbol.as_str()).or_default().push(coin);
        }

        let mut resolved = BTreeMap::new();
        for (mint, meta) in metadata {
            let symbol = meta.symbol.to_lowercase();
            let Some(candidates) = by_symbol.get(symbol.as_str()) else {
                debug!("No coin listed for symbol '{}' ({})", symbol, mint);
                continue;
            };

            match pick_coin(candidates, &meta.name) {
                Some(coin) => {
                    resolved.insert(mint.clone(), coin.id.clone());
                }
                None => {
                    summary.ambiguous_mints += 1;
                    warn!(
                        "Symbol '{}' of {} matches {} coins and none is named '{}', skipping",
                        symbol,
                        mint,
                        candidates.len(),
                        meta.name
                    );
                }
            }
        }
        Ok(resolved)
    }

    /// Cached figures for `dates`, fetching and storing the missing ones
    async fn market_caps_for(
        &self,
        coin_id: &str,
        dates: &[NaiveDate],
        summary: &mut BackfillSummary,
    ) -> Result<HashMap<NaiveDate, Decimal>> {
        let mut values: HashMap<NaiveDate, Decimal> = self
            .store
            .market_caps(coin_id, dates)
            .await?
            .into_iter()
            .map(|m| (m.date, m.market_cap))
            .collect();
        summary.cache_hits += values.len();

        let missing: Vec<NaiveDate> = dates
            .iter()
            .filter(|d| !values.contains_key(*d))
            .copied()
            .collect();
        for date in missing {
            summary.provider_calls += 1;
            let Some(market_cap) = self.market_data.market_cap_on(coin_id, date).await? else {
                continue;
            };

            // Stored right away so a later failure keeps what was fetched
            let row = MarketCap {
                coin_id: coin_id.to_string(),
                date,
                market_cap,
            };
            let written = self.store.insert_market_caps(&[row]).await?.into_result()?;
            summary.inserted_market_caps += written.written;
            values.insert(date, market_cap);
        }

        Ok(values)
    }
}

/// The only candidate, or the single one whose name matches case-insensitively
fn pick_coin<'a>(candidates: &[&'a Coin], name: &str) -> Option<&'a Coin> {
    if let [only] = candidates {
        return Some(*only);
    }
    let name = name.to_lowercase();
    let mut named = candidates.iter().filter(|c| c.name.to_lowercase() == name);
    match (named.next(), named.next()) {
        (Some(coin), None) => Some(*coin),
        _ => None,
    }
}
