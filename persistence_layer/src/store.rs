use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use pnl_core::{Coin, MarketCap, PricePoint, Task, TokenHolding, Transaction, Wallet};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{PersistenceError, Result};

/// Outcome of an unordered bulk write. Every row is attempted; failures are
/// collected instead of aborting the batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkWriteSummary {
    pub attempted: usize,
    /// Rows written (inserted or updated)
    pub written: usize,
    /// Rows left alone because they already existed or matched nothing
    pub skipped: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

impl BulkWriteSummary {
    pub fn record(&mut self, outcome: std::result::Result<u64, String>) {
        self.attempted += 1;
        match outcome {
            Ok(0) => self.skipped += 1,
            Ok(_) => self.written += 1,
            Err(e) => {
                self.failed += 1;
                self.errors.push(e);
            }
        }
    }

    pub fn describe(&self) -> String {
        format!(
            "{} of {} rows failed (first error: {})",
            self.failed,
            self.attempted,
            self.errors.first().map(String::as_str).unwrap_or("none")
        )
    }

    /// Turn a summary with failures into an error after all rows were tried
    pub fn into_result(self) -> Result<Self> {
        if self.failed > 0 {
            Err(PersistenceError::BulkWrite(self))
        } else {
            Ok(self)
        }
    }
}

#[async_trait]
pub trait WalletStore: Send + Sync {
    async fn find_wallet_by_address(&self, address: &str) -> Result<Option<Wallet>>;

    /// Returns the existing wallet for `address` or creates an empty one
    async fn find_or_create_wallet(&self, address: &str) -> Result<Wallet>;

    async fn get_wallet(&self, wallet_id: Uuid) -> Result<Wallet>;

    async fn list_wallets(&self) -> Result<Vec<Wallet>>;

    /// Atomically claim the wallet for `owner` if the claim is clear or older than `lease`
    async fn try_claim_import(&self, wallet_id: Uuid, owner: &str, lease: Duration)
        -> Result<bool>;

    /// Push the claim timestamp forward; false when `owner` no longer holds the claim
    async fn refresh_import_claim(&self, wallet_id: Uuid, owner: &str) -> Result<bool>;

    async fn save_import_cursor(
        &self,
        wallet_id: Uuid,
        cursor: &str,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Clear the claim held by `owner`; `done` is only ever raised, never lowered.
    /// False (and nothing changed) when the claim belongs to another pass.
    async fn finish_import(&self, wallet_id: Uuid, owner: &str, done: bool) -> Result<bool>;

    async fn set_creation_date(&self, wallet_id: Uuid, date: DateTime<Utc>) -> Result<()>;

    async fn set_balance(&self, wallet_id: Uuid, balance: Decimal) -> Result<()>;
}

#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Insert-if-absent keyed by signature
    async fn insert_transactions(&self, transactions: &[Transaction]) -> Result<BulkWriteSummary>;

    /// All trades of a wallet, oldest first
    async fn transactions_for_wallet(&self, wallet_id: Uuid) -> Result<Vec<Transaction>>;

    async fn transactions_for_token(&self, wallet_id: Uuid, mint: &str)
        -> Result<Vec<Transaction>>;

    async fn transactions_without_market_cap(&self) -> Result<Vec<Transaction>>;

    /// Set `market_cap` per transaction id
    async fn set_market_caps(&self, updates: &[(Uuid, Decimal)]) -> Result<BulkWriteSummary>;

    async fn sells_without_pnl(&self) -> Result<Vec<Transaction>>;

    async fn set_realized_pnl(
        &self,
        transaction_id: Uuid,
        pnl: Decimal,
        roi: Option<Decimal>,
    ) -> Result<()>;

    async fn earliest_transaction_date(&self, wallet_id: Uuid) -> Result<Option<DateTime<Utc>>>;
}

#[async_trait]
pub trait TokenHoldingStore: Send + Sync {
    /// Replace the wallet's snapshot with `holdings`
    async fn replace_holdings(&self, wallet_id: Uuid, holdings: &[TokenHolding]) -> Result<()>;

    async fn holdings_for_wallet(&self, wallet_id: Uuid) -> Result<Vec<TokenHolding>>;

    /// One holding per mint (any wallet), for symbol/name lookup
    async fn holdings_by_mints(&self, mints: &[String]) -> Result<Vec<TokenHolding>>;
}

#[async_trait]
pub trait CoinStore: Send + Sync {
    /// Upsert by coin id
    async fn upsert_coins(&self, coins: &[Coin]) -> Result<BulkWriteSummary>;

    /// Coins whose (lowercased) symbol is in `symbols`
    async fn coins_by_symbols(&self, symbols: &[String]) -> Result<Vec<Coin>>;
}

#[async_trait]
pub trait MarketCapStore: Send + Sync {
    async fn market_caps(&self, coin_id: &str, dates: &[NaiveDate]) -> Result<Vec<MarketCap>>;

    /// Insert-if-absent on (coin_id, date)
    async fn insert_market_caps(&self, market_caps: &[MarketCap]) -> Result<BulkWriteSummary>;
}

#[async_trait]
pub trait PriceHistoryStore: Send + Sync {
    /// Latest point at or before `at`
    async fn price_at_or_before(&self, at: DateTime<Utc>) -> Result<Option<PricePoint>>;

    async fn latest_price(&self) -> Result<Option<PricePoint>>;

    /// Insert-if-absent on date
    async fn insert_prices(&self, points: &[PricePoint]) -> Result<BulkWriteSummary>;
}

/// Per-name advisory lock with a lease and an owner token.
#[async_trait]
pub trait TaskLock: Send + Sync {
    async fn find_or_create_task(&self, name: &str) -> Result<Task>;

    /// Compare-and-set: succeeds when unlocked or when the previous lease expired
    async fn try_acquire(&self, name: &str, owner: &str, lease: Duration) -> Result<bool>;

    /// Extend the lease; false when `owner` no longer holds the lock
    async fn renew(&self, name: &str, owner: &str, lease: Duration) -> Result<bool>;

    /// Release if held by `owner`; false when it was not
    async fn release(&self, name: &str, owner: &str) -> Result<bool>;
}

/// Everything the jobs need from storage
pub trait Storage:
    WalletStore
    + TransactionStore
    + TokenHoldingStore
    + CoinStore
    + MarketCapStore
    + PriceHistoryStore
    + TaskLock
{
}

impl<T> Storage for T where
    T: WalletStore
        + TransactionStore
        + TokenHoldingStore
        + CoinStore
        + MarketCapStore
        + PriceHistoryStore
        + TaskLock
{
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_counts_and_result() {
        let mut summary = BulkWriteSummary::default();
        summary.record(Ok(1));
        summary.record(Ok(0));
        summary.record(Err("duplicate key".to_string()));
        summary.record(Ok(1));

        assert_eq!(summary.attempted, 4);
        assert_eq!(summary.written, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed, 1);

        match summary.into_result() {
            Err(PersistenceError::BulkWrite(s)) => assert!(s.describe().contains("duplicate key")),
            other => panic!("expected bulk write error, got {:?}", other),
        }
    }
}
