use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use pnl_core::{Coin, MarketCap, PricePoint, Task, TokenHolding, TradeAction, Transaction, Wallet};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::store::{
    BulkWriteSummary, CoinStore, MarketCapStore, PriceHistoryStore, TaskLock, TokenHoldingStore,
    TransactionStore, WalletStore,
};
use crate::{PersistenceError, Result};

#[derive(Debug, Default)]
struct MemoryState {
    wallets: HashMap<Uuid, Wallet>,
    transactions: HashMap<String, Transaction>,
    holdings: HashMap<Uuid, Vec<TokenHolding>>,
    coins: BTreeMap<String, Coin>,
    market_caps: HashMap<(String, NaiveDate), MarketCap>,
    prices: BTreeMap<DateTime<Utc>, PricePoint>,
    tasks: HashMap<String, Task>,
}

/// In-process store with the same contracts as the Postgres schema.
///
/// Every operation runs under one mutex, so compare-and-set operations are
/// atomic the same way a single-row UPDATE is.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn sorted(mut transactions: Vec<Transaction>) -> Vec<Transaction> {
        transactions.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.signature.cmp(&b.signature)));
        transactions
    }
}

fn wallet_mut(state: &mut MemoryState, wallet_id: Uuid) -> Result<&mut Wallet> {
    state
        .wallets
        .get_mut(&wallet_id)
        .ok_or_else(|| PersistenceError::NotFound(format!("wallet {}", wallet_id)))
}

#[async_trait]
impl WalletStore for MemoryStore {
    async fn find_wallet_by_address(&self, address: &str) -> Result<Option<Wallet>> {
        let state = self.state.lock().await;
        Ok(state.wallets.values().find(|w| w.address == address).cloned())
    }

    async fn find_or_create_wallet(&self, address: &str) -> Result<Wallet> {
        let mut state = self.state.lock().await;
        if let Some(wallet) = state.wallets.values().find(|w| w.address == address) {
            return Ok(wallet.clone());
        }
        let wallet = Wallet::new(address);
        state.wallets.insert(wallet.id, wallet.clone());
        Ok(wallet)
    }

    async fn get_wallet(&self, wallet_id: Uuid) -> Result<Wallet> {
        let mut state = self.state.lock().await;
        wallet_mut(&mut state, wallet_id).map(|w| w.clone())
    }

    async fn list_wallets(&self) -> Result<Vec<Wallet>> {
        let state = self.state.lock().await;
        let mut wallets: Vec<Wallet> = state.wallets.values().cloned().collect();
        wallets.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(wallets)
    }

    async fn try_claim_import(
        &self,
        wallet_id: Uuid,
        owner: &str,
        lease: Duration,
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        let wallet = wallet_mut(&mut state, wallet_id)?;
        let now = Utc::now();
        let status = &mut wallet.import_status;

        let stale = status
            .import_started_at
            .map_or(true, |started| started + lease < now);
        if status.is_importing && !stale {
            return Ok(false);
        }

        status.is_importing = true;
        status.import_started_at = Some(now);
        status.import_owner = Some(owner.to_string());
        Ok(true)
    }

    async fn refresh_import_claim(&self, wallet_id: Uuid, owner: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        let status = &mut wallet_mut(&mut state, wallet_id)?.import_status;
        if !status.is_importing || status.import_owner.as_deref() != Some(owner) {
            return Ok(false);
        }
        status.import_started_at = Some(Utc::now());
        Ok(true)
    }

    async fn save_import_cursor(
        &self,
        wallet_id: Uuid,
        cursor: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let wallet = wallet_mut(&mut state, wallet_id)?;
        wallet.import_status.last_cursor = Some(cursor.to_string());
        wallet.import_status.last_updating_at = Some(at);
        Ok(())
    }

    async fn finish_import(&self, wallet_id: Uuid, owner: &str, done: bool) -> Result<bool> {
        let mut state = self.state.lock().await;
        let status = &mut wallet_mut(&mut state, wallet_id)?.import_status;
        if status.import_owner.as_deref() != Some(owner) {
            return Ok(false);
        }
        status.is_importing = false;
        status.import_started_at = None;
        status.import_owner = None;
        status.done |= done;
        Ok(true)
    }

    async fn set_creation_date(&self, wallet_id: Uuid, date: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock().await;
        wallet_mut(&mut state, wallet_id)?.creation_date = Some(date);
        Ok(())
    }

    async fn set_balance(&self, wallet_id: Uuid, balance: Decimal) -> Result<()> {
        let mut state = self.state.lock().await;
        wallet_mut(&mut state, wallet_id)?.balance = balance;
        Ok(())
    }
}

#[async_trait]
impl TransactionStore for MemoryStore {
    async fn insert_transactions(&self, transactions: &[Transaction]) -> Result<BulkWriteSummary> {
        let mut state = self.state.lock().await;
        let mut summary = BulkWriteSummary::default();
        for tx in transactions {
            if state.transactions.contains_key(&tx.signature) {
                summary.record(Ok(0));
            } else {
                state.transactions.insert(tx.signature.clone(), tx.clone());
                summary.record(Ok(1));
            }
        }
        Ok(summary)
    }

    async fn transactions_for_wallet(&self, wallet_id: Uuid) -> Result<Vec<Transaction>> {
        let state = self.state.lock().await;
        Ok(Self::sorted(
            state
                .transactions
                .values()
                .filter(|tx| tx.wallet_id == wallet_id)
                .cloned()
                .collect(),
        ))
    }

    async fn transactions_for_token(
        &self,
        wallet_id: Uuid,
        mint: &str,
    ) -> Result<Vec<Transaction>> {
        let state = self.state.lock().await;
        Ok(Self::sorted(
            state
                .transactions
                .values()
                .filter(|tx| tx.wallet_id == wallet_id && tx.tradable_token_mint == mint)
                .cloned()
                .collect(),
        ))
    }

    async fn transactions_without_market_cap(&self) -> Result<Vec<Transaction>> {
        let state = self.state.lock().await;
        Ok(Self::sorted(
            state
                .transactions
                .values()
                .filter(|tx| tx.market_cap.is_none())
                .cloned()
                .collect(),
        ))
    }

    async fn set_market_caps(&self, updates: &[(Uuid, Decimal)]) -> Result<BulkWriteSummary> {
        let mut state = self.state.lock().await;
        let mut summary = BulkWriteSummary::default();
        for (id, market_cap) in updates {
            match state.transactions.values_mut().find(|tx| tx.id == *id) {
                Some(tx) => {
                    tx.market_cap = Some(*market_cap);
                    summary.record(Ok(1));
                }
                None => summary.record(Ok(0)),
            }
        }
        Ok(summary)
    }

    async fn sells_without_pnl(&self) -> Result<Vec<Transaction>> {
        let state = self.state.lock().await;
        Ok(Self::sorted(
            state
                .transactions
                .values()
                .filter(|tx| tx.action == TradeAction::Sell && tx.pnl.is_none())
                .cloned()
                .collect(),
        ))
    }

    async fn set_realized_pnl(
        &self,
        transaction_id: Uuid,
        pnl: Decimal,
        roi: Option<Decimal>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let tx = state
            .transactions
            .values_mut()
            .find(|tx| tx.id == transaction_id)
            .ok_or_else(|| PersistenceError::NotFound(format!("transaction {}", transaction_id)))?;
        tx.pnl = Some(pnl);
        tx.roi = roi;
        Ok(())
    }

    async fn earliest_transaction_date(&self, wallet_id: Uuid) -> Result<Option<DateTime<Utc>>> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .values()
            .filter(|tx| tx.wallet_id == wallet_id)
            .map(|tx| tx.date)
            .min())
    }
}

#[async_trait]
impl TokenHoldingStore for MemoryStore {
    async fn replace_holdings(&self, wallet_id: Uuid, holdings: &[TokenHolding]) -> Result<()> {
        let mut state = self.state.lock().await;
        state.holdings.insert(wallet_id, holdings.to_vec());
        Ok(())
    }

    async fn holdings_for_wallet(&self, wallet_id: Uuid) -> Result<Vec<TokenHolding>> {
        let state = self.state.lock().await;
        Ok(state.holdings.get(&wallet_id).cloned().unwrap_or_default())
    }

    async fn holdings_by_mints(&self, mints: &[String]) -> Result<Vec<TokenHolding>> {
        let state = self.state.lock().await;
        let mut by_mint: BTreeMap<&str, &TokenHolding> = BTreeMap::new();
        for holding in state.holdings.values().flatten() {
            if mints.contains(&holding.mint_address) {
                by_mint.entry(holding.mint_address.as_str()).or_insert(holding);
            }
        }
        Ok(by_mint.into_values().cloned().collect())
    }
}

#[async_trait]
impl CoinStore for MemoryStore {
    async fn upsert_coins(&self, coins: &[Coin]) -> Result<BulkWriteSummary> {
        let mut state = self.state.lock().await;
        let mut summary = BulkWriteSummary::default();
        for coin in coins {
            state.coins.insert(coin.id.clone(), coin.clone());
            summary.record(Ok(1));
        }
        Ok(summary)
    }

    async fn coins_by_symbols(&self, symbols: &[String]) -> Result<Vec<Coin>> {
        let state = self.state.lock().await;
        Ok(state
            .coins
            .values()
            .filter(|coin| symbols.contains(&coin.symbol))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl MarketCapStore for MemoryStore {
    async fn market_caps(&self, coin_id: &str, dates: &[NaiveDate]) -> Result<Vec<MarketCap>> {
        let state = self.state.lock().await;
        Ok(dates
            .iter()
            .filter_map(|date| state.market_caps.get(&(coin_id.to_string(), *date)))
            .cloned()
            .collect())
    }

    async fn insert_market_caps(&self, market_caps: &[MarketCap]) -> Result<BulkWriteSummary> {
        let mut state = self.state.lock().await;
        let mut summary = BulkWriteSummary::default();
        for cap in market_caps {
            let key = (cap.coin_id.clone(), cap.date);
            if state.market_caps.contains_key(&key) {
                summary.record(Ok(0));
            } else {
                state.market_caps.insert(key, cap.clone());
                summary.record(Ok(1));
            }
        }
        Ok(summary)
    }
}

#[async_trait]
impl PriceHistoryStore for MemoryStore {
    async fn price_at_or_before(&self, at: DateTime<Utc>) -> Result<Option<PricePoint>> {
        let state = self.state.lock().await;
        Ok(state.prices.range(..=at).next_back().map(|(_, p)| p.clone()))
    }

    async fn latest_price(&self) -> Result<Option<PricePoint>> {
        let state = self.state.lock().await;
        Ok(state.prices.values().next_back().cloned())
    }

    async fn insert_prices(&self, points: &[PricePoint]) -> Result<BulkWriteSummary> {
        let mut state = self.state.lock().await;
        let mut summary = BulkWriteSummary::default();
        for point in points {
            if state.prices.contains_key(&point.date) {
                summary.record(Ok(0));
            } else {
                state.prices.insert(point.date, point.clone());
                summary.record(Ok(1));
            }
        }
        Ok(summary)
    }
}

#[async_trait]
impl TaskLock for MemoryStore {
    async fn find_or_create_task(&self, name: &str) -> Result<Task> {
        let mut state = self.state.lock().await;
        Ok(state
            .tasks
            .entry(name.to_string())
            .or_insert_with(|| Task::unlocked(name))
            .clone())
    }

    async fn try_acquire(&self, name: &str, owner: &str, lease: Duration) -> Result<bool> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let task = state
            .tasks
            .entry(name.to_string())
            .or_insert_with(|| Task::unlocked(name));

        if task.is_held(now) {
            return Ok(false);
        }

        task.locked = true;
        task.locked_at = Some(now);
        task.locked_by = Some(owner.to_string());
        task.lease_expires_at = Some(now + lease);
        Ok(true)
    }

    async fn renew(&self, name: &str, owner: &str, lease: Duration) -> Result<bool> {
        let mut state = self.state.lock().await;
        match state.tasks.get_mut(name) {
            Some(task) if task.locked && task.locked_by.as_deref() == Some(owner) => {
                task.lease_expires_at = Some(Utc::now() + lease);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, name: &str, owner: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        match state.tasks.get_mut(name) {
            Some(task) if task.locked && task.locked_by.as_deref() == Some(owner) => {
                task.locked = false;
                task.locked_at = None;
                task.locked_by = None;
                task.lease_expires_at = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pnl_core::TradeLeg;
    use rust_decimal_macros::dec;

    fn tx(wallet_id: Uuid, signature: &str, day: u32) -> Transaction {
        Transaction {
            id: Uuid::new_v4(),
            signature: signature.to_string(),
            wallet_id,
            date: Utc.with_ymd_and_hms(2024, 1, day, 12, 0, 0).unwrap(),
            fee_lamports: 5000,
            fee_payer: "payer".to_string(),
            description: String::new(),
            tx_type: "SWAP".to_string(),
            source: "JUPITER".to_string(),
            from: TradeLeg::priced("SOL", dec!(1), dec!(100)),
            to: TradeLeg::priced("T", dec!(100), dec!(1)),
            action: TradeAction::Buy,
            tradable_token_mint: "T".to_string(),
            market_cap: None,
            pnl: None,
            roi: None,
        }
    }

    #[tokio::test]
    async fn test_insert_is_idempotent_by_signature() {
        let store = MemoryStore::new();
        let wallet = store.find_or_create_wallet("addr").await.unwrap();
        let batch = vec![tx(wallet.id, "a", 1), tx(wallet.id, "b", 2)];

        let first = store.insert_transactions(&batch).await.unwrap();
        let second = store.insert_transactions(&batch).await.unwrap();

        assert_eq!(first.written, 2);
        assert_eq!(second.written, 0);
        assert_eq!(second.skipped, 2);
        assert_eq!(store.transactions_for_wallet(wallet.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_find_or_create_wallet_returns_same_row() {
        let store = MemoryStore::new();
        let a = store.find_or_create_wallet("addr").await.unwrap();
        let b = store.find_or_create_wallet("addr").await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(store.list_wallets().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_import_claim_is_exclusive_until_released() {
        let store = MemoryStore::new();
        let wallet = store.find_or_create_wallet("addr").await.unwrap();
        let lease = Duration::minutes(10);

        assert!(store.try_claim_import(wallet.id, "a", lease).await.unwrap());
        assert!(!store.try_claim_import(wallet.id, "b", lease).await.unwrap());

        assert!(store.finish_import(wallet.id, "a", false).await.unwrap());
        assert!(store.try_claim_import(wallet.id, "b", lease).await.unwrap());
    }

    #[tokio::test]
    async fn test_stale_import_claim_can_be_taken_over() {
        let store = MemoryStore::new();
        let wallet = store.find_or_create_wallet("addr").await.unwrap();

        assert!(store.try_claim_import(wallet.id, "a", Duration::minutes(10)).await.unwrap());
        // a zero lease treats the existing claim as abandoned
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert!(store.try_claim_import(wallet.id, "b", Duration::zero()).await.unwrap());
    }

    #[tokio::test]
    async fn test_superseded_claim_cannot_touch_new_owner() {
        let store = MemoryStore::new();
        let wallet = store.find_or_create_wallet("addr").await.unwrap();

        assert!(store.try_claim_import(wallet.id, "a", Duration::minutes(10)).await.unwrap());
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert!(store.try_claim_import(wallet.id, "b", Duration::zero()).await.unwrap());

        assert!(!store.refresh_import_claim(wallet.id, "a").await.unwrap());
        assert!(!store.finish_import(wallet.id, "a", true).await.unwrap());

        let status = store.get_wallet(wallet.id).await.unwrap().import_status;
        assert!(status.is_importing);
        assert!(!status.done);
        assert_eq!(status.import_owner.as_deref(), Some("b"));

        assert!(store.refresh_import_claim(wallet.id, "b").await.unwrap());
        assert!(store.finish_import(wallet.id, "b", true).await.unwrap());
        assert!(store.get_wallet(wallet.id).await.unwrap().import_status.done);
    }

    #[tokio::test]
    async fn test_task_lock_cas_and_owner_release() {
        let store = MemoryStore::new();
        let lease = Duration::minutes(10);

        assert!(!store.find_or_create_task("job").await.unwrap().locked);
        assert!(store.try_acquire("job", "w1", lease).await.unwrap());
        assert!(!store.try_acquire("job", "w2", lease).await.unwrap());
        assert!(!store.release("job", "w2").await.unwrap());
        assert!(store.renew("job", "w1", lease).await.unwrap());
        assert!(store.release("job", "w1").await.unwrap());
        assert!(store.try_acquire("job", "w2", lease).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_task_lock_is_taken_over() {
        let store = MemoryStore::new();
        assert!(store.try_acquire("job", "w1", Duration::zero()).await.unwrap());
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert!(store.try_acquire("job", "w2", Duration::minutes(1)).await.unwrap());
        assert!(!store.renew("job", "w1", Duration::minutes(1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_price_lookup_takes_latest_at_or_before() {
        let store = MemoryStore::new();
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        store
            .insert_prices(&[
                PricePoint { date: t0, price: dec!(100) },
                PricePoint { date: t0 + Duration::minutes(1), price: dec!(101) },
            ])
            .await
            .unwrap();

        let hit = store
            .price_at_or_before(t0 + Duration::seconds(90))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.price, dec!(101));
        assert!(store
            .price_at_or_before(t0 - Duration::seconds(1))
            .await
            .unwrap()
            .is_none());
    }
}
