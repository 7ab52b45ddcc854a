use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use futures::future::join_all;
use pnl_core::{
    Coin, ImportStatus, MarketCap, PricePoint, Task, TokenHolding, TradeAction, TradeLeg,
    Transaction, Wallet,
};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgQueryResult, PgRow};
use sqlx::{PgPool, Row};
use std::future::Future;
use tracing::{debug, info};
use uuid::Uuid;

use crate::store::{
    BulkWriteSummary, CoinStore, MarketCapStore, PriceHistoryStore, TaskLock, TokenHoldingStore,
    TransactionStore, WalletStore,
};
use crate::{PersistenceError, Result};

/// Rows written concurrently per round trip batch
const BULK_CHUNK_SIZE: usize = 200;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS wallets (
        id UUID PRIMARY KEY,
        address TEXT NOT NULL UNIQUE,
        creation_date TIMESTAMPTZ,
        balance NUMERIC NOT NULL DEFAULT 0,
        last_cursor TEXT,
        last_updating_at TIMESTAMPTZ,
        import_done BOOLEAN NOT NULL DEFAULT FALSE,
        is_importing BOOLEAN NOT NULL DEFAULT FALSE,
        import_started_at TIMESTAMPTZ,
        import_owner TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "ALTER TABLE wallets ADD COLUMN IF NOT EXISTS import_owner TEXT",
    r#"
    CREATE TABLE IF NOT EXISTS transactions (
        id UUID PRIMARY KEY,
        signature TEXT NOT NULL UNIQUE,
        wallet_id UUID NOT NULL REFERENCES wallets(id),
        date TIMESTAMPTZ NOT NULL,
        fee_lamports BIGINT NOT NULL DEFAULT 0,
        fee_payer TEXT NOT NULL DEFAULT '',
        description TEXT NOT NULL DEFAULT '',
        tx_type TEXT NOT NULL,
        source TEXT NOT NULL DEFAULT '',
        from_mint TEXT NOT NULL,
        from_amount NUMERIC NOT NULL,
        from_price NUMERIC NOT NULL,
        from_price_amount NUMERIC NOT NULL,
        to_mint TEXT NOT NULL,
        to_amount NUMERIC NOT NULL,
        to_price NUMERIC NOT NULL,
        to_price_amount NUMERIC NOT NULL,
        action TEXT NOT NULL,
        tradable_token_mint TEXT NOT NULL,
        market_cap NUMERIC,
        pnl NUMERIC,
        roi NUMERIC
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_transactions_wallet_date ON transactions(wallet_id, date)",
    "CREATE INDEX IF NOT EXISTS idx_transactions_missing_market_cap ON transactions(tradable_token_mint) WHERE market_cap IS NULL",
    r#"
    CREATE TABLE IF NOT EXISTS token_holdings (
        wallet_id UUID NOT NULL REFERENCES wallets(id),
        mint_address TEXT NOT NULL,
        symbol TEXT NOT NULL DEFAULT '',
        name TEXT NOT NULL DEFAULT '',
        icon TEXT,
        balance NUMERIC NOT NULL,
        supply NUMERIC,
        price_per_token NUMERIC NOT NULL DEFAULT 0,
        total_price NUMERIC NOT NULL DEFAULT 0,
        updated_at TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (wallet_id, mint_address)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_token_holdings_mint ON token_holdings(mint_address)",
    r#"
    CREATE TABLE IF NOT EXISTS tasks (
        name TEXT PRIMARY KEY,
        locked BOOLEAN NOT NULL DEFAULT FALSE,
        locked_at TIMESTAMPTZ,
        locked_by TEXT,
        lease_expires_at TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS coins (
        id TEXT PRIMARY KEY,
        symbol TEXT NOT NULL,
        name TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_coins_symbol ON coins(symbol)",
    r#"
    CREATE TABLE IF NOT EXISTS market_caps (
        coin_id TEXT NOT NULL,
        date DATE NOT NULL,
        market_cap NUMERIC NOT NULL,
        PRIMARY KEY (coin_id, date)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS price_history (
        date TIMESTAMPTZ PRIMARY KEY,
        price NUMERIC NOT NULL
    )
    "#,
];

const TRANSACTION_COLUMNS: &str = r#"
    id, signature, wallet_id, date, fee_lamports, fee_payer, description, tx_type, source,
    from_mint, from_amount, from_price, from_price_amount,
    to_mint, to_amount, to_price, to_price_amount,
    action, tradable_token_mint, market_cap, pnl, roi
"#;

const WALLET_COLUMNS: &str = r#"
    id, address, creation_date, balance, last_cursor, last_updating_at,
    import_done, is_importing, import_started_at, import_owner, created_at
"#;

/// PostgreSQL storage for wallets, trades and reference data
#[derive(Debug, Clone)]
pub struct PostgresClient {
    pool: PgPool,
}

impl PostgresClient {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(1)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .idle_timeout(std::time::Duration::from_secs(600))
            .max_lifetime(std::time::Duration::from_secs(1800))
            .connect(database_url)
            .await
            .map_err(|e| {
                PersistenceError::PoolCreation(format!("PostgreSQL connection error: {}", e))
            })?;

        info!(
            "PostgreSQL pool initialized: max_connections={}",
            max_connections
        );
        Ok(Self { pool })
    }

    /// Create tables and indexes if they don't exist
    pub async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("Database schema ready ({} statements)", SCHEMA.len());
        Ok(())
    }
}

/// Run one statement per item, CHUNK at a time, without stopping at failures.
async fn unordered<'a, T, F, Fut>(items: &'a [T], op: F) -> BulkWriteSummary
where
    F: Fn(&'a T) -> Fut,
    Fut: Future<Output = std::result::Result<PgQueryResult, sqlx::Error>>,
{
    let mut summary = BulkWriteSummary::default();
    for chunk in items.chunks(BULK_CHUNK_SIZE) {
        for result in join_all(chunk.iter().map(&op)).await {
            summary.record(result.map(|r| r.rows_affected()).map_err(|e| e.to_string()));
        }
    }
    summary
}

fn wallet_from_row(row: &PgRow) -> Result<Wallet> {
    Ok(Wallet {
        id: row.try_get("id")?,
        address: row.try_get("address")?,
        creation_date: row.try_get("creation_date")?,
        balance: row.try_get("balance")?,
        import_status: ImportStatus {
            last_cursor: row.try_get("last_cursor")?,
            last_updating_at: row.try_get("last_updating_at")?,
            done: row.try_get("import_done")?,
            is_importing: row.try_get("is_importing")?,
            import_started_at: row.try_get("import_started_at")?,
            import_owner: row.try_get("import_owner")?,
        },
        created_at: row.try_get("created_at")?,
    })
}

fn transaction_from_row(row: &PgRow) -> Result<Transaction> {
    let action: String = row.try_get("action")?;
    Ok(Transaction {
        id: row.try_get("id")?,
        signature: row.try_get("signature")?,
        wallet_id: row.try_get("wallet_id")?,
        date: row.try_get("date")?,
        fee_lamports: row.try_get("fee_lamports")?,
        fee_payer: row.try_get("fee_payer")?,
        description: row.try_get("description")?,
        tx_type: row.try_get("tx_type")?,
        source: row.try_get("source")?,
        from: TradeLeg {
            mint: row.try_get("from_mint")?,
            amount: row.try_get("from_amount")?,
            price: row.try_get("from_price")?,
            price_amount: row.try_get("from_price_amount")?,
        },
        to: TradeLeg {
            mint: row.try_get("to_mint")?,
            amount: row.try_get("to_amount")?,
            price: row.try_get("to_price")?,
            price_amount: row.try_get("to_price_amount")?,
        },
        action: TradeAction::parse(&action),
        tradable_token_mint: row.try_get("tradable_token_mint")?,
        market_cap: row.try_get("market_cap")?,
        pnl: row.try_get("pnl")?,
        roi: row.try_get("roi")?,
    })
}

fn holding_from_row(row: &PgRow) -> Result<TokenHolding> {
    Ok(TokenHolding {
        wallet_id: row.try_get("wallet_id")?,
        mint_address: row.try_get("mint_address")?,
        symbol: row.try_get("symbol")?,
        name: row.try_get("name")?,
        icon: row.try_get("icon")?,
        balance: row.try_get("balance")?,
        supply: row.try_get("supply")?,
        price_per_token: row.try_get("price_per_token")?,
        total_price: row.try_get("total_price")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn task_from_row(row: &PgRow) -> Result<Task> {
    Ok(Task {
        name: row.try_get("name")?,
        locked: row.try_get("locked")?,
        locked_at: row.try_get("locked_at")?,
        locked_by: row.try_get("locked_by")?,
        lease_expires_at: row.try_get("lease_expires_at")?,
    })
}

fn require_one(result: PgQueryResult, what: impl FnOnce() -> String) -> Result<()> {
    if result.rows_affected() == 0 {
        return Err(PersistenceError::NotFound(what()));
    }
    Ok(())
}

// =====================================
// Wallets
// =====================================

#[async_trait]
impl WalletStore for PostgresClient {
    async fn find_wallet_by_address(&self, address: &str) -> Result<Option<Wallet>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM wallets WHERE address = $1",
            WALLET_COLUMNS
        ))
        .bind(address)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(wallet_from_row).transpose()
    }

    async fn find_or_create_wallet(&self, address: &str) -> Result<Wallet> {
        let fresh = Wallet::new(address);
        sqlx::query(
            "INSERT INTO wallets (id, address, balance, created_at) VALUES ($1, $2, $3, $4) ON CONFLICT (address) DO NOTHING",
        )
        .bind(fresh.id)
        .bind(&fresh.address)
        .bind(fresh.balance)
        .bind(fresh.created_at)
        .execute(&self.pool)
        .await?;

        self.find_wallet_by_address(address)
            .await?
            .ok_or_else(|| PersistenceError::NotFound(format!("wallet {}", address)))
    }

    async fn get_wallet(&self, wallet_id: Uuid) -> Result<Wallet> {
        let row = sqlx::query(&format!("SELECT {} FROM wallets WHERE id = $1", WALLET_COLUMNS))
            .bind(wallet_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => wallet_from_row(&row),
            None => Err(PersistenceError::NotFound(format!("wallet {}", wallet_id))),
        }
    }

    async fn list_wallets(&self) -> Result<Vec<Wallet>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM wallets ORDER BY created_at",
            WALLET_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(wallet_from_row).collect()
    }

    async fn try_claim_import(
        &self,
        wallet_id: Uuid,
        owner: &str,
        lease: Duration,
    ) -> Result<bool> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE wallets
            SET is_importing = TRUE, import_started_at = $2, import_owner = $4
            WHERE id = $1
              AND (is_importing = FALSE OR import_started_at IS NULL OR import_started_at < $3)
            "#,
        )
        .bind(wallet_id)
        .bind(now)
        .bind(now - lease)
        .bind(owner)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn refresh_import_claim(&self, wallet_id: Uuid, owner: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE wallets SET import_started_at = $3
            WHERE id = $1 AND is_importing = TRUE AND import_owner = $2
            "#,
        )
        .bind(wallet_id)
        .bind(owner)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn save_import_cursor(
        &self,
        wallet_id: Uuid,
        cursor: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE wallets SET last_cursor = $2, last_updating_at = $3 WHERE id = $1",
        )
        .bind(wallet_id)
        .bind(cursor)
        .bind(at)
        .execute(&self.pool)
        .await?;

        require_one(result, || format!("wallet {}", wallet_id))
    }

    async fn finish_import(&self, wallet_id: Uuid, owner: &str, done: bool) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE wallets
            SET is_importing = FALSE, import_started_at = NULL, import_owner = NULL,
                import_done = import_done OR $3
            WHERE id = $1 AND import_owner = $2
            "#,
        )
        .bind(wallet_id)
        .bind(owner)
        .bind(done)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_creation_date(&self, wallet_id: Uuid, date: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query("UPDATE wallets SET creation_date = $2 WHERE id = $1")
            .bind(wallet_id)
            .bind(date)
            .execute(&self.pool)
            .await?;

        require_one(result, || format!("wallet {}", wallet_id))
    }

    async fn set_balance(&self, wallet_id: Uuid, balance: Decimal) -> Result<()> {
        let result = sqlx::query("UPDATE wallets SET balance = $2 WHERE id = $1")
            .bind(wallet_id)
            .bind(balance)
            .execute(&self.pool)
            .await?;

        require_one(result, || format!("wallet {}", wallet_id))
    }
}

// =====================================
// Transactions
// =====================================

#[async_trait]
impl TransactionStore for PostgresClient {
    async fn insert_transactions(&self, transactions: &[Transaction]) -> Result<BulkWriteSummary> {
        let sql = format!(
            r#"
            INSERT INTO transactions ({})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                    $14, $15, $16, $17, $18, $19, $20, $21, $22)
            ON CONFLICT (signature) DO NOTHING
            "#,
            TRANSACTION_COLUMNS
        );

        let summary = unordered(transactions, |tx| {
            sqlx::query(&sql)
                .bind(tx.id)
                .bind(&tx.signature)
                .bind(tx.wallet_id)
                .bind(tx.date)
                .bind(tx.fee_lamports)
                .bind(&tx.fee_payer)
                .bind(&tx.description)
                .bind(&tx.tx_type)
                .bind(&tx.source)
                .bind(&tx.from.mint)
                .bind(tx.from.amount)
                .bind(tx.from.price)
                .bind(tx.from.price_amount)
                .bind(&tx.to.mint)
                .bind(tx.to.amount)
                .bind(tx.to.price)
                .bind(tx.to.price_amount)
                .bind(tx.action.as_str())
                .bind(&tx.tradable_token_mint)
                .bind(tx.market_cap)
                .bind(tx.pnl)
                .bind(tx.roi)
                .execute(&self.pool)
        })
        .await;

        debug!(
            "Inserted {} transactions ({} already present, {} failed)",
            summary.written, summary.skipped, summary.failed
        );
        summary.into_result()
    }

    async fn transactions_for_wallet(&self, wallet_id: Uuid) -> Result<Vec<Transaction>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM transactions WHERE wallet_id = $1 ORDER BY date, signature",
            TRANSACTION_COLUMNS
        ))
        .bind(wallet_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(transaction_from_row).collect()
    }

    async fn transactions_for_token(
        &self,
        wallet_id: Uuid,
        mint: &str,
    ) -> Result<Vec<Transaction>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM transactions WHERE wallet_id = $1 AND tradable_token_mint = $2 ORDER BY date, signature",
            TRANSACTION_COLUMNS
        ))
        .bind(wallet_id)
        .bind(mint)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(transaction_from_row).collect()
    }

    async fn transactions_without_market_cap(&self) -> Result<Vec<Transaction>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM transactions WHERE market_cap IS NULL ORDER BY date",
            TRANSACTION_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(transaction_from_row).collect()
    }

    async fn set_market_caps(&self, updates: &[(Uuid, Decimal)]) -> Result<BulkWriteSummary> {
        let summary = unordered(updates, |(id, market_cap)| {
            sqlx::query("UPDATE transactions SET market_cap = $2 WHERE id = $1")
                .bind(*id)
                .bind(*market_cap)
                .execute(&self.pool)
        })
        .await;

        summary.into_result()
    }

    async fn sells_without_pnl(&self) -> Result<Vec<Transaction>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM transactions WHERE action = 'sell' AND pnl IS NULL ORDER BY date",
            TRANSACTION_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(transaction_from_row).collect()
    }

    async fn set_realized_pnl(
        &self,
        transaction_id: Uuid,
        pnl: Decimal,
        roi: Option<Decimal>,
    ) -> Result<()> {
        let result = sqlx::query("UPDATE transactions SET pnl = $2, roi = $3 WHERE id = $1")
            .bind(transaction_id)
            .bind(pnl)
            .bind(roi)
            .execute(&self.pool)
            .await?;

        require_one(result, || format!("transaction {}", transaction_id))
    }

    async fn earliest_transaction_date(&self, wallet_id: Uuid) -> Result<Option<DateTime<Utc>>> {
        let row = sqlx::query("SELECT MIN(date) AS earliest FROM transactions WHERE wallet_id = $1")
            .bind(wallet_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(row.try_get("earliest")?)
    }
}

// =====================================
// Token holdings
// =====================================

#[async_trait]
impl TokenHoldingStore for PostgresClient {
    async fn replace_holdings(&self, wallet_id: Uuid, holdings: &[TokenHolding]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM token_holdings WHERE wallet_id = $1")
            .bind(wallet_id)
            .execute(&mut *tx)
            .await?;

        for holding in holdings {
            sqlx::query(
                r#"
                INSERT INTO token_holdings
                (wallet_id, mint_address, symbol, name, icon, balance, supply, price_per_token, total_price, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (wallet_id, mint_address) DO NOTHING
                "#,
            )
            .bind(wallet_id)
            .bind(&holding.mint_address)
            .bind(&holding.symbol)
            .bind(&holding.name)
            .bind(&holding.icon)
            .bind(holding.balance)
            .bind(holding.supply)
            .bind(holding.price_per_token)
            .bind(holding.total_price)
            .bind(holding.updated_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!("Replaced {} holdings for wallet {}", holdings.len(), wallet_id);
        Ok(())
    }

    async fn holdings_for_wallet(&self, wallet_id: Uuid) -> Result<Vec<TokenHolding>> {
        let rows = sqlx::query(
            "SELECT * FROM token_holdings WHERE wallet_id = $1 ORDER BY total_price DESC",
        )
        .bind(wallet_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(holding_from_row).collect()
    }

    async fn holdings_by_mints(&self, mints: &[String]) -> Result<Vec<TokenHolding>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT ON (mint_address) *
            FROM token_holdings
            WHERE mint_address = ANY($1)
            ORDER BY mint_address, updated_at DESC
            "#,
        )
        .bind(mints)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(holding_from_row).collect()
    }
}

// =====================================
// Coins and market caps
// =====================================

#[async_trait]
impl CoinStore for PostgresClient {
    async fn upsert_coins(&self, coins: &[Coin]) -> Result<BulkWriteSummary> {
        let summary = unordered(coins, |coin| {
            sqlx::query(
                r#"
                INSERT INTO coins (id, symbol, name) VALUES ($1, $2, $3)
                ON CONFLICT (id) DO UPDATE SET symbol = EXCLUDED.symbol, name = EXCLUDED.name
                "#,
            )
            .bind(&coin.id)
            .bind(&coin.symbol)
            .bind(&coin.name)
            .execute(&self.pool)
        })
        .await;

        summary.into_result()
    }

    async fn coins_by_symbols(&self, symbols: &[String]) -> Result<Vec<Coin>> {
        let rows = sqlx::query("SELECT id, symbol, name FROM coins WHERE symbol = ANY($1)")
            .bind(symbols)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                Ok(Coin {
                    id: row.try_get("id")?,
                    symbol: row.try_get("symbol")?,
                    name: row.try_get("name")?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl MarketCapStore for PostgresClient {
    async fn market_caps(&self, coin_id: &str, dates: &[NaiveDate]) -> Result<Vec<MarketCap>> {
        let rows = sqlx::query(
            "SELECT coin_id, date, market_cap FROM market_caps WHERE coin_id = $1 AND date = ANY($2)",
        )
        .bind(coin_id)
        .bind(dates)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(MarketCap {
                    coin_id: row.try_get("coin_id")?,
                    date: row.try_get("date")?,
                    market_cap: row.try_get("market_cap")?,
                })
            })
            .collect()
    }

    async fn insert_market_caps(&self, market_caps: &[MarketCap]) -> Result<BulkWriteSummary> {
        let summary = unordered(market_caps, |cap| {
            sqlx::query(
                "INSERT INTO market_caps (coin_id, date, market_cap) VALUES ($1, $2, $3) ON CONFLICT (coin_id, date) DO NOTHING",
            )
            .bind(&cap.coin_id)
            .bind(cap.date)
            .bind(cap.market_cap)
            .execute(&self.pool)
        })
        .await;

        summary.into_result()
    }
}

// =====================================
// Base asset price history
// =====================================

#[async_trait]
impl PriceHistoryStore for PostgresClient {
    async fn price_at_or_before(&self, at: DateTime<Utc>) -> Result<Option<PricePoint>> {
        let row = sqlx::query(
            "SELECT date, price FROM price_history WHERE date <= $1 ORDER BY date DESC LIMIT 1",
        )
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(PricePoint {
                date: row.try_get("date")?,
                price: row.try_get("price")?,
            })
        })
        .transpose()
    }

    async fn latest_price(&self) -> Result<Option<PricePoint>> {
        let row = sqlx::query("SELECT date, price FROM price_history ORDER BY date DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            Ok(PricePoint {
                date: row.try_get("date")?,
                price: row.try_get("price")?,
            })
        })
        .transpose()
    }

    async fn insert_prices(&self, points: &[PricePoint]) -> Result<BulkWriteSummary> {
        let summary = unordered(points, |point| {
            sqlx::query(
                "INSERT INTO price_history (date, price) VALUES ($1, $2) ON CONFLICT (date) DO NOTHING",
            )
            .bind(point.date)
            .bind(point.price)
            .execute(&self.pool)
        })
        .await;

        summary.into_result()
    }
}

// =====================================
// Task locks
// =====================================

#[async_trait]
impl TaskLock for PostgresClient {
    async fn find_or_create_task(&self, name: &str) -> Result<Task> {
        sqlx::query("INSERT INTO tasks (name) VALUES ($1) ON CONFLICT (name) DO NOTHING")
            .bind(name)
            .execute(&self.pool)
            .await?;

        let row = sqlx::query(
            "SELECT name, locked, locked_at, locked_by, lease_expires_at FROM tasks WHERE name = $1",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await?;

        task_from_row(&row)
    }

    async fn try_acquire(&self, name: &str, owner: &str, lease: Duration) -> Result<bool> {
        self.find_or_create_task(name).await?;

        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET locked = TRUE, locked_at = $2, locked_by = $3, lease_expires_at = $4
            WHERE name = $1
              AND (locked = FALSE OR lease_expires_at IS NOT NULL AND lease_expires_at < $2)
            "#,
        )
        .bind(name)
        .bind(now)
        .bind(owner)
        .bind(now + lease)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn renew(&self, name: &str, owner: &str, lease: Duration) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE tasks SET lease_expires_at = $3 WHERE name = $1 AND locked = TRUE AND locked_by = $2",
        )
        .bind(name)
        .bind(owner)
        .bind(Utc::now() + lease)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, name: &str, owner: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET locked = FALSE, locked_at = NULL, locked_by = NULL, lease_expires_at = NULL
            WHERE name = $1 AND locked = TRUE AND locked_by = $2
            "#,
        )
        .bind(name)
        .bind(owner)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Needs a scratch database: DATABASE_URL=postgres://... cargo test
    async fn client() -> Option<PostgresClient> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let client = PostgresClient::new(&url, 5).await.ok()?;
        client.ensure_schema().await.ok()?;
        Some(client)
    }

    #[tokio::test]
    async fn test_task_lock_round_trip() {
        let Some(client) = client().await else {
            return;
        };
        let name = format!("test-{}", Uuid::new_v4());
        let lease = Duration::minutes(5);

        assert!(client.try_acquire(&name, "a", lease).await.unwrap());
        assert!(!client.try_acquire(&name, "b", lease).await.unwrap());
        assert!(client.find_or_create_task(&name).await.unwrap().locked);
        assert!(!client.release(&name, "b").await.unwrap());
        assert!(client.release(&name, "a").await.unwrap());
    }

    #[tokio::test]
    async fn test_wallet_import_claim() {
        let Some(client) = client().await else {
            return;
        };
        let wallet = client
            .find_or_create_wallet(&format!("addr-{}", Uuid::new_v4()))
            .await
            .unwrap();
        let lease = Duration::minutes(5);

        assert!(client.try_claim_import(wallet.id, "a", lease).await.unwrap());
        assert!(!client.try_claim_import(wallet.id, "b", lease).await.unwrap());
        assert!(!client.finish_import(wallet.id, "b", true).await.unwrap());
        assert!(client.finish_import(wallet.id, "a", true).await.unwrap());

        let wallet = client.get_wallet(wallet.id).await.unwrap();
        assert!(wallet.import_status.done);
        assert!(!wallet.import_status.is_importing);
    }
}
