pub mod memory_store;
pub mod postgres_client;
pub mod store;

pub use memory_store::MemoryStore;
pub use postgres_client::PostgresClient;
pub use store::{
    BulkWriteSummary, CoinStore, MarketCapStore, PriceHistoryStore, Storage, TaskLock,
    TokenHoldingStore, TransactionStore, WalletStore,
};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use pnl_core::Task;
use redis::{AsyncCommands, Client};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Redis connection error: {0}")]
    Connection(#[from] redis::RedisError),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Connection pool error: {0}")]
    PoolCreation(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Bulk write incomplete: {}", .0.describe())]
    BulkWrite(BulkWriteSummary),
    #[error("Invalid stored value: {0}")]
    InvalidData(String),
}

pub type Result<T> = std::result::Result<T, PersistenceError>;

/// Redis-backed task lock: `SET NX EX` to acquire, Lua compare-and-delete to release.
#[derive(Debug, Clone)]
pub struct RedisClient {
    client: Client,
}

impl RedisClient {
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;

        // Test the connection
        let mut conn = client.get_multiplexed_async_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;

        info!("Connected to Redis at {}", redis_url);
        Ok(Self { client })
    }

    async fn get_connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(PersistenceError::from)
    }

    fn lock_key(name: &str) -> String {
        format!("lock:{}", name)
    }

    fn lease_seconds(lease: Duration) -> u64 {
        lease.num_seconds().max(1) as u64
    }
}

// =====================================
// Distributed Lock Management
// =====================================

#[async_trait]
impl TaskLock for RedisClient {
    async fn find_or_create_task(&self, name: &str) -> Result<Task> {
        let key = Self::lock_key(name);
        let mut conn = self.get_connection().await?;

        let owner: Option<String> = conn.get(&key).await?;
        let ttl_ms: i64 = conn.pttl(&key).await?;

        let mut task = Task::unlocked(name);
        if let Some(owner) = owner {
            task.locked = true;
            task.locked_by = Some(owner);
            if ttl_ms > 0 {
                task.lease_expires_at = Some(Utc::now() + Duration::milliseconds(ttl_ms));
            }
        }
        Ok(task)
    }

    async fn try_acquire(&self, name: &str, owner: &str, lease: Duration) -> Result<bool> {
        let key = Self::lock_key(name);
        let mut conn = self.get_connection().await?;

        // SET key owner NX EX lease; expiry makes abandoned locks self-heal
        let reply: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(owner)
            .arg("NX")
            .arg("EX")
            .arg(Self::lease_seconds(lease))
            .query_async(&mut conn)
            .await?;

        let acquired = reply.is_some();
        if acquired {
            info!("Acquired lock: {}", name);
        } else {
            debug!("Lock {} is held elsewhere", name);
        }
        Ok(acquired)
    }

    async fn renew(&self, name: &str, owner: &str, lease: Duration) -> Result<bool> {
        let script = r#"
            if redis.call("GET", KEYS[1]) == ARGV[1] then
                return redis.call("EXPIRE", KEYS[1], ARGV[2])
            else
                return 0
            end
        "#;

        let mut conn = self.get_connection().await?;
        let result: i32 = redis::Script::new(script)
            .key(Self::lock_key(name))
            .arg(owner)
            .arg(Self::lease_seconds(lease))
            .invoke_async(&mut conn)
            .await?;

        if result == 1 {
            debug!("Refreshed lock: {}", name);
        }
        Ok(result == 1)
    }

    async fn release(&self, name: &str, owner: &str) -> Result<bool> {
        let script = r#"
            if redis.call("GET", KEYS[1]) == ARGV[1] then
                return redis.call("DEL", KEYS[1])
            else
                return 0
            end
        "#;

        let mut conn = self.get_connection().await?;
        let result: i32 = redis::Script::new(script)
            .key(Self::lock_key(name))
            .arg(owner)
            .invoke_async(&mut conn)
            .await?;

        if result == 1 {
            info!("Released lock: {}", name);
        } else {
            warn!("Lock {} was already expired or held by another process", name);
        }
        Ok(result == 1)
    }
}
