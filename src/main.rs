use anyhow::Context;
use clap::{Parser, Subcommand};
use config_manager::SystemConfig;
use dex_client::{CoinGeckoClient, HeliusClient};
use job_orchestrator::{JobOrchestrator, LockOutcome, Providers, ScheduledJob};
use persistence_layer::{MemoryStore, PostgresClient, RedisClient, Storage, TaskLock};
use price_oracle::BinanceKlinesClient;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "wallet_tracker")]
#[command(about = "Solana wallet swap tracker: imports, PnL and market cap jobs", long_about = None)]
struct Cli {
    /// Configuration file; defaults and TRACKER__* variables apply when absent
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every scheduled job on its interval until Ctrl-C
    Run,
    /// Track a wallet and import its swap history
    Import { address: String },
    /// Print trading statistics of a tracked wallet
    Analytics {
        address: String,
        /// Trailing window such as 7d, 12h or 3m
        #[arg(short, long)]
        period: Option<String>,
    },
    /// Fill market caps of stored trades
    Backfill,
    /// Extend the SOL/USD price history
    SyncPrices,
    /// Refresh the coin list
    SyncCoins,
    /// Refresh balances and token holdings of all wallets
    Holdings,
    /// Write realized pnl on sell trades
    Pnl,
    /// Resume unfinished wallet imports
    ResumeImports,
}

impl Command {
    fn job(&self) -> Option<ScheduledJob> {
        match self {
            Command::Backfill => Some(ScheduledJob::MarketCapBackfill),
            Command::SyncPrices => Some(ScheduledJob::PriceHistory),
            Command::SyncCoins => Some(ScheduledJob::CoinList),
            Command::Holdings => Some(ScheduledJob::Holdings),
            Command::Pnl => Some(ScheduledJob::RealizedPnl),
            Command::ResumeImports => Some(ScheduledJob::WalletImports),
            _ => None,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,wallet_tracker=debug,job_orchestrator=debug".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = SystemConfig::load_from_path(&cli.config).context("loading configuration")?;
    info!("Configuration loaded: {}", config.to_redacted_json());

    let providers = Providers {
        indexer: Arc::new(HeliusClient::new(config.helius.clone())?),
        market_data: Arc::new(CoinGeckoClient::new(config.coingecko.clone())?),
        klines: Arc::new(BinanceKlinesClient::new(config.binance.clone())?),
    };

    if config.database.enabled {
        let postgres = PostgresClient::new(&config.database.postgres_url, config.database.max_connections)
            .await
            .context("connecting to postgres")?;
        postgres.ensure_schema().await?;
        run(cli.command, config, Arc::new(postgres), providers).await
    } else {
        warn!("Database disabled, using the in-memory store; nothing outlives this process");
        run(cli.command, config, Arc::new(MemoryStore::new()), providers).await
    }
}

async fn run<S>(command: Command, config: SystemConfig, store: Arc<S>, providers: Providers) -> anyhow::Result<()>
where
    S: Storage + 'static,
{
    let lock: Arc<dyn TaskLock> = match config.scheduler.lock_backend.as_str() {
        "redis" => Arc::new(
            RedisClient::new(&config.redis.url)
                .await
                .context("connecting to redis")?,
        ),
        _ => store.clone(),
    };
    let orchestrator = JobOrchestrator::new(config, store, lock, providers)?;

    if let Some(job) = command.job() {
        match orchestrator.run_job(job).await? {
            LockOutcome::Ran(report) => print_json(&report)?,
            LockOutcome::Skipped => warn!("{} is already running elsewhere", job.name()),
        }
        return Ok(());
    }

    match command {
        Command::Run => orchestrator.start_continuous_mode().await?,
        Command::Import { address } => {
            let tracked = orchestrator.wallets().track_wallet(&address).await?;
            print_json(&tracked)?;
        }
        Command::Analytics { address, period } => {
            let analytics = orchestrator
                .wallets()
                .wallet_analytics(&address, period.as_deref())
                .await?;
            print_json(&analytics)?;
        }
        _ => {}
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
