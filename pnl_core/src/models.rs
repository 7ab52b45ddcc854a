use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Progress of the swap history import for one wallet
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ImportStatus {
    /// Signature of the oldest event of the last committed page
    pub last_cursor: Option<String>,

    /// When the cursor was last committed
    pub last_updating_at: Option<DateTime<Utc>>,

    /// History has been walked back to the retention horizon
    pub done: bool,

    /// An import pass currently holds this wallet
    pub is_importing: bool,

    /// Lease start of the current claim; stale claims can be taken over
    pub import_started_at: Option<DateTime<Utc>>,

    /// Token of the pass holding the claim
    pub import_owner: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Wallet {
    pub id: Uuid,
    pub address: String,

    /// Date of the earliest imported transaction
    pub creation_date: Option<DateTime<Utc>>,

    /// Native balance in SOL
    pub balance: Decimal,
    pub import_status: ImportStatus,
    pub created_at: DateTime<Utc>,
}

impl Wallet {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            address: address.into(),
            creation_date: None,
            balance: Decimal::ZERO,
            import_status: ImportStatus::default(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TradeAction {
    Buy,
    Sell,
    None,
}

impl TradeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeAction::Buy => "buy",
            TradeAction::Sell => "sell",
            TradeAction::None => "none",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "buy" => TradeAction::Buy,
            "sell" => TradeAction::Sell,
            _ => TradeAction::None,
        }
    }
}

/// One side of a classified swap, priced in USD
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeLeg {
    pub mint: String,
    pub amount: Decimal,
    /// USD per token
    pub price: Decimal,
    /// amount * price
    pub price_amount: Decimal,
}

impl TradeLeg {
    pub fn priced(mint: impl Into<String>, amount: Decimal, price: Decimal) -> Self {
        Self {
            mint: mint.into(),
            amount,
            price,
            price_amount: amount * price,
        }
    }
}

/// A classified swap. Immutable once stored except for the enrichment
/// columns `market_cap`, `pnl` and `roi`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub id: Uuid,
    pub signature: String,
    pub wallet_id: Uuid,
    pub date: DateTime<Utc>,
    pub fee_lamports: i64,
    pub fee_payer: String,
    pub description: String,
    pub tx_type: String,
    pub source: String,
    pub from: TradeLeg,
    pub to: TradeLeg,
    pub action: TradeAction,
    pub tradable_token_mint: String,
    pub market_cap: Option<Decimal>,
    pub pnl: Option<Decimal>,
    pub roi: Option<Decimal>,
}

impl Transaction {
    /// Calendar day (UTC) the trade happened on
    pub fn day(&self) -> NaiveDate {
        self.date.date_naive()
    }

    /// Leg holding the tradable token: `to` for buys, `from` for sells
    pub fn token_leg(&self) -> &TradeLeg {
        match self.action {
            TradeAction::Sell => &self.from,
            _ => &self.to,
        }
    }
}

/// Point-in-time snapshot of a token held by a wallet
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenHolding {
    pub wallet_id: Uuid,
    pub mint_address: String,
    pub symbol: String,
    pub name: String,
    pub icon: Option<String>,
    pub balance: Decimal,
    pub supply: Option<Decimal>,
    pub price_per_token: Decimal,
    pub total_price: Decimal,
    pub updated_at: DateTime<Utc>,
}

/// Named mutex row guarding a scheduled job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub name: String,
    pub locked: bool,
    pub locked_at: Option<DateTime<Utc>>,
    /// Owner token of the current holder
    pub locked_by: Option<String>,
    /// A lock past this instant may be taken over
    pub lease_expires_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn unlocked(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            locked: false,
            locked_at: None,
            locked_by: None,
            lease_expires_at: None,
        }
    }

    /// Held and not past its lease
    pub fn is_held(&self, now: DateTime<Utc>) -> bool {
        self.locked && self.lease_expires_at.map_or(true, |expires| expires > now)
    }
}

/// Market-data provider coin, symbol and name lowercased
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Coin {
    pub id: String,
    pub symbol: String,
    pub name: String,
}

impl Coin {
    pub fn normalized(id: impl Into<String>, symbol: &str, name: &str) -> Self {
        Self {
            id: id.into(),
            symbol: symbol.to_lowercase(),
            name: name.to_lowercase(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketCap {
    pub coin_id: String,
    pub date: NaiveDate,
    pub market_cap: Decimal,
}

/// Base asset price in USD
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PricePoint {
    pub date: DateTime<Utc>,
    pub price: Decimal,
}
