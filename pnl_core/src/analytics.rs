use crate::ledger::CostBasisLedger;
use crate::models::{TokenHolding, TradeAction, Transaction};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Trailing-window trade statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowStats {
    /// USD spent on buys inside the window
    pub bet_size: Decimal,

    /// USD received from sells inside the window
    pub revenue: Decimal,

    /// revenue - bet_size
    pub pnl: Decimal,

    /// pnl / bet_size * 100, `None` when nothing was bought in the window
    pub roi: Option<Decimal>,

    /// Percentage of profitable sales, rounded to 2 decimals; 0 without sales
    pub win_rate: Decimal,

    pub total_sales: u32,
    pub profitable_sales: u32,
    pub total_buys: u32,
}

impl WindowStats {
    fn finish(mut self) -> Self {
        self.pnl = self.revenue - self.bet_size;
        self.roi = roi(self.pnl, self.bet_size);
        self.win_rate = win_rate(self.profitable_sales, self.total_sales);
        self
    }

    fn merge(mut self, other: &WindowStats) -> Self {
        self.bet_size += other.bet_size;
        self.revenue += other.revenue;
        self.total_sales += other.total_sales;
        self.profitable_sales += other.profitable_sales;
        self.total_buys += other.total_buys;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenWindowStats {
    pub mint: String,
    #[serde(flatten)]
    pub stats: WindowStats,
    /// Position after replaying the full history
    pub remaining_amount: Decimal,
    pub remaining_cost_usd: Decimal,
    pub average_buy_price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldingStats {
    pub mint: String,
    pub symbol: String,
    pub name: String,
    pub balance: Decimal,
    pub total_price: Decimal,
    pub balance_max_holdings: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletAnalytics {
    pub wallet_address: String,
    pub period: String,
    pub since: DateTime<Utc>,
    pub totals: WindowStats,
    pub tokens: Vec<TokenWindowStats>,
    pub holdings: Vec<HoldingStats>,
}

pub fn win_rate(profitable_sales: u32, total_sales: u32) -> Decimal {
    if total_sales == 0 {
        return Decimal::ZERO;
    }
    (Decimal::from(profitable_sales) / Decimal::from(total_sales) * Decimal::ONE_HUNDRED)
        .round_dp(2)
}

pub fn roi(pnl: Decimal, bet_size: Decimal) -> Option<Decimal> {
    if bet_size > Decimal::ZERO {
        Some(pnl / bet_size * Decimal::ONE_HUNDRED)
    } else {
        None
    }
}

/// Share of the token supply held, in percent. Unknown or zero supply gives 0.
pub fn balance_max_holdings(balance: Decimal, supply: Option<Decimal>) -> Decimal {
    match supply {
        Some(supply) if supply > Decimal::ZERO => balance / supply * Decimal::ONE_HUNDRED,
        _ => Decimal::ZERO,
    }
}

/// Window statistics for one token.
///
/// The cost basis is built from the whole history so that sales inside the
/// window are judged against buys made before it.
pub fn token_window_stats<'a, I>(mint: &str, history: I, since: DateTime<Utc>) -> TokenWindowStats
where
    I: IntoIterator<Item = &'a Transaction>,
{
    let history: Vec<&Transaction> = history.into_iter().collect();
    let (ledger, entries) = CostBasisLedger::replay(history.iter().copied());

    let by_signature: BTreeMap<&str, &Transaction> =
        history.iter().map(|tx| (tx.signature.as_str(), *tx)).collect();

    let mut stats = WindowStats::default();
    for entry in entries.iter().filter(|e| e.date >= since) {
        let Some(tx) = by_signature.get(entry.signature.as_str()) else {
            continue;
        };
        match entry.action {
            TradeAction::Buy => {
                stats.bet_size += tx.to.price_amount;
                stats.total_buys += 1;
            }
            TradeAction::Sell => {
                stats.revenue += tx.from.price_amount;
                stats.total_sales += 1;
                if entry.sale.as_ref().is_some_and(|s| s.profitable) {
                    stats.profitable_sales += 1;
                }
            }
            TradeAction::None => {}
        }
    }

    TokenWindowStats {
        mint: mint.to_string(),
        stats: stats.finish(),
        remaining_amount: ledger.total_amount(),
        remaining_cost_usd: ledger.total_amount_usd(),
        average_buy_price: ledger.average_buy_price(),
    }
}

/// Per-token and wallet-level statistics over `[since, now]`.
pub fn wallet_analytics(
    wallet_address: &str,
    period: &str,
    since: DateTime<Utc>,
    transactions: &[Transaction],
    holdings: &[TokenHolding],
) -> WalletAnalytics {
    let mut by_mint: BTreeMap<&str, Vec<&Transaction>> = BTreeMap::new();
    for tx in transactions.iter().filter(|tx| tx.action != TradeAction::None) {
        by_mint
            .entry(tx.tradable_token_mint.as_str())
            .or_default()
            .push(tx);
    }

    let tokens: Vec<TokenWindowStats> = by_mint
        .into_iter()
        .map(|(mint, history)| token_window_stats(mint, history, since))
        .filter(|t| t.stats.total_buys + t.stats.total_sales > 0)
        .collect();

    let totals = tokens
        .iter()
        .fold(WindowStats::default(), |acc, t| acc.merge(&t.stats))
        .finish();

    let holdings = holdings
        .iter()
        .map(|h| HoldingStats {
            mint: h.mint_address.clone(),
            symbol: h.symbol.clone(),
            name: h.name.clone(),
            balance: h.balance,
            total_price: h.total_price,
            balance_max_holdings: balance_max_holdings(h.balance, h.supply),
        })
        .collect();

    WalletAnalytics {
        wallet_address: wallet_address.to_string(),
        period: period.to_string(),
        since,
        totals,
        tokens,
        holdings,
    }
}
