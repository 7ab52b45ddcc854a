use crate::models::{TradeAction, Transaction};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Result of applying one sale to the running cost basis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleOutcome {
    /// Average buy price before the sale (0 when nothing was held)
    pub average_buy_price: Decimal,
    pub profitable: bool,
    /// (sale price - average buy price) * amount sold
    pub realized_pnl: Decimal,
    /// realized pnl relative to the cost of the sold amount; None without cost
    pub realized_roi: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    pub signature: String,
    pub date: DateTime<Utc>,
    pub action: TradeAction,
    pub sale: Option<SaleOutcome>,
}

/// Running average-cost position of one wallet in one token.
///
/// Sales may exceed what was bought (transfers in are not tracked), so both
/// totals are allowed to go negative.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CostBasisLedger {
    total_amount: Decimal,
    total_amount_usd: Decimal,
}

impl CostBasisLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_amount(&self) -> Decimal {
        self.total_amount
    }

    pub fn total_amount_usd(&self) -> Decimal {
        self.total_amount_usd
    }

    pub fn average_buy_price(&self) -> Decimal {
        if self.total_amount > Decimal::ZERO {
            self.total_amount_usd / self.total_amount
        } else {
            Decimal::ZERO
        }
    }

    pub fn record_buy(&mut self, amount: Decimal, cost_usd: Decimal) {
        self.total_amount += amount;
        self.total_amount_usd += cost_usd;
    }

    pub fn record_sale(&mut self, amount: Decimal, price: Decimal) -> SaleOutcome {
        let average_buy_price = self.average_buy_price();
        let cost = amount * average_buy_price;
        let realized_pnl = (price - average_buy_price) * amount;
        let realized_roi = if cost > Decimal::ZERO {
            Some(realized_pnl / cost * Decimal::ONE_HUNDRED)
        } else {
            None
        };

        self.total_amount -= amount;
        self.total_amount_usd -= cost;

        SaleOutcome {
            average_buy_price,
            profitable: price > average_buy_price,
            realized_pnl,
            realized_roi,
        }
    }

    /// Apply a classified trade; the tradable token sits in `to` for buys and
    /// in `from` for sells.
    pub fn apply(&mut self, tx: &Transaction) -> Option<SaleOutcome> {
        match tx.action {
            TradeAction::Buy => {
                self.record_buy(tx.to.amount, tx.to.price_amount);
                None
            }
            TradeAction::Sell => Some(self.record_sale(tx.from.amount, tx.from.price)),
            TradeAction::None => None,
        }
    }

    /// Replay a single token's history in date order.
    pub fn replay<'a, I>(history: I) -> (Self, Vec<LedgerEntry>)
    where
        I: IntoIterator<Item = &'a Transaction>,
    {
        let mut ordered: Vec<&Transaction> = history.into_iter().collect();
        ordered.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.signature.cmp(&b.signature)));

        let mut ledger = Self::new();
        let entries = ordered
            .into_iter()
            .map(|tx| LedgerEntry {
                signature: tx.signature.clone(),
                date: tx.date,
                action: tx.action,
                sale: ledger.apply(tx),
            })
            .collect();

        (ledger, entries)
    }
}
