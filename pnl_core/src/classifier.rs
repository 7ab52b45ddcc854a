use crate::models::{TradeAction, TradeLeg, Transaction};
use crate::swap::SwapEvent;
use crate::{PriceOracle, Result};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Turns a two-leg swap into a directional, USD-priced trade record.
///
/// The first transfer is the sold side, the second the bought side. Exactly
/// one of them has to be the base asset; its price comes from the oracle and
/// the counter-leg is priced by the exchange ratio.
pub struct TradeClassifier {
    oracle: Arc<dyn PriceOracle>,
    base_mint: String,
}

impl TradeClassifier {
    pub fn new(oracle: Arc<dyn PriceOracle>, base_mint: impl Into<String>) -> Self {
        Self {
            oracle,
            base_mint: base_mint.into(),
        }
    }

    pub fn base_mint(&self) -> &str {
        &self.base_mint
    }

    /// `Ok(None)` means the event carries no trade we can account for.
    pub async fn classify(&self, wallet_id: Uuid, event: &SwapEvent) -> Result<Option<Transaction>> {
        let (from, to) = match (event.legs.first(), event.legs.get(1)) {
            (Some(from), Some(to)) => (from, to),
            _ => {
                debug!("{}: fewer than two token transfers, skipping", event.signature);
                return Ok(None);
            }
        };

        let action = if from.mint == self.base_mint {
            TradeAction::Buy
        } else if to.mint == self.base_mint {
            TradeAction::Sell
        } else {
            debug!(
                "{}: neither {} nor {} is the base asset, skipping",
                event.signature, from.mint, to.mint
            );
            return Ok(None);
        };

        // The counter-leg price divides by the tradable amount.
        let tradable_amount = match action {
            TradeAction::Buy => to.amount,
            _ => from.amount,
        };
        if tradable_amount.is_zero() {
            debug!("{}: zero tradable amount, cannot infer price", event.signature);
            return Ok(None);
        }

        let base_price = self.oracle.price_at(event.timestamp).await?.price;

        let (from_leg, to_leg, tradable_token_mint) = match action {
            TradeAction::Buy => {
                let to_price = base_price * from.amount / to.amount;
                (
                    TradeLeg::priced(&from.mint, from.amount, base_price),
                    TradeLeg::priced(&to.mint, to.amount, to_price),
                    to.mint.clone(),
                )
            }
            _ => {
                let from_price = base_price * to.amount / from.amount;
                (
                    TradeLeg::priced(&from.mint, from.amount, from_price),
                    TradeLeg::priced(&to.mint, to.amount, base_price),
                    from.mint.clone(),
                )
            }
        };

        Ok(Some(Transaction {
            id: Uuid::new_v4(),
            signature: event.signature.clone(),
            wallet_id,
            date: event.timestamp,
            fee_lamports: event.fee_lamports,
            fee_payer: event.fee_payer.clone(),
            description: event.description.clone(),
            tx_type: event.tx_type.clone(),
            source: event.source.clone(),
            from: from_leg,
            to: to_leg,
            action,
            tradable_token_mint,
            market_cap: None,
            pnl: None,
            roi: None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PricePoint;
    use crate::swap::TokenLeg;
    use crate::PnLError;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    const BASE: &str = "So11111111111111111111111111111111111111112";
    const TOKEN: &str = "TokenX11111111111111111111111111111111111111";

    struct FixedOracle(Option<Decimal>);

    #[async_trait]
    impl PriceOracle for FixedOracle {
        async fn price_at(&self, at: DateTime<Utc>) -> Result<PricePoint> {
            self.0
                .map(|price| PricePoint { date: at, price })
                .ok_or(PnLError::PriceNotFound(at))
        }
    }

    fn swap(from: (&str, Decimal), to: (&str, Decimal)) -> SwapEvent {
        let leg = |(mint, amount): (&str, Decimal)| TokenLeg {
            mint: mint.to_string(),
            amount,
            from_user_account: None,
            to_user_account: None,
        };
        SwapEvent {
            signature: "5sig".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap(),
            tx_type: "SWAP".to_string(),
            source: "RAYDIUM".to_string(),
            description: "swap".to_string(),
            fee_lamports: 5000,
            fee_payer: "wallet".to_string(),
            legs: vec![leg(from), leg(to)],
        }
    }

    fn classifier(price: Option<Decimal>) -> TradeClassifier {
        TradeClassifier::new(Arc::new(FixedOracle(price)), BASE)
    }

    #[tokio::test]
    async fn test_buy_prices_both_legs() {
        let trade = classifier(Some(dec!(2.0)))
            .classify(Uuid::new_v4(), &swap((BASE, dec!(10)), (TOKEN, dec!(100))))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(trade.action, TradeAction::Buy);
        assert_eq!(trade.tradable_token_mint, TOKEN);
        assert_eq!(trade.from.price, dec!(2.0));
        assert_eq!(trade.from.price_amount, dec!(20));
        assert_eq!(trade.to.price, dec!(0.2));
        assert_eq!(trade.to.price_amount, dec!(20));
    }

    #[tokio::test]
    async fn test_sell_prices_both_legs() {
        let trade = classifier(Some(dec!(150)))
            .classify(Uuid::new_v4(), &swap((TOKEN, dec!(1000)), (BASE, dec!(2))))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(trade.action, TradeAction::Sell);
        assert_eq!(trade.tradable_token_mint, TOKEN);
        assert_eq!(trade.to.price, dec!(150));
        assert_eq!(trade.to.price_amount, dec!(300));
        assert_eq!(trade.from.price, dec!(0.3));
        assert_eq!(trade.from.price_amount, dec!(300));
    }

    #[tokio::test]
    async fn test_non_base_pair_is_dropped() {
        let result = classifier(Some(dec!(1)))
            .classify(Uuid::new_v4(), &swap((TOKEN, dec!(1)), ("Other", dec!(1))))
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_zero_tradable_amount_is_dropped() {
        let result = classifier(Some(dec!(1)))
            .classify(Uuid::new_v4(), &swap((BASE, dec!(1)), (TOKEN, dec!(0))))
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_missing_price_is_an_error() {
        let result = classifier(None)
            .classify(Uuid::new_v4(), &swap((BASE, dec!(1)), (TOKEN, dec!(5))))
            .await;
        assert!(matches!(result, Err(PnLError::PriceNotFound(_))));
    }
}
