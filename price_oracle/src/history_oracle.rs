use async_trait::async_trait;
use chrono::{DateTime, Utc};
use persistence_layer::PriceHistoryStore;
use pnl_core::{PnLError, PriceOracle, PricePoint};
use std::sync::Arc;
use tracing::debug;

/// Price oracle backed by the stored price history.
///
/// Answers with the latest point at or before the requested instant. No
/// point means the history has not been synced that far back, which is an
/// error rather than a zero price.
pub struct HistoricalPriceOracle {
    store: Arc<dyn PriceHistoryStore>,
}

impl HistoricalPriceOracle {
    pub fn new(store: Arc<dyn PriceHistoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl PriceOracle for HistoricalPriceOracle {
    async fn price_at(&self, at: DateTime<Utc>) -> pnl_core::Result<PricePoint> {
        let point = self
            .store
            .price_at_or_before(at)
            .await
            .map_err(|e| PnLError::PriceFetch(e.to_string()))?;

        match point {
            Some(point) => {
                debug!("Base price at {}: {} (recorded {})", at, point.price, point.date);
                Ok(point)
            }
            None => Err(PnLError::PriceNotFound(at)),
        }
    }
}
