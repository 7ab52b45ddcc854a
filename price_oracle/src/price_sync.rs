use crate::{KlinesSource, PriceOracleError, Result};
use chrono::{DateTime, Duration, Utc};
use persistence_layer::PriceHistoryStore;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PriceSyncSummary {
    pub pages: usize,
    pub fetched: usize,
    pub inserted: usize,
    pub latest: Option<DateTime<Utc>>,
}

/// Extends the stored price history with exchange candles.
///
/// Resumes from the newest stored point (or the configured start when the
/// history is empty) and pages forward until the exchange returns a short page.
pub struct PriceHistorySync {
    source: Arc<dyn KlinesSource>,
    store: Arc<dyn PriceHistoryStore>,
    history_start: DateTime<Utc>,
}

impl PriceHistorySync {
    pub fn new(
        source: Arc<dyn KlinesSource>,
        store: Arc<dyn PriceHistoryStore>,
        history_start: &str,
    ) -> Result<Self> {
        let history_start = DateTime::parse_from_rfc3339(history_start)
            .map_err(|e| PriceOracleError::Config(format!("history_start {}: {}", history_start, e)))?
            .with_timezone(&Utc);

        Ok(Self {
            source,
            store,
            history_start,
        })
    }

    pub async fn run(&self) -> Result<PriceSyncSummary> {
        let mut start = match self.store.latest_price().await? {
            Some(point) => point.date,
            None => self.history_start,
        };
        let limit = self.source.page_limit() as usize;
        let mut summary = PriceSyncSummary::default();

        info!("Syncing base asset price history from {}", start);

        loop {
            let page = self.source.klines(start).await?;
            summary.pages += 1;
            summary.fetched += page.len();

            let Some(last) = page.last() else {
                break;
            };
            let next_start = last.date + Duration::milliseconds(1);
            summary.latest = Some(last.date);

            // Unique by date: the resumed first candle is skipped, not duplicated
            let written = self.store.insert_prices(&page).await?.into_result()?;
            summary.inserted += written.written;
            debug!(
                "Price page {}: {} candles, {} new",
                summary.pages,
                page.len(),
                written.written
            );

            if page.len() < limit {
                break;
            }
            start = next_start;
        }

        info!(
            "Price history sync finished: {} pages, {} new points",
            summary.pages, summary.inserted
        );
        Ok(summary)
    }
}
