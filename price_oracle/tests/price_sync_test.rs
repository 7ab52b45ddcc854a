use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use persistence_layer::{MemoryStore, PriceHistoryStore};
use pnl_core::PricePoint;
use price_oracle::{KlinesSource, PriceHistorySync};
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};

/// One candle per minute from `origin` up to `end`, served in pages
struct MinuteCandles {
    origin: DateTime<Utc>,
    end: DateTime<Utc>,
    limit: u32,
    requests: Mutex<Vec<DateTime<Utc>>>,
}

#[async_trait]
impl KlinesSource for MinuteCandles {
    async fn klines(&self, start: DateTime<Utc>) -> price_oracle::Result<Vec<PricePoint>> {
        self.requests.lock().unwrap().push(start);

        let mut points = Vec::new();
        let mut at = self.origin;
        while at <= self.end && points.len() < self.limit as usize {
            if at >= start {
                points.push(PricePoint {
                    date: at,
                    price: Decimal::from(100 + at.timestamp() / 60 % 10),
                });
            }
            at += Duration::minutes(1);
        }
        Ok(points)
    }

    fn page_limit(&self) -> u32 {
        self.limit
    }
}

fn origin() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
}

#[tokio::test]
async fn test_sync_pages_until_short_page() {
    let source = Arc::new(MinuteCandles {
        origin: origin(),
        end: origin() + Duration::minutes(9),
        limit: 4,
        requests: Mutex::new(Vec::new()),
    });
    let store = Arc::new(MemoryStore::new());
    let sync = PriceHistorySync::new(source.clone(), store.clone(), "2025-01-01T00:00:00Z").unwrap();

    let summary = sync.run().await.unwrap();

    // 10 candles at 4 per page: 4 + 4 + 2
    assert_eq!(summary.pages, 3);
    assert_eq!(summary.inserted, 10);
    assert_eq!(summary.latest, Some(origin() + Duration::minutes(9)));
    assert_eq!(
        store.latest_price().await.unwrap().map(|p| p.date),
        Some(origin() + Duration::minutes(9))
    );
}

#[tokio::test]
async fn test_sync_resumes_from_latest_stored_point() {
    let store = Arc::new(MemoryStore::new());
    store
        .insert_prices(&[PricePoint {
            date: origin() + Duration::minutes(5),
            price: Decimal::from(105),
        }])
        .await
        .unwrap();

    let source = Arc::new(MinuteCandles {
        origin: origin(),
        end: origin() + Duration::minutes(7),
        limit: 100,
        requests: Mutex::new(Vec::new()),
    });
    let sync = PriceHistorySync::new(source.clone(), store.clone(), "2025-01-01T00:00:00Z").unwrap();

    let summary = sync.run().await.unwrap();

    assert_eq!(
        source.requests.lock().unwrap().first().copied(),
        Some(origin() + Duration::minutes(5))
    );
    // Minutes 5..=7 fetched, minute 5 already stored
    assert_eq!(summary.fetched, 3);
    assert_eq!(summary.inserted, 2);

    // A second run has nothing new to add
    let again = sync.run().await.unwrap();
    assert_eq!(again.inserted, 0);
}

#[test]
fn test_invalid_history_start_is_rejected() {
    let source = Arc::new(MinuteCandles {
        origin: origin(),
        end: origin(),
        limit: 1,
        requests: Mutex::new(Vec::new()),
    });
    assert!(PriceHistorySync::new(source, Arc::new(MemoryStore::new()), "yesterday").is_err());
}
