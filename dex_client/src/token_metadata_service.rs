use crate::{AssetMetadata, Result, TransactionIndexer};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// Batch size accepted by `getAssetBatch`
const METADATA_BATCH_SIZE: usize = 1000;

/// Mint metadata lookup with an in-memory cache in front of the indexer
pub struct TokenMetadataService {
    indexer: Arc<dyn TransactionIndexer>,
    // In-memory cache for token metadata
    cache: Arc<RwLock<HashMap<String, AssetMetadata>>>,
}

impl TokenMetadataService {
    pub fn new(indexer: Arc<dyn TransactionIndexer>) -> Self {
        Self {
            indexer,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Seed the cache from an already known source such as stored holdings
    pub fn prime(&self, entries: impl IntoIterator<Item = AssetMetadata>) {
        if let Ok(mut cache) = self.cache.write() {
            for entry in entries {
                cache.insert(entry.mint.clone(), entry);
            }
        }
    }

    /// Metadata for every mint the cache or the indexer knows; unknown mints are omitted
    pub async fn get_metadata_batch(&self, mints: &[String]) -> Result<HashMap<String, AssetMetadata>> {
        let mut found = HashMap::new();
        let mut missing = Vec::new();

        if let Ok(cache) = self.cache.read() {
            for mint in mints {
                match cache.get(mint) {
                    Some(metadata) => {
                        found.insert(mint.clone(), metadata.clone());
                    }
                    None => missing.push(mint.clone()),
                }
            }
        } else {
            missing.extend(mints.iter().cloned());
        }

        debug!(
            "Token metadata: {} cached, {} to fetch",
            found.len(),
            missing.len()
        );

        for chunk in missing.chunks(METADATA_BATCH_SIZE) {
            let fetched = self.indexer.get_asset_metadata(chunk).await?;
            if fetched.len() < chunk.len() {
                warn!(
                    "Indexer returned metadata for {} of {} mints",
                    fetched.len(),
                    chunk.len()
                );
            }

            if let Ok(mut cache) = self.cache.write() {
                for metadata in &fetched {
                    cache.insert(metadata.mint.clone(), metadata.clone());
                }
            }
            for metadata in fetched {
                found.insert(metadata.mint.clone(), metadata);
            }
        }

        Ok(found)
    }

    pub fn cached_count(&self) -> usize {
        self.cache.read().map(|c| c.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{TransactionPage, WalletAsset};
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingIndexer {
        calls: AtomicU32,
    }

    #[async_trait]
    impl TransactionIndexer for CountingIndexer {
        async fn get_transactions(&self, _: &str, _: Option<&str>) -> Result<TransactionPage> {
            Ok(TransactionPage::default())
        }

        async fn get_balance(&self, _: &str) -> Result<Decimal> {
            Ok(Decimal::ZERO)
        }

        async fn get_assets(&self, _: &str, _: u32) -> Result<Vec<WalletAsset>> {
            Ok(Vec::new())
        }

        fn assets_page_size(&self) -> u32 {
            1000
        }

        async fn get_asset_metadata(&self, mints: &[String]) -> Result<Vec<AssetMetadata>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(mints
                .iter()
                .filter(|m| m.as_str() != "unknown")
                .map(|m| AssetMetadata {
                    mint: m.clone(),
                    symbol: format!("{}-sym", m),
                    name: format!("{}-name", m),
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn test_metadata_is_cached_after_first_fetch() {
        let indexer = Arc::new(CountingIndexer {
            calls: AtomicU32::new(0),
        });
        let service = TokenMetadataService::new(indexer.clone());
        let mints = vec!["a".to_string(), "unknown".to_string()];

        let first = service.get_metadata_batch(&mints).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first["a"].symbol, "a-sym");
        assert_eq!(indexer.calls.load(Ordering::SeqCst), 1);

        let second = service.get_metadata_batch(&["a".to_string()]).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(indexer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(service.cached_count(), 1);
    }

    #[tokio::test]
    async fn test_primed_entries_skip_the_indexer() {
        let indexer = Arc::new(CountingIndexer {
            calls: AtomicU32::new(0),
        });
        let service = TokenMetadataService::new(indexer.clone());
        service.prime(vec![AssetMetadata {
            mint: "held".to_string(),
            symbol: "hld".to_string(),
            name: "held token".to_string(),
        }]);

        let found = service.get_metadata_batch(&["held".to_string()]).await.unwrap();
        assert_eq!(found["held"].name, "held token");
        assert_eq!(indexer.calls.load(Ordering::SeqCst), 0);
    }
}
