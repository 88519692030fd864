//! In-memory aggregate store.
//!
//! Holds buckets in a map behind one lock; the whole merge runs under the
//! lock, so concurrent merges on a key serialize.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::application::ports::{AggregateStore, StoreError};
use crate::domain::aggregate::{BucketKey, HourlyBucket};

/// Process-local bucket store.
#[derive(Debug, Default)]
pub struct MemoryAggregateStore {
    buckets: Mutex<HashMap<BucketKey, HourlyBucket>>,
}

impl MemoryAggregateStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of buckets held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.lock().len()
    }

    /// Whether no bucket has been created yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.lock().is_empty()
    }
}

#[async_trait]
impl AggregateStore for MemoryAggregateStore {
    async fn merge(
        &self,
        key: &BucketKey,
        price: f64,
        count: u64,
    ) -> Result<HourlyBucket, StoreError> {
        if count == 0 {
            return Err(StoreError::EmptyContribution {
                pair: key.pair.clone(),
            });
        }
        let mut buckets = self.buckets.lock();
        let merged = HourlyBucket::merged(buckets.remove(key), key, price, count);
        buckets.insert(key.clone(), merged.clone());
        Ok(merged)
    }

    async fn get(&self, key: &BucketKey) -> Result<Option<HourlyBucket>, StoreError> {
        Ok(self.buckets.lock().get(key).cloned())
    }

    async fn buckets_for_pair(&self, pair: &str) -> Result<Vec<HourlyBucket>, StoreError> {
        let mut found: Vec<HourlyBucket> = self
            .buckets
            .lock()
            .values()
            .filter(|b| b.pair == pair)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.hour_start.cmp(&a.hour_start));
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{TimeDelta, TimeZone, Utc};

    use super::*;

    #[tokio::test]
    async fn first_merge_creates_bucket() {
        let store = MemoryAggregateStore::new();
        let key = BucketKey::new("ETHUSDC", Utc::now());

        let bucket = store.merge(&key, 2000.0, 1).await.unwrap();
        assert_eq!(bucket.sample_count, 1);
        assert_eq!(store.get(&key).await.unwrap(), Some(bucket));
    }

    #[tokio::test]
    async fn zero_count_merge_creates_nothing() {
        let store = MemoryAggregateStore::new();
        let key = BucketKey::new("ETHUSDC", Utc::now());

        let err = store.merge(&key, 2000.0, 0).await.unwrap_err();
        assert!(matches!(err, StoreError::EmptyContribution { .. }));
        assert!(store.get(&key).await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn concurrent_merges_lose_nothing() {
        let store = Arc::new(MemoryAggregateStore::new());
        let key = BucketKey::new("ETHUSDT", Utc::now());

        let mut handles = Vec::new();
        for i in 0..200 {
            let store = Arc::clone(&store);
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                store.merge(&key, f64::from(i), 1).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let bucket = store.get(&key).await.unwrap().unwrap();
        assert_eq!(bucket.sample_count, 200);
        assert!((bucket.avg_price - 99.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn buckets_for_pair_newest_first() {
        let store = MemoryAggregateStore::new();
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 10, 15, 0).unwrap();
        for h in 0..3 {
            let key = BucketKey::new("ETHUSDC", t0 + TimeDelta::hours(h));
            store.merge(&key, 1.0, 1).await.unwrap();
        }
        store
            .merge(&BucketKey::new("ETHBTC", t0), 1.0, 1)
            .await
            .unwrap();

        let buckets = store.buckets_for_pair("ETHUSDC").await.unwrap();
        assert_eq!(buckets.len(), 3);
        assert!(buckets[0].hour_start > buckets[1].hour_start);
        assert!(buckets[1].hour_start > buckets[2].hour_start);
        assert_eq!(store.len(), 4);
    }
}
