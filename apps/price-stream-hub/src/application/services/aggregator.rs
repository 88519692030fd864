//! Hourly Aggregator
//!
//! Routes each trade to its `(pair, hour)` bucket and hands the merge to the
//! store, which owns the atomicity of the read-modify-write.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::application::ports::{AggregateStore, StoreError};
use crate::domain::aggregate::{BucketKey, HourlyBucket};
use crate::domain::trade::Trade;
use crate::infrastructure::metrics::{self, MergeOutcome};

/// Folds trades into persisted hourly averages.
pub struct HourlyAggregator {
    store: Arc<dyn AggregateStore>,
}

impl HourlyAggregator {
    /// Create an aggregator over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn AggregateStore>) -> Self {
        Self { store }
    }

    /// Merge one trade into its hourly bucket.
    ///
    /// # Errors
    ///
    /// Returns the store error if the merge was aborted. The trade's
    /// contribution is then lost; callers log it and move on.
    pub async fn record(&self, trade: &Trade) -> Result<HourlyBucket, StoreError> {
        self.merge(&trade.symbol, trade.timestamp, trade.price, 1)
            .await
    }

    /// Merge `count` samples averaging `price` into the bucket holding `at`.
    ///
    /// `at` is truncated to its hour, so any instant within the hour works.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::EmptyContribution` without touching the store when
    /// `count` is zero, or the store error if the merge was aborted.
    pub async fn merge(
        &self,
        pair: &str,
        at: DateTime<Utc>,
        price: f64,
        count: u64,
    ) -> Result<HourlyBucket, StoreError> {
        if count == 0 {
            tracing::debug!(pair, "Ignoring merge with no samples");
            return Err(StoreError::EmptyContribution {
                pair: pair.to_string(),
            });
        }

        let key = BucketKey::new(pair, at);
        let started = Instant::now();

        let result = self.store.merge(&key, price, count).await;

        let outcome = match &result {
            Ok(bucket) => {
                tracing::trace!(
                    pair = %bucket.pair,
                    hour_start = %key.hour_start_iso(),
                    avg_price = bucket.avg_price,
                    sample_count = bucket.sample_count,
                    "Hourly bucket updated"
                );
                MergeOutcome::Committed
            }
            Err(_) => MergeOutcome::Failed,
        };
        metrics::record_merge(outcome, started.elapsed());

        result
    }

    /// Buckets stored for `pair`, newest first.
    ///
    /// # Errors
    ///
    /// Returns the store error if the read fails.
    pub async fn buckets_for_pair(&self, pair: &str) -> Result<Vec<HourlyBucket>, StoreError> {
        self.store.buckets_for_pair(pair).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use mockall::predicate::{always, eq};

    use super::*;
    use crate::application::ports::MockAggregateStore;

    #[tokio::test]
    async fn record_truncates_to_hour_and_merges_one_sample() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 14, 42, 7).unwrap();
        let expected_key = BucketKey::new("ETHUSDC", ts);
        assert_eq!(
            expected_key.hour_start,
            Utc.with_ymd_and_hms(2024, 5, 1, 14, 0, 0).unwrap()
        );

        let mut store = MockAggregateStore::new();
        store
            .expect_merge()
            .with(eq(expected_key.clone()), always(), eq(1_u64))
            .times(1)
            .returning(|key, price, count| Ok(HourlyBucket::first(key, price, count)));

        let aggregator = HourlyAggregator::new(Arc::new(store));
        let bucket = aggregator
            .record(&Trade::new("ETHUSDC", 2000.0, ts))
            .await
            .unwrap();

        assert_eq!(bucket.key(), expected_key);
        assert_eq!(bucket.sample_count, 1);
    }

    #[tokio::test]
    async fn store_failure_is_returned() {
        let mut store = MockAggregateStore::new();
        store
            .expect_merge()
            .returning(|_, _, _| Err(StoreError::Database("disk I/O error".to_string())));

        let aggregator = HourlyAggregator::new(Arc::new(store));
        let err = aggregator
            .record(&Trade::new("ETHBTC", 0.05, Utc::now()))
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Database(_)));
    }

    #[tokio::test]
    async fn zero_count_merge_never_reaches_the_store() {
        let mut store = MockAggregateStore::new();
        store.expect_merge().never();

        let aggregator = HourlyAggregator::new(Arc::new(store));
        let err = aggregator
            .merge("ETHUSDC", Utc::now(), 2000.0, 0)
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::EmptyContribution { ref pair } if pair == "ETHUSDC"));
    }
}
