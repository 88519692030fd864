//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `AggregateStore`: atomic merge into persisted hourly buckets
//! - `TickPublisher`: fan-out of tick events to viewers

use async_trait::async_trait;

use crate::domain::aggregate::{BucketKey, HourlyBucket};
use crate::domain::trade::TickEvent;

/// Errors surfaced by aggregate stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Underlying database error.
    #[error("database error: {0}")]
    Database(String),

    /// Stored row could not be decoded.
    #[error("corrupt row: {0}")]
    CorruptRow(String),

    /// Blocking worker failed.
    #[error("store worker failed: {0}")]
    Worker(String),

    /// A merge carried no samples.
    #[error("merge into {pair} carries no samples")]
    EmptyContribution {
        /// Pair the merge targeted.
        pair: String,
    },
}

/// Persistence contract for hourly buckets.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AggregateStore: Send + Sync {
    /// Merge `count` samples averaging `price` into the bucket at `key`.
    ///
    /// Implementations must run the read and the write as one unit: no other
    /// merge on the same key may interleave between them. On error nothing is
    /// written. A `count` of zero is rejected with
    /// `StoreError::EmptyContribution` and leaves the store untouched.
    async fn merge(&self, key: &BucketKey, price: f64, count: u64)
    -> Result<HourlyBucket, StoreError>;

    /// Fetch a single bucket.
    async fn get(&self, key: &BucketKey) -> Result<Option<HourlyBucket>, StoreError>;

    /// All buckets for a pair, newest hour first.
    async fn buckets_for_pair(&self, pair: &str) -> Result<Vec<HourlyBucket>, StoreError>;
}

/// Outbound delivery of tick events.
#[cfg_attr(test, mockall::automock)]
pub trait TickPublisher: Send + Sync {
    /// Deliver `event` to every open viewer. Returns the number reached.
    fn publish(&self, event: &TickEvent) -> usize;
}
