//! Hourly Aggregates
//!
//! A bucket holds the running average price of one pair within one clock
//! hour (UTC). Buckets are never recomputed from raw history: each new sample
//! is folded in with a count-weighted merge, which is associative, so the
//! final average does not depend on merge order.

use chrono::{DateTime, DurationRound, SecondsFormat, TimeDelta, Utc};
use serde::Serialize;

use crate::domain::trade::Trade;

/// Truncate an instant to the start of its UTC hour.
#[must_use]
pub fn hour_start(instant: DateTime<Utc>) -> DateTime<Utc> {
    // duration_trunc only fails for spans wider than the timestamp range.
    instant
        .duration_trunc(TimeDelta::hours(1))
        .unwrap_or(instant)
}

/// Unique identity of a bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketKey {
    /// Trading pair.
    pub pair: String,
    /// Start of the hour, minutes/seconds/millis zeroed.
    pub hour_start: DateTime<Utc>,
}

impl BucketKey {
    /// Build a key, truncating `instant` to its hour.
    #[must_use]
    pub fn new(pair: impl Into<String>, instant: DateTime<Utc>) -> Self {
        Self {
            pair: pair.into(),
            hour_start: hour_start(instant),
        }
    }

    /// Key of the bucket a trade lands in.
    #[must_use]
    pub fn for_trade(trade: &Trade) -> Self {
        Self::new(trade.symbol.clone(), trade.timestamp)
    }

    /// ISO-8601 form of the hour start, as stored.
    #[must_use]
    pub fn hour_start_iso(&self) -> String {
        self.hour_start.to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

/// Running average for one pair within one hour.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourlyBucket {
    /// Trading pair.
    pub pair: String,
    /// Start of the hour.
    pub hour_start: DateTime<Utc>,
    /// Mean of every sample merged so far.
    pub avg_price: f64,
    /// Number of samples merged so far.
    pub sample_count: u64,
}

impl HourlyBucket {
    /// Create a bucket from its first contribution.
    #[must_use]
    pub fn first(key: &BucketKey, price: f64, count: u64) -> Self {
        Self {
            pair: key.pair.clone(),
            hour_start: key.hour_start,
            avg_price: price,
            sample_count: count,
        }
    }

    /// Apply a merge to an optional existing bucket.
    ///
    /// This is the whole read-modify-write body; stores call it inside their
    /// atomic section.
    #[must_use]
    pub fn merged(existing: Option<Self>, key: &BucketKey, price: f64, count: u64) -> Self {
        match existing {
            Some(mut bucket) => {
                bucket.absorb(price, count);
                bucket
            }
            None => Self::first(key, price, count),
        }
    }

    /// Fold `count` samples averaging `price` into this bucket.
    #[allow(clippy::cast_precision_loss)]
    pub fn absorb(&mut self, price: f64, count: u64) {
        let total = self.sample_count + count;
        if total == 0 {
            return;
        }
        self.avg_price = self
            .avg_price
            .mul_add(self.sample_count as f64, price * count as f64)
            / total as f64;
        self.sample_count = total;
    }

    /// Key identifying this bucket.
    #[must_use]
    pub fn key(&self) -> BucketKey {
        BucketKey {
            pair: self.pair.clone(),
            hour_start: self.hour_start,
        }
    }
}
