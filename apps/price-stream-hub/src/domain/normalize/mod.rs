//! Trade Normalizer
//!
//! Maps loosely-shaped raw tick records into a canonical [`Trade`]. The
//! normalizer never fails: every record produces exactly one trade, with
//! documented defaults standing in for missing or unusable fields.
//!
//! # Field priority
//!
//! | Field       | Keys tried, in order | Default          |
//! |-------------|----------------------|------------------|
//! | `symbol`    | `s`, `symbol`        | `"UNKNOWN"`      |
//! | `price`     | `p`, `price`         | `0.0`            |
//! | `timestamp` | `t`, `timestamp`     | current time     |
//!
//! A key only wins if its value is usable: a non-empty string for the symbol,
//! a finite number (or numeric string) for price and timestamp. A timestamp of
//! zero, a negative one, or one outside the representable range falls back to
//! the current time.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::domain::trade::{Trade, UNKNOWN_SYMBOL};

const SYMBOL_KEYS: [&str; 2] = ["s", "symbol"];
const PRICE_KEYS: [&str; 2] = ["p", "price"];
const TIMESTAMP_KEYS: [&str; 2] = ["t", "timestamp"];

/// Unit of the numeric epoch timestamp carried by raw records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimestampUnit {
    /// Milliseconds since the Unix epoch.
    #[default]
    Millis,
    /// Seconds since the Unix epoch (fractions allowed).
    Seconds,
}

impl TimestampUnit {
    /// Parse a unit name (`ms`, `millis`, `milliseconds`, `s`, `sec`, `seconds`).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "ms" | "millis" | "milliseconds" => Some(Self::Millis),
            "s" | "sec" | "secs" | "seconds" => Some(Self::Seconds),
            _ => None,
        }
    }

    /// Get the canonical unit name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Millis => "ms",
            Self::Seconds => "s",
        }
    }

    /// Multiplier from this unit to milliseconds.
    const fn millis_factor(self) -> f64 {
        match self {
            Self::Millis => 1.0,
            Self::Seconds => 1000.0,
        }
    }

    /// Express an instant as an epoch value in this unit.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn encode(self, instant: DateTime<Utc>) -> f64 {
        instant.timestamp_millis() as f64 / self.millis_factor()
    }
}

/// Converts raw feed records into canonical trades.
#[derive(Debug, Clone, Copy, Default)]
pub struct Normalizer {
    unit: TimestampUnit,
}

impl Normalizer {
    /// Create a normalizer for records stamped in `unit`.
    #[must_use]
    pub const fn new(unit: TimestampUnit) -> Self {
        Self { unit }
    }

    /// Get the configured timestamp unit.
    #[must_use]
    pub const fn unit(&self) -> TimestampUnit {
        self.unit
    }

    /// Normalize a raw record, defaulting the timestamp to now.
    #[must_use]
    pub fn normalize(&self, record: &Value) -> Trade {
        self.normalize_at(record, Utc::now())
    }

    /// Normalize a raw record, using `now` when the timestamp is unusable.
    #[must_use]
    pub fn normalize_at(&self, record: &Value, now: DateTime<Utc>) -> Trade {
        let symbol = extract_symbol(record).unwrap_or(UNKNOWN_SYMBOL);
        let price = extract_number(record, &PRICE_KEYS).unwrap_or(0.0);
        let timestamp = extract_number(record, &TIMESTAMP_KEYS)
            .and_then(|raw| self.to_instant(raw))
            .unwrap_or(now);

        Trade::new(symbol, price, timestamp)
    }

    fn to_instant(self, raw: f64) -> Option<DateTime<Utc>> {
        let millis = (raw * self.unit.millis_factor()).trunc();
        #[allow(clippy::cast_precision_loss)]
        let in_range = millis > 0.0 && millis < i64::MAX as f64;
        if !in_range {
            return None;
        }

        #[allow(clippy::cast_possible_truncation)]
        Utc.timestamp_millis_opt(millis as i64).single()
    }
}

fn extract_symbol(record: &Value) -> Option<&str> {
    SYMBOL_KEYS
        .iter()
        .filter_map(|key| record.get(key).and_then(Value::as_str))
        .find(|s| !s.is_empty())
}

fn extract_number(record: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter()
        .filter_map(|key| record.get(key))
        .find_map(as_finite_number)
}

fn as_finite_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}
