//! Trade Types
//!
//! `Trade` is the canonical, source-independent price observation produced by
//! the normalizer. `TickEvent` is its wire shape on the viewer protocol.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Symbol used when a raw record carries no usable symbol field.
pub const UNKNOWN_SYMBOL: &str = "UNKNOWN";

/// One normalized price observation for a pair at an instant.
#[derive(Debug, Clone, PartialEq)]
pub struct Trade {
    /// Trading pair, e.g. `ETHUSDC`.
    pub symbol: String,
    /// Trade price. Expected positive but not enforced.
    pub price: f64,
    /// Trade time.
    pub timestamp: DateTime<Utc>,
}

impl Trade {
    /// Create a new trade.
    #[must_use]
    pub fn new(symbol: impl Into<String>, price: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            timestamp,
        }
    }

    /// Build the viewer-facing tick event for this trade.
    #[must_use]
    pub fn to_tick_event(&self) -> TickEvent {
        TickEvent::from(self)
    }
}

/// Viewer protocol message: `{"type":"tick","symbol":..,"price":..,"timestamp":..}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "tick")]
pub struct TickEvent {
    /// Trading pair.
    pub symbol: String,
    /// Trade price.
    pub price: f64,
    /// ISO-8601 timestamp with millisecond precision.
    pub timestamp: String,
}

impl From<&Trade> for TickEvent {
    fn from(trade: &Trade) -> Self {
        Self {
            symbol: trade.symbol.clone(),
            price: trade.price,
            timestamp: trade.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn tick_event_wire_format() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 15).unwrap();
        let trade = Trade::new("ETHUSDC", 2005.5, ts);

        let json = serde_json::to_value(trade.to_tick_event()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "tick",
                "symbol": "ETHUSDC",
                "price": 2005.5,
                "timestamp": "2024-05-01T12:30:15.000Z",
            })
        );
    }

    #[test]
    fn tick_event_keeps_milliseconds() {
        let ts = Utc.timestamp_millis_opt(1_714_566_615_123).unwrap();
        let event = Trade::new("ETHBTC", 0.05, ts).to_tick_event();
        assert!(event.timestamp.ends_with(".123Z"), "{}", event.timestamp);
    }

    #[test]
    fn tick_event_rejects_other_types() {
        let raw = r#"{"type":"trade","symbol":"X","price":1.0,"timestamp":"t"}"#;
        assert!(serde_json::from_str::<TickEvent>(raw).is_err());
    }
}
