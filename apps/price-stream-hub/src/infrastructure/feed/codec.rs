//! Feed Codec
//!
//! JSON encoding and decoding for the upstream trade stream.
//!
//! Outbound, one subscribe request per symbol:
//! ```json
//! {"type":"subscribe","symbol":"ETHUSDC"}
//! ```
//!
//! Inbound trade batches:
//! ```json
//! {"type":"trade","data":[{"s":"ETHUSDC","p":2001.5,"t":1714566615123,"v":0.4}]}
//! ```
//!
//! Any other `type` (heartbeat `ping`, notices) decodes to a non-trade
//! message the client ignores. Records inside `data` are passed through raw;
//! shaping them is the normalizer's job.

use serde::Serialize;
use serde_json::Value;

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid message format.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

/// Decoded upstream message.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    /// Batch of raw trade records.
    Trades(Vec<Value>),
    /// Server heartbeat.
    Ping,
    /// Any other message type.
    Other(String),
}

/// Outbound subscribe request.
#[derive(Debug, Clone, Serialize)]
pub struct SubscribeRequest<'a> {
    #[serde(rename = "type")]
    msg_type: &'static str,
    symbol: &'a str,
}

impl<'a> SubscribeRequest<'a> {
    /// Subscribe to trades for `symbol`.
    #[must_use]
    pub const fn new(symbol: &'a str) -> Self {
        Self {
            msg_type: "subscribe",
            symbol,
        }
    }
}

/// JSON codec for the upstream stream.
#[derive(Debug, Default, Clone)]
pub struct FeedCodec;

impl FeedCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode one text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not a JSON object, or is a trade
    /// message whose `data` is not an array.
    pub fn decode(&self, text: &str) -> Result<FeedMessage, CodecError> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(mut object) = value else {
            return Err(CodecError::InvalidFormat(format!(
                "expected JSON object, got: {}...",
                preview(text)
            )));
        };

        let msg_type = object
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        match msg_type.as_str() {
            "trade" => match object.remove("data") {
                Some(Value::Array(records)) => Ok(FeedMessage::Trades(records)),
                _ => Err(CodecError::InvalidFormat(
                    "trade message without data array".to_string(),
                )),
            },
            "ping" => Ok(FeedMessage::Ping),
            _ => Ok(FeedMessage::Other(msg_type)),
        }
    }

    /// Encode a subscribe request for `symbol`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode_subscribe(&self, symbol: &str) -> Result<String, CodecError> {
        Ok(serde_json::to_string(&SubscribeRequest::new(symbol))?)
    }
}

fn preview(text: &str) -> &str {
    let end = text
        .char_indices()
        .nth(50)
        .map_or(text.len(), |(idx, _)| idx);
    &text[..end]
}
