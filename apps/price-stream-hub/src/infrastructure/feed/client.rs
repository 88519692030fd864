//! Upstream Feed Client
//!
//! Maintains one WebSocket subscription to the upstream trade stream and
//! forwards raw trade records into the pipeline channel.
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected ──► Connecting ──► Subscribed ──► Disconnected ──► (fixed delay) ──┐
//!      ▲               │                                                          │
//!      │               └──── handshake failure ───────────────────────────────────┤
//!      └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Without a token the client logs once and idles until cancelled.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::codec::{CodecError, FeedCodec, FeedMessage};
use super::reconnect::{DEFAULT_RECONNECT_DELAY, ReconnectPolicy};
use crate::domain::feed::FeedEvent;
use crate::infrastructure::config::HubConfig;
use crate::infrastructure::metrics;

// =============================================================================
// Error Type
// =============================================================================

/// Errors that can occur in a tick source.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Codec error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The pipeline stopped receiving events.
    #[error("event channel closed")]
    ChannelClosed,

    /// Connection closed by the server or the stream ended.
    #[error("connection closed")]
    ConnectionClosed,
}

// =============================================================================
// Client Configuration
// =============================================================================

/// Configuration for the upstream feed client.
#[derive(Clone)]
pub struct FeedClientConfig {
    /// Full URL including the token; `None` keeps the client idle.
    pub endpoint: Option<String>,
    /// URL without credentials, for logs.
    pub display_url: String,
    /// Symbols to subscribe on every connect.
    pub symbols: Vec<String>,
    /// Fixed reconnect delay.
    pub reconnect_delay: Duration,
}

impl FeedClientConfig {
    /// Create a new configuration.
    #[must_use]
    pub fn new(endpoint: Option<String>, display_url: String, symbols: Vec<String>) -> Self {
        Self {
            endpoint,
            display_url,
            symbols,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }

    /// Set the reconnect delay.
    #[must_use]
    pub const fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }
}

impl From<&HubConfig> for FeedClientConfig {
    fn from(config: &HubConfig) -> Self {
        Self::new(
            config.feed_url_with_token(),
            config.feed.url.clone(),
            config.feed.symbols.clone(),
        )
        .with_reconnect_delay(config.feed.reconnect_delay)
    }
}

impl std::fmt::Debug for FeedClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedClientConfig")
            .field("endpoint", &self.endpoint.as_ref().map(|_| "[REDACTED]"))
            .field("display_url", &self.display_url)
            .field("symbols", &self.symbols)
            .field("reconnect_delay", &self.reconnect_delay)
            .finish()
    }
}

// =============================================================================
// Feed Client
// =============================================================================

/// WebSocket client for the upstream trade stream.
pub struct FeedClient {
    config: FeedClientConfig,
    codec: FeedCodec,
    event_tx: mpsc::Sender<FeedEvent>,
    cancel: CancellationToken,
}

impl FeedClient {
    /// Create a new feed client.
    #[must_use]
    pub const fn new(
        config: FeedClientConfig,
        event_tx: mpsc::Sender<FeedEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            codec: FeedCodec::new(),
            event_tx,
            cancel,
        }
    }

    /// Run the connection loop until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `FeedError::ChannelClosed` if the pipeline goes away. Every
    /// transport failure is retried after the fixed delay instead.
    pub async fn run(self: Arc<Self>) -> Result<(), FeedError> {
        let Some(endpoint) = self.config.endpoint.clone() else {
            tracing::warn!("Feed token missing; upstream feed will not start");
            self.cancel.cancelled().await;
            return Ok(());
        };

        let mut reconnect_policy = ReconnectPolicy::new(self.config.reconnect_delay);

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!("Feed client cancelled");
                return Ok(());
            }

            match self.connect_and_run(&endpoint, &mut reconnect_policy).await {
                Ok(()) => {
                    tracing::info!("Feed connection closed on shutdown");
                    return Ok(());
                }
                Err(FeedError::ChannelClosed) => return Err(FeedError::ChannelClosed),
                Err(e) => {
                    tracing::warn!(error = %e, "Feed connection lost");
                    self.emit(FeedEvent::Disconnected).await?;

                    let delay = reconnect_policy.next_delay();
                    let attempt = reconnect_policy.attempt_count();
                    tracing::info!(
                        attempt,
                        delay_ms = delay.as_millis(),
                        "Reconnecting to upstream feed"
                    );
                    self.emit(FeedEvent::Reconnecting { attempt }).await?;

                    tokio::select! {
                        () = self.cancel.cancelled() => {
                            tracing::info!("Feed client cancelled during reconnect delay");
                            return Ok(());
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Connect, subscribe, and pump messages until error or cancellation.
    async fn connect_and_run(
        &self,
        endpoint: &str,
        reconnect_policy: &mut ReconnectPolicy,
    ) -> Result<(), FeedError> {
        self.emit(FeedEvent::Connecting).await?;
        tracing::info!(url = %self.config.display_url, "Connecting to upstream feed");

        let (ws_stream, _response) = tokio::select! {
            () = self.cancel.cancelled() => return Ok(()),
            connected = tokio_tungstenite::connect_async(endpoint) => connected?,
        };
        self.emit(FeedEvent::Connected).await?;

        let (mut write, mut read) = ws_stream.split();

        for symbol in &self.config.symbols {
            let request = self.codec.encode_subscribe(symbol)?;
            write.send(Message::Text(request.into())).await?;
        }
        tracing::debug!(symbols = ?self.config.symbols, "Subscribe requests sent");
        self.emit(FeedEvent::Subscribed {
            symbols: self.config.symbols.clone(),
        })
        .await?;
        reconnect_policy.reset();

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_text_message(&text).await?;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(frame = ?frame, "Server sent close frame");
                            return Err(FeedError::ConnectionClosed);
                        }
                        Some(Ok(_)) => {
                            // Ignore binary and pong frames
                        }
                        Some(Err(e)) => {
                            return Err(e.into());
                        }
                        None => {
                            tracing::info!("WebSocket stream ended");
                            return Err(FeedError::ConnectionClosed);
                        }
                    }
                }
            }
        }
    }

    /// Handle a text frame. Malformed frames are dropped here.
    async fn handle_text_message(&self, text: &str) -> Result<(), FeedError> {
        match self.codec.decode(text) {
            Ok(FeedMessage::Trades(records)) => {
                for record in records {
                    self.emit(FeedEvent::Trade(record)).await?;
                }
            }
            Ok(FeedMessage::Ping) => tracing::trace!("Feed heartbeat"),
            Ok(FeedMessage::Other(msg_type)) => {
                tracing::trace!(msg_type = %msg_type, "Ignoring feed message");
            }
            Err(e) => {
                metrics::record_malformed_message();
                tracing::warn!(error = %e, "Discarding malformed feed message");
            }
        }
        Ok(())
    }

    async fn emit(&self, event: FeedEvent) -> Result<(), FeedError> {
        self.event_tx
            .send(event)
            .await
            .map_err(|_| FeedError::ChannelClosed)
    }
}
