//! Feed Lifecycle
//!
//! Events emitted by tick sources and the shared status they drive. Both the
//! upstream client and the synthetic generator speak `FeedEvent`, so the
//! pipeline cannot tell them apart.

use std::sync::atomic::{AtomicU8, AtomicU32, AtomicU64, Ordering};

use serde_json::Value;

/// Events emitted by a tick source.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// Opening the upstream connection.
    Connecting,
    /// Transport handshake completed.
    Connected,
    /// Subscribe requests sent for every symbol.
    Subscribed {
        /// Symbols subscribed.
        symbols: Vec<String>,
    },
    /// Connection lost or handshake failed.
    Disconnected,
    /// Waiting out the fixed delay before reconnecting.
    Reconnecting {
        /// Reconnection attempt number.
        attempt: u32,
    },
    /// A raw trade record, not yet normalized.
    Trade(Value),
}

/// Connection state of the upstream feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FeedState {
    /// No live connection.
    Disconnected = 0,
    /// Handshake in progress.
    Connecting = 1,
    /// Connected with subscriptions sent.
    Subscribed = 2,
}

impl FeedState {
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Subscribed,
            _ => Self::Disconnected,
        }
    }

    /// Get the state name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Subscribed => "subscribed",
        }
    }
}

/// Which source produces ticks for this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedSource {
    /// Real upstream WebSocket feed.
    Upstream,
    /// Randomized local generator.
    Synthetic,
    /// Upstream selected but no token configured.
    Disabled,
}

impl FeedSource {
    /// Get the source name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Upstream => "upstream",
            Self::Synthetic => "synthetic",
            Self::Disabled => "disabled",
        }
    }
}

/// Shared, lock-free view of feed health.
#[derive(Debug)]
pub struct FeedStatus {
    source: FeedSource,
    state: AtomicU8,
    trades_received: AtomicU64,
    reconnect_attempts: AtomicU32,
}

impl FeedStatus {
    /// Create a status tracker for `source`.
    #[must_use]
    pub const fn new(source: FeedSource) -> Self {
        Self {
            source,
            state: AtomicU8::new(FeedState::Disconnected as u8),
            trades_received: AtomicU64::new(0),
            reconnect_attempts: AtomicU32::new(0),
        }
    }

    /// Apply a lifecycle event. Trade events only bump the counter.
    pub fn apply(&self, event: &FeedEvent) {
        match event {
            FeedEvent::Connecting => self.set_state(FeedState::Connecting),
            FeedEvent::Connected => {}
            FeedEvent::Subscribed { .. } => {
                self.set_state(FeedState::Subscribed);
                self.reconnect_attempts.store(0, Ordering::Relaxed);
            }
            FeedEvent::Disconnected => self.set_state(FeedState::Disconnected),
            FeedEvent::Reconnecting { attempt } => {
                self.reconnect_attempts.store(*attempt, Ordering::Relaxed);
            }
            FeedEvent::Trade(_) => {
                self.trades_received.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn set_state(&self, state: FeedState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }

    /// Configured source.
    #[must_use]
    pub const fn source(&self) -> FeedSource {
        self.source
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> FeedState {
        FeedState::from_u8(self.state.load(Ordering::Relaxed))
    }

    /// Raw trade records received so far.
    #[must_use]
    pub fn trades_received(&self) -> u64 {
        self.trades_received.load(Ordering::Relaxed)
    }

    /// Reconnect attempts since the last successful subscribe.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    /// Whether ticks are currently flowing from a live source.
    #[must_use]
    pub fn is_live(&self) -> bool {
        match self.source {
            FeedSource::Synthetic => true,
            FeedSource::Upstream => self.state() == FeedState::Subscribed,
            FeedSource::Disabled => false,
        }
    }
}
