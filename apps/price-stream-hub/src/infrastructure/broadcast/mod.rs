//! Viewer Broadcast Hub
//!
//! Fans each tick out to every open viewer connection.
//!
//! # Architecture
//!
//! Every connection registers a bounded queue. A tick is serialized once and
//! the same payload is offered to each queue with `try_send`:
//! - a closed queue (viewer gone) is skipped
//! - a full queue (viewer too slow) is skipped for this tick only
//!
//! Publishing never blocks, so one slow viewer cannot stall the pipeline or
//! delay delivery to the others. Each queue is FIFO, so a viewer sees ticks
//! in the order they were published.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::application::ports::TickPublisher;
use crate::domain::trade::TickEvent;
use crate::infrastructure::config::BroadcastSettings;
use crate::infrastructure::metrics;

/// Serialized tick shared by all queues.
pub type TickPayload = Arc<str>;

/// Identifier of one viewer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Broadcast hub configuration.
#[derive(Debug, Clone, Copy)]
pub struct BroadcastConfig {
    /// Outbound queue capacity per connection.
    pub queue_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
        }
    }
}

impl From<&BroadcastSettings> for BroadcastConfig {
    fn from(settings: &BroadcastSettings) -> Self {
        Self {
            queue_capacity: settings.viewer_queue_capacity.max(1),
        }
    }
}

/// Outcome of one publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    /// Connections the tick was queued for.
    pub delivered: usize,
    /// Connections whose queue was full.
    pub skipped_full: usize,
    /// Connections whose queue was already closed.
    pub skipped_closed: usize,
}

impl BroadcastStats {
    /// Connections that did not get the tick, for any reason.
    #[must_use]
    pub const fn skipped(&self) -> usize {
        self.skipped_full + self.skipped_closed
    }
}

/// Registry of open viewer connections.
///
/// # Example
///
/// ```rust
/// use price_stream_hub::infrastructure::broadcast::{BroadcastConfig, BroadcastHub};
///
/// let hub = BroadcastHub::new(BroadcastConfig::default());
/// let (id, _rx) = hub.register();
/// assert_eq!(hub.connection_count(), 1);
///
/// hub.unregister(id);
/// assert_eq!(hub.connection_count(), 0);
/// ```
#[derive(Debug)]
pub struct BroadcastHub {
    config: BroadcastConfig,
    connections: RwLock<HashMap<ConnectionId, mpsc::Sender<TickPayload>>>,
}

impl BroadcastHub {
    /// Create a new hub.
    #[must_use]
    pub fn new(config: BroadcastConfig) -> Self {
        Self {
            config,
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Create a new hub with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(BroadcastConfig::default())
    }

    /// Register a connection and return its queue receiver.
    #[must_use]
    pub fn register(&self) -> (ConnectionId, mpsc::Receiver<TickPayload>) {
        let (tx, rx) = mpsc::channel(self.config.queue_capacity);
        let id = ConnectionId::new();

        let count = {
            let mut connections = self.connections.write();
            connections.insert(id, tx);
            connections.len()
        };
        metrics::set_viewer_connections(count);
        tracing::debug!(connection = %id, connections = count, "Viewer registered");

        (id, rx)
    }

    /// Remove a connection. Unknown ids are ignored.
    pub fn unregister(&self, id: ConnectionId) {
        let (removed, count) = {
            let mut connections = self.connections.write();
            let removed = connections.remove(&id).is_some();
            (removed, connections.len())
        };
        if removed {
            metrics::set_viewer_connections(count);
            tracing::debug!(connection = %id, connections = count, "Viewer unregistered");
        }
    }

    /// Number of registered connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Serialize `event` once and offer it to every open connection.
    #[must_use]
    pub fn broadcast(&self, event: &TickEvent) -> BroadcastStats {
        let payload: TickPayload = match serde_json::to_string(event) {
            Ok(json) => json.into(),
            Err(e) => {
                tracing::error!(error = %e, symbol = %event.symbol, "Failed to serialize tick");
                return BroadcastStats::default();
            }
        };
        self.broadcast_payload(&payload)
    }

    /// Offer an already serialized payload to every open connection.
    #[must_use]
    pub fn broadcast_payload(&self, payload: &TickPayload) -> BroadcastStats {
        let mut stats = BroadcastStats::default();

        {
            let connections = self.connections.read();
            for sender in connections.values() {
                match sender.try_send(Arc::clone(payload)) {
                    Ok(()) => stats.delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => stats.skipped_full += 1,
                    Err(mpsc::error::TrySendError::Closed(_)) => stats.skipped_closed += 1,
                }
            }
        }

        if stats.skipped() > 0 {
            tracing::debug!(
                full = stats.skipped_full,
                closed = stats.skipped_closed,
                "Viewers skipped a tick"
            );
        }
        metrics::record_broadcast(
            stats.delivered as u64,
            stats.skipped_full as u64,
            stats.skipped_closed as u64,
        );
        stats
    }
}

impl TickPublisher for BroadcastHub {
    fn publish(&self, event: &TickEvent) -> usize {
        self.broadcast(event).delivered
    }
}

/// Shared broadcast hub reference.
pub type SharedBroadcastHub = Arc<BroadcastHub>;

// =============================================================================
// Tests
// =============================================================================
