#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::cast_precision_loss
    )
)]

//! Price Stream Hub - Tick Ingestion, Hourly Aggregation and Fan-out
//!
//! Holds one subscription to an upstream trade stream (or runs a synthetic
//! generator), normalizes every raw trade, folds it into a persisted
//! per-pair hourly average, and pushes it to every connected viewer.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Tick types and arithmetic, no I/O
//!   - `trade`: Canonical `Trade` and the viewer `TickEvent`
//!   - `normalize`: Raw record → `Trade`
//!   - `aggregate`: Hour truncation and the weighted-mean merge
//!   - `feed`: Source lifecycle events and status
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: `AggregateStore`, `TickPublisher`
//!   - `services`: `HourlyAggregator`, `TickPipeline`
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `feed`: Upstream WebSocket client and synthetic generator
//!   - `broadcast`: Per-viewer bounded queues
//!   - `viewer`: Viewer WebSocket server
//!   - `persistence`: SQLite and in-memory stores
//!   - `config`, `health`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//! Upstream WS ──┐                      ┌──► BroadcastHub ──► viewer 1..N
//!               ├─ FeedEvent ─► Pipeline
//! Synthetic ────┘                      └──► HourlyAggregator ──► AggregateStore
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Tick types and aggregation arithmetic.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::aggregate::{BucketKey, HourlyBucket, hour_start};
pub use domain::feed::{FeedEvent, FeedSource, FeedState, FeedStatus};
pub use domain::normalize::{Normalizer, TimestampUnit};
pub use domain::trade::{TickEvent, Trade, UNKNOWN_SYMBOL};

// Application
pub use application::ports::{AggregateStore, StoreError, TickPublisher};
pub use application::services::{HourlyAggregator, TickPipeline};

// Infrastructure config
pub use infrastructure::config::{
    BroadcastSettings, ConfigError, FeedSettings, FeedToken, HubConfig, ServerSettings,
    StorageSettings, SyntheticSettings,
};

// Tick sources
pub use infrastructure::feed::{
    FeedClient, FeedClientConfig, FeedError, SourceHandle, SyntheticFeed,
};

// Broadcast hub and viewer server
pub use infrastructure::broadcast::{
    BroadcastConfig, BroadcastHub, BroadcastStats, ConnectionId, SharedBroadcastHub,
};
pub use infrastructure::viewer::{ViewerServer, ViewerServerError};

// Stores
pub use infrastructure::persistence::{MemoryAggregateStore, SqliteAggregateStore, open_store};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
