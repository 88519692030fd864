//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Tick sources: upstream WebSocket client and synthetic generator.
pub mod feed;

/// Viewer fan-out over bounded per-connection queues.
pub mod broadcast;

/// Viewer WebSocket server.
pub mod viewer;

/// Hourly aggregate stores (SQLite, in-memory).
pub mod persistence;

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Logging and OpenTelemetry tracing.
pub mod telemetry;
