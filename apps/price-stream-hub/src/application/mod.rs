//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for external systems (storage, viewer fan-out).
pub mod ports;

/// Application services: hourly aggregation and the tick pipeline.
pub mod services;
