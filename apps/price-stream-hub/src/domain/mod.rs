//! Domain Layer - Core tick and aggregate types.
//!
//! This layer contains the canonical trade representation, the payload
//! normalizer, the hourly bucket arithmetic, and feed lifecycle state.
//! Nothing here performs I/O.

/// Canonical trades and the viewer tick event.
pub mod trade;

/// Raw payload to `Trade` normalization.
pub mod normalize;

/// Hourly buckets and the weighted merge.
pub mod aggregate;

/// Feed lifecycle events and status.
pub mod feed;
