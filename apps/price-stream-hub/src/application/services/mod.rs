//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `HourlyAggregator`: routes trades to their hourly bucket in the store
//! - `TickPipeline`: drives normalization, broadcast, and aggregation

pub mod aggregator;
pub mod pipeline;

pub use aggregator::HourlyAggregator;
pub use pipeline::TickPipeline;
