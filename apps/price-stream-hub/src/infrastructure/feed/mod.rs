//! Tick Source Adapters
//!
//! Two interchangeable producers feed the pipeline through one
//! `FeedEvent` channel:
//!
//! - `client`: the upstream WebSocket subscription
//! - `synthetic`: a random generator for development

pub mod client;
pub mod codec;
pub mod handle;
pub mod reconnect;
pub mod synthetic;

pub use client::{FeedClient, FeedClientConfig, FeedError};
pub use codec::{CodecError, FeedCodec, FeedMessage};
pub use handle::SourceHandle;
pub use reconnect::ReconnectPolicy;
pub use synthetic::SyntheticFeed;
