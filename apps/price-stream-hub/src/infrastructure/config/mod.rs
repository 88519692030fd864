//! Configuration Module
//!
//! Configuration loading for the hub service.

mod settings;

pub use settings::{
    BroadcastSettings, ConfigError, FeedSettings, FeedToken, HubConfig, ServerSettings,
    StorageSettings, SyntheticSettings,
};
