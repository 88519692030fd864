//! Hub Configuration Settings
//!
//! Configuration types for the price stream hub, loaded from environment
//! variables. Only an unusable enum value or an empty symbol list is an
//! error; numeric values that fail to parse fall back to their defaults, and
//! a missing feed token simply disables the upstream feed.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::domain::normalize::TimestampUnit;

/// Upstream feed access token.
#[derive(Clone, PartialEq, Eq)]
pub struct FeedToken(String);

impl FeedToken {
    /// Wrap a token, rejecting blank values.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Option<Self> {
        let token = token.into();
        (!token.trim().is_empty()).then_some(Self(token))
    }

    /// Get the raw token.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for FeedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FeedToken([REDACTED])")
    }
}

/// Upstream feed settings.
#[derive(Debug, Clone)]
pub struct FeedSettings {
    /// Access token; `None` leaves the upstream client idle.
    pub token: Option<FeedToken>,
    /// Base WebSocket URL; the token is appended as a query parameter.
    pub url: String,
    /// Pairs to subscribe to.
    pub symbols: Vec<String>,
    /// Fixed delay between a disconnect and the next connect attempt.
    pub reconnect_delay: Duration,
    /// Unit of the `t` field in raw trade records.
    pub timestamp_unit: TimestampUnit,
    /// Use the synthetic generator instead of the upstream feed.
    pub mock: bool,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            token: None,
            url: "wss://ws.finnhub.io".to_string(),
            symbols: vec![
                "ETHUSDC".to_string(),
                "ETHUSDT".to_string(),
                "ETHBTC".to_string(),
            ],
            reconnect_delay: Duration::from_millis(5000),
            timestamp_unit: TimestampUnit::Millis,
            mock: false,
        }
    }
}

/// Synthetic feed generator settings.
#[derive(Debug, Clone)]
pub struct SyntheticSettings {
    /// Time between generated ticks.
    pub interval: Duration,
    /// Lowest generated price.
    pub base_price: f64,
    /// Width of the uniform price draw above the base.
    pub spread: f64,
}

impl Default for SyntheticSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1500),
            base_price: 2000.0,
            spread: 100.0,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Viewer WebSocket port.
    pub port: u16,
    /// Viewer WebSocket path.
    pub ws_path: String,
    /// Health check HTTP port (0 = disabled).
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: 3001,
            ws_path: "/ws".to_string(),
            health_port: 8082,
        }
    }
}

/// Viewer fan-out settings.
#[derive(Debug, Clone)]
pub struct BroadcastSettings {
    /// Outbound queue capacity per viewer connection.
    pub viewer_queue_capacity: usize,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            viewer_queue_capacity: 1024,
        }
    }
}

/// Aggregate storage backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageSettings {
    /// SQLite database file.
    Sqlite {
        /// Database path.
        path: PathBuf,
    },
    /// Process-local map.
    Memory,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("data/hourly.sqlite"),
        }
    }
}

/// Complete hub configuration.
#[derive(Debug, Clone, Default)]
pub struct HubConfig {
    /// Upstream feed settings.
    pub feed: FeedSettings,
    /// Synthetic generator settings.
    pub synthetic: SyntheticSettings,
    /// Server port settings.
    pub server: ServerSettings,
    /// Viewer fan-out settings.
    pub broadcast: BroadcastSettings,
    /// Aggregate storage settings.
    pub storage: StorageSettings,
}

impl HubConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is present but unusable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is present but unusable.
    pub fn from_lookup<F>(get: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let feed_defaults = FeedSettings::default();

        let timestamp_unit = match get("FEED_TIMESTAMP_UNIT") {
            Some(raw) => TimestampUnit::parse(&raw).ok_or_else(|| ConfigError::InvalidValue {
                key: "FEED_TIMESTAMP_UNIT".to_string(),
                value: raw,
            })?,
            None => feed_defaults.timestamp_unit,
        };

        let symbols = match get("FEED_SYMBOLS") {
            Some(raw) => {
                let symbols: Vec<String> = raw
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_uppercase)
                    .collect();
                if symbols.is_empty() {
                    return Err(ConfigError::EmptyValue("FEED_SYMBOLS".to_string()));
                }
                symbols
            }
            None => feed_defaults.symbols,
        };

        let feed = FeedSettings {
            token: get("FINNHUB_KEY").and_then(FeedToken::new),
            url: get("FEED_URL").unwrap_or(feed_defaults.url),
            symbols,
            reconnect_delay: parse_opt(&get, "FEED_RECONNECT_DELAY_MS")
                .map_or(feed_defaults.reconnect_delay, Duration::from_millis),
            timestamp_unit,
            mock: get("USE_MOCK_DATA").is_some_and(|v| v.trim().eq_ignore_ascii_case("true")),
        };

        let synthetic_defaults = SyntheticSettings::default();
        let synthetic = SyntheticSettings {
            interval: parse_opt(&get, "MOCK_INTERVAL_MS")
                .filter(|ms| *ms > 0)
                .map_or(synthetic_defaults.interval, Duration::from_millis),
            base_price: parse_or(&get, "MOCK_BASE_PRICE", synthetic_defaults.base_price),
            spread: parse_or(&get, "MOCK_PRICE_SPREAD", synthetic_defaults.spread).max(0.0),
        };

        let server_defaults = ServerSettings::default();
        let server = ServerSettings {
            port: parse_or(&get, "PORT", server_defaults.port),
            ws_path: get("WS_PATH")
                .map(|p| normalize_path(&p))
                .unwrap_or(server_defaults.ws_path),
            health_port: parse_or(&get, "HEALTH_PORT", server_defaults.health_port),
        };

        let broadcast = BroadcastSettings {
            viewer_queue_capacity: parse_or(
                &get,
                "VIEWER_QUEUE_CAPACITY",
                BroadcastSettings::default().viewer_queue_capacity,
            )
            .max(1),
        };

        let storage = match get("STORAGE_BACKEND").map(|s| s.trim().to_lowercase()) {
            None => StorageSettings::Sqlite {
                path: sqlite_path(&get),
            },
            Some(backend) if backend == "sqlite" => StorageSettings::Sqlite {
                path: sqlite_path(&get),
            },
            Some(backend) if backend == "memory" => StorageSettings::Memory,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "STORAGE_BACKEND".to_string(),
                    value: other,
                });
            }
        };

        Ok(Self {
            feed,
            synthetic,
            server,
            broadcast,
            storage,
        })
    }

    /// Full upstream URL including the token, if one is configured.
    #[must_use]
    pub fn feed_url_with_token(&self) -> Option<String> {
        self.feed
            .token
            .as_ref()
            .map(|token| format!("{}?token={}", self.feed.url, token.expose()))
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has an unusable value.
    #[error("invalid value {value:?} for {key}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
    },
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

fn parse_opt<F, T>(get: &F, key: &str) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    get(key).and_then(|v| v.trim().parse().ok())
}

fn parse_or<F, T>(get: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    parse_opt(get, key).unwrap_or(default)
}

fn sqlite_path<F>(get: &F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    get("SQLITE_FILE").map_or_else(
        || PathBuf::from("data/hourly.sqlite"),
        PathBuf::from,
    )
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim();
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}
