//! Price Stream Hub Binary
//!
//! Starts the tick ingestion, aggregation and viewer fan-out service.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin price-stream-hub
//! ```
//!
//! # Environment Variables
//!
//! ## Feed
//! - `FINNHUB_KEY`: Upstream access token (upstream feed idles without it)
//! - `USE_MOCK_DATA`: "true" to run the synthetic generator instead
//! - `FEED_URL`, `FEED_SYMBOLS`, `FEED_RECONNECT_DELAY_MS`, `FEED_TIMESTAMP_UNIT`
//! - `MOCK_INTERVAL_MS`, `MOCK_BASE_PRICE`, `MOCK_PRICE_SPREAD`
//!
//! ## Servers
//! - `PORT`: Viewer WebSocket port (default: 3001)
//! - `WS_PATH`: Viewer WebSocket path (default: /ws)
//! - `HEALTH_PORT`: Health/metrics HTTP port, 0 disables (default: 8082)
//! - `VIEWER_QUEUE_CAPACITY`: Per-viewer queue size (default: 1024)
//!
//! ## Storage
//! - `STORAGE_BACKEND`: sqlite | memory (default: sqlite)
//! - `SQLITE_FILE`: Database path (default: data/hourly.sqlite)
//!
//! ## Telemetry
//! - `RUST_LOG`: Filter directives (default: price_stream_hub=info)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SERVICE_NAME`

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use price_stream_hub::application::ports::TickPublisher;
use price_stream_hub::infrastructure::broadcast::{BroadcastConfig, BroadcastHub};
use price_stream_hub::infrastructure::feed::{
    FeedClient, FeedClientConfig, SourceHandle, SyntheticFeed,
};
use price_stream_hub::infrastructure::health::{HealthServer, HealthServerState};
use price_stream_hub::infrastructure::persistence::open_store;
use price_stream_hub::infrastructure::telemetry;
use price_stream_hub::infrastructure::viewer::ViewerServer;
use price_stream_hub::{
    FeedEvent, FeedSource, FeedStatus, HourlyAggregator, HubConfig, Normalizer, StorageSettings,
    TickPipeline, init_metrics,
};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Capacity of the source → pipeline event channel.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting price stream hub");

    let _metrics_handle = init_metrics();

    let config = HubConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Aggregation
    let store = open_store(&config.storage).context("failed to open aggregate store")?;
    let aggregator = Arc::new(HourlyAggregator::new(store));

    // Viewer fan-out
    let broadcast_hub = Arc::new(BroadcastHub::new(BroadcastConfig::from(&config.broadcast)));
    let viewer_addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let viewer_server = ViewerServer::bind(
        viewer_addr,
        config.server.ws_path.clone(),
        Arc::clone(&broadcast_hub),
    )
    .await
    .context("viewer server could not start")?;

    // Pipeline
    let source = select_source(&config);
    let feed_status = Arc::new(FeedStatus::new(source));
    let publisher: Arc<dyn TickPublisher> = Arc::clone(&broadcast_hub) as Arc<dyn TickPublisher>;
    let pipeline = Arc::new(TickPipeline::new(
        Normalizer::new(config.feed.timestamp_unit),
        Arc::clone(&aggregator),
        publisher,
        Arc::clone(&feed_status),
    ));

    let (event_tx, event_rx) = mpsc::channel::<FeedEvent>(EVENT_CHANNEL_CAPACITY);
    let pipeline_cancel = CancellationToken::new();
    let mut pipeline_task = {
        let pipeline = Arc::clone(&pipeline);
        let cancel = pipeline_cancel.clone();
        tokio::spawn(async move { pipeline.run(event_rx, cancel).await })
    };

    // Servers
    let viewer_shutdown = shutdown_token.clone();
    let viewer_task = tokio::spawn(async move {
        if let Err(e) = viewer_server.run(viewer_shutdown).await {
            tracing::error!(error = %e, "Viewer server error");
        }
    });

    let health_task = if config.server.health_port == 0 {
        tracing::info!("Health server disabled");
        None
    } else {
        let health_state = Arc::new(HealthServerState::new(
            env!("CARGO_PKG_VERSION").to_string(),
            Arc::clone(&feed_status),
            Arc::clone(&broadcast_hub),
            Arc::clone(&aggregator),
        ));
        let health_server = HealthServer::new(
            config.server.health_port,
            health_state,
            shutdown_token.clone(),
        );
        Some(tokio::spawn(async move {
            if let Err(e) = health_server.run().await {
                tracing::error!(error = %e, "Health server error");
            }
        }))
    };

    // Tick source last, so nothing it emits is missed
    let source_handle = spawn_source(&config, source, event_tx, shutdown_token.child_token());

    tracing::info!(source = source.as_str(), "Price stream hub ready");

    await_shutdown(shutdown_token).await;

    source_handle.stop().await;

    // The source dropped its sender, so the pipeline finishes queued events
    // and pending merges on its own.
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut pipeline_task)
        .await
        .is_err()
    {
        tracing::warn!(
            pending_merges = pipeline.pending_merges(),
            "Pipeline did not drain in time"
        );
        pipeline_cancel.cancel();
        pipeline_task.abort();
    }

    let _ = viewer_task.await;
    if let Some(task) = health_task {
        let _ = task.await;
    }

    tracing::info!("Price stream hub stopped");
    Ok(())
}

/// Decide which tick source runs.
fn select_source(config: &HubConfig) -> FeedSource {
    if config.feed.mock {
        FeedSource::Synthetic
    } else if config.feed.token.is_some() {
        FeedSource::Upstream
    } else {
        FeedSource::Disabled
    }
}

/// Spawn the selected tick source.
fn spawn_source(
    config: &HubConfig,
    source: FeedSource,
    event_tx: mpsc::Sender<FeedEvent>,
    cancel: CancellationToken,
) -> SourceHandle {
    match source {
        FeedSource::Synthetic => {
            let feed = Arc::new(SyntheticFeed::new(
                config.feed.symbols.clone(),
                config.synthetic.clone(),
                config.feed.timestamp_unit,
                event_tx,
                cancel.clone(),
            ));
            SourceHandle::spawn("synthetic", cancel, feed.run())
        }
        FeedSource::Upstream | FeedSource::Disabled => {
            let client = Arc::new(FeedClient::new(
                FeedClientConfig::from(config),
                event_tx,
                cancel.clone(),
            ));
            SourceHandle::spawn("upstream", cancel, client.run())
        }
    }
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &HubConfig) {
    let storage = match &config.storage {
        StorageSettings::Sqlite { path } => path.display().to_string(),
        StorageSettings::Memory => "memory".to_string(),
    };
    tracing::info!(
        mock = config.feed.mock,
        token_present = config.feed.token.is_some(),
        symbols = ?config.feed.symbols,
        timestamp_unit = config.feed.timestamp_unit.as_str(),
        port = config.server.port,
        ws_path = %config.server.ws_path,
        health_port = config.server.health_port,
        storage = %storage,
        "Configuration loaded"
    );
    tracing::debug!(
        feed_url = %config.feed.url,
        reconnect_delay_ms = config.feed.reconnect_delay.as_millis(),
        "Upstream endpoint"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
