//! Synthetic Tick Generator
//!
//! Emits one random trade record per interval in the same raw shape the
//! upstream feed delivers, so ticks flow through the normalizer exactly like
//! real ones. Used for local development and demos.

use std::sync::Arc;

use chrono::Utc;
use rand::Rng;
use rand::seq::IndexedRandom;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::client::FeedError;
use crate::domain::feed::FeedEvent;
use crate::domain::normalize::TimestampUnit;
use crate::infrastructure::config::SyntheticSettings;

/// Random tick source.
pub struct SyntheticFeed {
    symbols: Vec<String>,
    settings: SyntheticSettings,
    unit: TimestampUnit,
    event_tx: mpsc::Sender<FeedEvent>,
    cancel: CancellationToken,
}

impl SyntheticFeed {
    /// Create a new generator over `symbols`.
    #[must_use]
    pub const fn new(
        symbols: Vec<String>,
        settings: SyntheticSettings,
        unit: TimestampUnit,
        event_tx: mpsc::Sender<FeedEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            symbols,
            settings,
            unit,
            event_tx,
            cancel,
        }
    }

    /// Emit ticks until cancelled. The first tick fires one interval after start.
    ///
    /// # Errors
    ///
    /// Returns `FeedError::ChannelClosed` if the pipeline goes away.
    pub async fn run(self: Arc<Self>) -> Result<(), FeedError> {
        if self.symbols.is_empty() {
            tracing::warn!("No symbols configured; synthetic feed will not emit");
            self.cancel.cancelled().await;
            return Ok(());
        }

        let period = self.settings.interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval_ms = period.as_millis(),
            symbols = ?self.symbols,
            "Synthetic feed started"
        );
        self.emit(FeedEvent::Subscribed {
            symbols: self.symbols.clone(),
        })
        .await?;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::info!("Synthetic feed stopped");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    if let Some(record) = self.generate() {
                        self.emit(FeedEvent::Trade(record)).await?;
                    }
                }
            }
        }
    }

    /// Build one raw trade record: `{s, p, t, v}`. `None` when no symbols
    /// are configured.
    #[must_use]
    pub fn generate(&self) -> Option<Value> {
        let mut rng = rand::rng();
        let symbol = self.symbols.choose(&mut rng)?;
        let raw_price = self.settings.base_price + rng.random::<f64>() * self.settings.spread;
        let price = (raw_price * 100.0).round() / 100.0;
        let volume = rng.random::<f64>() * 5.0;

        Some(json!({
            "s": symbol,
            "p": price,
            "t": self.unit.encode(Utc::now()),
            "v": volume,
        }))
    }

    async fn emit(&self, event: FeedEvent) -> Result<(), FeedError> {
        self.event_tx
            .send(event)
            .await
            .map_err(|_| FeedError::ChannelClosed)
    }
}
