//! Tick Pipeline
//!
//! Consumes source events, normalizes raw trades, broadcasts the tick, and
//! schedules the hourly merge. Broadcast happens inline so per-viewer order
//! follows source order; merges run on tracked tasks so a failing store never
//! delays the next tick. At most `merge_limit` merges are in flight; once
//! they are all taken, `run` stops reading events until one finishes, pushing
//! back on the source channel.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::aggregator::HourlyAggregator;
use crate::application::ports::TickPublisher;
use crate::domain::feed::{FeedEvent, FeedStatus};
use crate::domain::normalize::Normalizer;
use crate::domain::trade::Trade;
use crate::infrastructure::metrics;

/// Default bound on concurrently running merges.
pub const DEFAULT_MERGE_LIMIT: usize = 1024;

/// Wires a tick source to aggregation and viewer fan-out.
pub struct TickPipeline {
    normalizer: Normalizer,
    aggregator: Arc<HourlyAggregator>,
    publisher: Arc<dyn TickPublisher>,
    status: Arc<FeedStatus>,
    merges: TaskTracker,
    merge_permits: Arc<Semaphore>,
}

impl TickPipeline {
    /// Create a new pipeline.
    #[must_use]
    pub fn new(
        normalizer: Normalizer,
        aggregator: Arc<HourlyAggregator>,
        publisher: Arc<dyn TickPublisher>,
        status: Arc<FeedStatus>,
    ) -> Self {
        Self {
            normalizer,
            aggregator,
            publisher,
            status,
            merges: TaskTracker::new(),
            merge_permits: Arc::new(Semaphore::new(DEFAULT_MERGE_LIMIT)),
        }
    }

    /// Bound the number of merges in flight (minimum 1).
    #[must_use]
    pub fn with_merge_limit(mut self, limit: usize) -> Self {
        self.merge_permits = Arc::new(Semaphore::new(limit.max(1)));
        self
    }

    /// Consume events until the channel closes or `cancel` fires, then wait
    /// for in-flight merges.
    pub async fn run(&self, mut events: mpsc::Receiver<FeedEvent>, cancel: CancellationToken) {
        loop {
            if self.merge_permits.available_permits() == 0 {
                tracing::debug!(
                    pending_merges = self.pending_merges(),
                    "Merge limit reached; waiting before reading more events"
                );
            }
            let permit = tokio::select! {
                () = cancel.cancelled() => {
                    tracing::info!("Tick pipeline cancelled");
                    break;
                }
                permit = Arc::clone(&self.merge_permits).acquire_owned() => {
                    let Ok(permit) = permit else { break };
                    permit
                }
            };

            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::info!("Tick pipeline cancelled");
                    break;
                }
                event = events.recv() => {
                    match event {
                        Some(event) => self.dispatch(event, Some(permit)),
                        None => {
                            tracing::info!("Tick source closed");
                            break;
                        }
                    }
                }
            }
        }

        self.drain().await;
    }

    /// Apply one source event.
    pub fn handle_event(&self, event: FeedEvent) {
        self.dispatch(event, None);
    }

    fn dispatch(&self, event: FeedEvent, permit: Option<OwnedSemaphorePermit>) {
        self.status.apply(&event);

        match event {
            FeedEvent::Trade(raw) => {
                metrics::record_trade_received(self.status.source());
                let permit = permit.or_else(|| self.try_permit());
                self.process_with(&raw, permit);
            }
            FeedEvent::Connecting => tracing::debug!("Feed connecting"),
            FeedEvent::Connected => tracing::info!("Feed connected"),
            FeedEvent::Subscribed { symbols } => {
                tracing::info!(symbols = ?symbols, "Feed subscribed");
            }
            FeedEvent::Disconnected => tracing::warn!("Feed disconnected"),
            FeedEvent::Reconnecting { attempt } => {
                metrics::record_reconnect();
                tracing::info!(attempt, "Feed reconnecting");
            }
        }
    }

    /// Normalize a raw record, broadcast it, and schedule its merge.
    ///
    /// Must be called from within a tokio runtime. Direct calls take a merge
    /// slot when one is free but never wait for one.
    pub fn process(&self, raw: &Value) -> Trade {
        self.process_with(raw, self.try_permit())
    }

    fn try_permit(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.merge_permits).try_acquire_owned().ok()
    }

    fn process_with(&self, raw: &Value, permit: Option<OwnedSemaphorePermit>) -> Trade {
        let trade = self.normalizer.normalize(raw);

        let reached = self.publisher.publish(&trade.to_tick_event());
        tracing::trace!(symbol = %trade.symbol, price = trade.price, reached, "Tick broadcast");

        let aggregator = Arc::clone(&self.aggregator);
        let pending = trade.clone();
        self.merges.spawn(async move {
            let _permit = permit;
            if let Err(e) = aggregator.record(&pending).await {
                tracing::error!(
                    error = %e,
                    symbol = %pending.symbol,
                    price = pending.price,
                    "Hourly merge failed; contribution dropped"
                );
            }
        });

        trade
    }

    /// Wait for every scheduled merge to finish.
    pub async fn drain(&self) {
        self.merges.close();
        self.merges.wait().await;
        self.merges.reopen();
    }

    /// Number of merges still running.
    #[must_use]
    pub fn pending_merges(&self) -> usize {
        self.merges.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use super::*;
    use crate::application::ports::AggregateStore;
    use crate::domain::aggregate::BucketKey;
    use crate::application::ports::{MockAggregateStore, MockTickPublisher, StoreError};
    use crate::domain::aggregate::HourlyBucket;
    use crate::domain::feed::{FeedSource, FeedState};
    use crate::domain::normalize::TimestampUnit;

    fn pipeline(store: MockAggregateStore, publisher: MockTickPublisher) -> TickPipeline {
        TickPipeline::new(
            Normalizer::new(TimestampUnit::Millis),
            Arc::new(HourlyAggregator::new(Arc::new(store))),
            Arc::new(publisher),
            Arc::new(FeedStatus::new(FeedSource::Upstream)),
        )
    }

    #[tokio::test]
    async fn broadcast_happens_even_when_merge_fails() {
        let mut store = MockAggregateStore::new();
        store
            .expect_merge()
            .times(1)
            .returning(|_, _, _| Err(StoreError::Database("locked".to_string())));

        let mut publisher = MockTickPublisher::new();
        publisher
            .expect_publish()
            .withf(|event| event.symbol == "ETHUSDC" && (event.price - 2000.0).abs() < 1e-9)
            .times(1)
            .return_const(1_usize);

        let pipeline = pipeline(store, publisher);
        pipeline.process(&json!({"s": "ETHUSDC", "p": 2000.0, "t": 1_714_566_615_000_i64}));
        pipeline.drain().await;

        assert_eq!(pipeline.pending_merges(), 0);
    }

    #[tokio::test]
    async fn trade_event_is_normalized_and_merged() {
        let ts = Utc.timestamp_millis_opt(1_714_566_615_000).unwrap();

        let mut store = MockAggregateStore::new();
        store
            .expect_merge()
            .withf(move |key, price, count| {
                key.pair == "ETHBTC"
                    && key.hour_start == crate::domain::aggregate::hour_start(ts)
                    && (*price - 0.052).abs() < 1e-12
                    && *count == 1
            })
            .times(1)
            .returning(|key, price, count| Ok(HourlyBucket::first(key, price, count)));

        let mut publisher = MockTickPublisher::new();
        publisher.expect_publish().times(1).return_const(0_usize);

        let pipeline = pipeline(store, publisher);
        pipeline.handle_event(FeedEvent::Trade(
            json!({"symbol": "ETHBTC", "price": "0.052", "timestamp": 1_714_566_615_000_i64}),
        ));
        pipeline.drain().await;
    }

    #[tokio::test]
    async fn lifecycle_events_update_status_without_touching_ports() {
        let store = MockAggregateStore::new();
        let publisher = MockTickPublisher::new();
        let pipeline = pipeline(store, publisher);

        pipeline.handle_event(FeedEvent::Connecting);
        assert_eq!(pipeline.status.state(), FeedState::Connecting);

        pipeline.handle_event(FeedEvent::Subscribed {
            symbols: vec!["ETHUSDC".to_string()],
        });
        assert_eq!(pipeline.status.state(), FeedState::Subscribed);

        pipeline.handle_event(FeedEvent::Reconnecting { attempt: 2 });
        assert_eq!(pipeline.status.reconnect_attempts(), 2);
    }

    #[tokio::test]
    async fn run_stops_when_channel_closes() {
        let mut store = MockAggregateStore::new();
        store
            .expect_merge()
            .times(2)
            .returning(|key, price, count| Ok(HourlyBucket::first(key, price, count)));
        let mut publisher = MockTickPublisher::new();
        publisher.expect_publish().times(2).return_const(1_usize);

        let pipeline = pipeline(store, publisher);
        let (tx, rx) = mpsc::channel(8);
        tx.send(FeedEvent::Trade(json!({"s": "ETHUSDC", "p": 1.0}))).await.unwrap();
        tx.send(FeedEvent::Trade(json!({"s": "ETHUSDT", "p": 2.0}))).await.unwrap();
        drop(tx);

        pipeline.run(rx, CancellationToken::new()).await;
        assert_eq!(pipeline.status.trades_received(), 2);
    }

    #[derive(Default)]
    struct SlowStore {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        merged: AtomicUsize,
    }

    #[async_trait]
    impl AggregateStore for SlowStore {
        async fn merge(
            &self,
            key: &BucketKey,
            price: f64,
            count: u64,
        ) -> Result<HourlyBucket, StoreError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.merged.fetch_add(1, Ordering::SeqCst);
            Ok(HourlyBucket::first(key, price, count))
        }

        async fn get(&self, _key: &BucketKey) -> Result<Option<HourlyBucket>, StoreError> {
            Ok(None)
        }

        async fn buckets_for_pair(&self, _pair: &str) -> Result<Vec<HourlyBucket>, StoreError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn slow_store_caps_merges_in_flight() {
        let store = Arc::new(SlowStore::default());
        let mut publisher = MockTickPublisher::new();
        publisher.expect_publish().times(12).return_const(1_usize);

        let pipeline = TickPipeline::new(
            Normalizer::new(TimestampUnit::Millis),
            Arc::new(HourlyAggregator::new(Arc::clone(&store) as Arc<dyn AggregateStore>)),
            Arc::new(publisher),
            Arc::new(FeedStatus::new(FeedSource::Synthetic)),
        )
        .with_merge_limit(2);

        let (tx, rx) = mpsc::channel(32);
        for i in 0..12 {
            tx.send(FeedEvent::Trade(json!({"s": "ETHUSDC", "p": f64::from(i)})))
                .await
                .unwrap();
        }
        drop(tx);

        pipeline.run(rx, CancellationToken::new()).await;

        assert_eq!(store.merged.load(Ordering::SeqCst), 12);
        assert!(store.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pipeline.pending_merges(), 0);
    }
}
