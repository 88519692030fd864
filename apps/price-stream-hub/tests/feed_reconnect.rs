//! Upstream Feed Integration Tests
//!
//! Runs the feed client against a local WebSocket server standing in for
//! the upstream provider.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use price_stream_hub::{FeedClient, FeedClientConfig, FeedEvent};

const SYMBOLS: [&str; 2] = ["ETHUSDC", "ETHBTC"];
const RECONNECT_DELAY: Duration = Duration::from_millis(300);

async fn accept(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (stream, _) = timeout(Duration::from_secs(5), listener.accept())
        .await
        .unwrap()
        .unwrap();
    tokio_tungstenite::accept_async(stream).await.unwrap()
}

async fn read_subscriptions(ws: &mut WebSocketStream<TcpStream>) -> Vec<String> {
    let mut symbols = Vec::new();
    while symbols.len() < SYMBOLS.len() {
        let msg = timeout(Duration::from_secs(5), ws.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        if let Message::Text(text) = msg {
            let json: Value = serde_json::from_str(&text).unwrap();
            assert_eq!(json["type"], "subscribe");
            symbols.push(json["symbol"].as_str().unwrap().to_string());
        }
    }
    symbols
}

async fn next_event(rx: &mut mpsc::Receiver<FeedEvent>) -> FeedEvent {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap()
}

async fn start_client(
    listener: &TcpListener,
) -> (
    mpsc::Receiver<FeedEvent>,
    CancellationToken,
    tokio::task::JoinHandle<()>,
) {
    let addr = listener.local_addr().unwrap();
    let url = format!("ws://{addr}");
    let config = FeedClientConfig::new(
        Some(format!("{url}?token=test-token")),
        url,
        SYMBOLS.iter().map(ToString::to_string).collect(),
    )
    .with_reconnect_delay(RECONNECT_DELAY);

    let (tx, rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    let client = Arc::new(FeedClient::new(config, tx, cancel.clone()));
    let handle = tokio::spawn(async move {
        client.run().await.unwrap();
    });
    (rx, cancel, handle)
}

#[tokio::test]
async fn subscribes_to_every_symbol_and_forwards_trades() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let (mut events, cancel, handle) = start_client(&listener).await;

    let mut upstream = accept(&listener).await;
    assert_eq!(read_subscriptions(&mut upstream).await, SYMBOLS);

    assert_eq!(next_event(&mut events).await, FeedEvent::Connecting);
    assert_eq!(next_event(&mut events).await, FeedEvent::Connected);
    assert!(matches!(
        next_event(&mut events).await,
        FeedEvent::Subscribed { symbols } if symbols == SYMBOLS
    ));

    upstream
        .send(Message::Text(
            r#"{"type":"trade","data":[{"s":"ETHUSDC","p":2001.5,"t":1714566615123,"v":0.4},{"s":"ETHBTC","p":0.05,"t":1714566615124,"v":1.0}]}"#
                .into(),
        ))
        .await
        .unwrap();

    let FeedEvent::Trade(first) = next_event(&mut events).await else {
        panic!("expected trade");
    };
    let FeedEvent::Trade(second) = next_event(&mut events).await else {
        panic!("expected trade");
    };
    assert_eq!(first["s"], "ETHUSDC");
    assert_eq!(second["s"], "ETHBTC");

    cancel.cancel();
    timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn malformed_frame_keeps_the_connection_open() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let (mut events, cancel, handle) = start_client(&listener).await;

    let mut upstream = accept(&listener).await;
    read_subscriptions(&mut upstream).await;
    for _ in 0..3 {
        next_event(&mut events).await;
    }

    upstream.send(Message::Text("{not json".into())).await.unwrap();
    upstream
        .send(Message::Text(r#"{"type":"ping"}"#.into()))
        .await
        .unwrap();
    upstream
        .send(Message::Text(
            r#"{"type":"trade","data":[{"s":"ETHUSDT","p":2002.0}]}"#.into(),
        ))
        .await
        .unwrap();

    // The next event is the trade, not a disconnect
    let FeedEvent::Trade(record) = next_event(&mut events).await else {
        panic!("expected trade after malformed frame");
    };
    assert_eq!(record["s"], "ETHUSDT");

    cancel.cancel();
    timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn reconnects_after_fixed_delay_and_resubscribes() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let (mut events, cancel, handle) = start_client(&listener).await;

    let mut upstream = accept(&listener).await;
    read_subscriptions(&mut upstream).await;
    for _ in 0..3 {
        next_event(&mut events).await;
    }

    upstream.close(None).await.unwrap();
    let closed_at = Instant::now();
    drop(upstream);

    assert_eq!(next_event(&mut events).await, FeedEvent::Disconnected);
    assert_eq!(
        next_event(&mut events).await,
        FeedEvent::Reconnecting { attempt: 1 }
    );

    let mut upstream = accept(&listener).await;
    assert!(closed_at.elapsed() >= RECONNECT_DELAY);
    assert_eq!(read_subscriptions(&mut upstream).await, SYMBOLS);

    assert_eq!(next_event(&mut events).await, FeedEvent::Connecting);
    assert_eq!(next_event(&mut events).await, FeedEvent::Connected);
    assert!(matches!(
        next_event(&mut events).await,
        FeedEvent::Subscribed { .. }
    ));

    cancel.cancel();
    timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn failed_handshakes_keep_retrying_without_backoff() {
    // Bind then drop to get a port nobody listens on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let url = format!("ws://{addr}");
    let config = FeedClientConfig::new(Some(url.clone()), url, vec!["ETHUSDC".to_string()])
        .with_reconnect_delay(Duration::from_millis(50));
    let (tx, mut events) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(Arc::new(FeedClient::new(config, tx, cancel.clone())).run());

    let mut attempts = Vec::new();
    let mut last = None;
    while attempts.len() < 3 {
        match next_event(&mut events).await {
            FeedEvent::Reconnecting { attempt } => {
                let now = Instant::now();
                if let Some(prev) = last {
                    // Fixed delay: gaps stay close to the configured value
                    assert!(now.duration_since(prev) < Duration::from_secs(1));
                }
                last = Some(now);
                attempts.push(attempt);
            }
            FeedEvent::Connecting | FeedEvent::Disconnected => {}
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert_eq!(attempts, vec![1, 2, 3]);

    cancel.cancel();
    timeout(Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}
