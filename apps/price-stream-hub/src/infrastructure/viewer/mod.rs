//! Viewer WebSocket Server
//!
//! Accepts browser connections on the configured path and streams every
//! tick published to the broadcast hub. Viewers never send anything
//! meaningful; inbound frames are read only to notice the close.
//!
//! # Per-connection tasks
//!
//! ```text
//! BroadcastHub ──queue──► forward task ──► socket sink
//!                                 ▲
//! socket stream ──► read loop ────┘ (close / shutdown ends both)
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::broadcast::SharedBroadcastHub;

/// Time a closing connection gets to flush queued ticks and the close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

struct ViewerState {
    hub: SharedBroadcastHub,
    cancel: CancellationToken,
}

/// Build the viewer router serving `path`.
pub fn router(path: &str, hub: SharedBroadcastHub, cancel: CancellationToken) -> Router {
    let state = Arc::new(ViewerState { hub, cancel });
    Router::new()
        .route(path, get(ws_handler))
        .with_state(state)
}

/// Viewer WebSocket server bound to its listening socket.
pub struct ViewerServer {
    listener: TcpListener,
    path: String,
    hub: SharedBroadcastHub,
}

impl ViewerServer {
    /// Bind the listening socket. Failing here is fatal for the process.
    ///
    /// # Errors
    ///
    /// Returns `ViewerServerError::BindFailed` if the address is unavailable.
    pub async fn bind(
        addr: SocketAddr,
        path: impl Into<String>,
        hub: SharedBroadcastHub,
    ) -> Result<Self, ViewerServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ViewerServerError::BindFailed(addr, e.to_string()))?;

        Ok(Self {
            listener,
            path: path.into(),
            hub,
        })
    }

    /// Address actually bound (resolves port 0).
    ///
    /// # Errors
    ///
    /// Returns an error if the socket address cannot be read.
    pub fn local_addr(&self) -> Result<SocketAddr, ViewerServerError> {
        self.listener
            .local_addr()
            .map_err(|e| ViewerServerError::ServerFailed(e.to_string()))
    }

    /// Serve viewers until `cancel` fires. Open connections receive a close
    /// frame on shutdown.
    ///
    /// # Errors
    ///
    /// Returns `ViewerServerError::ServerFailed` on a fatal server error.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), ViewerServerError> {
        let addr = self.local_addr()?;
        let app = router(&self.path, self.hub, cancel.clone());

        tracing::info!(%addr, path = %self.path, "Viewer server listening");

        axum::serve(self.listener, app)
            .with_graceful_shutdown(cancel.cancelled_owned())
            .await
            .map_err(|e| ViewerServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Viewer server stopped");
        Ok(())
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<ViewerState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<ViewerState>) {
    let (id, mut queue) = state.hub.register();
    tracing::info!(connection = %id, "Viewer connected");

    let (mut sender, mut receiver) = socket.split();

    let cancel = state.cancel.clone();
    let mut forward_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
                payload = queue.recv() => {
                    let Some(payload) = payload else {
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    };
                    if sender.send(Message::Text(payload.to_string().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    loop {
        tokio::select! {
            () = state.cancel.cancelled() => break,
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state.hub.unregister(id);
    if tokio::time::timeout(CLOSE_GRACE, &mut forward_task).await.is_err() {
        forward_task.abort();
    }
    tracing::info!(connection = %id, "Viewer disconnected");
}

/// Viewer server errors.
#[derive(Debug, thiserror::Error)]
pub enum ViewerServerError {
    /// Failed to bind the listening socket.
    #[error("failed to bind viewer server to {0}: {1}")]
    BindFailed(SocketAddr, String),

    /// Server error.
    #[error("viewer server error: {0}")]
    ServerFailed(String),
}
