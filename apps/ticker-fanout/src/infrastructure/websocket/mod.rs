//! Client WebSocket Server
//!
//! Accepts downstream clients on `GET /ws`. Each socket is split into a
//! writer task that drains the session queue and a reader loop that feeds
//! client requests to the [`ClientGateway`].
//!
//! # Protocol
//!
//! Client to server:
//!
//! ```json
//! {"type":"subscribe-tickers","symbols":["AAPL","MSFT"]}
//! {"type":"unsubscribe-tickers","symbols":["MSFT"]}
//! ```
//!
//! Server to client:
//!
//! ```json
//! {"type":"batch-update","updates":[{"ticker":"AAPL","price":151.0,...}]}
//! {"type":"status","connected":false,"error":"connection reset"}
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::broadcast::ClientGateway;

#[derive(Clone)]
struct SocketState {
    gateway: Arc<ClientGateway>,
    cancel: CancellationToken,
}

/// Downstream WebSocket server.
pub struct ClientServer {
    port: u16,
    gateway: Arc<ClientGateway>,
    cancel: CancellationToken,
}

impl ClientServer {
    /// Create a new client server.
    #[must_use]
    pub const fn new(port: u16, gateway: Arc<ClientGateway>, cancel: CancellationToken) -> Self {
        Self {
            port,
            gateway,
            cancel,
        }
    }

    /// Build the `/ws` router.
    #[must_use]
    pub fn router(gateway: Arc<ClientGateway>, cancel: CancellationToken) -> Router {
        Router::new()
            .route("/ws", get(upgrade_handler))
            .with_state(SocketState { gateway, cancel })
    }

    /// Bind the configured port and serve until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `ServerError` if binding fails or the server stops with an
    /// error.
    pub async fn run(self) -> Result<(), ServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindFailed(self.port, e.to_string()))?;

        self.serve(listener).await
    }

    /// Serve on an already bound listener until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::ServerFailed` if the server stops with an error.
    pub async fn serve(self, listener: TcpListener) -> Result<(), ServerError> {
        let port = listener.local_addr().map_or(self.port, |addr| addr.port());
        tracing::info!(port, "Client WebSocket server listening");

        let app = Self::router(self.gateway, self.cancel.clone());
        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| ServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Client WebSocket server stopped");
        Ok(())
    }
}

async fn upgrade_handler(ws: WebSocketUpgrade, State(state): State<SocketState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: SocketState) {
    let session = state.gateway.on_client_connect();
    let (mut ws_tx, mut ws_rx) = socket.split();

    let queue = Arc::clone(&session.queue);
    let send_task = tokio::spawn(async move {
        while let Some(frame) = queue.next().await {
            if ws_tx
                .send(Message::Text(frame.payload.to_string().into()))
                .await
                .is_err()
            {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    loop {
        tokio::select! {
            () = state.cancel.cancelled() => break,
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    state.gateway.on_client_message(session.id, text.as_str()).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(session = session.id, error = %e, "Client socket error");
                    break;
                }
            },
        }
    }

    state.gateway.on_client_disconnect(session.id).await;
    if let Err(e) = send_task.await
        && e.is_panic()
    {
        tracing::error!(session = session.id, error = %e, "Client writer panicked");
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Client server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}
