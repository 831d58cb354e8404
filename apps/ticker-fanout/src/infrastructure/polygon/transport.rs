//! WebSocket Transport
//!
//! [`UpstreamTransport`] over `tokio-tungstenite`. Each opened link gets
//! one writer task that owns the sink and one reader task that owns the
//! stream; they talk to the connector only through channels.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::application::ports::{LinkEvent, TransportError, UpstreamLink, UpstreamTransport};

/// Inbound buffer per link.
const INBOUND_CAPACITY: usize = 256;

/// Transport that dials a WebSocket URL.
#[derive(Debug, Clone)]
pub struct TungsteniteTransport {
    url: String,
}

impl TungsteniteTransport {
    /// Create a transport for `url`.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Endpoint URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl UpstreamTransport for TungsteniteTransport {
    async fn open(&self) -> Result<UpstreamLink, TransportError> {
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(TransportError::InvalidEndpoint(self.url.clone()));
        }

        tracing::debug!(url = %self.url, "Dialing upstream");
        let (ws_stream, _response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        let (mut write, mut read) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::channel::<LinkEvent>(INBOUND_CAPACITY);

        tokio::spawn(async move {
            while let Some(text) = outbound_rx.recv().await {
                if let Err(e) = write.send(Message::Text(text.into())).await {
                    tracing::debug!(error = %e, "Upstream write failed");
                    return;
                }
            }
            let _ = write.send(Message::Close(None)).await;
        });

        tokio::spawn(async move {
            loop {
                let event = match read.next().await {
                    Some(Ok(Message::Text(text))) => LinkEvent::Frame(text.as_str().to_owned()),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        let _ = inbound_tx.send(LinkEvent::Error(e.to_string())).await;
                        break;
                    }
                };
                if inbound_tx.send(event).await.is_err() {
                    return;
                }
            }
            let _ = inbound_tx.send(LinkEvent::Closed).await;
        });

        Ok(UpstreamLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}
