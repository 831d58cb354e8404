//! Shared fixtures: a channel-backed upstream that stands in for Polygon.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;

use ticker_fanout::application::ports::TransportError;
use ticker_fanout::infrastructure::polygon::Credentials;
use ticker_fanout::{FanoutConfig, LinkEvent, UpstreamLink, UpstreamTransport};

/// Provider side of one opened link.
pub struct ServerEnd {
    /// Commands written by the connector.
    pub sent: mpsc::UnboundedReceiver<String>,
    /// Frames and lifecycle events pushed to the connector.
    pub feed: mpsc::Sender<LinkEvent>,
}

impl ServerEnd {
    /// Push a text frame.
    pub async fn frame(&self, text: impl Into<String>) {
        self.feed.send(LinkEvent::Frame(text.into())).await.unwrap();
    }

    /// Close the link from the provider side.
    pub async fn close(&self) {
        self.feed.send(LinkEvent::Closed).await.unwrap();
    }

    /// Commands written so far.
    pub fn drain(&mut self) -> Vec<String> {
        std::iter::from_fn(|| self.sent.try_recv().ok()).collect()
    }
}

/// Upstream transport whose links are handed to the test.
pub struct FakeUpstream {
    links: mpsc::UnboundedSender<ServerEnd>,
    failures: AtomicUsize,
    opens: Mutex<Vec<Instant>>,
}

impl FakeUpstream {
    /// Create the transport and the receiver of opened links.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerEnd>) {
        let (links, rx) = mpsc::unbounded_channel();
        (
            Self {
                links,
                failures: AtomicUsize::new(0),
                opens: Mutex::new(Vec::new()),
            },
            rx,
        )
    }

    /// Refuse the next `n` opens.
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Times at which `open` was called.
    pub fn opens(&self) -> Vec<Instant> {
        self.opens.lock().clone()
    }
}

#[async_trait]
impl UpstreamTransport for FakeUpstream {
    async fn open(&self) -> Result<UpstreamLink, TransportError> {
        self.opens.lock().push(Instant::now());

        let refused = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportError::ConnectionFailed("refused".to_string()));
        }

        let (outbound, sent) = mpsc::unbounded_channel();
        let (feed, inbound) = mpsc::channel(64);
        let _ = self.links.send(ServerEnd { sent, feed });
        Ok(UpstreamLink { outbound, inbound })
    }
}

/// Configuration with a test key and defaults elsewhere.
pub fn test_config() -> FanoutConfig {
    let mut config = FanoutConfig::default();
    config.upstream.credentials = Credentials::new("test-key");
    config
}

/// JSON frame holding one `AM` aggregate per `(symbol, close)`.
pub fn aggregate_frame(bars: &[(&str, f64)]) -> String {
    let events: Vec<serde_json::Value> = bars
        .iter()
        .map(|(symbol, close)| {
            serde_json::json!({
                "ev": "AM",
                "sym": symbol,
                "o": 100.0,
                "h": close.max(100.0),
                "l": close.min(100.0),
                "c": close,
                "v": 1000,
                "s": 1_700_000_000_000_i64,
            })
        })
        .collect();
    serde_json::Value::Array(events).to_string()
}

/// Let every runnable task finish. Under a paused clock the runtime only
/// advances time once nothing else can run.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
