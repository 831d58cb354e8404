//! Upstream Connector
//!
//! Owns the single upstream link. It walks the connectivity states
//! `Disconnected -> Connecting -> Authenticating -> Connected`, restores the
//! registry's subscriptions on every successful connect, decodes inbound
//! frames, and reports everything as [`FeedEvent`]s.
//!
//! # Episodes
//!
//! Each connect attempt gets a fresh episode number. Frames, errors, and
//! closes from an older link are ignored, so a late close from a replaced
//! socket can never trigger a second reconnect. [`UpstreamControl::close`]
//! retires the current episode the same way.
//!
//! # Locking
//!
//! Link state sits behind a `parking_lot::Mutex` that is never held across
//! an `.await`. Outbound commands are pushed into the link's unbounded
//! channel while the lock is held, which keeps the auth and resubscribe
//! commands ordered before anything a concurrent `subscribe` writes.
//! Retiring an episode holds the [`BatchGate`] under the same lock; the
//! gate's own mutex is always taken after the state lock.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::auth::Credentials;
use super::codec::JsonCodec;
use super::messages::{ActionRequest, PolygonMessage};
use crate::application::ports::{
    Episode, FeedEvent, FeedEventSender, LinkEvent, UpstreamControl, UpstreamLink,
    UpstreamTransport,
};
use crate::application::services::BatchGate;
use crate::domain::streaming::{ConnectivityState, Symbol};
use crate::domain::subscription::SubscriptionRegistry;
use crate::infrastructure::metrics::{self, LinkEventKind};

/// Default per-symbol channel prefix (minute aggregates).
pub const DEFAULT_CHANNEL_PREFIX: &str = "AM";

// =============================================================================
// Configuration
// =============================================================================

/// Connector configuration.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// Channel prefix prepended to each symbol, e.g. `AM` for `AM.AAPL`.
    pub channel_prefix: String,
    /// API credentials.
    pub credentials: Credentials,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            channel_prefix: DEFAULT_CHANNEL_PREFIX.to_string(),
            credentials: Credentials::missing(),
        }
    }
}

// =============================================================================
// Link State
// =============================================================================

#[derive(Debug, Default)]
struct LinkState {
    connectivity: ConnectivityState,
    outbound: Option<mpsc::UnboundedSender<String>>,
    episode: Episode,
}

// =============================================================================
// Connector
// =============================================================================

/// Polygon upstream connector.
pub struct UpstreamConnector {
    config: ConnectorConfig,
    transport: Arc<dyn UpstreamTransport>,
    registry: Arc<SubscriptionRegistry>,
    gate: Arc<BatchGate>,
    codec: JsonCodec,
    events: FeedEventSender,
    state: Mutex<LinkState>,
    cancel: CancellationToken,
    this: Weak<Self>,
}

impl UpstreamConnector {
    /// Create a disconnected connector.
    #[must_use]
    pub fn new(
        config: ConnectorConfig,
        transport: Arc<dyn UpstreamTransport>,
        registry: Arc<SubscriptionRegistry>,
        gate: Arc<BatchGate>,
        events: FeedEventSender,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        if config.credentials.is_missing() {
            tracing::warn!("POLYGON_API_KEY is not set; upstream will reject authentication");
        }

        Arc::new_cyclic(|this| Self {
            config,
            transport,
            registry,
            gate,
            codec: JsonCodec::new(),
            events,
            state: Mutex::new(LinkState::default()),
            cancel,
            this: this.clone(),
        })
    }

    /// Current connectivity state.
    #[must_use]
    pub fn state(&self) -> ConnectivityState {
        self.state.lock().connectivity
    }

    /// Episode of the most recent connect attempt.
    #[must_use]
    pub fn episode(&self) -> Episode {
        self.state.lock().episode
    }

    /// Handle one inbound text frame from `episode`.
    pub async fn on_message(&self, episode: Episode, text: &str) {
        if self.is_stale(episode) {
            return;
        }
        metrics::record_frame_received();

        let messages = match self.codec.decode(text) {
            Ok(messages) => messages,
            Err(e) => {
                metrics::record_decode_error();
                tracing::warn!(episode, error = %e, "Dropping undecodable upstream frame");
                return;
            }
        };

        let mut updates = Vec::new();
        for message in messages {
            match message {
                PolygonMessage::Aggregate(aggregate) => {
                    let symbol = aggregate.sym.clone();
                    match aggregate.into_update() {
                        Some(update) => updates.push(update),
                        None => {
                            metrics::record_decode_error();
                            tracing::warn!(
                                episode,
                                symbol = %symbol,
                                "Dropping aggregate with out-of-range values"
                            );
                        }
                    }
                }
                PolygonMessage::Status(status) if status.is_auth_success() => {
                    tracing::info!(episode, message = %status.message, "Upstream authenticated");
                }
                PolygonMessage::Status(status) if status.is_auth_failure() => {
                    tracing::warn!(episode, message = %status.message, "Upstream rejected credentials");
                }
                PolygonMessage::Status(status) => {
                    tracing::debug!(
                        episode,
                        status = %status.status,
                        message = %status.message,
                        "Upstream status"
                    );
                }
                PolygonMessage::Unknown(kind) => {
                    tracing::trace!(episode, kind = %kind, "Ignoring upstream event");
                }
            }
        }

        if !updates.is_empty() {
            metrics::record_updates_decoded(updates.len());
            self.emit(FeedEvent::FrameDecoded(updates)).await;
        }
    }

    /// Handle a transport error on `episode`. Does not schedule a reconnect.
    pub async fn on_error(&self, episode: Episode, error: String) {
        if !self.retire(episode) {
            return;
        }
        metrics::record_link_event(LinkEventKind::Error);
        tracing::warn!(episode, error = %error, "Upstream link error");
        self.emit(FeedEvent::LinkError { episode, error }).await;
    }

    /// Handle the end of `episode`'s link.
    pub async fn on_close(&self, episode: Episode) {
        if !self.retire(episode) {
            return;
        }
        metrics::record_link_event(LinkEventKind::Closed);
        tracing::info!(episode, "Upstream link closed");
        self.emit(FeedEvent::Disconnected {
            episode,
            error: None,
        })
        .await;
    }

    /// Move `episode` to Disconnected and hold the batch gate until its
    /// notice is broadcast. Returns false when the episode is stale or the
    /// connector is shutting down.
    fn retire(&self, episode: Episode) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        let mut state = self.state.lock();
        if state.episode != episode {
            return false;
        }
        self.gate.hold();
        state.connectivity = ConnectivityState::Disconnected;
        state.outbound = None;
        drop(state);

        metrics::set_upstream_connected(false);
        true
    }

    fn is_stale(&self, episode: Episode) -> bool {
        self.state.lock().episode != episode
    }

    async fn emit(&self, event: FeedEvent) {
        if self.events.send(event).await.is_err() {
            tracing::debug!("Feed event channel closed");
        }
    }

    async fn read_link(self: Arc<Self>, episode: Episode, mut inbound: mpsc::Receiver<LinkEvent>) {
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return,
                event = inbound.recv() => match event {
                    Some(LinkEvent::Frame(text)) => self.on_message(episode, &text).await,
                    Some(LinkEvent::Error(error)) => self.on_error(episode, error).await,
                    Some(LinkEvent::Closed) | None => {
                        self.on_close(episode).await;
                        return;
                    }
                },
            }
        }
    }

    fn write(&self, outbound: &mpsc::UnboundedSender<String>, request: &ActionRequest) -> bool {
        let json = match request.to_json() {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(error = %e, action = request.action.as_str(), "Failed to encode command");
                return false;
            }
        };

        if outbound.send(json).is_err() {
            tracing::debug!(action = request.action.as_str(), "Upstream writer gone");
            return false;
        }
        metrics::record_upstream_command(request.action.as_str());
        true
    }

    fn send_if_connected(&self, request: &ActionRequest) -> bool {
        let state = self.state.lock();
        match (&state.connectivity, &state.outbound) {
            (ConnectivityState::Connected, Some(outbound)) => self.write(outbound, request),
            _ => {
                tracing::debug!(
                    action = request.action.as_str(),
                    state = state.connectivity.as_str(),
                    "Upstream not connected, command skipped"
                );
                false
            }
        }
    }

    /// Authenticate and restore subscriptions on a freshly opened link.
    ///
    /// Returns false if the attempt was superseded while the transport was
    /// opening.
    fn activate(&self, episode: Episode, outbound: mpsc::UnboundedSender<String>) -> bool {
        let mut state = self.state.lock();
        if state.episode != episode
            || state.connectivity != ConnectivityState::Connecting
            || self.cancel.is_cancelled()
        {
            return false;
        }

        state.connectivity = ConnectivityState::Authenticating;
        self.write(&outbound, &self.config.credentials.to_auth_request());
        state.connectivity = ConnectivityState::Connected;

        let snapshot = self.registry.snapshot();
        if !snapshot.is_empty() {
            tracing::info!(episode, symbols = snapshot.len(), "Restoring upstream subscriptions");
            self.write(
                &outbound,
                &ActionRequest::subscribe(&self.config.channel_prefix, &snapshot),
            );
        }

        state.outbound = Some(outbound);
        true
    }
}

#[async_trait]
impl UpstreamControl for UpstreamConnector {
    async fn connect(&self) {
        let episode = {
            let mut state = self.state.lock();
            if state.connectivity != ConnectivityState::Disconnected || self.cancel.is_cancelled() {
                return;
            }
            state.connectivity = ConnectivityState::Connecting;
            state.episode += 1;
            state.episode
        };

        metrics::record_connect_attempt();
        tracing::info!(episode, "Connecting to upstream");

        let UpstreamLink { outbound, inbound } = match self.transport.open().await {
            Ok(link) => link,
            Err(e) => {
                if !self.retire(episode) {
                    return;
                }
                metrics::record_link_event(LinkEventKind::OpenFailed);
                tracing::warn!(episode, error = %e, "Upstream connection failed");
                self.emit(FeedEvent::Disconnected {
                    episode,
                    error: Some(e.to_string()),
                })
                .await;
                return;
            }
        };

        if !self.activate(episode, outbound) {
            tracing::debug!(episode, "Connect attempt superseded, dropping link");
            return;
        }

        metrics::record_link_event(LinkEventKind::Connected);
        metrics::set_upstream_connected(true);
        self.emit(FeedEvent::Connected { episode }).await;

        if let Some(this) = self.this.upgrade() {
            tokio::spawn(this.read_link(episode, inbound));
        }
    }

    fn subscribe(&self, symbols: &[Symbol]) -> bool {
        if symbols.is_empty() {
            return false;
        }
        self.send_if_connected(&ActionRequest::subscribe(
            &self.config.channel_prefix,
            symbols,
        ))
    }

    fn unsubscribe(&self, symbols: &[Symbol]) -> bool {
        if symbols.is_empty() {
            return false;
        }
        self.send_if_connected(&ActionRequest::unsubscribe(
            &self.config.channel_prefix,
            symbols,
        ))
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connectivity == ConnectivityState::Connected
    }

    fn close(&self) {
        let mut state = self.state.lock();
        state.episode += 1;
        state.connectivity = ConnectivityState::Disconnected;
        let had_link = state.outbound.take().is_some();
        drop(state);

        metrics::set_upstream_connected(false);
        if had_link {
            tracing::info!("Upstream link closed");
        }
    }
}
