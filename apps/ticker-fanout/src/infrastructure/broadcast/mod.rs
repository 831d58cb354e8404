//! Client Gateway
//!
//! Fan-out side of the broadcaster. Every downstream session owns a bounded
//! outbound queue; the gateway serializes each batch or status message once
//! and pushes the shared payload onto every queue without blocking.
//!
//! # Architecture
//!
//! ```text
//! BroadcastScheduler ──broadcast_batch──┐
//! EventDispatcher ────broadcast_status──┼──> ClientGateway ──> SessionQueue (per client)
//!                                       │                        │
//!                                       │                        └──> socket writer task
//! WebSocket reader ──on_client_message──┘──> FeedEvent channel
//! ```
//!
//! A full queue drops its oldest batch. Status frames are only evicted when
//! no batch is left to drop, so a disconnect notice is never lost behind
//! market data.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use super::metrics;
use crate::application::ports::{ClientFanout, FeedEvent, FeedEventSender};
use crate::domain::streaming::coalescer::UpdateCoalescer;
use crate::domain::streaming::{ConnectionStatus, Symbol, TickerUpdate};
use crate::domain::subscription::SessionId;

/// Default per-session queue bound.
pub const DEFAULT_SESSION_QUEUE_CAPACITY: usize = 32;

// =============================================================================
// Wire Protocol
// =============================================================================

/// Messages sent to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage<'a> {
    /// Latest update per symbol.
    BatchUpdate {
        /// Updates sorted by symbol.
        updates: &'a [TickerUpdate],
    },
    /// Upstream connectivity change.
    Status(&'a ConnectionStatus),
}

/// Messages received from clients.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Add symbols to the upstream subscription.
    SubscribeTickers {
        /// Requested symbols.
        #[serde(default)]
        symbols: Vec<Symbol>,
    },
    /// Remove symbols from the upstream subscription.
    UnsubscribeTickers {
        /// Symbols to drop.
        #[serde(default)]
        symbols: Vec<Symbol>,
    },
}

// =============================================================================
// Session Queue
// =============================================================================

/// Kind of a queued frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// `batch-update` message.
    Batch,
    /// `status` message.
    Status,
}

/// Serialized frame shared by every session.
#[derive(Debug, Clone)]
pub struct OutboundFrame {
    /// Frame kind, used by the overflow policy.
    pub kind: FrameKind,
    /// JSON text.
    pub payload: Arc<str>,
}

/// Bounded per-session queue. Pushing never blocks.
#[derive(Debug)]
pub struct SessionQueue {
    frames: Mutex<VecDeque<OutboundFrame>>,
    notify: Notify,
    capacity: usize,
    closed: AtomicBool,
}

impl SessionQueue {
    /// Create an empty queue holding at most `capacity` frames.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            capacity,
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueue a frame. Returns true if a queued batch was evicted.
    pub fn push(&self, frame: OutboundFrame) -> bool {
        if self.is_closed() {
            return false;
        }

        let mut frames = self.frames.lock();
        let mut dropped_batch = false;
        if frames.len() >= self.capacity {
            match frames.iter().position(|f| f.kind == FrameKind::Batch) {
                Some(idx) => {
                    frames.remove(idx);
                    dropped_batch = true;
                }
                None => {
                    frames.pop_front();
                }
            }
        }
        frames.push_back(frame);
        drop(frames);

        self.notify.notify_one();
        dropped_batch
    }

    /// Dequeue the oldest frame without waiting.
    pub fn pop(&self) -> Option<OutboundFrame> {
        self.frames.lock().pop_front()
    }

    /// Wait for the next frame. Returns `None` once the queue is closed.
    pub async fn next(&self) -> Option<OutboundFrame> {
        loop {
            if self.is_closed() {
                return None;
            }
            if let Some(frame) = self.pop() {
                return Some(frame);
            }
            self.notify.notified().await;
        }
    }

    /// Close the queue and wake the consumer.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    /// Whether the queue was closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of queued frames.
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    /// Whether no frames are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }
}

// =============================================================================
// Client Gateway
// =============================================================================

/// Handle returned to the socket task for one connected client.
#[derive(Debug, Clone)]
pub struct ClientSession {
    /// Session identifier.
    pub id: SessionId,
    /// Outbound queue drained by the socket writer.
    pub queue: Arc<SessionQueue>,
}

/// Session registry and fan-out adapter.
pub struct ClientGateway {
    sessions: RwLock<HashMap<SessionId, Arc<SessionQueue>>>,
    next_id: AtomicU64,
    coalescer: Arc<UpdateCoalescer>,
    events: FeedEventSender,
    queue_capacity: usize,
}

impl ClientGateway {
    /// Create a gateway with no sessions.
    #[must_use]
    pub fn new(
        coalescer: Arc<UpdateCoalescer>,
        events: FeedEventSender,
        queue_capacity: usize,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            coalescer,
            events,
            queue_capacity,
        }
    }

    /// Register a new session. A non-empty coalescer is sent to it at once
    /// as a single batch.
    pub fn on_client_connect(&self) -> ClientSession {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(SessionQueue::new(self.queue_capacity));

        let mut sessions = self.sessions.write();
        if !self.coalescer.is_empty() {
            let snapshot = self.coalescer.flush();
            if let Some(payload) = encode(&ServerMessage::BatchUpdate { updates: &snapshot }) {
                tracing::debug!(session = id, symbols = snapshot.len(), "Sending snapshot");
                queue.push(OutboundFrame {
                    kind: FrameKind::Batch,
                    payload,
                });
            }
        }
        sessions.insert(id, Arc::clone(&queue));
        let count = sessions.len();
        drop(sessions);

        metrics::set_connected_clients(count);
        tracing::info!(session = id, clients = count, "Client connected");
        ClientSession { id, queue }
    }

    /// Parse and apply one client text message. Malformed input is ignored.
    pub async fn on_client_message(&self, session: SessionId, text: &str) {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(ClientMessage::SubscribeTickers { symbols }) => {
                self.on_client_subscribe(session, symbols).await;
            }
            Ok(ClientMessage::UnsubscribeTickers { symbols }) => {
                self.on_client_unsubscribe(session, symbols).await;
            }
            Err(e) => {
                tracing::debug!(session, error = %e, "Ignoring malformed client message");
            }
        }
    }

    /// Request symbols on behalf of `session`.
    pub async fn on_client_subscribe(&self, session: SessionId, symbols: Vec<Symbol>) {
        let symbols = non_empty(symbols);
        if symbols.is_empty() {
            return;
        }
        self.emit(FeedEvent::ClientSubscribed { session, symbols })
            .await;
    }

    /// Drop symbols on behalf of `session`.
    pub async fn on_client_unsubscribe(&self, session: SessionId, symbols: Vec<Symbol>) {
        let symbols = non_empty(symbols);
        if symbols.is_empty() {
            return;
        }
        self.emit(FeedEvent::ClientUnsubscribed { session, symbols })
            .await;
    }

    /// Forget `session` and close its queue.
    pub async fn on_client_disconnect(&self, session: SessionId) {
        let (removed, count) = {
            let mut sessions = self.sessions.write();
            let removed = sessions.remove(&session);
            (removed, sessions.len())
        };

        let Some(queue) = removed else {
            return;
        };
        queue.close();
        metrics::set_connected_clients(count);
        tracing::info!(session, clients = count, "Client disconnected");

        self.emit(FeedEvent::ClientLeft { session }).await;
    }

    async fn emit(&self, event: FeedEvent) {
        if self.events.send(event).await.is_err() {
            tracing::debug!("Feed event channel closed");
        }
    }

    fn push_all(&self, kind: FrameKind, payload: &Arc<str>) -> usize {
        let sessions = self.sessions.read();
        let mut dropped = 0_u64;
        for queue in sessions.values() {
            if queue.push(OutboundFrame {
                kind,
                payload: Arc::clone(payload),
            }) {
                dropped += 1;
            }
        }
        let reached = sessions.len();
        drop(sessions);

        if dropped > 0 {
            metrics::record_batches_dropped(dropped);
            tracing::debug!(dropped, "Evicted batches from slow client queues");
        }
        reached
    }
}

impl ClientFanout for ClientGateway {
    fn broadcast_batch(&self, updates: &[TickerUpdate]) -> usize {
        let Some(payload) = encode(&ServerMessage::BatchUpdate { updates }) else {
            return 0;
        };
        metrics::record_batch_broadcast(updates.len());
        self.push_all(FrameKind::Batch, &payload)
    }

    fn broadcast_status(&self, status: &ConnectionStatus) -> usize {
        let Some(payload) = encode(&ServerMessage::Status(status)) else {
            return 0;
        };
        metrics::record_status_broadcast();
        self.push_all(FrameKind::Status, &payload)
    }

    fn client_count(&self) -> usize {
        self.sessions.read().len()
    }
}

fn encode(message: &ServerMessage<'_>) -> Option<Arc<str>> {
    match serde_json::to_string(message) {
        Ok(json) => Some(Arc::from(json)),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode client message");
            None
        }
    }
}

fn non_empty(symbols: Vec<Symbol>) -> Vec<Symbol> {
    symbols.into_iter().filter(|s| !s.is_empty()).collect()
}

// =============================================================================
// Tests
// =============================================================================
