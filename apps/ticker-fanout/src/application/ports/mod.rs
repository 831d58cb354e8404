//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`UpstreamTransport`]: opens a raw text link to the market data provider
//! - [`UpstreamControl`]: connect and subscription commands on the upstream feed
//! - [`ClientFanout`]: batch and status delivery to downstream sessions
//!
//! ## Internal Events
//!
//! - [`FeedEvent`]: typed events emitted by the adapters and consumed by
//!   the broadcaster's dispatcher

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::streaming::{ConnectionStatus, Symbol, TickerUpdate};
use crate::domain::subscription::SessionId;

// =============================================================================
// Upstream Transport
// =============================================================================

/// Something that happened on an open upstream link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A text frame arrived.
    Frame(String),
    /// The transport reported an error. A `Closed` follows.
    Error(String),
    /// The link is gone.
    Closed,
}

/// An open upstream link.
///
/// Dropping `outbound` closes the link. The inbound channel ending is
/// treated the same as [`LinkEvent::Closed`].
#[derive(Debug)]
pub struct UpstreamLink {
    /// Text frames to write; consumed by a single writer.
    pub outbound: mpsc::UnboundedSender<String>,
    /// Frames and lifecycle events read from the link.
    pub inbound: mpsc::Receiver<LinkEvent>,
}

/// Errors opening an upstream link.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection could not be established.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The endpoint URL is not usable.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

/// Factory for upstream links.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UpstreamTransport: Send + Sync {
    /// Open a new link.
    async fn open(&self) -> Result<UpstreamLink, TransportError>;
}

// =============================================================================
// Upstream Control
// =============================================================================

/// Commands on the single upstream connection.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UpstreamControl: Send + Sync {
    /// Establish the link unless one is already up or being set up.
    async fn connect(&self);

    /// Subscribe upstream. Returns false when nothing was sent.
    fn subscribe(&self, symbols: &[Symbol]) -> bool;

    /// Unsubscribe upstream. Returns false when nothing was sent.
    fn unsubscribe(&self, symbols: &[Symbol]) -> bool;

    /// Whether the link is in the connected state.
    fn is_connected(&self) -> bool;

    /// Drop the link without scheduling a reconnect.
    fn close(&self);
}

// =============================================================================
// Client Fan-out
// =============================================================================

/// Delivery to every connected downstream session.
#[cfg_attr(test, mockall::automock)]
pub trait ClientFanout: Send + Sync {
    /// Queue a batch for every session. Returns the sessions reached.
    fn broadcast_batch(&self, updates: &[TickerUpdate]) -> usize;

    /// Queue a status message for every session. Returns the sessions reached.
    fn broadcast_status(&self, status: &ConnectionStatus) -> usize;

    /// Number of connected sessions.
    fn client_count(&self) -> usize;
}

// =============================================================================
// Feed Events
// =============================================================================

/// Identifier of one connection attempt and the link it produced.
pub type Episode = u64;

/// Events dispatched to the broadcaster.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// Upstream link established and authenticated.
    Connected {
        /// Episode that connected.
        episode: Episode,
    },
    /// Upstream transport error. Does not schedule a reconnect by itself.
    LinkError {
        /// Episode the error belongs to.
        episode: Episode,
        /// Error detail.
        error: String,
    },
    /// Upstream link closed or could not be opened.
    Disconnected {
        /// Episode that ended.
        episode: Episode,
        /// Error detail, if the close was caused by one.
        error: Option<String>,
    },
    /// Updates decoded from one upstream frame.
    FrameDecoded(Vec<TickerUpdate>),
    /// A client asked for symbols.
    ClientSubscribed {
        /// Requesting session.
        session: SessionId,
        /// Requested symbols.
        symbols: Vec<Symbol>,
    },
    /// A client dropped symbols.
    ClientUnsubscribed {
        /// Requesting session.
        session: SessionId,
        /// Symbols to drop.
        symbols: Vec<Symbol>,
    },
    /// A client session ended.
    ClientLeft {
        /// Session that disconnected.
        session: SessionId,
    },
}

/// Sender half of the feed event channel.
pub type FeedEventSender = mpsc::Sender<FeedEvent>;
