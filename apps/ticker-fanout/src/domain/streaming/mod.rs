//! Market Data Streaming Types
//!
//! Core domain types for the fan-out: per-symbol ticker updates derived
//! from aggregate bars, and the connectivity status of the single upstream
//! link. These types are codec-agnostic and represent the canonical
//! internal representation that is coalesced and broadcast to clients.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Latest-value-per-symbol buffer.
pub mod coalescer;

/// A ticker symbol. Opaque and case-sensitive.
pub type Symbol = String;

// =============================================================================
// Ticker Update
// =============================================================================

/// Aggregate event kind the update was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    /// Per-second aggregate.
    #[serde(rename = "A")]
    Second,
    /// Per-minute aggregate.
    #[serde(rename = "AM")]
    Minute,
}

impl EventType {
    /// Wire code of the event type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Second => "A",
            Self::Minute => "AM",
        }
    }
}

/// Raw OHLCV figures of one aggregate bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ohlcv {
    /// Open price.
    pub open: Decimal,
    /// High price.
    pub high: Decimal,
    /// Low price.
    pub low: Decimal,
    /// Close price (becomes the update price).
    pub close: Decimal,
    /// Volume.
    pub volume: Decimal,
}

/// Latest known state of a symbol as delivered to clients.
///
/// Serialized as:
/// ```json
/// {
///   "ticker": "AAPL", "price": 151.0, "open": 150.0, "high": 152.0,
///   "low": 149.5, "volume": 12000.0, "vwap": 150.8, "change": 1.0,
///   "changePercent": 0.6666, "timestamp": 1700000000000, "eventType": "AM"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickerUpdate {
    /// Ticker symbol.
    #[serde(rename = "ticker")]
    pub symbol: Symbol,
    /// Last price (aggregate close).
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    /// Aggregate open.
    #[serde(with = "rust_decimal::serde::float")]
    pub open: Decimal,
    /// Aggregate high.
    #[serde(with = "rust_decimal::serde::float")]
    pub high: Decimal,
    /// Aggregate low.
    #[serde(with = "rust_decimal::serde::float")]
    pub low: Decimal,
    /// Aggregate volume.
    #[serde(with = "rust_decimal::serde::float")]
    pub volume: Decimal,
    /// Volume weighted average price, when the provider sends one.
    #[serde(with = "rust_decimal::serde::float_option", default)]
    pub vwap: Option<Decimal>,
    /// `price - open`.
    #[serde(with = "rust_decimal::serde::float")]
    pub change: Decimal,
    /// `change / open * 100`; `None` when open is zero.
    #[serde(with = "rust_decimal::serde::float_option", default)]
    pub change_percent: Option<Decimal>,
    /// Bar start timestamp (epoch ms), falling back to the end timestamp.
    pub timestamp: Option<i64>,
    /// Source event kind.
    pub event_type: EventType,
}

impl TickerUpdate {
    /// Build an update from an aggregate bar, deriving the change fields.
    ///
    /// Returns `None` when `close - open` is not representable. A percentage
    /// that overflows is reported as absent.
    #[must_use]
    pub fn from_aggregate(
        symbol: impl Into<Symbol>,
        event_type: EventType,
        bar: Ohlcv,
        vwap: Option<Decimal>,
        timestamp: Option<i64>,
    ) -> Option<Self> {
        let change = bar.close.checked_sub(bar.open)?;
        let change_percent = change
            .checked_mul(Decimal::ONE_HUNDRED)
            .and_then(|scaled| scaled.checked_div(bar.open));

        Some(Self {
            symbol: symbol.into(),
            price: bar.close,
            open: bar.open,
            high: bar.high,
            low: bar.low,
            volume: bar.volume,
            vwap,
            change,
            change_percent,
            timestamp,
            event_type,
        })
    }
}

// =============================================================================
// Connectivity
// =============================================================================

/// State of the single upstream link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityState {
    /// No link; a reconnect may be pending.
    #[default]
    Disconnected,
    /// Transport handshake in progress.
    Connecting,
    /// Transport open, credential being sent.
    Authenticating,
    /// Ready for subscribe/unsubscribe commands.
    Connected,
}

impl ConnectivityState {
    /// Get the state name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Connected => "connected",
        }
    }
}

/// Connectivity status broadcast to every client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    /// Whether the upstream link is connected.
    pub connected: bool,
    /// Error detail for a failed or dropped link.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

impl ConnectionStatus {
    /// Status for an established link.
    #[must_use]
    pub const fn connected() -> Self {
        Self {
            connected: true,
            error: None,
        }
    }

    /// Status for a lost link.
    #[must_use]
    pub const fn disconnected(error: Option<String>) -> Self {
        Self {
            connected: false,
            error,
        }
    }
}
