#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::items_after_statements
    )
)]

//! Ticker Fanout - Market Data Broadcaster
//!
//! Holds a single upstream connection to a Polygon-style market data feed,
//! coalesces aggregate bars into a latest-value-per-symbol buffer, and
//! periodically fans the buffer out to any number of WebSocket clients.
//! Client subscribe requests drive the upstream subscription set.
//!
//! # Layers (inside to outside)
//!
//! - **Domain**: Core streaming logic and data types
//!   - `streaming`: Ticker updates, connectivity status, update coalescer
//!   - `subscription`: Subscription registry and unsubscribe policies
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Upstream transport and control, client fan-out, feed events
//!   - `services`: Broadcaster, broadcast scheduler, reconnect supervisor
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `polygon`: Upstream WebSocket connector and codec
//!   - `broadcast`: Client gateway with per-session queues
//!   - `websocket`: Client WebSocket server
//!   - `config`: Environment configuration
//!   - `health`: Health, stats, and metrics endpoint
//!   - `runtime`: Service assembly
//!
//! # Data Flow
//!
//! ```text
//!                  FrameDecoded               flush every tick
//! Polygon WS ──> Connector ──> Dispatcher ──> Coalescer ──> Scheduler ──┐
//!                   ^              │                                     v
//!                   │ subscribe    │ status                        ClientGateway ──> Client 1..N
//!                   └──────────────┴── Registry <── ClientSubscribed ────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core streaming types with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::streaming::coalescer::UpdateCoalescer;
pub use domain::streaming::{ConnectionStatus, ConnectivityState, EventType, Symbol, TickerUpdate};
pub use domain::subscription::{
    SessionId, SubscriptionChanges, SubscriptionRegistry, UnsubscribePolicy,
};

// Application services
pub use application::ports::{FeedEvent, LinkEvent, UpstreamLink, UpstreamTransport};
pub use application::services::{
    BatchGate, BroadcasterError, BroadcasterSettings, BroadcasterStats, ReconnectConfig, TickerBroadcaster,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, FanoutConfig};

// Gateway and servers (for integration tests)
pub use infrastructure::broadcast::{ClientGateway, ClientSession, SessionQueue};
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};
pub use infrastructure::runtime::FanoutRuntime;
pub use infrastructure::websocket::{ClientServer, ServerError};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
