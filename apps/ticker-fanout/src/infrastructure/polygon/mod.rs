//! Polygon WebSocket Adapter
//!
//! Implements the upstream side of the fan-out against Polygon's stocks
//! cluster:
//!
//! - **messages**: wire types for commands and events
//! - **codec**: frame decoding
//! - **auth**: API key handling
//! - **transport**: `tokio-tungstenite` link factory
//! - **connector**: connection state machine and event emission

pub mod auth;
pub mod codec;
pub mod connector;
pub mod messages;
pub mod transport;

pub use auth::Credentials;
pub use codec::{CodecError, JsonCodec};
pub use connector::{ConnectorConfig, DEFAULT_CHANNEL_PREFIX, UpstreamConnector};
pub use messages::{ActionRequest, AggregateMessage, PolygonMessage, StatusMessage};
pub use transport::TungsteniteTransport;
