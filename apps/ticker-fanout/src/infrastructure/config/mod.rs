//! Configuration Module
//!
//! Configuration loading for the fan-out service.

mod settings;

pub use settings::{
    BroadcastSettings, ConfigError, DEFAULT_POLYGON_WS_URL, FanoutConfig, ReconnectSettings,
    ServerSettings, UpstreamSettings,
};
