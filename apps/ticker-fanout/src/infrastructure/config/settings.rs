//! Fan-out Configuration Settings
//!
//! Configuration types for the broadcaster, loaded from environment variables.
//! Unparseable numbers fall back to their defaults; values that would break
//! the service outright are rejected.

use std::time::Duration;

use crate::application::services::{BroadcasterSettings, DEFAULT_TICK_INTERVAL, ReconnectConfig};
use crate::domain::subscription::UnsubscribePolicy;
use crate::infrastructure::broadcast::DEFAULT_SESSION_QUEUE_CAPACITY;
use crate::infrastructure::polygon::auth::API_KEY_ENV;
use crate::infrastructure::polygon::{Credentials, DEFAULT_CHANNEL_PREFIX};

/// Default upstream endpoint.
pub const DEFAULT_POLYGON_WS_URL: &str = "wss://socket.polygon.io/stocks";

/// Upstream connection settings.
#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    /// WebSocket endpoint.
    pub url: String,
    /// Per-symbol channel prefix.
    pub channel_prefix: String,
    /// API credentials.
    pub credentials: Credentials,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_POLYGON_WS_URL.to_string(),
            channel_prefix: DEFAULT_CHANNEL_PREFIX.to_string(),
            credentials: Credentials::missing(),
        }
    }
}

/// Reconnection settings.
#[derive(Debug, Clone)]
pub struct ReconnectSettings {
    /// Initial reconnection delay.
    pub delay_initial: Duration,
    /// Maximum reconnection delay.
    pub delay_max: Duration,
    /// Reconnection delay multiplier (1.0 = fixed delay).
    pub delay_multiplier: f64,
    /// Jitter fraction applied to each delay.
    pub jitter: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            delay_initial: Duration::from_secs(5),
            delay_max: Duration::from_secs(5),
            delay_multiplier: 1.0,
            jitter: 0.0,
            max_attempts: 0, // Unlimited
        }
    }
}

impl From<&ReconnectSettings> for ReconnectConfig {
    fn from(settings: &ReconnectSettings) -> Self {
        Self::new(
            settings.delay_initial,
            settings.delay_max,
            settings.delay_multiplier,
            settings.jitter,
            settings.max_attempts,
        )
    }
}

/// Broadcast pipeline settings.
#[derive(Debug, Clone)]
pub struct BroadcastSettings {
    /// Scheduler period.
    pub tick_interval: Duration,
    /// Per-session outbound queue bound.
    pub session_queue_capacity: usize,
    /// Internal feed event channel capacity.
    pub event_channel_capacity: usize,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            session_queue_capacity: DEFAULT_SESSION_QUEUE_CAPACITY,
            event_channel_capacity: 1024,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Client WebSocket port.
    pub ws_port: u16,
    /// Health, stats, and metrics HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            ws_port: 8080,
            health_port: 8082,
        }
    }
}

/// Complete fan-out configuration.
#[derive(Debug, Clone, Default)]
pub struct FanoutConfig {
    /// Upstream connection settings.
    pub upstream: UpstreamSettings,
    /// Reconnection settings.
    pub reconnect: ReconnectSettings,
    /// Broadcast pipeline settings.
    pub broadcast: BroadcastSettings,
    /// Server port settings.
    pub server: ServerSettings,
    /// Unsubscribe policy.
    pub subscription_policy: UnsubscribePolicy,
}

impl FanoutConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is present but unusable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is present but unusable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let upstream = UpstreamSettings {
            url: lookup("POLYGON_WS_URL").unwrap_or(defaults.upstream.url),
            channel_prefix: lookup("POLYGON_CHANNEL_PREFIX")
                .filter(|p| !p.trim().is_empty())
                .unwrap_or(defaults.upstream.channel_prefix),
            credentials: lookup(API_KEY_ENV).map_or_else(Credentials::missing, Credentials::new),
        };

        let reconnect = ReconnectSettings {
            delay_initial: parse_env_duration_millis(
                &lookup,
                "FANOUT_RECONNECT_DELAY_INITIAL_MS",
                defaults.reconnect.delay_initial,
            ),
            delay_max: parse_env_duration_millis(
                &lookup,
                "FANOUT_RECONNECT_DELAY_MAX_MS",
                defaults.reconnect.delay_max,
            ),
            delay_multiplier: parse_env_f64(
                &lookup,
                "FANOUT_RECONNECT_DELAY_MULTIPLIER",
                defaults.reconnect.delay_multiplier,
            ),
            jitter: parse_env_f64(&lookup, "FANOUT_RECONNECT_JITTER", defaults.reconnect.jitter),
            max_attempts: parse_env_u32(
                &lookup,
                "FANOUT_MAX_RECONNECT_ATTEMPTS",
                defaults.reconnect.max_attempts,
            ),
        };

        let broadcast = BroadcastSettings {
            tick_interval: parse_env_duration_millis(
                &lookup,
                "FANOUT_TICK_INTERVAL_MS",
                defaults.broadcast.tick_interval,
            ),
            session_queue_capacity: parse_env_usize(
                &lookup,
                "FANOUT_SESSION_QUEUE_CAPACITY",
                defaults.broadcast.session_queue_capacity,
            ),
            event_channel_capacity: parse_env_usize(
                &lookup,
                "FANOUT_EVENT_CHANNEL_CAPACITY",
                defaults.broadcast.event_channel_capacity,
            ),
        };

        let server = ServerSettings {
            ws_port: parse_env_u16(&lookup, "FANOUT_WS_PORT", defaults.server.ws_port),
            health_port: parse_env_u16(&lookup, "FANOUT_HEALTH_PORT", defaults.server.health_port),
        };

        let subscription_policy = match lookup("SUBSCRIPTION_POLICY") {
            Some(raw) => UnsubscribePolicy::parse(&raw).ok_or_else(|| ConfigError::InvalidValue {
                key: "SUBSCRIPTION_POLICY".to_string(),
                reason: format!("unknown policy {raw:?}, expected immediate or ref-counted"),
            })?,
            None => defaults.subscription_policy,
        };

        let config = Self {
            upstream,
            reconnect,
            broadcast,
            server,
            subscription_policy,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would break the service.
    ///
    /// # Errors
    ///
    /// Returns the first offending setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.upstream.url.starts_with("ws://") || self.upstream.url.starts_with("wss://")) {
            return Err(ConfigError::InvalidValue {
                key: "POLYGON_WS_URL".to_string(),
                reason: format!("{} is not a ws:// or wss:// URL", self.upstream.url),
            });
        }
        if self.broadcast.tick_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "FANOUT_TICK_INTERVAL_MS".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.broadcast.session_queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "FANOUT_SESSION_QUEUE_CAPACITY".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.broadcast.event_channel_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "FANOUT_EVENT_CHANNEL_CAPACITY".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        let multiplier = self.reconnect.delay_multiplier;
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(ConfigError::InvalidValue {
                key: "FANOUT_RECONNECT_DELAY_MULTIPLIER".to_string(),
                reason: format!("{multiplier} must be a finite number of at least 1"),
            });
        }
        let jitter = self.reconnect.jitter;
        if !(0.0..=1.0).contains(&jitter) {
            return Err(ConfigError::InvalidValue {
                key: "FANOUT_RECONNECT_JITTER".to_string(),
                reason: format!("{jitter} must be between 0 and 1"),
            });
        }
        Ok(())
    }

    /// Broadcaster tuning derived from this configuration.
    #[must_use]
    pub fn broadcaster_settings(&self) -> BroadcasterSettings {
        BroadcasterSettings {
            tick_interval: self.broadcast.tick_interval,
            reconnect: ReconnectConfig::from(&self.reconnect),
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A variable is set to an unusable value.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// What is wrong with it.
        reason: String,
    },
}

fn parse_env_u16(lookup: impl Fn(&str) -> Option<String>, key: &str, default: u16) -> u16 {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_env_u32(lookup: impl Fn(&str) -> Option<String>, key: &str, default: u32) -> u32 {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_env_usize(lookup: impl Fn(&str) -> Option<String>, key: &str, default: usize) -> usize {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_env_f64(lookup: impl Fn(&str) -> Option<String>, key: &str, default: f64) -> f64 {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_env_duration_millis(
    lookup: impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use test_case::test_case;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<FanoutConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        FanoutConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_without_variables() {
        let config = load(&[]).unwrap();
        assert_eq!(config.upstream.url, DEFAULT_POLYGON_WS_URL);
        assert_eq!(config.upstream.channel_prefix, "AM");
        assert!(config.upstream.credentials.is_missing());
        assert_eq!(config.broadcast.tick_interval, Duration::from_millis(250));
        assert_eq!(config.broadcast.session_queue_capacity, 32);
        assert_eq!(config.broadcast.event_channel_capacity, 1024);
        assert_eq!(config.reconnect.delay_initial, Duration::from_secs(5));
        assert_eq!(config.reconnect.max_attempts, 0);
        assert_eq!(config.server.ws_port, 8080);
        assert_eq!(config.server.health_port, 8082);
        assert_eq!(config.subscription_policy, UnsubscribePolicy::Immediate);
    }

    #[test]
    fn reads_overrides() {
        let config = load(&[
            ("POLYGON_API_KEY", "abc"),
            ("POLYGON_WS_URL", "ws://localhost:9000/stocks"),
            ("POLYGON_CHANNEL_PREFIX", "A"),
            ("FANOUT_TICK_INTERVAL_MS", "100"),
            ("FANOUT_RECONNECT_DELAY_MULTIPLIER", "2.0"),
            ("FANOUT_MAX_RECONNECT_ATTEMPTS", "3"),
            ("SUBSCRIPTION_POLICY", "ref-counted"),
            ("FANOUT_WS_PORT", "9001"),
        ])
        .unwrap();

        assert_eq!(config.upstream.credentials.api_key(), "abc");
        assert_eq!(config.upstream.url, "ws://localhost:9000/stocks");
        assert_eq!(config.upstream.channel_prefix, "A");
        assert_eq!(config.broadcast.tick_interval, Duration::from_millis(100));
        assert!((config.reconnect.delay_multiplier - 2.0).abs() < f64::EPSILON);
        assert_eq!(config.subscription_policy, UnsubscribePolicy::RefCounted);
        assert_eq!(config.server.ws_port, 9001);

        let broadcaster = config.broadcaster_settings();
        assert_eq!(broadcaster.reconnect.max_attempts, 3);
        assert_eq!(broadcaster.tick_interval, Duration::from_millis(100));
    }

    #[test_case("FANOUT_TICK_INTERVAL_MS", "fast" ; "tick interval")]
    #[test_case("FANOUT_WS_PORT", "99999" ; "port out of range")]
    #[test_case("FANOUT_RECONNECT_JITTER", "lots" ; "jitter")]
    fn unparseable_numbers_fall_back(key: &str, value: &str) {
        let config = load(&[(key, value)]).unwrap();
        let defaults = FanoutConfig::default();
        assert_eq!(config.broadcast.tick_interval, defaults.broadcast.tick_interval);
        assert_eq!(config.server.ws_port, defaults.server.ws_port);
        assert!(config.reconnect.jitter.abs() < f64::EPSILON);
    }

    #[test_case("FANOUT_TICK_INTERVAL_MS", "0" ; "zero tick")]
    #[test_case("FANOUT_SESSION_QUEUE_CAPACITY", "0" ; "zero queue")]
    #[test_case("FANOUT_EVENT_CHANNEL_CAPACITY", "0" ; "zero event channel")]
    #[test_case("POLYGON_WS_URL", "https://socket.polygon.io" ; "http url")]
    #[test_case("SUBSCRIPTION_POLICY", "lru" ; "unknown policy")]
    #[test_case("FANOUT_RECONNECT_JITTER", "NaN" ; "nan jitter")]
    #[test_case("FANOUT_RECONNECT_JITTER", "inf" ; "infinite jitter")]
    #[test_case("FANOUT_RECONNECT_JITTER", "-0.5" ; "negative jitter")]
    #[test_case("FANOUT_RECONNECT_JITTER", "1.5" ; "jitter above one")]
    #[test_case("FANOUT_RECONNECT_DELAY_MULTIPLIER", "NaN" ; "nan multiplier")]
    #[test_case("FANOUT_RECONNECT_DELAY_MULTIPLIER", "inf" ; "infinite multiplier")]
    #[test_case("FANOUT_RECONNECT_DELAY_MULTIPLIER", "0.5" ; "shrinking multiplier")]
    fn rejects_invalid_values(key: &str, value: &str) {
        let err = load(&[(key, value)]).unwrap_err();
        let ConfigError::InvalidValue { key: reported, .. } = err;
        assert_eq!(reported, key);
    }
}
