//! Reconnection Policy and Supervisor
//!
//! The policy computes the delay before each reconnection attempt. Its
//! defaults reproduce a fixed 5 second delay with unlimited retries; the
//! multiplier, cap, and jitter turn it into exponential backoff when
//! configured.
//!
//! The supervisor reacts to upstream disconnect episodes. Each episode
//! schedules at most one reconnect, so an error followed by a close on the
//! same link does not double the attempts.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{Episode, UpstreamControl};

/// Configuration for reconnection behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Initial delay before first reconnection attempt.
    pub initial_delay: Duration,
    /// Maximum delay between reconnection attempts.
    pub max_delay: Duration,
    /// Multiplier applied after each attempt (1.0 keeps the delay fixed).
    pub multiplier: f64,
    /// Jitter factor as a fraction (e.g., 0.1 = ±10% randomization).
    pub jitter_factor: f64,
    /// Maximum number of reconnection attempts (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(5))
    }
}

impl ReconnectConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(
        initial_delay: Duration,
        max_delay: Duration,
        multiplier: f64,
        jitter_factor: f64,
        max_attempts: u32,
    ) -> Self {
        Self {
            initial_delay,
            max_delay,
            multiplier,
            jitter_factor,
            max_attempts,
        }
    }

    /// Same delay every time, no jitter, retries forever.
    #[must_use]
    pub const fn fixed(delay: Duration) -> Self {
        Self::new(delay, delay, 1.0, 0.0, 0)
    }
}

/// Reconnection policy implementing capped backoff with jitter.
///
/// # Example
///
/// ```rust
/// use ticker_fanout::application::services::reconnect::{ReconnectConfig, ReconnectPolicy};
/// use std::time::Duration;
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
///
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(5)));
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(5)));
///
/// // Simulate successful connection
/// policy.reset();
/// assert_eq!(policy.attempt_count(), 0);
/// ```
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    current_delay: Duration,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a new reconnection policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        let initial_delay = config.initial_delay;
        Self {
            config,
            current_delay: initial_delay,
            attempt_count: 0,
        }
    }

    /// Get the next delay duration, applying backoff and jitter.
    ///
    /// Returns `None` if max attempts have been exceeded.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }

        self.attempt_count += 1;

        let delay_with_jitter = self.apply_jitter(self.current_delay);

        #[allow(clippy::cast_precision_loss)]
        let scaled = (self.current_delay.as_millis() as f64 * self.config.multiplier).round();
        let next_millis = if scaled.is_finite() && scaled > 0.0 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            {
                scaled as u128
            }
        } else {
            0
        };
        let capped = next_millis.min(self.config.max_delay.as_millis());
        self.current_delay = Duration::from_millis(u64::try_from(capped).unwrap_or(u64::MAX));

        Some(delay_with_jitter)
    }

    /// Reset the policy after a successful connection.
    pub const fn reset(&mut self) {
        self.current_delay = self.config.initial_delay;
        self.attempt_count = 0;
    }

    /// Get the current attempt count.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Check if reconnection should continue.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempt_count < self.config.max_attempts
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        let factor = self.config.jitter_factor;
        if !factor.is_finite() || factor <= 0.0 {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * factor.min(1.0);
        let jitter: f64 = rand::rng().random_range(-jitter_range..=jitter_range);
        let adjusted_millis = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted_u64 = adjusted_millis as u64;
        Duration::from_millis(adjusted_u64)
    }
}

// =============================================================================
// Supervisor
// =============================================================================

/// Schedules upstream reconnects, one per disconnect episode.
pub struct ReconnectSupervisor {
    policy: Mutex<ReconnectPolicy>,
    last_episode: Mutex<Option<Episode>>,
    upstream: Arc<dyn UpstreamControl>,
    cancel: CancellationToken,
}

impl ReconnectSupervisor {
    /// Create a supervisor driving `upstream`.
    #[must_use]
    pub fn new(
        config: ReconnectConfig,
        upstream: Arc<dyn UpstreamControl>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            policy: Mutex::new(ReconnectPolicy::new(config)),
            last_episode: Mutex::new(None),
            upstream,
            cancel,
        }
    }

    /// Handle the end of a link.
    ///
    /// Spawns a delayed `connect()` unless this episode (or a later one)
    /// was already handled, the supervisor is cancelled, or attempts are
    /// exhausted. Returns whether a reconnect was scheduled.
    pub fn on_disconnect(&self, episode: Episode) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }

        {
            let mut last = self.last_episode.lock();
            if last.is_some_and(|handled| episode <= handled) {
                tracing::trace!(episode, "Reconnect already scheduled for episode");
                return false;
            }
            *last = Some(episode);
        }

        let (delay, attempt) = {
            let mut policy = self.policy.lock();
            let delay = policy.next_delay();
            (delay, policy.attempt_count())
        };

        let Some(delay) = delay else {
            tracing::error!(attempt, "Reconnect attempts exhausted; upstream stays down");
            return false;
        };

        tracing::info!(
            episode,
            attempt,
            delay_ms = delay.as_millis(),
            "Scheduling upstream reconnect"
        );

        let upstream = Arc::clone(&self.upstream);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!("Reconnect cancelled");
                }
                () = tokio::time::sleep(delay) => {
                    upstream.connect().await;
                }
            }
        });

        true
    }

    /// Reset backoff after a successful connect.
    pub fn on_connected(&self) {
        self.policy.lock().reset();
    }

    /// Attempts made since the last successful connect.
    #[must_use]
    pub fn attempt_count(&self) -> u32 {
        self.policy.lock().attempt_count()
    }
}
