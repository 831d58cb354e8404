//! Ticker Broadcaster
//!
//! The manager service. It owns the event dispatcher, the broadcast
//! scheduler, and the reconnect supervisor, and exposes an explicit
//! `start`/`stop` lifecycle plus a stats query.
//!
//! Adapters never call each other directly: the upstream connector and the
//! client gateway emit [`FeedEvent`]s, and the dispatcher applies them to
//! the coalescer, the registry, and the ports.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::reconnect::{ReconnectConfig, ReconnectSupervisor};
use super::scheduler::{BatchGate, BroadcastScheduler, DEFAULT_TICK_INTERVAL};
use crate::application::ports::{ClientFanout, FeedEvent, UpstreamControl};
use crate::domain::streaming::ConnectionStatus;
use crate::domain::streaming::coalescer::UpdateCoalescer;
use crate::domain::subscription::SubscriptionRegistry;

// =============================================================================
// Settings and Stats
// =============================================================================

/// Broadcaster tuning.
#[derive(Debug, Clone)]
pub struct BroadcasterSettings {
    /// Scheduler period.
    pub tick_interval: Duration,
    /// Reconnect delay policy.
    pub reconnect: ReconnectConfig,
}

impl Default for BroadcasterSettings {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Operational snapshot served by the stats endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcasterStats {
    /// Whether the upstream link is connected.
    pub connected: bool,
    /// Symbols currently requested upstream.
    pub subscribed_symbol_count: usize,
    /// Symbols held in the coalescer.
    pub buffered_symbol_count: usize,
    /// Connected downstream clients.
    pub connected_client_count: usize,
}

/// Broadcaster lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum BroadcasterError {
    /// `start` was called more than once.
    #[error("broadcaster already started")]
    AlreadyStarted,
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Applies feed events to the domain state and ports.
///
/// Every handler is synchronous; the only awaits live in the loop that
/// feeds it. Each disconnect notice releases the [`BatchGate`] hold the
/// connector took when it retired the episode.
pub struct EventDispatcher {
    coalescer: Arc<UpdateCoalescer>,
    registry: Arc<SubscriptionRegistry>,
    upstream: Arc<dyn UpstreamControl>,
    fanout: Arc<dyn ClientFanout>,
    supervisor: Arc<ReconnectSupervisor>,
    gate: Arc<BatchGate>,
}

impl EventDispatcher {
    /// Create a dispatcher over the given collaborators.
    #[must_use]
    pub fn new(
        coalescer: Arc<UpdateCoalescer>,
        registry: Arc<SubscriptionRegistry>,
        upstream: Arc<dyn UpstreamControl>,
        fanout: Arc<dyn ClientFanout>,
        supervisor: Arc<ReconnectSupervisor>,
        gate: Arc<BatchGate>,
    ) -> Self {
        Self {
            coalescer,
            registry,
            upstream,
            fanout,
            supervisor,
            gate,
        }
    }

    /// Handle one event.
    pub fn dispatch(&self, event: FeedEvent) {
        match event {
            FeedEvent::Connected { episode } => {
                tracing::info!(episode, "Upstream connected");
                self.supervisor.on_connected();
                self.fanout.broadcast_status(&ConnectionStatus::connected());
            }
            FeedEvent::LinkError { episode, error } => {
                tracing::warn!(episode, error = %error, "Upstream link error");
                self.fanout
                    .broadcast_status(&ConnectionStatus::disconnected(Some(error)));
                self.gate.release();
            }
            FeedEvent::Disconnected { episode, error } => {
                tracing::warn!(episode, error = ?error, "Upstream disconnected");
                self.fanout
                    .broadcast_status(&ConnectionStatus::disconnected(error));
                self.gate.release();
                self.supervisor.on_disconnect(episode);
            }
            FeedEvent::FrameDecoded(updates) => {
                tracing::trace!(updates = updates.len(), "Coalescing frame");
                self.coalescer.add_all(updates);
            }
            FeedEvent::ClientSubscribed { session, symbols } => {
                let changes = self.registry.add(session, &symbols);
                tracing::debug!(
                    session,
                    requested = symbols.len(),
                    forwarded = changes.subscribe.len(),
                    "Client subscribed"
                );
                if !changes.subscribe.is_empty() {
                    self.upstream.subscribe(&changes.subscribe);
                }
            }
            FeedEvent::ClientUnsubscribed { session, symbols } => {
                let changes = self.registry.remove(session, &symbols);
                tracing::debug!(
                    session,
                    requested = symbols.len(),
                    forwarded = changes.unsubscribe.len(),
                    "Client unsubscribed"
                );
                if !changes.unsubscribe.is_empty() {
                    self.upstream.unsubscribe(&changes.unsubscribe);
                }
            }
            FeedEvent::ClientLeft { session } => {
                let changes = self.registry.release_session(session);
                if !changes.unsubscribe.is_empty() {
                    tracing::debug!(
                        session,
                        released = changes.unsubscribe.len(),
                        "Released subscriptions of departed client"
                    );
                    self.upstream.unsubscribe(&changes.unsubscribe);
                }
            }
        }
    }
}

// =============================================================================
// Ticker Broadcaster
// =============================================================================

/// Manager service tying the fan-out together.
pub struct TickerBroadcaster {
    coalescer: Arc<UpdateCoalescer>,
    registry: Arc<SubscriptionRegistry>,
    upstream: Arc<dyn UpstreamControl>,
    fanout: Arc<dyn ClientFanout>,
    dispatcher: Arc<EventDispatcher>,
    gate: Arc<BatchGate>,
    tick_interval: Duration,
    events: Mutex<Option<mpsc::Receiver<FeedEvent>>>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TickerBroadcaster {
    /// Create a stopped broadcaster.
    ///
    /// `events` must be the receiving half of the channel the connector and
    /// the gateway publish to, and `gate` the one the connector holds when
    /// it retires a link.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: BroadcasterSettings,
        coalescer: Arc<UpdateCoalescer>,
        registry: Arc<SubscriptionRegistry>,
        upstream: Arc<dyn UpstreamControl>,
        fanout: Arc<dyn ClientFanout>,
        gate: Arc<BatchGate>,
        events: mpsc::Receiver<FeedEvent>,
        cancel: CancellationToken,
    ) -> Self {
        let supervisor = Arc::new(ReconnectSupervisor::new(
            settings.reconnect,
            Arc::clone(&upstream),
            cancel.child_token(),
        ));
        let dispatcher = Arc::new(EventDispatcher::new(
            Arc::clone(&coalescer),
            Arc::clone(&registry),
            Arc::clone(&upstream),
            Arc::clone(&fanout),
            supervisor,
            Arc::clone(&gate),
        ));

        Self {
            coalescer,
            registry,
            upstream,
            fanout,
            dispatcher,
            gate,
            tick_interval: settings.tick_interval,
            events: Mutex::new(Some(events)),
            cancel,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the dispatcher and scheduler, then open the upstream link.
    ///
    /// # Errors
    ///
    /// Returns [`BroadcasterError::AlreadyStarted`] on a second call.
    pub fn start(&self) -> Result<(), BroadcasterError> {
        let mut events = self
            .events
            .lock()
            .take()
            .ok_or(BroadcasterError::AlreadyStarted)?;

        let dispatcher = Arc::clone(&self.dispatcher);
        let cancel = self.cancel.clone();
        let dispatch_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    event = events.recv() => match event {
                        Some(event) => dispatcher.dispatch(event),
                        None => break,
                    },
                }
            }
            tracing::debug!("Event dispatcher stopped");
        });

        let scheduler = BroadcastScheduler::new(
            Arc::clone(&self.coalescer),
            Arc::clone(&self.fanout),
            Arc::clone(&self.gate),
            self.tick_interval,
        );
        let scheduler_task = tokio::spawn(scheduler.run(self.cancel.child_token()));

        let upstream = Arc::clone(&self.upstream);
        let connect_task = tokio::spawn(async move {
            upstream.connect().await;
        });

        self.tasks
            .lock()
            .extend([dispatch_task, scheduler_task, connect_task]);

        tracing::info!(
            tick_ms = self.tick_interval.as_millis(),
            policy = self.registry.policy().as_str(),
            "Ticker broadcaster started"
        );
        Ok(())
    }

    /// Stop ticking, stop dispatching, cancel pending reconnects, and close
    /// the upstream link. Waits for the background tasks to finish.
    pub async fn stop(&self) {
        self.cancel.cancel();
        self.upstream.close();

        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await
                && e.is_panic()
            {
                tracing::error!(error = %e, "Broadcaster task panicked");
            }
        }

        tracing::info!("Ticker broadcaster stopped");
    }

    /// Current operational snapshot.
    #[must_use]
    pub fn stats(&self) -> BroadcasterStats {
        BroadcasterStats {
            connected: self.upstream.is_connected(),
            subscribed_symbol_count: self.registry.len(),
            buffered_symbol_count: self.coalescer.len(),
            connected_client_count: self.fanout.client_count(),
        }
    }

    /// Whether the upstream link is connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.upstream.is_connected()
    }
}

#[cfg(test)]
mod tests {
    use mockall::predicate::eq;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::application::ports::{MockClientFanout, MockUpstreamControl};
    use crate::domain::streaming::{EventType, Ohlcv, TickerUpdate};
    use crate::domain::subscription::UnsubscribePolicy;

    fn update(symbol: &str, close: rust_decimal::Decimal) -> TickerUpdate {
        TickerUpdate::from_aggregate(
            symbol,
            EventType::Minute,
            Ohlcv {
                open: dec!(100),
                high: close,
                low: close,
                close,
                volume: dec!(1),
            },
            None,
            None,
        )
        .unwrap()
    }

    fn syms(symbols: &[&str]) -> Vec<String> {
        symbols.iter().map(ToString::to_string).collect()
    }

    fn dispatcher_with(
        upstream: MockUpstreamControl,
        fanout: MockClientFanout,
        policy: UnsubscribePolicy,
    ) -> (EventDispatcher, Arc<UpdateCoalescer>, Arc<SubscriptionRegistry>) {
        dispatcher_with_gate(upstream, fanout, policy, Arc::new(BatchGate::new()))
    }

    fn dispatcher_with_gate(
        upstream: MockUpstreamControl,
        fanout: MockClientFanout,
        policy: UnsubscribePolicy,
        gate: Arc<BatchGate>,
    ) -> (EventDispatcher, Arc<UpdateCoalescer>, Arc<SubscriptionRegistry>) {
        let upstream: Arc<dyn UpstreamControl> = Arc::new(upstream);
        let coalescer = Arc::new(UpdateCoalescer::new());
        let registry = Arc::new(SubscriptionRegistry::new(policy));
        let supervisor = Arc::new(ReconnectSupervisor::new(
            ReconnectConfig::default(),
            Arc::clone(&upstream),
            CancellationToken::new(),
        ));
        let dispatcher = EventDispatcher::new(
            Arc::clone(&coalescer),
            Arc::clone(&registry),
            upstream,
            Arc::new(fanout),
            supervisor,
            gate,
        );
        (dispatcher, coalescer, registry)
    }

    #[test]
    fn frame_decoded_feeds_coalescer() {
        let (dispatcher, coalescer, _) = dispatcher_with(
            MockUpstreamControl::new(),
            MockClientFanout::new(),
            UnsubscribePolicy::Immediate,
        );

        dispatcher.dispatch(FeedEvent::FrameDecoded(vec![
            update("AAPL", dec!(150)),
            update("AAPL", dec!(151)),
        ]));

        assert_eq!(coalescer.len(), 1);
        assert_eq!(coalescer.get("AAPL").unwrap().price, dec!(151));
    }

    #[test]
    fn client_subscribe_updates_registry_and_upstream() {
        let mut upstream = MockUpstreamControl::new();
        upstream
            .expect_subscribe()
            .withf(|symbols| symbols.len() == 1 && symbols[0] == "AAPL")
            .times(1)
            .return_const(true);

        let (dispatcher, _, registry) =
            dispatcher_with(upstream, MockClientFanout::new(), UnsubscribePolicy::Immediate);

        dispatcher.dispatch(FeedEvent::ClientSubscribed {
            session: 1,
            symbols: syms(&["AAPL"]),
        });

        assert!(registry.contains("AAPL"));
    }

    #[test]
    fn immediate_unsubscribe_forwards_even_when_shared() {
        let mut upstream = MockUpstreamControl::new();
        upstream.expect_subscribe().times(2).return_const(true);
        upstream
            .expect_unsubscribe()
            .withf(|symbols| symbols.len() == 1 && symbols[0] == "AAPL")
            .times(1)
            .return_const(true);

        let (dispatcher, _, registry) =
            dispatcher_with(upstream, MockClientFanout::new(), UnsubscribePolicy::Immediate);

        for session in [1, 2] {
            dispatcher.dispatch(FeedEvent::ClientSubscribed {
                session,
                symbols: syms(&["AAPL"]),
            });
        }
        dispatcher.dispatch(FeedEvent::ClientUnsubscribed {
            session: 1,
            symbols: syms(&["AAPL"]),
        });

        assert!(registry.is_empty());
    }

    #[test]
    fn client_left_only_releases_under_refcounting() {
        let mut upstream = MockUpstreamControl::new();
        upstream.expect_subscribe().times(1).return_const(true);
        upstream
            .expect_unsubscribe()
            .withf(|symbols| symbols.len() == 1 && symbols[0] == "MSFT")
            .times(1)
            .return_const(true);

        let (dispatcher, _, registry) =
            dispatcher_with(upstream, MockClientFanout::new(), UnsubscribePolicy::RefCounted);

        dispatcher.dispatch(FeedEvent::ClientSubscribed {
            session: 9,
            symbols: syms(&["MSFT"]),
        });
        dispatcher.dispatch(FeedEvent::ClientLeft { session: 9 });

        assert!(registry.is_empty());
    }

    #[test]
    fn client_left_is_noop_for_flat_set() {
        let mut upstream = MockUpstreamControl::new();
        upstream.expect_subscribe().times(1).return_const(true);
        upstream.expect_unsubscribe().times(0);

        let (dispatcher, _, registry) =
            dispatcher_with(upstream, MockClientFanout::new(), UnsubscribePolicy::Immediate);

        dispatcher.dispatch(FeedEvent::ClientSubscribed {
            session: 9,
            symbols: syms(&["MSFT"]),
        });
        dispatcher.dispatch(FeedEvent::ClientLeft { session: 9 });

        assert!(registry.contains("MSFT"));
    }

    #[test]
    fn connectivity_events_broadcast_status() {
        let mut fanout = MockClientFanout::new();
        let mut seq = mockall::Sequence::new();
        fanout
            .expect_broadcast_status()
            .with(eq(ConnectionStatus::connected()))
            .times(1)
            .in_sequence(&mut seq)
            .return_const(2_usize);
        fanout
            .expect_broadcast_status()
            .with(eq(ConnectionStatus::disconnected(Some("reset".to_string()))))
            .times(1)
            .in_sequence(&mut seq)
            .return_const(2_usize);

        let (dispatcher, _, _) =
            dispatcher_with(MockUpstreamControl::new(), fanout, UnsubscribePolicy::Immediate);

        dispatcher.dispatch(FeedEvent::Connected { episode: 1 });
        dispatcher.dispatch(FeedEvent::LinkError {
            episode: 1,
            error: "reset".to_string(),
        });
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_broadcasts_status_and_schedules_reconnect() {
        let mut upstream = MockUpstreamControl::new();
        upstream.expect_connect().times(1).return_const(());

        let mut fanout = MockClientFanout::new();
        fanout
            .expect_broadcast_status()
            .with(eq(ConnectionStatus::disconnected(None)))
            .times(2)
            .return_const(0_usize);

        let (dispatcher, _, _) =
            dispatcher_with(upstream, fanout, UnsubscribePolicy::Immediate);

        dispatcher.dispatch(FeedEvent::Disconnected {
            episode: 3,
            error: None,
        });
        dispatcher.dispatch(FeedEvent::Disconnected {
            episode: 3,
            error: None,
        });

        tokio::time::sleep(Duration::from_secs(6)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_notices_release_the_batch_gate() {
        let mut upstream = MockUpstreamControl::new();
        upstream.expect_connect().return_const(());

        let mut fanout = MockClientFanout::new();
        fanout.expect_broadcast_status().return_const(1_usize);

        let gate = Arc::new(BatchGate::new());
        let (dispatcher, _, _) = dispatcher_with_gate(
            upstream,
            fanout,
            UnsubscribePolicy::Immediate,
            Arc::clone(&gate),
        );

        gate.hold();
        gate.hold();
        dispatcher.dispatch(FeedEvent::LinkError {
            episode: 1,
            error: "reset".to_string(),
        });
        assert!(!gate.is_open());

        dispatcher.dispatch(FeedEvent::Connected { episode: 2 });
        assert!(!gate.is_open());

        dispatcher.dispatch(FeedEvent::Disconnected {
            episode: 2,
            error: None,
        });
        assert!(gate.is_open());
    }

    #[tokio::test]
    async fn start_twice_fails_and_stats_reflect_state() {
        let mut upstream = MockUpstreamControl::new();
        upstream.expect_connect().return_const(());
        upstream.expect_is_connected().return_const(false);
        upstream.expect_close().return_const(());

        let mut fanout = MockClientFanout::new();
        fanout.expect_client_count().return_const(4_usize);

        let coalescer = Arc::new(UpdateCoalescer::new());
        coalescer.add(update("AAPL", dec!(1)));
        let registry = Arc::new(SubscriptionRegistry::default());
        registry.add(1, &syms(&["AAPL", "MSFT"]));

        let (_tx, rx) = mpsc::channel(8);
        let broadcaster = TickerBroadcaster::new(
            BroadcasterSettings::default(),
            coalescer,
            registry,
            Arc::new(upstream),
            Arc::new(fanout),
            Arc::new(BatchGate::new()),
            rx,
            CancellationToken::new(),
        );

        broadcaster.start().unwrap();
        assert!(matches!(
            broadcaster.start(),
            Err(BroadcasterError::AlreadyStarted)
        ));

        assert_eq!(
            broadcaster.stats(),
            BroadcasterStats {
                connected: false,
                subscribed_symbol_count: 2,
                buffered_symbol_count: 1,
                connected_client_count: 4,
            }
        );

        broadcaster.stop().await;
    }

    #[test]
    fn stats_serialize_camel_case() {
        let stats = BroadcasterStats {
            connected: true,
            subscribed_symbol_count: 1,
            buffered_symbol_count: 2,
            connected_client_count: 3,
        };

        let json = serde_json::to_value(stats).unwrap();
        assert_eq!(json["connected"], true);
        assert_eq!(json["subscribedSymbolCount"], 1);
        assert_eq!(json["bufferedSymbolCount"], 2);
        assert_eq!(json["connectedClientCount"], 3);
    }
}
