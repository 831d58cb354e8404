//! Runtime Assembly
//!
//! Wires the coalescer, registry, gateway, connector, and broadcaster around
//! one feed event channel. The binary and the integration tests build the
//! service the same way; only the upstream transport differs.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{ClientFanout, UpstreamControl, UpstreamTransport};
use crate::application::services::{BatchGate, TickerBroadcaster};
use crate::domain::streaming::coalescer::UpdateCoalescer;
use crate::domain::subscription::SubscriptionRegistry;
use crate::infrastructure::broadcast::ClientGateway;
use crate::infrastructure::config::FanoutConfig;
use crate::infrastructure::health::HealthServerState;
use crate::infrastructure::polygon::{ConnectorConfig, TungsteniteTransport, UpstreamConnector};
use crate::infrastructure::websocket::ClientServer;

/// Fully wired fan-out service.
pub struct FanoutRuntime {
    /// Latest update per symbol.
    pub coalescer: Arc<UpdateCoalescer>,
    /// Upstream subscription set.
    pub registry: Arc<SubscriptionRegistry>,
    /// Downstream session registry and fan-out.
    pub gateway: Arc<ClientGateway>,
    /// Upstream connector.
    pub connector: Arc<UpstreamConnector>,
    /// Manager service.
    pub broadcaster: Arc<TickerBroadcaster>,
    /// Holds batches back while a disconnect notice is in flight.
    pub gate: Arc<BatchGate>,
    cancel: CancellationToken,
}

impl FanoutRuntime {
    /// Assemble the service over `transport`. Nothing runs until
    /// [`TickerBroadcaster::start`] is called.
    #[must_use]
    pub fn new(
        config: &FanoutConfig,
        transport: Arc<dyn UpstreamTransport>,
        cancel: CancellationToken,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(config.broadcast.event_channel_capacity);

        let coalescer = Arc::new(UpdateCoalescer::new());
        let registry = Arc::new(SubscriptionRegistry::new(config.subscription_policy));
        let gate = Arc::new(BatchGate::new());

        let gateway = Arc::new(ClientGateway::new(
            Arc::clone(&coalescer),
            events_tx.clone(),
            config.broadcast.session_queue_capacity,
        ));

        let connector = UpstreamConnector::new(
            ConnectorConfig {
                channel_prefix: config.upstream.channel_prefix.clone(),
                credentials: config.upstream.credentials.clone(),
            },
            transport,
            Arc::clone(&registry),
            Arc::clone(&gate),
            events_tx,
            cancel.child_token(),
        );

        let upstream: Arc<dyn UpstreamControl> = Arc::clone(&connector) as Arc<dyn UpstreamControl>;
        let fanout: Arc<dyn ClientFanout> = Arc::clone(&gateway) as Arc<dyn ClientFanout>;
        let broadcaster = Arc::new(TickerBroadcaster::new(
            config.broadcaster_settings(),
            Arc::clone(&coalescer),
            Arc::clone(&registry),
            upstream,
            fanout,
            Arc::clone(&gate),
            events_rx,
            cancel.clone(),
        ));

        Self {
            coalescer,
            registry,
            gateway,
            connector,
            broadcaster,
            gate,
            cancel,
        }
    }

    /// Assemble the service over a real WebSocket connection to the
    /// configured endpoint.
    #[must_use]
    pub fn connect_to_upstream(config: &FanoutConfig, cancel: CancellationToken) -> Self {
        let transport = Arc::new(TungsteniteTransport::new(config.upstream.url.clone()));
        Self::new(config, transport, cancel)
    }

    /// Client WebSocket server bound to this runtime's gateway.
    #[must_use]
    pub fn client_server(&self, port: u16) -> ClientServer {
        ClientServer::new(port, Arc::clone(&self.gateway), self.cancel.child_token())
    }

    /// Health server state bound to this runtime's broadcaster.
    #[must_use]
    pub fn health_state(&self, version: String) -> Arc<HealthServerState> {
        Arc::new(HealthServerState::new(version, Arc::clone(&self.broadcaster)))
    }

    /// Shutdown token shared by every component.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}
