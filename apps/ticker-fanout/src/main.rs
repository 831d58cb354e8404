//! Ticker Fanout Binary
//!
//! Starts the market data fan-out broadcaster.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin ticker-fanout
//! ```
//!
//! # Environment Variables
//!
//! ## Recommended
//! - `POLYGON_API_KEY`: Polygon API key (missing key is logged, not fatal)
//!
//! ## Optional
//! - `POLYGON_WS_URL`: Upstream endpoint (default: wss://socket.polygon.io/stocks)
//! - `POLYGON_CHANNEL_PREFIX`: Channel prefix (default: AM)
//! - `FANOUT_TICK_INTERVAL_MS`: Broadcast period (default: 250)
//! - `FANOUT_SESSION_QUEUE_CAPACITY`: Per-client queue bound (default: 32)
//! - `FANOUT_EVENT_CHANNEL_CAPACITY`: Internal event channel (default: 1024)
//! - `FANOUT_RECONNECT_DELAY_INITIAL_MS`: First reconnect delay (default: 5000)
//! - `FANOUT_RECONNECT_DELAY_MAX_MS`: Reconnect delay cap (default: 5000)
//! - `FANOUT_RECONNECT_DELAY_MULTIPLIER`: Backoff multiplier (default: 1.0)
//! - `FANOUT_RECONNECT_JITTER`: Jitter fraction (default: 0.0)
//! - `FANOUT_MAX_RECONNECT_ATTEMPTS`: 0 = unlimited (default: 0)
//! - `SUBSCRIPTION_POLICY`: immediate | ref-counted (default: immediate)
//! - `FANOUT_WS_PORT`: Client WebSocket port (default: 8080)
//! - `FANOUT_HEALTH_PORT`: Health/stats/metrics port (default: 8082)
//! - `LOG_FORMAT`: text | json (default: text)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: ticker-fanout)
//! - `RUST_LOG`: Log level (default: info)

use std::time::Duration;

use anyhow::Context;
use ticker_fanout::infrastructure::health::HealthServer;
use ticker_fanout::infrastructure::runtime::FanoutRuntime;
use ticker_fanout::infrastructure::telemetry;
use ticker_fanout::{FanoutConfig, init_metrics};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider already installed");
    }

    load_dotenv();

    // Initialize telemetry (tracing + optional OpenTelemetry)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting ticker fanout");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics();

    let config = FanoutConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();
    let runtime = FanoutRuntime::connect_to_upstream(&config, shutdown_token.clone());

    // Bind both ports before starting so a taken port fails fast
    let client_listener =
        tokio::net::TcpListener::bind(("0.0.0.0", config.server.ws_port))
            .await
            .with_context(|| format!("failed to bind client port {}", config.server.ws_port))?;
    let client_server = runtime.client_server(config.server.ws_port);

    let health_server = HealthServer::new(
        config.server.health_port,
        runtime.health_state(env!("CARGO_PKG_VERSION").to_string()),
        shutdown_token.child_token(),
    );

    runtime.broadcaster.start()?;

    let client_shutdown = shutdown_token.clone();
    let client_task = tokio::spawn(async move {
        if let Err(e) = client_server.serve(client_listener).await {
            tracing::error!(error = %e, "Client server error");
            client_shutdown.cancel();
        }
    });

    let health_shutdown = shutdown_token.clone();
    let health_task = tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
            health_shutdown.cancel();
        }
    });

    tracing::info!("Ticker fanout ready");

    await_shutdown(shutdown_token).await;

    let drain = async {
        runtime.broadcaster.stop().await;
        let _ = client_task.await;
        let _ = health_task.await;
    };
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, drain).await.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Graceful shutdown timed out"
        );
    }

    tracing::info!("Ticker fanout stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &FanoutConfig) {
    tracing::info!(
        url = %config.upstream.url,
        channel_prefix = %config.upstream.channel_prefix,
        policy = config.subscription_policy.as_str(),
        tick_ms = config.broadcast.tick_interval.as_millis(),
        ws_port = config.server.ws_port,
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        reconnect_initial_ms = config.reconnect.delay_initial.as_millis(),
        reconnect_max_ms = config.reconnect.delay_max.as_millis(),
        multiplier = config.reconnect.delay_multiplier,
        max_attempts = config.reconnect.max_attempts,
        queue_capacity = config.broadcast.session_queue_capacity,
        "Pipeline tuning"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT) or an internal cancel.
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
        () = shutdown_token.cancelled() => {
            tracing::warn!("Internal shutdown requested");
        }
    }

    shutdown_token.cancel();
}
