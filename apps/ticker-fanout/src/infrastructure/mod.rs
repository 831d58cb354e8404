//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Polygon WebSocket upstream adapter.
pub mod polygon;

/// Client session registry and fan-out.
pub mod broadcast;

/// Client WebSocket server.
pub mod websocket;

/// Configuration loading.
pub mod config;

/// Health, stats, and metrics HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Logging and OpenTelemetry tracing integration.
pub mod telemetry;

/// Service assembly.
pub mod runtime;
