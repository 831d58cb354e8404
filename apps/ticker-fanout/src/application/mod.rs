//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for the upstream feed and client fan-out.
pub mod ports;

/// Broadcaster, scheduler, and reconnect supervision.
pub mod services;
