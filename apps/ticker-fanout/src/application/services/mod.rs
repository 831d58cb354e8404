//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `broadcaster`: the manager service and its event dispatcher
//! - `scheduler`: periodic coalescer flush into the client fan-out
//! - `reconnect`: reconnect delay policy and per-episode supervisor

pub mod broadcaster;
pub mod reconnect;
pub mod scheduler;

pub use broadcaster::{
    BroadcasterError, BroadcasterSettings, BroadcasterStats, EventDispatcher, TickerBroadcaster,
};
pub use reconnect::{ReconnectConfig, ReconnectPolicy, ReconnectSupervisor};
pub use scheduler::{BatchGate, BroadcastScheduler, DEFAULT_TICK_INTERVAL};
