//! Domain Layer - Core streaming types and business logic.
//!
//! This layer contains the ticker update model, the coalescing buffer,
//! and subscription tracking. Nothing here performs I/O.

/// Ticker updates, connectivity status, and the update coalescer.
pub mod streaming;

/// Subscription tracking and upstream change computation.
pub mod subscription;
