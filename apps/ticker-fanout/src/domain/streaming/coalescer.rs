//! Update Coalescer
//!
//! Keeps only the most recent [`TickerUpdate`] per symbol. Bursts of
//! upstream updates collapse into one entry, so the broadcast rate is
//! decoupled from the arrival rate.
//!
//! Flushing is read-only: the buffer is a "latest known state" view, which
//! lets late joiners receive a complete snapshot at any time.

use std::collections::HashMap;

use parking_lot::RwLock;

use super::{Symbol, TickerUpdate};

/// Latest-value-wins buffer keyed by symbol.
#[derive(Debug, Default)]
pub struct UpdateCoalescer {
    latest: RwLock<HashMap<Symbol, TickerUpdate>>,
}

impl UpdateCoalescer {
    /// Create an empty coalescer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `update`, replacing any previous entry for its symbol.
    pub fn add(&self, update: TickerUpdate) {
        self.latest.write().insert(update.symbol.clone(), update);
    }

    /// Store a batch of updates in order; later entries win.
    pub fn add_all(&self, updates: impl IntoIterator<Item = TickerUpdate>) {
        let mut latest = self.latest.write();
        for update in updates {
            latest.insert(update.symbol.clone(), update);
        }
    }

    /// Copy every current entry, ordered by symbol.
    ///
    /// The buffer is left untouched.
    #[must_use]
    pub fn flush(&self) -> Vec<TickerUpdate> {
        let mut snapshot: Vec<TickerUpdate> = self.latest.read().values().cloned().collect();
        snapshot.sort_unstable_by(|a, b| a.symbol.cmp(&b.symbol));
        snapshot
    }

    /// Latest entry for a symbol.
    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<TickerUpdate> {
        self.latest.read().get(symbol).cloned()
    }

    /// Whether no symbol has been buffered yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.latest.read().is_empty()
    }

    /// Number of buffered symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.latest.read().len()
    }
}
