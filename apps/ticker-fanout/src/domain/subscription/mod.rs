//! Subscription Registry
//!
//! Tracks the set of symbols that downstream clients want from the upstream
//! feed, and works out which upstream subscribe/unsubscribe commands a
//! client request translates into.
//!
//! # Policies
//!
//! - [`UnsubscribePolicy::Immediate`]: a flat set. Any client's unsubscribe
//!   removes the symbol upstream, even if other clients still want it.
//!   Client disconnects leave the set untouched.
//! - [`UnsubscribePolicy::RefCounted`]: each session holds a reference to
//!   its symbols. Upstream subscribe happens when a symbol's count goes
//!   0→1 and unsubscribe when it goes 1→0, including on disconnect.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use serde::Serialize;

pub use crate::domain::streaming::Symbol;

// =============================================================================
// Types
// =============================================================================

/// Unique identifier for a downstream client session.
pub type SessionId = u64;

/// How unsubscribe requests affect the upstream subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnsubscribePolicy {
    /// Flat set; unsubscribe always forwards upstream.
    #[default]
    Immediate,
    /// Per-session reference counts; unsubscribe forwards on the last release.
    RefCounted,
}

impl UnsubscribePolicy {
    /// Parse a policy name, accepting `immediate` and `ref-counted`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "immediate" | "flat" => Some(Self::Immediate),
            "ref-counted" | "refcounted" | "ref_counted" => Some(Self::RefCounted),
            _ => None,
        }
    }

    /// Get the policy name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::RefCounted => "ref-counted",
        }
    }
}

// =============================================================================
// Subscription Changes
// =============================================================================

/// Changes to upstream subscriptions, in request order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionChanges {
    /// Symbols to subscribe to.
    pub subscribe: Vec<Symbol>,
    /// Symbols to unsubscribe from.
    pub unsubscribe: Vec<Symbol>,
}

impl SubscriptionChanges {
    /// Check if there are any changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribe.is_empty() && self.unsubscribe.is_empty()
    }

    /// Create changes with only subscribes.
    #[must_use]
    pub fn subscribe_only(symbols: impl IntoIterator<Item = Symbol>) -> Self {
        Self {
            subscribe: symbols.into_iter().collect(),
            unsubscribe: Vec::new(),
        }
    }

    /// Create changes with only unsubscribes.
    #[must_use]
    pub fn unsubscribe_only(symbols: impl IntoIterator<Item = Symbol>) -> Self {
        Self {
            subscribe: Vec::new(),
            unsubscribe: symbols.into_iter().collect(),
        }
    }
}

/// Drop empty entries and duplicates, keeping first-seen order.
fn normalize(symbols: &[Symbol]) -> Vec<Symbol> {
    let mut seen = HashSet::with_capacity(symbols.len());
    symbols
        .iter()
        .filter(|s| !s.is_empty() && seen.insert(s.as_str()))
        .cloned()
        .collect()
}

// =============================================================================
// Registry State
// =============================================================================

#[derive(Debug, Default)]
struct RegistryState {
    /// Symbols each session asked for (ref-counted policy only).
    session_symbols: HashMap<SessionId, HashSet<Symbol>>,
    /// Symbol to number of sessions holding it (always 1 under the flat policy).
    symbol_refcount: HashMap<Symbol, usize>,
}

impl RegistryState {
    /// Returns symbols whose count went 0→1.
    fn acquire(&mut self, session: SessionId, symbols: &[Symbol]) -> Vec<Symbol> {
        let session_set = self.session_symbols.entry(session).or_default();
        let mut new_upstream = Vec::new();

        for symbol in symbols {
            if !session_set.insert(symbol.clone()) {
                continue;
            }

            let refcount = self.symbol_refcount.entry(symbol.clone()).or_insert(0);
            *refcount += 1;

            if *refcount == 1 {
                new_upstream.push(symbol.clone());
            }
        }

        new_upstream
    }

    /// Returns symbols whose count went 1→0.
    fn release(&mut self, session: SessionId, symbols: &[Symbol]) -> Vec<Symbol> {
        let Some(session_set) = self.session_symbols.get_mut(&session) else {
            return vec![];
        };

        let mut removed = Vec::new();
        for symbol in symbols {
            if !session_set.remove(symbol) {
                continue;
            }
            if decrement(&mut self.symbol_refcount, symbol) {
                removed.push(symbol.clone());
            }
        }

        if session_set.is_empty() {
            self.session_symbols.remove(&session);
        }

        removed
    }

    fn release_all(&mut self, session: SessionId) -> Vec<Symbol> {
        let Some(session_set) = self.session_symbols.remove(&session) else {
            return vec![];
        };

        let mut removed: Vec<Symbol> = session_set
            .into_iter()
            .filter(|symbol| decrement(&mut self.symbol_refcount, symbol))
            .collect();
        removed.sort_unstable();
        removed
    }
}

/// Decrement a refcount, dropping the entry at zero. Returns true on 1→0.
fn decrement(refcounts: &mut HashMap<Symbol, usize>, symbol: &str) -> bool {
    let Some(refcount) = refcounts.get_mut(symbol) else {
        return false;
    };
    *refcount = refcount.saturating_sub(1);
    if *refcount == 0 {
        refcounts.remove(symbol);
        true
    } else {
        false
    }
}

// =============================================================================
// Subscription Registry
// =============================================================================

/// Thread-safe registry of the symbols requested upstream.
///
/// # Example
///
/// ```rust
/// use ticker_fanout::domain::subscription::{SubscriptionRegistry, UnsubscribePolicy};
///
/// let registry = SubscriptionRegistry::new(UnsubscribePolicy::RefCounted);
///
/// // Session 1 subscribes to AAPL - forwarded upstream
/// let changes = registry.add(1, &["AAPL".to_string()]);
/// assert_eq!(changes.subscribe, vec!["AAPL".to_string()]);
///
/// // Session 2 also subscribes - already upstream
/// let changes = registry.add(2, &["AAPL".to_string()]);
/// assert!(changes.subscribe.is_empty());
///
/// // Session 1 leaves - still wanted by session 2
/// let changes = registry.remove(1, &["AAPL".to_string()]);
/// assert!(changes.unsubscribe.is_empty());
///
/// // Session 2 leaves - unsubscribe upstream
/// let changes = registry.remove(2, &["AAPL".to_string()]);
/// assert_eq!(changes.unsubscribe, vec!["AAPL".to_string()]);
/// ```
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    policy: UnsubscribePolicy,
    state: RwLock<RegistryState>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(policy: UnsubscribePolicy) -> Self {
        Self {
            policy,
            state: RwLock::new(RegistryState::default()),
        }
    }

    /// Active policy.
    #[must_use]
    pub const fn policy(&self) -> UnsubscribePolicy {
        self.policy
    }

    /// Merge `symbols` into the set on behalf of `session`.
    ///
    /// Returns the symbols to forward as an upstream subscribe.
    pub fn add(&self, session: SessionId, symbols: &[Symbol]) -> SubscriptionChanges {
        let symbols = normalize(symbols);
        if symbols.is_empty() {
            return SubscriptionChanges::default();
        }

        let mut state = self.state.write();
        match self.policy {
            UnsubscribePolicy::Immediate => {
                for symbol in &symbols {
                    state.symbol_refcount.insert(symbol.clone(), 1);
                }
                SubscriptionChanges::subscribe_only(symbols)
            }
            UnsubscribePolicy::RefCounted => {
                SubscriptionChanges::subscribe_only(state.acquire(session, &symbols))
            }
        }
    }

    /// Remove `symbols` on behalf of `session`.
    ///
    /// Returns the symbols to forward as an upstream unsubscribe.
    pub fn remove(&self, session: SessionId, symbols: &[Symbol]) -> SubscriptionChanges {
        let symbols = normalize(symbols);
        if symbols.is_empty() {
            return SubscriptionChanges::default();
        }

        let mut state = self.state.write();
        match self.policy {
            UnsubscribePolicy::Immediate => {
                for symbol in &symbols {
                    state.symbol_refcount.remove(symbol);
                }
                SubscriptionChanges::unsubscribe_only(symbols)
            }
            UnsubscribePolicy::RefCounted => {
                SubscriptionChanges::unsubscribe_only(state.release(session, &symbols))
            }
        }
    }

    /// Handle a session going away.
    ///
    /// Only the ref-counted policy releases anything here.
    pub fn release_session(&self, session: SessionId) -> SubscriptionChanges {
        match self.policy {
            UnsubscribePolicy::Immediate => SubscriptionChanges::default(),
            UnsubscribePolicy::RefCounted => {
                SubscriptionChanges::unsubscribe_only(self.state.write().release_all(session))
            }
        }
    }

    /// Every subscribed symbol, sorted.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Symbol> {
        let mut symbols: Vec<Symbol> = self.state.read().symbol_refcount.keys().cloned().collect();
        symbols.sort_unstable();
        symbols
    }

    /// Whether `symbol` is subscribed.
    #[must_use]
    pub fn contains(&self, symbol: &str) -> bool {
        self.state.read().symbol_refcount.contains_key(symbol)
    }

    /// Number of subscribed symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().symbol_refcount.len()
    }

    /// Whether nothing is subscribed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.read().symbol_refcount.is_empty()
    }

    /// Number of sessions holding references (ref-counted policy only).
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.state.read().session_symbols.len()
    }
}

// =============================================================================
// Tests
// =============================================================================
