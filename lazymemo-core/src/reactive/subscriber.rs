//! Subscriber types for the reactive system.
//!
//! A Subscriber represents any computation that depends on reactive values.
//! This includes lazy memos and effects.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use super::runtime::{NodeKind, Reactive};

/// Unique identifier for a subscriber.
///
/// Each subscriber (lazy memo or effect) gets a unique ID when created.
/// This ID is used to track dependencies and avoid duplicate subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    ///
    /// Uses an atomic counter to ensure uniqueness across threads.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// A non-owning handle to a subscribed computation.
///
/// Sources keep these in their subscriber lists. The handle never keeps the
/// computation alive: once the computation is dropped, notifications to it
/// are silently skipped and the source prunes the entry.
#[derive(Clone)]
pub struct Subscriber {
    id: SubscriberId,
    node: Weak<dyn Reactive>,
}

impl Subscriber {
    /// Create a handle to the given computation.
    pub fn new(node: Weak<dyn Reactive>, id: SubscriberId) -> Self {
        Self { id, node }
    }

    /// Create a handle from a strong reference.
    pub fn from_arc(node: &Arc<dyn Reactive>) -> Self {
        Self {
            id: node.subscriber_id(),
            node: Arc::downgrade(node),
        }
    }

    /// Get the subscriber's unique ID.
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Check whether the underlying computation still exists.
    pub fn is_alive(&self) -> bool {
        self.node.strong_count() > 0
    }

    /// Kind of the underlying computation, if it is still alive.
    pub fn kind(&self) -> Option<NodeKind> {
        self.node.upgrade().map(|node| node.kind())
    }

    /// Notify the subscriber that a direct source changed.
    pub fn mark_dirty(&self) {
        if let Some(node) = self.node.upgrade() {
            node.mark_dirty();
        }
    }

    /// Notify the subscriber that an indirect source might have changed.
    pub fn mark_maybe_dirty(&self) {
        if let Some(node) = self.node.upgrade() {
            node.mark_maybe_dirty();
        }
    }

    /// Bring the subscriber up to date. Called by the scheduler.
    pub fn run(&self) {
        if let Some(node) = self.node.upgrade() {
            node.run();
        }
    }
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("alive", &self.is_alive())
            .finish()
    }
}
