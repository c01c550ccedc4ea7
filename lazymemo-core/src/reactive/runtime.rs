//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects signals, lazy memos
//! and effects. It owns the propagation pass: when a signal changes, the
//! runtime marks dependents and then drains two queues.
//!
//! # How It Works
//!
//! 1. A signal write marks its direct subscribers `Dirty`. Those subscribers
//!    mark their own dependents `MaybeDirty`, recursively.
//!
//! 2. Every node that leaves the `Clean` state schedules itself exactly once,
//!    derived nodes (memos) in one queue and effects in another.
//!
//! 3. When the outermost batch ends, the runtime flushes: all derived nodes
//!    first, then effects. A node that is `MaybeDirty` asks its sources to
//!    update before deciding whether to rerun, so a reader never observes a
//!    source that has not yet recomputed for this pass.
//!
//! # Thread Safety
//!
//! Node state is shared behind `Arc` and locks, but each thread drives its
//! own propagation passes. The scheduler queues live in thread-local storage.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::context::ReactiveContext;
use super::subscriber::{Subscriber, SubscriberId};

/// The kind of computation a subscriber is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A derived node (memo). Caches a value and may have dependents.
    Derived,

    /// An effect node. A leaf that produces side effects, not values.
    Effect,
}

/// A computation that can be notified when its sources change.
pub trait Reactive: Send + Sync {
    /// Get the subscriber ID for this computation.
    fn subscriber_id(&self) -> SubscriberId;

    /// Whether this computation is a derived value or an effect.
    fn kind(&self) -> NodeKind;

    /// A direct source changed: the computation must rerun.
    fn mark_dirty(&self);

    /// An indirect source might have changed: the computation must check.
    fn mark_maybe_dirty(&self);

    /// Bring the computation up to date. Called by the scheduler.
    fn run(&self);
}

/// Something a computation can read and subscribe to.
pub trait Source: Send + Sync {
    /// Unique identifier of this source.
    fn source_id(&self) -> u64;

    /// Register a subscriber to be notified on change.
    fn add_subscriber(&self, subscriber: Subscriber);

    /// Remove a subscriber.
    fn remove_subscriber(&self, subscriber_id: SubscriberId);

    /// Make sure the source's value is current.
    ///
    /// Returns `true` if the source recomputed to a different value during
    /// this call.
    fn update_if_necessary(&self) -> bool;
}

/// A shared, type-erased handle to a [`Source`].
#[derive(Clone)]
pub struct AnySource(Arc<dyn Source>);

impl AnySource {
    /// Wrap a source.
    pub fn new(source: Arc<dyn Source>) -> Self {
        Self(source)
    }

    /// Unique identifier of the wrapped source.
    pub fn id(&self) -> u64 {
        self.0.source_id()
    }

    /// Subscribe a computation to this source.
    pub fn subscribe(&self, subscriber: Subscriber) {
        self.0.add_subscriber(subscriber);
    }

    /// Unsubscribe a computation from this source.
    pub fn unsubscribe(&self, subscriber_id: SubscriberId) {
        self.0.remove_subscriber(subscriber_id);
    }

    /// See [`Source::update_if_necessary`].
    pub fn update_if_necessary(&self) -> bool {
        self.0.update_if_necessary()
    }
}

impl std::fmt::Debug for AnySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AnySource").field(&self.id()).finish()
    }
}

/// Counter for generating unique source IDs.
static SOURCE_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a new unique source ID.
pub(crate) fn next_source_id() -> u64 {
    SOURCE_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

#[derive(Default)]
struct Scheduler {
    batch_depth: usize,
    flushing: bool,
    derived: VecDeque<Subscriber>,
    effects: VecDeque<Subscriber>,
}

thread_local! {
    static SCHEDULER: RefCell<Scheduler> = RefCell::new(Scheduler::default());
}

/// Ends a batch. Flushes when the outermost batch closes.
struct BatchGuard;

impl Drop for BatchGuard {
    fn drop(&mut self) {
        let outermost = SCHEDULER.with(|scheduler| {
            let mut scheduler = scheduler.borrow_mut();
            scheduler.batch_depth -= 1;
            scheduler.batch_depth == 0
        });

        // Never run user code while unwinding.
        if outermost && !std::thread::panicking() {
            Runtime::flush();
        }
    }
}

struct FlushGuard;

impl Drop for FlushGuard {
    fn drop(&mut self) {
        SCHEDULER.with(|scheduler| scheduler.borrow_mut().flushing = false);
    }
}

/// The reactive runtime.
///
/// All state is per thread; the type only groups the entry points.
pub struct Runtime;

impl Runtime {
    /// Run `f` as one propagation pass.
    ///
    /// Writes inside `f` only mark and queue dependents. Queued computations
    /// run once, after the outermost batch returns.
    pub fn batch<R>(f: impl FnOnce() -> R) -> R {
        SCHEDULER.with(|scheduler| scheduler.borrow_mut().batch_depth += 1);
        let _guard = BatchGuard;
        f()
    }

    /// Queue a computation for the current propagation pass.
    ///
    /// Callers schedule a node only on its transition out of `Clean`, so a
    /// node sits in the queue at most once.
    pub fn schedule(subscriber: Subscriber, kind: NodeKind) {
        SCHEDULER.with(|scheduler| {
            let mut scheduler = scheduler.borrow_mut();
            match kind {
                NodeKind::Derived => scheduler.derived.push_back(subscriber),
                NodeKind::Effect => scheduler.effects.push_back(subscriber),
            }
        });
    }

    /// Mark every subscriber as dirty and flush, as one pass.
    pub fn notify(subscribers: &[Subscriber]) {
        if subscribers.is_empty() {
            return;
        }
        Self::batch(|| {
            for subscriber in subscribers {
                subscriber.mark_dirty();
            }
        });
    }

    /// Drain the queues: derived nodes first, then effects.
    ///
    /// Does nothing inside a batch or while a flush is already running; the
    /// outer flush picks up anything queued in the meantime.
    pub fn flush() {
        let skip = SCHEDULER.with(|scheduler| {
            let mut scheduler = scheduler.borrow_mut();
            if scheduler.flushing || scheduler.batch_depth > 0 {
                true
            } else {
                scheduler.flushing = true;
                false
            }
        });
        if skip {
            return;
        }
        let _guard = FlushGuard;

        loop {
            let next = SCHEDULER.with(|scheduler| {
                let mut scheduler = scheduler.borrow_mut();
                scheduler
                    .derived
                    .pop_front()
                    .or_else(|| scheduler.effects.pop_front())
            });
            match next {
                Some(subscriber) => subscriber.run(),
                None => break,
            }
        }
    }

    /// Number of computations waiting for the next flush.
    pub fn pending_count() -> usize {
        SCHEDULER.with(|scheduler| {
            let scheduler = scheduler.borrow();
            scheduler.derived.len() + scheduler.effects.len()
        })
    }

    /// Check if a batch is currently open.
    pub fn is_batching() -> bool {
        SCHEDULER.with(|scheduler| scheduler.borrow().batch_depth > 0)
    }

    /// Get the current subscriber being tracked, if any.
    pub fn current_subscriber() -> Option<SubscriberId> {
        ReactiveContext::current_subscriber()
    }

    /// Check if we're inside a tracking context.
    pub fn is_tracking() -> bool {
        ReactiveContext::is_active()
    }
}
