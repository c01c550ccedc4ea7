//! Reactive Context
//!
//! The reactive context tracks which computation is currently running.
//! This enables automatic dependency tracking: when a source is read,
//! it is recorded against the current computation.
//!
//! # Implementation
//!
//! We use a thread-local stack to track the currently executing computation.
//! When entering a reactive context (e.g., running a memo or effect), we push
//! an entry onto the stack. When the computation completes, we pop it.
//!
//! Reading a source only *records* it in the entry. The computation decides
//! what to do with the collected set once it finishes, which lets a failed
//! computation throw the set away and keep its previous subscriptions.

use std::cell::RefCell;

use super::runtime::AnySource;
use super::subscriber::{Subscriber, SubscriberId};

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<ContextEntry>> = RefCell::new(Vec::new());
}

/// An entry in the reactive context stack.
struct ContextEntry {
    /// The running computation, or `None` for an untracked section.
    subscriber: Option<Subscriber>,
    /// Sources read during this computation, deduplicated, in read order.
    dependencies: Vec<AnySource>,
}

/// Guard that pops the context when dropped.
///
/// This ensures the context stack is properly maintained even if
/// the computation panics.
pub struct ReactiveContext {
    subscriber_id: Option<SubscriberId>,
}

impl ReactiveContext {
    /// Enter a new reactive context for the given subscriber.
    ///
    /// While this context is active, any source that is read gets recorded
    /// as a dependency of the subscriber.
    pub fn enter(subscriber: Subscriber) -> Self {
        let subscriber_id = Some(subscriber.id());
        Self::push(Some(subscriber));
        Self { subscriber_id }
    }

    /// Enter a section in which reads are not tracked.
    pub fn enter_untracked() -> Self {
        Self::push(None);
        Self { subscriber_id: None }
    }

    fn push(subscriber: Option<Subscriber>) {
        CONTEXT_STACK.with(|stack| {
            stack.borrow_mut().push(ContextEntry {
                subscriber,
                dependencies: Vec::new(),
            });
        });
    }

    /// Check if there is an active tracking context.
    pub fn is_active() -> bool {
        Self::current_subscriber().is_some()
    }

    /// Get the current subscriber ID, if any.
    pub fn current_subscriber() -> Option<SubscriberId> {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .last()
                .and_then(|entry| entry.subscriber.as_ref().map(Subscriber::id))
        })
    }

    /// Record a dependency on the given source.
    ///
    /// This is called by sources when they are read. Outside a tracking
    /// context it does nothing.
    pub fn track(source: &AnySource) {
        CONTEXT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            let Some(entry) = stack.last_mut() else {
                return;
            };
            if entry.subscriber.is_none() {
                return;
            }
            let id = source.id();
            if !entry.dependencies.iter().any(|dep| dep.id() == id) {
                entry.dependencies.push(source.clone());
            }
        });
    }

    /// IDs of the dependencies collected so far in the current context.
    pub fn get_dependencies() -> Vec<u64> {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .last()
                .map(|entry| entry.dependencies.iter().map(AnySource::id).collect())
                .unwrap_or_default()
        })
    }

    /// Take the dependencies collected in the current context.
    pub fn take_dependencies() -> Vec<AnySource> {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow_mut()
                .last_mut()
                .map(|entry| std::mem::take(&mut entry.dependencies))
                .unwrap_or_default()
        })
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        CONTEXT_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();

            if let Some(entry) = popped {
                debug_assert_eq!(
                    entry.subscriber.as_ref().map(Subscriber::id),
                    self.subscriber_id,
                    "ReactiveContext mismatch"
                );
            }
        });
    }
}

/// Run `f` without tracking any reads it performs.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let _ctx = ReactiveContext::enter_untracked();
    f()
}
