//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive. It holds a value and
//! tracks which computations depend on it.
//!
//! # How Signals Work
//!
//! 1. When a signal is read within a tracking context (memo/effect), the
//!    signal is recorded as a dependency of that computation. The
//!    computation subscribes once it finishes running.
//!
//! 2. When a signal's value changes, all subscribers are marked dirty and
//!    the runtime runs a propagation pass.
//!
//! # Memory Layout
//!
//! Each signal consists of:
//! - A unique ID (8 bytes)
//! - The value behind a lock
//! - An ordered map of subscribers (grows with number of dependents)

use std::fmt::Debug;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};

use super::context::ReactiveContext;
use super::runtime::{next_source_id, AnySource, Runtime, Source};
use super::subscriber::{Subscriber, SubscriberId};

struct SignalInner<T> {
    /// Unique identifier for this signal.
    id: u64,

    /// The current value.
    value: RwLock<T>,

    /// Computations that depend on this signal, in subscription order.
    subscribers: Mutex<IndexMap<SubscriberId, Subscriber>>,
}

/// A reactive signal holding a value of type T.
///
/// # Example
///
/// ```rust
/// use lazymemo_core::reactive::Signal;
///
/// let count = Signal::new(0);
/// assert_eq!(count.get(), 0);
///
/// count.set(5);
/// assert_eq!(count.get(), 5);
/// ```
pub struct Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Arc<SignalInner<T>>,
}

impl<T> Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new signal with the given initial value.
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(SignalInner {
                id: next_source_id(),
                value: RwLock::new(value),
                subscribers: Mutex::new(IndexMap::new()),
            }),
        }
    }

    /// Get the signal's unique ID.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Get the current value.
    ///
    /// If called within a tracking context, this also records the signal as
    /// a dependency of the running computation.
    pub fn get(&self) -> T {
        if ReactiveContext::is_active() {
            let source: Arc<dyn Source> = self.inner.clone();
            ReactiveContext::track(&AnySource::new(source));
        }
        self.get_untracked()
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> T {
        self.inner.value.read().clone()
    }

    /// Set a new value and notify subscribers.
    ///
    /// Every subscriber reruns (or rechecks) within one propagation pass.
    pub fn set(&self, value: T) {
        *self.inner.value.write() = value;
        self.notify_subscribers();
    }

    /// Update the value using a function.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let new_value = {
            let guard = self.inner.value.read();
            f(&guard)
        };
        self.set(new_value);
    }

    /// Notify all subscribers that the value has changed.
    fn notify_subscribers(&self) {
        let subscribers: Vec<Subscriber> = {
            let mut subscribers = self.inner.subscribers.lock();
            subscribers.retain(|_, subscriber| subscriber.is_alive());
            subscribers.values().cloned().collect()
        };
        Runtime::notify(&subscribers);
    }

    /// Get the number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }
}

impl<T> Source for SignalInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn source_id(&self) -> u64 {
        self.id
    }

    fn add_subscriber(&self, subscriber: Subscriber) {
        self.subscribers.lock().insert(subscriber.id(), subscriber);
    }

    fn remove_subscriber(&self, subscriber_id: SubscriberId) {
        self.subscribers.lock().shift_remove(&subscriber_id);
    }

    fn update_if_necessary(&self) -> bool {
        // A signal is always current; its writes mark subscribers directly.
        false
    }
}

impl<T> Clone for Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Signal<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.inner.id)
            .field("value", &self.get_untracked())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Effect;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn signal_get_and_set() {
        let signal = Signal::new(0);
        assert_eq!(signal.get(), 0);

        signal.set(42);
        assert_eq!(signal.get(), 42);
    }

    #[test]
    fn signal_update() {
        let signal = Signal::new(10);
        signal.update(|v| v + 5);
        assert_eq!(signal.get(), 15);
    }

    #[test]
    fn signal_notifies_subscribed_effect() {
        let signal = Signal::new(0);
        let seen = Arc::new(AtomicI32::new(-1));

        let signal_clone = signal.clone();
        let seen_clone = seen.clone();
        let effect = Effect::new(move || {
            seen_clone.store(signal_clone.get(), Ordering::SeqCst);
        });

        assert_eq!(seen.load(Ordering::SeqCst), 0);
        assert_eq!(signal.subscriber_count(), 1);

        signal.set(1);
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        effect.dispose();
        assert_eq!(signal.subscriber_count(), 0);

        signal.set(2);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn untracked_read_does_not_subscribe() {
        let signal = Signal::new(3);
        let signal_clone = signal.clone();
        let _effect = Effect::new(move || {
            let _ = signal_clone.get_untracked();
        });

        assert_eq!(signal.subscriber_count(), 0);
    }

    #[test]
    fn signal_clone_shares_state() {
        let signal1 = Signal::new(0);
        let signal2 = signal1.clone();

        signal1.set(42);
        assert_eq!(signal2.get(), 42);

        signal2.set(100);
        assert_eq!(signal1.get(), 100);
    }

    #[test]
    fn signal_ids_are_unique() {
        let s1 = Signal::new(0);
        let s2 = Signal::new(0);
        let s3 = Signal::new(0);

        assert_ne!(s1.id(), s2.id());
        assert_ne!(s2.id(), s3.id());
        assert_ne!(s1.id(), s3.id());
    }
}
