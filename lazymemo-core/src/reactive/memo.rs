//! Lazy Memo Implementation
//!
//! A lazy memo is a cached derived value that only computes while somebody
//! is reading it.
//!
//! # How Lazy Memos Work
//!
//! 1. Construction does nothing. The memo starts `Cold`: no cached value is
//!    trusted and no dependency is subscribed.
//!
//! 2. The first read from inside an owner scope runs the computation once,
//!    subscribes to every source it read and moves to `Active`. The scope
//!    that read becomes a *reader*.
//!
//! 3. While `Active`, an upstream change marks the memo dirty and the
//!    runtime recomputes it within the same propagation pass, before any
//!    effect that reads it. Later reads return the cached value.
//!
//! 4. When the last reader scope is disposed, the memo unsubscribes from
//!    everything and goes back to `Cold`. The next read recomputes
//!    unconditionally.
//!
//! 5. When the scope that created the memo is disposed, the memo becomes
//!    `Disposed` and every read fails.
//!
//! # Why This Matters
//!
//! - A memo nobody reads never computes, however often its inputs change.
//! - A memo read by N scopes computes once per change, not N times.
//! - A memo whose readers are gone stops costing anything.
//!
//! # Dynamic Dependencies
//!
//! Each successful computation replaces the whole subscription set with the
//! sources read during that run. A failed computation leaves the previous
//! value and subscriptions untouched.

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use indexmap::{IndexMap, IndexSet};
use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;

use super::context::ReactiveContext;
use super::owner::{Owner, OwnerId};
use super::runtime::{next_source_id, AnySource, NodeKind, Reactive, Runtime, Source};
use super::subscriber::{Subscriber, SubscriberId};
use crate::error::{BoxError, Error, Result};

/// Dirty state of a computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoState {
    /// The cached value is up-to-date.
    Clean,

    /// A dependency might have changed. Need to check.
    MaybeDirty,

    /// The computation definitely needs to rerun.
    Dirty,
}

/// Lifecycle state of a [`LazyMemo`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LazyState {
    /// No readers and no subscriptions.
    Cold,

    /// At least one reader; subscribed to the last run's dependencies.
    Active,

    /// The owning scope is gone. Terminal.
    Disposed,
}

/// Construction options for a [`LazyMemo`].
#[derive(Clone, Debug)]
pub struct LazyMemoOptions<T> {
    /// Passed as `previous` to the very first computation.
    pub initial: Option<T>,

    /// Label used in logs and errors.
    pub name: Option<String>,
}

impl<T> Default for LazyMemoOptions<T> {
    fn default() -> Self {
        Self {
            initial: None,
            name: None,
        }
    }
}

impl<T> LazyMemoOptions<T> {
    /// Set the initial value.
    pub fn with_initial(mut self, initial: T) -> Self {
        self.initial = Some(initial);
        self
    }

    /// Set the diagnostic name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

type ComputeFn<T> = Box<dyn FnMut(Option<&T>) -> Result<T, BoxError> + Send>;

#[derive(Clone)]
enum Phase {
    Cold,
    /// The scope nested reads run in; disposed when the memo goes cold.
    Active { scope: Owner },
    Disposed,
}

impl Phase {
    fn state(&self) -> LazyState {
        match self {
            Phase::Cold => LazyState::Cold,
            Phase::Active { .. } => LazyState::Active,
            Phase::Disposed => LazyState::Disposed,
        }
    }
}

struct LazyMemoInner<T> {
    /// Source ID, used by readers that track this memo.
    id: u64,

    /// Subscriber ID, used by the sources this memo reads.
    subscriber_id: SubscriberId,

    name: String,
    compute: Mutex<ComputeFn<T>>,
    value: RwLock<Option<T>>,
    phase: Mutex<Phase>,
    freshness: Mutex<MemoState>,
    computing: AtomicBool,

    /// Set while the memo sits in the runtime's derived queue.
    queued: AtomicBool,
    compute_count: AtomicUsize,

    /// Sources read during the last successful computation.
    dependencies: Mutex<SmallVec<[AnySource; 4]>>,

    /// Reader scopes currently interested in the value.
    readers: Mutex<IndexSet<OwnerId>>,

    /// Computations that read this memo.
    subscribers: Mutex<IndexMap<SubscriberId, Subscriber>>,

    this: Weak<LazyMemoInner<T>>,
}

/// A memoized value that computes on demand and only tracks its
/// dependencies while it has readers.
///
/// # Example
///
/// ```rust
/// use lazymemo_core::reactive::{create_root, LazyMemo, LazyState, Signal};
///
/// create_root(|root| {
///     let count = Signal::new(1);
///     let count_clone = count.clone();
///     let doubled = LazyMemo::new(move |_| count_clone.get() * 2);
///
///     // Nothing has run yet.
///     assert_eq!(doubled.state(), LazyState::Cold);
///
///     assert_eq!(doubled.read().unwrap(), 2);
///     assert_eq!(doubled.state(), LazyState::Active);
///
///     count.set(5);
///     assert_eq!(doubled.read().unwrap(), 10);
///
///     root.dispose();
///     assert!(doubled.read().is_err());
/// });
/// ```
pub struct LazyMemo<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    inner: Arc<LazyMemoInner<T>>,
}

impl<T> LazyMemo<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create a lazy memo.
    ///
    /// `compute` receives the previously cached value, or `None` on the
    /// first run. Nothing runs until the memo is read.
    pub fn new<F>(compute: F) -> Self
    where
        F: FnMut(Option<&T>) -> T + Send + 'static,
    {
        Self::with_options(LazyMemoOptions::default(), compute)
    }

    /// Create a lazy memo with options.
    pub fn with_options<F>(options: LazyMemoOptions<T>, mut compute: F) -> Self
    where
        F: FnMut(Option<&T>) -> T + Send + 'static,
    {
        Self::build(
            options,
            Box::new(move |previous: Option<&T>| -> Result<T, BoxError> { Ok(compute(previous)) }),
        )
    }

    /// Create a lazy memo whose computation can fail.
    ///
    /// A failure is returned from [`read`](Self::read) and leaves the cached
    /// value and subscriptions unchanged.
    pub fn try_new<F, E>(compute: F) -> Self
    where
        F: FnMut(Option<&T>) -> Result<T, E> + Send + 'static,
        E: Into<BoxError>,
    {
        Self::try_with_options(LazyMemoOptions::default(), compute)
    }

    /// Create a fallible lazy memo with options.
    pub fn try_with_options<F, E>(options: LazyMemoOptions<T>, mut compute: F) -> Self
    where
        F: FnMut(Option<&T>) -> Result<T, E> + Send + 'static,
        E: Into<BoxError>,
    {
        Self::build(
            options,
            Box::new(move |previous: Option<&T>| -> Result<T, BoxError> {
                compute(previous).map_err(Into::into)
            }),
        )
    }

    fn build(options: LazyMemoOptions<T>, compute: ComputeFn<T>) -> Self {
        let id = next_source_id();
        let name = options
            .name
            .unwrap_or_else(|| format!("lazy_memo#{id}"));

        let inner = Arc::new_cyclic(|this| LazyMemoInner {
            id,
            subscriber_id: SubscriberId::new(),
            name,
            compute: Mutex::new(compute),
            value: RwLock::new(options.initial),
            phase: Mutex::new(Phase::Cold),
            freshness: Mutex::new(MemoState::Dirty),
            computing: AtomicBool::new(false),
            queued: AtomicBool::new(false),
            compute_count: AtomicUsize::new(0),
            dependencies: Mutex::new(SmallVec::new()),
            readers: Mutex::new(IndexSet::new()),
            subscribers: Mutex::new(IndexMap::new()),
            this: this.clone(),
        });

        match Owner::current() {
            Some(owner) => {
                let weak = Arc::downgrade(&inner);
                owner.on_cleanup(move || {
                    if let Some(inner) = weak.upgrade() {
                        inner.dispose();
                    }
                });
            }
            None => {
                tracing::debug!(memo = %inner.name, "lazy memo created outside of an owner");
            }
        }

        Self { inner }
    }

    /// Read the value.
    ///
    /// Computes if the memo is cold, registers the current owner as a reader
    /// and tracks the memo as a dependency of the running computation.
    ///
    /// Outside any owner the value is computed without subscribing and the
    /// memo stays cold.
    pub fn read(&self) -> Result<T> {
        self.inner.read()
    }

    /// Read the value, panicking on error.
    ///
    /// # Panics
    ///
    /// Panics if [`read`](Self::read) returns an error.
    pub fn get(&self) -> T {
        match self.inner.read() {
            Ok(value) => value,
            Err(err) => panic!("{err}"),
        }
    }

    /// The cached value, without computing or tracking.
    pub fn peek(&self) -> Option<T> {
        self.inner.value.read().clone()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LazyState {
        self.inner.phase.lock().state()
    }

    /// Number of reader scopes.
    pub fn reader_count(&self) -> usize {
        self.inner.readers.lock().len()
    }

    /// Number of subscribed dependencies.
    pub fn dependency_count(&self) -> usize {
        self.inner.dependencies.lock().len()
    }

    /// Number of computations tracking this memo.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    /// Number of times the computation has been invoked.
    pub fn compute_count(&self) -> usize {
        self.inner.compute_count.load(Ordering::SeqCst)
    }

    /// Get the memo's source ID.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Diagnostic name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }
}

/// Resets the re-entrancy flag when the computation returns or unwinds.
struct ComputingGuard<'a>(&'a AtomicBool);

impl Drop for ComputingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl<T> LazyMemoInner<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn subscriber(&self) -> Subscriber {
        let this: Weak<dyn Reactive> = self.this.clone();
        Subscriber::new(this, self.subscriber_id)
    }

    fn phase(&self) -> Phase {
        self.phase.lock().clone()
    }

    fn is_active(&self) -> bool {
        matches!(*self.phase.lock(), Phase::Active { .. })
    }

    fn is_dirty(&self) -> bool {
        *self.freshness.lock() == MemoState::Dirty
    }

    fn read(&self) -> Result<T> {
        if self.computing.load(Ordering::SeqCst) {
            return Err(Error::Cycle {
                name: self.name.clone(),
            });
        }

        let reader = Owner::current();
        let result = match (self.phase(), reader) {
            (Phase::Disposed, _) => {
                return Err(Error::UseAfterDispose {
                    name: self.name.clone(),
                })
            }
            (Phase::Cold, Some(reader)) => self.activate(&reader),
            (Phase::Cold, None) => self.compute_detached(),
            (Phase::Active { .. }, reader) => {
                if let Some(reader) = reader {
                    self.add_reader(&reader);
                }
                self.refresh().map(|_| self.cached())
            }
        };

        // A failed read still tracks, so the caller reruns once the memo recovers.
        self.track();
        result
    }

    fn cached(&self) -> T {
        self.value
            .read()
            .clone()
            .expect("active lazy memo should always hold a value")
    }

    /// Record this memo as a dependency of the running computation.
    fn track(&self) {
        if !ReactiveContext::is_active() {
            return;
        }
        if let Some(this) = self.this.upgrade() {
            let source: Arc<dyn Source> = this;
            ReactiveContext::track(&AnySource::new(source));
        }
    }

    /// Cold → Active on the first read from a reader scope.
    fn activate(&self, reader: &Owner) -> Result<T> {
        let scope = Owner::new_root();
        let value = match self.recompute(&scope, true) {
            Ok((value, _)) => value,
            Err(err) => {
                scope.dispose();
                return Err(err);
            }
        };

        *self.phase.lock() = Phase::Active { scope };
        tracing::trace!(memo = %self.name, "lazy memo activated");
        self.add_reader(reader);
        Ok(value)
    }

    /// Compute for a read outside any owner, staying cold.
    fn compute_detached(&self) -> Result<T> {
        tracing::debug!(memo = %self.name, "lazy memo read outside of an owner; not subscribing");
        let scope = Owner::new_root();
        let result = self.recompute(&scope, false);
        scope.dispose();
        result.map(|(value, _)| value)
    }

    /// Run the computation inside `scope`.
    ///
    /// On success stores the value, marks the memo clean and, if
    /// `subscribe` is set, replaces the subscription set. Returns the new
    /// value and whether it differs from the previous one.
    ///
    /// Each run gets a fresh child of `scope`. The previous run's child is
    /// disposed first; reader slots it held are settled when the batch
    /// closes, after this run has registered its own reads.
    fn recompute(&self, scope: &Owner, subscribe: bool) -> Result<(T, bool)> {
        let (previous, result, dependencies) = Runtime::batch(|| {
            if self.computing.swap(true, Ordering::SeqCst) {
                return Err(Error::Cycle {
                    name: self.name.clone(),
                });
            }
            let _computing = ComputingGuard(&self.computing);

            let previous = self.value.read().clone();
            self.compute_count.fetch_add(1, Ordering::SeqCst);

            scope.dispose_children();
            let run_scope = scope.with(Owner::new_child);

            let _ctx = ReactiveContext::enter(self.subscriber());
            let result = run_scope.with(|| {
                let mut compute = self.compute.lock();
                (*compute)(previous.as_ref())
            });
            Ok((previous, result, ReactiveContext::take_dependencies()))
        })?;

        let next = match result {
            Ok(next) => next,
            Err(source) => {
                *self.freshness.lock() = MemoState::Dirty;
                tracing::debug!(memo = %self.name, error = %source, "lazy memo computation failed");
                return Err(Error::Compute {
                    name: self.name.clone(),
                    source,
                });
            }
        };

        if subscribe {
            self.resubscribe(dependencies);
        }

        let changed = previous.as_ref() != Some(&next);
        *self.value.write() = Some(next.clone());
        *self.freshness.lock() = MemoState::Clean;
        Ok((next, changed))
    }

    /// Bring an active memo up to date. Returns whether the value changed.
    fn refresh(&self) -> Result<bool> {
        let scope = match self.phase() {
            Phase::Active { scope } => scope,
            Phase::Cold | Phase::Disposed => return Ok(false),
        };

        let freshness = *self.freshness.lock();
        let stale = match freshness {
            MemoState::Clean => false,
            MemoState::Dirty => true,
            MemoState::MaybeDirty => {
                let dependencies = self.dependencies.lock().clone();
                dependencies
                    .iter()
                    .any(|source| source.update_if_necessary() || self.is_dirty())
            }
        };

        if !stale {
            *self.freshness.lock() = MemoState::Clean;
            return Ok(false);
        }

        let (_, changed) = self.recompute(&scope, true)?;
        tracing::debug!(memo = %self.name, changed, "lazy memo recomputed");
        if changed {
            self.notify_subscribers();
        }
        Ok(changed)
    }

    fn resubscribe(&self, dependencies: Vec<AnySource>) {
        let subscriber = self.subscriber();
        let old = std::mem::replace(
            &mut *self.dependencies.lock(),
            dependencies.iter().cloned().collect(),
        );
        for source in &old {
            source.unsubscribe(self.subscriber_id);
        }
        for source in &dependencies {
            source.subscribe(subscriber.clone());
        }
    }

    fn unsubscribe_all(&self) {
        let dependencies = std::mem::take(&mut *self.dependencies.lock());
        for source in &dependencies {
            source.unsubscribe(self.subscriber_id);
        }
    }

    fn live_subscribers(&self) -> Vec<Subscriber> {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|_, subscriber| subscriber.is_alive());
        subscribers.values().cloned().collect()
    }

    fn notify_subscribers(&self) {
        Runtime::notify(&self.live_subscribers());
    }

    fn add_reader(&self, reader: &Owner) {
        let reader_id = reader.id();
        let inserted = self.readers.lock().insert(reader_id);
        if !inserted {
            return;
        }

        tracing::trace!(memo = %self.name, readers = self.readers.lock().len(), "reader registered");
        let weak = self.this.clone();
        reader.on_cleanup(move || {
            if let Some(inner) = weak.upgrade() {
                inner.release_reader(reader_id);
            }
        });
    }

    fn release_reader(&self, reader_id: OwnerId) {
        let now_unread = {
            let mut readers = self.readers.lock();
            readers.shift_remove(&reader_id) && readers.is_empty()
        };
        if !now_unread || !self.is_active() {
            return;
        }
        // Inside a pass the reader may be about to read again; decide at flush.
        if Runtime::is_batching() {
            self.enqueue();
        } else {
            self.deactivate();
        }
    }

    /// Put the memo in the derived queue unless it is already there.
    fn enqueue(&self) {
        if !self.queued.swap(true, Ordering::SeqCst) {
            Runtime::schedule(self.subscriber(), NodeKind::Derived);
        }
    }

    /// Active → Cold once the last reader is gone.
    fn deactivate(&self) {
        let previous = std::mem::replace(&mut *self.phase.lock(), Phase::Cold);
        *self.freshness.lock() = MemoState::Dirty;
        self.unsubscribe_all();
        if let Phase::Active { scope } = previous {
            scope.dispose();
        }
        tracing::trace!(memo = %self.name, "lazy memo went cold");
    }

    /// Owning scope disposed: terminal.
    fn dispose(&self) {
        let previous = std::mem::replace(&mut *self.phase.lock(), Phase::Disposed);
        if matches!(previous, Phase::Disposed) {
            return;
        }
        self.readers.lock().clear();
        self.unsubscribe_all();
        self.subscribers.lock().clear();
        if let Phase::Active { scope } = previous {
            scope.dispose();
        }
        tracing::trace!(memo = %self.name, "lazy memo disposed");
    }
}

impl<T> Reactive for LazyMemoInner<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn subscriber_id(&self) -> SubscriberId {
        self.subscriber_id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Derived
    }

    fn mark_dirty(&self) {
        if !self.is_active() {
            return;
        }
        let previous = std::mem::replace(&mut *self.freshness.lock(), MemoState::Dirty);
        // A memo left dirty by a failed run still needs a retry.
        self.enqueue();
        if previous == MemoState::Clean {
            for subscriber in self.live_subscribers() {
                subscriber.mark_maybe_dirty();
            }
        }
    }

    fn mark_maybe_dirty(&self) {
        if !self.is_active() {
            return;
        }
        let was_clean = {
            let mut freshness = self.freshness.lock();
            if *freshness == MemoState::Clean {
                *freshness = MemoState::MaybeDirty;
                true
            } else {
                false
            }
        };
        self.enqueue();
        if was_clean {
            for subscriber in self.live_subscribers() {
                subscriber.mark_maybe_dirty();
            }
        }
    }

    fn run(&self) {
        self.queued.store(false, Ordering::SeqCst);
        if self.is_active() && self.readers.lock().is_empty() {
            self.deactivate();
            return;
        }
        // Failures stay with this memo; the next read retries and reports them.
        if let Err(err) = self.refresh() {
            tracing::error!(memo = %self.name, error = %err, "lazy memo recomputation failed during propagation");
        }
    }
}

impl<T> Source for LazyMemoInner<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn source_id(&self) -> u64 {
        self.id
    }

    fn add_subscriber(&self, subscriber: Subscriber) {
        if matches!(*self.phase.lock(), Phase::Disposed) {
            return;
        }
        self.subscribers.lock().insert(subscriber.id(), subscriber);
    }

    fn remove_subscriber(&self, subscriber_id: SubscriberId) {
        self.subscribers.lock().shift_remove(&subscriber_id);
    }

    fn update_if_necessary(&self) -> bool {
        match self.refresh() {
            Ok(changed) => changed,
            // Let the reader rerun so its own read surfaces the error.
            Err(_) => true,
        }
    }
}

impl<T> Clone for LazyMemo<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for LazyMemo<T>
where
    T: Clone + PartialEq + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyMemo")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .field("value", &self.peek())
            .field("reader_count", &self.reader_count())
            .field("dependency_count", &self.dependency_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
