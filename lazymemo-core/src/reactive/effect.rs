//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately to establish
//!    initial dependencies.
//!
//! 2. When any dependency changes, the effect is queued and re-runs in the
//!    same propagation pass, after every derived value it might read.
//!
//! 3. After each run, the effect drops its old subscriptions and subscribes
//!    to exactly the sources read during that run.
//!
//! # Ownership
//!
//! Every effect has its own [`Owner`], a child of the owner current at
//! creation, and each run executes in a fresh child of that owner. Reads of
//! lazy memos and `on_cleanup` calls inside the body belong to the run's
//! scope, which is disposed before the next run. The effect stays alive until
//! it, or an enclosing owner, is disposed.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use smallvec::SmallVec;

use super::context::ReactiveContext;
use super::memo::MemoState;
use super::owner::Owner;
use super::runtime::{AnySource, NodeKind, Reactive, Runtime};
use super::subscriber::{Subscriber, SubscriberId};

/// Counter for generating unique effect IDs.
static EFFECT_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a new unique effect ID.
fn next_effect_id() -> u64 {
    EFFECT_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

struct EffectInner {
    id: u64,
    subscriber_id: SubscriberId,
    run: Mutex<Box<dyn FnMut() + Send>>,
    owner: Owner,
    state: Mutex<MemoState>,
    dependencies: Mutex<SmallVec<[AnySource; 4]>>,
    disposed: AtomicBool,
    run_count: AtomicUsize,
    this: Weak<EffectInner>,
}

/// A side-effecting computation that runs when dependencies change.
///
/// # Example
///
/// ```rust
/// use lazymemo_core::reactive::{Effect, Signal};
/// use std::sync::atomic::{AtomicI32, Ordering};
/// use std::sync::Arc;
///
/// let count = Signal::new(0);
/// let seen = Arc::new(AtomicI32::new(0));
///
/// let (count_clone, seen_clone) = (count.clone(), seen.clone());
/// let effect = Effect::new(move || {
///     seen_clone.store(count_clone.get(), Ordering::SeqCst);
/// });
///
/// count.set(5);
/// assert_eq!(seen.load(Ordering::SeqCst), 5);
/// effect.dispose();
/// ```
pub struct Effect {
    inner: Arc<EffectInner>,
}

impl Effect {
    /// Create a new effect with the given function.
    ///
    /// The function runs immediately to establish initial dependencies.
    pub fn new<F>(run: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let owner = Owner::new_child();
        let inner = Arc::new_cyclic(|this| EffectInner {
            id: next_effect_id(),
            subscriber_id: SubscriberId::new(),
            run: Mutex::new(Box::new(run) as Box<dyn FnMut() + Send>),
            owner: owner.clone(),
            state: Mutex::new(MemoState::Dirty),
            dependencies: Mutex::new(SmallVec::new()),
            disposed: AtomicBool::new(false),
            run_count: AtomicUsize::new(0),
            this: this.clone(),
        });

        // The owner keeps the effect alive until it is disposed.
        let keep_alive = inner.clone();
        owner.on_cleanup(move || keep_alive.release());

        let effect = Self { inner };
        effect.execute();
        effect
    }

    /// Get the effect's unique ID.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Get the subscriber ID for this effect.
    pub fn subscriber_id(&self) -> SubscriberId {
        self.inner.subscriber_id
    }

    /// The scope the effect runs in.
    pub fn owner(&self) -> &Owner {
        &self.inner.owner
    }

    /// Run the effect function now.
    ///
    /// This runs the function within a tracking context to track dependencies.
    pub fn execute(&self) {
        self.inner.execute();
    }

    /// Dispose of the effect and its scope.
    ///
    /// After disposal, the effect will not run again and holds no
    /// subscriptions.
    pub fn dispose(&self) {
        self.inner.owner.dispose();
    }

    /// Check if the effect has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Get the number of times the effect has run.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.load(Ordering::SeqCst)
    }

    /// Get the number of dependencies.
    pub fn dependency_count(&self) -> usize {
        self.inner.dependencies.lock().len()
    }
}

impl EffectInner {
    fn subscriber(&self) -> Subscriber {
        let this: Weak<dyn Reactive> = self.this.clone();
        Subscriber::new(this, self.subscriber_id)
    }

    fn execute(&self) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }

        Runtime::batch(|| {
            // Lazy memos released here stay active until the batch closes.
            self.owner.dispose_children();
            let run_scope = self.owner.with(Owner::new_child);
            *self.state.lock() = MemoState::Clean;

            let dependencies = {
                let _ctx = ReactiveContext::enter(self.subscriber());
                run_scope.with(|| {
                    let mut run = self.run.lock();
                    (*run)();
                });
                ReactiveContext::take_dependencies()
            };

            // The effect may have disposed itself while running.
            if !self.disposed.load(Ordering::SeqCst) {
                self.resubscribe(dependencies);
            }
            self.run_count.fetch_add(1, Ordering::SeqCst);
        });
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

    fn release(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let dependencies = std::mem::take(&mut *self.dependencies.lock());
        for source in &dependencies {
            source.unsubscribe(self.subscriber_id);
        }
        tracing::trace!(effect = self.id, "effect disposed");
    }

    fn is_dirty(&self) -> bool {
        *self.state.lock() == MemoState::Dirty
    }
}

impl Reactive for EffectInner {
    fn subscriber_id(&self) -> SubscriberId {
        self.subscriber_id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Effect
    }

    fn mark_dirty(&self) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        let previous = std::mem::replace(&mut *self.state.lock(), MemoState::Dirty);
        if previous == MemoState::Clean {
            Runtime::schedule(self.subscriber(), NodeKind::Effect);
        }
    }

    fn mark_maybe_dirty(&self) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        let scheduled = {
            let mut state = self.state.lock();
            if *state == MemoState::Clean {
                *state = MemoState::MaybeDirty;
                true
            } else {
                false
            }
        };
        if scheduled {
            Runtime::schedule(self.subscriber(), NodeKind::Effect);
        }
    }

    fn run(&self) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }

        let state = *self.state.lock();
        let should_run = match state {
            MemoState::Clean => false,
            MemoState::Dirty => true,
            MemoState::MaybeDirty => {
                // Pull every source; a memo that changes marks us Dirty.
                let dependencies = self.dependencies.lock().clone();
                dependencies
                    .iter()
                    .any(|source| source.update_if_necessary() || self.is_dirty())
            }
        };

        if should_run {
            self.execute();
        } else {
            *self.state.lock() = MemoState::Clean;
        }
    }
}

impl Clone for Effect {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl std::fmt::Debug for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.inner.id)
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
