//! Ownership Scopes
//!
//! An [`Owner`] is a lifecycle scope. Roots, effects and active lazy memos
//! each run inside one. Disposing an owner disposes its child owners and
//! then runs every cleanup registered on it.
//!
//! Lazy memos use owners twice: the owner current at construction time is
//! the memo's *owning scope* (its disposal destroys the memo), and the
//! owner current at read time is a *reader scope* (its disposal releases the
//! reader's interest).
//!
//! The current owner is thread-local, like the tracking context.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

thread_local! {
    static CURRENT_OWNER: RefCell<Option<Owner>> = const { RefCell::new(None) };
}

/// Unique identifier for an owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerId(u64);

impl OwnerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

type Cleanup = Box<dyn FnOnce() + Send>;

struct OwnerInner {
    id: OwnerId,
    parent: Option<Weak<OwnerInner>>,
    children: Mutex<Vec<Owner>>,
    cleanups: Mutex<Vec<Cleanup>>,
    disposed: AtomicBool,
}

/// A disposable lifecycle scope.
///
/// Cloning an `Owner` yields another handle to the same scope.
#[derive(Clone)]
pub struct Owner {
    inner: Arc<OwnerInner>,
}

impl Owner {
    /// Create a detached root scope.
    ///
    /// A root is never disposed by anyone else; call [`dispose`](Self::dispose).
    pub fn new_root() -> Self {
        Self::with_parent(None)
    }

    /// Create a scope owned by the current owner, if there is one.
    pub fn new_child() -> Self {
        let parent = Owner::current();
        let child = Self::with_parent(parent.as_ref().map(|p| Arc::downgrade(&p.inner)));
        if let Some(parent) = parent {
            if parent.is_disposed() {
                child.dispose();
            } else {
                parent.inner.children.lock().push(child.clone());
            }
        }
        child
    }

    fn with_parent(parent: Option<Weak<OwnerInner>>) -> Self {
        Self {
            inner: Arc::new(OwnerInner {
                id: OwnerId::new(),
                parent,
                children: Mutex::new(Vec::new()),
                cleanups: Mutex::new(Vec::new()),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// The owner whose scope is currently running, if any.
    pub fn current() -> Option<Owner> {
        CURRENT_OWNER.with(|current| current.borrow().clone())
    }

    /// Get the owner's unique ID.
    pub fn id(&self) -> OwnerId {
        self.inner.id
    }

    /// Run `f` with this owner as the current owner.
    pub fn with<R>(&self, f: impl FnOnce() -> R) -> R {
        let previous = CURRENT_OWNER.with(|current| current.replace(Some(self.clone())));
        let _restore = RestoreOwner(previous);
        f()
    }

    /// Register `f` to run when this owner is disposed.
    ///
    /// If the owner is already disposed, `f` runs immediately.
    pub fn on_cleanup(&self, f: impl FnOnce() + Send + 'static) {
        if self.is_disposed() {
            f();
            return;
        }
        self.inner.cleanups.lock().push(Box::new(f));
    }

    /// Dispose child owners, then run cleanups in registration order.
    ///
    /// Disposing twice is a no-op.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.dispose_children();

        let cleanups = std::mem::take(&mut *self.inner.cleanups.lock());
        for cleanup in cleanups {
            cleanup();
        }

        if let Some(parent) = self.inner.parent.as_ref().and_then(Weak::upgrade) {
            parent
                .children
                .lock()
                .retain(|child| child.inner.id != self.inner.id);
        }
    }

    /// Dispose every child owner but keep this owner alive.
    pub fn dispose_children(&self) {
        let children = std::mem::take(&mut *self.inner.children.lock());
        for child in children {
            child.dispose();
        }
    }

    /// Check if this owner has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Number of live child owners.
    pub fn child_count(&self) -> usize {
        self.inner.children.lock().len()
    }

    /// Number of cleanups waiting for disposal.
    pub fn cleanup_count(&self) -> usize {
        self.inner.cleanups.lock().len()
    }
}

impl PartialEq for Owner {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Owner {}

impl std::fmt::Debug for Owner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Owner")
            .field("id", &self.inner.id)
            .field("children", &self.child_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

struct RestoreOwner(Option<Owner>);

impl Drop for RestoreOwner {
    fn drop(&mut self) {
        let previous = self.0.take();
        CURRENT_OWNER.with(|current| *current.borrow_mut() = previous);
    }
}

/// Create a detached root scope and run `f` inside it.
///
/// `f` receives a handle to the root; the root lives until that handle (or a
/// clone of it) is disposed.
pub fn create_root<R>(f: impl FnOnce(Owner) -> R) -> R {
    let root = Owner::new_root();
    let handle = root.clone();
    root.with(move || f(handle))
}

/// Register `f` to run when the current owner is disposed.
///
/// Returns `false` (and never runs `f`) when called outside any owner.
pub fn on_cleanup(f: impl FnOnce() + Send + 'static) -> bool {
    match Owner::current() {
        Some(owner) => {
            owner.on_cleanup(f);
            true
        }
        None => {
            tracing::warn!("on_cleanup called outside of an owner; cleanup will never run");
            false
        }
    }
}
