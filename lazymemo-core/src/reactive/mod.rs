//! Reactive Primitives
//!
//! This module implements the reactive system: signals, effects, ownership
//! scopes, and the lazy memo built on top of them.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. When a signal's value is read
//! within a tracking context (a memo or effect), the signal is recorded as a
//! dependency. When the signal's value changes, all dependents are notified.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation that runs immediately and then
//! again whenever its dependencies change.
//!
//! ## Owners
//!
//! An Owner is a disposable lifecycle scope. Roots and effects are owners.
//! Disposing an owner runs its cleanups, which is how lazy memos learn that
//! a reader went away.
//!
//! ## Lazy Memos
//!
//! A LazyMemo is a derived value that computes only while some owner scope
//! reads it, and drops its subscriptions when the last reader is disposed.
//!
//! # Implementation Notes
//!
//! The tracking context, the current owner and the scheduler queues are
//! thread-local. When a source is read, we check if there is an active
//! tracking context and, if so, record the dependency.

mod context;
mod effect;
mod memo;
mod owner;
mod runtime;
mod signal;
mod subscriber;

pub use context::{untracked, ReactiveContext};
pub use effect::Effect;
pub use memo::{LazyMemo, LazyMemoOptions, LazyState, MemoState};
pub use owner::{create_root, on_cleanup, Owner, OwnerId};
pub use runtime::{AnySource, NodeKind, Reactive, Runtime, Source};
pub use signal::Signal;
pub use subscriber::{Subscriber, SubscriberId};
