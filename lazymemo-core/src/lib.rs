//! Lazymemo Core
//!
//! This crate provides demand-driven memoized reactive values. A
//! [`LazyMemo`](reactive::LazyMemo) behaves like a regular memo while somebody
//! reads it, and costs nothing while nobody does:
//!
//! - It never computes until it is first read.
//! - It computes once per upstream change, however many scopes read it.
//! - It unsubscribes from its dependencies when its last reader is disposed.
//!
//! The crate also ships the minimal host runtime the memo needs: signals,
//! effects, ownership scopes and a propagation scheduler.
//!
//! # Architecture
//!
//! - `reactive`: reactive primitives, dependency tracking and the lazy memo
//! - `error`: the error type returned by memo reads
//!
//! # Example
//!
//! ```rust
//! use lazymemo_core::reactive::{create_root, Effect, LazyMemo, Signal};
//!
//! create_root(|root| {
//!     let count = Signal::new(0);
//!
//!     let count_clone = count.clone();
//!     let doubled = LazyMemo::new(move |_| count_clone.get() * 2);
//!
//!     let doubled_clone = doubled.clone();
//!     Effect::new(move || {
//!         println!("Doubled: {}", doubled_clone.get());
//!     });
//!
//!     // Effect automatically runs, prints: "Doubled: 10"
//!     count.set(5);
//!
//!     root.dispose();
//! });
//! ```

pub mod error;
pub mod reactive;

pub use error::{BoxError, Error, Result};
