//! Error types for reading lazy memos.

use std::error::Error as StdError;

/// Boxed error produced by a fallible memo computation.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors returned by [`LazyMemo::read`](crate::reactive::LazyMemo::read).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The memo's owning scope has been disposed.
    #[error("lazy memo `{name}` was read after its owning scope was disposed")]
    UseAfterDispose {
        /// Diagnostic name of the memo.
        name: String,
    },

    /// The computation function returned an error.
    #[error("lazy memo `{name}` computation failed: {source}")]
    Compute {
        /// Diagnostic name of the memo.
        name: String,
        /// Error returned by the computation.
        #[source]
        source: BoxError,
    },

    /// The memo was read while its own computation was running.
    #[error("lazy memo `{name}` read itself while computing")]
    Cycle {
        /// Diagnostic name of the memo.
        name: String,
    },
}

impl Error {
    /// Check whether this error reports a read after disposal.
    pub fn is_use_after_dispose(&self) -> bool {
        matches!(self, Error::UseAfterDispose { .. })
    }
}
