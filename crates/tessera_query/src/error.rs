//! Error types for query iteration.

use tessera_core::CoreError;
use thiserror::Error;

/// Result type for query operations.
pub type QueryResult<T> = Result<T, QueryError>;

/// Errors raised while building or pulling query iterators.
#[derive(Debug, Error)]
pub enum QueryError {
    /// The iterator was cancelled.
    #[error("query cancelled")]
    Cancelled,

    /// `next` was called on an exhausted iterator.
    #[error("empty iterator: no more bindings")]
    NoMoreElements,

    /// Spill file I/O failed.
    #[error("spill error: {0}")]
    Spill(#[from] std::io::Error),

    /// The storage layer failed.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A caller-supplied closure failed.
    #[error("evaluation error: {message}")]
    Evaluation {
        /// Error message.
        message: String,
    },

    /// An iterator was used incorrectly.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Error message.
        message: String,
    },
}

impl QueryError {
    /// Creates an evaluation error.
    pub fn evaluation(message: impl Into<String>) -> Self {
        Self::Evaluation {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// True for [`QueryError::Cancelled`].
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
