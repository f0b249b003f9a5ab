//! Lazy, pull-based query iterators.
//!
//! Every operator is an [`IterLogic`] wrapped in a [`QueryIter`], which
//! owns the shared state machine: `has_next` is idempotent, `next_binding`
//! past the end fails, `close` runs the operator's cleanup once, and
//! cancellation is checked on every pull. Operators with sub-iterators
//! close them from `close_iterator` and link their cancel signals, so
//! closing or cancelling the root reaches every live iterator below it.
//!
//! ```rust,ignore
//! let rows = Slice::new(
//!     Sort::new(input, vec![SortCondition::asc("x")], ExecConfig::default()).boxed(),
//!     0,
//!     Some(10),
//! )?;
//! for row in rows.into_rows() {
//!     println!("{}", row?);
//! }
//! ```

mod base;
mod cancel;
mod concat;
mod deferred;
mod distinct;
mod filter;
mod group;
mod join;
mod plain;
mod repeat;
mod slice;
mod sort;

pub use base::{IterLogic, IterState, QueryIter};
pub use cancel::{CancelMode, CancelSignal};
pub use concat::Concat;
pub use deferred::Deferred;
pub use distinct::{Distinct, Reduced};
pub use filter::{Convert, Extend, Filter, Project};
pub use group::{Aggregate, Group};
pub use join::{AntiJoin, AntiRule, Difference, JoinCondition, LeftJoin, Minus, NestedLoopJoin};
pub use plain::Plain;
pub use repeat::RepeatApply;
pub use slice::Slice;
pub use sort::{Direction, Sort, SortCondition, TopN};

use crate::binding::Binding;
use crate::error::{QueryError, QueryResult};

/// A boxed iterator.
pub type BoxIter = Box<dyn QueryIterator>;

/// A lazy sequence of bindings with a close and cancel lifecycle.
pub trait QueryIterator: Send {
    /// True if another row is available. Repeated calls without
    /// `next_binding` in between return the same answer.
    fn has_next(&mut self) -> QueryResult<bool>;

    /// The next row.
    ///
    /// # Errors
    ///
    /// [`QueryError::NoMoreElements`] when exhausted.
    fn next_binding(&mut self) -> QueryResult<Binding>;

    /// Releases resources. Safe to call any number of times.
    fn close(&mut self);

    /// The signal that cancels this iterator and everything under it.
    fn cancel_signal(&self) -> CancelSignal;

    /// True once the iterator can yield nothing more.
    fn is_finished(&self) -> bool;

    /// Appends an indented description of the iterator tree.
    fn output(&self, out: &mut String, depth: usize);

    /// Cancels; the next `has_next` fails with [`QueryError::Cancelled`].
    /// May be called from any thread through [`Self::cancel_signal`].
    fn cancel(&self) {
        self.cancel_signal().cancel(CancelMode::Abort);
    }

    /// Cancels, letting the row being fetched through first.
    fn cancel_draining(&self) {
        self.cancel_signal().cancel(CancelMode::Drain);
    }

    /// Adapts to a std iterator.
    fn into_rows(self) -> Rows
    where
        Self: Sized + 'static,
    {
        Rows::new(Box::new(self))
    }
}

impl<T: QueryIterator + ?Sized> QueryIterator for Box<T> {
    fn has_next(&mut self) -> QueryResult<bool> {
        (**self).has_next()
    }

    fn next_binding(&mut self) -> QueryResult<Binding> {
        (**self).next_binding()
    }

    fn close(&mut self) {
        (**self).close();
    }

    fn cancel_signal(&self) -> CancelSignal {
        (**self).cancel_signal()
    }

    fn is_finished(&self) -> bool {
        (**self).is_finished()
    }

    fn output(&self, out: &mut String, depth: usize) {
        (**self).output(out, depth);
    }
}

/// A query iterator as an `Iterator`. Stops after the first error and
/// closes the iterator when dropped.
pub struct Rows {
    iter: BoxIter,
    failed: bool,
}

impl Rows {
    /// Wraps `iter`.
    #[must_use]
    pub fn new(iter: BoxIter) -> Self {
        Self { iter, failed: false }
    }
}

impl Iterator for Rows {
    type Item = QueryResult<Binding>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let row = match self.iter.has_next() {
            Ok(true) => self.iter.next_binding(),
            Ok(false) => return None,
            Err(e) => Err(e),
        };
        if row.is_err() {
            self.failed = true;
        }
        Some(row)
    }
}

impl Drop for Rows {
    fn drop(&mut self) {
        self.iter.close();
    }
}

/// Pulls every row.
pub fn collect_rows(mut iter: impl QueryIterator) -> QueryResult<Vec<Binding>> {
    let mut rows = Vec::new();
    while iter.has_next()? {
        rows.push(iter.next_binding()?);
    }
    iter.close();
    Ok(rows)
}

/// Renders the iterator tree, one operator per line.
#[must_use]
pub fn explain(iter: &dyn QueryIterator) -> String {
    let mut out = String::new();
    iter.output(&mut out, 0);
    out
}

/// Pulls the next row from `input`, or `None` at the end.
pub(crate) fn pull(input: &mut dyn QueryIterator) -> QueryResult<Option<Binding>> {
    if input.has_next()? {
        input.next_binding().map(Some)
    } else {
        Ok(None)
    }
}

/// An error for rows requested without `has_next`.
pub(crate) fn not_ready(operator: &str) -> QueryError {
    QueryError::invalid_operation(format!("{operator}: next row requested before has_next"))
}
