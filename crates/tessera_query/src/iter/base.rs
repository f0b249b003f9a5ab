//! The iterator state machine shared by every operator.

use super::cancel::{CancelMode, CancelSignal};
use super::QueryIterator;
use crate::binding::Binding;
use crate::error::{QueryError, QueryResult};
use std::fmt::Write as _;

/// Lifecycle of an iterator. `Finished` is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterState {
    /// Built, not yet pulled.
    Armed,
    /// Has produced or peeked at least one row.
    Active,
    /// Exhausted, failed, cancelled or closed.
    Finished,
}

/// What an operator implements. [`QueryIter`] supplies the rest.
///
/// `has_next_binding` is only called again after `move_to_next_binding`
/// consumed the row it announced.
pub trait IterLogic: Send {
    /// Operator name for [`QueryIterator::output`].
    fn name(&self) -> &'static str;

    /// Prepares the next row; false when there is none.
    ///
    /// `signal` is the iterator's own cancel signal, for operators that
    /// create sub-iterators while running.
    fn has_next_binding(&mut self, signal: &CancelSignal) -> QueryResult<bool>;

    /// Returns the row announced by `has_next_binding`.
    fn move_to_next_binding(&mut self) -> QueryResult<Binding>;

    /// Releases sub-iterators and buffers. Called exactly once.
    fn close_iterator(&mut self) {}

    /// Sub-iterators, for cancellation and output.
    fn children(&self) -> Vec<&dyn QueryIterator> {
        Vec::new()
    }

    /// Extra text after the name in [`QueryIterator::output`].
    fn details(&self) -> String {
        String::new()
    }
}

/// An operator wrapped in the shared state machine.
pub struct QueryIter<L: IterLogic> {
    logic: L,
    state: IterState,
    peeked: bool,
    signal: CancelSignal,
}

impl<L: IterLogic> QueryIter<L> {
    /// Wraps `logic`, linking the cancel signals of its sub-iterators.
    pub fn new(logic: L) -> Self {
        let signal = CancelSignal::new();
        for child in logic.children() {
            signal.attach(&child.cancel_signal());
        }
        Self {
            logic,
            state: IterState::Armed,
            peeked: false,
            signal,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> IterState {
        self.state
    }

    /// The wrapped operator.
    #[must_use]
    pub fn logic(&self) -> &L {
        &self.logic
    }

    /// Boxes the iterator.
    #[must_use]
    pub fn boxed(self) -> Box<dyn QueryIterator>
    where
        L: 'static,
    {
        Box::new(self)
    }
}

impl<L: IterLogic> QueryIterator for QueryIter<L> {
    fn has_next(&mut self) -> QueryResult<bool> {
        if self.state == IterState::Finished {
            return Ok(false);
        }
        if self.signal.mode() == Some(CancelMode::Abort) {
            self.close();
            return Err(QueryError::Cancelled);
        }
        if self.peeked {
            return Ok(true);
        }
        match self.logic.has_next_binding(&self.signal) {
            Ok(true) => {
                self.peeked = true;
                self.state = IterState::Active;
                Ok(true)
            }
            Ok(false) => {
                self.close();
                Ok(false)
            }
            Err(e) => {
                self.close();
                Err(e)
            }
        }
    }

    fn next_binding(&mut self) -> QueryResult<Binding> {
        if !self.has_next()? {
            return Err(QueryError::NoMoreElements);
        }
        self.peeked = false;
        let row = self.logic.move_to_next_binding();
        if row.is_err() || self.signal.is_requested() {
            self.close();
        }
        row
    }

    fn close(&mut self) {
        if self.state == IterState::Finished {
            return;
        }
        self.state = IterState::Finished;
        self.peeked = false;
        self.logic.close_iterator();
    }

    fn cancel_signal(&self) -> CancelSignal {
        self.signal.clone()
    }

    fn is_finished(&self) -> bool {
        self.state == IterState::Finished
    }

    fn output(&self, out: &mut String, depth: usize) {
        let details = self.logic.details();
        let _ = write!(out, "{:indent$}{}", "", self.logic.name(), indent = depth * 2);
        if !details.is_empty() {
            let _ = write!(out, " {details}");
        }
        out.push('\n');
        for child in self.logic.children() {
            child.output(out, depth + 1);
        }
    }
}

impl<L: IterLogic> Drop for QueryIter<L> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iter::Plain;
    use tessera_core::Node;

    fn rows(n: i64) -> Vec<Binding> {
        (0..n).map(|i| Binding::new().with("x", Node::integer(i))).collect()
    }

    #[test]
    fn has_next_is_idempotent() {
        let mut iter = Plain::new(rows(2));
        assert_eq!(iter.state(), IterState::Armed);
        assert!(iter.has_next().unwrap());
        assert!(iter.has_next().unwrap());
        assert_eq!(iter.state(), IterState::Active);
        assert_eq!(iter.next_binding().unwrap(), rows(2)[0]);
        assert_eq!(iter.next_binding().unwrap(), rows(2)[1]);
        assert!(!iter.has_next().unwrap());
        assert!(!iter.has_next().unwrap());
        assert_eq!(iter.state(), IterState::Finished);
    }

    #[test]
    fn next_past_end_is_an_error() {
        let mut iter = Plain::new(Vec::new());
        assert!(matches!(iter.next_binding(), Err(QueryError::NoMoreElements)));
    }

    #[test]
    fn close_is_idempotent() {
        let mut iter = Plain::new(rows(3));
        iter.close();
        iter.close();
        assert!(iter.is_finished());
        assert!(!iter.has_next().unwrap());
    }

    #[test]
    fn abort_cancel_fails_has_next_once() {
        let mut iter = Plain::new(rows(3));
        assert!(iter.has_next().unwrap());
        iter.cancel();
        assert!(matches!(iter.has_next(), Err(QueryError::Cancelled)));
        assert!(!iter.has_next().unwrap());
    }

    #[test]
    fn drain_cancel_delivers_one_more_row() {
        let mut iter = Plain::new(rows(3));
        iter.cancel_draining();
        assert!(iter.has_next().unwrap());
        assert_eq!(iter.next_binding().unwrap(), rows(3)[0]);
        assert!(!iter.has_next().unwrap());
    }

    #[test]
    fn output_names_the_operator() {
        let iter = Plain::new(rows(1));
        let mut out = String::new();
        iter.output(&mut out, 0);
        assert_eq!(out, "Plain rows=1\n");
    }
}
