//! Iterators over rows already in memory.

use super::base::{IterLogic, QueryIter};
use super::cancel::CancelSignal;
use crate::binding::Binding;
use crate::error::{QueryError, QueryResult};
use std::collections::VecDeque;

/// Yields a fixed list of rows.
pub struct Plain {
    rows: VecDeque<Binding>,
    total: usize,
}

impl Plain {
    /// Iterates `rows` in order.
    pub fn new(rows: impl IntoIterator<Item = Binding>) -> QueryIter<Self> {
        let rows: VecDeque<Binding> = rows.into_iter().collect();
        QueryIter::new(Self {
            total: rows.len(),
            rows,
        })
    }

    /// One row.
    #[must_use]
    pub fn singleton(row: Binding) -> QueryIter<Self> {
        Self::new([row])
    }

    /// No rows.
    #[must_use]
    pub fn null() -> QueryIter<Self> {
        Self::new([])
    }

    /// The single empty row every evaluation starts from.
    #[must_use]
    pub fn root() -> QueryIter<Self> {
        Self::singleton(Binding::new())
    }
}

impl IterLogic for Plain {
    fn name(&self) -> &'static str {
        "Plain"
    }

    fn has_next_binding(&mut self, _signal: &CancelSignal) -> QueryResult<bool> {
        Ok(!self.rows.is_empty())
    }

    fn move_to_next_binding(&mut self) -> QueryResult<Binding> {
        self.rows.pop_front().ok_or(QueryError::NoMoreElements)
    }

    fn close_iterator(&mut self) {
        self.rows.clear();
    }

    fn details(&self) -> String {
        format!("rows={}", self.total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iter::{collect_rows, QueryIterator};
    use tessera_core::Node;

    #[test]
    fn root_yields_one_empty_row() {
        assert_eq!(collect_rows(Plain::root()).unwrap(), vec![Binding::new()]);
    }

    #[test]
    fn null_is_empty() {
        let mut iter = Plain::null();
        assert!(!iter.has_next().unwrap());
    }

    #[test]
    fn singleton() {
        let row = Binding::new().with("x", Node::uri("ex:a"));
        assert_eq!(collect_rows(Plain::singleton(row.clone())).unwrap(), vec![row]);
    }
}
