//! Offset and limit.

use super::base::{IterLogic, QueryIter};
use super::cancel::CancelSignal;
use super::{pull, BoxIter, QueryIterator};
use crate::binding::Binding;
use crate::error::QueryResult;
use tracing::trace;

/// Skips `offset` rows then yields at most `limit` rows.
///
/// The offset rows are consumed when the slice is built. Once the limit is
/// reached the input is closed without being drained.
pub struct Slice {
    input: BoxIter,
    offset: usize,
    limit: Option<usize>,
    yielded: usize,
}

impl Slice {
    /// Builds the slice, discarding the first `offset` rows of `input`.
    ///
    /// An offset past the end of the input is not an error; the slice is
    /// simply empty.
    pub fn new(mut input: BoxIter, offset: usize, limit: Option<usize>) -> QueryResult<QueryIter<Self>> {
        let mut skipped = 0;
        while skipped < offset {
            if pull(input.as_mut())?.is_none() {
                break;
            }
            skipped += 1;
        }
        trace!(offset, skipped, "slice offset consumed");
        Ok(QueryIter::new(Self {
            input,
            offset,
            limit,
            yielded: 0,
        }))
    }

    fn exhausted(&self) -> bool {
        self.limit.is_some_and(|limit| self.yielded >= limit)
    }
}

impl IterLogic for Slice {
    fn name(&self) -> &'static str {
        "Slice"
    }

    fn has_next_binding(&mut self, _signal: &CancelSignal) -> QueryResult<bool> {
        if self.exhausted() {
            self.input.close();
            return Ok(false);
        }
        self.input.has_next()
    }

    fn move_to_next_binding(&mut self) -> QueryResult<Binding> {
        let row = self.input.next_binding()?;
        self.yielded += 1;
        Ok(row)
    }

    fn close_iterator(&mut self) {
        self.input.close();
    }

    fn children(&self) -> Vec<&dyn QueryIterator> {
        vec![self.input.as_ref()]
    }

    fn details(&self) -> String {
        match self.limit {
            Some(limit) => format!("offset={} limit={limit}", self.offset),
            None => format!("offset={}", self.offset),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iter::collect_rows;
    use crate::iter::test_support::*;
    use proptest::prelude::*;

    fn ten() -> BoxIter {
        source(ints("x", &(1..=10).collect::<Vec<_>>()))
    }

    #[test]
    fn offset_then_limit() {
        let iter = Slice::new(ten(), 3, Some(4)).unwrap();
        assert_eq!(values(&collect_rows(iter).unwrap(), "x"), vec![4, 5, 6, 7]);
    }

    #[test]
    fn offset_past_end_is_empty() {
        let iter = Slice::new(ten(), 25, None).unwrap();
        assert!(collect_rows(iter).unwrap().is_empty());
    }

    #[test]
    fn limit_zero_closes_input() {
        let mut iter = Slice::new(ten(), 0, Some(0)).unwrap();
        assert!(!iter.has_next().unwrap());
        assert!(iter.logic().input.is_finished());
    }

    proptest! {
        #[test]
        fn matches_skip_take(len in 0i64..30, offset in 0usize..40, limit in proptest::option::of(0usize..40)) {
            let data: Vec<i64> = (0..len).collect();
            let iter = Slice::new(source(ints("x", &data)), offset, limit).unwrap();
            let expected: Vec<i64> = data
                .iter()
                .copied()
                .skip(offset)
                .take(limit.unwrap_or(usize::MAX))
                .collect();
            prop_assert_eq!(values(&collect_rows(iter).unwrap(), "x"), expected);
        }
    }
}
