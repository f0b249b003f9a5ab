//! Ordering operators.

use super::base::{IterLogic, QueryIter};
use super::cancel::CancelSignal;
use super::{pull, BoxIter, QueryIterator};
use crate::binding::{compare_values, Binding, Var};
use crate::config::ExecConfig;
use crate::error::{QueryError, QueryResult};
use crate::spill::{Merge, Spill};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Smallest first.
    Asc,
    /// Largest first.
    Desc,
}

/// One sort key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortCondition {
    /// Variable compared.
    pub var: Var,
    /// Direction.
    pub direction: Direction,
}

impl SortCondition {
    /// Ascending on `var`.
    pub fn asc(var: impl Into<Var>) -> Self {
        Self {
            var: var.into(),
            direction: Direction::Asc,
        }
    }

    /// Descending on `var`.
    pub fn desc(var: impl Into<Var>) -> Self {
        Self {
            var: var.into(),
            direction: Direction::Desc,
        }
    }
}

impl fmt::Display for SortCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.direction {
            Direction::Asc => write!(f, "asc({})", self.var),
            Direction::Desc => write!(f, "desc({})", self.var),
        }
    }
}

fn compare_by(conditions: &[SortCondition], a: &Binding, b: &Binding) -> Ordering {
    for condition in conditions {
        let ord = compare_values(a.get(&condition.var), b.get(&condition.var));
        let ord = match condition.direction {
            Direction::Asc => ord,
            Direction::Desc => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn describe(conditions: &[SortCondition]) -> String {
    conditions
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

type RowOrder = Box<dyn Fn(&Binding, &Binding) -> Ordering + Send>;

enum Phase {
    Pending,
    Memory(std::vec::IntoIter<Binding>),
    Merging(Merge<RowOrder>),
    Done,
}

/// Stable sort on a list of conditions.
///
/// Nothing is read until the first pull. Past
/// [`ExecConfig::sort_spill_threshold`] rows the buffer is written out as a
/// sorted run and the runs are merged at the end.
pub struct Sort {
    input: BoxIter,
    conditions: Arc<Vec<SortCondition>>,
    config: ExecConfig,
    phase: Phase,
    next: Option<Binding>,
}

impl Sort {
    /// Sorts `input` by `conditions`.
    #[must_use]
    pub fn new(input: BoxIter, conditions: Vec<SortCondition>, config: ExecConfig) -> QueryIter<Self> {
        QueryIter::new(Self {
            input,
            conditions: Arc::new(conditions),
            config,
            phase: Phase::Pending,
            next: None,
        })
    }

    fn load(&mut self) -> QueryResult<Phase> {
        let threshold = self.config.sort_spill_threshold.max(1);
        let mut spill: Option<Spill> = None;
        let mut buffer = Vec::new();
        while let Some(row) = pull(self.input.as_mut())? {
            buffer.push(row);
            if buffer.len() >= threshold {
                buffer.sort_by(|a, b| compare_by(&self.conditions, a, b));
                spill
                    .get_or_insert_with(|| Spill::new(&self.config))
                    .write_run(&buffer)?;
                buffer.clear();
            }
        }
        self.input.close();
        buffer.sort_by(|a, b| compare_by(&self.conditions, a, b));
        match spill {
            None => Ok(Phase::Memory(buffer.into_iter())),
            Some(spill) => {
                debug!(runs = spill.runs(), rows = spill.rows() + buffer.len(), "merging sort runs");
                let conditions = Arc::clone(&self.conditions);
                let order: RowOrder = Box::new(move |a, b| compare_by(&conditions, a, b));
                Ok(Phase::Merging(spill.merge(buffer, order)?))
            }
        }
    }
}

impl IterLogic for Sort {
    fn name(&self) -> &'static str {
        "Sort"
    }

    fn has_next_binding(&mut self, _signal: &CancelSignal) -> QueryResult<bool> {
        if self.next.is_some() {
            return Ok(true);
        }
        if matches!(self.phase, Phase::Pending) {
            self.phase = self.load()?;
        }
        self.next = match &mut self.phase {
            Phase::Memory(rows) => rows.next(),
            Phase::Merging(merge) => merge.next()?,
            Phase::Pending | Phase::Done => None,
        };
        if self.next.is_none() {
            self.phase = Phase::Done;
        }
        Ok(self.next.is_some())
    }

    fn move_to_next_binding(&mut self) -> QueryResult<Binding> {
        self.next.take().ok_or(QueryError::NoMoreElements)
    }

    fn close_iterator(&mut self) {
        self.input.close();
        self.phase = Phase::Done;
        self.next = None;
    }

    fn children(&self) -> Vec<&dyn QueryIterator> {
        vec![self.input.as_ref()]
    }

    fn details(&self) -> String {
        describe(&self.conditions)
    }
}

struct Ranked {
    row: Binding,
    seq: u64,
    conditions: Arc<Vec<SortCondition>>,
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_by(&self.conditions, &self.row, &other.row).then(self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked {}

/// The first `limit` rows of a sort, holding at most `limit` rows.
///
/// Ties keep input order, so the output equals a stable sort followed by a
/// limit.
pub struct TopN {
    input: BoxIter,
    conditions: Arc<Vec<SortCondition>>,
    limit: usize,
    peak: usize,
    output: Option<VecDeque<Binding>>,
}

impl TopN {
    /// Keeps the best `limit` rows of `input` under `conditions`.
    #[must_use]
    pub fn new(input: BoxIter, conditions: Vec<SortCondition>, limit: usize) -> QueryIter<Self> {
        QueryIter::new(Self {
            input,
            conditions: Arc::new(conditions),
            limit,
            peak: 0,
            output: None,
        })
    }

    /// Most rows the heap has held at once.
    #[must_use]
    pub fn peak_rows(&self) -> usize {
        self.peak
    }

    fn build(&mut self) -> QueryResult<VecDeque<Binding>> {
        if self.limit == 0 {
            self.input.close();
            return Ok(VecDeque::new());
        }
        let mut heap: BinaryHeap<Ranked> = BinaryHeap::with_capacity(self.limit + 1);
        let mut seq = 0u64;
        while let Some(row) = pull(self.input.as_mut())? {
            let candidate = Ranked {
                row,
                seq,
                conditions: Arc::clone(&self.conditions),
            };
            seq += 1;
            if heap.len() < self.limit {
                heap.push(candidate);
            } else if heap.peek().is_some_and(|worst| candidate < *worst) {
                heap.pop();
                heap.push(candidate);
            }
            self.peak = self.peak.max(heap.len());
        }
        self.input.close();
        Ok(heap.into_sorted_vec().into_iter().map(|r| r.row).collect())
    }
}

impl IterLogic for TopN {
    fn name(&self) -> &'static str {
        "TopN"
    }

    fn has_next_binding(&mut self, _signal: &CancelSignal) -> QueryResult<bool> {
        if self.output.is_none() {
            let output = self.build()?;
            self.output = Some(output);
        }
        Ok(self.output.as_ref().is_some_and(|rows| !rows.is_empty()))
    }

    fn move_to_next_binding(&mut self) -> QueryResult<Binding> {
        self.output
            .as_mut()
            .and_then(VecDeque::pop_front)
            .ok_or(QueryError::NoMoreElements)
    }

    fn close_iterator(&mut self) {
        self.input.close();
        self.output = None;
    }

    fn children(&self) -> Vec<&dyn QueryIterator> {
        vec![self.input.as_ref()]
    }

    fn details(&self) -> String {
        format!("limit={} peak={} {}", self.limit, self.peak, describe(&self.conditions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iter::collect_rows;
    use crate::iter::test_support::*;
    use proptest::prelude::*;
    use tessera_core::Node;

    #[test]
    fn top_n_keeps_smallest() {
        let iter = TopN::new(source(ints("x", &[5, 3, 8, 1, 9, 2])), vec![SortCondition::asc("x")], 3);
        assert_eq!(values(&collect_rows(iter).unwrap(), "x"), vec![1, 2, 3]);
    }

    #[test]
    fn top_n_heap_never_exceeds_limit() {
        let data: Vec<i64> = (0..2_000).map(|i| (i * 7_919) % 2_003).collect();
        let mut iter = TopN::new(source(ints("x", &data)), vec![SortCondition::desc("x")], 5);
        let mut out = Vec::new();
        while iter.has_next().unwrap() {
            out.push(iter.next_binding().unwrap());
            assert!(iter.logic().peak_rows() <= 5);
        }
        assert_eq!(out.len(), 5);
        assert_eq!(iter.logic().peak_rows(), 5);
        assert!(iter.logic().details().starts_with("limit=5 peak=5"));
    }

    #[test]
    fn top_n_zero_limit() {
        let iter = TopN::new(source(ints("x", &[1, 2])), vec![SortCondition::asc("x")], 0);
        assert!(collect_rows(iter).unwrap().is_empty());
    }

    #[test]
    fn sort_descending_with_unbound_last() {
        let mut rows = ints("x", &[2, 7, 4]);
        rows.push(Binding::new().with("y", Node::integer(0)));
        let iter = Sort::new(source(rows), vec![SortCondition::desc("x")], ExecConfig::default());
        let out = collect_rows(iter).unwrap();
        assert_eq!(values(&out, "x"), vec![7, 4, 2]);
        assert!(!out[3].contains(&"x".into()));
    }

    #[test]
    fn sort_is_stable_on_ties() {
        let rows: Vec<Binding> = [(1, 0), (0, 1), (1, 2), (0, 3)]
            .iter()
            .map(|(k, i)| {
                Binding::new()
                    .with("k", Node::integer(*k))
                    .with("i", Node::integer(*i))
            })
            .collect();
        let iter = Sort::new(source(rows), vec![SortCondition::asc("k")], ExecConfig::default());
        assert_eq!(values(&collect_rows(iter).unwrap(), "i"), vec![1, 3, 0, 2]);
    }

    #[test]
    fn sort_spills_and_merges() {
        let data: Vec<i64> = (0..50).map(|i| (i * 37) % 50).collect();
        let config = ExecConfig::default().sort_spill_threshold(8);
        let iter = Sort::new(source(ints("x", &data)), vec![SortCondition::asc("x")], config);
        assert_eq!(values(&collect_rows(iter).unwrap(), "x"), (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn sort_is_lazy_until_pulled() {
        let mut iter = Sort::new(source(ints("x", &[3, 1])), vec![SortCondition::asc("x")], ExecConfig::default());
        assert!(matches!(iter.logic().phase, Phase::Pending));
        assert!(iter.has_next().unwrap());
        assert_eq!(values(&[iter.next_binding().unwrap()], "x"), vec![1]);
    }

    proptest! {
        #[test]
        fn top_n_matches_sort_then_limit(data in prop::collection::vec(-20i64..20, 0..60), limit in 0usize..10) {
            let iter = TopN::new(source(ints("x", &data)), vec![SortCondition::asc("x")], limit);
            let mut expected = data.clone();
            expected.sort();
            expected.truncate(limit);
            prop_assert_eq!(values(&collect_rows(iter).unwrap(), "x"), expected);
        }

        #[test]
        fn spilled_sort_matches_model(data in prop::collection::vec(-100i64..100, 0..80), threshold in 1usize..16) {
            let config = ExecConfig::default().sort_spill_threshold(threshold);
            let iter = Sort::new(source(ints("x", &data)), vec![SortCondition::desc("x")], config);
            let mut expected = data.clone();
            expected.sort_by(|a, b| b.cmp(a));
            prop_assert_eq!(values(&collect_rows(iter).unwrap(), "x"), expected);
        }
    }
}
