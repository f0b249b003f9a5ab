//! Loop-on-left joins: the right side is read once into memory, then each
//! left row is tested against every right row.

use super::base::{IterLogic, QueryIter};
use super::cancel::CancelSignal;
use super::{not_ready, pull, BoxIter, QueryIterator};
use crate::binding::Binding;
use crate::error::QueryResult;
use tracing::trace;

struct RightTable {
    input: BoxIter,
    rows: Option<Vec<Binding>>,
}

impl RightTable {
    fn new(input: BoxIter) -> Self {
        Self { input, rows: None }
    }

    fn load(&mut self) -> QueryResult<()> {
        if self.rows.is_none() {
            let mut rows = Vec::new();
            while let Some(row) = pull(self.input.as_mut())? {
                rows.push(row);
            }
            self.input.close();
            trace!(rows = rows.len(), "right side materialized");
            self.rows = Some(rows);
        }
        Ok(())
    }

    fn rows(&self) -> &[Binding] {
        self.rows.as_deref().unwrap_or(&[])
    }

    fn close(&mut self) {
        self.input.close();
        self.rows = None;
    }
}

/// Inner join of two inputs on their shared variables.
pub struct NestedLoopJoin {
    left: BoxIter,
    right: RightTable,
    current: Option<Binding>,
    index: usize,
    next: Option<Binding>,
}

impl NestedLoopJoin {
    /// Joins `left` with `right`.
    #[must_use]
    pub fn new(left: BoxIter, right: BoxIter) -> QueryIter<Self> {
        QueryIter::new(Self {
            left,
            right: RightTable::new(right),
            current: None,
            index: 0,
            next: None,
        })
    }
}

impl IterLogic for NestedLoopJoin {
    fn name(&self) -> &'static str {
        "NestedLoopJoin"
    }

    fn has_next_binding(&mut self, _signal: &CancelSignal) -> QueryResult<bool> {
        self.right.load()?;
        loop {
            if let Some(left) = &self.current {
                let rows = self.right.rows();
                while self.index < rows.len() {
                    let merged = left.merge(&rows[self.index]);
                    self.index += 1;
                    if let Some(merged) = merged {
                        self.next = Some(merged);
                        return Ok(true);
                    }
                }
            }
            match pull(self.left.as_mut())? {
                Some(row) => {
                    self.current = Some(row);
                    self.index = 0;
                }
                None => return Ok(false),
            }
        }
    }

    fn move_to_next_binding(&mut self) -> QueryResult<Binding> {
        self.next.take().ok_or_else(|| not_ready(self.name()))
    }

    fn close_iterator(&mut self) {
        self.left.close();
        self.right.close();
    }

    fn children(&self) -> Vec<&dyn QueryIterator> {
        vec![self.left.as_ref(), self.right.input.as_ref()]
    }
}

/// Condition applied to a merged row of a left join.
pub type JoinCondition = Box<dyn FnMut(&Binding) -> QueryResult<bool> + Send>;

/// Left outer join: every left row appears, extended by each compatible
/// right row that satisfies the condition, or alone if there is none.
pub struct LeftJoin {
    left: BoxIter,
    right: RightTable,
    condition: Option<JoinCondition>,
    current: Option<Binding>,
    index: usize,
    matched: bool,
    next: Option<Binding>,
}

impl LeftJoin {
    /// Left-joins `left` with `right`.
    #[must_use]
    pub fn new(left: BoxIter, right: BoxIter, condition: Option<JoinCondition>) -> QueryIter<Self> {
        QueryIter::new(Self {
            left,
            right: RightTable::new(right),
            condition,
            current: None,
            index: 0,
            matched: false,
            next: None,
        })
    }
}

impl IterLogic for LeftJoin {
    fn name(&self) -> &'static str {
        "LeftJoin"
    }

    fn has_next_binding(&mut self, _signal: &CancelSignal) -> QueryResult<bool> {
        self.right.load()?;
        loop {
            if let Some(left) = &self.current {
                let rows = self.right.rows();
                while self.index < rows.len() {
                    let merged = left.merge(&rows[self.index]);
                    self.index += 1;
                    let Some(merged) = merged else { continue };
                    let keep = match self.condition.as_mut() {
                        Some(condition) => condition(&merged)?,
                        None => true,
                    };
                    if keep {
                        self.matched = true;
                        self.next = Some(merged);
                        return Ok(true);
                    }
                }
                if !self.matched {
                    self.next = self.current.take();
                    return Ok(true);
                }
            }
            match pull(self.left.as_mut())? {
                Some(row) => {
                    self.current = Some(row);
                    self.index = 0;
                    self.matched = false;
                }
                None => return Ok(false),
            }
        }
    }

    fn move_to_next_binding(&mut self) -> QueryResult<Binding> {
        self.next.take().ok_or_else(|| not_ready(self.name()))
    }

    fn close_iterator(&mut self) {
        self.left.close();
        self.right.close();
    }

    fn children(&self) -> Vec<&dyn QueryIterator> {
        vec![self.left.as_ref(), self.right.input.as_ref()]
    }
}

/// When a right row removes a left row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AntiRule {
    /// Compatible and sharing at least one variable (SPARQL `MINUS`).
    Minus,
    /// Compatible, even with no shared variable.
    Difference,
}

/// Left rows with no removing right row.
pub struct AntiJoin {
    left: BoxIter,
    right: RightTable,
    rule: AntiRule,
    next: Option<Binding>,
}

impl AntiJoin {
    fn removes(&self, left: &Binding) -> bool {
        self.right.rows().iter().any(|right| match self.rule {
            AntiRule::Minus => left.shares_var(right) && left.is_compatible(right),
            AntiRule::Difference => left.is_compatible(right),
        })
    }
}

impl IterLogic for AntiJoin {
    fn name(&self) -> &'static str {
        match self.rule {
            AntiRule::Minus => "Minus",
            AntiRule::Difference => "Difference",
        }
    }

    fn has_next_binding(&mut self, _signal: &CancelSignal) -> QueryResult<bool> {
        self.right.load()?;
        while let Some(row) = pull(self.left.as_mut())? {
            if !self.removes(&row) {
                self.next = Some(row);
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn move_to_next_binding(&mut self) -> QueryResult<Binding> {
        self.next.take().ok_or_else(|| not_ready(self.name()))
    }

    fn close_iterator(&mut self) {
        self.left.close();
        self.right.close();
    }

    fn children(&self) -> Vec<&dyn QueryIterator> {
        vec![self.left.as_ref(), self.right.input.as_ref()]
    }
}

/// SPARQL `MINUS`.
pub struct Minus;

impl Minus {
    /// Removes left rows that agree with some right row on at least one
    /// shared variable.
    #[must_use]
    pub fn new(left: BoxIter, right: BoxIter) -> QueryIter<AntiJoin> {
        anti_join(left, right, AntiRule::Minus)
    }
}

/// Set difference by compatibility.
pub struct Difference;

impl Difference {
    /// Removes left rows compatible with some right row.
    #[must_use]
    pub fn new(left: BoxIter, right: BoxIter) -> QueryIter<AntiJoin> {
        anti_join(left, right, AntiRule::Difference)
    }
}

fn anti_join(left: BoxIter, right: BoxIter, rule: AntiRule) -> QueryIter<AntiJoin> {
    QueryIter::new(AntiJoin {
        left,
        right: RightTable::new(right),
        rule,
        next: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iter::collect_rows;
    use crate::iter::test_support::*;
    use tessera_core::Node;

    fn pairs(rows: &[(i64, i64)], a: &str, b: &str) -> BoxIter {
        source(
            rows.iter()
                .map(|(x, y)| Binding::new().with(a, Node::integer(*x)).with(b, Node::integer(*y)))
                .collect(),
        )
    }

    #[test]
    fn inner_join_on_shared_var() {
        let left = pairs(&[(1, 10), (2, 20), (3, 30)], "k", "l");
        let right = pairs(&[(1, 100), (3, 300), (3, 301)], "k", "r");
        let out = collect_rows(NestedLoopJoin::new(left, right)).unwrap();
        assert_eq!(values(&out, "k"), vec![1, 3, 3]);
        assert_eq!(values(&out, "r"), vec![100, 300, 301]);
    }

    #[test]
    fn join_without_shared_vars_is_a_cross_product() {
        let out = collect_rows(NestedLoopJoin::new(source(ints("a", &[1, 2])), source(ints("b", &[1, 2, 3]))))
            .unwrap();
        assert_eq!(out.len(), 6);
    }

    #[test]
    fn left_join_keeps_unmatched_rows() {
        let left = pairs(&[(1, 10), (2, 20)], "k", "l");
        let right = pairs(&[(1, 100)], "k", "r");
        let out = collect_rows(LeftJoin::new(left, right, None)).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(values(&out, "r"), vec![100]);
        assert!(!out[1].contains(&"r".into()));
    }

    #[test]
    fn left_join_condition_filters_extensions() {
        let left = pairs(&[(1, 10)], "k", "l");
        let right = pairs(&[(1, 5), (1, 50)], "k", "r");
        let condition: JoinCondition = Box::new(|row| {
            Ok(row.get(&"r".into()).and_then(Node::as_i64).unwrap_or(0) > 10)
        });
        let out = collect_rows(LeftJoin::new(left, right, Some(condition))).unwrap();
        assert_eq!(values(&out, "r"), vec![50]);
    }

    #[test]
    fn minus_needs_a_shared_variable() {
        let left = source(ints("x", &[1, 2, 3]));
        let right = source(ints("x", &[2]));
        assert_eq!(values(&collect_rows(Minus::new(left, right)).unwrap(), "x"), vec![1, 3]);

        // Disjoint variables never remove anything.
        let out = collect_rows(Minus::new(source(ints("x", &[1])), source(ints("y", &[1])))).unwrap();
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn difference_removes_compatible_rows() {
        let out = collect_rows(Difference::new(source(ints("x", &[1])), source(ints("y", &[1])))).unwrap();
        assert!(out.is_empty());
        let out = collect_rows(Difference::new(source(ints("x", &[1, 2])), source(ints("x", &[2])))).unwrap();
        assert_eq!(values(&out, "x"), vec![1]);
    }

    #[test]
    fn close_before_pull_closes_both_sides() {
        let mut join = NestedLoopJoin::new(source(ints("a", &[1])), source(ints("b", &[1])));
        join.close();
        assert!(join.logic().left.is_finished());
        assert!(join.logic().right.input.is_finished());
    }
}
