//! Duplicate elimination.

use super::base::{IterLogic, QueryIter};
use super::cancel::CancelSignal;
use super::{not_ready, pull, BoxIter, QueryIterator};
use crate::binding::{Binding, Var};
use crate::config::ExecConfig;
use crate::error::QueryResult;
use crate::spill::{Merge, Spill};
use std::collections::{HashSet, VecDeque};
use tracing::debug;

type BindingOrder = fn(&Binding, &Binding) -> std::cmp::Ordering;

enum Phase {
    /// Rows are checked against `seen` and passed on as they arrive.
    Streaming,
    /// `seen` is full: the remaining input was spilled and is read back
    /// merged, so duplicates are adjacent.
    Merging {
        merge: Merge<BindingOrder>,
        last: Option<Binding>,
    },
}

fn vars_detail(vars: Option<&[Var]>) -> String {
    match vars {
        Some(vars) => vars.iter().map(ToString::to_string).collect::<Vec<_>>().join(" "),
        None => "*".to_string(),
    }
}

/// Removes duplicate rows.
///
/// Rows are compared, and emitted, without their internal variables and,
/// if distinguished variables were given, projected onto them.
///
/// Up to `distinct_spill_threshold` distinct rows are kept in a hash set
/// and streamed. Past that, the rest of the input is read in one go,
/// written to sorted runs, and merged.
pub struct Distinct {
    input: BoxIter,
    vars: Option<Vec<Var>>,
    config: ExecConfig,
    seen: HashSet<Binding>,
    phase: Phase,
    next: Option<Binding>,
}

impl Distinct {
    /// Removes duplicates from `input` over all non-internal variables.
    #[must_use]
    pub fn new(input: BoxIter, config: ExecConfig) -> QueryIter<Self> {
        Self::build(input, None, config)
    }

    /// Removes duplicates from `input` projected onto `vars`.
    #[must_use]
    pub fn on(input: BoxIter, vars: Vec<Var>, config: ExecConfig) -> QueryIter<Self> {
        Self::build(input, Some(vars), config)
    }

    fn build(input: BoxIter, vars: Option<Vec<Var>>, config: ExecConfig) -> QueryIter<Self> {
        QueryIter::new(Self {
            input,
            vars,
            config,
            seen: HashSet::new(),
            phase: Phase::Streaming,
            next: None,
        })
    }

    fn spill_rest(&mut self) -> QueryResult<()> {
        let chunk_size = self.config.distinct_spill_threshold.max(1);
        let mut spill = Spill::new(&self.config);
        let mut chunk = Vec::with_capacity(chunk_size);
        while let Some(row) = pull(self.input.as_mut())? {
            let row = row.distinguished(self.vars.as_deref());
            if self.seen.contains(&row) {
                continue;
            }
            chunk.push(row);
            if chunk.len() >= chunk_size {
                chunk.sort();
                chunk.dedup();
                spill.write_run(&chunk)?;
                chunk.clear();
            }
        }
        self.input.close();
        chunk.sort();
        chunk.dedup();
        debug!(runs = spill.runs(), spilled = spill.rows(), "distinct spilled");
        let order: BindingOrder = Binding::cmp;
        self.phase = Phase::Merging {
            merge: spill.merge(chunk, order)?,
            last: None,
        };
        Ok(())
    }
}

impl IterLogic for Distinct {
    fn name(&self) -> &'static str {
        "Distinct"
    }

    fn has_next_binding(&mut self, _signal: &CancelSignal) -> QueryResult<bool> {
        loop {
            match &mut self.phase {
                Phase::Streaming => {
                    if self.seen.len() >= self.config.distinct_spill_threshold {
                        self.spill_rest()?;
                        continue;
                    }
                    let Some(row) = pull(self.input.as_mut())? else {
                        return Ok(false);
                    };
                    let row = row.distinguished(self.vars.as_deref());
                    if self.seen.insert(row.clone()) {
                        self.next = Some(row);
                        return Ok(true);
                    }
                }
                Phase::Merging { merge, last } => {
                    let Some(row) = merge.next()? else {
                        return Ok(false);
                    };
                    if last.as_ref() != Some(&row) {
                        *last = Some(row.clone());
                        self.next = Some(row);
                        return Ok(true);
                    }
                }
            }
        }
    }

    fn move_to_next_binding(&mut self) -> QueryResult<Binding> {
        self.next.take().ok_or_else(|| not_ready(self.name()))
    }

    fn close_iterator(&mut self) {
        self.input.close();
        self.seen.clear();
        self.phase = Phase::Streaming;
    }

    fn children(&self) -> Vec<&dyn QueryIterator> {
        vec![self.input.as_ref()]
    }

    fn details(&self) -> String {
        format!("vars={}", vars_detail(self.vars.as_deref()))
    }
}

/// Removes duplicates within a window of recent rows.
///
/// Rows are projected the same way as for [`Distinct`].
pub struct Reduced {
    input: BoxIter,
    vars: Option<Vec<Var>>,
    window: usize,
    recent: VecDeque<Binding>,
    members: HashSet<Binding>,
    next: Option<Binding>,
}

impl Reduced {
    /// Drops rows equal to one of the last `window` distinct rows.
    #[must_use]
    pub fn new(input: BoxIter, window: usize) -> QueryIter<Self> {
        Self::build(input, None, window)
    }

    /// Like [`Reduced::new`], comparing rows projected onto `vars`.
    #[must_use]
    pub fn on(input: BoxIter, vars: Vec<Var>, window: usize) -> QueryIter<Self> {
        Self::build(input, Some(vars), window)
    }

    fn build(input: BoxIter, vars: Option<Vec<Var>>, window: usize) -> QueryIter<Self> {
        QueryIter::new(Self {
            input,
            vars,
            window: window.max(1),
            recent: VecDeque::new(),
            members: HashSet::new(),
            next: None,
        })
    }
}

impl IterLogic for Reduced {
    fn name(&self) -> &'static str {
        "Reduced"
    }

    fn has_next_binding(&mut self, _signal: &CancelSignal) -> QueryResult<bool> {
        while let Some(row) = pull(self.input.as_mut())? {
            let row = row.distinguished(self.vars.as_deref());
            if self.members.contains(&row) {
                continue;
            }
            self.members.insert(row.clone());
            self.recent.push_back(row.clone());
            if self.recent.len() > self.window {
                if let Some(oldest) = self.recent.pop_front() {
                    self.members.remove(&oldest);
                }
            }
            self.next = Some(row);
            return Ok(true);
        }
        Ok(false)
    }

    fn move_to_next_binding(&mut self) -> QueryResult<Binding> {
        self.next.take().ok_or_else(|| not_ready(self.name()))
    }

    fn close_iterator(&mut self) {
        self.input.close();
        self.recent.clear();
        self.members.clear();
    }

    fn children(&self) -> Vec<&dyn QueryIterator> {
        vec![self.input.as_ref()]
    }

    fn details(&self) -> String {
        format!("window={} vars={}", self.window, vars_detail(self.vars.as_deref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iter::collect_rows;
    use crate::iter::test_support::*;
    use tessera_core::Node;

    #[test]
    fn distinct_in_memory_keeps_first_occurrence_order() {
        let iter = Distinct::new(source(ints("x", &[3, 1, 3, 2, 1])), ExecConfig::default());
        assert_eq!(values(&collect_rows(iter).unwrap(), "x"), vec![3, 1, 2]);
    }

    #[test]
    fn distinct_spills_past_threshold() {
        let input: Vec<i64> = (0..40).map(|i| i % 7).chain([100, 100, 5]).collect();
        let config = ExecConfig::default().distinct_spill_threshold(3);
        let iter = Distinct::new(source(ints("x", &input)), config);
        let mut out = values(&collect_rows(iter).unwrap(), "x");
        // The first three arrive streamed, in input order.
        assert_eq!(&out[..3], &[0, 1, 2]);
        out.sort_unstable();
        assert_eq!(out, vec![0, 1, 2, 3, 4, 5, 6, 100]);
    }

    fn with_hidden(rows: Vec<Binding>) -> Vec<Binding> {
        rows.into_iter()
            .enumerate()
            .map(|(i, row)| row.with(Var::internal("b0"), Node::integer(i as i64)))
            .collect()
    }

    #[test]
    fn distinct_ignores_internal_vars() {
        let rows = with_hidden(ints("x", &[1, 1, 2]));
        let out = collect_rows(Distinct::new(source(rows), ExecConfig::default())).unwrap();
        assert_eq!(values(&out, "x"), vec![1, 2]);
        assert!(out.iter().all(|row| row.vars().all(|var| !var.is_internal())));
    }

    #[test]
    fn distinct_ignores_internal_vars_when_spilling() {
        let rows = with_hidden(ints("x", &[1, 2, 1, 2, 3, 3, 1]));
        let config = ExecConfig::default().distinct_spill_threshold(1);
        let mut out = values(&collect_rows(Distinct::new(source(rows), config)).unwrap(), "x");
        out.sort_unstable();
        assert_eq!(out, vec![1, 2, 3]);
    }

    #[test]
    fn distinct_on_named_vars() {
        let rows = vec![
            Binding::new().with("x", Node::integer(1)).with("y", Node::integer(10)),
            Binding::new().with("x", Node::integer(1)).with("y", Node::integer(20)),
            Binding::new().with("x", Node::integer(2)).with("y", Node::integer(10)),
        ];
        let iter = Distinct::on(source(rows), vec![Var::new("x")], ExecConfig::default());
        assert_eq!(iter.logic().details(), "vars=?x");
        let out = collect_rows(iter).unwrap();
        assert_eq!(values(&out, "x"), vec![1, 2]);
        assert!(out.iter().all(|row| !row.contains(&Var::new("y"))));
    }

    #[test]
    fn reduced_ignores_internal_vars() {
        let rows = with_hidden(ints("x", &[5, 5, 6, 6]));
        let iter = Reduced::new(source(rows), 4);
        assert_eq!(values(&collect_rows(iter).unwrap(), "x"), vec![5, 6]);
    }

    #[test]
    fn reduced_on_named_vars() {
        let rows = vec![
            Binding::new().with("x", Node::integer(1)).with("y", Node::integer(10)),
            Binding::new().with("x", Node::integer(1)).with("y", Node::integer(20)),
        ];
        let iter = Reduced::on(source(rows), vec![Var::new("x")], 2);
        assert_eq!(collect_rows(iter).unwrap().len(), 1);
    }

    #[test]
    fn reduced_drops_duplicates_inside_the_window() {
        let iter = Reduced::new(source(ints("x", &[1, 1, 2, 1, 3, 4, 1])), 2);
        // Window of two: the last 1 arrives after 3 and 4 pushed it out.
        assert_eq!(values(&collect_rows(iter).unwrap(), "x"), vec![1, 2, 3, 4, 1]);
    }
}
