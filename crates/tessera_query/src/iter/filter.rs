//! Row-at-a-time transforms: filter, convert, extend, project.

use super::base::{IterLogic, QueryIter};
use super::cancel::CancelSignal;
use super::{not_ready, pull, BoxIter, QueryIterator};
use crate::binding::{Binding, Var};
use crate::error::QueryResult;
use tessera_core::Node;

/// Keeps rows for which the predicate holds.
pub struct Filter<F> {
    input: BoxIter,
    predicate: F,
    next: Option<Binding>,
}

impl<F> Filter<F>
where
    F: FnMut(&Binding) -> QueryResult<bool> + Send,
{
    /// Filters `input` with `predicate`. A predicate error ends iteration.
    pub fn new(input: BoxIter, predicate: F) -> QueryIter<Self> {
        QueryIter::new(Self {
            input,
            predicate,
            next: None,
        })
    }
}

impl<F> IterLogic for Filter<F>
where
    F: FnMut(&Binding) -> QueryResult<bool> + Send,
{
    fn name(&self) -> &'static str {
        "Filter"
    }

    fn has_next_binding(&mut self, _signal: &CancelSignal) -> QueryResult<bool> {
        while let Some(row) = pull(self.input.as_mut())? {
            if (self.predicate)(&row)? {
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
        self.input.close();
    }

    fn children(&self) -> Vec<&dyn QueryIterator> {
        vec![self.input.as_ref()]
    }
}

/// Replaces each row with the result of a function.
pub struct Convert<F> {
    input: BoxIter,
    convert: F,
}

impl<F> Convert<F>
where
    F: FnMut(Binding) -> QueryResult<Binding> + Send,
{
    /// Maps `input` through `convert`.
    pub fn new(input: BoxIter, convert: F) -> QueryIter<Self> {
        QueryIter::new(Self { input, convert })
    }
}

impl<F> IterLogic for Convert<F>
where
    F: FnMut(Binding) -> QueryResult<Binding> + Send,
{
    fn name(&self) -> &'static str {
        "Convert"
    }

    fn has_next_binding(&mut self, _signal: &CancelSignal) -> QueryResult<bool> {
        self.input.has_next()
    }

    fn move_to_next_binding(&mut self) -> QueryResult<Binding> {
        let row = self.input.next_binding()?;
        (self.convert)(row)
    }

    fn close_iterator(&mut self) {
        self.input.close();
    }

    fn children(&self) -> Vec<&dyn QueryIterator> {
        vec![self.input.as_ref()]
    }
}

/// Binds a variable to a computed value.
///
/// When the function yields `None` the row passes through with the
/// variable unbound. A row that already binds the variable to a different
/// value is dropped.
pub struct Extend<F> {
    input: BoxIter,
    var: Var,
    compute: F,
    next: Option<Binding>,
}

impl<F> Extend<F>
where
    F: FnMut(&Binding) -> QueryResult<Option<Node>> + Send,
{
    /// Extends each row of `input` with `var`.
    pub fn new(input: BoxIter, var: impl Into<Var>, compute: F) -> QueryIter<Self> {
        QueryIter::new(Self {
            input,
            var: var.into(),
            compute,
            next: None,
        })
    }
}

impl<F> IterLogic for Extend<F>
where
    F: FnMut(&Binding) -> QueryResult<Option<Node>> + Send,
{
    fn name(&self) -> &'static str {
        "Extend"
    }

    fn has_next_binding(&mut self, _signal: &CancelSignal) -> QueryResult<bool> {
        while let Some(mut row) = pull(self.input.as_mut())? {
            match (self.compute)(&row)? {
                None => {}
                Some(value) => match row.get(&self.var) {
                    Some(existing) if *existing != value => continue,
                    Some(_) => {}
                    None => row.insert(self.var.clone(), value),
                },
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
    }

    fn children(&self) -> Vec<&dyn QueryIterator> {
        vec![self.input.as_ref()]
    }

    fn details(&self) -> String {
        self.var.to_string()
    }
}

/// Keeps only the listed variables.
pub struct Project {
    input: BoxIter,
    vars: Vec<Var>,
}

impl Project {
    /// Projects `input` onto `vars`.
    #[must_use]
    pub fn new(input: BoxIter, vars: Vec<Var>) -> QueryIter<Self> {
        QueryIter::new(Self { input, vars })
    }
}

impl IterLogic for Project {
    fn name(&self) -> &'static str {
        "Project"
    }

    fn has_next_binding(&mut self, _signal: &CancelSignal) -> QueryResult<bool> {
        self.input.has_next()
    }

    fn move_to_next_binding(&mut self) -> QueryResult<Binding> {
        Ok(self.input.next_binding()?.project(&self.vars))
    }

    fn close_iterator(&mut self) {
        self.input.close();
    }

    fn children(&self) -> Vec<&dyn QueryIterator> {
        vec![self.input.as_ref()]
    }

    fn details(&self) -> String {
        self.vars
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueryError;
    use crate::iter::collect_rows;
    use crate::iter::test_support::*;

    #[test]
    fn filter_keeps_matching_rows() {
        let iter = Filter::new(source(ints("x", &[1, 2, 3, 4])), |row| {
            Ok(row.get(&"x".into()).and_then(Node::as_i64).unwrap_or(0) % 2 == 0)
        });
        assert_eq!(values(&collect_rows(iter).unwrap(), "x"), vec![2, 4]);
    }

    #[test]
    fn filter_error_ends_iteration() {
        let mut iter = Filter::new(source(ints("x", &[1])), |_| {
            Err(QueryError::evaluation("type error"))
        });
        assert!(matches!(iter.has_next(), Err(QueryError::Evaluation { .. })));
        assert!(!iter.has_next().unwrap());
    }

    #[test]
    fn convert_maps_rows() {
        let iter = Convert::new(source(ints("x", &[1, 2])), |row| {
            let x = row.get(&"x".into()).and_then(Node::as_i64).unwrap_or(0);
            Ok(row.with("y", Node::integer(x * 10)))
        });
        assert_eq!(values(&collect_rows(iter).unwrap(), "y"), vec![10, 20]);
    }

    #[test]
    fn extend_binds_unless_unbound_or_conflicting() {
        let mut rows = ints("x", &[1, 2, 3]);
        rows[2].insert("y".into(), Node::integer(99));
        let iter = Extend::new(source(rows), "y", |row| {
            let x = row.get(&"x".into()).and_then(Node::as_i64).unwrap_or(0);
            Ok((x != 2).then(|| Node::integer(x + 1)))
        });
        let out = collect_rows(iter).unwrap();
        // Row 3 binds ?y to 99 already and conflicts with 4.
        assert_eq!(out.len(), 2);
        assert_eq!(values(&out, "y"), vec![2]);
        assert!(!out[1].contains(&"y".into()));
    }

    #[test]
    fn project_keeps_listed_vars() {
        let rows = vec![Binding::new()
            .with("x", Node::integer(1))
            .with("y", Node::integer(2))];
        let iter = Project::new(source(rows), vec![Var::new("y")]);
        let out = collect_rows(iter).unwrap();
        assert_eq!(out, vec![Binding::new().with("y", Node::integer(2))]);
    }
}
