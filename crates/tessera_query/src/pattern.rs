//! Triple patterns and basic graph patterns.

use crate::binding::{Binding, Var};
use crate::error::QueryResult;
use crate::iter::{not_ready, BoxIter, CancelSignal, IterLogic, QueryIter, RepeatApply};
use std::fmt;
use std::sync::Arc;
use tessera_core::{CoreResult, DatasetGraphTxn, Node, Statement};

/// Matches produced by a [`GraphSource`].
pub type StatementIter = Box<dyn Iterator<Item = CoreResult<Statement>> + Send>;

/// Anything that can answer a triple pattern lookup.
pub trait GraphSource: Send + Sync {
    /// Lazily finds triples matching the pattern; `None` matches anything.
    fn find(&self, s: Option<&Node>, p: Option<&Node>, o: Option<&Node>) -> QueryResult<StatementIter>;
}

impl GraphSource for DatasetGraphTxn {
    fn find(&self, s: Option<&Node>, p: Option<&Node>, o: Option<&Node>) -> QueryResult<StatementIter> {
        Ok(Box::new(DatasetGraphTxn::find(self, s, p, o)?))
    }
}

/// An in-memory graph.
#[derive(Debug, Clone, Default)]
pub struct MemoryGraph {
    statements: Vec<Statement>,
}

impl MemoryGraph {
    /// Creates a graph from statements. Duplicates are dropped.
    pub fn new(statements: impl IntoIterator<Item = Statement>) -> Self {
        let mut graph = Self::default();
        for statement in statements {
            graph.add(statement);
        }
        graph
    }

    /// Adds a statement; false if it was present.
    pub fn add(&mut self, statement: Statement) -> bool {
        if self.statements.contains(&statement) {
            return false;
        }
        self.statements.push(statement);
        true
    }

    /// Number of statements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.statements.len()
    }

    /// True when empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

impl GraphSource for MemoryGraph {
    fn find(&self, s: Option<&Node>, p: Option<&Node>, o: Option<&Node>) -> QueryResult<StatementIter> {
        let matches: Vec<CoreResult<Statement>> = self
            .statements
            .iter()
            .filter(|st| {
                s.is_none_or(|s| *s == st.subject)
                    && p.is_none_or(|p| *p == st.predicate)
                    && o.is_none_or(|o| *o == st.object)
            })
            .cloned()
            .map(Ok)
            .collect();
        Ok(Box::new(matches.into_iter()))
    }
}

/// One position of a triple pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PatternTerm {
    /// Matches anything and binds the variable.
    Var(Var),
    /// Matches exactly this node.
    Node(Node),
}

impl PatternTerm {
    /// A variable term.
    pub fn var(name: impl AsRef<str>) -> Self {
        Self::Var(Var::new(name))
    }

    /// The node this term stands for under `row`, if any.
    fn resolve<'a>(&'a self, row: &'a Binding) -> Option<&'a Node> {
        match self {
            Self::Node(node) => Some(node),
            Self::Var(var) => row.get(var),
        }
    }
}

impl From<Node> for PatternTerm {
    fn from(node: Node) -> Self {
        Self::Node(node)
    }
}

impl From<Var> for PatternTerm {
    fn from(var: Var) -> Self {
        Self::Var(var)
    }
}

impl fmt::Display for PatternTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Var(var) => write!(f, "{var}"),
            Self::Node(node) => write!(f, "{node}"),
        }
    }
}

/// A triple pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TriplePattern {
    /// Subject.
    pub subject: PatternTerm,
    /// Predicate.
    pub predicate: PatternTerm,
    /// Object.
    pub object: PatternTerm,
}

impl TriplePattern {
    /// Creates a pattern.
    pub fn new(
        subject: impl Into<PatternTerm>,
        predicate: impl Into<PatternTerm>,
        object: impl Into<PatternTerm>,
    ) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
        }
    }
}

impl fmt::Display for TriplePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.subject, self.predicate, self.object)
    }
}

/// Extends one row with every match of a triple pattern.
pub struct PatternStage {
    parent: Binding,
    pattern: TriplePattern,
    matches: Option<StatementIter>,
    next: Option<Binding>,
}

impl PatternStage {
    /// Looks up `pattern` with `parent`'s bindings substituted.
    pub fn new(
        source: &dyn GraphSource,
        pattern: TriplePattern,
        parent: Binding,
    ) -> QueryResult<QueryIter<Self>> {
        let matches = source.find(
            pattern.subject.resolve(&parent),
            pattern.predicate.resolve(&parent),
            pattern.object.resolve(&parent),
        )?;
        Ok(QueryIter::new(Self {
            parent,
            pattern,
            matches: Some(matches),
            next: None,
        }))
    }

    fn bind(&self, statement: Statement) -> Option<Binding> {
        let mut row = self.parent.clone();
        let slots = [
            (&self.pattern.subject, statement.subject),
            (&self.pattern.predicate, statement.predicate),
            (&self.pattern.object, statement.object),
        ];
        for (term, node) in slots {
            match term {
                PatternTerm::Node(expected) => {
                    if *expected != node {
                        return None;
                    }
                }
                PatternTerm::Var(var) => match row.get(var) {
                    // A variable repeated inside the pattern must match itself.
                    Some(bound) if *bound != node => return None,
                    Some(_) => {}
                    None => row.insert(var.clone(), node),
                },
            }
        }
        Some(row)
    }
}

impl IterLogic for PatternStage {
    fn name(&self) -> &'static str {
        "PatternStage"
    }

    fn has_next_binding(&mut self, _signal: &CancelSignal) -> QueryResult<bool> {
        loop {
            let Some(matches) = self.matches.as_mut() else {
                return Ok(false);
            };
            let Some(statement) = matches.next() else {
                self.matches = None;
                return Ok(false);
            };
            if let Some(row) = self.bind(statement?) {
                self.next = Some(row);
                return Ok(true);
            }
        }
    }

    fn move_to_next_binding(&mut self) -> QueryResult<Binding> {
        self.next.take().ok_or_else(|| not_ready(self.name()))
    }

    fn close_iterator(&mut self) {
        self.matches = None;
    }

    fn details(&self) -> String {
        self.pattern.to_string()
    }
}

/// Chains triple patterns: each pattern runs once per row produced by
/// the patterns before it, starting from `input`.
pub fn bgp(source: Arc<dyn GraphSource>, patterns: Vec<TriplePattern>, input: BoxIter) -> BoxIter {
    patterns.into_iter().fold(input, |acc, pattern| {
        let source = Arc::clone(&source);
        let label = pattern.to_string();
        RepeatApply::new(acc, label, move |row| {
            Ok(PatternStage::new(source.as_ref(), pattern.clone(), row)?.boxed())
        })
        .boxed()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iter::{collect_rows, explain, Plain, QueryIterator};

    fn uri(s: &str) -> Node {
        Node::uri(format!("ex:{s}"))
    }

    fn graph() -> Arc<dyn GraphSource> {
        Arc::new(MemoryGraph::new([
            Statement::new(uri("alice"), uri("knows"), uri("bob")),
            Statement::new(uri("bob"), uri("knows"), uri("carol")),
            Statement::new(uri("carol"), uri("knows"), uri("carol")),
            Statement::new(uri("alice"), uri("age"), Node::integer(30)),
        ]))
    }

    #[test]
    fn single_pattern_binds_variables() {
        let patterns = vec![TriplePattern::new(PatternTerm::var("x"), uri("knows"), PatternTerm::var("y"))];
        let rows = collect_rows(bgp(graph(), patterns, Plain::root().boxed())).unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.contains(&Binding::new().with("x", uri("alice")).with("y", uri("bob"))));
    }

    #[test]
    fn chained_patterns_join_on_shared_variables() {
        let patterns = vec![
            TriplePattern::new(PatternTerm::var("a"), uri("knows"), PatternTerm::var("b")),
            TriplePattern::new(PatternTerm::var("b"), uri("knows"), PatternTerm::var("c")),
        ];
        let rows = collect_rows(bgp(graph(), patterns, Plain::root().boxed())).unwrap();
        let expected = Binding::new()
            .with("a", uri("alice"))
            .with("b", uri("bob"))
            .with("c", uri("carol"));
        assert!(rows.contains(&expected));
        assert_eq!(rows.len(), 3);
    }

    #[test]
    fn repeated_variable_must_match_itself() {
        let patterns = vec![TriplePattern::new(PatternTerm::var("x"), uri("knows"), PatternTerm::var("x"))];
        let rows = collect_rows(bgp(graph(), patterns, Plain::root().boxed())).unwrap();
        assert_eq!(rows, vec![Binding::new().with("x", uri("carol"))]);
    }

    #[test]
    fn input_bindings_are_substituted() {
        let input = Plain::singleton(Binding::new().with("x", uri("bob"))).boxed();
        let patterns = vec![TriplePattern::new(PatternTerm::var("x"), uri("knows"), PatternTerm::var("y"))];
        let rows = collect_rows(bgp(graph(), patterns, input)).unwrap();
        assert_eq!(rows, vec![Binding::new().with("x", uri("bob")).with("y", uri("carol"))]);
    }

    #[test]
    fn explain_shows_the_chain() {
        let patterns = vec![TriplePattern::new(PatternTerm::var("x"), uri("age"), PatternTerm::var("n"))];
        let iter = bgp(graph(), patterns, Plain::root().boxed());
        let text = explain(iter.as_ref());
        assert!(text.starts_with("RepeatApply ?x <ex:age> ?n"));
        assert!(text.contains("  Plain rows=1"));
    }

    #[test]
    fn empty_pattern_list_is_the_input() {
        let mut iter = bgp(graph(), Vec::new(), Plain::root().boxed());
        assert!(iter.has_next().unwrap());
    }
}
