//! Property-based test generators using proptest.
//!
//! Provides strategies for generating graph terms, statements, binding
//! rows and transaction workloads.

use proptest::prelude::*;
use tessera_core::{Node, Statement};
use tessera_query::{Binding, Var};

use crate::fixtures::EX;

/// Strategy for IRIs in the example namespace.
pub fn uri_strategy() -> impl Strategy<Value = Node> {
    prop::string::string_regex("[a-z][a-z0-9]{0,11}")
        .expect("Invalid regex")
        .prop_map(|local| Node::uri(format!("{EX}{local}")))
}

/// Strategy for literals of every kind.
pub fn literal_strategy() -> impl Strategy<Value = Node> {
    prop_oneof![
        ".{0,24}".prop_map(Node::literal),
        ("[a-z ]{0,16}", "(en|de|fr)").prop_map(|(text, lang)| Node::lang_literal(text, lang)),
        any::<i64>().prop_map(Node::integer),
        (-1.0e6f64..1.0e6).prop_map(Node::double),
    ]
}

/// Strategy for any node: IRIs, blank nodes and literals.
pub fn node_strategy() -> impl Strategy<Value = Node> {
    prop_oneof![
        3 => uri_strategy(),
        1 => "b[0-9]{1,4}".prop_map(Node::blank),
        2 => literal_strategy(),
    ]
}

/// Strategy for statements with IRI subjects and predicates.
pub fn statement_strategy() -> impl Strategy<Value = Statement> {
    (uri_strategy(), uri_strategy(), node_strategy())
        .prop_map(|(s, p, o)| Statement::new(s, p, o))
}

/// Strategy for rows over `vars`, each variable bound with probability
/// one half to a small integer.
pub fn binding_strategy(vars: &'static [&'static str]) -> impl Strategy<Value = Binding> {
    prop::collection::vec(prop::option::of(-5i64..5), vars.len()).prop_map(move |values| {
        let mut row = Binding::new();
        for (name, value) in vars.iter().zip(values) {
            if let Some(v) = value {
                row.insert(Var::new(name), Node::integer(v));
            }
        }
        row
    })
}

/// Strategy for a list of rows.
pub fn rows_strategy(vars: &'static [&'static str], max: usize) -> impl Strategy<Value = Vec<Binding>> {
    prop::collection::vec(binding_strategy(vars), 0..max)
}

/// One operation of a write transaction.
#[derive(Debug, Clone)]
pub enum GraphOp {
    /// Add a statement.
    Add(Statement),
    /// Delete a statement.
    Delete(Statement),
}

/// A transaction: its operations and whether it commits.
#[derive(Debug, Clone)]
pub struct TxnPlan {
    /// Operations in order.
    pub ops: Vec<GraphOp>,
    /// True to commit, false to abort.
    pub commit: bool,
}

/// Strategy for transactions over a small statement pool, so that
/// deletes often hit earlier adds.
pub fn txn_plan_strategy(max_ops: usize) -> impl Strategy<Value = TxnPlan> {
    let pool = prop::collection::vec(statement_strategy(), 1..8);
    (pool, any::<bool>())
        .prop_flat_map(move |(pool, commit)| {
            let len = pool.len();
            let op = (any::<bool>(), 0..len).prop_map({
                let pool = pool.clone();
                move |(add, i)| {
                    if add {
                        GraphOp::Add(pool[i].clone())
                    } else {
                        GraphOp::Delete(pool[i].clone())
                    }
                }
            });
            (prop::collection::vec(op, 0..max_ops), Just(commit))
        })
        .prop_map(|(ops, commit)| TxnPlan { ops, commit })
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn test_nodes_survive_encoding(node in node_strategy()) {
            let decoded = Node::decode(&node.encode()).unwrap();
            prop_assert_eq!(decoded, node);
        }

        #[test]
        fn test_bindings_only_use_listed_vars(row in binding_strategy(&["a", "b"])) {
            prop_assert!(row.vars().all(|v| v.name() == "a" || v.name() == "b"));
        }

        #[test]
        fn test_plans_stay_within_bounds(plan in txn_plan_strategy(6)) {
            prop_assert!(plan.ops.len() < 6);
        }
    }
}
