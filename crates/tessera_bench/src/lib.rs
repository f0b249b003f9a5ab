//! Benchmark utilities.

#![warn(missing_docs)]

use rand::Rng;
use tessera_core::{Node, Statement};
use tessera_query::Binding;

/// Generate random bytes of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Generate statements over `subjects` distinct subjects with random
/// integer objects.
pub fn generate_statements(count: usize, subjects: usize) -> Vec<Statement> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|i| {
            Statement::new(
                Node::uri(format!("http://example.org/s{}", i % subjects.max(1))),
                Node::uri("http://example.org/value"),
                Node::integer(rng.gen_range(0..1_000_000)),
            )
        })
        .collect()
}

/// Generate rows binding `?k` to one of `keys` values and `?v` to a random
/// integer.
pub fn generate_rows(count: usize, keys: i64) -> Vec<Binding> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| {
            Binding::new()
                .with("k", Node::integer(rng.gen_range(0..keys.max(1))))
                .with("v", Node::integer(rng.gen_range(0..1_000_000)))
        })
        .collect()
}
