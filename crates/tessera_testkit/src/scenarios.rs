//! Durability and isolation scenarios.
//!
//! Each harness drives a dataset through one situation the transaction
//! manager must get right and reports what it observed, so the same
//! checks can run against memory and directory datasets.

use crate::fixtures::{ex, statement, TestDataset};
use crate::generators::{GraphOp, TxnPlan};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Barrier;
use std::thread;
use std::time::Duration;
use tessera_core::{CoreError, CoreResult, Dataset, Node, Statement, TxnType};

/// What a scenario observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioResult {
    /// Scenario name.
    pub name: &'static str,
    /// Whether the expectation held.
    pub passed: bool,
    /// Observations, in order.
    pub notes: Vec<String>,
}

impl ScenarioResult {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            passed: true,
            notes: Vec::new(),
        }
    }

    fn expect(&mut self, what: &str, expected: u64, actual: u64) {
        if expected != actual {
            self.passed = false;
        }
        self.notes.push(format!("{what}: expected {expected}, saw {actual}"));
    }

    fn require(&mut self, what: &str, ok: bool) {
        if !ok {
            self.passed = false;
        }
        self.notes.push(format!("{what}: {}", if ok { "ok" } else { "FAILED" }));
    }
}

/// Every statement visible to a fresh read transaction.
pub fn all_statements(dataset: &Dataset) -> CoreResult<BTreeSet<Statement>> {
    dataset.read(|txn| txn.find(None, None, None)?.collect())
}

/// Commits `count` single-statement transactions, then checks the
/// statements after a clean reopen and after a crash.
pub fn commit_durability(test_dataset: TestDataset, count: usize) -> CoreResult<ScenarioResult> {
    let mut result = ScenarioResult::new("commit durability");
    for i in 0..count {
        test_dataset.add_range(i..i + 1)?;
    }
    let expected = count as u64;
    result.expect("before restart", expected, test_dataset.statement_count()?);

    let test_dataset = test_dataset.reopen()?;
    result.expect("after reopen", expected, test_dataset.statement_count()?);

    test_dataset.add_range(count..count + 1)?;
    let test_dataset = test_dataset.crash()?;
    result.expect("after crash", expected + 1, test_dataset.statement_count()?);
    Ok(result)
}

/// Aborted writes, explicit or through a failing closure, leave nothing
/// behind.
pub fn abort_isolation(dataset: &Dataset) -> CoreResult<ScenarioResult> {
    let mut result = ScenarioResult::new("abort isolation");
    let before = all_statements(dataset)?;

    let txn = dataset.begin(TxnType::Write)?;
    txn.add_statement(&statement(9_000))?;
    txn.add(&ex("aborted"), &ex("p"), &Node::literal("gone"))?;
    result.expect("writer sees its own adds", before.len() as u64 + 2, txn.len()?);
    txn.abort()?;
    drop(txn);

    let failed: CoreResult<()> = dataset.write(|txn| {
        txn.add_statement(&statement(9_001))?;
        Err(CoreError::invalid_operation("scenario rollback"))
    });
    result.require("failing write reports its error", failed.is_err());

    let after = all_statements(dataset)?;
    result.require("statements unchanged", before == after);
    let node = dataset.read(|txn| txn.node_id(&ex("aborted")))?;
    result.require("aborted node not visible", node.is_none());
    Ok(result)
}

/// A reader keeps its snapshot across a concurrent commit; a reader
/// started afterwards sees the commit.
pub fn read_isolation(dataset: &Dataset) -> CoreResult<ScenarioResult> {
    let mut result = ScenarioResult::new("read isolation");
    let reader = dataset.begin(TxnType::Read)?;
    let before = reader.len()?;

    dataset.write(|txn| {
        txn.add_statement(&statement(10_000))?;
        txn.add_statement(&statement(10_001))?;
        Ok(())
    })?;

    result.expect("old reader count", before, reader.len()?);
    result.require(
        "old reader misses new statement",
        !reader.contains(&statement(10_000).subject, &statement(10_000).predicate, &statement(10_000).object)?,
    );
    let fresh = dataset.begin(TxnType::Read)?;
    result.expect("new reader count", before + 2, fresh.len()?);
    fresh.commit()?;
    reader.commit()?;
    Ok(result)
}

/// A second writer waits until the first finishes.
pub fn writer_exclusion(dataset: &Dataset) -> CoreResult<ScenarioResult> {
    let mut result = ScenarioResult::new("writer exclusion");
    let first_done = AtomicBool::new(false);
    let started = Barrier::new(2);

    let second_saw_first = thread::scope(|scope| -> CoreResult<bool> {
        let first = scope.spawn(|| -> CoreResult<()> {
            let txn = dataset.begin(TxnType::Write)?;
            started.wait();
            txn.add_statement(&statement(20_000))?;
            thread::sleep(Duration::from_millis(50));
            first_done.store(true, Ordering::SeqCst);
            txn.commit()
        });
        started.wait();
        let second = dataset.begin(TxnType::Write)?;
        let saw = first_done.load(Ordering::SeqCst);
        let present = second.contains(
            &statement(20_000).subject,
            &statement(20_000).predicate,
            &statement(20_000).object,
        )?;
        second.abort()?;
        first
            .join()
            .map_err(|_| CoreError::invalid_operation("first writer panicked"))??;
        Ok(saw && present)
    })?;
    result.require("second writer started after first committed", second_saw_first);
    Ok(result)
}

/// Runs `plans` against `dataset` and against a set model, returning
/// whether they agree after every transaction.
pub fn matches_model(dataset: &Dataset, plans: &[TxnPlan]) -> CoreResult<bool> {
    let mut model = all_statements(dataset)?;
    for plan in plans {
        let mut pending = model.clone();
        let txn = dataset.begin(TxnType::Write)?;
        for op in &plan.ops {
            match op {
                GraphOp::Add(st) => {
                    txn.add_statement(st)?;
                    pending.insert(st.clone());
                }
                GraphOp::Delete(st) => {
                    txn.delete(&st.subject, &st.predicate, &st.object)?;
                    pending.remove(st);
                }
            }
        }
        if plan.commit {
            txn.commit()?;
            model = pending;
        } else {
            txn.abort()?;
        }
        drop(txn);
        if all_statements(dataset)? != model {
            return Ok(false);
        }
    }
    Ok(true)
}
