//! Crash recovery testing for Tessera.
//!
//! This module provides utilities for testing crash recovery behavior.
//! Crashes are simulated by copying a dataset's files at a chosen moment
//! and opening a new dataset on the copy, and faults are injected into
//! the journal through [`CrashableBackend`].
//!
//! ## Test Strategy
//!
//! 1. **Crash after commit** - committed but unflushed transactions are replayed
//! 2. **Crash during journal write** - a torn transaction is dropped whole
//! 3. **Sync failure** - the commit is reported as not committed and leaves no trace
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tessera_testkit::crash::CrashRecoveryHarness;
//!
//! let mut harness = CrashRecoveryHarness::new();
//! assert!(harness.test_torn_commit_discarded().passed);
//! ```

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tessera_core::{Config, CoreError, CoreResult, Dataset, Location, MemoryFiles, JOURNAL_FILE};
use tessera_storage::{InMemoryBackend, StorageBackend, StorageError, StorageResult};
use tracing::debug;

use crate::fixtures::statement;

/// Copies every file of an in-memory location.
///
/// The copy shares nothing with `files`, so it keeps the exact bytes of
/// this moment whatever the original dataset does next.
pub fn snapshot(files: &MemoryFiles) -> MemoryFiles {
    let image = MemoryFiles::default();
    for name in files.names() {
        image.file(&name).set_data(files.file(&name).data());
    }
    image
}

/// Points at which a crash can be simulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashPoint {
    /// After commit markers reached the journal, before the flush to base.
    AfterCommitBeforeFlush,
    /// Part way through writing a transaction's journal entries.
    DuringJournalWrite,
    /// When the commit marker is synced.
    DuringCommitSync,
}

/// Shared controls of a [`CrashableBackend`].
#[derive(Debug, Default)]
pub struct CrashSwitch {
    crash_after_bytes: AtomicU64,
    armed: AtomicBool,
    bytes_written: AtomicU64,
    crashed: AtomicBool,
    fail_on_sync: AtomicBool,
}

impl CrashSwitch {
    /// Crashes once `bytes` more bytes have been written. The write that
    /// crosses the limit is written partially.
    pub fn crash_after(&self, bytes: u64) {
        let written = self.bytes_written.load(Ordering::SeqCst);
        self.crash_after_bytes.store(written + bytes, Ordering::SeqCst);
        self.armed.store(true, Ordering::SeqCst);
    }

    /// Makes `sync` fail without crashing.
    pub fn set_fail_on_sync(&self, fail: bool) {
        self.fail_on_sync.store(fail, Ordering::SeqCst);
    }

    /// Clears every fault.
    pub fn reset(&self) {
        self.armed.store(false, Ordering::SeqCst);
        self.crashed.store(false, Ordering::SeqCst);
        self.fail_on_sync.store(false, Ordering::SeqCst);
    }

    /// Whether a crash happened.
    pub fn has_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    /// Bytes written through the backend so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::SeqCst)
    }
}

fn simulated(what: &str) -> StorageError {
    StorageError::Io(io::Error::other(format!("simulated {what}")))
}

/// A storage backend wrapper that can simulate crashes.
///
/// After a crash every mutating call fails, as if the process were gone;
/// reads still work so the damage can be inspected.
pub struct CrashableBackend {
    inner: Box<dyn StorageBackend>,
    switch: Arc<CrashSwitch>,
}

impl CrashableBackend {
    /// Wraps `inner`.
    pub fn new(inner: Box<dyn StorageBackend>) -> Self {
        Self {
            inner,
            switch: Arc::new(CrashSwitch::default()),
        }
    }

    /// The switch controlling this backend.
    pub fn switch(&self) -> Arc<CrashSwitch> {
        Arc::clone(&self.switch)
    }

    fn check_alive(&self, what: &str) -> StorageResult<()> {
        if self.switch.has_crashed() {
            return Err(simulated(&format!("{what} after crash")));
        }
        Ok(())
    }

    /// How many of `len` bytes may be written before the crash point.
    fn allowance(&self, len: usize) -> Option<usize> {
        if !self.switch.armed.load(Ordering::SeqCst) {
            return None;
        }
        let written = self.switch.bytes_written.load(Ordering::SeqCst);
        let limit = self.switch.crash_after_bytes.load(Ordering::SeqCst);
        let room = limit.saturating_sub(written);
        (room < len as u64).then_some(room as usize)
    }

    fn crash(&self, partial: usize) -> StorageError {
        self.switch.crashed.store(true, Ordering::SeqCst);
        self.switch.bytes_written.fetch_add(partial as u64, Ordering::SeqCst);
        debug!(partial, "simulated crash");
        simulated("crash during write")
    }
}

impl StorageBackend for CrashableBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        self.check_alive("append")?;
        if let Some(partial) = self.allowance(data.len()) {
            if partial > 0 {
                self.inner.append(&data[..partial])?;
            }
            return Err(self.crash(partial));
        }
        let offset = self.inner.append(data)?;
        self.switch.bytes_written.fetch_add(data.len() as u64, Ordering::SeqCst);
        Ok(offset)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        self.check_alive("write")?;
        if let Some(partial) = self.allowance(data.len()) {
            if partial > 0 {
                self.inner.write_at(offset, &data[..partial])?;
            }
            return Err(self.crash(partial));
        }
        self.inner.write_at(offset, data)?;
        self.switch.bytes_written.fetch_add(data.len() as u64, Ordering::SeqCst);
        Ok(())
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.check_alive("flush")?;
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.check_alive("sync")?;
        if self.switch.fail_on_sync.load(Ordering::SeqCst) {
            return Err(simulated("sync failure"));
        }
        self.inner.sync()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.check_alive("truncate")?;
        self.inner.truncate(new_size)
    }
}

/// Opens an in-memory dataset whose journal goes through a
/// [`CrashableBackend`].
pub fn crashable_dataset(files: &MemoryFiles, config: Config) -> CoreResult<(Dataset, Arc<CrashSwitch>)> {
    let journal: InMemoryBackend = files.file(JOURNAL_FILE);
    let backend = CrashableBackend::new(Box::new(journal));
    let switch = backend.switch();
    let dataset = Dataset::open_with_journal(&Location::Memory(files.clone()), config, Box::new(backend))?;
    Ok((dataset, switch))
}

/// Result of a crash recovery test.
#[derive(Debug, Clone)]
pub struct CrashRecoveryResult {
    /// Whether the test passed.
    pub passed: bool,
    /// Description of what was tested.
    pub description: String,
    /// Where the crash was simulated.
    pub point: CrashPoint,
    /// Expected statements after recovery.
    pub expected_statements: u64,
    /// Actual statements after recovery.
    pub actual_statements: u64,
    /// Any error message.
    pub error: Option<String>,
}

impl CrashRecoveryResult {
    fn check(description: &str, point: CrashPoint, expected: u64, actual: u64) -> Self {
        Self {
            passed: expected == actual,
            description: description.to_string(),
            point,
            expected_statements: expected,
            actual_statements: actual,
            error: (expected != actual).then(|| "statement count differs after recovery".to_string()),
        }
    }

    fn failed(description: &str, point: CrashPoint, expected: u64, error: &CoreError) -> Self {
        Self {
            passed: false,
            description: description.to_string(),
            point,
            expected_statements: expected,
            actual_statements: 0,
            error: Some(error.to_string()),
        }
    }
}

fn write_range(dataset: &Dataset, range: std::ops::Range<usize>) -> CoreResult<()> {
    dataset.write(|txn| {
        for i in range {
            txn.add_statement(&statement(i))?;
        }
        Ok(())
    })
}

fn recovered_count(files: &MemoryFiles) -> CoreResult<(u64, usize)> {
    let dataset = Dataset::open_location(&Location::Memory(snapshot(files)), Config::default())?;
    let count = dataset.read(|txn| txn.len())?;
    let transactions = dataset.recovery().transactions;
    dataset.close()?;
    Ok((count, transactions))
}

/// Test harness for crash recovery scenarios.
#[derive(Debug, Default)]
pub struct CrashRecoveryHarness {
    /// Results of crash recovery tests.
    pub results: Vec<CrashRecoveryResult>,
}

impl CrashRecoveryHarness {
    /// Creates a new crash recovery harness.
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&mut self, result: CrashRecoveryResult) -> CrashRecoveryResult {
        self.results.push(result.clone());
        result
    }

    /// Commits that are still queued when the process dies are replayed
    /// from the journal.
    pub fn test_queued_commits_survive(&mut self) -> CrashRecoveryResult {
        let description = "Queued commits survive a crash";
        let point = CrashPoint::AfterCommitBeforeFlush;
        let result = (|| {
            let files = MemoryFiles::default();
            let (dataset, _switch) = crashable_dataset(&files, Config::default().queue_batch_size(100))?;
            write_range(&dataset, 0..5)?;
            write_range(&dataset, 5..8)?;
            let image = snapshot(&files);
            drop(dataset);
            let (count, transactions) = recovered_count(&image)?;
            let mut result = CrashRecoveryResult::check(description, point, 8, count);
            if transactions != 2 {
                result.passed = false;
                result.error = Some(format!("replayed {transactions} transactions, expected 2"));
            }
            Ok(result)
        })();
        let result = result.unwrap_or_else(|e: CoreError| CrashRecoveryResult::failed(description, point, 8, &e));
        self.record(result)
    }

    /// A transaction torn part way through its journal entries is
    /// dropped whole; the transactions before it survive.
    pub fn test_torn_commit_discarded(&mut self) -> CrashRecoveryResult {
        let description = "Torn transaction is discarded";
        let point = CrashPoint::DuringJournalWrite;
        let result = (|| {
            let files = MemoryFiles::default();
            let (dataset, switch) = crashable_dataset(&files, Config::default().queue_batch_size(100))?;
            write_range(&dataset, 0..4)?;
            switch.crash_after(24);
            let torn = write_range(&dataset, 4..20);
            if torn.is_ok() || !switch.has_crashed() {
                return Ok(CrashRecoveryResult {
                    passed: false,
                    description: description.to_string(),
                    point,
                    expected_statements: 4,
                    actual_statements: 0,
                    error: Some("write did not hit the crash point".to_string()),
                });
            }
            let image = snapshot(&files);
            std::mem::forget(dataset);
            let (count, _) = recovered_count(&image)?;
            Ok(CrashRecoveryResult::check(description, point, 4, count))
        })();
        let result = result.unwrap_or_else(|e: CoreError| CrashRecoveryResult::failed(description, point, 4, &e));
        self.record(result)
    }

    /// A commit whose marker cannot be synced is reported as not
    /// committed and is gone after a restart.
    pub fn test_failed_sync_not_committed(&mut self) -> CrashRecoveryResult {
        let description = "Failed commit sync leaves no trace";
        let point = CrashPoint::DuringCommitSync;
        let result = (|| {
            let files = MemoryFiles::default();
            let (dataset, switch) = crashable_dataset(&files, Config::default().sync_on_commit(true))?;
            write_range(&dataset, 0..3)?;
            switch.set_fail_on_sync(true);
            let failed = write_range(&dataset, 3..6);
            switch.reset();
            if !matches!(failed, Err(CoreError::TransactionNotCommitted { .. })) {
                return Ok(CrashRecoveryResult {
                    passed: false,
                    description: description.to_string(),
                    point,
                    expected_statements: 3,
                    actual_statements: 0,
                    error: Some(format!("expected a not-committed error, got {failed:?}")),
                });
            }
            let live = dataset.read(|txn| txn.len())?;
            let image = snapshot(&files);
            dataset.close()?;
            let (count, _) = recovered_count(&image)?;
            let mut result = CrashRecoveryResult::check(description, point, 3, count);
            if live != 3 {
                result.passed = false;
                result.error = Some(format!("live dataset saw {live} statements"));
            }
            Ok(result)
        })();
        let result = result.unwrap_or_else(|e: CoreError| CrashRecoveryResult::failed(description, point, 3, &e));
        self.record(result)
    }

    /// Runs every scenario.
    pub fn run_all(&mut self) -> &[CrashRecoveryResult] {
        self.test_queued_commits_survive();
        self.test_torn_commit_discarded();
        self.test_failed_sync_not_committed();
        &self.results
    }

    /// Whether every recorded scenario passed.
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }
}
