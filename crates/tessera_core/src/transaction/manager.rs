//! Transaction manager.

use super::state::{NonExclusive, Transaction, WriterPermit};
use crate::block::BlockMgr;
use crate::channel::BufferChannel;
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::journal::{Journal, JournalControl, JournalEntryType};
use crate::store::{BaseStore, StorageView};
use crate::types::{FileRef, ReadWrite, TxnId, TxnState, TxnType};
use parking_lot::lock_api::ArcRwLockWriteGuard;
use parking_lot::{Mutex, RawRwLock, RwLock};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

type ExclusiveGuard = ArcRwLockWriteGuard<RawRwLock, ()>;

/// Snapshot of the manager's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxnManagerStats {
    /// Writer commits so far.
    pub version: u64,
    /// Readers currently open.
    pub active_readers: u64,
    /// Writers currently open (zero or one).
    pub active_writers: u64,
    /// Readers that have finished.
    pub finished_readers: u64,
    /// Writers that committed.
    pub committed_writers: u64,
    /// Writers that aborted.
    pub aborted_writers: u64,
    /// Committed writers waiting to be flushed to the base.
    pub queue_length: usize,
    /// Longest the flush queue has been.
    pub max_queue_length: usize,
}

#[derive(Default)]
struct ManagerState {
    queue: VecDeque<Arc<Transaction>>,
    reader_view: Option<StorageView>,
    max_queue: usize,
    blocked_writers: Option<WriterPermit>,
    exclusive: Option<ExclusiveGuard>,
    closed: bool,
}

/// Coordinates transactions over one dataset.
///
/// - One writer at a time, admitted by a permit that `begin(Write)` waits on
/// - Any number of readers, never blocked by the writer
/// - Committed writers are applied to the base only at quiescence, when no
///   transaction is open; until then they wait in a FIFO queue and new
///   transactions read through the newest queued writer's view
///
/// # Thread Safety
///
/// Transactions may be used from any thread. A thread must not wait for
/// exclusive mode while it still has a transaction of its own open.
pub struct TransactionManager {
    config: Config,
    store: Arc<BaseStore>,
    journal: Arc<Journal>,
    state: Mutex<ManagerState>,
    writer_permit: Arc<Mutex<()>>,
    exclusivity: Arc<RwLock<()>>,
    version: AtomicU64,
    next_id: AtomicU64,
    active_readers: AtomicU64,
    active_writers: AtomicU64,
    finished_readers: AtomicU64,
    committed_writers: AtomicU64,
    aborted_writers: AtomicU64,
}

fn decrement(counter: &AtomicU64) {
    let _ = counter.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
}

impl TransactionManager {
    /// Creates a manager over recovered base storage.
    pub fn new(config: Config, store: Arc<BaseStore>, journal: Arc<Journal>) -> Self {
        Self {
            config,
            store,
            journal,
            state: Mutex::new(ManagerState::default()),
            writer_permit: Arc::new(Mutex::new(())),
            exclusivity: Arc::new(RwLock::new(())),
            version: AtomicU64::new(0),
            next_id: AtomicU64::new(1),
            active_readers: AtomicU64::new(0),
            active_writers: AtomicU64::new(0),
            finished_readers: AtomicU64::new(0),
            committed_writers: AtomicU64::new(0),
            aborted_writers: AtomicU64::new(0),
        }
    }

    /// The journal.
    #[must_use]
    pub fn journal(&self) -> &Arc<Journal> {
        &self.journal
    }

    /// The base storage.
    #[must_use]
    pub fn store(&self) -> &Arc<BaseStore> {
        &self.store
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Number of writer commits so far.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Begins a transaction.
    ///
    /// A writer waits here until the writer permit is free. Every
    /// transaction waits while exclusive mode is held.
    ///
    /// # Errors
    ///
    /// Fails if the manager is closed or the view cannot be built.
    pub fn begin(&self, txn_type: TxnType) -> CoreResult<Arc<Transaction>> {
        if self.state.lock().closed {
            return Err(CoreError::DatasetClosed);
        }
        let non_exclusive = self.exclusivity.read_arc();
        let permit = match txn_type.mode() {
            ReadWrite::Write => Some(self.writer_permit.lock_arc()),
            ReadWrite::Read => None,
        };
        self.begin_with_guards(txn_type, txn_type.mode(), permit, non_exclusive)
    }

    fn begin_with_guards(
        &self,
        txn_type: TxnType,
        mode: ReadWrite,
        permit: Option<WriterPermit>,
        non_exclusive: NonExclusive,
    ) -> CoreResult<Arc<Transaction>> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(CoreError::DatasetClosed);
        }
        let id = TxnId::new(self.next_id.fetch_add(1, Ordering::AcqRel));
        let version = self.version();

        let txn = match mode {
            ReadWrite::Read => {
                let view = match &state.reader_view {
                    Some(view) => view.clone(),
                    None => {
                        let (blocks, channel) = self.base_for(&state);
                        let view = self.store.reader_view(blocks, channel)?;
                        state.reader_view = Some(view.clone());
                        view
                    }
                };
                let txn = Transaction::new(id, txn_type, mode, version, view, Vec::new(), None, Some(non_exclusive));
                self.active_readers.fetch_add(1, Ordering::AcqRel);
                Arc::new(txn)
            }
            ReadWrite::Write => {
                let (blocks, channel) = self.base_for(&state);
                let writer = self.store.writer_view(blocks, channel, &self.journal)?;
                let txn = Transaction::new(
                    id,
                    txn_type,
                    mode,
                    version,
                    writer.view,
                    writer.components,
                    permit,
                    Some(non_exclusive),
                );
                if let Err(e) = txn.begin_components() {
                    txn.abort_components();
                    txn.set_state(TxnState::Aborted);
                    return Err(e);
                }
                self.active_writers.fetch_add(1, Ordering::AcqRel);
                Arc::new(txn)
            }
        };
        debug!(txn = %id, mode = %mode, version, queued = state.queue.len(), "transaction begun");
        Ok(txn)
    }

    /// Base for a new view: the newest queued writer, or the base files.
    fn base_for(&self, state: &ManagerState) -> (Arc<dyn BlockMgr>, Arc<dyn BufferChannel>) {
        match state.queue.back() {
            Some(last) => (
                Arc::clone(last.view().blocks()),
                Arc::clone(last.view().state()),
            ),
            None => (self.store.blocks(), self.store.state()),
        }
    }

    /// Commits a transaction. For a reader this just ends it.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidOperation`] if the transaction is not active
    /// - [`CoreError::TransactionNotCommitted`] if prepare or the commit
    ///   record failed; the transaction has been aborted
    /// - [`CoreError::CommittedWithError`] if the commit is durable but a
    ///   later step failed; do not retry
    pub fn commit(&self, txn: &Arc<Transaction>) -> CoreResult<()> {
        match txn.state() {
            TxnState::Active => {}
            TxnState::Committed => {
                return Err(CoreError::invalid_operation(format!(
                    "{} is already committed",
                    txn.id()
                )))
            }
            state => {
                return Err(CoreError::invalid_operation(format!(
                    "cannot commit {}: it is {state}",
                    txn.id()
                )))
            }
        }
        if !txn.is_write() {
            return self.finish_reader(txn, TxnState::Committed);
        }

        txn.set_state(TxnState::Preparing);
        txn.cancel_iterators("commit");
        let prepared = self
            .journal
            .size()
            .and_then(|start| {
                txn.set_journal_start(start);
                txn.prepare()
            })
            .and_then(|()| self.write_commit_marker());
        if let Err(e) = prepared {
            self.abort_writer(txn);
            return Err(CoreError::not_committed(txn.id(), e));
        }

        // Durable from here on.
        txn.set_state(TxnState::Committed);
        info!(txn = %txn.id(), "transaction committed");
        let result = self.notify_commit(txn);
        txn.release_guards();
        result.map_err(|e| CoreError::committed_with_error(txn.id(), e))?;
        self.flush_if_over_threshold()
            .map_err(|e| CoreError::committed_with_error(txn.id(), e))
    }

    fn write_commit_marker(&self) -> CoreResult<()> {
        self.journal.write(JournalEntryType::Commit, FileRef::NONE, None)?;
        if self.config.sync_on_commit {
            self.journal.sync()
        } else {
            self.journal.flush()
        }
    }

    fn notify_commit(&self, txn: &Arc<Transaction>) -> CoreResult<()> {
        let mut state = self.state.lock();
        self.version.fetch_add(1, Ordering::AcqRel);
        decrement(&self.active_writers);
        self.committed_writers.fetch_add(1, Ordering::AcqRel);
        state.reader_view = None;
        state.queue.push_back(Arc::clone(txn));
        state.max_queue = state.max_queue.max(state.queue.len());

        if self.active_readers.load(Ordering::Acquire) == 0 && self.should_flush(&state) {
            self.flush_queue(&mut state)?;
        } else {
            debug!(txn = %txn.id(), queued = state.queue.len(), "commit queued for flush");
        }
        Ok(())
    }

    fn should_flush(&self, state: &ManagerState) -> bool {
        let batch = self.config.queue_batch_size;
        if batch == 0 || state.queue.len() >= batch {
            return true;
        }
        match self.config.journal_threshold_size {
            Some(limit) => matches!(self.journal.size(), Ok(size) if size >= limit),
            None => false,
        }
    }

    /// Enacts every queued writer and replays the journal into the base.
    ///
    /// Does nothing unless no transaction is open. The queue is only
    /// cleared once replay has succeeded; until then the queued views are
    /// the only place new transactions can see those commits.
    fn flush_queue(&self, state: &mut ManagerState) -> CoreResult<bool> {
        if self.active_readers.load(Ordering::Acquire) > 0
            || self.active_writers.load(Ordering::Acquire) > 0
            || state.queue.is_empty()
        {
            return Ok(false);
        }
        let summary = match JournalControl::replay(&self.journal, self.store.routing()) {
            Ok(summary) => summary,
            Err(e) => {
                error!(queued = state.queue.len(), error = %e, "journal replay failed; commits stay queued");
                return Err(e);
            }
        };

        let flushed = state.queue.len();
        state.reader_view = None;
        let mut first_error = None;
        for txn in state.queue.drain(..) {
            if let Err(e) = txn.enact() {
                error!(txn = %txn.id(), error = %e, "enact after replay failed");
                first_error.get_or_insert(e);
            }
        }
        debug!(transactions = flushed, entries = summary.entries, "flushed committed transactions to base");
        match first_error {
            Some(e) => Err(e),
            None => Ok(true),
        }
    }

    fn flush_if_over_threshold(&self) -> CoreResult<()> {
        let queued = self.state.lock().queue.len();
        match self.config.max_queue_threshold {
            Some(max) if queued > max => {
                warn!(queued, max, "flush queue over threshold; waiting for exclusive access");
                let _exclusive = self.exclusivity.write_arc();
                let mut state = self.state.lock();
                self.flush_queue(&mut state)?;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn finish_reader(&self, txn: &Transaction, end: TxnState) -> CoreResult<()> {
        txn.cancel_iterators("end of read");
        txn.set_state(end);
        let result = {
            let mut state = self.state.lock();
            decrement(&self.active_readers);
            self.finished_readers.fetch_add(1, Ordering::AcqRel);
            if self.should_flush(&state) {
                self.flush_queue(&mut state).map(|_| ())
            } else {
                Ok(())
            }
        };
        txn.release_guards();
        debug!(txn = %txn.id(), "read transaction finished");
        result
    }

    fn abort_writer(&self, txn: &Transaction) {
        txn.cancel_iterators("abort");
        let failures = txn.abort_components();
        if let Some(start) = txn.journal_start() {
            if let Err(e) = self.journal.truncate(start) {
                error!(txn = %txn.id(), error = %e, "could not truncate prepared journal entries");
            }
        }
        txn.set_state(TxnState::Aborted);
        {
            let mut state = self.state.lock();
            decrement(&self.active_writers);
            self.aborted_writers.fetch_add(1, Ordering::AcqRel);
            if self.should_flush(&state) {
                if let Err(e) = self.flush_queue(&mut state) {
                    error!(error = %e, "flush after abort failed");
                }
            }
        }
        txn.release_guards();
        info!(txn = %txn.id(), failures, "transaction aborted");
    }

    /// Aborts a transaction. Aborting an aborted transaction does nothing.
    ///
    /// # Errors
    ///
    /// Fails for a committed or closed transaction.
    pub fn abort(&self, txn: &Arc<Transaction>) -> CoreResult<()> {
        match txn.state() {
            TxnState::Active | TxnState::Preparing => {}
            TxnState::Aborted => return Ok(()),
            state => {
                return Err(CoreError::invalid_operation(format!(
                    "cannot abort {}: it is {state}",
                    txn.id()
                )))
            }
        }
        if txn.is_write() {
            self.abort_writer(txn);
            Ok(())
        } else {
            self.finish_reader(txn, TxnState::Aborted)
        }
    }

    /// Ends a transaction.
    ///
    /// An active reader is finished. An active writer is aborted, with a
    /// warning, since it should have been committed or aborted.
    pub fn close(&self, txn: &Arc<Transaction>) -> CoreResult<()> {
        let result = match txn.state() {
            TxnState::Active if txn.is_write() => {
                warn!(txn = %txn.id(), "write transaction closed while active; aborting");
                self.abort_writer(txn);
                Ok(())
            }
            TxnState::Active => self.finish_reader(txn, TxnState::Closed),
            TxnState::Preparing => {
                warn!(txn = %txn.id(), "close during commit ignored");
                return Ok(());
            }
            _ => Ok(()),
        };
        txn.set_state(TxnState::Closed);
        result
    }

    /// Turns a promotable reader into a writer.
    ///
    /// Waits for the writer permit. Returns `None` for a
    /// [`TxnType::ReadPromote`] transaction when a writer committed since it
    /// began; the reader stays open. On success the reader is closed and
    /// the returned writer sees the latest committed state.
    ///
    /// # Errors
    ///
    /// Promoting a plain [`TxnType::Read`] transaction is a usage error and
    /// ends the reader.
    pub fn promote(&self, txn: &Arc<Transaction>) -> CoreResult<Option<Arc<Transaction>>> {
        txn.check_active()?;
        if txn.is_write() {
            return Ok(Some(Arc::clone(txn)));
        }
        match txn.txn_type() {
            TxnType::ReadPromote | TxnType::ReadCommittedPromote => {}
            TxnType::Read | TxnType::Write => {
                self.finish_reader(txn, TxnState::Aborted)?;
                return Err(CoreError::invalid_operation(format!(
                    "{} was begun as READ and cannot be promoted",
                    txn.id()
                )));
            }
        }

        let permit = self.writer_permit.lock_arc();
        if txn.txn_type() == TxnType::ReadPromote && self.version() != txn.version() {
            debug!(txn = %txn.id(), began = txn.version(), now = self.version(), "promotion refused");
            return Ok(None);
        }
        let non_exclusive = txn.take_non_exclusive();
        self.finish_reader(txn, TxnState::Closed)?;
        let non_exclusive = match non_exclusive {
            Some(guard) => guard,
            None => self.exclusivity.read_arc(),
        };
        let promoted = self.begin_with_guards(txn.txn_type(), ReadWrite::Write, Some(permit), non_exclusive)?;
        info!(from = %txn.id(), to = %promoted.id(), "transaction promoted");
        Ok(Some(promoted))
    }

    /// Takes the writer permit so no writer can begin. Waits for an
    /// active writer to finish.
    pub fn block_writers(&self) -> CoreResult<()> {
        if self.state.lock().blocked_writers.is_some() {
            return Err(CoreError::invalid_operation("writers are already blocked"));
        }
        let permit = self.writer_permit.lock_arc();
        self.state.lock().blocked_writers = Some(permit);
        debug!("writers blocked");
        Ok(())
    }

    /// Like [`Self::block_writers`] but returns false instead of waiting.
    pub fn try_block_writers(&self) -> CoreResult<bool> {
        let mut state = self.state.lock();
        if state.blocked_writers.is_some() {
            return Err(CoreError::invalid_operation("writers are already blocked"));
        }
        match self.writer_permit.try_lock_arc() {
            Some(permit) => {
                state.blocked_writers = Some(permit);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Releases a block taken by [`Self::block_writers`].
    pub fn enable_writers(&self) -> CoreResult<()> {
        match self.state.lock().blocked_writers.take() {
            Some(_) => {
                debug!("writers enabled");
                Ok(())
            }
            None => Err(CoreError::invalid_operation("writers are not blocked")),
        }
    }

    /// Waits until no transaction is open, then holds off new ones and
    /// flushes the queue.
    pub fn start_exclusive_mode(&self) -> CoreResult<()> {
        if self.state.lock().exclusive.is_some() {
            return Err(CoreError::invalid_operation("already in exclusive mode"));
        }
        let guard = self.exclusivity.write_arc();
        let mut state = self.state.lock();
        self.flush_queue(&mut state)?;
        state.exclusive = Some(guard);
        info!("exclusive mode started");
        Ok(())
    }

    /// Like [`Self::start_exclusive_mode`] but returns false instead of waiting.
    pub fn try_exclusive_mode(&self) -> CoreResult<bool> {
        let Some(guard) = self.exclusivity.try_write_arc() else {
            return Ok(false);
        };
        let mut state = self.state.lock();
        self.flush_queue(&mut state)?;
        state.exclusive = Some(guard);
        info!("exclusive mode started");
        Ok(true)
    }

    /// Leaves exclusive mode.
    pub fn finish_exclusive_mode(&self) -> CoreResult<()> {
        match self.state.lock().exclusive.take() {
            Some(_) => {
                info!("exclusive mode finished");
                Ok(())
            }
            None => Err(CoreError::invalid_operation("not in exclusive mode")),
        }
    }

    /// Flushes queued commits if no transaction is open.
    ///
    /// Returns whether anything was flushed.
    pub fn flush(&self) -> CoreResult<bool> {
        let mut state = self.state.lock();
        self.flush_queue(&mut state)
    }

    /// Flushes what can be flushed, syncs everything and refuses new
    /// transactions.
    pub fn closedown(&self) -> CoreResult<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Ok(());
        }
        self.flush_queue(&mut state)?;
        if !state.queue.is_empty() {
            warn!(
                queued = state.queue.len(),
                "closing with open transactions; queued commits stay in the journal"
            );
        }
        self.journal.sync()?;
        self.store.sync_all()?;
        state.reader_view = None;
        state.closed = true;
        info!(version = self.version(), "transaction manager closed");
        Ok(())
    }

    /// True after [`Self::closedown`].
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> TxnManagerStats {
        let state = self.state.lock();
        TxnManagerStats {
            version: self.version(),
            active_readers: self.active_readers.load(Ordering::Acquire),
            active_writers: self.active_writers.load(Ordering::Acquire),
            finished_readers: self.finished_readers.load(Ordering::Acquire),
            committed_writers: self.committed_writers.load(Ordering::Acquire),
            aborted_writers: self.aborted_writers.load(Ordering::Acquire),
            queue_length: state.queue.len(),
            max_queue_length: state.max_queue,
        }
    }
}

impl fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionManager")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::{Location, MemoryFiles, JOURNAL_FILE};
    use crate::node::{Node, NodeTable};
    use crate::store::Triple;
    use std::sync::atomic::AtomicBool;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    fn manager(config: Config) -> Arc<TransactionManager> {
        let attached = Location::memory().attach(true).unwrap();
        let store = Arc::new(BaseStore::open(&attached, &config).unwrap());
        let journal = Arc::new(Journal::new(attached.open_backend(JOURNAL_FILE).unwrap()));
        Arc::new(TransactionManager::new(config, store, journal))
    }

    fn add(txn: &Transaction, s: &str) -> Triple {
        let nodes = txn.view().nodes();
        let triple = Triple::new(
            nodes.get_allocate_node_id(&Node::uri(s)).unwrap(),
            nodes.get_allocate_node_id(&Node::uri("ex:p")).unwrap(),
            nodes.get_allocate_node_id(&Node::literal("o")).unwrap(),
        );
        txn.view().triples().add(triple).unwrap();
        triple
    }

    fn count(txn: &Transaction) -> u64 {
        txn.view().triples().len()
    }

    #[test]
    fn committed_writes_are_visible_to_new_readers() {
        let tm = manager(Config::default());
        let w = tm.begin(TxnType::Write).unwrap();
        add(&w, "ex:a");
        tm.commit(&w).unwrap();

        let r = tm.begin(TxnType::Read).unwrap();
        assert_eq!(count(&r), 1);
        tm.close(&r).unwrap();
        assert_eq!(tm.stats().committed_writers, 1);
    }

    #[test]
    fn readers_keep_their_snapshot() {
        let tm = manager(Config::default().queue_batch_size(0));
        let before = tm.begin(TxnType::Read).unwrap();

        let w = tm.begin(TxnType::Write).unwrap();
        add(&w, "ex:a");
        tm.commit(&w).unwrap();

        // The open reader forces the commit onto the queue.
        assert_eq!(tm.stats().queue_length, 1);
        assert_eq!(count(&before), 0);
        assert_eq!(before.view().triples().iter().count(), 0);

        let after = tm.begin(TxnType::Read).unwrap();
        assert_eq!(count(&after), 1);

        tm.close(&before).unwrap();
        assert_eq!(tm.stats().queue_length, 1);
        tm.close(&after).unwrap();
        assert_eq!(tm.stats().queue_length, 0);
        assert!(tm.journal().is_empty().unwrap());
    }

    #[test]
    fn batched_commits_stay_queued_until_batch_fills() {
        let tm = manager(Config::default().queue_batch_size(3));
        for name in ["ex:a", "ex:b"] {
            let w = tm.begin(TxnType::Write).unwrap();
            add(&w, name);
            tm.commit(&w).unwrap();
        }
        assert_eq!(tm.stats().queue_length, 2);
        assert!(!tm.journal().is_empty().unwrap());

        let w = tm.begin(TxnType::Write).unwrap();
        assert_eq!(count(&w), 2);
        add(&w, "ex:c");
        tm.commit(&w).unwrap();
        assert_eq!(tm.stats().queue_length, 0);
        assert!(tm.journal().is_empty().unwrap());

        let r = tm.begin(TxnType::Read).unwrap();
        assert_eq!(count(&r), 3);
    }

    #[test]
    fn abort_leaves_base_untouched() {
        let tm = manager(Config::default().queue_batch_size(0));
        let w = tm.begin(TxnType::Write).unwrap();
        add(&w, "ex:a");
        tm.abort(&w).unwrap();
        tm.abort(&w).unwrap();

        assert!(tm.journal().is_empty().unwrap());
        assert!(tm.store().nodes().is_empty());
        let r = tm.begin(TxnType::Read).unwrap();
        assert_eq!(count(&r), 0);
        assert_eq!(tm.stats().aborted_writers, 1);
    }

    #[test]
    fn usage_errors() {
        let tm = manager(Config::default());
        let w = tm.begin(TxnType::Write).unwrap();
        tm.commit(&w).unwrap();
        assert!(matches!(tm.commit(&w), Err(CoreError::InvalidOperation { .. })));
        assert!(tm.abort(&w).is_err());

        let w = tm.begin(TxnType::Write).unwrap();
        tm.abort(&w).unwrap();
        assert!(matches!(tm.commit(&w), Err(CoreError::InvalidOperation { .. })));
    }

    #[test]
    fn read_commit_is_close() {
        let tm = manager(Config::default());
        let r = tm.begin(TxnType::Read).unwrap();
        tm.commit(&r).unwrap();
        assert_eq!(r.state(), TxnState::Committed);
        assert_eq!(tm.stats().finished_readers, 1);
        assert_eq!(tm.stats().active_readers, 0);
    }

    #[test]
    fn closing_active_writer_aborts_and_frees_permit() {
        let tm = manager(Config::default());
        let w = tm.begin(TxnType::Write).unwrap();
        add(&w, "ex:a");
        tm.close(&w).unwrap();
        assert_eq!(w.state(), TxnState::Closed);
        assert_eq!(tm.stats().aborted_writers, 1);

        let next = tm.begin(TxnType::Write).unwrap();
        assert_eq!(count(&next), 0);
    }

    #[test]
    fn prepare_failure_aborts_and_reports_not_committed() {
        let tm = manager(Config::default().queue_batch_size(0));
        let w = tm.begin(TxnType::Write).unwrap();
        add(&w, "ex:a");
        // Growing the base behind the writer's back breaks its id mapping.
        tm.store().nodes().get_allocate_node_id(&Node::uri("ex:intruder")).unwrap();

        let err = tm.commit(&w).unwrap_err();
        assert!(matches!(err, CoreError::TransactionNotCommitted { .. }));
        assert_eq!(w.state(), TxnState::Aborted);
        assert!(tm.journal().is_empty().unwrap());

        let next = tm.begin(TxnType::Write).unwrap();
        assert_eq!(count(&next), 0);
        tm.abort(&next).unwrap();
    }

    #[test]
    fn second_writer_waits_for_first() {
        let tm = manager(Config::default());
        let first = tm.begin(TxnType::Write).unwrap();
        let committed = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel();

        let handle = {
            let tm = Arc::clone(&tm);
            let committed = Arc::clone(&committed);
            thread::spawn(move || {
                let second = tm.begin(TxnType::Write).unwrap();
                tx.send(committed.load(Ordering::SeqCst)).unwrap();
                tm.abort(&second).unwrap();
            })
        };

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        committed.store(true, Ordering::SeqCst);
        tm.commit(&first).unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
        handle.join().unwrap();
    }

    #[test]
    fn read_promote_fails_after_intervening_commit() {
        let tm = manager(Config::default());
        let reader = tm.begin(TxnType::ReadPromote).unwrap();

        let w = tm.begin(TxnType::Write).unwrap();
        add(&w, "ex:a");
        tm.commit(&w).unwrap();

        assert!(tm.promote(&reader).unwrap().is_none());
        assert!(reader.is_active());
        tm.close(&reader).unwrap();
    }

    #[test]
    fn read_committed_promote_sees_latest() {
        let tm = manager(Config::default());
        let reader = tm.begin(TxnType::ReadCommittedPromote).unwrap();

        let w = tm.begin(TxnType::Write).unwrap();
        add(&w, "ex:a");
        tm.commit(&w).unwrap();

        let writer = tm.promote(&reader).unwrap().unwrap();
        assert_eq!(reader.state(), TxnState::Closed);
        assert!(writer.is_write());
        assert_eq!(count(&writer), 1);
        add(&writer, "ex:b");
        tm.commit(&writer).unwrap();
        assert_eq!(tm.version(), 2);
    }

    #[test]
    fn plain_read_cannot_promote() {
        let tm = manager(Config::default());
        let reader = tm.begin(TxnType::Read).unwrap();
        assert!(tm.promote(&reader).is_err());
        assert!(!reader.is_active());
        assert_eq!(tm.stats().active_readers, 0);
    }

    #[test]
    fn writer_blocking_round_trip() {
        let tm = manager(Config::default());
        assert!(tm.enable_writers().is_err());
        assert!(tm.try_block_writers().unwrap());
        assert!(tm.try_block_writers().is_err());
        tm.enable_writers().unwrap();

        let w = tm.begin(TxnType::Write).unwrap();
        assert!(!tm.try_block_writers().unwrap());
        tm.abort(&w).unwrap();
        tm.block_writers().unwrap();
        tm.enable_writers().unwrap();
    }

    #[test]
    fn exclusive_mode_drains_queue() {
        let tm = manager(Config::default());
        let w = tm.begin(TxnType::Write).unwrap();
        add(&w, "ex:a");
        tm.commit(&w).unwrap();
        assert_eq!(tm.stats().queue_length, 1);

        tm.start_exclusive_mode().unwrap();
        assert_eq!(tm.stats().queue_length, 0);
        assert!(tm.start_exclusive_mode().is_err());
        tm.finish_exclusive_mode().unwrap();
        assert!(tm.finish_exclusive_mode().is_err());

        let r = tm.begin(TxnType::Read).unwrap();
        assert!(!tm.try_exclusive_mode().unwrap());
        tm.close(&r).unwrap();
        assert!(tm.try_exclusive_mode().unwrap());
        tm.finish_exclusive_mode().unwrap();
    }

    #[test]
    fn queue_over_threshold_forces_flush() {
        let tm = manager(
            Config::default()
                .queue_batch_size(100)
                .max_queue_threshold(Some(1)),
        );
        for name in ["ex:a", "ex:b"] {
            let w = tm.begin(TxnType::Write).unwrap();
            add(&w, name);
            tm.commit(&w).unwrap();
        }
        assert_eq!(tm.stats().queue_length, 0);
        assert_eq!(tm.stats().max_queue_length, 2);
    }

    #[test]
    fn journal_threshold_triggers_flush() {
        let tm = manager(
            Config::default()
                .queue_batch_size(100)
                .journal_threshold_size(Some(1)),
        );
        let w = tm.begin(TxnType::Write).unwrap();
        add(&w, "ex:a");
        tm.commit(&w).unwrap();
        assert_eq!(tm.stats().queue_length, 0);
    }

    #[test]
    fn flush_waits_for_quiescence() {
        let tm = manager(Config::default());
        let w = tm.begin(TxnType::Write).unwrap();
        add(&w, "ex:a");
        tm.commit(&w).unwrap();

        let r = tm.begin(TxnType::Read).unwrap();
        assert!(!tm.flush().unwrap());
        tm.close(&r).unwrap();
        assert!(tm.flush().unwrap());
        assert!(!tm.flush().unwrap());
    }

    #[test]
    fn failed_replay_keeps_queued_commits_visible() {
        let files = MemoryFiles::default();
        let config = Config::default().queue_batch_size(100);
        let attached = Location::Memory(files.clone()).attach(true).unwrap();
        let store = Arc::new(BaseStore::open(&attached, &config).unwrap());
        let journal = Arc::new(Journal::new(attached.open_backend(JOURNAL_FILE).unwrap()));
        let tm = TransactionManager::new(config, store, journal);

        for name in ["ex:a", "ex:b"] {
            let w = tm.begin(TxnType::Write).unwrap();
            add(&w, name);
            tm.commit(&w).unwrap();
        }
        assert_eq!(tm.stats().queue_length, 2);

        let backend = files.file(JOURNAL_FILE);
        let good = backend.data();
        let first = tm.journal().read_journal(0).unwrap();
        let mut bad = good.clone();
        bad[first.end_position as usize - 1] ^= 0xFF;
        backend.set_data(bad);

        assert!(matches!(tm.flush(), Err(CoreError::JournalCorruption { position: 0, .. })));
        assert_eq!(tm.stats().queue_length, 2);
        let r = tm.begin(TxnType::Read).unwrap();
        assert_eq!(count(&r), 2);
        tm.close(&r).unwrap();

        backend.set_data(good);
        assert!(tm.flush().unwrap());
        assert_eq!(tm.stats().queue_length, 0);
        assert!(tm.journal().is_empty().unwrap());
        let r = tm.begin(TxnType::Read).unwrap();
        assert_eq!(count(&r), 2);
        tm.close(&r).unwrap();
    }

    #[test]
    fn closedown_refuses_new_transactions() {
        let tm = manager(Config::default());
        let w = tm.begin(TxnType::Write).unwrap();
        add(&w, "ex:a");
        tm.commit(&w).unwrap();
        tm.closedown().unwrap();
        assert!(tm.is_closed());
        assert!(tm.journal().is_empty().unwrap());
        assert!(matches!(tm.begin(TxnType::Read), Err(CoreError::DatasetClosed)));
    }
}
