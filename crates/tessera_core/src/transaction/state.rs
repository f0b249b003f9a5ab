//! Transaction state.

use super::lifecycle::TransactionLifecycle;
use crate::error::{CoreError, CoreResult};
use crate::store::StorageView;
use crate::types::{ReadWrite, TxnId, TxnState, TxnType};
use parking_lot::lock_api::{ArcMutexGuard, ArcRwLockReadGuard};
use parking_lot::{Mutex, RawMutex, RawRwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{error, warn};

/// Holds the writer permit for a write transaction.
pub(crate) type WriterPermit = ArcMutexGuard<RawMutex, ()>;

/// Shared hold on the exclusivity lock, released when the transaction ends.
pub(crate) type NonExclusive = ArcRwLockReadGuard<RawRwLock, ()>;

/// Cancellation handle for an iterator opened inside a transaction.
#[derive(Debug, Default)]
pub struct IteratorHandle {
    cancelled: AtomicBool,
    finished: AtomicBool,
}

impl IteratorHandle {
    /// Creates a live handle.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Whether the owning transaction ended under the iterator.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Marks the iterator as cancelled.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Records that the iterator ran to completion.
    pub fn mark_finished(&self) {
        self.finished.store(true, Ordering::Release);
    }

    /// Whether the iterator ran to completion.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}

#[derive(Default)]
struct TxnGuards {
    writer: Option<WriterPermit>,
    non_exclusive: Option<NonExclusive>,
}

/// A transaction.
///
/// Shared as `Arc<Transaction>` between its dataset handle and the manager,
/// which keeps committed writers in its flush queue until their changes
/// reach the base.
pub struct Transaction {
    id: TxnId,
    txn_type: TxnType,
    mode: ReadWrite,
    version: u64,
    state: Mutex<TxnState>,
    view: StorageView,
    components: Vec<Arc<dyn TransactionLifecycle>>,
    journal_start: Mutex<Option<u64>>,
    iterators: Mutex<Vec<Weak<IteratorHandle>>>,
    guards: Mutex<TxnGuards>,
}

impl Transaction {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: TxnId,
        txn_type: TxnType,
        mode: ReadWrite,
        version: u64,
        view: StorageView,
        components: Vec<Arc<dyn TransactionLifecycle>>,
        writer: Option<WriterPermit>,
        non_exclusive: Option<NonExclusive>,
    ) -> Self {
        Self {
            id,
            txn_type,
            mode,
            version,
            state: Mutex::new(TxnState::Active),
            view,
            components,
            journal_start: Mutex::new(None),
            iterators: Mutex::new(Vec::new()),
            guards: Mutex::new(TxnGuards {
                writer,
                non_exclusive,
            }),
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TxnId {
        self.id
    }

    /// Type requested at begin.
    #[must_use]
    pub fn txn_type(&self) -> TxnType {
        self.txn_type
    }

    /// Access mode.
    #[must_use]
    pub fn mode(&self) -> ReadWrite {
        self.mode
    }

    /// True for write transactions.
    #[must_use]
    pub fn is_write(&self) -> bool {
        self.mode == ReadWrite::Write
    }

    /// Commit version current when the transaction began.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> TxnState {
        *self.state.lock()
    }

    /// True while reads and writes are allowed.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state() == TxnState::Active
    }

    /// Storage view for this transaction.
    #[must_use]
    pub fn view(&self) -> &StorageView {
        &self.view
    }

    /// Fails unless the transaction is active.
    pub fn check_active(&self) -> CoreResult<()> {
        match self.state() {
            TxnState::Active => Ok(()),
            state => Err(CoreError::invalid_operation(format!(
                "{} is {state}, not active",
                self.id
            ))),
        }
    }

    /// Fails unless the transaction is an active writer.
    pub fn check_writable(&self) -> CoreResult<()> {
        self.check_active()?;
        if self.is_write() {
            Ok(())
        } else {
            Err(CoreError::invalid_operation(format!(
                "{} is a read transaction",
                self.id
            )))
        }
    }

    pub(crate) fn set_state(&self, state: TxnState) {
        *self.state.lock() = state;
    }

    pub(crate) fn set_journal_start(&self, position: u64) {
        *self.journal_start.lock() = Some(position);
    }

    pub(crate) fn journal_start(&self) -> Option<u64> {
        *self.journal_start.lock()
    }

    pub(crate) fn begin_components(&self) -> CoreResult<()> {
        for component in &self.components {
            component.begin(self)?;
        }
        Ok(())
    }

    /// Runs `commit_prepare` on every component, stopping at the first error.
    pub(crate) fn prepare(&self) -> CoreResult<()> {
        for component in &self.components {
            component.commit_prepare(self).map_err(|e| {
                error!(txn = %self.id, component = %component.name(), error = %e, "prepare failed");
                e
            })?;
        }
        Ok(())
    }

    /// Runs `abort` on every component. Failures are logged, not returned.
    pub(crate) fn abort_components(&self) -> usize {
        let mut failures = 0;
        for component in &self.components {
            if let Err(e) = component.abort(self) {
                failures += 1;
                error!(txn = %self.id, component = %component.name(), error = %e, "abort failed");
            }
        }
        failures
    }

    /// Runs `commit_enact` then `commit_clearup` on every component.
    pub(crate) fn enact(&self) -> CoreResult<()> {
        for component in &self.components {
            component.commit_enact(self)?;
        }
        for component in &self.components {
            component.commit_clearup(self)?;
        }
        Ok(())
    }

    /// Registers an iterator to cancel when the transaction ends.
    pub fn track_iterator(&self, handle: &Arc<IteratorHandle>) {
        let mut iterators = self.iterators.lock();
        iterators.retain(|weak| weak.strong_count() > 0);
        iterators.push(Arc::downgrade(handle));
    }

    /// Cancels every tracked iterator still open. Returns how many were.
    pub(crate) fn cancel_iterators(&self, event: &str) -> usize {
        let open: Vec<Arc<IteratorHandle>> = self
            .iterators
            .lock()
            .drain(..)
            .filter_map(|weak| weak.upgrade())
            .filter(|handle| !handle.is_finished())
            .collect();
        for handle in &open {
            handle.cancel();
        }
        if !open.is_empty() {
            warn!(txn = %self.id, open = open.len(), event, "cancelled iterators left open");
        }
        open.len()
    }

    pub(crate) fn take_non_exclusive(&self) -> Option<NonExclusive> {
        self.guards.lock().non_exclusive.take()
    }

    /// Releases the writer permit and the shared exclusivity hold.
    pub(crate) fn release_guards(&self) {
        let mut guards = self.guards.lock();
        guards.writer = None;
        guards.non_exclusive = None;
    }

    #[cfg(test)]
    pub(crate) fn detached_for_tests() -> Self {
        use crate::config::Config;
        use crate::location::Location;
        use crate::store::BaseStore;

        let attached = Location::memory().attach(true).expect("memory location");
        let store = BaseStore::open(&attached, &Config::default()).expect("memory store");
        let view = store
            .reader_view(store.blocks(), store.state())
            .expect("reader view");
        Self::new(
            TxnId::new(0),
            TxnType::Write,
            ReadWrite::Write,
            0,
            view,
            Vec::new(),
            None,
            None,
        )
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("type", &self.txn_type)
            .field("mode", &self.mode)
            .field("version", &self.version)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}:{}]", self.id, self.mode, self.state())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iterator_handles_are_cancelled_once() {
        let txn = Transaction::detached_for_tests();
        let open = IteratorHandle::new();
        let done = IteratorHandle::new();
        done.mark_finished();
        txn.track_iterator(&open);
        txn.track_iterator(&done);
        {
            let dropped = IteratorHandle::new();
            txn.track_iterator(&dropped);
        }

        assert_eq!(txn.cancel_iterators("commit"), 1);
        assert!(open.is_cancelled());
        assert!(!done.is_cancelled());
        assert_eq!(txn.cancel_iterators("close"), 0);
    }

    #[test]
    fn state_checks() {
        let txn = Transaction::detached_for_tests();
        assert!(txn.check_writable().is_ok());
        txn.set_state(TxnState::Aborted);
        let err = txn.check_active().unwrap_err();
        assert!(err.to_string().contains("ABORTED"));
    }
}
