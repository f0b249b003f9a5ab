//! Thread-bound transactions.

use super::txn::DatasetGraphTxn;
use crate::error::{CoreError, CoreResult};
use crate::transaction::TransactionManager;
use crate::types::TxnType;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, ThreadId};

/// Binds each calling thread to at most one transaction.
///
/// Every method acts on the calling thread's transaction, so one handle
/// can be shared by many threads, each running its own transaction.
pub struct DatasetGraphTransaction {
    manager: Arc<TransactionManager>,
    bound: Mutex<HashMap<ThreadId, Arc<Mutex<DatasetGraphTxn>>>>,
}

impl DatasetGraphTransaction {
    pub(crate) fn new(manager: Arc<TransactionManager>) -> Self {
        Self {
            manager,
            bound: Mutex::new(HashMap::new()),
        }
    }

    fn current(&self) -> CoreResult<Arc<Mutex<DatasetGraphTxn>>> {
        self.bound
            .lock()
            .get(&thread::current().id())
            .cloned()
            .ok_or_else(|| CoreError::invalid_operation("no transaction on this thread"))
    }

    fn take(&self) -> Option<Arc<Mutex<DatasetGraphTxn>>> {
        self.bound.lock().remove(&thread::current().id())
    }

    /// Begins a transaction on the calling thread.
    ///
    /// # Errors
    ///
    /// Fails if the thread is already in a transaction.
    pub fn begin(&self, txn_type: TxnType) -> CoreResult<()> {
        let id = thread::current().id();
        if self.bound.lock().contains_key(&id) {
            return Err(CoreError::invalid_operation("thread is already in a transaction"));
        }
        // Begin may wait for the writer permit; do not hold the map lock.
        let txn = self.manager.begin(txn_type)?;
        let dsg = DatasetGraphTxn::new(Arc::clone(&self.manager), txn);
        self.bound.lock().insert(id, Arc::new(Mutex::new(dsg)));
        Ok(())
    }

    /// True if the calling thread has a transaction.
    #[must_use]
    pub fn is_in_transaction(&self) -> bool {
        self.bound.lock().contains_key(&thread::current().id())
    }

    /// Commits and ends the calling thread's transaction.
    pub fn commit(&self) -> CoreResult<()> {
        let dsg = self
            .take()
            .ok_or_else(|| CoreError::invalid_operation("commit outside a transaction"))?;
        let result = dsg.lock().commit();
        result
    }

    /// Aborts and ends the calling thread's transaction.
    pub fn abort(&self) -> CoreResult<()> {
        let dsg = self
            .take()
            .ok_or_else(|| CoreError::invalid_operation("abort outside a transaction"))?;
        let result = dsg.lock().abort();
        result
    }

    /// Ends the calling thread's transaction, if any.
    ///
    /// A write transaction that was not committed is aborted.
    pub fn end(&self) -> CoreResult<()> {
        match self.take() {
            Some(dsg) => dsg.lock().close(),
            None => Ok(()),
        }
    }

    /// Promotes the calling thread's transaction. See
    /// [`DatasetGraphTxn::promote`].
    pub fn promote(&self) -> CoreResult<bool> {
        let dsg = self.current()?;
        let promoted = dsg.lock().promote();
        promoted
    }

    /// Runs `f` against the calling thread's transaction.
    pub fn with_txn<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&DatasetGraphTxn) -> CoreResult<T>,
    {
        let dsg = self.current()?;
        let guard = dsg.lock();
        f(&guard)
    }
}

impl std::fmt::Debug for DatasetGraphTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatasetGraphTransaction")
            .field("bound_threads", &self.bound.lock().len())
            .finish_non_exhaustive()
    }
}
