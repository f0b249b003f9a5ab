//! Dataset handles.
//!
//! [`Dataset`] owns the files of one dataset and its transaction manager.
//! All access goes through transactions:
//!
//! ```rust,ignore
//! use tessera_core::{Config, Dataset, Node};
//!
//! let dataset = Dataset::open(Path::new("data"), Config::default())?;
//! dataset.write(|dsg| {
//!     dsg.add(&Node::uri("ex:s"), &Node::uri("ex:p"), &Node::literal("o"))?;
//!     Ok(())
//! })?;
//! let count = dataset.read(|dsg| dsg.len())?;
//! dataset.close()?;
//! ```

mod thread;
mod txn;

pub use thread::DatasetGraphTransaction;
pub use txn::{DatasetGraphTxn, Statement, Statements, TrackedIter};

use crate::config::Config;
use crate::error::CoreResult;
use crate::journal::{Journal, JournalControl, ReplaySummary};
use crate::location::{AttachedLocation, Location, JOURNAL_FILE};
use crate::store::BaseStore;
use crate::transaction::{TransactionManager, TxnManagerStats};
use crate::types::TxnType;
use std::path::Path;
use tessera_storage::StorageBackend;
use std::sync::Arc;
use tracing::{info, warn};

/// An open dataset.
pub struct Dataset {
    location: AttachedLocation,
    manager: Arc<TransactionManager>,
    recovery: ReplaySummary,
}

impl Dataset {
    /// Opens the dataset in `path`, running journal recovery.
    pub fn open(path: &Path, config: Config) -> CoreResult<Self> {
        Self::open_location(&Location::directory(path), config)
    }

    /// Opens a fresh in-memory dataset.
    pub fn open_in_memory(config: Config) -> CoreResult<Self> {
        Self::open_location(&Location::memory(), config)
    }

    /// Opens a dataset at any location.
    ///
    /// Recovery replays every transaction whose commit record reached the
    /// journal and drops the rest, so the base files hold exactly the
    /// committed transactions.
    pub fn open_location(location: &Location, config: Config) -> CoreResult<Self> {
        let attached = location.attach(config.create_if_missing)?;
        let journal = attached.open_backend(JOURNAL_FILE)?;
        Self::open_attached(attached, config, journal)
    }

    /// Opens a dataset at `location` with the journal kept in `journal`
    /// instead of the location's journal file.
    ///
    /// Used to put fault-injecting backends under the journal.
    pub fn open_with_journal(
        location: &Location,
        config: Config,
        journal: Box<dyn StorageBackend>,
    ) -> CoreResult<Self> {
        let attached = location.attach(config.create_if_missing)?;
        Self::open_attached(attached, config, journal)
    }

    fn open_attached(
        attached: AttachedLocation,
        config: Config,
        journal: Box<dyn StorageBackend>,
    ) -> CoreResult<Self> {
        let journal = Arc::new(Journal::new(journal));
        let store = Arc::new(BaseStore::open(&attached, &config)?);

        let discarded = store.discard_node_delta()?;
        if discarded > 0 {
            warn!(bytes = discarded, "discarded node delta of an unfinished transaction");
        }
        let recovery = JournalControl::recovery(&journal, store.routing())?;
        attached.sync()?;

        info!(
            location = %attached.describe(),
            recovered = recovery.transactions,
            "dataset opened"
        );
        Ok(Self {
            location: attached,
            manager: Arc::new(TransactionManager::new(config, store, journal)),
            recovery,
        })
    }

    /// What recovery did when the dataset was opened.
    #[must_use]
    pub fn recovery(&self) -> ReplaySummary {
        self.recovery
    }

    /// The transaction manager.
    #[must_use]
    pub fn manager(&self) -> &Arc<TransactionManager> {
        &self.manager
    }

    /// Where the dataset lives.
    #[must_use]
    pub fn describe(&self) -> String {
        self.location.describe()
    }

    /// Transaction counters.
    #[must_use]
    pub fn stats(&self) -> TxnManagerStats {
        self.manager.stats()
    }

    /// Begins a transaction.
    pub fn begin(&self, txn_type: TxnType) -> CoreResult<DatasetGraphTxn> {
        let txn = self.manager.begin(txn_type)?;
        Ok(DatasetGraphTxn::new(Arc::clone(&self.manager), txn))
    }

    /// A handle binding threads to transactions.
    #[must_use]
    pub fn thread_bound(&self) -> DatasetGraphTransaction {
        DatasetGraphTransaction::new(Arc::clone(&self.manager))
    }

    /// Runs `f` in a read transaction.
    pub fn read<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&DatasetGraphTxn) -> CoreResult<T>,
    {
        let dsg = self.begin(TxnType::Read)?;
        let result = f(&dsg);
        dsg.close()?;
        result
    }

    /// Runs `f` in a write transaction.
    ///
    /// If `f` returns `Ok`, the transaction is committed. If it returns
    /// `Err`, the transaction is aborted and the error returned.
    pub fn write<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&DatasetGraphTxn) -> CoreResult<T>,
    {
        let dsg = self.begin(TxnType::Write)?;
        match f(&dsg) {
            Ok(value) => {
                dsg.commit()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(abort) = dsg.abort() {
                    warn!(txn = %dsg.id(), error = %abort, "abort after failed write failed");
                }
                Err(e)
            }
        }
    }

    /// Flushes queued commits if no transaction is open.
    pub fn flush(&self) -> CoreResult<bool> {
        self.manager.flush()
    }

    /// Closes the dataset. Further transactions are refused.
    pub fn close(&self) -> CoreResult<()> {
        if self.manager.is_closed() {
            return Ok(());
        }
        self.manager.closedown()?;
        self.location.sync()
    }

    /// True until [`Self::close`].
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.manager.is_closed()
    }
}

impl std::fmt::Debug for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dataset")
            .field("location", &self.describe())
            .field("is_open", &self.is_open())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl Drop for Dataset {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "closing dataset on drop failed");
        }
    }
}
