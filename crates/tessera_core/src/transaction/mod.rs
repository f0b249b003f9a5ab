//! Transactions and the transaction manager.
//!
//! A write transaction commits in two phases. Prepare has every component
//! write its changes to the journal; then a `Commit` entry is appended and
//! synced, which is the durability point. Applying the journal to the base
//! files (enact) happens afterwards, either at once when no reader could
//! observe it or later from the manager's flush queue.

mod lifecycle;
mod manager;
mod state;

pub use lifecycle::TransactionLifecycle;
pub use manager::{TransactionManager, TxnManagerStats};
pub use state::{IteratorHandle, Transaction};
