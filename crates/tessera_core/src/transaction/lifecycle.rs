//! Two-phase commit participation.

use super::state::Transaction;
use crate::error::CoreResult;

/// A component that takes part in a transaction's commit.
///
/// The transaction calls each phase on every registered component in
/// registration order:
///
/// 1. `begin` when the transaction starts
/// 2. `commit_prepare` to make changes durable in the journal, without
///    touching shared base storage that readers depend on
/// 3. `commit_enact` once the commit record is durable and the manager
///    applies the transaction to the base
/// 4. `commit_clearup` to drop per-transaction state
///
/// or `abort` instead of 2-4. `abort` must leave the base as it was before
/// `begin`.
pub trait TransactionLifecycle: Send + Sync {
    /// Label for logs.
    fn name(&self) -> String;

    /// The transaction started.
    fn begin(&self, txn: &Transaction) -> CoreResult<()>;

    /// The transaction is rolling back.
    fn abort(&self, txn: &Transaction) -> CoreResult<()>;

    /// Write changes to the journal.
    fn commit_prepare(&self, txn: &Transaction) -> CoreResult<()>;

    /// Apply journaled changes.
    fn commit_enact(&self, txn: &Transaction) -> CoreResult<()>;

    /// Release per-transaction state.
    fn commit_clearup(&self, txn: &Transaction) -> CoreResult<()>;
}
