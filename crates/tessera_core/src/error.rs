//! Error types for Tessera core.

use crate::types::{BlockId, FileRef, NodeId, TxnId};
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in the storage engine.
///
/// The variants follow the failure classes of the commit protocol:
/// [`CoreError::TransactionNotCommitted`] is recoverable by abort,
/// [`CoreError::CommittedWithError`] reports a durable commit followed by a
/// failure, and the corruption and inconsistency variants are fatal.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] tessera_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The journal holds bytes that do not form a valid entry.
    #[error("journal corruption at offset {position}: {message}")]
    JournalCorruption {
        /// Offset of the offending entry.
        position: u64,
        /// Description of the corruption.
        message: String,
    },

    /// An entry's stored checksum does not match its contents.
    #[error("checksum mismatch at offset {position}: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Offset of the offending entry.
        position: u64,
        /// Checksum stored in the entry.
        expected: u32,
        /// Checksum computed over the entry.
        actual: u32,
    },

    /// A journal read ran past the end of the file.
    #[error("truncated journal entry at offset {position}: need {needed} bytes, {available} available")]
    ReadPastEnd {
        /// Offset of the incomplete entry.
        position: u64,
        /// Bytes required to finish the entry.
        needed: u64,
        /// Bytes actually present.
        available: u64,
    },

    /// Prepare failed; the transaction was aborted and nothing was committed.
    #[error("transaction {txn} did not commit: {source}")]
    TransactionNotCommitted {
        /// The transaction that failed.
        txn: TxnId,
        /// The failure raised during prepare.
        #[source]
        source: Box<CoreError>,
    },

    /// The commit is durable but a later step failed. Do not retry.
    #[error("transaction {txn} committed but its status was not recorded: {source}")]
    CommittedWithError {
        /// The transaction that committed.
        txn: TxnId,
        /// The failure raised after the commit point.
        #[source]
        source: Box<CoreError>,
    },

    /// Shared state diverged from what the single writer expected.
    #[error("inconsistent storage state: {message}")]
    Inconsistent {
        /// Description of the inconsistency.
        message: String,
    },

    /// A journal entry named a file the store does not know.
    #[error("journal entry for unknown file {file_ref}")]
    UnknownFile {
        /// The unrecognised file reference.
        file_ref: FileRef,
    },

    /// A block id outside the allocated range.
    #[error("no such block: {block_id}")]
    NoSuchBlock {
        /// The requested block.
        block_id: BlockId,
    },

    /// A node id that does not point at a node record.
    #[error("no such node: {node_id}")]
    NoSuchNode {
        /// The requested node id.
        node_id: NodeId,
    },

    /// Dataset directory is already open in another process.
    #[error("dataset locked: another process has exclusive access")]
    DatasetLocked,

    /// Invalid on-disk format.
    #[error("invalid format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// The dataset has been closed.
    #[error("dataset is closed")]
    DatasetClosed,
}

impl CoreError {
    /// Creates a journal corruption error.
    pub fn journal_corruption(position: u64, message: impl Into<String>) -> Self {
        Self::JournalCorruption {
            position,
            message: message.into(),
        }
    }

    /// Creates an inconsistency error.
    pub fn inconsistent(message: impl Into<String>) -> Self {
        Self::Inconsistent {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Wraps a prepare-phase failure.
    pub fn not_committed(txn: TxnId, source: CoreError) -> Self {
        Self::TransactionNotCommitted {
            txn,
            source: Box::new(source),
        }
    }

    /// Wraps a failure that happened after the commit point.
    pub fn committed_with_error(txn: TxnId, source: CoreError) -> Self {
        Self::CommittedWithError {
            txn,
            source: Box::new(source),
        }
    }

    /// True for errors that mean the journal bytes cannot be trusted.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::JournalCorruption { .. }
                | Self::ChecksumMismatch { .. }
                | Self::ReadPastEnd { .. }
        )
    }
}
