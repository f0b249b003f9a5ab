//! # Tessera Core
//!
//! Transactional storage engine for Tessera graph datasets.
//!
//! This crate provides:
//! - Fixed-size blocks and block managers, with journaling overlays for
//!   write transactions
//! - Node tables mapping graph terms to ids, and a block-backed triple table
//! - A checksummed redo journal with crash recovery
//! - Single-writer, multi-reader transactions with deferred flush
//! - Dataset handles scoped to one transaction or bound to a thread

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod block;
mod channel;
mod config;
mod dataset;
mod error;
pub mod journal;
mod location;
pub mod node;
pub mod store;
pub mod transaction;
mod types;

pub use block::{AllocatorKind, Block, BlockMgr};
pub use channel::{BufferChannel, BufferChannelJournal, BufferChannelReadonly, BufferChannelStorage};
pub use config::{Config, DEFAULT_BLOCK_SIZE};
pub use dataset::{Dataset, DatasetGraphTransaction, DatasetGraphTxn, Statement, Statements, TrackedIter};
pub use error::{CoreError, CoreResult};
pub use journal::{Journal, JournalControl, JournalEntry, JournalEntryType, ReplaySummary};
pub use location::{
    AttachedLocation, DatasetDir, Location, MemoryFiles, JOURNAL_FILE, NODES_DELTA_FILE, NODES_FILE,
    TRIPLES_FILE, TRIPLES_STATE_FILE,
};
pub use node::{Node, NodeTable};
pub use store::{BaseStore, StorageView, Triple, TripleTable};
pub use transaction::{IteratorHandle, Transaction, TransactionLifecycle, TransactionManager, TxnManagerStats};
pub use types::{BlockId, FileRef, NodeId, ReadWrite, TxnId, TxnState, TxnType};
