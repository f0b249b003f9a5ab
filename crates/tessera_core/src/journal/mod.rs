//! Write-ahead journal.
//!
//! One append-only file records every committed write transaction as a
//! contiguous run of `Block` and `Buffer` entries closed by a `Commit`
//! entry. The sync after the `Commit` entry is the durability point.
//! The base files are brought up to date later by replaying the journal,
//! which is then truncated.
//!
//! ## Entry Format
//!
//! All integers are little-endian.
//!
//! ```text
//! | type (4) | capacity (4) | file ref (4) | block id (4) | payload (capacity) | crc32 (4) |
//! ```
//!
//! The block id is `-1` for entries that carry no block. The checksum is a
//! CRC-32 over header and payload.
//!
//! ## Failure Policy
//!
//! A read past the end of the file and a checksum mismatch are both errors
//! for the reader. [`JournalControl`] decides what they mean: during
//! recovery they mark an incomplete trailing transaction, which is
//! discarded; inside a segment that has a `Commit` entry they are fatal.

mod control;
mod entry;
mod iterator;
mod writer;

pub use control::{JournalControl, ReplaySummary};
pub use entry::{JournalEntry, JournalEntryType, ENTRY_OVERHEAD, HEADER_SIZE};
pub use iterator::JournalEntries;
pub use writer::Journal;
