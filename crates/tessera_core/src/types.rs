//! Core type definitions for Tessera.

use std::fmt;

/// Unique identifier for a transaction.
///
/// Transaction IDs are monotonically increasing and never reused within a
/// process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TxnId(pub u64);

impl TxnId {
    /// Creates a new transaction ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// Identifier of a fixed-size block within one block manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub u32);

impl BlockId {
    /// Creates a new block ID.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Byte offset of this block in a file of `block_size` blocks.
    #[must_use]
    pub const fn file_offset(self, block_size: usize) -> u64 {
        self.0 as u64 * block_size as u64
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block:{}", self.0)
    }
}

/// Names a storage file inside a dataset, as recorded in journal entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileRef(pub u32);

impl FileRef {
    /// "No file" marker carried by commit and abort entries.
    pub const NONE: Self = Self(0);
    /// Block file holding triple records.
    pub const TRIPLES: Self = Self(1);
    /// Buffer channel holding the triple table's header.
    pub const TRIPLES_STATE: Self = Self(2);

    /// Creates a new file reference.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns true for the "no file" marker.
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for FileRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::NONE => f.write_str("file:-"),
            Self::TRIPLES => f.write_str("file:triples"),
            Self::TRIPLES_STATE => f.write_str("file:triples-state"),
            Self(n) => write!(f, "file:{n}"),
        }
    }
}

/// Identifier of a node in a node table.
///
/// The value is the byte offset of the node's record in the node object
/// file. Ids at or above a transaction's allocation offset refer to the
/// transaction's private node area until commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u64);

impl NodeId {
    /// Creates a new node ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node:{}", self.0)
    }
}

/// Access mode of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadWrite {
    /// Reads only; never blocks and never blocks others.
    Read,
    /// Holds the single writer slot.
    Write,
}

impl fmt::Display for ReadWrite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => f.write_str("READ"),
            Self::Write => f.write_str("WRITE"),
        }
    }
}

/// Kind of transaction requested at begin.
///
/// The promote variants start as readers and decide at promotion time
/// whether an intervening commit invalidates the upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxnType {
    /// Plain reader.
    Read,
    /// Plain writer.
    Write,
    /// Reader that may promote only if no writer committed since it began.
    ReadPromote,
    /// Reader that may always promote, seeing the latest committed state.
    ReadCommittedPromote,
}

impl TxnType {
    /// Initial access mode for this type.
    #[must_use]
    pub const fn mode(self) -> ReadWrite {
        match self {
            Self::Write => ReadWrite::Write,
            Self::Read | Self::ReadPromote | Self::ReadCommittedPromote => ReadWrite::Read,
        }
    }
}

/// Lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxnState {
    /// Open for reads (and writes, for writers).
    Active,
    /// Commit prepare is running.
    Preparing,
    /// The commit record is durable.
    Committed,
    /// Rolled back.
    Aborted,
    /// Finished and detached from the manager.
    Closed,
}

impl fmt::Display for TxnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Active => "ACTIVE",
            Self::Preparing => "PREPARING",
            Self::Committed => "COMMITTED",
            Self::Aborted => "ABORTED",
            Self::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_offsets() {
        assert_eq!(BlockId::new(0).file_offset(8192), 0);
        assert_eq!(BlockId::new(3).file_offset(8192), 3 * 8192);
        assert_eq!(BlockId::new(u32::MAX).file_offset(2), u64::from(u32::MAX) * 2);
    }

    #[test]
    fn display_forms() {
        assert_eq!(TxnId::new(4).to_string(), "txn:4");
        assert_eq!(FileRef::NONE.to_string(), "file:-");
        assert_eq!(FileRef::new(9).to_string(), "file:9");
        assert_eq!(TxnState::Committed.to_string(), "COMMITTED");
    }

    #[test]
    fn promote_types_start_as_readers() {
        assert_eq!(TxnType::ReadPromote.mode(), ReadWrite::Read);
        assert_eq!(TxnType::ReadCommittedPromote.mode(), ReadWrite::Read);
        assert_eq!(TxnType::Write.mode(), ReadWrite::Write);
    }
}
