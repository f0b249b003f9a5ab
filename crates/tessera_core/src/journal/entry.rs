//! Journal entry types and encoding.

use crate::error::{CoreError, CoreResult};
use crate::types::{BlockId, FileRef};
use std::fmt;

/// Bytes before the payload: type, capacity, file ref, block id.
pub const HEADER_SIZE: usize = 16;

/// Bytes an entry occupies besides its payload.
pub const ENTRY_OVERHEAD: usize = HEADER_SIZE + 4;

const NO_BLOCK: i32 = -1;

/// Kind of a journal entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JournalEntryType {
    /// Image of one block.
    Block,
    /// Whole contents of a buffer channel.
    Buffer,
    /// Object file data.
    Object,
    /// End of a committed transaction.
    Commit,
    /// End of an aborted transaction.
    Abort,
    /// Checkpoint marker.
    Checkpoint,
}

impl JournalEntryType {
    /// On-disk code.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Block => 1,
            Self::Buffer => 2,
            Self::Object => 3,
            Self::Commit => 4,
            Self::Abort => 5,
            Self::Checkpoint => 6,
        }
    }

    /// Parses an on-disk code.
    #[must_use]
    pub const fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(Self::Block),
            2 => Some(Self::Buffer),
            3 => Some(Self::Object),
            4 => Some(Self::Commit),
            5 => Some(Self::Abort),
            6 => Some(Self::Checkpoint),
            _ => None,
        }
    }
}

impl fmt::Display for JournalEntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Block => "Block",
            Self::Buffer => "Buffer",
            Self::Object => "Object",
            Self::Commit => "Commit",
            Self::Abort => "Abort",
            Self::Checkpoint => "Checkpoint",
        };
        f.write_str(name)
    }
}

/// One record read back from the journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    /// Entry kind.
    pub entry_type: JournalEntryType,
    /// File the entry applies to.
    pub file_ref: FileRef,
    /// Block id, for `Block` entries.
    pub block_id: Option<BlockId>,
    /// Payload bytes.
    pub payload: Vec<u8>,
    /// Offset of the entry's first byte.
    pub position: u64,
    /// Offset just past the entry.
    pub end_position: u64,
}

impl JournalEntry {
    /// Total encoded length.
    #[must_use]
    pub fn encoded_len(&self) -> u64 {
        self.end_position - self.position
    }
}

pub(crate) fn encode(
    entry_type: JournalEntryType,
    file_ref: FileRef,
    block_id: Option<BlockId>,
    payload: &[u8],
) -> CoreResult<Vec<u8>> {
    let capacity = i32::try_from(payload.len())
        .map_err(|_| CoreError::invalid_operation("journal payload too large"))?;
    let file_ref = i32::try_from(file_ref.as_u32())
        .map_err(|_| CoreError::invalid_operation("file ref out of range"))?;
    let block_id = match block_id {
        Some(id) => i32::try_from(id.as_u32())
            .map_err(|_| CoreError::invalid_operation("block id out of range for journal"))?,
        None => NO_BLOCK,
    };

    let mut data = Vec::with_capacity(ENTRY_OVERHEAD + payload.len());
    data.extend_from_slice(&entry_type.code().to_le_bytes());
    data.extend_from_slice(&capacity.to_le_bytes());
    data.extend_from_slice(&file_ref.to_le_bytes());
    data.extend_from_slice(&block_id.to_le_bytes());
    data.extend_from_slice(payload);
    let crc = crc32fast::hash(&data);
    data.extend_from_slice(&crc.to_le_bytes());
    Ok(data)
}

/// Parsed fixed header.
pub(crate) struct Header {
    pub entry_type: JournalEntryType,
    pub capacity: usize,
    pub file_ref: FileRef,
    pub block_id: Option<BlockId>,
}

pub(crate) fn decode_header(position: u64, bytes: &[u8]) -> CoreResult<Header> {
    let field = |i: usize| -> i32 {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&bytes[i * 4..i * 4 + 4]);
        i32::from_le_bytes(raw)
    };
    let code = field(0);
    let entry_type = JournalEntryType::from_code(code)
        .ok_or_else(|| CoreError::journal_corruption(position, format!("unknown entry type {code}")))?;
    let capacity = usize::try_from(field(1))
        .map_err(|_| CoreError::journal_corruption(position, "negative payload capacity"))?;
    let file_ref = u32::try_from(field(2))
        .map(FileRef::new)
        .map_err(|_| CoreError::journal_corruption(position, "negative file ref"))?;
    let block_id = match field(3) {
        NO_BLOCK => None,
        raw => Some(BlockId::new(u32::try_from(raw).map_err(|_| {
            CoreError::journal_corruption(position, format!("bad block id {raw}"))
        })?)),
    };
    Ok(Header {
        entry_type,
        capacity,
        file_ref,
        block_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_codes_are_stable() {
        let all = [
            JournalEntryType::Block,
            JournalEntryType::Buffer,
            JournalEntryType::Object,
            JournalEntryType::Commit,
            JournalEntryType::Abort,
            JournalEntryType::Checkpoint,
        ];
        for (i, t) in all.into_iter().enumerate() {
            assert_eq!(t.code(), i as i32 + 1);
            assert_eq!(JournalEntryType::from_code(t.code()), Some(t));
        }
        assert_eq!(JournalEntryType::from_code(0), None);
        assert_eq!(JournalEntryType::from_code(7), None);
    }

    #[test]
    fn encoded_layout() {
        let data = encode(JournalEntryType::Block, FileRef::TRIPLES, Some(BlockId::new(9)), &[0xAB; 3]).unwrap();
        assert_eq!(data.len(), ENTRY_OVERHEAD + 3);
        assert_eq!(&data[0..4], &1i32.to_le_bytes());
        assert_eq!(&data[4..8], &3i32.to_le_bytes());
        assert_eq!(&data[8..12], &1i32.to_le_bytes());
        assert_eq!(&data[12..16], &9i32.to_le_bytes());
        let crc = crc32fast::hash(&data[..HEADER_SIZE + 3]);
        assert_eq!(&data[HEADER_SIZE + 3..], &crc.to_le_bytes());
    }

    #[test]
    fn commit_has_no_block() {
        let data = encode(JournalEntryType::Commit, FileRef::NONE, None, &[]).unwrap();
        let header = decode_header(0, &data).unwrap();
        assert_eq!(header.entry_type, JournalEntryType::Commit);
        assert_eq!(header.capacity, 0);
        assert!(header.block_id.is_none());
        assert!(header.file_ref.is_none());
    }

    #[test]
    fn unknown_type_is_corruption() {
        let mut data = encode(JournalEntryType::Commit, FileRef::NONE, None, &[]).unwrap();
        data[0] = 42;
        let err = decode_header(128, &data).err().unwrap();
        assert!(matches!(err, CoreError::JournalCorruption { position: 128, .. }));
    }
}
