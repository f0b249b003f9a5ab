//! Journal writer and random-access reader.

use super::entry::{decode_header, encode, JournalEntry, JournalEntryType, HEADER_SIZE};
use super::iterator::JournalEntries;
use crate::block::Block;
use crate::error::{CoreError, CoreResult};
use crate::types::{BlockId, FileRef};
use parking_lot::Mutex;
use tessera_storage::StorageBackend;

/// The append-only journal file.
///
/// Appends are serialised by an internal lock, so one writer at a time
/// produces whole entries. Reads take the same lock and never move the
/// append position.
pub struct Journal {
    backend: Mutex<Box<dyn StorageBackend>>,
}

impl Journal {
    /// Creates a journal over `backend`.
    pub fn new(backend: Box<dyn StorageBackend>) -> Self {
        Self {
            backend: Mutex::new(backend),
        }
    }

    /// Appends an entry carrying `block`'s id and bytes, or nothing.
    ///
    /// Returns the offset the entry was written at.
    ///
    /// # Errors
    ///
    /// Returns an error if the block is too large to encode or the write fails.
    pub fn write(
        &self,
        entry_type: JournalEntryType,
        file_ref: FileRef,
        block: Option<&Block>,
    ) -> CoreResult<u64> {
        match block {
            Some(block) => block.with_bytes(|bytes| self.append(entry_type, file_ref, Some(block.id()), bytes)),
            None => self.append(entry_type, file_ref, None, &[]),
        }
    }

    /// Appends an entry with a raw payload and no block id.
    pub fn write_buffer(
        &self,
        entry_type: JournalEntryType,
        file_ref: FileRef,
        payload: &[u8],
    ) -> CoreResult<u64> {
        self.append(entry_type, file_ref, None, payload)
    }

    fn append(
        &self,
        entry_type: JournalEntryType,
        file_ref: FileRef,
        block_id: Option<BlockId>,
        payload: &[u8],
    ) -> CoreResult<u64> {
        let data = encode(entry_type, file_ref, block_id, payload)?;
        let offset = self.backend.lock().append(&data)?;
        Ok(offset)
    }

    /// Reads the entry at `position`.
    ///
    /// # Errors
    ///
    /// - [`CoreError::ReadPastEnd`] if the entry runs past the end of the file
    /// - [`CoreError::ChecksumMismatch`] if the stored checksum is wrong
    /// - [`CoreError::JournalCorruption`] for an unknown type code
    pub fn read_journal(&self, position: u64) -> CoreResult<JournalEntry> {
        let backend = self.backend.lock();
        let size = backend.size()?;
        let available = size.saturating_sub(position);

        if available < HEADER_SIZE as u64 {
            return Err(CoreError::ReadPastEnd {
                position,
                needed: HEADER_SIZE as u64,
                available,
            });
        }
        let header_bytes = backend.read_at(position, HEADER_SIZE)?;
        let header = decode_header(position, &header_bytes)?;

        let needed = (HEADER_SIZE + header.capacity + 4) as u64;
        if available < needed {
            return Err(CoreError::ReadPastEnd {
                position,
                needed,
                available,
            });
        }
        let rest = backend.read_at(position + HEADER_SIZE as u64, header.capacity + 4)?;
        drop(backend);

        let (payload, crc_bytes) = rest.split_at(header.capacity);
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&header_bytes);
        hasher.update(payload);
        let actual = hasher.finalize();
        let mut raw = [0u8; 4];
        raw.copy_from_slice(crc_bytes);
        let expected = u32::from_le_bytes(raw);
        if expected != actual {
            return Err(CoreError::ChecksumMismatch {
                position,
                expected,
                actual,
            });
        }

        Ok(JournalEntry {
            entry_type: header.entry_type,
            file_ref: header.file_ref,
            block_id: header.block_id,
            payload: payload.to_vec(),
            position,
            end_position: position + needed,
        })
    }

    /// Iterates entries from the start of the journal.
    #[must_use]
    pub fn entries(&self) -> JournalEntries<'_> {
        self.entries_from(0)
    }

    /// Iterates entries from `start`.
    ///
    /// The end of the file is re-read at every step.
    #[must_use]
    pub fn entries_from(&self, start: u64) -> JournalEntries<'_> {
        JournalEntries::new(self, start)
    }

    /// Current length, which is also the next append position.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.lock().size()?)
    }

    /// Offset of the first well-formed `Commit` entry starting after `from`,
    /// found by byte search rather than by walking entry headers.
    ///
    /// Used to tell a torn tail from an unreadable entry that still has
    /// committed work behind it.
    pub fn find_commit_marker(&self, from: u64) -> CoreResult<Option<u64>> {
        let marker = encode(JournalEntryType::Commit, FileRef::NONE, None, &[])?;
        let backend = self.backend.lock();
        let start = from.saturating_add(1);
        let size = backend.size()?;
        if size <= start {
            return Ok(None);
        }
        let len = usize::try_from(size - start)
            .map_err(|_| CoreError::invalid_operation("journal tail too large to search"))?;
        let bytes = backend.read_at(start, len)?;
        Ok(bytes
            .windows(marker.len())
            .position(|window| window == marker.as_slice())
            .map(|at| start + at as u64))
    }

    /// True when the journal holds no bytes.
    pub fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.size()? == 0)
    }

    /// Pushes buffered appends to the backend.
    pub fn flush(&self) -> CoreResult<()> {
        self.backend.lock().flush()?;
        Ok(())
    }

    /// Forces appended entries to stable storage.
    pub fn sync(&self) -> CoreResult<()> {
        self.backend.lock().sync()?;
        Ok(())
    }

    /// Discards everything from `position` on.
    pub fn truncate(&self, position: u64) -> CoreResult<()> {
        self.backend.lock().truncate(position)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tessera_storage::InMemoryBackend;

    fn journal() -> (Journal, InMemoryBackend) {
        let backend = InMemoryBackend::new();
        (Journal::new(Box::new(backend.clone())), backend)
    }

    #[test]
    fn write_returns_prior_position() {
        let (journal, _) = journal();
        let block = Block::from_vec(BlockId::new(2), vec![1; 10]);
        let first = journal.write(JournalEntryType::Block, FileRef::TRIPLES, Some(&block)).unwrap();
        let second = journal.write(JournalEntryType::Commit, FileRef::NONE, None).unwrap();
        assert_eq!(first, 0);
        assert_eq!(second, 30);
        assert_eq!(journal.size().unwrap(), 50);
    }

    #[test]
    fn read_journal_at_offset() {
        let (journal, _) = journal();
        journal.write_buffer(JournalEntryType::Buffer, FileRef::TRIPLES_STATE, b"state").unwrap();
        let at = journal.write(JournalEntryType::Commit, FileRef::NONE, None).unwrap();

        let entry = journal.read_journal(at).unwrap();
        assert_eq!(entry.entry_type, JournalEntryType::Commit);
        assert_eq!(entry.position, at);
        assert_eq!(entry.end_position, journal.size().unwrap());

        let first = journal.read_journal(0).unwrap();
        assert_eq!(first.payload, b"state");
        assert_eq!(first.end_position, at);
    }

    #[test]
    fn checksum_mismatch_is_detected() {
        let (journal, backend) = journal();
        journal.write_buffer(JournalEntryType::Buffer, FileRef::TRIPLES_STATE, b"abc").unwrap();
        let mut bytes = backend.data();
        bytes[HEADER_SIZE] ^= 0xFF;
        backend.set_data(bytes);

        let err = journal.read_journal(0).unwrap_err();
        assert!(matches!(err, CoreError::ChecksumMismatch { position: 0, .. }));
    }

    #[test]
    fn partial_entry_reads_past_end() {
        let (journal, backend) = journal();
        journal.write_buffer(JournalEntryType::Buffer, FileRef::TRIPLES_STATE, &[9; 64]).unwrap();
        let mut bytes = backend.data();
        bytes.truncate(40);
        backend.set_data(bytes);

        let err = journal.read_journal(0).unwrap_err();
        assert!(matches!(err, CoreError::ReadPastEnd { needed: 84, available: 40, .. }));
        assert!(err.is_corruption());
    }

    #[test]
    fn commit_marker_search_skips_the_start_offset() {
        let (journal, _) = journal();
        let first = journal.write(JournalEntryType::Commit, FileRef::NONE, None).unwrap();
        journal.write_buffer(JournalEntryType::Buffer, FileRef::TRIPLES_STATE, b"xyz").unwrap();
        let second = journal.write(JournalEntryType::Commit, FileRef::NONE, None).unwrap();

        assert_eq!(journal.find_commit_marker(first).unwrap(), Some(second));
        assert_eq!(journal.find_commit_marker(second).unwrap(), None);
    }

    #[test]
    fn truncate_resets() {
        let (journal, _) = journal();
        journal.write(JournalEntryType::Commit, FileRef::NONE, None).unwrap();
        assert!(!journal.is_empty().unwrap());
        journal.truncate(0).unwrap();
        assert!(journal.is_empty().unwrap());
        assert_eq!(journal.entries().count(), 0);
    }

    fn entry_type_strategy() -> impl Strategy<Value = JournalEntryType> {
        prop_oneof![
            Just(JournalEntryType::Block),
            Just(JournalEntryType::Buffer),
            Just(JournalEntryType::Commit),
        ]
    }

    proptest! {
        #[test]
        fn entries_read_back_in_order(
            writes in prop::collection::vec(
                (entry_type_strategy(), 0u32..8, prop::collection::vec(any::<u8>(), 0..128)),
                0..24,
            )
        ) {
            let (journal, _) = journal();
            for (entry_type, file, payload) in &writes {
                let block = Block::from_vec(BlockId::new(*file), payload.clone());
                let block = (*entry_type == JournalEntryType::Block).then_some(&block);
                if block.is_some() {
                    journal.write(*entry_type, FileRef::new(*file), block).unwrap();
                } else {
                    journal.write_buffer(*entry_type, FileRef::new(*file), payload).unwrap();
                }
            }

            let read: Vec<JournalEntry> = journal.entries().collect::<CoreResult<_>>().unwrap();
            prop_assert_eq!(read.len(), writes.len());
            for (entry, (entry_type, file, payload)) in read.iter().zip(&writes) {
                prop_assert_eq!(entry.entry_type, *entry_type);
                prop_assert_eq!(entry.file_ref, FileRef::new(*file));
                prop_assert_eq!(&entry.payload, payload);
            }
        }
    }
}
