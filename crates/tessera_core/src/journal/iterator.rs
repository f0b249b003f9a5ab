//! Forward iteration over journal entries.

use super::entry::JournalEntry;
use super::writer::Journal;
use crate::error::CoreResult;

/// Lazy, forward-only sequence of journal entries.
///
/// The end of the file is re-read before each step, so entries appended
/// while iterating are picked up. An error ends the sequence after it is
/// yielded. To restart, build a new iterator from a saved position.
pub struct JournalEntries<'a> {
    journal: &'a Journal,
    position: u64,
    finished: bool,
}

impl<'a> JournalEntries<'a> {
    pub(crate) fn new(journal: &'a Journal, start: u64) -> Self {
        Self {
            journal,
            position: start,
            finished: false,
        }
    }

    /// Offset of the next entry to read.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.position
    }
}

impl Iterator for JournalEntries<'_> {
    type Item = CoreResult<JournalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let end = match self.journal.size() {
            Ok(end) => end,
            Err(e) => {
                self.finished = true;
                return Some(Err(e));
            }
        };
        if self.position >= end {
            return None;
        }
        match self.journal.read_journal(self.position) {
            Ok(entry) => {
                self.position = entry.end_position;
                Some(Ok(entry))
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::journal::{Journal, JournalEntryType};
    use crate::types::FileRef;
    use tessera_storage::InMemoryBackend;

    #[test]
    fn sees_growth_between_steps() {
        let journal = Journal::new(Box::new(InMemoryBackend::new()));
        journal.write_buffer(JournalEntryType::Buffer, FileRef::TRIPLES_STATE, b"a").unwrap();

        let mut entries = journal.entries();
        assert!(entries.next().unwrap().is_ok());
        journal.write(JournalEntryType::Commit, FileRef::NONE, None).unwrap();
        let commit = entries.next().unwrap().unwrap();
        assert_eq!(commit.entry_type, JournalEntryType::Commit);
        assert!(entries.next().is_none());
    }

    #[test]
    fn restart_from_saved_position() {
        let journal = Journal::new(Box::new(InMemoryBackend::new()));
        journal.write_buffer(JournalEntryType::Buffer, FileRef::TRIPLES_STATE, b"one").unwrap();
        journal.write_buffer(JournalEntryType::Buffer, FileRef::TRIPLES_STATE, b"two").unwrap();

        let mut entries = journal.entries();
        entries.next();
        let resume = entries.position();
        let rest: Vec<_> = journal.entries_from(resume).map(|e| e.unwrap().payload).collect();
        assert_eq!(rest, vec![b"two".to_vec()]);
    }

    #[test]
    fn error_ends_iteration() {
        let backend = InMemoryBackend::new();
        let journal = Journal::new(Box::new(backend.clone()));
        journal.write_buffer(JournalEntryType::Buffer, FileRef::TRIPLES_STATE, b"ok").unwrap();
        let mut bytes = backend.data();
        bytes.extend_from_slice(&[0xFF; 7]);
        backend.set_data(bytes);

        let results: Vec<_> = journal.entries().collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
    }
}
