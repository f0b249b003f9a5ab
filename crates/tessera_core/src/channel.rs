//! Whole-buffer state files.
//!
//! A buffer channel holds one small byte buffer that is always read and
//! written whole, such as a table header. Writers see it through a
//! [`BufferChannelJournal`], which keeps the new contents private until
//! prepare and then journals them as one `Buffer` entry.

use crate::error::{CoreError, CoreResult};
use crate::journal::{Journal, JournalEntryType};
use crate::transaction::{Transaction, TransactionLifecycle};
use crate::types::FileRef;
use parking_lot::Mutex;
use std::sync::Arc;
use tessera_storage::StorageBackend;
use tracing::debug;

/// A file read and written as a single buffer.
pub trait BufferChannel: Send + Sync {
    /// Returns the whole contents.
    fn read_all(&self) -> CoreResult<Vec<u8>>;

    /// Replaces the whole contents.
    fn write_all(&self, bytes: &[u8]) -> CoreResult<()>;

    /// Length of the contents.
    fn size(&self) -> CoreResult<u64>;

    /// Forces the contents to stable storage.
    fn sync(&self) -> CoreResult<()>;

    /// Short label for logs.
    fn label(&self) -> String;
}

/// Buffer channel over a storage backend.
pub struct BufferChannelStorage {
    label: String,
    backend: Mutex<Box<dyn StorageBackend>>,
}

impl BufferChannelStorage {
    /// Creates a channel over `backend`.
    pub fn new(label: impl Into<String>, backend: Box<dyn StorageBackend>) -> Self {
        Self {
            label: label.into(),
            backend: Mutex::new(backend),
        }
    }
}

impl BufferChannel for BufferChannelStorage {
    fn read_all(&self) -> CoreResult<Vec<u8>> {
        let backend = self.backend.lock();
        let size = usize::try_from(backend.size()?)
            .map_err(|_| CoreError::invalid_format(format!("{} too large", self.label)))?;
        Ok(backend.read_at(0, size)?)
    }

    fn write_all(&self, bytes: &[u8]) -> CoreResult<()> {
        let mut backend = self.backend.lock();
        backend.write_at(0, bytes)?;
        backend.truncate(bytes.len() as u64)?;
        Ok(())
    }

    fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.lock().size()?)
    }

    fn sync(&self) -> CoreResult<()> {
        self.backend.lock().sync()?;
        Ok(())
    }

    fn label(&self) -> String {
        self.label.clone()
    }
}

#[derive(Default)]
struct PendingBuffer {
    bytes: Option<Vec<u8>>,
    writable: bool,
}

/// A write transaction's view of a buffer channel.
pub struct BufferChannelJournal {
    file_ref: FileRef,
    base: Arc<dyn BufferChannel>,
    journal: Arc<Journal>,
    pending: Mutex<PendingBuffer>,
}

impl BufferChannelJournal {
    /// Creates a view over `base` that journals to `journal`.
    #[must_use]
    pub fn new(file_ref: FileRef, base: Arc<dyn BufferChannel>, journal: Arc<Journal>) -> Self {
        Self {
            file_ref,
            base,
            journal,
            pending: Mutex::new(PendingBuffer::default()),
        }
    }

    /// Whether this transaction replaced the contents.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.pending.lock().bytes.is_some()
    }
}

impl BufferChannel for BufferChannelJournal {
    fn read_all(&self) -> CoreResult<Vec<u8>> {
        if let Some(bytes) = &self.pending.lock().bytes {
            return Ok(bytes.clone());
        }
        self.base.read_all()
    }

    fn write_all(&self, bytes: &[u8]) -> CoreResult<()> {
        let mut pending = self.pending.lock();
        if !pending.writable {
            return Err(CoreError::invalid_operation(format!(
                "{} is not open for writing",
                self.label()
            )));
        }
        pending.bytes = Some(bytes.to_vec());
        Ok(())
    }

    fn size(&self) -> CoreResult<u64> {
        if let Some(bytes) = &self.pending.lock().bytes {
            return Ok(bytes.len() as u64);
        }
        self.base.size()
    }

    fn sync(&self) -> CoreResult<()> {
        Ok(())
    }

    fn label(&self) -> String {
        format!("journal[{}]({})", self.file_ref, self.base.label())
    }
}

impl TransactionLifecycle for BufferChannelJournal {
    fn name(&self) -> String {
        self.label()
    }

    fn begin(&self, _txn: &Transaction) -> CoreResult<()> {
        let mut pending = self.pending.lock();
        pending.bytes = None;
        pending.writable = true;
        Ok(())
    }

    fn abort(&self, _txn: &Transaction) -> CoreResult<()> {
        let mut pending = self.pending.lock();
        pending.bytes = None;
        pending.writable = false;
        Ok(())
    }

    fn commit_prepare(&self, txn: &Transaction) -> CoreResult<()> {
        let mut pending = self.pending.lock();
        pending.writable = false;
        if let Some(bytes) = &pending.bytes {
            self.journal.write_buffer(JournalEntryType::Buffer, self.file_ref, bytes)?;
            debug!(txn = %txn.id(), file = %self.file_ref, len = bytes.len(), "journaled buffer");
        }
        Ok(())
    }

    fn commit_enact(&self, _txn: &Transaction) -> CoreResult<()> {
        Ok(())
    }

    fn commit_clearup(&self, _txn: &Transaction) -> CoreResult<()> {
        let mut pending = self.pending.lock();
        pending.bytes = None;
        pending.writable = false;
        Ok(())
    }
}

/// Read-only buffer channel handed to read transactions.
pub struct BufferChannelReadonly {
    inner: Arc<dyn BufferChannel>,
}

impl BufferChannelReadonly {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: Arc<dyn BufferChannel>) -> Self {
        Self { inner }
    }
}

impl BufferChannel for BufferChannelReadonly {
    fn read_all(&self) -> CoreResult<Vec<u8>> {
        self.inner.read_all()
    }

    fn write_all(&self, _bytes: &[u8]) -> CoreResult<()> {
        Err(CoreError::invalid_operation(format!(
            "write on read-only {}",
            self.inner.label()
        )))
    }

    fn size(&self) -> CoreResult<u64> {
        self.inner.size()
    }

    fn sync(&self) -> CoreResult<()> {
        Ok(())
    }

    fn label(&self) -> String {
        format!("readonly({})", self.inner.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_storage::InMemoryBackend;

    #[test]
    fn storage_channel_replaces_contents() {
        let channel = BufferChannelStorage::new("state", Box::new(InMemoryBackend::new()));
        channel.write_all(b"longer contents").unwrap();
        channel.write_all(b"short").unwrap();
        assert_eq!(channel.read_all().unwrap(), b"short");
        assert_eq!(channel.size().unwrap(), 5);
    }

    #[test]
    fn journal_channel_is_private_until_replay() {
        let base: Arc<dyn BufferChannel> =
            Arc::new(BufferChannelStorage::new("state", Box::new(InMemoryBackend::new())));
        base.write_all(b"v1").unwrap();
        let journal = Arc::new(Journal::new(Box::new(InMemoryBackend::new())));
        let view = BufferChannelJournal::new(FileRef::TRIPLES_STATE, Arc::clone(&base), Arc::clone(&journal));
        let txn = Transaction::detached_for_tests();

        view.begin(&txn).unwrap();
        view.write_all(b"v2").unwrap();
        assert_eq!(view.read_all().unwrap(), b"v2");
        assert_eq!(base.read_all().unwrap(), b"v1");

        view.commit_prepare(&txn).unwrap();
        let entry = journal.read_journal(0).unwrap();
        assert_eq!(entry.entry_type, JournalEntryType::Buffer);
        assert_eq!(entry.file_ref, FileRef::TRIPLES_STATE);
        assert_eq!(entry.payload, b"v2");
        assert!(view.write_all(b"v3").is_err());
    }

    #[test]
    fn clean_channel_journals_nothing() {
        let base: Arc<dyn BufferChannel> =
            Arc::new(BufferChannelStorage::new("state", Box::new(InMemoryBackend::new())));
        let journal = Arc::new(Journal::new(Box::new(InMemoryBackend::new())));
        let view = BufferChannelJournal::new(FileRef::TRIPLES_STATE, base, Arc::clone(&journal));
        let txn = Transaction::detached_for_tests();
        view.begin(&txn).unwrap();
        view.commit_prepare(&txn).unwrap();
        assert!(journal.is_empty().unwrap());
        assert!(!view.is_dirty());
    }

    #[test]
    fn readonly_refuses_writes() {
        let base: Arc<dyn BufferChannel> =
            Arc::new(BufferChannelStorage::new("state", Box::new(InMemoryBackend::new())));
        let view = BufferChannelReadonly::new(base);
        assert!(view.write_all(b"x").is_err());
        assert!(view.read_all().unwrap().is_empty());
    }
}
