//! Block manager over a storage backend.

use super::{AllocatorKind, Block, BlockMgr};
use crate::error::{CoreError, CoreResult};
use crate::types::BlockId;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use tessera_storage::StorageBackend;
use tracing::debug;

/// Base block manager: block `n` lives at byte `n * block_size` of a file.
///
/// Ids are handed out from a counter seeded from the file length, so they
/// stay unique and monotonic even when transactions that allocated them
/// abort. A block that was allocated but never written reads as zeroes.
pub struct BlockMgrStorage {
    label: String,
    backend: Mutex<Box<dyn StorageBackend>>,
    block_size: usize,
    allocator: AllocatorKind,
    next_id: AtomicU32,
    active_reads: AtomicUsize,
    active_iterators: AtomicUsize,
}

impl BlockMgrStorage {
    /// Opens a block manager over `backend`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend size cannot be read, or if it is
    /// not a whole number of blocks.
    pub fn open(
        label: impl Into<String>,
        backend: Box<dyn StorageBackend>,
        block_size: usize,
        allocator: AllocatorKind,
    ) -> CoreResult<Self> {
        let label = label.into();
        if block_size == 0 {
            return Err(CoreError::invalid_operation("block size must be positive"));
        }
        let size = backend.size()?;
        if size % block_size as u64 != 0 {
            return Err(CoreError::invalid_format(format!(
                "{label}: file length {size} is not a multiple of block size {block_size}"
            )));
        }
        let blocks = u32::try_from(size / block_size as u64)
            .map_err(|_| CoreError::invalid_format(format!("{label}: too many blocks")))?;
        debug!(file = %label, blocks, block_size, "opened block file");
        Ok(Self {
            label,
            backend: Mutex::new(backend),
            block_size,
            allocator,
            next_id: AtomicU32::new(blocks),
            active_reads: AtomicUsize::new(0),
            active_iterators: AtomicUsize::new(0),
        })
    }

    /// Number of ids handed out so far.
    #[must_use]
    pub fn allocated(&self) -> u32 {
        self.next_id.load(Ordering::Acquire)
    }

    /// Allocator used for block buffers.
    #[must_use]
    pub fn allocator(&self) -> AllocatorKind {
        self.allocator
    }

    /// Readers and iterators currently registered.
    #[must_use]
    pub fn active_operations(&self) -> (usize, usize) {
        (
            self.active_reads.load(Ordering::Acquire),
            self.active_iterators.load(Ordering::Acquire),
        )
    }

    fn check_id(&self, id: BlockId) -> CoreResult<()> {
        if self.valid(id) {
            Ok(())
        } else {
            Err(CoreError::NoSuchBlock { block_id: id })
        }
    }

    fn store(&self, block: &Block) -> CoreResult<()> {
        self.check_id(block.id())?;
        if block.len() != self.block_size {
            return Err(CoreError::invalid_operation(format!(
                "{}: {} has {} bytes, expected {}",
                self.label,
                block.id(),
                block.len(),
                self.block_size
            )));
        }
        let offset = block.id().file_offset(self.block_size);
        block.with_bytes(|bytes| self.backend.lock().write_at(offset, bytes))?;
        block.set_modified(false);
        Ok(())
    }
}

impl BlockMgr for BlockMgrStorage {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn allocate(&self, size: usize) -> CoreResult<Block> {
        if size == 0 || size > self.block_size {
            return Err(CoreError::invalid_operation(format!(
                "{}: cannot allocate {size} bytes in {} byte blocks",
                self.label, self.block_size
            )));
        }
        let id = self
            .next_id
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_add(1))
            .map_err(|_| CoreError::invalid_operation(format!("{}: block ids exhausted", self.label)))?;
        Ok(Block::new(BlockId::new(id), self.allocator.allocate(self.block_size)?))
    }

    fn get_read(&self, id: BlockId) -> CoreResult<Block> {
        self.check_id(id)?;
        let offset = id.file_offset(self.block_size);
        let backend = self.backend.lock();
        let size = backend.size()?;
        // Allocated ids past the written end read as zeroes.
        let bytes = if offset + self.block_size as u64 <= size {
            backend.read_at(offset, self.block_size)?
        } else {
            vec![0; self.block_size]
        };
        drop(backend);
        Ok(Block::new(id, self.allocator.copy_of(&bytes)?))
    }

    fn get_write(&self, id: BlockId) -> CoreResult<Block> {
        self.get_read(id)
    }

    fn promote(&self, block: &Block) -> CoreResult<Block> {
        if block.is_read_only() {
            return self.get_write(block.id());
        }
        Ok(block.clone())
    }

    fn write(&self, block: &Block) -> CoreResult<()> {
        self.store(block)
    }

    fn overwrite(&self, block: &Block) -> CoreResult<()> {
        // Replay may name ids allocated by a transaction before a restart.
        let _ = self
            .next_id
            .fetch_max(block.id().as_u32().saturating_add(1), Ordering::AcqRel);
        self.store(block)
    }

    fn free(&self, block: &Block) -> CoreResult<()> {
        self.check_id(block.id())?;
        debug!(file = %self.label, block = %block.id(), "block freed");
        Ok(())
    }

    fn valid(&self, id: BlockId) -> bool {
        id.as_u32() < self.next_id.load(Ordering::Acquire)
    }

    fn sync(&self) -> CoreResult<()> {
        self.backend.lock().flush()?;
        Ok(())
    }

    fn sync_force(&self) -> CoreResult<()> {
        self.backend.lock().sync()?;
        Ok(())
    }

    fn begin_read(&self) {
        self.active_reads.fetch_add(1, Ordering::AcqRel);
    }

    fn end_read(&self) {
        let _ = self
            .active_reads
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    fn begin_iterator(&self) {
        self.active_iterators.fetch_add(1, Ordering::AcqRel);
    }

    fn end_iterator(&self) {
        let _ = self
            .active_iterators
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    fn label(&self) -> String {
        self.label.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_storage::InMemoryBackend;

    fn mgr(backend: InMemoryBackend) -> BlockMgrStorage {
        BlockMgrStorage::open("test", Box::new(backend), 16, AllocatorKind::Heap).unwrap()
    }

    #[test]
    fn allocate_is_monotonic() {
        let blocks = mgr(InMemoryBackend::new());
        let a = blocks.allocate(16).unwrap();
        let b = blocks.allocate(16).unwrap();
        assert_eq!(a.id(), BlockId::new(0));
        assert_eq!(b.id(), BlockId::new(1));
        assert!(blocks.valid(b.id()));
        assert!(!blocks.valid(BlockId::new(2)));
    }

    #[test]
    fn write_then_read_back() {
        let backend = InMemoryBackend::new();
        let blocks = mgr(backend.clone());
        let block = blocks.allocate(16).unwrap();
        block.with_bytes_mut(|b| b[3] = 42).unwrap();
        blocks.write(&block).unwrap();
        assert!(!block.is_modified());

        let read = blocks.get_read(block.id()).unwrap();
        assert_eq!(read.to_vec()[3], 42);
        assert_eq!(backend.data().len(), 16);
    }

    #[test]
    fn unwritten_allocation_reads_zero() {
        let blocks = mgr(InMemoryBackend::new());
        let first = blocks.allocate(16).unwrap();
        let second = blocks.allocate(16).unwrap();
        second.with_bytes_mut(|b| b.fill(1)).unwrap();
        blocks.write(&second).unwrap();
        assert!(blocks.get_read(first.id()).unwrap().to_vec().iter().all(|b| *b == 0));
    }

    #[test]
    fn reopen_resumes_ids() {
        let backend = InMemoryBackend::with_data(vec![0; 48]);
        let blocks = mgr(backend);
        assert_eq!(blocks.allocated(), 3);
        assert_eq!(blocks.allocate(8).unwrap().id(), BlockId::new(3));
    }

    #[test]
    fn rejects_ragged_file() {
        let backend = InMemoryBackend::with_data(vec![0; 20]);
        let result = BlockMgrStorage::open("t", Box::new(backend), 16, AllocatorKind::Heap);
        assert!(matches!(result, Err(CoreError::InvalidFormat { .. })));
    }

    #[test]
    fn overwrite_extends_id_range() {
        let blocks = mgr(InMemoryBackend::new());
        let block = Block::from_vec(BlockId::new(4), vec![5; 16]);
        blocks.overwrite(&block).unwrap();
        assert!(blocks.valid(BlockId::new(4)));
        assert_eq!(blocks.allocate(16).unwrap().id(), BlockId::new(5));
        assert_eq!(blocks.get_read(BlockId::new(4)).unwrap().to_vec(), vec![5; 16]);
    }

    #[test]
    fn oversize_allocation_fails() {
        let blocks = mgr(InMemoryBackend::new());
        assert!(blocks.allocate(17).is_err());
        assert!(blocks.get_read(BlockId::new(0)).is_err());
    }
}
