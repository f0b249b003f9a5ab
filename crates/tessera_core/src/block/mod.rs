//! Fixed-size page storage.
//!
//! A [`Block`] is a handle to a page buffer. Handles are cheap to clone and
//! clones share the same bytes, so the owner of a block is whoever holds the
//! map it lives in: the base store, or one transaction's write set.
//!
//! Block managers come in layers:
//!
//! - [`BlockMgrStorage`]: pages in a storage backend, the shared base
//! - [`BlockMgrJournal`]: a writer's copy-on-write overlay on some base
//! - [`BlockMgrReadonly`]: a reader's view; every write path fails
//!
//! Only journal replay mutates the base, through [`BlockMgr::overwrite`].

mod allocator;
mod journal;
mod readonly;
mod storage;

pub use allocator::{AllocatorKind, BlockBuffer};
pub use journal::BlockMgrJournal;
pub use readonly::BlockMgrReadonly;
pub use storage::BlockMgrStorage;

use crate::error::{CoreError, CoreResult};
use crate::types::BlockId;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

struct BlockInner {
    buffer: Mutex<BlockBuffer>,
    modified: AtomicBool,
}

/// A page of a block file.
#[derive(Clone)]
pub struct Block {
    id: BlockId,
    inner: Arc<BlockInner>,
    read_only: bool,
}

impl Block {
    /// Wraps a buffer as block `id`.
    #[must_use]
    pub fn new(id: BlockId, buffer: BlockBuffer) -> Self {
        Self {
            id,
            inner: Arc::new(BlockInner {
                buffer: Mutex::new(buffer),
                modified: AtomicBool::new(false),
            }),
            read_only: false,
        }
    }

    /// Creates a heap block holding `bytes`.
    #[must_use]
    pub fn from_vec(id: BlockId, bytes: Vec<u8>) -> Self {
        Self::new(id, BlockBuffer::Heap(bytes))
    }

    /// Returns the block id.
    #[must_use]
    pub fn id(&self) -> BlockId {
        self.id
    }

    /// Returns the buffer length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.buffer.lock().len()
    }

    /// Returns true for a zero-length buffer.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs `f` over the block's bytes.
    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(&self.inner.buffer.lock())
    }

    /// Runs `f` over the block's bytes for mutation and marks it modified.
    ///
    /// Fails on a read-only handle.
    pub fn with_bytes_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> CoreResult<R> {
        if self.read_only {
            return Err(CoreError::invalid_operation(format!(
                "{} was fetched for read and cannot be modified",
                self.id
            )));
        }
        let result = f(&mut self.inner.buffer.lock());
        self.inner.modified.store(true, Ordering::Release);
        Ok(result)
    }

    /// Copies the block's bytes out.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        self.inner.buffer.lock().to_vec()
    }

    /// Whether the bytes changed since the block was fetched or replicated.
    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.inner.modified.load(Ordering::Acquire)
    }

    /// Sets the modified flag.
    pub fn set_modified(&self, modified: bool) {
        self.inner.modified.store(modified, Ordering::Release);
    }

    /// Whether mutation through this handle is refused.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Returns a handle on the same bytes that refuses mutation.
    #[must_use]
    pub fn read_only_view(&self) -> Self {
        Self {
            id: self.id,
            inner: Arc::clone(&self.inner),
            read_only: true,
        }
    }

    /// Deep-copies this block into a fresh buffer from `allocator`.
    ///
    /// The replica is writable and unmodified regardless of this handle.
    pub fn replicate(&self, allocator: AllocatorKind) -> CoreResult<Self> {
        let buffer = self.with_bytes(|bytes| allocator.copy_of(bytes))?;
        Ok(Self::new(self.id, buffer))
    }

    /// Whether two handles share one buffer.
    #[must_use]
    pub fn same_buffer(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("id", &self.id)
            .field("len", &self.len())
            .field("modified", &self.is_modified())
            .field("read_only", &self.read_only)
            .finish()
    }
}

/// Page storage with read, write, allocate and free.
///
/// All methods take `&self`; implementations synchronise internally so a
/// manager can be shared between the transaction that owns it and the
/// readers that use it as a base.
pub trait BlockMgr: Send + Sync {
    /// Size of every block.
    fn block_size(&self) -> usize;

    /// Allocates a fresh zeroed block. `size` may not exceed the block size.
    fn allocate(&self, size: usize) -> CoreResult<Block>;

    /// Fetches a block for reading.
    fn get_read(&self, id: BlockId) -> CoreResult<Block>;

    /// Fetches a block for reading on behalf of a block iterator.
    fn get_read_iterator(&self, id: BlockId) -> CoreResult<Block> {
        self.get_read(id)
    }

    /// Fetches a block for writing.
    fn get_write(&self, id: BlockId) -> CoreResult<Block>;

    /// Turns a read block into a writable one.
    fn promote(&self, block: &Block) -> CoreResult<Block>;

    /// Records a modified block.
    fn write(&self, block: &Block) -> CoreResult<()>;

    /// Writes a block without transactional tracking. Replay only.
    fn overwrite(&self, block: &Block) -> CoreResult<()>;

    /// Returns a block to the manager.
    fn free(&self, block: &Block) -> CoreResult<()>;

    /// Releases a handle obtained from this manager.
    fn release(&self, _block: &Block) {}

    /// Whether `id` names an allocated block.
    fn valid(&self, id: BlockId) -> bool;

    /// Flushes pending writes.
    fn sync(&self) -> CoreResult<()>;

    /// Flushes pending writes and forces them to stable storage.
    fn sync_force(&self) -> CoreResult<()> {
        self.sync()
    }

    /// Marks the start of a read operation.
    fn begin_read(&self) {}

    /// Marks the end of a read operation.
    fn end_read(&self) {}

    /// Marks the start of an iterator walking blocks.
    fn begin_iterator(&self) {}

    /// Marks the end of an iterator walking blocks.
    fn end_iterator(&self) {}

    /// Short label for logs.
    fn label(&self) -> String;
}
