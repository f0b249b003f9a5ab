//! Read-only block view handed to read transactions.

use super::{Block, BlockMgr};
use crate::error::{CoreError, CoreResult};
use crate::types::BlockId;
use std::sync::Arc;

/// Wraps a block manager so that every write path fails.
///
/// Blocks come back as read-only handles, so a reader cannot mutate a
/// buffer it shares with the base or with a queued writer's view.
pub struct BlockMgrReadonly {
    inner: Arc<dyn BlockMgr>,
}

impl BlockMgrReadonly {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: Arc<dyn BlockMgr>) -> Self {
        Self { inner }
    }

    fn refuse<T>(&self, op: &str) -> CoreResult<T> {
        Err(CoreError::invalid_operation(format!(
            "{op} on read-only {}",
            self.inner.label()
        )))
    }
}

impl BlockMgr for BlockMgrReadonly {
    fn block_size(&self) -> usize {
        self.inner.block_size()
    }

    fn allocate(&self, _size: usize) -> CoreResult<Block> {
        self.refuse("allocate")
    }

    fn get_read(&self, id: BlockId) -> CoreResult<Block> {
        Ok(self.inner.get_read(id)?.read_only_view())
    }

    fn get_read_iterator(&self, id: BlockId) -> CoreResult<Block> {
        Ok(self.inner.get_read_iterator(id)?.read_only_view())
    }

    fn get_write(&self, _id: BlockId) -> CoreResult<Block> {
        self.refuse("get_write")
    }

    fn promote(&self, _block: &Block) -> CoreResult<Block> {
        self.refuse("promote")
    }

    fn write(&self, _block: &Block) -> CoreResult<()> {
        self.refuse("write")
    }

    fn overwrite(&self, _block: &Block) -> CoreResult<()> {
        self.refuse("overwrite")
    }

    fn free(&self, _block: &Block) -> CoreResult<()> {
        self.refuse("free")
    }

    fn release(&self, block: &Block) {
        self.inner.release(block);
    }

    fn valid(&self, id: BlockId) -> bool {
        self.inner.valid(id)
    }

    fn sync(&self) -> CoreResult<()> {
        Ok(())
    }

    fn begin_read(&self) {
        self.inner.begin_read();
    }

    fn end_read(&self) {
        self.inner.end_read();
    }

    fn begin_iterator(&self) {
        self.inner.begin_iterator();
    }

    fn end_iterator(&self) {
        self.inner.end_iterator();
    }

    fn label(&self) -> String {
        format!("readonly({})", self.inner.label())
    }
}
