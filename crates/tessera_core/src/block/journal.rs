//! Copy-on-write block view for one write transaction.

use super::{AllocatorKind, Block, BlockMgr};
use crate::error::{CoreError, CoreResult};
use crate::journal::{Journal, JournalEntryType};
use crate::transaction::{Transaction, TransactionLifecycle};
use crate::types::{BlockId, FileRef};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Default)]
struct JournalBlocks {
    read_blocks: BTreeSet<BlockId>,
    iterator_blocks: BTreeSet<BlockId>,
    write_blocks: BTreeMap<BlockId, Block>,
    freed_blocks: BTreeMap<BlockId, Block>,
    open_iterators: usize,
    writable: bool,
}

impl JournalBlocks {
    fn reset(&mut self) {
        self.read_blocks.clear();
        self.iterator_blocks.clear();
        self.write_blocks.clear();
        self.freed_blocks.clear();
        self.open_iterators = 0;
    }
}

/// A write transaction's view of a shared block manager.
///
/// Blocks fetched for writing are replicated into a private map, so the
/// base never changes and abort only has to drop the map. At prepare every
/// replica goes to the journal as a `Block` entry tagged with this
/// manager's file ref. The base is updated later by journal replay.
///
/// After commit the view stays readable: while the transaction waits in
/// the flush queue it serves as the base for the next transactions.
pub struct BlockMgrJournal {
    file_ref: FileRef,
    base: Arc<dyn BlockMgr>,
    journal: Arc<Journal>,
    allocator: AllocatorKind,
    state: Mutex<JournalBlocks>,
}

impl BlockMgrJournal {
    /// Creates a view over `base` that journals to `journal`.
    #[must_use]
    pub fn new(
        file_ref: FileRef,
        base: Arc<dyn BlockMgr>,
        journal: Arc<Journal>,
        allocator: AllocatorKind,
    ) -> Self {
        Self {
            file_ref,
            base,
            journal,
            allocator,
            state: Mutex::new(JournalBlocks::default()),
        }
    }

    /// File ref written into journal entries.
    #[must_use]
    pub fn file_ref(&self) -> FileRef {
        self.file_ref
    }

    /// Ids of blocks held privately, in id order.
    #[must_use]
    pub fn written_ids(&self) -> Vec<BlockId> {
        self.state.lock().write_blocks.keys().copied().collect()
    }

    /// Ids fetched from the base for reading.
    #[must_use]
    pub fn read_ids(&self) -> Vec<BlockId> {
        let state = self.state.lock();
        state.read_blocks.union(&state.iterator_blocks).copied().collect()
    }

    /// Ids freed by this transaction.
    #[must_use]
    pub fn freed_ids(&self) -> Vec<BlockId> {
        self.state.lock().freed_blocks.keys().copied().collect()
    }

    fn check_writable(&self, state: &JournalBlocks) -> CoreResult<()> {
        if state.writable {
            Ok(())
        } else {
            Err(CoreError::invalid_operation(format!(
                "{} is not open for writing",
                self.label()
            )))
        }
    }

    fn check_not_freed(state: &JournalBlocks, id: BlockId) -> CoreResult<()> {
        if state.freed_blocks.contains_key(&id) {
            Err(CoreError::NoSuchBlock { block_id: id })
        } else {
            Ok(())
        }
    }

    fn read_through(&self, id: BlockId, iterator: bool) -> CoreResult<Block> {
        {
            let mut state = self.state.lock();
            if let Some(block) = state.write_blocks.get(&id) {
                return Ok(block.clone());
            }
            Self::check_not_freed(&state, id)?;
            if iterator {
                state.iterator_blocks.insert(id);
            } else {
                state.read_blocks.insert(id);
            }
        }
        let block = if iterator {
            self.base.get_read_iterator(id)?
        } else {
            self.base.get_read(id)?
        };
        Ok(block.read_only_view())
    }
}

impl BlockMgr for BlockMgrJournal {
    fn block_size(&self) -> usize {
        self.base.block_size()
    }

    fn allocate(&self, size: usize) -> CoreResult<Block> {
        let writable = self.state.lock().writable;
        // Ids always come from the bottom of the stack so they stay unique.
        let id = self.base.allocate(size)?.id();
        let block = Block::new(id, self.allocator.allocate(self.block_size())?);
        if writable {
            self.state.lock().write_blocks.insert(id, block.clone());
        }
        Ok(block)
    }

    fn get_read(&self, id: BlockId) -> CoreResult<Block> {
        self.read_through(id, false)
    }

    fn get_read_iterator(&self, id: BlockId) -> CoreResult<Block> {
        self.read_through(id, true)
    }

    fn get_write(&self, id: BlockId) -> CoreResult<Block> {
        {
            let state = self.state.lock();
            self.check_writable(&state)?;
            if let Some(block) = state.write_blocks.get(&id) {
                return Ok(block.clone());
            }
            Self::check_not_freed(&state, id)?;
        }
        let replica = self.base.get_read(id)?.replicate(self.allocator)?;
        let mut state = self.state.lock();
        Ok(state.write_blocks.entry(id).or_insert(replica).clone())
    }

    fn promote(&self, block: &Block) -> CoreResult<Block> {
        let mut state = self.state.lock();
        self.check_writable(&state)?;
        if let Some(held) = state.write_blocks.get(&block.id()) {
            return Ok(held.clone());
        }
        let replica = block.replicate(self.allocator)?;
        state.write_blocks.insert(block.id(), replica.clone());
        Ok(replica)
    }

    fn write(&self, block: &Block) -> CoreResult<()> {
        let mut state = self.state.lock();
        self.check_writable(&state)?;
        if block.is_read_only() {
            return Err(CoreError::invalid_operation(format!(
                "{}: write of {} without get_write or promote",
                self.label(),
                block.id()
            )));
        }
        state.write_blocks.insert(block.id(), block.clone());
        Ok(())
    }

    fn overwrite(&self, block: &Block) -> CoreResult<()> {
        let mut state = self.state.lock();
        self.check_writable(&state)?;
        let held = if block.is_read_only() {
            block.replicate(self.allocator)?
        } else {
            block.clone()
        };
        state.write_blocks.insert(block.id(), held);
        Ok(())
    }

    fn free(&self, block: &Block) -> CoreResult<()> {
        let mut state = self.state.lock();
        self.check_writable(&state)?;
        state.write_blocks.remove(&block.id());
        state.freed_blocks.insert(block.id(), block.clone());
        Ok(())
    }

    fn valid(&self, id: BlockId) -> bool {
        let state = self.state.lock();
        if state.write_blocks.contains_key(&id) {
            return true;
        }
        !state.freed_blocks.contains_key(&id) && self.base.valid(id)
    }

    fn sync(&self) -> CoreResult<()> {
        Ok(())
    }

    fn begin_iterator(&self) {
        self.state.lock().open_iterators += 1;
    }

    fn end_iterator(&self) {
        let mut state = self.state.lock();
        state.open_iterators = state.open_iterators.saturating_sub(1);
    }

    fn label(&self) -> String {
        format!("journal[{}]({})", self.file_ref, self.base.label())
    }
}

impl TransactionLifecycle for BlockMgrJournal {
    fn name(&self) -> String {
        self.label()
    }

    fn begin(&self, _txn: &Transaction) -> CoreResult<()> {
        let mut state = self.state.lock();
        state.reset();
        state.writable = true;
        Ok(())
    }

    fn abort(&self, txn: &Transaction) -> CoreResult<()> {
        let mut state = self.state.lock();
        debug!(txn = %txn.id(), file = %self.file_ref, dropped = state.write_blocks.len(), "discarding block replicas");
        state.reset();
        state.writable = false;
        Ok(())
    }

    fn commit_prepare(&self, txn: &Transaction) -> CoreResult<()> {
        let mut state = self.state.lock();
        state.writable = false;
        if state.open_iterators > 0 {
            warn!(txn = %txn.id(), file = %self.file_ref, open = state.open_iterators, "block iterators still open at commit");
        }
        for block in state.write_blocks.values() {
            self.journal.write(JournalEntryType::Block, self.file_ref, Some(block))?;
        }
        debug!(txn = %txn.id(), file = %self.file_ref, blocks = state.write_blocks.len(), "journaled block replicas");
        Ok(())
    }

    fn commit_enact(&self, _txn: &Transaction) -> CoreResult<()> {
        // Replay of the journal applies the blocks.
        Ok(())
    }

    fn commit_clearup(&self, _txn: &Transaction) -> CoreResult<()> {
        let mut state = self.state.lock();
        state.reset();
        state.writable = false;
        Ok(())
    }
}
