//! Routing from journal file refs to base storage.

use crate::block::{AllocatorKind, BlockMgr};
use crate::channel::BufferChannel;
use crate::error::{CoreError, CoreResult};
use crate::types::FileRef;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Base block managers and buffer channels, keyed by file ref.
///
/// Journal replay looks up each entry's file ref here to find what to
/// overwrite.
#[derive(Clone)]
pub struct StoreConfig {
    block_mgrs: BTreeMap<FileRef, Arc<dyn BlockMgr>>,
    channels: BTreeMap<FileRef, Arc<dyn BufferChannel>>,
    allocator: AllocatorKind,
}

impl StoreConfig {
    /// Creates an empty routing table.
    #[must_use]
    pub fn new(allocator: AllocatorKind) -> Self {
        Self {
            block_mgrs: BTreeMap::new(),
            channels: BTreeMap::new(),
            allocator,
        }
    }

    /// Registers a block manager.
    #[must_use]
    pub fn with_block_mgr(mut self, file_ref: FileRef, mgr: Arc<dyn BlockMgr>) -> Self {
        self.block_mgrs.insert(file_ref, mgr);
        self
    }

    /// Registers a buffer channel.
    #[must_use]
    pub fn with_channel(mut self, file_ref: FileRef, channel: Arc<dyn BufferChannel>) -> Self {
        self.channels.insert(file_ref, channel);
        self
    }

    /// Allocator for blocks rebuilt during replay.
    #[must_use]
    pub fn allocator(&self) -> AllocatorKind {
        self.allocator
    }

    /// Block manager for `file_ref`.
    pub fn block_mgr(&self, file_ref: FileRef) -> CoreResult<&Arc<dyn BlockMgr>> {
        self.block_mgrs
            .get(&file_ref)
            .ok_or(CoreError::UnknownFile { file_ref })
    }

    /// Buffer channel for `file_ref`.
    pub fn channel(&self, file_ref: FileRef) -> CoreResult<&Arc<dyn BufferChannel>> {
        self.channels
            .get(&file_ref)
            .ok_or(CoreError::UnknownFile { file_ref })
    }

    /// Forces every registered file to stable storage.
    pub fn sync_all(&self) -> CoreResult<()> {
        for mgr in self.block_mgrs.values() {
            mgr.sync_force()?;
        }
        for channel in self.channels.values() {
            channel.sync()?;
        }
        Ok(())
    }
}
