//! Base storage and per-transaction storage views.

mod config;
mod triple_table;

pub use config::StoreConfig;
pub use triple_table::{Triple, TripleIter, TripleTable, TRIPLE_RECORD_SIZE};

use crate::block::{AllocatorKind, BlockMgr, BlockMgrJournal, BlockMgrReadonly, BlockMgrStorage};
use crate::channel::{BufferChannel, BufferChannelJournal, BufferChannelReadonly, BufferChannelStorage};
use crate::config::Config;
use crate::error::CoreResult;
use crate::journal::Journal;
use crate::location::{AttachedLocation, NODES_DELTA_FILE, NODES_FILE, TRIPLES_FILE, TRIPLES_STATE_FILE};
use crate::node::{NodeTable, NodeTableNative, NodeTableReadonly, NodeTableTrans, ObjectFile};
use crate::transaction::TransactionLifecycle;
use crate::types::FileRef;
use std::sync::Arc;

/// The storage a transaction works against.
///
/// Readers get read-only wrappers; writers get journaling overlays. In
/// both cases the block manager and state channel underneath may be the
/// base files or the view of a committed writer still waiting for flush.
#[derive(Clone)]
pub struct StorageView {
    blocks: Arc<dyn BlockMgr>,
    state: Arc<dyn BufferChannel>,
    nodes: Arc<dyn NodeTable>,
    triples: TripleTable,
}

impl StorageView {
    /// Block manager for triple blocks.
    #[must_use]
    pub fn blocks(&self) -> &Arc<dyn BlockMgr> {
        &self.blocks
    }

    /// Triple table header channel.
    #[must_use]
    pub fn state(&self) -> &Arc<dyn BufferChannel> {
        &self.state
    }

    /// Node table.
    #[must_use]
    pub fn nodes(&self) -> &Arc<dyn NodeTable> {
        &self.nodes
    }

    /// Triple table.
    #[must_use]
    pub fn triples(&self) -> &TripleTable {
        &self.triples
    }
}

/// A writer's view plus the components that take part in its commit.
pub struct WriterView {
    /// The storage view.
    pub view: StorageView,
    /// Components in commit order.
    pub components: Vec<Arc<dyn TransactionLifecycle>>,
}

/// The shared base files of a dataset.
pub struct BaseStore {
    blocks: Arc<BlockMgrStorage>,
    state: Arc<BufferChannelStorage>,
    nodes: Arc<NodeTableNative>,
    node_delta: Arc<ObjectFile>,
    routing: StoreConfig,
    allocator: AllocatorKind,
}

impl BaseStore {
    /// Opens the base files at `location`.
    pub fn open(location: &AttachedLocation, config: &Config) -> CoreResult<Self> {
        let blocks = Arc::new(BlockMgrStorage::open(
            TRIPLES_FILE,
            location.open_backend(TRIPLES_FILE)?,
            config.block_size,
            config.allocator,
        )?);
        let state = Arc::new(BufferChannelStorage::new(
            TRIPLES_STATE_FILE,
            location.open_backend(TRIPLES_STATE_FILE)?,
        ));
        let nodes = Arc::new(NodeTableNative::open(ObjectFile::open(
            NODES_FILE,
            location.open_backend(NODES_FILE)?,
        )?)?);
        let node_delta = Arc::new(ObjectFile::open(
            NODES_DELTA_FILE,
            location.open_backend(NODES_DELTA_FILE)?,
        )?);
        let routing = StoreConfig::new(config.allocator)
            .with_block_mgr(FileRef::TRIPLES, Arc::clone(&blocks) as Arc<dyn BlockMgr>)
            .with_channel(FileRef::TRIPLES_STATE, Arc::clone(&state) as Arc<dyn BufferChannel>);
        Ok(Self {
            blocks,
            state,
            nodes,
            node_delta,
            routing,
            allocator: config.allocator,
        })
    }

    /// Replay routing for the base files.
    #[must_use]
    pub fn routing(&self) -> &StoreConfig {
        &self.routing
    }

    /// The base block manager.
    #[must_use]
    pub fn blocks(&self) -> Arc<dyn BlockMgr> {
        Arc::clone(&self.blocks) as Arc<dyn BlockMgr>
    }

    /// The base header channel.
    #[must_use]
    pub fn state(&self) -> Arc<dyn BufferChannel> {
        Arc::clone(&self.state) as Arc<dyn BufferChannel>
    }

    /// The base node table.
    #[must_use]
    pub fn nodes(&self) -> &Arc<NodeTableNative> {
        &self.nodes
    }

    /// The writers' node delta file.
    #[must_use]
    pub fn node_delta(&self) -> &Arc<ObjectFile> {
        &self.node_delta
    }

    /// Drops any node delta left by a writer that never committed.
    pub fn discard_node_delta(&self) -> CoreResult<u64> {
        let len = self.node_delta.len()?;
        if len > 0 {
            self.node_delta.truncate(0)?;
            self.node_delta.sync()?;
        }
        Ok(len)
    }

    /// Builds a read-only view over `blocks` and `state`.
    pub fn reader_view(
        &self,
        blocks: Arc<dyn BlockMgr>,
        state: Arc<dyn BufferChannel>,
    ) -> CoreResult<StorageView> {
        let blocks: Arc<dyn BlockMgr> = Arc::new(BlockMgrReadonly::new(blocks));
        let state: Arc<dyn BufferChannel> = Arc::new(BufferChannelReadonly::new(state));
        let nodes: Arc<dyn NodeTable> =
            Arc::new(NodeTableReadonly::new(Arc::clone(&self.nodes) as Arc<dyn NodeTable>));
        let triples = TripleTable::open(Arc::clone(&blocks), Arc::clone(&state))?;
        Ok(StorageView {
            blocks,
            state,
            nodes,
            triples,
        })
    }

    /// Builds a journaling view over `blocks` and `state`.
    ///
    /// Components are ordered nodes first, so node ids are in the base
    /// before any block that refers to them is journaled.
    pub fn writer_view(
        &self,
        blocks: Arc<dyn BlockMgr>,
        state: Arc<dyn BufferChannel>,
        journal: &Arc<Journal>,
    ) -> CoreResult<WriterView> {
        let block_journal = Arc::new(BlockMgrJournal::new(
            FileRef::TRIPLES,
            blocks,
            Arc::clone(journal),
            self.allocator,
        ));
        let state_journal = Arc::new(BufferChannelJournal::new(
            FileRef::TRIPLES_STATE,
            state,
            Arc::clone(journal),
        ));
        let nodes = Arc::new(NodeTableTrans::new(
            Arc::clone(&self.nodes),
            Arc::clone(&self.node_delta),
        ));

        let blocks: Arc<dyn BlockMgr> = Arc::clone(&block_journal) as Arc<dyn BlockMgr>;
        let state: Arc<dyn BufferChannel> = Arc::clone(&state_journal) as Arc<dyn BufferChannel>;
        let triples = TripleTable::open(Arc::clone(&blocks), Arc::clone(&state))?;
        let components: Vec<Arc<dyn TransactionLifecycle>> = vec![
            Arc::clone(&nodes) as Arc<dyn TransactionLifecycle>,
            block_journal as Arc<dyn TransactionLifecycle>,
            state_journal as Arc<dyn TransactionLifecycle>,
        ];
        Ok(WriterView {
            view: StorageView {
                blocks,
                state,
                nodes: nodes as Arc<dyn NodeTable>,
                triples,
            },
            components,
        })
    }

    /// Forces every base file to stable storage.
    pub fn sync_all(&self) -> CoreResult<()> {
        self.routing.sync_all()?;
        self.nodes.sync()
    }
}
