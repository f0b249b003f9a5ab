//! Triples of node ids packed into blocks.
//!
//! Records are 24 bytes (`s`, `p`, `o` as little-endian `u64`) laid out
//! densely across a list of blocks. The header lives in a buffer channel:
//!
//! ```text
//! | count (8) | block count (4) | block id (4) ... |
//! ```

use crate::block::{Block, BlockMgr};
use crate::channel::BufferChannel;
use crate::error::{CoreError, CoreResult};
use crate::types::{BlockId, NodeId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Bytes per triple record.
pub const TRIPLE_RECORD_SIZE: usize = 24;

/// A triple of node ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Triple {
    /// Subject.
    pub s: NodeId,
    /// Predicate.
    pub p: NodeId,
    /// Object.
    pub o: NodeId,
}

impl Triple {
    /// Creates a triple.
    #[must_use]
    pub const fn new(s: NodeId, p: NodeId, o: NodeId) -> Self {
        Self { s, p, o }
    }

    fn write_to(&self, out: &mut [u8]) {
        out[0..8].copy_from_slice(&self.s.as_u64().to_le_bytes());
        out[8..16].copy_from_slice(&self.p.as_u64().to_le_bytes());
        out[16..24].copy_from_slice(&self.o.as_u64().to_le_bytes());
    }

    fn read_from(bytes: &[u8]) -> Self {
        let field = |i: usize| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[i..i + 8]);
            NodeId::new(u64::from_le_bytes(raw))
        };
        Self::new(field(0), field(8), field(16))
    }

    /// Whether this triple matches a pattern where `None` is a wildcard.
    #[must_use]
    pub fn matches(&self, s: Option<NodeId>, p: Option<NodeId>, o: Option<NodeId>) -> bool {
        s.map_or(true, |s| s == self.s) && p.map_or(true, |p| p == self.p) && o.map_or(true, |o| o == self.o)
    }
}

impl fmt::Display for Triple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({} {} {})", self.s.as_u64(), self.p.as_u64(), self.o.as_u64())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct TableHeader {
    count: u64,
    blocks: Vec<BlockId>,
}

impl TableHeader {
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(12 + 4 * self.blocks.len());
        out.extend_from_slice(&self.count.to_le_bytes());
        out.extend_from_slice(&(self.blocks.len() as u32).to_le_bytes());
        for id in &self.blocks {
            out.extend_from_slice(&id.as_u32().to_le_bytes());
        }
        out
    }

    fn decode(bytes: &[u8]) -> CoreResult<Self> {
        if bytes.is_empty() {
            return Ok(Self::default());
        }
        if bytes.len() < 12 {
            return Err(CoreError::invalid_format("triple table header truncated"));
        }
        let mut raw8 = [0u8; 8];
        raw8.copy_from_slice(&bytes[0..8]);
        let count = u64::from_le_bytes(raw8);
        let mut raw4 = [0u8; 4];
        raw4.copy_from_slice(&bytes[8..12]);
        let n = u32::from_le_bytes(raw4) as usize;
        if bytes.len() != 12 + 4 * n {
            return Err(CoreError::invalid_format(format!(
                "triple table header has {} bytes for {n} blocks",
                bytes.len()
            )));
        }
        let blocks = bytes[12..]
            .chunks_exact(4)
            .map(|c| {
                raw4.copy_from_slice(c);
                BlockId::new(u32::from_le_bytes(raw4))
            })
            .collect();
        Ok(Self { count, blocks })
    }
}

struct TableInner {
    blocks: Arc<dyn BlockMgr>,
    state: Arc<dyn BufferChannel>,
    per_block: usize,
    header: Mutex<TableHeader>,
    positions: Mutex<Option<HashMap<Triple, u64>>>,
}

/// A set of triples over a block manager and a header channel.
///
/// Cheap to clone; clones share the table.
#[derive(Clone)]
pub struct TripleTable {
    inner: Arc<TableInner>,
}

impl TripleTable {
    /// Opens the table stored in `blocks` and `state`.
    pub fn open(blocks: Arc<dyn BlockMgr>, state: Arc<dyn BufferChannel>) -> CoreResult<Self> {
        let per_block = blocks.block_size() / TRIPLE_RECORD_SIZE;
        if per_block == 0 {
            return Err(CoreError::invalid_operation(format!(
                "block size {} cannot hold a triple",
                blocks.block_size()
            )));
        }
        let header = TableHeader::decode(&state.read_all()?)?;
        let capacity = header.blocks.len() as u64 * per_block as u64;
        if header.count > capacity {
            return Err(CoreError::invalid_format(format!(
                "triple table claims {} triples in {} blocks",
                header.count,
                header.blocks.len()
            )));
        }
        Ok(Self {
            inner: Arc::new(TableInner {
                blocks,
                state,
                per_block,
                header: Mutex::new(header),
                positions: Mutex::new(None),
            }),
        })
    }

    /// Number of triples.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.inner.header.lock().count
    }

    /// True when the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Blocks currently holding records.
    #[must_use]
    pub fn block_ids(&self) -> Vec<BlockId> {
        self.inner.header.lock().blocks.clone()
    }

    fn locate(&self, position: u64) -> (usize, usize) {
        let per_block = self.inner.per_block as u64;
        ((position / per_block) as usize, (position % per_block) as usize * TRIPLE_RECORD_SIZE)
    }

    fn read_at(&self, header: &TableHeader, position: u64) -> CoreResult<Triple> {
        let (index, offset) = self.locate(position);
        let block = self.inner.blocks.get_read(header.blocks[index])?;
        Ok(block.with_bytes(|b| Triple::read_from(&b[offset..offset + TRIPLE_RECORD_SIZE])))
    }

    fn write_at(&self, header: &TableHeader, position: u64, triple: &Triple) -> CoreResult<()> {
        let (index, offset) = self.locate(position);
        let block = self.inner.blocks.get_write(header.blocks[index])?;
        block.with_bytes_mut(|b| triple.write_to(&mut b[offset..offset + TRIPLE_RECORD_SIZE]))?;
        self.inner.blocks.write(&block)
    }

    fn save_header(&self, header: &TableHeader) -> CoreResult<()> {
        self.inner.state.write_all(&header.encode())
    }

    fn with_positions<R>(
        &self,
        header: &TableHeader,
        f: impl FnOnce(&mut HashMap<Triple, u64>) -> CoreResult<R>,
    ) -> CoreResult<R> {
        let mut positions = self.inner.positions.lock();
        if positions.is_none() {
            let mut map = HashMap::with_capacity(header.count as usize);
            for position in 0..header.count {
                map.insert(self.read_at(header, position)?, position);
            }
            *positions = Some(map);
        }
        match positions.as_mut() {
            Some(map) => f(map),
            None => Err(CoreError::inconsistent("triple position index missing")),
        }
    }

    /// Adds `triple`. Returns false if it was already present.
    pub fn add(&self, triple: Triple) -> CoreResult<bool> {
        let mut header = self.inner.header.lock();
        if self.with_positions(&header, |map| Ok(map.contains_key(&triple)))? {
            return Ok(false);
        }
        let position = header.count;
        let (index, _) = self.locate(position);
        if index == header.blocks.len() {
            let block = self.inner.blocks.allocate(self.inner.blocks.block_size())?;
            header.blocks.push(block.id());
        }
        self.write_at(&header, position, &triple)?;
        header.count += 1;
        self.save_header(&header)?;
        self.with_positions(&header, |map| {
            map.insert(triple, position);
            Ok(())
        })?;
        Ok(true)
    }

    /// Removes `triple`. Returns false if it was not present.
    ///
    /// The last record moves into the hole, so order is not preserved.
    pub fn delete(&self, triple: &Triple) -> CoreResult<bool> {
        let mut header = self.inner.header.lock();
        let Some(position) = self.with_positions(&header, |map| Ok(map.remove(triple)))? else {
            return Ok(false);
        };
        let last = header.count - 1;
        if position != last {
            let moved = self.read_at(&header, last)?;
            self.write_at(&header, position, &moved)?;
            self.with_positions(&header, |map| {
                map.insert(moved, position);
                Ok(())
            })?;
        }
        header.count = last;
        let needed = (header.count as usize).div_ceil(self.inner.per_block);
        while header.blocks.len() > needed {
            if let Some(id) = header.blocks.pop() {
                let block: Block = self.inner.blocks.get_write(id)?;
                self.inner.blocks.free(&block)?;
            }
        }
        self.save_header(&header)?;
        Ok(true)
    }

    /// Whether `triple` is present.
    pub fn contains(&self, triple: &Triple) -> CoreResult<bool> {
        {
            let positions = self.inner.positions.lock();
            if let Some(map) = positions.as_ref() {
                return Ok(map.contains_key(triple));
            }
        }
        for found in self.find(Some(triple.s), Some(triple.p), Some(triple.o)) {
            if found? == *triple {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Lazily scans for triples matching the pattern.
    ///
    /// The scan covers the triples present when it starts.
    #[must_use]
    pub fn find(&self, s: Option<NodeId>, p: Option<NodeId>, o: Option<NodeId>) -> TripleIter {
        let header = self.inner.header.lock().clone();
        self.inner.blocks.begin_iterator();
        TripleIter {
            table: self.clone(),
            header,
            pattern: (s, p, o),
            position: 0,
            current: None,
            done: false,
        }
    }

    /// Every triple.
    #[must_use]
    pub fn iter(&self) -> TripleIter {
        self.find(None, None, None)
    }
}

/// Lazy scan over a [`TripleTable`].
pub struct TripleIter {
    table: TripleTable,
    header: TableHeader,
    pattern: (Option<NodeId>, Option<NodeId>, Option<NodeId>),
    position: u64,
    current: Option<(usize, Block)>,
    done: bool,
}

impl TripleIter {
    fn fetch(&mut self) -> CoreResult<Option<Triple>> {
        while self.position < self.header.count {
            let (index, offset) = self.table.locate(self.position);
            self.position += 1;
            let block = match &self.current {
                Some((i, block)) if *i == index => block.clone(),
                _ => {
                    let block = self.table.inner.blocks.get_read_iterator(self.header.blocks[index])?;
                    self.current = Some((index, block.clone()));
                    block
                }
            };
            let triple = block.with_bytes(|b| Triple::read_from(&b[offset..offset + TRIPLE_RECORD_SIZE]));
            let (s, p, o) = self.pattern;
            if triple.matches(s, p, o) {
                return Ok(Some(triple));
            }
        }
        Ok(None)
    }

    fn finish(&mut self) {
        if !self.done {
            self.done = true;
            self.current = None;
            self.table.inner.blocks.end_iterator();
        }
    }
}

impl Iterator for TripleIter {
    type Item = CoreResult<Triple>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.fetch() {
            Ok(Some(triple)) => Some(Ok(triple)),
            Ok(None) => {
                self.finish();
                None
            }
            Err(e) => {
                self.finish();
                Some(Err(e))
            }
        }
    }
}

impl Drop for TripleIter {
    fn drop(&mut self) {
        self.finish();
    }
}
