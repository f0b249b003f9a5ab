//! Buffer allocation for block replicas.
//!
//! A writer copies a base block into a fresh buffer before mutating it. The
//! buffer comes from one of three sources, chosen by configuration:
//!
//! - `Heap`: a growable `Vec<u8>`
//! - `Direct`: a fixed boxed slice, never reallocated
//! - `Mapped`: an anonymous memory map, kept outside the Rust heap

use crate::error::{CoreError, CoreResult};
use memmap2::MmapMut;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::str::FromStr;

/// Source of block buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AllocatorKind {
    /// Heap-allocated vector.
    #[default]
    Heap,
    /// Fixed-size boxed slice.
    Direct,
    /// Anonymous memory mapping.
    Mapped,
}

impl AllocatorKind {
    /// Parses an allocator name (`heap`, `direct` or `mapped`).
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "heap" => Some(Self::Heap),
            "direct" => Some(Self::Direct),
            "mapped" | "mmap" => Some(Self::Mapped),
            _ => None,
        }
    }

    /// Canonical name of this allocator.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Heap => "heap",
            Self::Direct => "direct",
            Self::Mapped => "mapped",
        }
    }

    /// Allocates a zero-filled buffer of `len` bytes.
    pub fn allocate(self, len: usize) -> CoreResult<BlockBuffer> {
        Ok(match self {
            Self::Heap => BlockBuffer::Heap(vec![0; len]),
            Self::Direct => BlockBuffer::Direct(vec![0; len].into_boxed_slice()),
            // Zero-length maps are rejected by the OS.
            Self::Mapped if len == 0 => BlockBuffer::Direct(Box::default()),
            Self::Mapped => BlockBuffer::Mapped(MmapMut::map_anon(len)?),
        })
    }

    /// Allocates a buffer holding a copy of `bytes`.
    pub fn copy_of(self, bytes: &[u8]) -> CoreResult<BlockBuffer> {
        if self == Self::Heap {
            return Ok(BlockBuffer::Heap(bytes.to_vec()));
        }
        let mut buffer = self.allocate(bytes.len())?;
        buffer.copy_from_slice(bytes);
        Ok(buffer)
    }
}

impl fmt::Display for AllocatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AllocatorKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s)
            .ok_or_else(|| CoreError::invalid_operation(format!("unknown block allocator: {s}")))
    }
}

/// Byte storage behind a [`Block`](super::Block).
pub enum BlockBuffer {
    /// See [`AllocatorKind::Heap`].
    Heap(Vec<u8>),
    /// See [`AllocatorKind::Direct`].
    Direct(Box<[u8]>),
    /// See [`AllocatorKind::Mapped`].
    Mapped(MmapMut),
}

impl BlockBuffer {
    /// Allocator that produced this buffer.
    #[must_use]
    pub fn kind(&self) -> AllocatorKind {
        match self {
            Self::Heap(_) => AllocatorKind::Heap,
            Self::Direct(_) => AllocatorKind::Direct,
            Self::Mapped(_) => AllocatorKind::Mapped,
        }
    }
}

impl Deref for BlockBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Self::Heap(v) => v,
            Self::Direct(b) => b,
            Self::Mapped(m) => m,
        }
    }
}

impl DerefMut for BlockBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        match self {
            Self::Heap(v) => v,
            Self::Direct(b) => b,
            Self::Mapped(m) => m,
        }
    }
}

impl fmt::Debug for BlockBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockBuffer")
            .field("kind", &self.kind())
            .field("len", &self.len())
            .finish()
    }
}
