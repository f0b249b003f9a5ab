//! # Tessera Storage
//!
//! Byte stores that sit underneath every Tessera file: the journal, block
//! files, buffer channels and node object files.
//!
//! Backends are **opaque**: they know nothing about journal entries, blocks
//! or node encodings. The core crate owns every on-disk format.
//!
//! ## Backends
//!
//! - [`InMemoryBackend`] - shared, clonable in-memory bytes (tests, in-memory datasets)
//! - [`FileBackend`] - OS files with `fsync` durability
//!
//! ## Example
//!
//! ```rust
//! use tessera_storage::{InMemoryBackend, StorageBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"block image").unwrap();
//! backend.write_at(offset, b"BLOCK").unwrap();
//! assert_eq!(backend.read_at(offset, 11).unwrap(), b"BLOCK image");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
