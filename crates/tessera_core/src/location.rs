//! Where a dataset's files live.
//!
//! A directory dataset has this layout:
//!
//! ```text
//! <path>/
//! ├─ LOCK             # Advisory lock, one process at a time
//! ├─ journal.jrnl     # Write-ahead journal
//! ├─ triples.dat      # Triple blocks
//! ├─ triples.state    # Triple table header
//! ├─ nodes.dat        # Node records
//! └─ nodes.dat-jrnl   # A writer's private node delta
//! ```
//!
//! A memory location keeps the same files as shared in-memory buffers,
//! so a dataset reopened from the same [`Location`] sees what was written.

use crate::error::{CoreError, CoreResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tessera_storage::{FileBackend, InMemoryBackend, StorageBackend};

/// Journal file.
pub const JOURNAL_FILE: &str = "journal.jrnl";
/// Triple block file.
pub const TRIPLES_FILE: &str = "triples.dat";
/// Triple table header.
pub const TRIPLES_STATE_FILE: &str = "triples.state";
/// Node object file.
pub const NODES_FILE: &str = "nodes.dat";
/// Private node delta of the active writer.
pub const NODES_DELTA_FILE: &str = "nodes.dat-jrnl";

const LOCK_FILE: &str = "LOCK";

/// A dataset directory held under an exclusive lock.
#[derive(Debug)]
pub struct DatasetDir {
    path: PathBuf,
    _lock_file: File,
}

impl DatasetDir {
    /// Opens a dataset directory and takes its lock.
    ///
    /// # Errors
    ///
    /// - the directory is missing and `create_if_missing` is false
    /// - another process holds the lock ([`CoreError::DatasetLocked`])
    /// - I/O errors
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::invalid_format(format!(
                    "dataset directory does not exist: {}",
                    path.display()
                )));
            }
        }
        if !path.is_dir() {
            return Err(CoreError::invalid_format(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        Self::lock(&lock_file)?;

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    #[cfg(feature = "std")]
    fn lock(file: &File) -> CoreResult<()> {
        use fs2::FileExt;
        file.try_lock_exclusive().map_err(|_| CoreError::DatasetLocked)
    }

    #[cfg(not(feature = "std"))]
    fn lock(_file: &File) -> CoreResult<()> {
        Ok(())
    }

    /// The directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of a file in the directory.
    #[must_use]
    pub fn file_path(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    /// Fsyncs the directory so created files survive a crash.
    #[cfg(unix)]
    pub fn sync_directory(&self) -> CoreResult<()> {
        File::open(&self.path)?.sync_all()?;
        Ok(())
    }

    /// Directory fsync is not available here.
    #[cfg(not(unix))]
    pub fn sync_directory(&self) -> CoreResult<()> {
        Ok(())
    }
}

/// Named in-memory files that outlive any one open dataset.
#[derive(Debug, Clone, Default)]
pub struct MemoryFiles {
    files: Arc<Mutex<HashMap<String, InMemoryBackend>>>,
}

impl MemoryFiles {
    /// Returns the buffer for `name`, creating it empty.
    #[must_use]
    pub fn file(&self, name: &str) -> InMemoryBackend {
        self.files.lock().entry(name.to_string()).or_default().clone()
    }

    /// Names of the files created so far.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.files.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

/// A dataset location.
#[derive(Debug, Clone)]
pub enum Location {
    /// Files in a directory on disk.
    Directory(PathBuf),
    /// Files in memory.
    Memory(MemoryFiles),
}

impl Location {
    /// A directory location.
    pub fn directory(path: impl Into<PathBuf>) -> Self {
        Self::Directory(path.into())
    }

    /// A fresh memory location.
    #[must_use]
    pub fn memory() -> Self {
        Self::Memory(MemoryFiles::default())
    }

    /// True for memory locations.
    #[must_use]
    pub fn is_memory(&self) -> bool {
        matches!(self, Self::Memory(_))
    }

    /// Claims the location for one open dataset.
    pub fn attach(&self, create_if_missing: bool) -> CoreResult<AttachedLocation> {
        match self {
            Self::Directory(path) => Ok(AttachedLocation::Directory(DatasetDir::open(
                path,
                create_if_missing,
            )?)),
            Self::Memory(files) => Ok(AttachedLocation::Memory(files.clone())),
        }
    }
}

/// A location claimed by an open dataset; the directory lock is held
/// until this is dropped.
#[derive(Debug)]
pub enum AttachedLocation {
    /// Locked directory.
    Directory(DatasetDir),
    /// Memory files.
    Memory(MemoryFiles),
}

impl AttachedLocation {
    /// Opens the named file as a storage backend.
    pub fn open_backend(&self, name: &str) -> CoreResult<Box<dyn StorageBackend>> {
        match self {
            Self::Directory(dir) => Ok(Box::new(FileBackend::open(&dir.file_path(name))?)),
            Self::Memory(files) => Ok(Box::new(files.file(name))),
        }
    }

    /// Makes newly created files durable.
    pub fn sync(&self) -> CoreResult<()> {
        match self {
            Self::Directory(dir) => dir.sync_directory(),
            Self::Memory(_) => Ok(()),
        }
    }

    /// Human-readable description.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Directory(dir) => dir.path().display().to_string(),
            Self::Memory(_) => "memory".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_creates_directory() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("ds");
        let dir = DatasetDir::open(&path, true).unwrap();
        assert!(path.is_dir());
        assert!(path.join(LOCK_FILE).exists());
        assert_eq!(dir.file_path(JOURNAL_FILE), path.join("journal.jrnl"));
    }

    #[test]
    fn open_fails_if_missing_and_no_create() {
        let temp = tempdir().unwrap();
        let result = DatasetDir::open(&temp.path().join("missing"), false);
        assert!(matches!(result, Err(CoreError::InvalidFormat { .. })));
    }

    #[test]
    fn lock_prevents_second_open() {
        let temp = tempdir().unwrap();
        let _first = DatasetDir::open(temp.path(), true).unwrap();
        let second = DatasetDir::open(temp.path(), true);
        assert!(matches!(second, Err(CoreError::DatasetLocked)));
    }

    #[test]
    fn lock_released_on_drop() {
        let temp = tempdir().unwrap();
        drop(DatasetDir::open(temp.path(), true).unwrap());
        assert!(DatasetDir::open(temp.path(), true).is_ok());
    }

    #[test]
    fn memory_files_are_shared_between_attachments() {
        let location = Location::memory();
        let first = location.attach(true).unwrap();
        let mut backend = first.open_backend(NODES_FILE).unwrap();
        backend.append(b"abc").unwrap();

        let second = location.attach(true).unwrap();
        assert_eq!(second.open_backend(NODES_FILE).unwrap().size().unwrap(), 3);
        if let Location::Memory(files) = &location {
            assert_eq!(files.names(), vec![NODES_FILE.to_string()]);
        }
    }
}
