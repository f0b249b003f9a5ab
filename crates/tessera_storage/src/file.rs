//! File-based storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A byte store backed by one OS file.
///
/// - `flush()` hands buffered data to the OS
/// - `sync()` calls `File::sync_all()`; this is what makes a journal commit durable
///
/// ```no_run
/// use tessera_storage::{FileBackend, StorageBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::open(Path::new("journal.jrnl")).unwrap();
/// backend.append(b"entry").unwrap();
/// backend.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    inner: Mutex<FileState>,
}

#[derive(Debug)]
struct FileState {
    file: File,
    size: u64,
}

impl FileBackend {
    /// Opens or creates the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(FileState { file, size }),
        })
    }

    /// Opens the file at `path`, discarding any existing contents.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or truncated.
    pub fn create_empty(path: &Path) -> StorageResult<Self> {
        let backend = Self::open(path)?;
        {
            let mut state = backend.inner.lock();
            state.file.set_len(0)?;
            state.size = 0;
        }
        Ok(backend)
    }

    /// Opens the file, creating parent directories first.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or the file cannot be opened.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Returns the path of the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let mut state = self.inner.lock();
        let size = state.size;
        if offset.saturating_add(len as u64) > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }
        if len == 0 {
            return Ok(Vec::new());
        }
        state.file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; len];
        state.file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let mut state = self.inner.lock();
        let offset = state.size;
        if data.is_empty() {
            return Ok(offset);
        }
        state.file.seek(SeekFrom::Start(offset))?;
        state.file.write_all(data)?;
        state.size += data.len() as u64;
        Ok(offset)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        let mut state = self.inner.lock();
        if data.is_empty() {
            return Ok(());
        }
        state.file.seek(SeekFrom::Start(offset))?;
        state.file.write_all(data)?;
        state.size = state.size.max(offset + data.len() as u64);
        Ok(())
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.inner.lock().file.flush()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.inner.lock().size)
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.inner.lock().file.sync_all()?;
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut state = self.inner.lock();
        if new_size > state.size {
            return Err(StorageError::TruncateBeyondEnd {
                requested: new_size,
                size: state.size,
            });
        }
        state.file.set_len(new_size)?;
        state.file.sync_all()?;
        state.size = new_size;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_new_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("triples.dat");
        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 0);
        assert!(path.exists());
    }

    #[test]
    fn append_then_read() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::open(&dir.path().join("a.bin")).unwrap();
        assert_eq!(backend.append(b"hello").unwrap(), 0);
        assert_eq!(backend.append(b" world").unwrap(), 5);
        assert_eq!(backend.read_at(0, 11).unwrap(), b"hello world");
        assert_eq!(backend.read_at(6, 5).unwrap(), b"world");
    }

    #[test]
    fn write_at_past_end_extends() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::open(&dir.path().join("blocks.dat")).unwrap();
        backend.write_at(8, b"page").unwrap();
        assert_eq!(backend.size().unwrap(), 12);
        assert_eq!(backend.read_at(0, 12).unwrap(), b"\0\0\0\0\0\0\0\0page");
    }

    #[test]
    fn append_after_write_at_lands_at_end() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::open(&dir.path().join("mixed.bin")).unwrap();
        backend.append(b"0123456789").unwrap();
        backend.write_at(2, b"xx").unwrap();
        assert_eq!(backend.append(b"!").unwrap(), 10);
        assert_eq!(backend.read_at(0, 11).unwrap(), b"01xx456789!");
    }

    #[test]
    fn read_past_end_fails() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::open(&dir.path().join("short.bin")).unwrap();
        backend.append(b"hello").unwrap();
        assert!(matches!(
            backend.read_at(10, 5),
            Err(StorageError::ReadPastEnd { .. })
        ));
    }

    #[test]
    fn contents_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("durable.bin");
        {
            let mut backend = FileBackend::open(&path).unwrap();
            backend.append(b"persistent data").unwrap();
            backend.sync().unwrap();
        }
        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 15);
        assert_eq!(backend.read_at(0, 15).unwrap(), b"persistent data");
    }

    #[test]
    fn create_empty_discards_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nodes.dat-jrnl");
        {
            let mut backend = FileBackend::open(&path).unwrap();
            backend.append(b"stale").unwrap();
        }
        let backend = FileBackend::create_empty(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 0);
    }

    #[test]
    fn truncate_then_append() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::open(&dir.path().join("t.bin")).unwrap();
        backend.append(b"abcdef").unwrap();
        backend.truncate(2).unwrap();
        assert_eq!(backend.append(b"Z").unwrap(), 2);
        assert_eq!(backend.read_at(0, 3).unwrap(), b"abZ");
    }

    #[test]
    fn nested_dirs_are_created() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("db").join("journal.jrnl");
        let backend = FileBackend::open_with_create_dirs(&path).unwrap();
        assert_eq!(backend.path(), path);
    }
}
