//! Append-only file of length-prefixed records.

use crate::error::{CoreError, CoreResult};
use parking_lot::Mutex;
use tessera_storage::StorageBackend;
use tracing::warn;

const LEN_PREFIX: u64 = 4;

/// Records of `[u32 length][bytes]`, addressed by their byte offset.
///
/// Records are only ever appended. A record cut short by a crash is
/// dropped when the file is opened.
pub struct ObjectFile {
    label: String,
    backend: Mutex<Box<dyn StorageBackend>>,
}

impl ObjectFile {
    /// Opens an object file, truncating a torn final record.
    pub fn open(label: impl Into<String>, backend: Box<dyn StorageBackend>) -> CoreResult<Self> {
        let file = Self {
            label: label.into(),
            backend: Mutex::new(backend),
        };
        let valid_end = file.scan_valid_end()?;
        let size = file.len()?;
        if valid_end < size {
            warn!(file = %file.label, valid_end, size, "dropping torn record at end of object file");
            file.truncate(valid_end)?;
        }
        Ok(file)
    }

    fn scan_valid_end(&self) -> CoreResult<u64> {
        let backend = self.backend.lock();
        let size = backend.size()?;
        let mut position = 0;
        while position + LEN_PREFIX <= size {
            let len = u64::from(read_len(&backend.read_at(position, 4)?));
            if position + LEN_PREFIX + len > size {
                break;
            }
            position += LEN_PREFIX + len;
        }
        Ok(position)
    }

    /// Appends a record and returns its offset.
    pub fn write(&self, bytes: &[u8]) -> CoreResult<u64> {
        let len = u32::try_from(bytes.len())
            .map_err(|_| CoreError::invalid_operation("object record too large"))?;
        let mut record = Vec::with_capacity(bytes.len() + 4);
        record.extend_from_slice(&len.to_le_bytes());
        record.extend_from_slice(bytes);
        Ok(self.backend.lock().append(&record)?)
    }

    /// Reads the record at `offset`.
    pub fn read(&self, offset: u64) -> CoreResult<Vec<u8>> {
        let backend = self.backend.lock();
        let size = backend.size()?;
        if offset + LEN_PREFIX > size {
            return Err(CoreError::invalid_operation(format!(
                "{}: no record at offset {offset}",
                self.label
            )));
        }
        let len = read_len(&backend.read_at(offset, 4)?) as usize;
        if offset + LEN_PREFIX + len as u64 > size {
            return Err(CoreError::invalid_format(format!(
                "{}: record at {offset} runs past end of file",
                self.label
            )));
        }
        Ok(backend.read_at(offset + LEN_PREFIX, len)?)
    }

    /// Every record from `start` on, with its offset.
    pub fn records_from(&self, start: u64) -> CoreResult<Vec<(u64, Vec<u8>)>> {
        let end = self.len()?;
        let mut out = Vec::new();
        let mut position = start;
        while position < end {
            let bytes = self.read(position)?;
            let next = position + LEN_PREFIX + bytes.len() as u64;
            out.push((position, bytes));
            position = next;
        }
        Ok(out)
    }

    /// Every record with its offset.
    pub fn records(&self) -> CoreResult<Vec<(u64, Vec<u8>)>> {
        self.records_from(0)
    }

    /// Length in bytes, which is also the offset of the next record.
    pub fn len(&self) -> CoreResult<u64> {
        Ok(self.backend.lock().size()?)
    }

    /// True when the file holds no records.
    pub fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Drops everything from `len` on.
    pub fn truncate(&self, len: u64) -> CoreResult<()> {
        self.backend.lock().truncate(len)?;
        Ok(())
    }

    /// Forces appended records to stable storage.
    pub fn sync(&self) -> CoreResult<()> {
        self.backend.lock().sync()?;
        Ok(())
    }

    /// Label used in logs and errors.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }
}

fn read_len(bytes: &[u8]) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_storage::InMemoryBackend;

    #[test]
    fn offsets_address_records() {
        let file = ObjectFile::open("objs", Box::new(InMemoryBackend::new())).unwrap();
        let a = file.write(b"alpha").unwrap();
        let b = file.write(b"").unwrap();
        let c = file.write(b"gamma").unwrap();
        assert_eq!((a, b, c), (0, 9, 13));
        assert_eq!(file.read(c).unwrap(), b"gamma");
        assert!(file.read(b).unwrap().is_empty());
        assert_eq!(file.records().unwrap().len(), 3);
        assert_eq!(file.records_from(b).unwrap()[1].0, c);
    }

    #[test]
    fn torn_record_is_dropped_on_open() {
        let backend = InMemoryBackend::new();
        {
            let file = ObjectFile::open("objs", Box::new(backend.clone())).unwrap();
            file.write(b"kept").unwrap();
            file.write(b"lost record").unwrap();
        }
        let mut bytes = backend.data();
        bytes.truncate(bytes.len() - 2);
        backend.set_data(bytes);

        let file = ObjectFile::open("objs", Box::new(backend)).unwrap();
        assert_eq!(file.len().unwrap(), 8);
        assert_eq!(file.records().unwrap(), vec![(0, b"kept".to_vec())]);
    }

    #[test]
    fn read_past_end_fails() {
        let file = ObjectFile::open("objs", Box::new(InMemoryBackend::new())).unwrap();
        file.write(b"x").unwrap();
        assert!(file.read(5).is_err());
    }
}
