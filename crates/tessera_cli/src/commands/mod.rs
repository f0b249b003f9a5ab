//! CLI command implementations.

pub mod dump_journal;
pub mod inspect;
pub mod recover;
pub mod verify;

use std::path::Path;
use tessera_core::Journal;
use tessera_storage::FileBackend;

/// Boxed error used by every command.
pub type CommandResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Opens an existing file of the dataset, refusing to create it.
pub(crate) fn open_existing(path: &Path, name: &str) -> CommandResult<Option<FileBackend>> {
    let file = path.join(name);
    if !file.exists() {
        return Ok(None);
    }
    Ok(Some(FileBackend::open(&file)?))
}

/// Opens the dataset's journal, if it exists.
pub(crate) fn open_journal(path: &Path) -> CommandResult<Option<Journal>> {
    Ok(open_existing(path, tessera_core::JOURNAL_FILE)?.map(|backend| Journal::new(Box::new(backend))))
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::fs;
    use std::path::Path;
    use tessera_core::{Config, Dataset, Node};

    /// Writes `batches` transactions of three statements each into `path`,
    /// leaving them queued in the journal as if the process had died
    /// before flushing.
    pub fn dataset_with_queued_commits(path: &Path, batches: usize) {
        let live = tempfile::tempdir().unwrap();
        let dataset = Dataset::open(live.path(), Config::default().queue_batch_size(100)).unwrap();
        for b in 0..batches {
            dataset
                .write(|txn| {
                    for i in 0..3 {
                        txn.add(&Node::uri(format!("ex:s{b}")), &Node::uri("ex:p"), &Node::integer(i))?;
                    }
                    Ok(())
                })
                .unwrap();
        }
        fs::create_dir_all(path).unwrap();
        for entry in fs::read_dir(live.path()).unwrap() {
            let entry = entry.unwrap();
            fs::copy(entry.path(), path.join(entry.file_name())).unwrap();
        }
    }
}
