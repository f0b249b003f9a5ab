//! Verify command implementation.

use super::{open_existing, open_journal, CommandResult};
use std::path::Path;
use tessera_core::{CoreError, Journal, JournalEntryType, Node, NODES_FILE};
use tessera_storage::StorageBackend;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of records checked.
    pub records_checked: usize,
    /// Number of valid records.
    pub valid_records: usize,
    /// Number of corrupt records.
    pub corrupt_records: usize,
    /// Problems recovery repairs on its own.
    pub warnings: Vec<String>,
    /// List of errors found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    /// True when nothing is corrupt.
    pub fn is_ok(&self) -> bool {
        self.corrupt_records == 0 && self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(path: &Path, check_journal: bool, check_nodes: bool) -> CommandResult<()> {
    println!("Verifying dataset at {}", path.display());
    println!();

    let mut journal_result = VerifyResult::default();
    let mut node_result = VerifyResult::default();

    if check_journal {
        match open_journal(path)? {
            Some(journal) => {
                println!("Checking journal...");
                journal_result = verify_journal(&journal)?;
                print_result("Journal", &journal_result);
            }
            None => println!("Journal file not found (this may be normal for new datasets)"),
        }
    }

    if check_nodes {
        match open_existing(path, NODES_FILE)? {
            Some(backend) => {
                println!("Checking node records...");
                node_result = verify_nodes(&backend)?;
                print_result("Nodes", &node_result);
            }
            None => println!("Node file not found (this may be normal for new datasets)"),
        }
    }

    println!();
    if journal_result.is_ok() && node_result.is_ok() {
        println!("✓ Dataset verification passed");
        Ok(())
    } else {
        println!("✗ Dataset verification failed");
        Err("Verification failed".into())
    }
}

/// Checks every journal entry's checksum.
///
/// A truncated final entry is what a crash during a commit leaves behind
/// and only counts as a warning; recovery discards it. A complete entry
/// with a bad checksum or unknown type is corruption.
pub fn verify_journal(journal: &Journal) -> CommandResult<VerifyResult> {
    let mut result = VerifyResult::default();
    let mut since_commit = 0usize;
    for entry in journal.entries() {
        result.records_checked += 1;
        match entry {
            Ok(entry) => {
                result.valid_records += 1;
                if entry.entry_type == JournalEntryType::Commit {
                    since_commit = 0;
                } else {
                    since_commit += 1;
                }
            }
            Err(CoreError::ReadPastEnd { position, available, .. }) => {
                result.warnings.push(format!(
                    "truncated entry at {position} ({available} bytes present); recovery will discard it"
                ));
            }
            Err(e) => {
                result.corrupt_records += 1;
                result.errors.push(e.to_string());
            }
        }
    }
    if since_commit > 0 {
        result
            .warnings
            .push(format!("{since_commit} entries after the last commit marker will be discarded"));
    }
    Ok(result)
}

/// Checks that every node record is complete and decodes.
pub fn verify_nodes(backend: &dyn StorageBackend) -> CommandResult<VerifyResult> {
    let mut result = VerifyResult::default();
    let size = backend.size()?;
    let mut offset = 0u64;

    while offset + 4 <= size {
        result.records_checked += 1;
        let len_bytes = backend.read_at(offset, 4)?;
        let len = u64::from(u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]));
        if offset + 4 + len > size {
            result
                .warnings
                .push(format!("torn record at {offset}; it is dropped when the dataset opens"));
            return Ok(result);
        }
        let bytes = backend.read_at(offset + 4, len as usize)?;
        match Node::decode(&bytes) {
            Ok(_) => result.valid_records += 1,
            Err(e) => {
                result.corrupt_records += 1;
                result.errors.push(format!("record at {offset}: {e}"));
            }
        }
        offset += 4 + len;
    }
    if offset < size {
        result
            .warnings
            .push(format!("{} trailing bytes after the last record", size - offset));
    }
    Ok(result)
}

fn print_result(name: &str, result: &VerifyResult) {
    println!("  {name} records checked: {}", result.records_checked);
    println!("  {name} valid records:   {}", result.valid_records);
    if result.corrupt_records > 0 {
        println!("  {name} corrupt records: {}", result.corrupt_records);
    }
    for warning in &result.warnings {
        println!("  warning: {warning}");
    }
    for error in &result.errors {
        println!("  error: {error}");
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::dataset_with_queued_commits;
    use std::fs::OpenOptions;
    use std::io::Write;
    use tessera_core::JOURNAL_FILE;
    use tessera_storage::InMemoryBackend;

    #[test]
    fn clean_dataset_passes() {
        let dir = tempfile::tempdir().unwrap();
        dataset_with_queued_commits(dir.path(), 2);
        let journal = open_journal(dir.path()).unwrap().unwrap();
        let result = verify_journal(&journal).unwrap();
        assert!(result.is_ok(), "{result:?}");
        assert!(result.warnings.is_empty());
        let nodes = open_existing(dir.path(), NODES_FILE).unwrap().unwrap();
        let result = verify_nodes(&nodes).unwrap();
        assert!(result.is_ok());
        assert!(result.valid_records > 0);
    }

    #[test]
    fn truncated_tail_is_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        dataset_with_queued_commits(dir.path(), 1);
        let mut file = OpenOptions::new()
            .append(true)
            .open(dir.path().join(JOURNAL_FILE))
            .unwrap();
        file.write_all(&[1, 0, 0, 0, 0x40]).unwrap();
        drop(file);
        let journal = open_journal(dir.path()).unwrap().unwrap();
        let result = verify_journal(&journal).unwrap();
        assert!(result.is_ok());
        assert!(!result.warnings.is_empty());
    }

    #[test]
    fn flipped_byte_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        dataset_with_queued_commits(dir.path(), 1);
        let path = dir.path().join(JOURNAL_FILE);
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[17] ^= 0xff;
        std::fs::write(&path, bytes).unwrap();
        let journal = open_journal(dir.path()).unwrap().unwrap();
        assert!(!verify_journal(&journal).unwrap().is_ok());
    }

    #[test]
    fn undecodable_node_is_corruption() {
        let mut backend = InMemoryBackend::new();
        let good = Node::uri("ex:a").encode();
        backend.append(&(good.len() as u32).to_le_bytes()).unwrap();
        backend.append(&good).unwrap();
        backend.append(&2u32.to_le_bytes()).unwrap();
        backend.append(&[0xee, 0xee]).unwrap();
        let result = verify_nodes(&backend).unwrap();
        assert_eq!(result.valid_records, 1);
        assert_eq!(result.corrupt_records, 1);
    }
}
