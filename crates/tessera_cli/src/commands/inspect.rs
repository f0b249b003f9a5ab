//! Inspect command implementation.

use super::{open_existing, open_journal, CommandResult};
use serde::Serialize;
use std::path::Path;
use tessera_core::{
    Journal, JournalEntryType, JOURNAL_FILE, NODES_DELTA_FILE, NODES_FILE, TRIPLES_FILE, TRIPLES_STATE_FILE,
};
use tessera_storage::StorageBackend;

const DATASET_FILES: [&str; 5] = [JOURNAL_FILE, TRIPLES_FILE, TRIPLES_STATE_FILE, NODES_FILE, NODES_DELTA_FILE];

/// Dataset inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Dataset path.
    pub path: String,
    /// Size of each dataset file present.
    pub files: Vec<FileInfo>,
    /// Total size in bytes.
    pub total_size: u64,
    /// Journal contents.
    pub journal: JournalInfo,
    /// Number of node records in the node file.
    pub node_records: usize,
}

/// One dataset file.
#[derive(Debug, Serialize)]
pub struct FileInfo {
    /// File name.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
}

/// What the journal holds.
#[derive(Debug, Default, Serialize, PartialEq, Eq)]
pub struct JournalInfo {
    /// Readable entries.
    pub entries: usize,
    /// Block image entries.
    pub blocks: usize,
    /// Buffer entries.
    pub buffers: usize,
    /// Committed transactions waiting to be replayed.
    pub committed_transactions: usize,
    /// Bytes after the last commit marker.
    pub uncommitted_bytes: u64,
    /// Offset of the first unreadable entry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unreadable_at: Option<u64>,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> CommandResult<()> {
    let result = inspect(path)?;
    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }
    Ok(())
}

/// Gathers the inspection result without changing any file.
pub fn inspect(path: &Path) -> CommandResult<InspectResult> {
    let mut files = Vec::new();
    for name in DATASET_FILES {
        if let Some(backend) = open_existing(path, name)? {
            files.push(FileInfo {
                name: name.to_string(),
                size: backend.size()?,
            });
        }
    }
    if files.is_empty() {
        return Err(format!("No dataset found at {}", path.display()).into());
    }

    let journal = match open_journal(path)? {
        Some(journal) => journal_info(&journal)?,
        None => JournalInfo::default(),
    };
    let node_records = match open_existing(path, NODES_FILE)? {
        Some(backend) => count_node_records(&backend)?,
        None => 0,
    };

    Ok(InspectResult {
        path: path.display().to_string(),
        total_size: files.iter().map(|f| f.size).sum(),
        files,
        journal,
        node_records,
    })
}

/// Summarises the journal.
pub fn journal_info(journal: &Journal) -> CommandResult<JournalInfo> {
    let mut info = JournalInfo::default();
    let mut committed_end = 0;
    let mut entries = journal.entries();
    let mut failed = false;
    for entry in entries.by_ref() {
        match entry {
            Ok(entry) => {
                info.entries += 1;
                match entry.entry_type {
                    JournalEntryType::Block => info.blocks += 1,
                    JournalEntryType::Buffer => info.buffers += 1,
                    JournalEntryType::Commit => {
                        info.committed_transactions += 1;
                        committed_end = entry.end_position;
                    }
                    _ => {}
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "journal scan stopped");
                failed = true;
            }
        }
    }
    if failed {
        info.unreadable_at = Some(entries.position());
    }
    info.uncommitted_bytes = journal.size()?.saturating_sub(committed_end);
    Ok(info)
}

/// Counts complete `[u32 length][bytes]` records.
fn count_node_records(backend: &dyn StorageBackend) -> CommandResult<usize> {
    let size = backend.size()?;
    let mut offset = 0u64;
    let mut count = 0;
    while offset + 4 <= size {
        let len_bytes = backend.read_at(offset, 4)?;
        let len = u64::from(u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]));
        if offset + 4 + len > size {
            break;
        }
        offset += 4 + len;
        count += 1;
    }
    Ok(count)
}

fn print_text_output(result: &InspectResult) {
    println!("Tessera Dataset Inspection");
    println!("==========================");
    println!();
    println!("Path: {}", result.path);
    println!();
    println!("Files:");
    for file in &result.files {
        println!("  {:<16} {}", file.name, format_size(file.size));
    }
    println!("  {:<16} {}", "total", format_size(result.total_size));
    println!();
    println!("Journal:");
    println!("  Entries:                {}", result.journal.entries);
    println!("  Block images:           {}", result.journal.blocks);
    println!("  Buffers:                {}", result.journal.buffers);
    println!("  Pending commits:        {}", result.journal.committed_transactions);
    println!("  Uncommitted tail:       {} bytes", result.journal.uncommitted_bytes);
    if let Some(at) = result.journal.unreadable_at {
        println!("  Unreadable entry at:    {at}");
    }
    println!();
    println!("Nodes:");
    println!("  Records: {}", result.node_records);
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::dataset_with_queued_commits;

    #[test]
    fn reports_queued_commits() {
        let dir = tempfile::tempdir().unwrap();
        dataset_with_queued_commits(dir.path(), 2);
        let result = inspect(dir.path()).unwrap();
        assert_eq!(result.journal.committed_transactions, 2);
        assert_eq!(result.journal.uncommitted_bytes, 0);
        assert!(result.journal.unreadable_at.is_none());
        assert!(result.node_records >= 5);
        assert!(result.files.iter().any(|f| f.name == JOURNAL_FILE && f.size > 0));
    }

    #[test]
    fn missing_dataset_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(inspect(&dir.path().join("absent")).is_err());
    }

    #[test]
    fn format_size_units() {
        assert_eq!(format_size(12), "12 B");
        assert_eq!(format_size(2048), "2.0 KB");
    }
}
