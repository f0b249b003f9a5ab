//! Dump journal command implementation.

use super::{open_journal, CommandResult};
use serde::Serialize;
use std::path::Path;
use tessera_core::{Journal, JournalEntryType};

/// Journal entry representation for output.
#[derive(Debug, Serialize)]
pub struct JournalEntryInfo {
    /// Offset in the journal file.
    pub offset: u64,
    /// Entry type.
    pub entry_type: String,
    /// File the entry applies to.
    pub file_ref: u32,
    /// Block id (if applicable).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_id: Option<u32>,
    /// Payload size in bytes.
    pub payload_size: usize,
    /// Error reading the entry; the dump stops here.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Runs the dump-journal command.
pub fn run(path: &Path, limit: Option<usize>, start_offset: u64, format: &str) -> CommandResult<()> {
    let journal = open_journal(path)?.ok_or("Journal file not found")?;
    let entries = read_entries(&journal, start_offset, limit)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        _ => {
            print_text_output(&entries);
        }
    }

    Ok(())
}

/// Reads up to `limit` entries starting at `start_offset`.
pub fn read_entries(
    journal: &Journal,
    start_offset: u64,
    limit: Option<usize>,
) -> CommandResult<Vec<JournalEntryInfo>> {
    let max_entries = limit.unwrap_or(usize::MAX);
    let mut entries = journal.entries_from(start_offset);
    let mut out = Vec::new();

    while out.len() < max_entries {
        let offset = entries.position();
        match entries.next() {
            None => break,
            Some(Ok(entry)) => out.push(JournalEntryInfo {
                offset,
                entry_type: entry.entry_type.to_string(),
                file_ref: entry.file_ref.as_u32(),
                block_id: entry.block_id.map(|id| id.as_u32()),
                payload_size: entry.payload.len(),
                error: None,
            }),
            Some(Err(e)) => {
                out.push(JournalEntryInfo {
                    offset,
                    entry_type: "UNREADABLE".to_string(),
                    file_ref: 0,
                    block_id: None,
                    payload_size: 0,
                    error: Some(e.to_string()),
                });
                break;
            }
        }
    }

    Ok(out)
}

fn print_text_output(entries: &[JournalEntryInfo]) {
    println!("Journal Entries ({} shown)", entries.len());
    println!("====================");
    println!();

    for entry in entries {
        print!("[{:08}] {:10}", entry.offset, entry.entry_type);
        if entry.file_ref != 0 {
            print!(" file={}", entry.file_ref);
        }
        if let Some(block) = entry.block_id {
            print!(" block={block}");
        }
        if entry.payload_size > 0 {
            print!(" payload={} bytes", entry.payload_size);
        }
        if let Some(ref error) = entry.error {
            print!(" error: {error}");
        }
        println!();
        if entry.entry_type == JournalEntryType::Commit.to_string() {
            println!("           ----");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::dataset_with_queued_commits;

    #[test]
    fn dumps_entries_with_offsets() {
        let dir = tempfile::tempdir().unwrap();
        dataset_with_queued_commits(dir.path(), 2);
        let journal = open_journal(dir.path()).unwrap().unwrap();
        let all = read_entries(&journal, 0, None).unwrap();
        let commit = JournalEntryType::Commit.to_string();
        assert_eq!(all.iter().filter(|e| e.entry_type == commit).count(), 2);
        assert_eq!(all[0].offset, 0);
        assert!(all.iter().all(|e| e.error.is_none()));

        let second = read_entries(&journal, all[1].offset, Some(1)).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].offset, all[1].offset);
        assert_eq!(second[0].entry_type, all[1].entry_type);
    }

    #[test]
    fn bad_offset_reports_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        dataset_with_queued_commits(dir.path(), 1);
        let journal = open_journal(dir.path()).unwrap().unwrap();
        let entries = read_entries(&journal, 3, None).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].error.is_some());
    }
}
