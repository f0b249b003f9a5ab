//! Journal recovery and replay.

use super::entry::{JournalEntry, JournalEntryType};
use super::writer::Journal;
use crate::block::Block;
use crate::error::{CoreError, CoreResult};
use crate::store::StoreConfig;
use tracing::{debug, info, warn};

/// Outcome of a replay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Committed transactions applied.
    pub transactions: usize,
    /// Block and buffer entries applied.
    pub entries: usize,
    /// Trailing bytes with no `Commit` entry, dropped.
    pub discarded_bytes: u64,
}

/// Applies journaled transactions to base storage.
pub struct JournalControl;

impl JournalControl {
    /// Startup recovery.
    ///
    /// Replays every complete `[start, Commit]` segment in order, drops an
    /// incomplete trailing segment, syncs the base files and truncates the
    /// journal. A transaction is therefore applied whole or not at all.
    ///
    /// # Errors
    ///
    /// Anything unreadable other than a torn tail is fatal, and the journal
    /// and base files are then left as they were.
    pub fn recovery(journal: &Journal, store: &StoreConfig) -> CoreResult<ReplaySummary> {
        if journal.is_empty()? {
            return Ok(ReplaySummary::default());
        }
        info!(bytes = journal.size()?, "journal recovery started");
        let summary = Self::replay_segments(journal, store)?;
        info!(
            transactions = summary.transactions,
            entries = summary.entries,
            discarded = summary.discarded_bytes,
            "journal recovery finished"
        );
        Ok(summary)
    }

    /// Flushes committed transactions to base storage.
    ///
    /// Runs only when no transaction is active, so the journal holds
    /// nothing but complete committed segments.
    pub fn replay(journal: &Journal, store: &StoreConfig) -> CoreResult<ReplaySummary> {
        if journal.is_empty()? {
            return Ok(ReplaySummary::default());
        }
        let summary = Self::replay_segments(journal, store)?;
        debug!(
            transactions = summary.transactions,
            entries = summary.entries,
            "journal replayed to base"
        );
        Ok(summary)
    }

    /// Finds the end of the first `Commit` entry at or after `start`.
    ///
    /// Returns `None` when the journal ends before a `Commit` entry, either
    /// cleanly or in an entry cut short at the end of the file with no
    /// commit marker behind it.
    ///
    /// # Errors
    ///
    /// [`CoreError::JournalCorruption`] for a checksum mismatch, an
    /// undecodable header, or a cut-short entry that is followed by a
    /// commit marker. None of these are a torn tail.
    pub fn scan_for_commit(journal: &Journal, start: u64) -> CoreResult<Option<u64>> {
        for entry in journal.entries_from(start) {
            match entry {
                Ok(entry) if entry.entry_type == JournalEntryType::Commit => {
                    return Ok(Some(entry.end_position))
                }
                Ok(_) => {}
                Err(CoreError::ReadPastEnd { position, .. }) => {
                    if let Some(marker) = journal.find_commit_marker(position)? {
                        return Err(CoreError::journal_corruption(
                            position,
                            format!("entry overruns the commit marker at {marker}"),
                        ));
                    }
                    debug!(start, position, "scan stopped at torn tail entry");
                    return Ok(None);
                }
                Err(CoreError::ChecksumMismatch {
                    position,
                    expected,
                    actual,
                }) => {
                    return Err(CoreError::journal_corruption(
                        position,
                        format!("checksum mismatch: stored {expected:#010x}, computed {actual:#010x}"),
                    ))
                }
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    /// Applies one entry. Returns true at a `Commit` entry.
    pub fn replay_entry(entry: &JournalEntry, store: &StoreConfig) -> CoreResult<bool> {
        match entry.entry_type {
            JournalEntryType::Block => {
                let id = entry.block_id.ok_or_else(|| {
                    CoreError::journal_corruption(entry.position, "block entry without block id")
                })?;
                let block = Block::new(id, store.allocator().copy_of(&entry.payload)?);
                store.block_mgr(entry.file_ref)?.overwrite(&block)?;
                Ok(false)
            }
            JournalEntryType::Buffer => {
                store.channel(entry.file_ref)?.write_all(&entry.payload)?;
                Ok(false)
            }
            JournalEntryType::Commit => Ok(true),
            other => {
                warn!(position = entry.position, entry_type = %other, "unexpected journal entry during replay");
                Ok(false)
            }
        }
    }

    fn replay_segments(journal: &Journal, store: &StoreConfig) -> CoreResult<ReplaySummary> {
        // Every segment is located before anything is applied, so a corrupt
        // journal leaves both the journal and the base files untouched.
        let mut commit_ends = Vec::new();
        let mut position = 0;
        while let Some(commit_end) = Self::scan_for_commit(journal, position)? {
            commit_ends.push(commit_end);
            position = commit_end;
        }

        let mut summary = ReplaySummary::default();
        let mut segment_start = 0;
        for commit_end in commit_ends {
            for entry in journal.entries_from(segment_start) {
                let entry = entry?;
                if entry.end_position > commit_end {
                    return Err(CoreError::journal_corruption(
                        entry.position,
                        "entry overruns its commit marker",
                    ));
                }
                if Self::replay_entry(&entry, store)? {
                    break;
                }
                summary.entries += 1;
            }
            summary.transactions += 1;
            segment_start = commit_end;
        }

        let size = journal.size()?;
        summary.discarded_bytes = size.saturating_sub(position);
        if summary.discarded_bytes > 0 {
            warn!(
                at = position,
                bytes = summary.discarded_bytes,
                "discarding journal tail without a commit marker"
            );
        }

        store.sync_all()?;
        journal.truncate(0)?;
        journal.sync()?;
        Ok(summary)
    }
}
