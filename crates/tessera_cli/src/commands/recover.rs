//! Recover command implementation.

use super::CommandResult;
use std::path::Path;
use tessera_core::{Config, Dataset, ReplaySummary};

/// Opens the dataset, which replays committed journal entries into the
/// base files, then closes it cleanly.
pub fn run(path: &Path) -> CommandResult<()> {
    let (summary, statements) = recover(path)?;
    println!("Recovered dataset at {}", path.display());
    println!("  Transactions replayed: {}", summary.transactions);
    println!("  Entries applied:       {}", summary.entries);
    println!("  Bytes discarded:       {}", summary.discarded_bytes);
    println!("  Statements:            {statements}");
    Ok(())
}

/// Runs recovery and returns what it did and the resulting statement count.
pub fn recover(path: &Path) -> CommandResult<(ReplaySummary, u64)> {
    if !path.is_dir() {
        return Err(format!("No dataset found at {}", path.display()).into());
    }
    let dataset = Dataset::open(path, Config::default().create_if_missing(false))?;
    let summary = dataset.recovery();
    let statements = dataset.read(|txn| txn.len())?;
    dataset.close()?;
    Ok((summary, statements))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::inspect::inspect;
    use crate::commands::test_support::dataset_with_queued_commits;

    #[test]
    fn replays_and_empties_the_journal() {
        let dir = tempfile::tempdir().unwrap();
        dataset_with_queued_commits(dir.path(), 3);
        let (summary, statements) = recover(dir.path()).unwrap();
        assert_eq!(summary.transactions, 3);
        assert_eq!(statements, 9);

        let after = inspect(dir.path()).unwrap();
        assert_eq!(after.journal.entries, 0);

        let (again, statements) = recover(dir.path()).unwrap();
        assert_eq!(again.transactions, 0);
        assert_eq!(statements, 9);
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(recover(&dir.path().join("absent")).is_err());
    }
}
