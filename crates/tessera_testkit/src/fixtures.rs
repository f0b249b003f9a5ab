//! Test fixtures and dataset helpers.
//!
//! Provides datasets that clean up after themselves and can be reopened,
//! or "crashed" and reopened, at the same location.

use crate::crash::snapshot;
use std::fs;
use std::path::Path;
use tempfile::TempDir;
use tessera_core::{Config, CoreResult, Dataset, Location, MemoryFiles, Node, Statement};

/// Namespace of the nodes built by [`ex`].
pub const EX: &str = "http://example.org/";

/// An IRI in the example namespace.
pub fn ex(local: &str) -> Node {
    Node::uri(format!("{EX}{local}"))
}

/// The `i`th statement of a deterministic test graph.
///
/// Subjects repeat every ten statements and objects are integers, so the
/// graph exercises both shared and unique nodes.
pub fn statement(i: usize) -> Statement {
    Statement::new(
        ex(&format!("s{}", i % 10)),
        ex("value"),
        Node::integer(i as i64),
    )
}

/// A test dataset with automatic cleanup.
pub struct TestDataset {
    /// The dataset.
    pub dataset: Dataset,
    location: Location,
    config: Config,
    _temp_dir: Option<TempDir>,
}

impl TestDataset {
    /// Creates an in-memory dataset whose files survive reopening.
    pub fn memory() -> Self {
        Self::memory_with(Config::default())
    }

    /// Creates an in-memory dataset with `config`.
    pub fn memory_with(config: Config) -> Self {
        let location = Location::memory();
        Self::open_at(location, config, None).expect("Failed to open in-memory dataset")
    }

    /// Creates a dataset in a temporary directory.
    pub fn file() -> Self {
        Self::file_with(Config::default())
    }

    /// Creates a dataset in a temporary directory with `config`.
    pub fn file_with(config: Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let location = Location::directory(temp_dir.path().join("dataset"));
        Self::open_at(location, config, Some(temp_dir)).expect("Failed to open file dataset")
    }

    fn open_at(location: Location, config: Config, temp_dir: Option<TempDir>) -> CoreResult<Self> {
        let dataset = Dataset::open_location(&location, config.clone())?;
        Ok(Self {
            dataset,
            location,
            config,
            _temp_dir: temp_dir,
        })
    }

    /// The dataset's location.
    pub fn location(&self) -> &Location {
        &self.location
    }

    /// The backing files of an in-memory dataset.
    pub fn files(&self) -> Option<&MemoryFiles> {
        match &self.location {
            Location::Memory(files) => Some(files),
            Location::Directory(_) => None,
        }
    }

    /// The directory of an on-disk dataset.
    pub fn path(&self) -> Option<&Path> {
        match &self.location {
            Location::Directory(path) => Some(path),
            Location::Memory(_) => None,
        }
    }

    /// Closes the dataset cleanly and opens it again.
    pub fn reopen(self) -> CoreResult<Self> {
        let Self {
            dataset,
            location,
            config,
            _temp_dir: temp_dir,
        } = self;
        dataset.close()?;
        drop(dataset);
        Self::open_at(location, config, temp_dir)
    }

    /// Simulates a crash: the files are copied exactly as they are now,
    /// the running dataset is abandoned, and a new dataset is opened on
    /// the copy, running recovery.
    pub fn crash(self) -> CoreResult<Self> {
        let Self {
            dataset,
            location,
            config,
            _temp_dir: temp_dir,
        } = self;
        let (image, image_dir) = match &location {
            Location::Memory(files) => (Location::Memory(snapshot(files)), None),
            Location::Directory(path) => {
                let dir = TempDir::new()?;
                let target = dir.path().join("dataset");
                copy_dir(path, &target)?;
                (Location::directory(target), Some(dir))
            }
        };
        // The abandoned dataset may still write to its own files while
        // dropping; the image is unaffected.
        drop(dataset);
        Self::open_at(image, config, image_dir.or(temp_dir))
    }

    /// Number of statements a fresh read transaction sees.
    pub fn statement_count(&self) -> CoreResult<u64> {
        self.dataset.read(|txn| txn.len())
    }

    /// Commits statements `range` of [`statement`] in one transaction.
    pub fn add_range(&self, range: std::ops::Range<usize>) -> CoreResult<()> {
        self.dataset.write(|txn| {
            for i in range {
                txn.add_statement(&statement(i))?;
            }
            Ok(())
        })
    }
}

fn copy_dir(from: &Path, to: &Path) -> std::io::Result<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            fs::copy(entry.path(), to.join(entry.file_name()))?;
        }
    }
    Ok(())
}

impl std::ops::Deref for TestDataset {
    type Target = Dataset;

    fn deref(&self) -> &Self::Target {
        &self.dataset
    }
}

/// Runs a test with a temporary in-memory dataset.
///
/// # Example
///
/// ```rust,ignore
/// use tessera_testkit::with_temp_dataset;
///
/// #[test]
/// fn my_test() {
///     with_temp_dataset(|dataset| {
///         let count = dataset.read(|txn| txn.len()).unwrap();
///         assert_eq!(count, 0);
///     });
/// }
/// ```
pub fn with_temp_dataset<F, R>(f: F) -> R
where
    F: FnOnce(&Dataset) -> R,
{
    let test_dataset = TestDataset::memory();
    f(&test_dataset.dataset)
}

/// Runs a test with a dataset in a temporary directory.
pub fn with_file_dataset<F, R>(f: F) -> R
where
    F: FnOnce(&Dataset, &Path) -> R,
{
    let test_dataset = TestDataset::file();
    let path = test_dataset.path().expect("File dataset should have a path").to_path_buf();
    f(&test_dataset.dataset, &path)
}

/// An in-memory dataset holding statements `0..count`, committed in
/// batches of at most 100.
pub fn populated_dataset(count: usize) -> TestDataset {
    let test_dataset = TestDataset::memory();
    let mut start = 0;
    while start < count {
        let end = (start + 100).min(count);
        test_dataset.add_range(start..end).expect("Failed to populate dataset");
        start = end;
    }
    test_dataset
}
