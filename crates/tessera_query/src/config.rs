//! Execution configuration.

use std::path::PathBuf;

/// Tuning for the iterators that buffer rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecConfig {
    /// Distinct rows kept in memory before distinct spills to disk.
    pub distinct_spill_threshold: usize,

    /// Rows sorted in memory before sort spills sorted runs to disk.
    pub sort_spill_threshold: usize,

    /// Recent rows reduced remembers.
    pub reduced_window: usize,

    /// Directory for spill files. `None` means the system temp dir.
    pub spill_dir: Option<PathBuf>,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            distinct_spill_threshold: 50_000,
            sort_spill_threshold: 100_000,
            reduced_window: 1_000,
            spill_dir: None,
        }
    }
}

impl ExecConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the distinct spill threshold.
    #[must_use]
    pub const fn distinct_spill_threshold(mut self, rows: usize) -> Self {
        self.distinct_spill_threshold = rows;
        self
    }

    /// Sets the sort spill threshold.
    #[must_use]
    pub const fn sort_spill_threshold(mut self, rows: usize) -> Self {
        self.sort_spill_threshold = rows;
        self
    }

    /// Sets the reduced window.
    #[must_use]
    pub const fn reduced_window(mut self, rows: usize) -> Self {
        self.reduced_window = rows;
        self
    }

    /// Sets the spill directory.
    #[must_use]
    pub fn spill_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.spill_dir = Some(dir.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders() {
        let config = ExecConfig::new()
            .distinct_spill_threshold(10)
            .sort_spill_threshold(20)
            .reduced_window(3)
            .spill_dir("/tmp/spill");
        assert_eq!(config.distinct_spill_threshold, 10);
        assert_eq!(config.sort_spill_threshold, 20);
        assert_eq!(config.reduced_window, 3);
        assert_eq!(config.spill_dir, Some(PathBuf::from("/tmp/spill")));
        assert_eq!(ExecConfig::default().spill_dir, None);
    }
}
