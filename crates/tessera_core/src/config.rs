//! Dataset configuration.

use crate::block::AllocatorKind;

/// Default block size for block files.
pub const DEFAULT_BLOCK_SIZE: usize = 8 * 1024;

/// Configuration for opening a dataset.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to create the dataset directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Size of each block in block files.
    pub block_size: usize,

    /// How block buffers are allocated.
    pub allocator: AllocatorKind,

    /// Committed writers queued before a flush is attempted.
    pub queue_batch_size: usize,

    /// Flush when the journal grows past this many bytes (`None` = off).
    pub journal_threshold_size: Option<u64>,

    /// Queue length past which writers stall for a flush (`None` = never).
    pub max_queue_threshold: Option<usize>,

    /// Whether to sync the journal on every commit (safer but slower).
    pub sync_on_commit: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            block_size: DEFAULT_BLOCK_SIZE,
            allocator: AllocatorKind::Heap,
            queue_batch_size: 10,
            journal_threshold_size: None,
            max_queue_threshold: Some(100),
            sync_on_commit: true,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the dataset if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets the block size.
    #[must_use]
    pub const fn block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    /// Sets the block buffer allocator.
    #[must_use]
    pub const fn allocator(mut self, kind: AllocatorKind) -> Self {
        self.allocator = kind;
        self
    }

    /// Sets the flush batch size.
    #[must_use]
    pub const fn queue_batch_size(mut self, size: usize) -> Self {
        self.queue_batch_size = size;
        self
    }

    /// Sets the journal size flush trigger.
    #[must_use]
    pub const fn journal_threshold_size(mut self, size: Option<u64>) -> Self {
        self.journal_threshold_size = size;
        self
    }

    /// Sets the queue length at which writers wait for a flush.
    #[must_use]
    pub const fn max_queue_threshold(mut self, len: Option<usize>) -> Self {
        self.max_queue_threshold = len;
        self
    }

    /// Sets whether to sync the journal on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert!(config.create_if_missing);
        assert!(config.sync_on_commit);
        assert_eq!(config.block_size, 8192);
        assert_eq!(config.queue_batch_size, 10);
        assert_eq!(config.journal_threshold_size, None);
        assert_eq!(config.max_queue_threshold, Some(100));
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .block_size(256)
            .queue_batch_size(0)
            .allocator(AllocatorKind::Direct)
            .sync_on_commit(false);

        assert_eq!(config.block_size, 256);
        assert_eq!(config.queue_batch_size, 0);
        assert_eq!(config.allocator, AllocatorKind::Direct);
        assert!(!config.sync_on_commit);
    }
}
