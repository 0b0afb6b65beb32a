//! Configuration for the bookie storage node
//!
//! Loading configuration from files or the command line is left to the
//! embedding process; this module only defines the knobs, their defaults and
//! validation.

use std::path::{Path, PathBuf};

use crate::error::{StorageError, StorageResult};

/// Fixed length of the master key carried by add and fencing read requests.
pub const DEFAULT_MASTER_KEY_LENGTH: usize = 20;

/// Storage node configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding index checkpoints
    pub data_dir: PathBuf,
    /// Directory holding journal files (may live on a separate device)
    pub journal_dir: PathBuf,
    /// Hold every add completion until a journal sync covers it
    pub sync_every_write: bool,
    /// Maximum journal syncs per second; 0 disables throttling
    pub max_sync_rate: u32,
    /// Capacity of the queue between writers and the journal thread
    pub journal_queue_capacity: usize,
    /// Journal file rotation threshold (bytes)
    pub journal_rotation_bytes: u64,
    /// Maximum entry payload size in bytes
    pub max_value_size: usize,
    /// Master key block length on the wire
    pub master_key_length: usize,
}

impl Config {
    /// Production defaults rooted at `root`: `root/data` and `root/journal`.
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        let root = root.as_ref();
        Self {
            data_dir: root.join("data"),
            journal_dir: root.join("journal"),
            sync_every_write: true,
            max_sync_rate: 10_000,
            journal_queue_capacity: 10_000,
            journal_rotation_bytes: 1024 * 1024 * 1024,
            max_value_size: 5 * 1024 * 1024,
            master_key_length: DEFAULT_MASTER_KEY_LENGTH,
        }
    }

    /// Small-footprint settings for tests and local tooling.
    pub fn ephemeral<P: AsRef<Path>>(root: P) -> Self {
        Self {
            max_sync_rate: 0,
            journal_queue_capacity: 1024,
            journal_rotation_bytes: 4 * 1024 * 1024,
            max_value_size: 1024 * 1024,
            ..Self::new(root)
        }
    }

    /// Builder-style toggle for durability batching.
    pub fn with_sync_every_write(mut self, enabled: bool) -> Self {
        self.sync_every_write = enabled;
        self
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> StorageResult<()> {
        if self.journal_queue_capacity == 0 {
            return Err(invalid("journal_queue_capacity must be > 0"));
        }
        if self.journal_rotation_bytes < 64 * 1024 {
            return Err(invalid("journal_rotation_bytes must be >= 64KB"));
        }
        if self.max_value_size == 0 || self.max_value_size as u64 >= self.journal_rotation_bytes {
            return Err(invalid("max_value_size must be in [1, journal_rotation_bytes)"));
        }
        if self.master_key_length == 0 || self.master_key_length > 1024 {
            return Err(invalid("master_key_length must be in [1, 1024]"));
        }
        Ok(())
    }
}

fn invalid(reason: &str) -> StorageError {
    StorageError::InvalidConfig(reason.to_string())
}
