//! Configuration structures for BurrowDB.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default page size in bytes (16 KB).
pub const DEFAULT_PAGE_SIZE: usize = 16 * 1024;

/// Default number of closed transactions per log file before a
/// checkpoint-and-rotate is attempted.
pub const DEFAULT_CHECKPOINT_THRESHOLD: usize = 64;

/// How the database reconciles a residual write-ahead log at open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RecoveryMode {
    /// No log is kept; modifications are not crash-safe.
    #[default]
    Disabled,
    /// Keep a log; opening over a non-empty log fails so the operator
    /// must explicitly acknowledge recovery.
    Manual,
    /// Keep a log; a non-empty log triggers recovery automatically.
    Auto,
}

impl RecoveryMode {
    /// Returns true if a write-ahead log is kept at all.
    pub fn logging_enabled(&self) -> bool {
        !matches!(self, RecoveryMode::Disabled)
    }
}

/// Configuration for a database store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path of the data file. The two log files live beside it as
    /// `<path>.log` and `<path>.log.1`.
    pub path: PathBuf,
    /// Page size in bytes.
    pub page_size: usize,
    /// Recovery behavior at open time.
    pub recovery: RecoveryMode,
    /// Enable fsync for durability.
    pub fsync_enabled: bool,
    /// Closed transactions per log file before rotation is attempted.
    /// Zero disables rotation.
    pub checkpoint_threshold: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./burrow.db"),
            page_size: DEFAULT_PAGE_SIZE,
            recovery: RecoveryMode::Disabled,
            fsync_enabled: true,
            checkpoint_threshold: DEFAULT_CHECKPOINT_THRESHOLD,
        }
    }
}

impl StoreConfig {
    /// Path stem of the log file pair derived from the data-file path.
    pub fn log_stem(&self) -> PathBuf {
        PathBuf::from(format!("{}.log", self.path.display()))
    }
}
