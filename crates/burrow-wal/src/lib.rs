//! Write-ahead logging and crash recovery for BurrowDB.
//!
//! The log is a pair of rotating files beside the data file. Every
//! modification is recorded as before- and after-images with a
//! monotonically increasing LSN; a trailing length word on each record
//! allows newest-first iteration, which drives the two-pass redo/undo
//! recovery at open time.

pub mod constants;
mod filepair;
pub mod iter;
pub mod log;
pub mod record;
pub mod recovery;

pub use iter::LogCursor;
pub use log::{Wal, WalConfig};
pub use record::{EntryKind, LogEntry, Lsn};
pub use recovery::{recover, PageStore, RecoveryStats};
