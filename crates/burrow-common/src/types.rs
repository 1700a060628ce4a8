//! Core identifier types shared across BurrowDB components.

use serde::{Deserialize, Serialize};

/// Transaction identifier.
///
/// Ids are issued by the database handle starting at 1. Id 0 is reserved
/// for non-transactional log entries (flushes, checkpoints).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct TxnId(pub u64);

impl TxnId {
    /// The non-transactional sentinel.
    pub const NONE: TxnId = TxnId(0);

    /// First id handed out by a fresh database.
    pub const FIRST: TxnId = TxnId(1);

    /// Returns true if this id belongs to a real transaction.
    pub fn is_transactional(&self) -> bool {
        self.0 != 0
    }

    /// Returns the id following this one.
    pub fn next(&self) -> Self {
        TxnId(self.0 + 1)
    }
}

impl std::fmt::Display for TxnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
