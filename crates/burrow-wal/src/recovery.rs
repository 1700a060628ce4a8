//! Crash recovery: redo committed work, undo unfinished work.
//!
//! Recovery runs over the reverse iterator in two passes. The first
//! classifies every transaction seen in the log and notes which pages
//! the log knows to be durable (FLUSH_PAGE). The second collects
//! after-images of committed transactions and before-images of
//! everything else; after-images are replayed in LSN order, then
//! before-images are applied newest-first so the oldest image of a
//! range lands last and wins. The log itself is only cleared once both
//! passes succeed, so a crash during recovery repeats it idempotently.

use burrow_common::{Result, TxnId};
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

use crate::log::Wal;
use crate::record::{EntryKind, Lsn};

/// The data-file surface recovery needs for image application.
pub trait PageStore {
    /// Reads `len` bytes at `offset`.
    fn read(&mut self, offset: u64, len: usize) -> Result<Vec<u8>>;
    /// Writes `data` at `offset`, extending the file if needed.
    fn write(&mut self, offset: u64, data: &[u8]) -> Result<()>;
    /// Current byte length of the data file.
    fn filesize(&mut self) -> Result<u64>;
}

/// Statistics from a recovery run.
#[derive(Debug, Default, Clone)]
pub struct RecoveryStats {
    /// Log entries scanned per pass.
    pub entries_scanned: usize,
    /// Transactions whose last terminal record was TXN_COMMIT.
    pub committed_txns: usize,
    /// Transactions whose last terminal record was TXN_ABORT.
    pub aborted_txns: usize,
    /// After-images written back to the data file.
    pub redo_applied: usize,
    /// Before-images written back to the data file.
    pub undo_applied: usize,
}

fn redo_needed(flushed: &HashMap<u64, Lsn>, offset: u64, lsn: Lsn) -> bool {
    flushed.get(&offset).map_or(true, |flush_lsn| lsn > *flush_lsn)
}

/// Brings the data file back to the last consistent state, then clears
/// the log. The LSN is not reset; it continues past the recovered
/// history.
pub async fn recover(wal: &mut Wal, store: &mut dyn PageStore) -> Result<RecoveryStats> {
    let mut stats = RecoveryStats::default();
    let mut committed: HashSet<TxnId> = HashSet::new();
    let mut aborted: HashSet<TxnId> = HashSet::new();
    let mut flushed: HashMap<u64, Lsn> = HashMap::new();

    // Pass 1: classify. Newest-first, so the first terminal record seen
    // for a transaction is the one that counts.
    let mut cursor = wal.iter_begin().await?;
    while let Some((entry, _)) = wal.next_entry(&mut cursor).await? {
        stats.entries_scanned += 1;
        match entry.kind {
            EntryKind::TxnCommit => {
                if !committed.contains(&entry.txn_id) && !aborted.contains(&entry.txn_id) {
                    committed.insert(entry.txn_id);
                }
            }
            EntryKind::TxnAbort => {
                if !committed.contains(&entry.txn_id) && !aborted.contains(&entry.txn_id) {
                    aborted.insert(entry.txn_id);
                }
            }
            EntryKind::FlushPage => {
                // first one seen is the most recent flush of that page
                flushed.entry(entry.offset).or_insert(entry.lsn);
            }
            _ => {}
        }
    }

    stats.committed_txns = committed.len();
    stats.aborted_txns = aborted.len();
    debug!(
        entries = stats.entries_scanned,
        committed = stats.committed_txns,
        aborted = stats.aborted_txns,
        flushed_pages = flushed.len(),
        "classified residual log"
    );

    // Pass 2: collect images. Transactions with no terminal record are
    // treated as aborted.
    let mut redo: Vec<(Lsn, u64, Bytes)> = Vec::new();
    let mut undo: Vec<(u64, Bytes)> = Vec::new();

    let mut cursor = wal.iter_begin().await?;
    while let Some((entry, payload)) = wal.next_entry(&mut cursor).await? {
        let image_size = entry.data_size as usize;

        match entry.kind {
            EntryKind::Write => {
                if committed.contains(&entry.txn_id)
                    && redo_needed(&flushed, entry.offset, entry.lsn)
                {
                    redo.push((entry.lsn, entry.offset, payload.unwrap_or_default()));
                }
            }
            EntryKind::Overwrite => {
                let data = payload.unwrap_or_default();
                if committed.contains(&entry.txn_id) {
                    if redo_needed(&flushed, entry.offset, entry.lsn) {
                        redo.push((entry.lsn, entry.offset, data.slice(image_size..)));
                    }
                } else {
                    undo.push((entry.offset, data.slice(..image_size)));
                }
            }
            EntryKind::Prewrite => {
                if !committed.contains(&entry.txn_id) {
                    undo.push((entry.offset, payload.unwrap_or_default()));
                }
            }
            _ => {}
        }
    }

    // Redo committed after-images oldest-first.
    redo.sort_by_key(|(lsn, _, _)| *lsn);
    for (_, offset, image) in &redo {
        store.write(*offset, image)?;
        stats.redo_applied += 1;
    }

    // Undo before-images in scan order (newest first): where ranges
    // overlap, the oldest image is applied last and wins. Images that
    // already match the file content are not rewritten; a zero-length
    // image restores nothing.
    let mut filesize = store.filesize()?;
    for (offset, image) in &undo {
        let end = offset + image.len() as u64;
        let dirty = !image.is_empty()
            && (end > filesize
                || store.read(*offset, image.len())?.as_slice() != image.as_ref());
        if dirty {
            store.write(*offset, image)?;
            filesize = filesize.max(end);
            stats.undo_applied += 1;
        }
    }

    wal.clear().await?;
    info!(
        redo = stats.redo_applied,
        undo = stats.undo_applied,
        next_lsn = %wal.lsn(),
        "recovery complete"
    );
    Ok(stats)
}
