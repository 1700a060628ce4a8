//! The log engine.
//!
//! Owns the file pair, issues LSNs, tracks per-file transaction counts
//! and drives the checkpoint-and-rotate policy. All appends go through
//! here; the engine is not internally synchronized and relies on the
//! enclosing database handle for serialization.

use burrow_common::{BurrowError, Result, TxnId};
use std::path::Path;
use tracing::debug;

use crate::constants::FILE_HEADER_SIZE;
use crate::filepair::LogFilePair;
use crate::record::{EntryKind, LogEntry, Lsn};

/// Configuration for the log engine.
#[derive(Debug, Clone)]
pub struct WalConfig {
    /// Enable fsync after each append.
    pub fsync_enabled: bool,
    /// Closed transactions per file before rotation is attempted.
    /// Zero disables rotation.
    pub checkpoint_threshold: usize,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            fsync_enabled: true,
            checkpoint_threshold: burrow_common::DEFAULT_CHECKPOINT_THRESHOLD,
        }
    }
}

/// The write-ahead log over a pair of rotating files.
pub struct Wal {
    pub(crate) files: LogFilePair,
    /// Next LSN to issue.
    lsn: Lsn,
    /// LSN of the most recent CHECKPOINT entry.
    last_checkpoint_lsn: Lsn,
    /// Rotation threshold in closed transactions per file.
    threshold: usize,
    /// Transactions begun while each file was active.
    open_txn: [usize; 2],
    /// Transactions ended while each file was active.
    closed_txn: [usize; 2],
    /// Largest transaction id observed, issued or recovered.
    max_txn_id: TxnId,
}

impl Wal {
    /// Creates a fresh log: both files written with their headers,
    /// file 0 active, LSN starting at 1.
    pub async fn create(stem: &Path, config: WalConfig) -> Result<Self> {
        let files = LogFilePair::create(stem, config.fsync_enabled).await?;

        Ok(Self {
            files,
            lsn: Lsn::FIRST,
            last_checkpoint_lsn: Lsn::INVALID,
            threshold: config.checkpoint_threshold,
            open_txn: [0; 2],
            closed_txn: [0; 2],
            max_txn_id: TxnId::NONE,
        })
    }

    /// Opens an existing log and derives its state by scanning.
    ///
    /// The active file is the one whose last record carries the larger
    /// LSN; the next LSN continues past the largest found. One reverse
    /// scan recovers the last checkpoint LSN and the largest transaction
    /// id so the id allocator never reuses an id still in the log.
    pub async fn open(stem: &Path, config: WalConfig) -> Result<Self> {
        let files = LogFilePair::open(stem, config.fsync_enabled).await?;

        let mut wal = Self {
            files,
            lsn: Lsn::FIRST,
            last_checkpoint_lsn: Lsn::INVALID,
            threshold: config.checkpoint_threshold,
            open_txn: [0; 2],
            closed_txn: [0; 2],
            max_txn_id: TxnId::NONE,
        };

        let mut tail = [Lsn::INVALID; 2];
        for index in 0..2 {
            let size = wal.files.size(index).await?;
            if size > FILE_HEADER_SIZE as u64 {
                let (entry, _, _) = wal.read_record_before(index, size).await?;
                tail[index] = entry.lsn;
            }
        }

        let current = if tail[1] > tail[0] { 1 } else { 0 };
        wal.files.set_current(current);

        let max_lsn = tail[0].max(tail[1]);
        wal.lsn = if max_lsn.is_valid() {
            max_lsn.next()
        } else {
            Lsn::FIRST
        };

        let mut cursor = wal.iter_begin().await?;
        while let Some((entry, _)) = wal.next_entry(&mut cursor).await? {
            if entry.txn_id > wal.max_txn_id {
                wal.max_txn_id = entry.txn_id;
            }
            if entry.kind == EntryKind::Checkpoint && !wal.last_checkpoint_lsn.is_valid() {
                wal.last_checkpoint_lsn = entry.lsn;
            }
        }

        Ok(wal)
    }

    /// Closes the log, truncating both files to their headers first when
    /// `clear` is set. Clearing acts as the clean-shutdown marker.
    pub async fn close(mut self, clear: bool) -> Result<()> {
        if clear {
            self.clear().await?;
        }
        self.files.sync_all().await
    }

    /// Truncates both files back to their headers and resets the
    /// per-file counters. The LSN is left unchanged.
    pub async fn clear(&mut self) -> Result<()> {
        self.files.truncate_to_header(0).await?;
        self.files.truncate_to_header(1).await?;
        self.files.set_current(0);
        self.open_txn = [0; 2];
        self.closed_txn = [0; 2];
        self.last_checkpoint_lsn = Lsn::INVALID;
        Ok(())
    }

    /// True iff both files hold nothing beyond their headers.
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.files.size(0).await? == FILE_HEADER_SIZE as u64
            && self.files.size(1).await? == FILE_HEADER_SIZE as u64)
    }

    /// Encodes and appends one record to the active file, then advances
    /// the LSN. The LSN only moves once the record is on disk, so a
    /// failed append leaves no gap.
    async fn append(&mut self, entry: &LogEntry, payload: &[u8]) -> Result<()> {
        let bytes = entry.encode(payload)?;
        self.files.append_active(&bytes).await?;
        self.lsn = self.lsn.next();
        Ok(())
    }

    fn require_transactional(txn_id: TxnId) -> Result<()> {
        if !txn_id.is_transactional() {
            return Err(BurrowError::invalid_parameter("txn_id", txn_id));
        }
        Ok(())
    }

    fn note_txn_id(&mut self, txn_id: TxnId) {
        if txn_id > self.max_txn_id {
            self.max_txn_id = txn_id;
        }
    }

    /// Emits TXN_BEGIN for `txn_id`.
    pub async fn append_txn_begin(&mut self, txn_id: TxnId) -> Result<()> {
        Self::require_transactional(txn_id)?;
        let entry = LogEntry::txn_begin(self.lsn, txn_id);
        self.append(&entry, &[]).await?;
        self.open_txn[self.files.current()] += 1;
        self.note_txn_id(txn_id);
        Ok(())
    }

    /// Emits TXN_ABORT for `txn_id`, then considers a checkpoint.
    pub async fn append_txn_abort(&mut self, txn_id: TxnId) -> Result<()> {
        self.append_txn_end(txn_id, EntryKind::TxnAbort).await
    }

    /// Emits TXN_COMMIT for `txn_id`, then considers a checkpoint.
    pub async fn append_txn_commit(&mut self, txn_id: TxnId) -> Result<()> {
        self.append_txn_end(txn_id, EntryKind::TxnCommit).await
    }

    async fn append_txn_end(&mut self, txn_id: TxnId, kind: EntryKind) -> Result<()> {
        Self::require_transactional(txn_id)?;
        let entry = LogEntry::new(self.lsn, txn_id, kind, 0, 0);
        self.append(&entry, &[]).await?;
        self.closed_txn[self.files.current()] += 1;
        self.note_txn_id(txn_id);
        self.maybe_checkpoint().await
    }

    /// Rotates the file pair once the active file has seen `threshold`
    /// closed transactions and none remain open on it. The checkpoint is
    /// written to the active file before the other file is truncated.
    async fn maybe_checkpoint(&mut self) -> Result<()> {
        let current = self.files.current();
        if self.threshold == 0
            || self.closed_txn[current] < self.threshold
            || self.open_txn[current] != self.closed_txn[current]
        {
            return Ok(());
        }

        self.append_checkpoint().await?;
        self.files.rotate().await?;

        let current = self.files.current();
        self.open_txn[current] = 0;
        self.closed_txn[current] = 0;
        debug!(
            file = current,
            checkpoint_lsn = %self.last_checkpoint_lsn,
            "log rotated at checkpoint"
        );
        Ok(())
    }

    /// True if closing one more transaction on the active file would
    /// trigger the checkpoint-and-rotate policy.
    ///
    /// Rotation discards the other file's history, so callers flush
    /// their dirty pages first to keep that history recoverable from
    /// the data file alone.
    pub fn rotation_imminent(&self) -> bool {
        let current = self.files.current();
        self.threshold > 0
            && self.closed_txn[current] + 1 >= self.threshold
            && self.open_txn[current] == self.closed_txn[current] + 1
    }

    /// Emits a CHECKPOINT marker and remembers its LSN.
    pub async fn append_checkpoint(&mut self) -> Result<()> {
        let entry = LogEntry::checkpoint(self.lsn);
        self.append(&entry, &[]).await?;
        self.last_checkpoint_lsn = entry.lsn;
        Ok(())
    }

    /// Records that the page at `page_offset` was flushed to the data
    /// file; recovery uses this to skip redo for already-durable pages.
    pub async fn append_flush_page(&mut self, page_offset: u64) -> Result<()> {
        let entry = LogEntry::flush_page(self.lsn, page_offset);
        self.append(&entry, &[]).await
    }

    /// Emits the before-image of the region at `offset`.
    pub async fn append_prewrite(
        &mut self,
        txn_id: TxnId,
        offset: u64,
        data: &[u8],
    ) -> Result<()> {
        Self::require_transactional(txn_id)?;
        let entry = LogEntry::prewrite(self.lsn, txn_id, offset, data.len() as u64);
        self.append(&entry, data).await
    }

    /// Emits the after-image of the region at `offset`.
    pub async fn append_write(&mut self, txn_id: TxnId, offset: u64, data: &[u8]) -> Result<()> {
        Self::require_transactional(txn_id)?;
        let entry = LogEntry::write(self.lsn, txn_id, offset, data.len() as u64);
        self.append(&entry, data).await
    }

    /// Emits a combined before+after image. Both images must be the same
    /// length; the header records the size of one.
    pub async fn append_overwrite(
        &mut self,
        txn_id: TxnId,
        offset: u64,
        old: &[u8],
        new: &[u8],
    ) -> Result<()> {
        Self::require_transactional(txn_id)?;
        if old.len() != new.len() {
            return Err(BurrowError::invalid_parameter("new_image", new.len()));
        }

        let mut payload = Vec::with_capacity(old.len() * 2);
        payload.extend_from_slice(old);
        payload.extend_from_slice(new);

        let entry = LogEntry::overwrite(self.lsn, txn_id, offset, old.len() as u64);
        self.append(&entry, &payload).await
    }

    /// The next LSN to be issued.
    pub fn lsn(&self) -> Lsn {
        self.lsn
    }

    /// LSN of the most recent CHECKPOINT entry, if any.
    pub fn last_checkpoint_lsn(&self) -> Lsn {
        self.last_checkpoint_lsn
    }

    /// Index of the file currently receiving appends.
    pub fn current_fd(&self) -> usize {
        self.files.current()
    }

    /// Transactions begun while file `index` was active.
    pub fn open_txn(&self, index: usize) -> usize {
        self.open_txn[index]
    }

    /// Transactions ended while file `index` was active.
    pub fn closed_txn(&self, index: usize) -> usize {
        self.closed_txn[index]
    }

    /// Current rotation threshold.
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Adjusts the rotation threshold. Zero disables rotation.
    pub fn set_threshold(&mut self, threshold: usize) {
        self.threshold = threshold;
    }

    /// Largest transaction id observed by this log.
    pub fn max_txn_id(&self) -> TxnId {
        self.max_txn_id
    }
}
