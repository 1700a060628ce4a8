//! Database handle: open/close glue between the paged data file, the
//! page cache and the write-ahead log.
//!
//! The handle serializes all log and page access; neither the log
//! engine nor the cache is internally synchronized. Modifications go
//! through transactions: the first touch of a page logs its
//! before-image, commit logs the after-images of every touched page,
//! and a flush writes dirty pages to the data file behind FLUSH_PAGE
//! records.

use burrow_common::{BurrowError, RecoveryMode, Result, StoreConfig, TxnId};
use burrow_wal::{recover, Wal, WalConfig};
use tracing::{debug, info};

use crate::cache::PageCache;
use crate::pagefile::PageFile;
use crate::txn::Transaction;

/// An open BurrowDB database.
pub struct Database {
    config: StoreConfig,
    pagefile: PageFile,
    cache: PageCache,
    wal: Option<Wal>,
    next_txn_id: TxnId,
}

impl Database {
    fn wal_config(config: &StoreConfig) -> WalConfig {
        WalConfig {
            fsync_enabled: config.fsync_enabled,
            checkpoint_threshold: config.checkpoint_threshold,
        }
    }

    /// Creates a new database, with a fresh log file pair when recovery
    /// is enabled.
    pub async fn create(config: StoreConfig) -> Result<Self> {
        let pagefile = PageFile::create(&config.path, config.page_size, config.fsync_enabled)?;
        let wal = if config.recovery.logging_enabled() {
            Some(Wal::create(&config.log_stem(), Self::wal_config(&config)).await?)
        } else {
            None
        };

        debug!(path = %config.path.display(), "created database");
        Ok(Self {
            pagefile,
            cache: PageCache::new(config.page_size),
            wal,
            next_txn_id: TxnId::FIRST,
            config,
        })
    }

    /// Opens an existing database, reconciling any residual log with
    /// the configured recovery mode.
    ///
    /// With [`RecoveryMode::Manual`] a non-empty log fails with
    /// `NeedsRecovery` so the operator must acknowledge by reopening
    /// with [`RecoveryMode::Auto`], which replays the log instead.
    pub async fn open(config: StoreConfig) -> Result<Self> {
        let mut pagefile = PageFile::open(&config.path, config.page_size, config.fsync_enabled)?;

        let wal = if config.recovery.logging_enabled() {
            let stem = config.log_stem();
            let mut wal = match Wal::open(&stem, Self::wal_config(&config)).await {
                Ok(wal) => wal,
                // a database created without logging gets a fresh pair
                Err(BurrowError::FileNotFound(_)) => {
                    Wal::create(&stem, Self::wal_config(&config)).await?
                }
                Err(e) => return Err(e),
            };

            if !wal.is_empty().await? {
                match config.recovery {
                    RecoveryMode::Manual => {
                        wal.close(false).await?;
                        return Err(BurrowError::NeedsRecovery);
                    }
                    RecoveryMode::Auto => {
                        let stats = recover(&mut wal, &mut pagefile).await?;
                        info!(
                            path = %config.path.display(),
                            redo = stats.redo_applied,
                            undo = stats.undo_applied,
                            "database recovered"
                        );
                    }
                    RecoveryMode::Disabled => unreachable!(),
                }
            }
            Some(wal)
        } else {
            None
        };

        let next_txn_id = wal
            .as_ref()
            .map_or(TxnId::FIRST, |wal| wal.max_txn_id().next());

        debug!(path = %config.path.display(), "opened database");
        Ok(Self {
            pagefile,
            cache: PageCache::new(config.page_size),
            wal,
            next_txn_id,
            config,
        })
    }

    /// Begins a new transaction.
    pub async fn begin(&mut self) -> Result<Transaction> {
        let id = self.next_txn_id;
        self.next_txn_id = id.next();
        if let Some(wal) = self.wal.as_mut() {
            wal.append_txn_begin(id).await?;
        }
        Ok(Transaction::new(id))
    }

    /// Writes `data` at `offset` within `txn`. The region must lie
    /// inside a single, already allocated page.
    ///
    /// The first touch of a page logs its whole-page before-image, so
    /// an unfinished transaction can always be undone after a crash.
    pub async fn write(&mut self, txn: &mut Transaction, offset: u64, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let address = self.pagefile.page_address(offset);
        let rel = (offset - address) as usize;
        if rel + data.len() > self.config.page_size {
            return Err(BurrowError::invalid_parameter("data", data.len()));
        }

        if !txn.is_touched(address) {
            let before = self
                .cache
                .get_or_load(&self.pagefile, address)?
                .data()
                .to_vec();
            if let Some(wal) = self.wal.as_mut() {
                wal.append_prewrite(txn.id(), address, &before).await?;
            }
            txn.record_before(address, before);
        }

        let page = self.cache.get_or_load(&self.pagefile, address)?;
        page.patch(rel, data);
        Ok(())
    }

    /// Reads `len` bytes at `offset` through the page cache. The region
    /// must lie inside a single page.
    pub fn read(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        if len == 0 {
            return Ok(Vec::new());
        }
        let address = self.pagefile.page_address(offset);
        let rel = (offset - address) as usize;
        if rel + len > self.config.page_size {
            return Err(BurrowError::invalid_parameter("len", len));
        }

        let page = self.cache.get_or_load(&self.pagefile, address)?;
        Ok(page.data()[rel..rel + len].to_vec())
    }

    /// Commits `txn`: logs the after-image of every touched page, then
    /// TXN_COMMIT. The pages stay dirty in the cache until a flush.
    pub async fn commit(&mut self, txn: Transaction) -> Result<()> {
        let id = txn.id();
        if self.wal.is_none() {
            return Ok(());
        }

        for address in txn.touched_pages() {
            let image = match self.cache.get(address) {
                Some(page) => page.data().to_vec(),
                None => {
                    return Err(BurrowError::Internal(format!(
                        "touched page {:#x} not cached",
                        address
                    )));
                }
            };
            if let Some(wal) = self.wal.as_mut() {
                wal.append_write(id, address, &image).await?;
            }
        }

        self.flush_if_rotation_imminent().await?;
        if let Some(wal) = self.wal.as_mut() {
            wal.append_txn_commit(id).await?;
        }
        Ok(())
    }

    /// Aborts `txn`: restores every touched page from its before-image
    /// and logs TXN_ABORT.
    pub async fn abort(&mut self, txn: Transaction) -> Result<()> {
        let id = txn.id();
        for (address, before) in txn.into_before_images() {
            let page = self.cache.get_or_load(&self.pagefile, address)?;
            page.replace(before);
        }

        self.flush_if_rotation_imminent().await?;
        if let Some(wal) = self.wal.as_mut() {
            wal.append_txn_abort(id).await?;
        }
        Ok(())
    }

    /// Rotation truncates the older log file; everything recorded only
    /// there must be durable in the data file first.
    async fn flush_if_rotation_imminent(&mut self) -> Result<()> {
        let imminent = self.wal.as_ref().is_some_and(Wal::rotation_imminent);
        if imminent {
            self.flush().await?;
        }
        Ok(())
    }

    /// Writes all dirty pages to the data file, recording a FLUSH_PAGE
    /// entry for each. The page is written before the record: if a
    /// crash lands between the two, recovery merely re-applies an
    /// identical image.
    pub async fn flush(&mut self) -> Result<()> {
        for address in self.cache.dirty_addresses() {
            if let Some(page) = self.cache.get(address) {
                self.pagefile.write(address, page.data())?;
            }
            if let Some(wal) = self.wal.as_mut() {
                wal.append_flush_page(address).await?;
            }
            if let Some(page) = self.cache.get_mut(address) {
                page.clear_dirty();
            }
        }
        self.pagefile.sync()?;
        Ok(())
    }

    /// Flushes and closes the database. Clearing the log truncates both
    /// files to their headers and marks the shutdown clean; passing
    /// `false` leaves the entries behind, forcing (or enabling)
    /// recovery on the next open.
    pub async fn close(mut self, clear_log: bool) -> Result<()> {
        self.flush().await?;
        if let Some(wal) = self.wal.take() {
            wal.close(clear_log).await?;
        }
        debug!(path = %self.config.path.display(), clear_log, "closed database");
        Ok(())
    }

    /// Appends one zeroed page to the data file and returns its address.
    pub fn allocate_page(&mut self) -> Result<u64> {
        self.pagefile.allocate_page()
    }

    /// Drops all dirty flags without writing the pages.
    ///
    /// Simulates losing the page cache in a crash: the log still holds
    /// the images, the data file never saw them.
    pub fn forget_dirty_pages(&mut self) {
        self.cache.clear_dirty_flags();
    }

    /// Page size of this database.
    pub fn page_size(&self) -> usize {
        self.config.page_size
    }

    /// The write-ahead log, if recovery is enabled.
    pub fn wal(&self) -> Option<&Wal> {
        self.wal.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burrow_wal::Lsn;
    use tempfile::tempdir;

    fn test_config(dir: &tempfile::TempDir, recovery: RecoveryMode) -> StoreConfig {
        StoreConfig {
            path: dir.path().join("test.db"),
            page_size: 4096,
            recovery,
            fsync_enabled: false,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_write_read_commit() {
        let dir = tempdir().unwrap();
        let mut db = Database::create(test_config(&dir, RecoveryMode::Manual))
            .await
            .unwrap();

        let address = db.allocate_page().unwrap();
        let mut txn = db.begin().await.unwrap();
        db.write(&mut txn, address + 10, b"hello").await.unwrap();
        db.commit(txn).await.unwrap();

        assert_eq!(db.read(address + 10, 5).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_abort_restores_pages() {
        let dir = tempdir().unwrap();
        let mut db = Database::create(test_config(&dir, RecoveryMode::Manual))
            .await
            .unwrap();

        let address = db.allocate_page().unwrap();
        let mut txn = db.begin().await.unwrap();
        db.write(&mut txn, address, b"first").await.unwrap();
        db.commit(txn).await.unwrap();

        let mut txn = db.begin().await.unwrap();
        db.write(&mut txn, address, b"xxxxx").await.unwrap();
        assert_eq!(db.read(address, 5).unwrap(), b"xxxxx");
        db.abort(txn).await.unwrap();

        assert_eq!(db.read(address, 5).unwrap(), b"first");
    }

    #[tokio::test]
    async fn test_write_across_page_boundary_rejected() {
        let dir = tempdir().unwrap();
        let mut db = Database::create(test_config(&dir, RecoveryMode::Manual))
            .await
            .unwrap();

        db.allocate_page().unwrap();
        db.allocate_page().unwrap();
        let mut txn = db.begin().await.unwrap();

        let result = db.write(&mut txn, 4090, &[0u8; 16]).await;
        assert!(matches!(result, Err(BurrowError::InvalidParameter { .. })));
        db.abort(txn).await.unwrap();
    }

    #[tokio::test]
    async fn test_prewrite_logged_once_per_page() {
        let dir = tempdir().unwrap();
        let mut db = Database::create(test_config(&dir, RecoveryMode::Manual))
            .await
            .unwrap();

        let address = db.allocate_page().unwrap();
        let mut txn = db.begin().await.unwrap();

        let lsn_after_begin = db.wal().unwrap().lsn();
        db.write(&mut txn, address, b"a").await.unwrap();
        db.write(&mut txn, address + 1, b"b").await.unwrap();
        db.write(&mut txn, address + 2, b"c").await.unwrap();

        // one PREWRITE, regardless of how often the page was modified
        assert_eq!(db.wal().unwrap().lsn(), Lsn(lsn_after_begin.0 + 1));
        db.commit(txn).await.unwrap();
    }

    #[tokio::test]
    async fn test_clean_close_and_reopen() {
        let dir = tempdir().unwrap();
        let config = test_config(&dir, RecoveryMode::Manual);

        {
            let mut db = Database::create(config.clone()).await.unwrap();
            let address = db.allocate_page().unwrap();
            let mut txn = db.begin().await.unwrap();
            db.write(&mut txn, address, b"data").await.unwrap();
            db.commit(txn).await.unwrap();
            db.close(true).await.unwrap();
        }

        let mut db = Database::open(config).await.unwrap();
        assert!(db.wal().unwrap().lsn().is_valid());
        assert_eq!(db.read(0, 4).unwrap(), b"data");
        db.close(true).await.unwrap();
    }

    #[tokio::test]
    async fn test_unclean_close_needs_recovery() {
        let dir = tempdir().unwrap();
        let config = test_config(&dir, RecoveryMode::Manual);

        {
            let mut db = Database::create(config.clone()).await.unwrap();
            db.allocate_page().unwrap();
            let mut txn = db.begin().await.unwrap();
            db.write(&mut txn, 0, b"data").await.unwrap();
            db.commit(txn).await.unwrap();
            db.close(false).await.unwrap();
        }

        // manual recovery refuses; the operator must acknowledge
        let result = Database::open(config.clone()).await;
        assert!(matches!(result, Err(BurrowError::NeedsRecovery)));

        // auto recovery proceeds
        let config = StoreConfig {
            recovery: RecoveryMode::Auto,
            ..config
        };
        let mut db = Database::open(config).await.unwrap();
        assert_eq!(db.read(0, 4).unwrap(), b"data");
        assert!(db.wal().unwrap().is_empty().await.unwrap());
        db.close(true).await.unwrap();
    }

    #[tokio::test]
    async fn test_txn_ids_continue_after_crash_reopen() {
        let dir = tempdir().unwrap();
        let config = test_config(&dir, RecoveryMode::Manual);

        {
            let mut db = Database::create(config.clone()).await.unwrap();
            db.allocate_page().unwrap();
            for _ in 0..3 {
                let mut txn = db.begin().await.unwrap();
                db.write(&mut txn, 0, b"x").await.unwrap();
                db.commit(txn).await.unwrap();
            }
            db.close(false).await.unwrap();
        }

        let config = StoreConfig {
            recovery: RecoveryMode::Auto,
            ..config
        };
        let mut db = Database::open(config).await.unwrap();
        let txn = db.begin().await.unwrap();
        // ids 1..=3 are still in the (recovered) history; never reuse them
        assert_eq!(txn.id(), TxnId(4));
        db.abort(txn).await.unwrap();
        db.close(true).await.unwrap();
    }

    #[tokio::test]
    async fn test_disabled_recovery_keeps_no_log() {
        let dir = tempdir().unwrap();
        let config = test_config(&dir, RecoveryMode::Disabled);

        let mut db = Database::create(config.clone()).await.unwrap();
        assert!(db.wal().is_none());

        let address = db.allocate_page().unwrap();
        let mut txn = db.begin().await.unwrap();
        db.write(&mut txn, address, b"plain").await.unwrap();
        db.commit(txn).await.unwrap();
        db.close(true).await.unwrap();

        assert!(!config.log_stem().exists());
    }

    #[tokio::test]
    async fn test_open_missing_database() {
        let dir = tempdir().unwrap();
        let result = Database::open(test_config(&dir, RecoveryMode::Manual)).await;
        assert!(matches!(result, Err(BurrowError::FileNotFound(_))));
    }
}
