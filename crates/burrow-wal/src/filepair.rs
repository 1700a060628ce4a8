//! Management of the two physical log files.
//!
//! A log is a pair of sibling files, `<stem>` (index 0) and `<stem>.1`
//! (index 1). Each begins with a fixed header carrying the format magic;
//! a file whose size equals the header size is empty. Appends only ever
//! go to the active file; rotation switches the active index and
//! truncates the newly active file back to its header.

use burrow_common::{BurrowError, Result};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::constants::{FILE_HEADER_SIZE, FILE_MAGIC};

/// Returns the two sibling paths of a log file pair.
pub(crate) fn sibling_paths(stem: &Path) -> [PathBuf; 2] {
    [
        stem.to_path_buf(),
        PathBuf::from(format!("{}.1", stem.display())),
    ]
}

/// Serialized file header: magic plus reserved padding.
fn header_bytes() -> [u8; FILE_HEADER_SIZE] {
    let mut buf = [0u8; FILE_HEADER_SIZE];
    buf[..4].copy_from_slice(&FILE_MAGIC);
    buf
}

/// The two physical log files, with index of the one receiving appends.
pub(crate) struct LogFilePair {
    paths: [PathBuf; 2],
    files: [File; 2],
    current: usize,
    fsync_enabled: bool,
}

impl LogFilePair {
    /// Creates both files with their headers; file 0 is active.
    pub(crate) async fn create(stem: &Path, fsync_enabled: bool) -> Result<Self> {
        let paths = sibling_paths(stem);
        let f0 = Self::create_file(&paths[0]).await?;
        let f1 = Self::create_file(&paths[1]).await?;

        Ok(Self {
            paths,
            files: [f0, f1],
            current: 0,
            fsync_enabled,
        })
    }

    /// Opens both files read-write and verifies their magic.
    ///
    /// The active index is left at 0; the log engine derives the real one
    /// from the files' contents.
    pub(crate) async fn open(stem: &Path, fsync_enabled: bool) -> Result<Self> {
        let paths = sibling_paths(stem);
        let f0 = Self::open_file(&paths[0]).await?;
        let f1 = Self::open_file(&paths[1]).await?;

        Ok(Self {
            paths,
            files: [f0, f1],
            current: 0,
            fsync_enabled,
        })
    }

    async fn create_file(path: &Path) -> Result<File> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(path)
            .await?;

        file.write_all(&header_bytes()).await?;
        file.sync_all().await?;
        Ok(file)
    }

    async fn open_file(path: &Path) -> Result<File> {
        let mut file = match OpenOptions::new().read(true).write(true).open(path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BurrowError::FileNotFound(path.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let mut header = [0u8; FILE_HEADER_SIZE];
        match file.read_exact(&mut header).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(BurrowError::InvalidFileHeader(format!(
                    "{} is shorter than the file header",
                    path.display()
                )));
            }
            Err(e) => return Err(e.into()),
        }
        if header[..4] != FILE_MAGIC {
            return Err(BurrowError::InvalidFileHeader(format!(
                "bad magic in {}",
                path.display()
            )));
        }

        Ok(file)
    }

    /// Index of the file currently receiving appends.
    pub(crate) fn current(&self) -> usize {
        self.current
    }

    /// Forces the active index, used when deriving state at open time.
    pub(crate) fn set_current(&mut self, index: usize) {
        debug_assert!(index < 2);
        self.current = index;
    }

    /// Appends one whole record to the active file.
    ///
    /// Records are written with a single write so a record is either
    /// fully on disk or absent. Returns the offset of the record start.
    pub(crate) async fn append_active(&mut self, bytes: &[u8]) -> Result<u64> {
        let file = &mut self.files[self.current];
        let offset = file.seek(SeekFrom::End(0)).await?;
        file.write_all(bytes).await?;
        if self.fsync_enabled {
            file.sync_all().await?;
        }
        Ok(offset)
    }

    /// Byte length of file `index`.
    pub(crate) async fn size(&self, index: usize) -> Result<u64> {
        Ok(self.files[index].metadata().await?.len())
    }

    /// Truncates file `index` back to just its header.
    pub(crate) async fn truncate_to_header(&mut self, index: usize) -> Result<()> {
        self.files[index].set_len(FILE_HEADER_SIZE as u64).await?;
        self.files[index].sync_all().await?;
        Ok(())
    }

    /// Switches the active file and truncates the new one to its header.
    ///
    /// The outgoing file is synced first so a checkpoint written there is
    /// durable before the other file's history is discarded.
    pub(crate) async fn rotate(&mut self) -> Result<()> {
        self.files[self.current].sync_all().await?;
        self.current = 1 - self.current;
        self.truncate_to_header(self.current).await
    }

    /// Reads exactly `buf.len()` bytes at `offset` from file `index`.
    pub(crate) async fn read_exact_at(
        &mut self,
        index: usize,
        offset: u64,
        buf: &mut [u8],
    ) -> Result<()> {
        let file = &mut self.files[index];
        file.seek(SeekFrom::Start(offset)).await?;
        match file.read_exact(buf).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(
                BurrowError::InvalidFileHeader(format!(
                    "truncated record in {}",
                    self.paths[index].display()
                )),
            ),
            Err(e) => Err(e.into()),
        }
    }

    /// Syncs both files to disk.
    pub(crate) async fn sync_all(&mut self) -> Result<()> {
        for file in &mut self.files {
            file.sync_all().await?;
        }
        Ok(())
    }
}
