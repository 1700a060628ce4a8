//! Paged data-file I/O.

use burrow_common::{BurrowError, Result};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// The data file, addressed by byte offset and grown by whole pages.
pub struct PageFile {
    path: PathBuf,
    page_size: usize,
    fsync_enabled: bool,
    inner: Mutex<Inner>,
}

struct Inner {
    file: File,
    size: u64,
}

impl PageFile {
    /// Creates a new, empty data file.
    pub fn create(path: &Path, page_size: usize, fsync_enabled: bool) -> Result<Self> {
        if page_size == 0 {
            return Err(BurrowError::invalid_parameter("page_size", page_size));
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            page_size,
            fsync_enabled,
            inner: Mutex::new(Inner { file, size: 0 }),
        })
    }

    /// Opens an existing data file.
    pub fn open(path: &Path, page_size: usize, fsync_enabled: bool) -> Result<Self> {
        if page_size == 0 {
            return Err(BurrowError::invalid_parameter("page_size", page_size));
        }

        let file = match OpenOptions::new().read(true).write(true).open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BurrowError::FileNotFound(path.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let size = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            page_size,
            fsync_enabled,
            inner: Mutex::new(Inner { file, size }),
        })
    }

    /// Page size this file was opened with.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Address of the page containing `offset`.
    pub fn page_address(&self, offset: u64) -> u64 {
        offset - offset % self.page_size as u64
    }

    /// Reads `len` bytes at `offset`.
    pub fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut inner = self.inner.lock();

        if offset + len as u64 > inner.size {
            return Err(BurrowError::IoError(format!(
                "read of {} bytes at {} past end of {}",
                len,
                offset,
                self.path.display()
            )));
        }

        inner.file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        inner.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Writes `data` at `offset`, extending the file if needed.
    /// Zero-length writes change nothing, not even the file size.
    pub fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let mut inner = self.inner.lock();

        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.write_all(data)?;
        if self.fsync_enabled {
            inner.file.sync_all()?;
        }

        let end = offset + data.len() as u64;
        if end > inner.size {
            inner.size = end;
        }
        Ok(())
    }

    /// Current byte length of the file.
    pub fn filesize(&self) -> Result<u64> {
        Ok(self.inner.lock().size)
    }

    /// Truncates the file to `len` bytes.
    pub fn truncate(&self, len: u64) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.file.set_len(len)?;
        if self.fsync_enabled {
            inner.file.sync_all()?;
        }
        inner.size = len;
        Ok(())
    }

    /// Appends one zeroed page and returns its address.
    pub fn allocate_page(&self) -> Result<u64> {
        let mut inner = self.inner.lock();
        let address = inner.size;

        inner.file.seek(SeekFrom::Start(address))?;
        inner.file.write_all(&vec![0u8; self.page_size])?;
        if self.fsync_enabled {
            inner.file.sync_all()?;
        }

        inner.size = address + self.page_size as u64;
        Ok(address)
    }

    /// Flushes pending writes to disk.
    pub fn sync(&self) -> Result<()> {
        self.inner.lock().file.sync_all()?;
        Ok(())
    }
}

impl burrow_wal::PageStore for PageFile {
    fn read(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        PageFile::read(self, offset, len)
    }

    fn write(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        PageFile::write(self, offset, data)
    }

    fn filesize(&mut self) -> Result<u64> {
        PageFile::filesize(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const PAGE: usize = 4096;

    fn create_test_file() -> (PageFile, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let file = PageFile::create(&dir.path().join("test.db"), PAGE, false).unwrap();
        (file, dir)
    }

    #[test]
    fn test_create_empty() {
        let (file, _dir) = create_test_file();
        assert_eq!(file.filesize().unwrap(), 0);
        assert_eq!(file.page_size(), PAGE);
    }

    #[test]
    fn test_allocate_page() {
        let (file, _dir) = create_test_file();

        assert_eq!(file.allocate_page().unwrap(), 0);
        assert_eq!(file.allocate_page().unwrap(), PAGE as u64);
        assert_eq!(file.filesize().unwrap(), 2 * PAGE as u64);

        // fresh pages read back zeroed
        let data = file.read(0, PAGE).unwrap();
        assert!(data.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_write_read_roundtrip() {
        let (file, _dir) = create_test_file();
        file.allocate_page().unwrap();

        file.write(100, &[0xAB; 32]).unwrap();
        let data = file.read(100, 32).unwrap();
        assert_eq!(data, vec![0xAB; 32]);
    }

    #[test]
    fn test_write_extends_file() {
        let (file, _dir) = create_test_file();

        file.write(64, &[1u8; 8]).unwrap();
        assert_eq!(file.filesize().unwrap(), 72);
    }

    #[test]
    fn test_empty_write_is_a_no_op() {
        let (file, _dir) = create_test_file();
        file.allocate_page().unwrap();

        file.write(PAGE as u64 * 4, &[]).unwrap();
        assert_eq!(file.filesize().unwrap(), PAGE as u64);
    }

    #[test]
    fn test_read_past_end() {
        let (file, _dir) = create_test_file();
        file.allocate_page().unwrap();

        let result = file.read(PAGE as u64 - 4, 8);
        assert!(matches!(result, Err(BurrowError::IoError(_))));
    }

    #[test]
    fn test_truncate() {
        let (file, _dir) = create_test_file();
        file.allocate_page().unwrap();
        file.allocate_page().unwrap();

        file.truncate(PAGE as u64).unwrap();
        assert_eq!(file.filesize().unwrap(), PAGE as u64);
        assert!(file.read(PAGE as u64, 1).is_err());
    }

    #[test]
    fn test_page_address() {
        let (file, _dir) = create_test_file();
        assert_eq!(file.page_address(0), 0);
        assert_eq!(file.page_address(PAGE as u64 - 1), 0);
        assert_eq!(file.page_address(PAGE as u64), PAGE as u64);
        assert_eq!(file.page_address(PAGE as u64 * 3 + 17), PAGE as u64 * 3);
    }

    #[test]
    fn test_open_missing() {
        let dir = tempdir().unwrap();
        let result = PageFile::open(&dir.path().join("absent.db"), PAGE, false);
        assert!(matches!(result, Err(BurrowError::FileNotFound(_))));
    }

    #[test]
    fn test_persistence_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        {
            let file = PageFile::create(&path, PAGE, true).unwrap();
            file.allocate_page().unwrap();
            file.write(10, &[0xFF; 4]).unwrap();
            file.sync().unwrap();
        }

        let file = PageFile::open(&path, PAGE, true).unwrap();
        assert_eq!(file.filesize().unwrap(), PAGE as u64);
        assert_eq!(file.read(10, 4).unwrap(), vec![0xFF; 4]);
    }

    #[test]
    fn test_zero_page_size_rejected() {
        let dir = tempdir().unwrap();
        let result = PageFile::create(&dir.path().join("test.db"), 0, false);
        assert!(matches!(
            result,
            Err(BurrowError::InvalidParameter { .. })
        ));
    }
}
