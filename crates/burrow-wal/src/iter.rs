//! Newest-first iteration over the log file pair.
//!
//! Recovery must see the most recent authoritative record per page
//! first, so iteration always runs backwards: the active file is drained
//! from its end, then the older file. Each step reads the trailing
//! length word to locate the record start in O(1).

use burrow_common::{BurrowError, Result};
use bytes::Bytes;

use crate::constants::{FILE_HEADER_SIZE, MIN_RECORD_SIZE, TRAILER_SIZE};
use crate::log::Wal;
use crate::record::LogEntry;

/// Position of a reverse scan: the file being drained and the end
/// offset of the next record to return.
#[derive(Debug, Clone, Copy)]
pub struct LogCursor {
    file: usize,
    offset: u64,
    exhausted: bool,
}

impl Wal {
    /// Starts a reverse scan at the end of the active file.
    pub async fn iter_begin(&self) -> Result<LogCursor> {
        let file = self.files.current();
        Ok(LogCursor {
            file,
            offset: self.files.size(file).await?,
            exhausted: false,
        })
    }

    /// Returns the next entry, newest first, or `None` once both files
    /// are drained. Further calls after `None` keep returning `None`.
    ///
    /// Control entries carry no payload; payload-bearing entries return
    /// a caller-owned buffer, zero-length when `data_size` is 0.
    pub async fn next_entry(
        &mut self,
        cursor: &mut LogCursor,
    ) -> Result<Option<(LogEntry, Option<Bytes>)>> {
        loop {
            if cursor.exhausted {
                return Ok(None);
            }

            if cursor.offset > FILE_HEADER_SIZE as u64 {
                let (entry, payload, start) =
                    self.read_record_before(cursor.file, cursor.offset).await?;
                cursor.offset = start;
                let payload = if entry.kind.has_payload() {
                    Some(payload)
                } else {
                    None
                };
                return Ok(Some((entry, payload)));
            }

            if cursor.file == self.files.current() {
                // the newer file is drained, continue with the older one
                cursor.file = 1 - cursor.file;
                cursor.offset = self.files.size(cursor.file).await?;
            } else {
                cursor.exhausted = true;
            }
        }
    }

    /// Reads the record that ends at `end` in file `file` by following
    /// its trailing length word.
    pub(crate) async fn read_record_before(
        &mut self,
        file: usize,
        end: u64,
    ) -> Result<(LogEntry, Bytes, u64)> {
        if end < (FILE_HEADER_SIZE + MIN_RECORD_SIZE) as u64 {
            return Err(BurrowError::InvalidFileHeader(
                "record region smaller than a record".to_string(),
            ));
        }

        let mut trailer = [0u8; TRAILER_SIZE];
        self.files
            .read_exact_at(file, end - TRAILER_SIZE as u64, &mut trailer)
            .await?;
        let total = u64::from_le_bytes(trailer);

        if total < MIN_RECORD_SIZE as u64 || total > end - FILE_HEADER_SIZE as u64 {
            return Err(BurrowError::InvalidFileHeader(format!(
                "implausible trailing length {}",
                total
            )));
        }

        let start = end - total;
        let mut buf = vec![0u8; total as usize];
        self.files.read_exact_at(file, start, &mut buf).await?;

        let (entry, payload, _) = LogEntry::decode_at(&buf, 0)?;
        Ok((entry, payload, start))
    }
}
