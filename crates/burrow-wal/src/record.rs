//! Log entry format and codec.
//!
//! A record on disk is `header || payload || padding || trailing length
//! word`. The header is 40 bytes, all integers little-endian; padding
//! brings the total to an 8-byte boundary; the trailing word holds the
//! total record size so a reader positioned at the end of a record can
//! step backwards in O(1).

use burrow_common::{BurrowError, Result, TxnId};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::constants::{
    ENTRY_ALIGNMENT, ENTRY_HEADER_SIZE, FLAGS_MASK, KIND_SHIFT, MIN_RECORD_SIZE, TRAILER_SIZE,
};

/// Log Sequence Number - unique identifier for each log entry.
///
/// LSNs are issued by a single writer and increase by exactly one per
/// emitted entry. Zero is the "no more entries" sentinel and never
/// appears on disk.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Lsn(pub u64);

impl Lsn {
    /// Invalid/sentinel LSN.
    pub const INVALID: Lsn = Lsn(0);

    /// First LSN issued by a fresh log.
    pub const FIRST: Lsn = Lsn(1);

    /// Returns true if this is a valid LSN.
    pub fn is_valid(&self) -> bool {
        self.0 > 0
    }

    /// Returns the LSN following this one.
    pub fn next(&self) -> Self {
        Lsn(self.0 + 1)
    }
}

impl std::fmt::Display for Lsn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kinds of log entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EntryKind {
    /// Transaction begin delimiter.
    TxnBegin = 1,
    /// Transaction abort delimiter.
    TxnAbort = 2,
    /// Transaction commit delimiter.
    TxnCommit = 3,
    /// Quiescent point marker.
    Checkpoint = 4,
    /// A dirty page was flushed to the data file.
    FlushPage = 5,
    /// Before-image of a page region (undo).
    Prewrite = 6,
    /// After-image of a page region (redo).
    Write = 7,
    /// Combined before+after image; the header's `data_size` is the size
    /// of one image, the payload carries two.
    Overwrite = 8,
}

impl EntryKind {
    /// True for entry kinds that carry a payload field on disk.
    ///
    /// Payload presence is a property of the kind, not of the byte
    /// count: a WRITE with `data_size == 0` still has a (zero-length)
    /// payload, while control entries have none at all.
    pub fn has_payload(&self) -> bool {
        matches!(
            self,
            EntryKind::Prewrite | EntryKind::Write | EntryKind::Overwrite
        )
    }
}

impl TryFrom<u8> for EntryKind {
    type Error = BurrowError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(EntryKind::TxnBegin),
            2 => Ok(EntryKind::TxnAbort),
            3 => Ok(EntryKind::TxnCommit),
            4 => Ok(EntryKind::Checkpoint),
            5 => Ok(EntryKind::FlushPage),
            6 => Ok(EntryKind::Prewrite),
            7 => Ok(EntryKind::Write),
            8 => Ok(EntryKind::Overwrite),
            _ => Err(BurrowError::InvalidFileHeader(format!(
                "unknown entry kind: {}",
                value
            ))),
        }
    }
}

/// A single log entry header.
///
/// Header layout (40 bytes, little-endian):
/// - lsn: 8 bytes
/// - txn_id: 8 bytes (0 for non-transactional entries)
/// - flags: 4 bytes (entry kind in the upper 4 bits)
/// - reserved: 4 bytes
/// - offset: 8 bytes (data-file byte offset for page-level entries)
/// - data_size: 8 bytes (payload bytes; one image size for OVERWRITE)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogEntry {
    /// LSN of this entry.
    pub lsn: Lsn,
    /// Originating transaction, [`TxnId::NONE`] for control entries.
    pub txn_id: TxnId,
    /// Kind of this entry.
    pub kind: EntryKind,
    /// Reserved flag bits (lower 28 bits of the on-disk flags word).
    pub flags: u32,
    /// Data-file byte offset for page-level entries.
    pub offset: u64,
    /// Payload size; for OVERWRITE the size of one image.
    pub data_size: u64,
}

/// Rounds `n` up to the record alignment.
fn align_up(n: usize) -> usize {
    (n + ENTRY_ALIGNMENT - 1) & !(ENTRY_ALIGNMENT - 1)
}

impl LogEntry {
    /// Creates a new log entry.
    pub fn new(lsn: Lsn, txn_id: TxnId, kind: EntryKind, offset: u64, data_size: u64) -> Self {
        Self {
            lsn,
            txn_id,
            kind,
            flags: 0,
            offset,
            data_size,
        }
    }

    /// Creates a transaction begin entry.
    pub fn txn_begin(lsn: Lsn, txn_id: TxnId) -> Self {
        Self::new(lsn, txn_id, EntryKind::TxnBegin, 0, 0)
    }

    /// Creates a transaction abort entry.
    pub fn txn_abort(lsn: Lsn, txn_id: TxnId) -> Self {
        Self::new(lsn, txn_id, EntryKind::TxnAbort, 0, 0)
    }

    /// Creates a transaction commit entry.
    pub fn txn_commit(lsn: Lsn, txn_id: TxnId) -> Self {
        Self::new(lsn, txn_id, EntryKind::TxnCommit, 0, 0)
    }

    /// Creates a checkpoint entry.
    pub fn checkpoint(lsn: Lsn) -> Self {
        Self::new(lsn, TxnId::NONE, EntryKind::Checkpoint, 0, 0)
    }

    /// Creates a flush-page entry for the page at `offset`.
    pub fn flush_page(lsn: Lsn, offset: u64) -> Self {
        Self::new(lsn, TxnId::NONE, EntryKind::FlushPage, offset, 0)
    }

    /// Creates a before-image entry.
    pub fn prewrite(lsn: Lsn, txn_id: TxnId, offset: u64, data_size: u64) -> Self {
        Self::new(lsn, txn_id, EntryKind::Prewrite, offset, data_size)
    }

    /// Creates an after-image entry.
    pub fn write(lsn: Lsn, txn_id: TxnId, offset: u64, data_size: u64) -> Self {
        Self::new(lsn, txn_id, EntryKind::Write, offset, data_size)
    }

    /// Creates a combined before+after image entry. `image_size` is the
    /// size of one image; the payload carries twice as many bytes.
    pub fn overwrite(lsn: Lsn, txn_id: TxnId, offset: u64, image_size: u64) -> Self {
        Self::new(lsn, txn_id, EntryKind::Overwrite, offset, image_size)
    }

    /// Number of payload bytes this entry carries on disk.
    ///
    /// OVERWRITE records one `data_size` in the header but two images in
    /// the payload, so readers must expect `2 * data_size` bytes.
    pub fn payload_len_on_disk(&self) -> usize {
        match self.kind {
            EntryKind::Overwrite => (self.data_size as usize) * 2,
            _ => self.data_size as usize,
        }
    }

    /// Total size of this record on disk: header, payload, padding and
    /// the trailing length word.
    pub fn size_on_disk(&self) -> usize {
        ENTRY_HEADER_SIZE + align_up(self.payload_len_on_disk()) + TRAILER_SIZE
    }

    /// Serializes this entry and its payload into one record.
    ///
    /// Fails with `InvalidParameter` if the payload length does not match
    /// the header's `data_size` (doubled for OVERWRITE).
    pub fn encode(&self, payload: &[u8]) -> Result<Bytes> {
        if payload.len() != self.payload_len_on_disk() {
            return Err(BurrowError::invalid_parameter("payload", payload.len()));
        }

        let total = self.size_on_disk();
        let mut buf = BytesMut::with_capacity(total);

        buf.put_u64_le(self.lsn.0);
        buf.put_u64_le(self.txn_id.0);
        buf.put_u32_le(((self.kind as u32) << KIND_SHIFT) | (self.flags & FLAGS_MASK));
        buf.put_u32_le(0); // reserved
        buf.put_u64_le(self.offset);
        buf.put_u64_le(self.data_size);

        buf.put_slice(payload);
        buf.put_bytes(0, align_up(payload.len()) - payload.len());
        buf.put_u64_le(total as u64);

        Ok(buf.freeze())
    }

    /// Decodes the record starting at `pos`.
    ///
    /// Returns the entry, its payload, and the position just past the
    /// trailing length word.
    pub fn decode_at(buf: &[u8], pos: usize) -> Result<(LogEntry, Bytes, usize)> {
        if buf.len() < pos + MIN_RECORD_SIZE {
            return Err(BurrowError::InvalidFileHeader(
                "truncated log record".to_string(),
            ));
        }

        let mut header = &buf[pos..pos + ENTRY_HEADER_SIZE];
        let lsn = Lsn(header.get_u64_le());
        let txn_id = TxnId(header.get_u64_le());
        let word = header.get_u32_le();
        let kind = EntryKind::try_from((word >> KIND_SHIFT) as u8)?;
        let _reserved = header.get_u32_le();
        let offset = header.get_u64_le();
        let data_size = header.get_u64_le();

        if data_size > (buf.len() - pos) as u64 {
            return Err(BurrowError::InvalidFileHeader(format!(
                "implausible payload size {}",
                data_size
            )));
        }

        let entry = LogEntry {
            lsn,
            txn_id,
            kind,
            flags: word & FLAGS_MASK,
            offset,
            data_size,
        };

        let payload_len = entry.payload_len_on_disk();
        let total = entry.size_on_disk();
        if buf.len() < pos + total {
            return Err(BurrowError::InvalidFileHeader(
                "log record payload exceeds file".to_string(),
            ));
        }

        let trailer = (&buf[pos + total - TRAILER_SIZE..pos + total]).get_u64_le();
        if trailer != total as u64 {
            return Err(BurrowError::InvalidFileHeader(format!(
                "trailing length {} does not match record size {}",
                trailer, total
            )));
        }

        let payload = Bytes::copy_from_slice(&buf[pos + ENTRY_HEADER_SIZE..pos + ENTRY_HEADER_SIZE + payload_len]);
        Ok((entry, payload, pos + total))
    }

    /// Decodes the record that ends at `end` by following the trailing
    /// length word. Returns the entry, its payload, and the record start
    /// (which is the `end` of the preceding record).
    pub fn decode_before(buf: &[u8], end: usize) -> Result<(LogEntry, Bytes, usize)> {
        if end < MIN_RECORD_SIZE || buf.len() < end {
            return Err(BurrowError::InvalidFileHeader(
                "truncated log record".to_string(),
            ));
        }

        let total = (&buf[end - TRAILER_SIZE..end]).get_u64_le() as usize;
        if total < MIN_RECORD_SIZE || total > end {
            return Err(BurrowError::InvalidFileHeader(format!(
                "implausible trailing length {}",
                total
            )));
        }

        let start = end - total;
        let (entry, payload, next) = Self::decode_at(buf, start)?;
        if next != end {
            return Err(BurrowError::InvalidFileHeader(
                "trailing length does not land on a record boundary".to_string(),
            ));
        }

        Ok((entry, payload, start))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lsn_validity() {
        assert!(!Lsn::INVALID.is_valid());
        assert!(Lsn::FIRST.is_valid());
        assert!(Lsn(100).is_valid());
    }

    #[test]
    fn test_lsn_next_and_ordering() {
        assert_eq!(Lsn(1).next(), Lsn(2));
        assert!(Lsn(1) < Lsn(2));
        assert_eq!(Lsn::INVALID.next(), Lsn::FIRST);
    }

    #[test]
    fn test_entry_kind_payload_bearing() {
        assert!(EntryKind::Prewrite.has_payload());
        assert!(EntryKind::Write.has_payload());
        assert!(EntryKind::Overwrite.has_payload());
        assert!(!EntryKind::TxnBegin.has_payload());
        assert!(!EntryKind::TxnAbort.has_payload());
        assert!(!EntryKind::TxnCommit.has_payload());
        assert!(!EntryKind::Checkpoint.has_payload());
        assert!(!EntryKind::FlushPage.has_payload());
    }

    #[test]
    fn test_entry_kind_conversion() {
        assert_eq!(EntryKind::try_from(1).unwrap(), EntryKind::TxnBegin);
        assert_eq!(EntryKind::try_from(4).unwrap(), EntryKind::Checkpoint);
        assert_eq!(EntryKind::try_from(8).unwrap(), EntryKind::Overwrite);
        assert!(EntryKind::try_from(0).is_err());
        assert!(EntryKind::try_from(9).is_err());
        assert!(EntryKind::try_from(255).is_err());
    }

    #[test]
    fn test_constructors() {
        let begin = LogEntry::txn_begin(Lsn(1), TxnId(7));
        assert_eq!(begin.kind, EntryKind::TxnBegin);
        assert_eq!(begin.txn_id, TxnId(7));
        assert_eq!(begin.data_size, 0);

        let flush = LogEntry::flush_page(Lsn(2), 16384);
        assert_eq!(flush.kind, EntryKind::FlushPage);
        assert_eq!(flush.txn_id, TxnId::NONE);
        assert_eq!(flush.offset, 16384);

        let ow = LogEntry::overwrite(Lsn(3), TxnId(1), 0, 100);
        assert_eq!(ow.payload_len_on_disk(), 200);
        assert_eq!(ow.data_size, 100);
    }

    #[test]
    fn test_size_on_disk_alignment() {
        // payload sizes around the padding boundary
        for (payload, expected_body) in [(0, 0), (1, 8), (7, 8), (8, 8), (9, 16)] {
            let entry = LogEntry::write(Lsn(1), TxnId(1), 0, payload as u64);
            assert_eq!(
                entry.size_on_disk(),
                ENTRY_HEADER_SIZE + expected_body + TRAILER_SIZE,
                "payload size {}",
                payload
            );
        }
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        for payload_len in [0usize, 1, 7, 8, 9, 100] {
            let payload: Vec<u8> = (0..payload_len).map(|i| i as u8).collect();
            let entry = LogEntry::write(Lsn(42), TxnId(3), 4096, payload_len as u64);

            let encoded = entry.encode(&payload).unwrap();
            assert_eq!(encoded.len(), entry.size_on_disk());
            assert_eq!(encoded.len() % 8, 0);

            let (decoded, data, next) = LogEntry::decode_at(&encoded, 0).unwrap();
            assert_eq!(decoded, entry);
            assert_eq!(&data[..], &payload[..]);
            assert_eq!(next, encoded.len());
        }
    }

    #[test]
    fn test_decode_before_roundtrip() {
        let payload = vec![0xAB; 20];
        let entry = LogEntry::prewrite(Lsn(9), TxnId(2), 8192, 20);
        let encoded = entry.encode(&payload).unwrap();

        let (decoded, data, prev_end) = LogEntry::decode_before(&encoded, encoded.len()).unwrap();
        assert_eq!(decoded, entry);
        assert_eq!(&data[..], &payload[..]);
        assert_eq!(prev_end, 0);
    }

    #[test]
    fn test_decode_before_walks_consecutive_records() {
        let mut buf = Vec::new();
        for i in 1..=3u64 {
            let entry = LogEntry::txn_begin(Lsn(i), TxnId(i));
            buf.extend_from_slice(&entry.encode(&[]).unwrap());
        }

        let mut end = buf.len();
        for i in (1..=3u64).rev() {
            let (entry, _, prev) = LogEntry::decode_before(&buf, end).unwrap();
            assert_eq!(entry.lsn, Lsn(i));
            end = prev;
        }
        assert_eq!(end, 0);
    }

    #[test]
    fn test_overwrite_payload_asymmetry() {
        let old = vec![1u8; 50];
        let new = vec![2u8; 50];
        let mut payload = old.clone();
        payload.extend_from_slice(&new);

        let entry = LogEntry::overwrite(Lsn(5), TxnId(1), 0, 50);
        let encoded = entry.encode(&payload).unwrap();

        let (decoded, data, _) = LogEntry::decode_at(&encoded, 0).unwrap();
        assert_eq!(decoded.data_size, 50);
        assert_eq!(data.len(), 100);
        assert_eq!(&data[..50], &old[..]);
        assert_eq!(&data[50..], &new[..]);

        // a single image is rejected
        assert!(matches!(
            entry.encode(&old),
            Err(BurrowError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_encode_rejects_mismatched_payload() {
        let entry = LogEntry::write(Lsn(1), TxnId(1), 0, 10);
        assert!(matches!(
            entry.encode(&[0u8; 9]),
            Err(BurrowError::InvalidParameter { .. })
        ));
        assert!(entry.encode(&[0u8; 10]).is_ok());
    }

    #[test]
    fn test_decode_rejects_unknown_kind() {
        let entry = LogEntry::txn_begin(Lsn(1), TxnId(1));
        let mut encoded = entry.encode(&[]).unwrap().to_vec();
        // overwrite the kind bits with an out-of-range code
        let word = 15u32 << KIND_SHIFT;
        encoded[16..20].copy_from_slice(&word.to_le_bytes());

        assert!(matches!(
            LogEntry::decode_at(&encoded, 0),
            Err(BurrowError::InvalidFileHeader(_))
        ));
    }

    #[test]
    fn test_decode_rejects_corrupt_trailer() {
        let entry = LogEntry::txn_begin(Lsn(1), TxnId(1));
        let mut encoded = entry.encode(&[]).unwrap().to_vec();
        let len = encoded.len();
        encoded[len - 8..].copy_from_slice(&999u64.to_le_bytes());

        assert!(LogEntry::decode_at(&encoded, 0).is_err());
        assert!(LogEntry::decode_before(&encoded, len).is_err());
    }

    #[test]
    fn test_decode_rejects_truncated_buffer() {
        let entry = LogEntry::write(Lsn(1), TxnId(1), 0, 64);
        let encoded = entry.encode(&[0u8; 64]).unwrap();

        assert!(LogEntry::decode_at(&encoded[..encoded.len() - 1], 0).is_err());
        assert!(LogEntry::decode_at(&encoded[..20], 0).is_err());
        assert!(LogEntry::decode_before(&encoded, MIN_RECORD_SIZE - 1).is_err());
    }

    #[test]
    fn test_zero_size_payload_decodes_cleanly() {
        let entry = LogEntry::write(Lsn(1), TxnId(1), 4096, 0);
        let encoded = entry.encode(&[]).unwrap();
        let (decoded, data, _) = LogEntry::decode_at(&encoded, 0).unwrap();
        assert_eq!(decoded.data_size, 0);
        assert!(data.is_empty());
    }
}
