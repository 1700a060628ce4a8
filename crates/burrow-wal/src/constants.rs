//! On-disk format constants for the log file pair.

// Log file header constants

/// Magic bytes identifying a Burrow log file.
pub const FILE_MAGIC: [u8; 4] = *b"BWAL";

/// Size of the per-file header: magic plus reserved padding up to the
/// record alignment.
pub const FILE_HEADER_SIZE: usize = 8;

// Log entry constants

/// Size of the fixed entry header in bytes.
pub const ENTRY_HEADER_SIZE: usize = 40;

/// Records are padded to this boundary.
pub const ENTRY_ALIGNMENT: usize = 8;

/// Size of the trailing length word enabling reverse iteration.
pub const TRAILER_SIZE: usize = 8;

/// Smallest possible record: header plus trailer, no payload.
pub const MIN_RECORD_SIZE: usize = ENTRY_HEADER_SIZE + TRAILER_SIZE;

/// Offset of the flags word (entry kind in the upper 4 bits) within the
/// entry header, for in-place inspection or patching of records.
pub const OFF_FLAGS: usize = 16;

/// Bit position of the entry kind within the flags word.
pub const KIND_SHIFT: u32 = 28;

/// Mask of the reserved (non-kind) bits of the flags word.
pub const FLAGS_MASK: u32 = (1 << KIND_SHIFT) - 1;
