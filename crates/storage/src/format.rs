//! On-disk record format of the file store
//!
//! ```text
//! +--------+---------+-------+---------+---------+---------------+
//! | magic  | version | flags | crc32   | length  | payload       |
//! | 4 B    | 8 B LE  | 1 B   | 4 B LE  | 4 B LE  | length bytes  |
//! +--------+---------+-------+---------+---------+---------------+
//! ```
//!
//! The CRC covers version, flags, length and payload. A record with the
//! tombstone flag has an empty payload and only preserves the version of a
//! deleted key, so the next record created under it gets a fresh version.

use indexsync_core::Version;

/// Magic bytes at the start of every record file
pub const RECORD_MAGIC: &[u8; 4] = b"ISR1";

/// Size of the fixed header
pub const RECORD_HEADER_SIZE: usize = 4 + 8 + 1 + 4 + 4;

const FLAG_TOMBSTONE: u8 = 0x01;

/// A decoded record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    /// Record version
    pub version: Version,
    /// Payload, `None` for a tombstone
    pub payload: Option<Vec<u8>>,
}

/// Why a record failed to decode
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordFormatError {
    /// File shorter than the header or the declared length
    Truncated {
        /// Bytes needed
        needed: usize,
        /// Bytes present
        have: usize,
    },
    /// Wrong magic bytes
    BadMagic,
    /// Checksum mismatch
    ChecksumMismatch {
        /// Stored checksum
        stored: u32,
        /// Computed checksum
        computed: u32,
    },
}

impl std::fmt::Display for RecordFormatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordFormatError::Truncated { needed, have } => {
                write!(f, "truncated record: need {} bytes, have {}", needed, have)
            }
            RecordFormatError::BadMagic => write!(f, "bad magic"),
            RecordFormatError::ChecksumMismatch { stored, computed } => write!(
                f,
                "checksum mismatch: stored {:08x}, computed {:08x}",
                stored, computed
            ),
        }
    }
}

fn checksum(version: u64, flags: u8, payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&version.to_le_bytes());
    hasher.update(&[flags]);
    hasher.update(&(payload.len() as u32).to_le_bytes());
    hasher.update(payload);
    hasher.finalize()
}

/// Encode a record
pub fn encode_record(record: &StoredRecord) -> Vec<u8> {
    let (flags, payload): (u8, &[u8]) = match &record.payload {
        Some(p) => (0, p.as_slice()),
        None => (FLAG_TOMBSTONE, &[]),
    };
    let version = record.version.as_u64();

    let mut buf = Vec::with_capacity(RECORD_HEADER_SIZE + payload.len());
    buf.extend_from_slice(RECORD_MAGIC);
    buf.extend_from_slice(&version.to_le_bytes());
    buf.push(flags);
    buf.extend_from_slice(&checksum(version, flags, payload).to_le_bytes());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Decode a record, validating magic, length and checksum
pub fn decode_record(bytes: &[u8]) -> Result<StoredRecord, RecordFormatError> {
    if bytes.len() < RECORD_HEADER_SIZE {
        return Err(RecordFormatError::Truncated {
            needed: RECORD_HEADER_SIZE,
            have: bytes.len(),
        });
    }
    if &bytes[0..4] != RECORD_MAGIC {
        return Err(RecordFormatError::BadMagic);
    }

    let version = u64::from_le_bytes(read_array(&bytes[4..12]));
    let flags = bytes[12];
    let stored = u32::from_le_bytes(read_array(&bytes[13..17]));
    let len = u32::from_le_bytes(read_array(&bytes[17..21])) as usize;

    let needed = RECORD_HEADER_SIZE + len;
    if bytes.len() < needed {
        return Err(RecordFormatError::Truncated {
            needed,
            have: bytes.len(),
        });
    }
    let payload = &bytes[RECORD_HEADER_SIZE..needed];

    let computed = checksum(version, flags, payload);
    if computed != stored {
        return Err(RecordFormatError::ChecksumMismatch { stored, computed });
    }

    Ok(StoredRecord {
        version: Version::new(version),
        payload: if flags & FLAG_TOMBSTONE != 0 {
            None
        } else {
            Some(payload.to_vec())
        },
    })
}

fn read_array<const N: usize>(slice: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(slice);
    out
}
