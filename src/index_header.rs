//! Layout of the index file header and the checks run against it on open.
//!
//! ```text
//! [0]  magic            0xB3273030
//! [4]  max entries      hash slots per region
//! [8]  max bytes        data bytes per region, including the 4-byte data magic
//! [12] active region    0 or 1
//! [16] active entries   occupied slots in the active region
//! [20] active bytes     bytes used in the active data file
//! [24] version          caller-supplied schema version
//! [28] checksum         Adler-32 of [0..28)
//! [32] slot table for region 0, then slot table for region 1
//! ```
//!
//! All integers are little-endian.

use zerocopy::byteorder::{LittleEndian, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

use crate::checksum::adler32;
use crate::error::Corruption;

pub const INDEX_MAGIC: u32 = 0xB327_3030;
pub const DATA_MAGIC: u32 = 0xBD24_8510;

pub const INDEX_HEADER_SIZE: usize = 32;
pub const DATA_HEADER_SIZE: usize = 4;
pub const SLOT_SIZE: usize = 12;
pub const RECORD_HEADER_SIZE: usize = 20;

const CHECKSUM_OFFSET: usize = 28;

#[repr(C)]
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes, Unaligned)]
struct RawHeader {
    magic: U32<LittleEndian>,
    max_entries: U32<LittleEndian>,
    max_bytes: U32<LittleEndian>,
    active_region: U32<LittleEndian>,
    active_entries: U32<LittleEndian>,
    active_bytes: U32<LittleEndian>,
    version: U32<LittleEndian>,
    checksum: U32<LittleEndian>,
}

/// In-memory mirror of the index header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexHeader {
    pub max_entries: u32,
    pub max_bytes: u32,
    pub active_region: u32,
    pub active_entries: u32,
    pub active_bytes: u32,
    pub version: u32,
}

/// Exact length of an index file holding two tables of `max_entries` slots.
pub fn index_file_len(max_entries: u32) -> u64 {
    INDEX_HEADER_SIZE as u64 + u64::from(max_entries) * SLOT_SIZE as u64 * 2
}

impl IndexHeader {
    /// Header of an empty cache: region 0 active, nothing but the data magic written.
    pub fn fresh(max_entries: u32, max_bytes: u32, version: u32) -> Self {
        Self {
            max_entries,
            max_bytes,
            active_region: 0,
            active_entries: 0,
            active_bytes: DATA_HEADER_SIZE as u32,
            version,
        }
    }

    pub fn encode(&self) -> [u8; INDEX_HEADER_SIZE] {
        let mut raw = RawHeader {
            magic: U32::new(INDEX_MAGIC),
            max_entries: U32::new(self.max_entries),
            max_bytes: U32::new(self.max_bytes),
            active_region: U32::new(self.active_region),
            active_entries: U32::new(self.active_entries),
            active_bytes: U32::new(self.active_bytes),
            version: U32::new(self.version),
            checksum: U32::new(0),
        };
        raw.checksum = U32::new(adler32(&raw.as_bytes()[..CHECKSUM_OFFSET]));

        let mut out = [0u8; INDEX_HEADER_SIZE];
        out.copy_from_slice(raw.as_bytes());
        out
    }

    /// Parses a header, checking magic, version and checksum. Bounds are
    /// left to [`IndexHeader::validate`].
    pub fn decode(bytes: &[u8], expected_version: u32) -> Result<Self, Corruption> {
        let raw = bytes
            .get(..INDEX_HEADER_SIZE)
            .and_then(RawHeader::read_from)
            .ok_or(Corruption::ShortHeader(bytes.len() as u64))?;

        if raw.magic.get() != INDEX_MAGIC {
            return Err(Corruption::IndexMagic(raw.magic.get()));
        }
        if raw.version.get() != expected_version {
            return Err(Corruption::Version {
                expected: expected_version,
                found: raw.version.get(),
            });
        }
        let computed = adler32(&raw.as_bytes()[..CHECKSUM_OFFSET]);
        if raw.checksum.get() != computed {
            return Err(Corruption::HeaderChecksum {
                stored: raw.checksum.get(),
                computed,
            });
        }

        Ok(Self {
            max_entries: raw.max_entries.get(),
            max_bytes: raw.max_bytes.get(),
            active_region: raw.active_region.get(),
            active_entries: raw.active_entries.get(),
            active_bytes: raw.active_bytes.get(),
            version: raw.version.get(),
        })
    }

    /// Geometry and counter sanity, plus the exact index file length.
    pub fn validate(&self, index_len: u64) -> Result<(), Corruption> {
        if self.max_entries == 0 {
            return Err(Corruption::MaxEntries(self.max_entries));
        }
        if self.max_bytes == 0 {
            return Err(Corruption::MaxBytes(self.max_bytes));
        }
        if self.active_region > 1 {
            return Err(Corruption::ActiveRegion(self.active_region));
        }
        if self.active_entries > self.max_entries {
            return Err(Corruption::ActiveEntries(self.active_entries));
        }
        if (self.active_bytes as usize) < DATA_HEADER_SIZE || self.active_bytes > self.max_bytes {
            return Err(Corruption::ActiveBytes(self.active_bytes));
        }
        let expected = index_file_len(self.max_entries);
        if index_len != expected {
            return Err(Corruption::IndexLength {
                expected,
                actual: index_len,
            });
        }
        Ok(())
    }
}
