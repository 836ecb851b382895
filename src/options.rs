use std::io;

use serde::{Deserialize, Serialize};

use crate::error::invalid_input;
use crate::index_header::DATA_HEADER_SIZE;

/// How to open a [`BlobCache`](crate::BlobCache).
///
/// `max_entries` and `max_bytes` only shape a cache that is being created or
/// reset; an existing valid cache keeps the geometry stored in its header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobCacheOptions {
    /// Hash slots per region. At most half are filled before the regions rotate.
    pub max_entries: u32,
    /// Data file capacity per region, including the 4-byte magic marker.
    pub max_bytes: u32,
    /// Schema version of the payloads; a mismatch on open empties the cache.
    pub version: u32,
    /// Discard whatever is on disk.
    pub reset: bool,
    /// Copy hits found in the inactive region into the active one.
    pub promote_on_hit: bool,
}

impl Default for BlobCacheOptions {
    fn default() -> Self {
        Self {
            max_entries: 5000,
            max_bytes: 200 * 1024 * 1024,
            version: 1,
            reset: false,
            promote_on_hit: false,
        }
    }
}

impl BlobCacheOptions {
    pub fn new(max_entries: u32, max_bytes: u32) -> Self {
        Self {
            max_entries,
            max_bytes,
            ..Self::default()
        }
    }

    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn reset(mut self, reset: bool) -> Self {
        self.reset = reset;
        self
    }

    pub fn promote_on_hit(mut self, promote: bool) -> Self {
        self.promote_on_hit = promote;
        self
    }

    pub(crate) fn check(&self) -> io::Result<()> {
        if self.max_entries == 0 {
            return Err(invalid_input("max_entries must be positive"));
        }
        if (self.max_bytes as usize) < DATA_HEADER_SIZE {
            return Err(invalid_input(format!(
                "max_bytes must be at least {}, got {}",
                DATA_HEADER_SIZE, self.max_bytes
            )));
        }
        Ok(())
    }
}
