use std::io;

use thiserror::Error;

/// A reason the on-disk cache was rejected at open time.
///
/// Never surfaced as a failure: any of these turns into a full reset.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Corruption {
    #[error("index header truncated ({0} bytes)")]
    ShortHeader(u64),
    #[error("bad index magic {0:#010x}")]
    IndexMagic(u32),
    #[error("version mismatch (expected {expected}, found {found})")]
    Version { expected: u32, found: u32 },
    #[error("header checksum mismatch (stored {stored:#010x}, computed {computed:#010x})")]
    HeaderChecksum { stored: u32, computed: u32 },
    #[error("invalid max entries {0}")]
    MaxEntries(u32),
    #[error("invalid max bytes {0}")]
    MaxBytes(u32),
    #[error("invalid active region {0}")]
    ActiveRegion(u32),
    #[error("invalid active entries {0}")]
    ActiveEntries(u32),
    #[error("invalid active bytes {0}")]
    ActiveBytes(u32),
    #[error("index file is {actual} bytes, expected {expected}")]
    IndexLength { expected: u64, actual: u64 },
    #[error("data file {region} has no magic marker")]
    DataMagic { region: usize },
}

#[derive(Debug, Error)]
pub(crate) enum LoadError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Corrupt(#[from] Corruption),
}

pub(crate) fn invalid_input(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, msg.into())
}
