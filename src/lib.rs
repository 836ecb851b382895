//! blob_cache: fixed-capacity on-disk cache mapping 64-bit keys to byte blobs.
//!
//! A cache at path prefix `P` lives in three files: the index `P.idx`
//! (header plus two linear-probing slot tables, memory-mapped) and the data
//! files `P.0` and `P.1`. One data file is active and takes appends; the other
//! holds the previous generation and still answers lookups until the next
//! rotation wipes it. Anything that fails validation on open is discarded
//! wholesale: the contents are a cache, never a system of record.
//!
//! ```no_run
//! use blob_cache::BlobCache;
//!
//! let mut cache = BlobCache::open("/tmp/imgcache", 5000, 200 << 20, false, 7)?;
//! cache.insert(42, b"thumbnail bytes")?;
//! assert_eq!(cache.lookup(42)?.as_deref(), Some(&b"thumbnail bytes"[..]));
//! cache.close()?;
//! # Ok::<(), std::io::Error>(())
//! ```

pub mod blob_cache;
pub mod checksum;
pub mod error;
pub mod hash_index;
mod index_file;
pub mod index_header;
pub mod options;
pub mod region;

pub use blob_cache::{data_path, index_path, BlobCache, CacheStats};
pub use error::Corruption;
pub use options::BlobCacheOptions;
