//! The cache engine.
//!
//! Inserts append to the active region's data file and claim a slot in the
//! active slot table. Once more than half the slots are taken, or the next
//! record would overflow the data file, the regions rotate: the inactive one
//! is wiped and becomes active, and the old active one is kept read-only
//! until the rotation after that. Lookups try the active region first, then
//! the inactive one.
//!
//! A `BlobCache` is not meant to be shared between threads, and only one
//! instance should have a given path open at a time.

use std::ffi::OsString;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use memmap2::MmapMut;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{invalid_input, Corruption, LoadError};
use crate::hash_index::{self, Slot};
use crate::index_file::MappedIndex;
use crate::index_header::{index_file_len, IndexHeader, DATA_HEADER_SIZE, INDEX_HEADER_SIZE};
use crate::options::BlobCacheOptions;
use crate::region::{record_size, RecordStatus, Region};

/// `<path>.idx`
pub fn index_path(path: &Path) -> PathBuf {
    with_suffix(path, ".idx")
}

/// `<path>.0` or `<path>.1`
pub fn data_path(path: &Path, region: usize) -> PathBuf {
    with_suffix(path, if region == 0 { ".0" } else { ".1" })
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Snapshot of the header counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub max_entries: u32,
    pub max_bytes: u32,
    pub version: u32,
    pub active_region: u32,
    pub active_entries: u32,
    pub active_bytes: u32,
    pub inactive_bytes: u32,
}

pub struct BlobCache {
    path: PathBuf,
    index: MappedIndex,
    regions: [Region; 2],
    header: IndexHeader,
    promote_on_hit: bool,
}

impl fmt::Debug for BlobCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BlobCache<{}: region {}, {}/{} entries, {}/{} bytes>",
            self.path.display(),
            self.header.active_region,
            self.header.active_entries,
            self.header.max_entries,
            self.header.active_bytes,
            self.header.max_bytes
        )
    }
}

impl BlobCache {
    /// Opens the cache at `path`, creating or resetting it as needed.
    ///
    /// A cache that fails validation, or whose version differs from `version`,
    /// is silently emptied. Only I/O failures (or a cache that still fails
    /// validation right after being reset) are returned as errors.
    pub fn open<P: AsRef<Path>>(
        path: P,
        max_entries: u32,
        max_bytes: u32,
        reset: bool,
        version: u32,
    ) -> io::Result<Self> {
        let options = BlobCacheOptions::new(max_entries, max_bytes)
            .version(version)
            .reset(reset);
        Self::open_with(path, &options)
    }

    pub fn open_with<P: AsRef<Path>>(path: P, options: &BlobCacheOptions) -> io::Result<Self> {
        options.check()?;
        let path = path.as_ref().to_path_buf();

        let mut index_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(index_path(&path))?;
        let mut regions = [
            Region::open(&data_path(&path, 0), 0)?,
            Region::open(&data_path(&path, 1), 1)?,
        ];

        if options.reset {
            info!(path = %path.display(), "reset requested, discarding cache contents");
        } else {
            match load_index(&mut index_file, &mut regions, options.version) {
                Ok((map, header)) => {
                    return Ok(Self::assemble(path, index_file, map, regions, header, options))
                }
                Err(LoadError::Corrupt(reason)) => {
                    warn!(path = %path.display(), %reason, "cache index rejected, resetting")
                }
                Err(LoadError::Io(e)) => {
                    warn!(path = %path.display(), error = %e, "cannot load cache index, resetting")
                }
            }
        }

        reset_files(&mut index_file, &mut regions, options)?;
        match load_index(&mut index_file, &mut regions, options.version) {
            Ok((map, header)) => Ok(Self::assemble(path, index_file, map, regions, header, options)),
            Err(e) => Err(io::Error::new(
                io::ErrorKind::Other,
                format!("unable to load index after reset: {e}"),
            )),
        }
    }

    fn assemble(
        path: PathBuf,
        index_file: File,
        map: MmapMut,
        regions: [Region; 2],
        header: IndexHeader,
        options: &BlobCacheOptions,
    ) -> Self {
        debug!(
            path = %path.display(),
            region = header.active_region,
            entries = header.active_entries,
            bytes = header.active_bytes,
            "cache opened"
        );
        Self {
            path,
            index: MappedIndex::new(index_file, map, header.max_entries),
            regions,
            header,
            promote_on_hit: options.promote_on_hit,
        }
    }

    /// Best-effort removal of the three files of the cache at `path`.
    pub fn delete_files<P: AsRef<Path>>(path: P) {
        let path = path.as_ref();
        for file in [index_path(path), data_path(path, 0), data_path(path, 1)] {
            if let Err(e) = fs::remove_file(&file) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(file = %file.display(), error = %e, "cannot delete cache file");
                }
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn max_entries(&self) -> u32 {
        self.header.max_entries
    }

    pub fn max_bytes(&self) -> u32 {
        self.header.max_bytes
    }

    pub fn version(&self) -> u32 {
        self.header.version
    }

    pub fn active_region(&self) -> usize {
        self.header.active_region as usize
    }

    pub fn stats(&self) -> CacheStats {
        let active = self.active_region();
        CacheStats {
            max_entries: self.header.max_entries,
            max_bytes: self.header.max_bytes,
            version: self.header.version,
            active_region: self.header.active_region,
            active_entries: self.header.active_entries,
            active_bytes: self.header.active_bytes,
            inactive_bytes: self.regions[1 - active].end(),
        }
    }

    /// Stores `data` under `key`, rotating regions when the active one fills.
    ///
    /// A payload that could never fit in a region is rejected with
    /// `InvalidInput` and nothing is written.
    pub fn insert(&mut self, key: u64, data: &[u8]) -> io::Result<()> {
        let needed = record_size(data.len());
        let max_bytes = u64::from(self.header.max_bytes);
        if DATA_HEADER_SIZE as u64 + needed > max_bytes {
            return Err(invalid_input(format!(
                "blob of {} bytes can never fit a {} byte region",
                data.len(),
                max_bytes
            )));
        }

        if u64::from(self.header.active_bytes) + needed > max_bytes {
            self.rotate()?;
        } else if hash_index::find_slot(self.index.slots(self.active_region()), key) == Slot::Full {
            // Only reachable when the slot table and header counters disagree.
            warn!(
                path = %self.path.display(),
                entries = self.header.active_entries,
                "active slot table full below rotation threshold, rotating"
            );
            self.rotate()?;
        }
        self.insert_active(key, data)?;
        if self.header.active_entries > self.header.max_entries / 2 {
            self.rotate()?;
        }
        Ok(())
    }

    /// Writes the record, then the slot, then the header counters, so a failed
    /// write never advances the counters.
    fn insert_active(&mut self, key: u64, data: &[u8]) -> io::Result<()> {
        let active = self.active_region();
        let (slot, vacant) = match hash_index::find_slot(self.index.slots(active), key) {
            Slot::Occupied(i) => (i, false),
            Slot::Vacant(i) => (i, true),
            Slot::Full => {
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    "active slot table is full",
                ))
            }
        };

        let offset = self.header.active_bytes;
        self.regions[active].append(offset, key, data)?;

        self.index.slots_mut(active)[slot] = hash_index::HashSlot::new(key, offset);
        if vacant {
            self.header.active_entries += 1;
        }
        self.header.active_bytes = self.regions[active].end();
        self.index.write_header(&self.header);
        Ok(())
    }

    fn rotate(&mut self) -> io::Result<()> {
        let retired = self.active_region();
        let next = 1 - retired;

        self.regions[next].reset()?;
        hash_index::clear(self.index.slots_mut(next));
        self.header.active_region = next as u32;
        self.header.active_entries = 0;
        self.header.active_bytes = DATA_HEADER_SIZE as u32;
        self.index.write_header(&self.header);

        info!(
            path = %self.path.display(),
            from = retired,
            to = next,
            retired_bytes = self.regions[retired].end(),
            "rotated active region"
        );
        // Failure is already logged, and the rotation stands either way.
        let _ = self.sync_index();
        Ok(())
    }

    pub fn lookup(&mut self, key: u64) -> io::Result<Option<Vec<u8>>> {
        let mut buf = Vec::new();
        Ok(self.lookup_into(key, &mut buf)?.then_some(buf))
    }

    /// Looks up `key`, leaving the payload in `buf`.
    ///
    /// `buf` is cleared and resized to exactly the payload length, reusing its
    /// allocation and growing it when the payload is larger. On a miss it is
    /// left empty.
    pub fn lookup_into(&mut self, key: u64, buf: &mut Vec<u8>) -> io::Result<bool> {
        buf.clear();
        let active = self.active_region();
        if self.lookup_region(active, key, buf)? {
            return Ok(true);
        }
        if self.lookup_region(1 - active, key, buf)? {
            if self.promote_on_hit {
                self.promote(key, buf);
            }
            return Ok(true);
        }
        Ok(false)
    }

    /// A record that fails verification is skipped and the probe goes on, so
    /// one torn write costs that record only.
    fn lookup_region(&mut self, region: usize, key: u64, buf: &mut Vec<u8>) -> io::Result<bool> {
        let slots = self.index.slots(region);
        let data = &mut self.regions[region];
        for (slot, offset) in hash_index::probe(slots, key) {
            match data.read_record(offset, key, buf)? {
                RecordStatus::Valid => return Ok(true),
                status => warn!(region, slot, offset, key, ?status, "skipping unreadable record"),
            }
        }
        Ok(false)
    }

    /// Copies an inactive hit forward, but only if that cannot trigger a rotation.
    fn promote(&mut self, key: u64, payload: &[u8]) {
        let fits = u64::from(self.header.active_bytes) + record_size(payload.len())
            <= u64::from(self.header.max_bytes);
        let below_threshold = self.header.active_entries < self.header.max_entries / 2;
        if !(fits && below_threshold) {
            return;
        }
        match self.insert_active(key, payload) {
            Ok(()) => debug!(key, "promoted inactive hit"),
            Err(e) => warn!(key, error = %e, "cannot promote inactive hit"),
        }
    }

    /// Number of slots in the active region whose record still verifies.
    pub fn active_count(&mut self) -> io::Result<usize> {
        let active = self.active_region();
        let slots = self.index.slots(active);
        let data = &mut self.regions[active];
        let mut scratch = Vec::new();
        let mut count = 0;
        for slot in slots.iter().filter(|slot| !slot.is_vacant()) {
            if data.read_record(slot.offset(), slot.key(), &mut scratch)? == RecordStatus::Valid {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Flushes the mapped index. Failures are logged and returned, and the
    /// cache stays usable.
    pub fn sync_index(&self) -> io::Result<()> {
        self.index.flush().map_err(|e| {
            warn!(path = %self.path.display(), error = %e, "sync index failed");
            e
        })
    }

    /// Flushes the index and both data files, attempting all three and
    /// returning the first failure.
    pub fn sync_all(&self) -> io::Result<()> {
        let mut first = self.sync_index().err();
        for region in &self.regions {
            if let Err(e) = region.sync() {
                warn!(path = %self.path.display(), region = region.id(), error = %e, "sync data file failed");
                first.get_or_insert(e);
            }
        }
        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Syncs everything and releases the files. Dropping the cache also
    /// releases them, but without the sync.
    pub fn close(self) -> io::Result<()> {
        self.sync_all()
    }
}

fn load_index(
    index_file: &mut File,
    regions: &mut [Region; 2],
    version: u32,
) -> Result<(MmapMut, IndexHeader), LoadError> {
    let index_len = index_file.metadata()?.len();
    if index_len < INDEX_HEADER_SIZE as u64 {
        return Err(Corruption::ShortHeader(index_len).into());
    }
    let mut buf = [0u8; INDEX_HEADER_SIZE];
    index_file.seek(SeekFrom::Start(0))?;
    index_file.read_exact(&mut buf)?;

    let header = IndexHeader::decode(&buf, version)?;
    header.validate(index_len)?;

    for region in regions.iter_mut() {
        if !region.check_magic()? {
            return Err(Corruption::DataMagic { region: region.id() }.into());
        }
    }

    // The length was validated above and the mapping is private to this instance.
    let map = unsafe { MmapMut::map_mut(&*index_file)? };

    let active = header.active_region as usize;
    regions[active].truncate_to(header.active_bytes)?;
    regions[1 - active].adopt(header.max_bytes)?;
    Ok((map, header))
}

fn reset_files(
    index_file: &mut File,
    regions: &mut [Region; 2],
    options: &BlobCacheOptions,
) -> io::Result<()> {
    let header = IndexHeader::fresh(options.max_entries, options.max_bytes, options.version);
    index_file.set_len(0)?;
    index_file.set_len(index_file_len(options.max_entries))?;
    index_file.seek(SeekFrom::Start(0))?;
    index_file.write_all(&header.encode())?;
    for region in regions.iter_mut() {
        region.reset()?;
    }
    Ok(())
}
