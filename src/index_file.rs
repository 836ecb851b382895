use std::fs::File;
use std::io;
use std::ops::Range;

use memmap2::MmapMut;
use zerocopy::FromBytes;

use crate::hash_index::HashSlot;
use crate::index_header::{IndexHeader, INDEX_HEADER_SIZE, SLOT_SIZE};

/// The memory-mapped index file: header followed by both slot tables.
///
/// All access goes through slot-sized views of the mapping; the length was
/// checked against the header before mapping.
pub(crate) struct MappedIndex {
    map: MmapMut,
    max_entries: usize,
    // Held for as long as the mapping lives.
    _file: File,
}

impl MappedIndex {
    pub(crate) fn new(file: File, map: MmapMut, max_entries: u32) -> Self {
        Self {
            map,
            max_entries: max_entries as usize,
            _file: file,
        }
    }

    fn table(&self, region: usize) -> Range<usize> {
        let len = self.max_entries * SLOT_SIZE;
        let start = INDEX_HEADER_SIZE + region * len;
        start..start + len
    }

    pub(crate) fn write_header(&mut self, header: &IndexHeader) {
        self.map[..INDEX_HEADER_SIZE].copy_from_slice(&header.encode());
    }

    pub(crate) fn slots(&self, region: usize) -> &[HashSlot] {
        let range = self.table(region);
        debug_assert!(range.end <= self.map.len(), "slot table {range:?} outside mapping");
        self.map
            .get(range)
            .and_then(HashSlot::slice_from)
            .unwrap_or_default()
    }

    pub(crate) fn slots_mut(&mut self, region: usize) -> &mut [HashSlot] {
        let range = self.table(region);
        debug_assert!(range.end <= self.map.len(), "slot table {range:?} outside mapping");
        self.map
            .get_mut(range)
            .and_then(HashSlot::mut_slice_from)
            .unwrap_or_default()
    }

    pub(crate) fn flush(&self) -> io::Result<()> {
        self.map.flush()
    }
}
