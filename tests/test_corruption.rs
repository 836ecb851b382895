#[cfg(test)]
mod corruption {
    use blob_cache::index_header::{INDEX_HEADER_SIZE, RECORD_HEADER_SIZE, SLOT_SIZE};
    use blob_cache::{data_path, index_path, BlobCache};
    use std::fs::{self, OpenOptions};
    use std::io::{Seek, SeekFrom, Write};
    use std::path::Path;
    use tempfile::tempdir;

    fn seeded(path: &Path) {
        let mut cache = BlobCache::open(path, 16, 4096, false, 1).unwrap();
        cache.insert(1, b"one").unwrap();
        cache.insert(2, b"two").unwrap();
        cache.close().unwrap();
    }

    fn patch(file: &Path, offset: u64, bytes: &[u8]) {
        let mut f = OpenOptions::new().write(true).open(file).unwrap();
        f.seek(SeekFrom::Start(offset)).unwrap();
        f.write_all(bytes).unwrap();
    }

    fn flip(file: &Path, offset: usize) {
        let mut data = fs::read(file).unwrap();
        data[offset] ^= 0xFF;
        fs::write(file, &data).unwrap();
    }

    fn assert_reset(cache: &mut BlobCache) {
        assert!(cache.lookup(1).unwrap().is_none());
        assert!(cache.lookup(2).unwrap().is_none());
        let stats = cache.stats();
        assert_eq!(stats.active_region, 0);
        assert_eq!(stats.active_entries, 0);
        assert_eq!(stats.active_bytes, 4);
        // And it is fully usable again.
        cache.insert(3, b"three").unwrap();
        assert_eq!(cache.lookup(3).unwrap().unwrap(), b"three");
    }

    #[test]
    fn test_header_checksum_mismatch_resets() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache");
        seeded(&path);
        flip(&index_path(&path), 20);
        let mut cache = BlobCache::open(&path, 16, 4096, false, 1).unwrap();
        assert_reset(&mut cache);
    }

    #[test]
    fn test_bad_index_magic_resets() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache");
        seeded(&path);
        patch(&index_path(&path), 0, &[0, 0, 0, 0]);
        let mut cache = BlobCache::open(&path, 16, 4096, false, 1).unwrap();
        assert_reset(&mut cache);
    }

    #[test]
    fn test_truncated_index_resets() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache");
        seeded(&path);
        OpenOptions::new().write(true).open(index_path(&path)).unwrap().set_len(10).unwrap();
        let mut cache = BlobCache::open(&path, 16, 4096, false, 1).unwrap();
        assert_reset(&mut cache);
        assert_eq!(
            fs::metadata(index_path(&path)).unwrap().len(),
            (INDEX_HEADER_SIZE + 16 * SLOT_SIZE * 2) as u64
        );
    }

    #[test]
    fn test_wrong_index_length_resets() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache");
        seeded(&path);
        let len = fs::metadata(index_path(&path)).unwrap().len();
        OpenOptions::new()
            .write(true)
            .open(index_path(&path))
            .unwrap()
            .set_len(len + SLOT_SIZE as u64)
            .unwrap();
        let mut cache = BlobCache::open(&path, 16, 4096, false, 1).unwrap();
        assert_reset(&mut cache);
    }

    #[test]
    fn test_bad_data_magic_resets() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache");
        seeded(&path);
        patch(&data_path(&path, 1), 0, &[1, 2, 3, 4]);
        let mut cache = BlobCache::open(&path, 16, 4096, false, 1).unwrap();
        assert_reset(&mut cache);
    }

    #[test]
    fn test_missing_data_file_resets() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache");
        seeded(&path);
        fs::remove_file(data_path(&path, 0)).unwrap();
        let mut cache = BlobCache::open(&path, 16, 4096, false, 1).unwrap();
        assert_reset(&mut cache);
    }

    #[test]
    fn test_flipped_payload_is_a_miss() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache");
        let mut cache = BlobCache::open(&path, 16, 4096, false, 1).unwrap();
        cache.insert(7, b"hello world").unwrap();
        cache.insert(8, b"other").unwrap();
        cache.close().unwrap();

        // First record of region 0 starts right after the data magic.
        flip(&data_path(&path, 0), 4 + RECORD_HEADER_SIZE + 2);

        let mut cache = BlobCache::open(&path, 16, 4096, false, 1).unwrap();
        assert!(cache.lookup(7).unwrap().is_none());
        assert_eq!(cache.lookup(8).unwrap().unwrap(), b"other");
        assert_eq!(cache.stats().active_entries, 2);
        assert_eq!(cache.active_count().unwrap(), 1);
    }

    #[test]
    fn test_corrupt_active_record_falls_back_to_inactive() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache");
        let mut cache = BlobCache::open(&path, 4, 256, false, 1).unwrap();
        cache.insert(7, b"old").unwrap();
        cache.insert(8, b"eight").unwrap();
        cache.insert(9, b"nine").unwrap();
        assert_eq!(cache.active_region(), 1);
        cache.insert(7, b"new").unwrap();
        assert_eq!(cache.lookup(7).unwrap().unwrap(), b"new");
        cache.close().unwrap();

        flip(&data_path(&path, 1), 4 + RECORD_HEADER_SIZE);

        let mut cache = BlobCache::open(&path, 4, 256, false, 1).unwrap();
        assert_eq!(cache.lookup(7).unwrap().unwrap(), b"old");
    }

    #[test]
    fn test_dangling_slots_are_misses() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache");
        let mut cache = BlobCache::open(&path, 16, 4096, false, 1).unwrap();
        cache.insert(6, b"six").unwrap();
        cache.insert(5, b"five").unwrap();
        cache.insert(4, b"four").unwrap();
        cache.close().unwrap();

        let slot_offset = |key: u64| (INDEX_HEADER_SIZE + key as usize * SLOT_SIZE + 8) as u64;
        // Slot 5 now points at key 6's record, slot 4 far past the end of the data.
        patch(&index_path(&path), slot_offset(5), &4u32.to_le_bytes());
        patch(&index_path(&path), slot_offset(4), &0x7FFF_FFFFu32.to_le_bytes());

        let mut cache = BlobCache::open(&path, 16, 4096, false, 1).unwrap();
        assert!(cache.lookup(5).unwrap().is_none());
        assert!(cache.lookup(4).unwrap().is_none());
        assert_eq!(cache.lookup(6).unwrap().unwrap(), b"six");
        assert_eq!(cache.active_count().unwrap(), 1);
    }

    #[test]
    fn test_full_slot_table_below_threshold_rotates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache");
        let mut cache = BlobCache::open(&path, 4, 4096, false, 1).unwrap();
        cache.insert(1, b"one").unwrap();
        cache.close().unwrap();

        // Every slot of region 0 taken while the header still counts one entry.
        for slot in 0..4u64 {
            let mut raw = (100 + slot).to_le_bytes().to_vec();
            raw.extend_from_slice(&4u32.to_le_bytes());
            patch(&index_path(&path), (INDEX_HEADER_SIZE + slot as usize * SLOT_SIZE) as u64, &raw);
        }

        let mut cache = BlobCache::open(&path, 4, 4096, false, 1).unwrap();
        assert_eq!(cache.active_region(), 0);
        assert_eq!(cache.stats().active_entries, 1);

        cache.insert(7, b"seven").unwrap();
        assert_eq!(cache.active_region(), 1);
        assert_eq!(cache.stats().active_entries, 1);
        assert_eq!(cache.lookup(7).unwrap().unwrap(), b"seven");

        cache.insert(8, b"eight").unwrap();
        assert_eq!(cache.lookup(8).unwrap().unwrap(), b"eight");
    }

    #[test]
    fn test_torn_tail_is_truncated_on_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache");
        let mut cache = BlobCache::open(&path, 16, 4096, false, 1).unwrap();
        cache.insert(1, b"one").unwrap();
        cache.close().unwrap();
        let committed = fs::metadata(data_path(&path, 0)).unwrap().len();

        // Half a record that never made it into the index.
        let mut f = OpenOptions::new().append(true).open(data_path(&path, 0)).unwrap();
        f.write_all(&[0xAB; 13]).unwrap();
        drop(f);

        let mut cache = BlobCache::open(&path, 16, 4096, false, 1).unwrap();
        assert_eq!(fs::metadata(data_path(&path, 0)).unwrap().len(), committed);
        assert_eq!(cache.lookup(1).unwrap().unwrap(), b"one");
        cache.insert(2, b"two").unwrap();
        assert_eq!(cache.lookup(2).unwrap().unwrap(), b"two");
    }
}
