//! One region's data file: a 4-byte magic marker followed by records.
//!
//! ```text
//! [0]  key
//! [8]  checksum   Adler-32 of offset, length and payload
//! [12] offset     this record's own start offset
//! [16] length     payload length
//! [20] payload
//! ```

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use zerocopy::byteorder::{LittleEndian, U32, U64};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

use crate::checksum::Adler32;
use crate::index_header::{DATA_HEADER_SIZE, DATA_MAGIC, RECORD_HEADER_SIZE};

#[repr(C)]
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes, Unaligned)]
struct RecordHeader {
    key: U64<LittleEndian>,
    checksum: U32<LittleEndian>,
    offset: U32<LittleEndian>,
    length: U32<LittleEndian>,
}

/// Outcome of reading a record that the slot table points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    Valid,
    /// The offset, or the record header, lies outside the committed data.
    OutOfBounds,
    KeyMismatch(u64),
    OffsetMismatch(u32),
    BadLength(u32),
    ChecksumMismatch,
}

/// Bytes a payload of `len` occupies once written.
pub fn record_size(len: usize) -> u64 {
    RECORD_HEADER_SIZE as u64 + len as u64
}

fn record_checksum(offset: u32, length: u32, payload: &[u8]) -> u32 {
    let mut sum = Adler32::new();
    sum.update(&offset.to_le_bytes());
    sum.update(&length.to_le_bytes());
    sum.update(payload);
    sum.finish()
}

pub struct Region {
    id: usize,
    file: File,
    /// End of the committed data; nothing at or past it is ever read.
    end: u32,
}

impl Region {
    pub fn open(path: &Path, id: usize) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(Self {
            id,
            file,
            end: DATA_HEADER_SIZE as u32,
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn end(&self) -> u32 {
        self.end
    }

    pub fn check_magic(&mut self) -> io::Result<bool> {
        let mut magic = [0u8; DATA_HEADER_SIZE];
        self.file.seek(SeekFrom::Start(0))?;
        if !read_or_eof(&mut self.file, &mut magic)? {
            return Ok(false);
        }
        Ok(u32::from_le_bytes(magic) == DATA_MAGIC)
    }

    /// Truncates to just the magic marker.
    pub fn reset(&mut self) -> io::Result<()> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&DATA_MAGIC.to_le_bytes())?;
        self.end = DATA_HEADER_SIZE as u32;
        Ok(())
    }

    /// Drops anything past `len`, e.g. a half-written record from before a crash.
    pub fn truncate_to(&mut self, len: u32) -> io::Result<()> {
        self.file.set_len(u64::from(len))?;
        self.end = len;
        Ok(())
    }

    /// Takes the file as it is, never trusting more than `max_bytes` of it.
    pub fn adopt(&mut self, max_bytes: u32) -> io::Result<()> {
        let len = self.file.metadata()?.len();
        self.end = len.min(u64::from(max_bytes)) as u32;
        Ok(())
    }

    /// Writes a record at `at`. The caller has checked it fits in a `u32` region.
    pub fn append(&mut self, at: u32, key: u64, payload: &[u8]) -> io::Result<()> {
        let length = payload.len() as u32;
        let header = RecordHeader {
            key: U64::new(key),
            checksum: U32::new(record_checksum(at, length, payload)),
            offset: U32::new(at),
            length: U32::new(length),
        };
        self.file.seek(SeekFrom::Start(u64::from(at)))?;
        self.file.write_all(header.as_bytes())?;
        self.file.write_all(payload)?;
        self.end = at + RECORD_HEADER_SIZE as u32 + length;
        Ok(())
    }

    /// Reads the record at `offset` into `buf`, verifying it belongs to `key`.
    ///
    /// `buf` holds the payload only when `Valid` is returned; it is left empty
    /// otherwise. Its allocation is reused.
    pub fn read_record(&mut self, offset: u32, key: u64, buf: &mut Vec<u8>) -> io::Result<RecordStatus> {
        buf.clear();
        let header_end = u64::from(offset) + RECORD_HEADER_SIZE as u64;
        if (offset as usize) < DATA_HEADER_SIZE || header_end > u64::from(self.end) {
            return Ok(RecordStatus::OutOfBounds);
        }

        let mut header = RecordHeader::new_zeroed();
        self.file.seek(SeekFrom::Start(u64::from(offset)))?;
        if !read_or_eof(&mut self.file, header.as_bytes_mut())? {
            return Ok(RecordStatus::OutOfBounds);
        }
        if header.key.get() != key {
            return Ok(RecordStatus::KeyMismatch(header.key.get()));
        }
        if header.offset.get() != offset {
            return Ok(RecordStatus::OffsetMismatch(header.offset.get()));
        }
        let length = header.length.get();
        if header_end + u64::from(length) > u64::from(self.end) {
            return Ok(RecordStatus::BadLength(length));
        }

        buf.resize(length as usize, 0);
        if !read_or_eof(&mut self.file, buf)? {
            buf.clear();
            return Ok(RecordStatus::OutOfBounds);
        }
        if header.checksum.get() != record_checksum(offset, length, buf) {
            buf.clear();
            return Ok(RecordStatus::ChecksumMismatch);
        }
        Ok(RecordStatus::Valid)
    }

    pub fn sync(&self) -> io::Result<()> {
        self.file.sync_all()
    }
}

/// `read_exact`, with a short file reported as `false` instead of an error.
fn read_or_eof(file: &mut File, buf: &mut [u8]) -> io::Result<bool> {
    match file.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}
