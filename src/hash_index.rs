//! Linear-probing hash table over a region's slot array.
//!
//! Keys index the table directly (`key % len`), there is no secondary hash.
//! A slot whose offset is 0 is vacant: no record can start at offset 0
//! because every data file begins with its magic marker.

use zerocopy::byteorder::{LittleEndian, U32, U64};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

/// One 12-byte slot: 8-byte key, 4-byte record offset into the region's data file.
#[repr(C)]
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes, Unaligned)]
pub struct HashSlot {
    key: U64<LittleEndian>,
    offset: U32<LittleEndian>,
}

impl HashSlot {
    pub fn new(key: u64, offset: u32) -> Self {
        Self {
            key: U64::new(key),
            offset: U32::new(offset),
        }
    }

    pub fn key(&self) -> u64 {
        self.key.get()
    }

    pub fn offset(&self) -> u32 {
        self.offset.get()
    }

    pub fn is_vacant(&self) -> bool {
        self.offset.get() == 0
    }
}

/// Where an insert for a key should land.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// The key already owns this slot.
    Occupied(usize),
    /// First free slot on the key's probe sequence.
    Vacant(usize),
    /// Every slot is taken by other keys.
    Full,
}

#[inline]
pub fn home_slot(key: u64, len: usize) -> usize {
    (key % len as u64) as usize
}

pub fn find_slot(slots: &[HashSlot], key: u64) -> Slot {
    if slots.is_empty() {
        return Slot::Full;
    }
    let mut i = home_slot(key, slots.len());
    for _ in 0..slots.len() {
        let slot = &slots[i];
        if slot.is_vacant() {
            return Slot::Vacant(i);
        }
        if slot.key() == key {
            return Slot::Occupied(i);
        }
        i = if i + 1 == slots.len() { 0 } else { i + 1 };
    }
    Slot::Full
}

/// Walks the probe sequence of `key`, yielding `(slot index, record offset)`
/// for every slot holding that key. Stops at the first vacant slot, and never
/// visits a slot twice.
pub fn probe(slots: &[HashSlot], key: u64) -> Probe<'_> {
    let next = if slots.is_empty() { 0 } else { home_slot(key, slots.len()) };
    Probe {
        slots,
        key,
        next,
        remaining: slots.len(),
    }
}

pub struct Probe<'a> {
    slots: &'a [HashSlot],
    key: u64,
    next: usize,
    remaining: usize,
}

impl Iterator for Probe<'_> {
    type Item = (usize, u32);

    fn next(&mut self) -> Option<Self::Item> {
        while self.remaining > 0 {
            let i = self.next;
            let slot = &self.slots[i];
            self.remaining -= 1;
            self.next = if i + 1 == self.slots.len() { 0 } else { i + 1 };

            if slot.is_vacant() {
                self.remaining = 0;
                return None;
            }
            if slot.key() == self.key {
                return Some((i, slot.offset()));
            }
        }
        None
    }
}

/// Marks every slot vacant.
pub fn clear(slots: &mut [HashSlot]) {
    slots.as_bytes_mut().fill(0);
}
