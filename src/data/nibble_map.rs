//! NibbleMap - nibble-addressed key-value storage inside one page.
//!
//! Slot descriptors grow from the low end of the data region and a heap of
//! variable-length items grows from the high end, following the slotted page
//! pattern. Each slot folds up to three leading nibbles of its key into a
//! 16-bit prefix so lookups can reject most slots without touching the heap.
//!
//! Layout:
//! ```text
//! [MapHeader (8 bytes)][Slots...] ... free space ... [Items...]
//! ```
//!
//! Items are `[packed residual path][additional key?][value]`; their
//! boundaries are inferred from neighbouring slot offsets, so tombstones
//! keep their item address until reclaimed.

use super::key::{pack_path, unpack_path, ADDITIONAL_KEY_SIZE};
use super::slot::{MapHeader, Slot, HEADER_SIZE, SLOT_SIZE};
use super::{DataType, Key, NibblePath};

/// Smallest usable data region: header plus room for one slot and item.
pub const MIN_REGION_SIZE: usize = 24;

/// A live entry yielded by map enumeration.
#[derive(Clone, Debug)]
pub struct MapEntry {
    /// Slot index of the entry.
    pub index: usize,
    /// Reconstructed key, prefix nibbles re-prepended to the stored path.
    pub key: Key,
    /// The stored value bytes.
    pub data: Vec<u8>,
}

/// Per-nibble occupancy statistics used by the page split policy.
#[derive(Clone, Copy, Debug)]
pub struct NibbleStats {
    /// The nibble owning the most live slots (ties: smallest nibble).
    pub nibble: u8,
    /// Number of live slots owned by that nibble.
    pub count: usize,
    /// Share of all live slots that are storage cells under that nibble.
    pub storage_cell_ratio: f64,
}

/// A nibble-addressed slot map over a borrowed data region.
///
/// Generic over the backing storage so the same code serves read-only page
/// views (`&[u8]`) and writable ones (`&mut [u8]`).
pub struct NibbleMap<D> {
    data: D,
}

fn slot_at(data: &[u8], index: usize) -> Slot {
    Slot::read(&data[HEADER_SIZE + index * SLOT_SIZE..])
}

fn slot_count(data: &[u8]) -> usize {
    let stored = MapHeader::read(data).low as usize / SLOT_SIZE;
    stored.min((data.len() - HEADER_SIZE) / SLOT_SIZE)
}

fn item_bounds(data: &[u8], index: usize) -> (usize, usize) {
    let start = slot_at(data, index).item_address();
    let end = if index == 0 {
        data.len()
    } else {
        slot_at(data, index - 1).item_address()
    };
    (start, end)
}

impl<D: AsRef<[u8]>> NibbleMap<D> {
    /// Wraps a data region as a map. The region must have been zeroed when
    /// the page was created.
    pub fn wrap(data: D) -> Self {
        debug_assert!(data.as_ref().len() >= MIN_REGION_SIZE);
        Self { data }
    }

    fn header(&self) -> MapHeader {
        MapHeader::read(self.data.as_ref())
    }

    fn slot(&self, index: usize) -> Slot {
        slot_at(self.data.as_ref(), index)
    }

    fn capacity(&self) -> usize {
        self.data.as_ref().len() - HEADER_SIZE
    }

    /// Number of slots, tombstones included.
    pub fn count(&self) -> usize {
        slot_count(self.data.as_ref())
    }

    /// Number of live (non-tombstone) entries.
    pub fn live_count(&self) -> usize {
        self.count() - self.header().deleted as usize
    }

    /// Returns true if the map holds no slots at all.
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Bytes of slot descriptors written.
    pub fn slot_bytes(&self) -> usize {
        self.header().low as usize
    }

    /// Bytes of item heap consumed.
    pub fn heap_bytes(&self) -> usize {
        self.header().high as usize
    }

    /// Number of tombstoned slots awaiting reclamation.
    pub fn tombstones(&self) -> usize {
        self.header().deleted as usize
    }

    /// Finds a key; returns (slot index, value start, value end).
    fn find(&self, key: &Key) -> Option<(usize, usize, usize)> {
        let (prefix, residual) = Slot::extract_prefix(&key.path);
        let encoded = pack_path(&residual);
        let data = self.data.as_ref();

        for index in 0..self.count() {
            let slot = self.slot(index);
            if slot.is_deleted() || slot.prefix != prefix || slot.data_type() != key.data_type {
                continue;
            }
            let (start, end) = item_bounds(data, index);
            let Some(item) = data.get(start..end) else {
                continue;
            };
            if !item.starts_with(&encoded) {
                continue;
            }
            let rest = &item[encoded.len()..];
            if key.data_type.has_additional_key() {
                if rest.len() < ADDITIONAL_KEY_SIZE
                    || rest[..ADDITIONAL_KEY_SIZE] != key.additional_key[..]
                {
                    continue;
                }
                return Some((index, start + encoded.len() + ADDITIONAL_KEY_SIZE, end));
            }
            return Some((index, start + encoded.len(), end));
        }
        None
    }

    /// Looks up a value by key.
    pub fn try_get(&self, key: &Key) -> Option<Vec<u8>> {
        self.find(key)
            .map(|(_, start, end)| self.data.as_ref()[start..end].to_vec())
    }

    /// Iterates live entries whose first prefix nibble equals `nibble`.
    /// Prefix-less entries (fully consumed paths) are never yielded here.
    pub fn enumerate_nibble(&self, nibble: u8) -> MapIter<'_> {
        MapIter {
            data: self.data.as_ref(),
            index: 0,
            filter: Some(nibble),
        }
    }

    /// Iterates all live entries.
    pub fn iter(&self) -> MapIter<'_> {
        MapIter {
            data: self.data.as_ref(),
            index: 0,
            filter: None,
        }
    }

    /// Computes per-nibble occupancy and returns the busiest nibble.
    pub fn biggest_nibble_stats(&self) -> NibbleStats {
        let mut per_nibble = [0usize; 16];
        let mut cells = [0usize; 16];
        let mut live = 0usize;

        for index in 0..self.count() {
            let slot = self.slot(index);
            if slot.is_deleted() {
                continue;
            }
            live += 1;
            if slot.nibble_count() == 0 {
                continue;
            }
            let nibble = slot.first_nibble() as usize;
            per_nibble[nibble] += 1;
            if slot.data_type() == DataType::StorageCell {
                cells[nibble] += 1;
            }
        }

        let mut best = 0usize;
        for nibble in 1..16 {
            if per_nibble[nibble] > per_nibble[best] {
                best = nibble;
            }
        }
        let storage_cell_ratio = if live == 0 {
            0.0
        } else {
            cells[best] as f64 / live as f64
        };
        NibbleStats {
            nibble: best as u8,
            count: per_nibble[best],
            storage_cell_ratio,
        }
    }
}

impl<D: AsRef<[u8]> + AsMut<[u8]>> NibbleMap<D> {
    fn set_header(&mut self, header: MapHeader) {
        header.write(self.data.as_mut());
    }

    fn set_slot(&mut self, index: usize, slot: Slot) {
        slot.write(&mut self.data.as_mut()[HEADER_SIZE + index * SLOT_SIZE..]);
    }

    fn has_room(&self, payload_len: usize) -> bool {
        self.header().taken() + payload_len + SLOT_SIZE <= self.capacity()
    }

    /// Appends a live slot and its payload without any lookup.
    fn append(&mut self, data_type: DataType, prefix: u16, payload: &[u8]) {
        let mut header = self.header();
        let start = self.data.as_ref().len() - header.high as usize - payload.len();
        let index = header.low as usize / SLOT_SIZE;

        self.data.as_mut()[start..start + payload.len()].copy_from_slice(payload);
        self.set_slot(index, Slot::new(start, data_type, prefix));

        header.low += SLOT_SIZE as u16;
        header.high += payload.len() as u16;
        self.set_header(header);
    }

    fn tombstone(&mut self, index: usize) {
        let mut slot = self.slot(index);
        slot.mark_deleted();
        self.set_slot(index, slot);
        let mut header = self.header();
        header.deleted += 1;
        self.set_header(header);
    }

    /// Tries to insert or update a key-value pair.
    ///
    /// An existing entry with a value of identical length is overwritten in
    /// place, leaving the header untouched. Returns `false` if the map is
    /// full even after reclaiming tombstones.
    pub fn try_set(&mut self, key: &Key, value: &[u8]) -> bool {
        if let Some((index, start, end)) = self.find(key) {
            if end - start == value.len() {
                self.data.as_mut()[start..end].copy_from_slice(value);
                return true;
            }
            self.tombstone(index);
        }

        let (prefix, residual) = Slot::extract_prefix(&key.path);
        let mut payload = pack_path(&residual);
        payload.extend_from_slice(&key.additional_key);
        payload.extend_from_slice(value);

        if !self.has_room(payload.len()) {
            if self.header().deleted == 0 {
                return false;
            }
            self.defragment();
            if !self.has_room(payload.len()) {
                return false;
            }
        }
        self.append(key.data_type, prefix, &payload);
        true
    }

    /// Deletes a key, then reclaims any run of tombstones at the tail.
    /// Returns `true` if the key was present.
    pub fn delete(&mut self, key: &Key) -> bool {
        match self.find(key) {
            Some((index, _, _)) => {
                self.tombstone(index);
                self.collect_tombstones();
                true
            }
            None => false,
        }
    }

    /// Pops tombstones off the slot tail, giving their heap bytes back.
    /// Stops at the first live slot so mid-array deletes stay cheap.
    fn collect_tombstones(&mut self) {
        let mut header = self.header();
        while header.low > 0 {
            let index = header.low as usize / SLOT_SIZE - 1;
            let slot = self.slot(index);
            if !slot.is_deleted() {
                break;
            }
            let (start, end) = item_bounds(self.data.as_ref(), index);
            header.low -= SLOT_SIZE as u16;
            header.high -= (end - start) as u16;
            header.deleted -= 1;

            let offset = HEADER_SIZE + index * SLOT_SIZE;
            self.data.as_mut()[offset..offset + SLOT_SIZE].fill(0);
        }
        self.set_header(header);
    }

    /// Rebuilds the map in a scratch buffer, dropping all tombstones and
    /// packing the surviving items contiguously.
    pub fn defragment(&mut self) {
        let len = self.data.as_ref().len();
        let mut scratch = vec![0u8; len];
        {
            let mut fresh = NibbleMap::wrap(&mut scratch[..]);
            for index in 0..self.count() {
                let slot = self.slot(index);
                if slot.is_deleted() {
                    continue;
                }
                let (start, end) = item_bounds(self.data.as_ref(), index);
                let payload = self.data.as_ref()[start..end].to_vec();
                fresh.append(slot.data_type(), slot.prefix, &payload);
            }
        }
        self.data.as_mut().copy_from_slice(&scratch);
        debug_assert_eq!(self.header().deleted, 0);
    }
}

/// Iterator over live map entries, optionally filtered by first nibble.
pub struct MapIter<'a> {
    data: &'a [u8],
    index: usize,
    filter: Option<u8>,
}

impl<'a> Iterator for MapIter<'a> {
    type Item = MapEntry;

    fn next(&mut self) -> Option<Self::Item> {
        while self.index < slot_count(self.data) {
            let index = self.index;
            self.index += 1;

            let slot = slot_at(self.data, index);
            if slot.is_deleted() {
                continue;
            }
            if let Some(nibble) = self.filter {
                if slot.nibble_count() == 0 || slot.first_nibble() != nibble {
                    continue;
                }
            }

            let (start, end) = item_bounds(self.data, index);
            let Some(item) = self.data.get(start..end) else {
                continue;
            };
            let Some((stored_path, consumed)) = unpack_path(item) else {
                continue;
            };

            let (prefix_nibbles, prefix_count) = Slot::decode_nibbles_from_prefix(slot.prefix);
            let mut nibbles: Vec<u8> = prefix_nibbles[..prefix_count].to_vec();
            nibbles.extend(stored_path.iter());

            let data_type = slot.data_type();
            let rest = &item[consumed..];
            let (additional_key, value) = if data_type.has_additional_key() {
                if rest.len() < ADDITIONAL_KEY_SIZE {
                    continue;
                }
                (
                    rest[..ADDITIONAL_KEY_SIZE].to_vec(),
                    rest[ADDITIONAL_KEY_SIZE..].to_vec(),
                )
            } else {
                (Vec::new(), rest.to_vec())
            };

            return Some(MapEntry {
                index,
                key: Key {
                    path: NibblePath::from_nibbles(&nibbles),
                    data_type,
                    additional_key,
                },
                data: value,
            });
        }
        None
    }
}
