//! Core data structures for tree navigation and in-page storage.

mod hashing_map;
mod key;
mod nibble_map;
mod nibble_path;
mod slot;

#[cfg(test)]
mod tests;

pub use hashing_map::{CacheEntry, CacheIter, HashingMap};
pub use key::{DataType, Key, ADDITIONAL_KEY_SIZE};
pub use nibble_map::{MapEntry, MapIter, NibbleMap, NibbleStats, MIN_REGION_SIZE};
pub use nibble_path::NibblePath;
pub use slot::{MapHeader, Slot, HEADER_SIZE, MAX_PREFIX_NIBBLES, SLOT_SIZE};
