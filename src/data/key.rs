//! Keys addressing entries in the state tree.
//!
//! A key couples a nibble path with a type tag and, for storage cells, a
//! 32-byte cell index. The type tag is stored in the 4 high bits of a slot,
//! so only 16 values exist.

use std::hash::Hasher;

use rustc_hash::FxHasher;

use super::NibblePath;

/// Size of the additional key carried by storage-cell entries.
pub const ADDITIONAL_KEY_SIZE: usize = 32;

/// Type tag of a stored entry. Packed into the high 4 bits of a slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum DataType {
    /// Balance+nonce record at the path.
    Account = 0,
    /// 32-byte code hash at the path.
    CodeHash = 1,
    /// 32-byte storage root at the path.
    StorageRootHash = 2,
    /// Storage value keyed by (path, cell index).
    StorageCell = 3,
    /// 4-byte page address of a dedicated storage subtree rooted at the path.
    StorageTreeRootPageAddress = 4,
    /// Storage value inside a dedicated storage subtree.
    StorageTreeStorageCell = 5,
    /// Reserved for Merkle nodes.
    Merkle = 6,
    /// Tombstone.
    Deleted = 7,
}

impl DataType {
    /// Decodes a type tag from its 4-bit code.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(DataType::Account),
            1 => Some(DataType::CodeHash),
            2 => Some(DataType::StorageRootHash),
            3 => Some(DataType::StorageCell),
            4 => Some(DataType::StorageTreeRootPageAddress),
            5 => Some(DataType::StorageTreeStorageCell),
            6 => Some(DataType::Merkle),
            7 => Some(DataType::Deleted),
            _ => None,
        }
    }

    /// Returns true if entries of this type carry a 32-byte additional key.
    pub fn has_additional_key(&self) -> bool {
        matches!(
            self,
            DataType::StorageCell | DataType::StorageTreeStorageCell
        )
    }
}

/// A fully qualified key: nibble path, type tag and optional cell index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Key {
    /// Remaining nibble path at the current tree level.
    pub path: NibblePath,
    /// Type tag of the entry.
    pub data_type: DataType,
    /// 32-byte cell index for storage cells, empty otherwise.
    pub additional_key: Vec<u8>,
}

impl Key {
    /// Key of an account record.
    pub fn account(path: NibblePath) -> Self {
        Self {
            path,
            data_type: DataType::Account,
            additional_key: Vec::new(),
        }
    }

    /// Key of an account's code hash.
    pub fn code_hash(path: NibblePath) -> Self {
        Self {
            path,
            data_type: DataType::CodeHash,
            additional_key: Vec::new(),
        }
    }

    /// Key of an account's storage root hash.
    pub fn storage_root_hash(path: NibblePath) -> Self {
        Self {
            path,
            data_type: DataType::StorageRootHash,
            additional_key: Vec::new(),
        }
    }

    /// Key of a storage cell addressed by (account path, cell index).
    pub fn storage_cell(path: NibblePath, cell: &[u8]) -> Self {
        debug_assert_eq!(cell.len(), ADDITIONAL_KEY_SIZE);
        Self {
            path,
            data_type: DataType::StorageCell,
            additional_key: cell.to_vec(),
        }
    }

    /// Key of a Merkle node at the path.
    pub fn merkle(path: NibblePath) -> Self {
        Self {
            path,
            data_type: DataType::Merkle,
            additional_key: Vec::new(),
        }
    }

    /// Synthetic key holding the page address of the dedicated storage
    /// subtree rooted at `path`. Its value is always a 4-byte little-endian
    /// page address.
    pub fn storage_tree_root(path: NibblePath) -> Self {
        Self {
            path,
            data_type: DataType::StorageTreeRootPageAddress,
            additional_key: Vec::new(),
        }
    }

    /// Key of a storage cell inside a dedicated storage subtree. The account
    /// path is implicit in the subtree root; the cell index doubles as the
    /// descent path so the subtree can fan out.
    pub fn storage_tree_cell(cell: &[u8]) -> Self {
        debug_assert_eq!(cell.len(), ADDITIONAL_KEY_SIZE);
        Self {
            path: NibblePath::from_bytes(cell),
            data_type: DataType::StorageTreeStorageCell,
            additional_key: cell.to_vec(),
        }
    }

    /// Returns this key with the first `count` nibbles of the path consumed.
    pub fn slice_from(&self, count: usize) -> Self {
        Self {
            path: self.path.slice_from(count),
            data_type: self.data_type,
            additional_key: self.additional_key.clone(),
        }
    }

    /// Returns true if writes of this key may be absorbed by the in-page
    /// hashing cache. Must agree between reads and writes.
    pub fn can_be_cached(&self) -> bool {
        matches!(self.data_type, DataType::Account | DataType::StorageCell)
    }

    /// Stable 32-bit hash over (path, type, additional key).
    ///
    /// FxHasher is seed-free, so the same key hashes identically in every
    /// batch and every process.
    pub fn hash32(&self) -> u32 {
        let mut hasher = FxHasher::default();
        for nibble in self.path.iter() {
            hasher.write_u8(nibble);
        }
        hasher.write_u8(self.data_type as u8);
        hasher.write(&self.additional_key);
        let digest = hasher.finish();
        (digest ^ (digest >> 32)) as u32
    }

    /// Encodes the key for storage in the hashing cache.
    ///
    /// Layout: `[type][path_len][packed nibbles][additional_key]`. The
    /// additional key length is implied by the type.
    pub fn encode(&self) -> Vec<u8> {
        let packed = pack_path(&self.path);
        let mut out = Vec::with_capacity(1 + packed.len() + self.additional_key.len());
        out.push(self.data_type as u8);
        out.extend_from_slice(&packed);
        out.extend_from_slice(&self.additional_key);
        out
    }

    /// Decodes a key previously produced by [`Key::encode`].
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let data_type = DataType::from_u8(*bytes.first()?)?;
        let (path, consumed) = unpack_path(&bytes[1..])?;
        let rest = &bytes[1 + consumed..];
        let additional_key = if data_type.has_additional_key() {
            if rest.len() < ADDITIONAL_KEY_SIZE {
                return None;
            }
            rest[..ADDITIONAL_KEY_SIZE].to_vec()
        } else {
            Vec::new()
        };
        Some(Self {
            path,
            data_type,
            additional_key,
        })
    }
}

/// Packs a nibble path as `[nibble_count][two nibbles per byte]`.
///
/// The packing starts at nibble 0 regardless of the path's internal
/// alignment, so equal paths always encode identically.
pub(crate) fn pack_path(path: &NibblePath) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + (path.len() + 1) / 2);
    out.push(path.len() as u8);
    let mut i = 0;
    while i < path.len() {
        let high = path.get(i);
        let low = if i + 1 < path.len() { path.get(i + 1) } else { 0 };
        out.push((high << 4) | low);
        i += 2;
    }
    out
}

/// Inverse of [`pack_path`]. Returns the path and the number of bytes read.
pub(crate) fn unpack_path(bytes: &[u8]) -> Option<(NibblePath, usize)> {
    let len = *bytes.first()? as usize;
    let byte_len = (len + 1) / 2;
    if bytes.len() < 1 + byte_len {
        return None;
    }
    let mut nibbles = Vec::with_capacity(len);
    for i in 0..len {
        let byte = bytes[1 + i / 2];
        nibbles.push(if i % 2 == 0 { byte >> 4 } else { byte & 0x0F });
    }
    Some((NibblePath::from_nibbles(&nibbles), 1 + byte_len))
}
