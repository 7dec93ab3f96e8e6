//! Database address representation.
//!
//! A DbAddress is a 32-bit page index into the backing file. Address 0 is
//! the null sentinel: page 0 holds the root metadata and the allocator
//! never hands it out, which is also what lets a zeroed bucket table read
//! as "no children".
//!
//! Addresses are stable for the epoch that wrote them. A batch never
//! overwrites a referenced page in place: copy-on-write clones the image
//! under a freshly reserved address, so a DbAddress read from a committed
//! page keeps resolving to the exact bytes its epoch committed until the
//! address ages past the reorg window and is recycled.

use std::fmt;

/// The address of a page in the database file.
///
/// 32 bits of page index cover 16TB at 4KB pages. On disk an address is
/// always 4 little-endian bytes: in a data page's bucket table, in the
/// root page metadata, and as the value of a storage-tree root entry.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DbAddress(u32);

impl DbAddress {
    /// The null address (page 0 is reserved for the root page).
    pub const NULL: DbAddress = DbAddress(0);

    /// Size of the address in bytes.
    pub const SIZE: usize = 4;

    /// Creates an address pointing to a page.
    #[inline]
    pub const fn page(page_number: u32) -> Self {
        DbAddress(page_number)
    }

    /// Returns the raw page index.
    #[inline]
    pub const fn raw(&self) -> u32 {
        self.0
    }

    /// Byte offset of this page in the backing file.
    #[inline]
    pub const fn file_offset(&self) -> u64 {
        self.0 as u64 * super::PAGE_SIZE as u64
    }

    /// Returns true if this is the null sentinel.
    #[inline]
    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Address of the following page. Drives the root page's allocation
    /// watermark when no abandoned page is ready for reuse.
    #[inline]
    pub const fn next(&self) -> Self {
        DbAddress(self.0 + 1)
    }

    /// The address in its 4-byte little-endian wire form, as stored in
    /// bucket tables and storage-tree root entries.
    #[inline]
    pub const fn to_le_bytes(&self) -> [u8; Self::SIZE] {
        self.0.to_le_bytes()
    }

    /// Reads an address from the head of a byte slice (little-endian).
    pub fn read(data: &[u8]) -> Self {
        assert!(data.len() >= Self::SIZE);
        DbAddress(u32::from_le_bytes([data[0], data[1], data[2], data[3]]))
    }

    /// Writes the address to the head of a byte slice (little-endian).
    pub fn write(&self, dest: &mut [u8]) {
        assert!(dest.len() >= Self::SIZE);
        dest[..Self::SIZE].copy_from_slice(&self.to_le_bytes());
    }
}

impl fmt::Debug for DbAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "DbAddress(null)")
        } else {
            write!(f, "DbAddress({})", self.0)
        }
    }
}

impl fmt::Display for DbAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "null")
        } else {
            write!(f, "page {}", self.0)
        }
    }
}
