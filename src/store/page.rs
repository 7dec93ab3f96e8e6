//! Base page abstraction.
//!
//! Every page is a 4KB image beginning with the 16-byte shared header.
//! A `Page` owns its bytes: batches hand out clones, mutate them, and
//! register the result under a fresh address, so the clone taken here is
//! the unit of copy-on-write and the original image stays untouched.

use super::page_header::{PageHeader, PageType};

/// Page size in bytes (4KB).
pub const PAGE_SIZE: usize = 4096;

/// An owned 4KB page image.
#[derive(Clone)]
pub struct Page {
    data: Box<[u8; PAGE_SIZE]>,
}

impl Page {
    /// Creates a new zeroed page with an empty header.
    pub fn new() -> Self {
        Self {
            data: Box::new([0u8; PAGE_SIZE]),
        }
    }

    /// Creates a zeroed page already stamped with batch, type and level.
    pub fn with_header(batch_id: u64, page_type: PageType, level: u8) -> Self {
        let mut page = Self::new();
        page.set_header(PageHeader::new(batch_id, page_type, level));
        page
    }

    /// Creates a page from an existing image.
    pub fn from_bytes(data: [u8; PAGE_SIZE]) -> Self {
        Self {
            data: Box::new(data),
        }
    }

    /// Returns a reference to the raw bytes.
    pub fn as_bytes(&self) -> &[u8; PAGE_SIZE] {
        &self.data
    }

    /// Returns a mutable reference to the raw bytes.
    pub fn as_bytes_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        &mut self.data
    }

    /// Decodes the page header.
    pub fn header(&self) -> PageHeader {
        PageHeader::read(&self.data[..])
    }

    /// Writes the page header.
    pub fn set_header(&mut self, header: PageHeader) {
        header.write(&mut self.data[..]);
    }

    /// Batch epoch that last wrote this page. Read directly so the write
    /// path's copy-on-write guard skips decoding the full header.
    pub fn batch_id(&self) -> u64 {
        u64::from_le_bytes([
            self.data[0],
            self.data[1],
            self.data[2],
            self.data[3],
            self.data[4],
            self.data[5],
            self.data[6],
            self.data[7],
        ])
    }

    /// Restamps the batch epoch in place, leaving type and level alone.
    /// This is the copy-on-write stamp: the clone a batch takes gets the
    /// new epoch while the committed image keeps its own.
    pub fn stamp_batch(&mut self, batch_id: u64) {
        self.data[0..8].copy_from_slice(&batch_id.to_le_bytes());
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let header = self.header();
        write!(
            f,
            "Page(batch={}, type={:?}, level={})",
            header.batch_id,
            header.get_page_type(),
            header.level
        )
    }
}
