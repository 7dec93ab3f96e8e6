//! Root page with database metadata.
//!
//! Page 0 of every database file. Tracks the allocation watermark, the
//! address of the state tree root, and the pages superseded by
//! copy-on-write that become reusable once the reorg depth has passed.

use super::{DbAddress, Page, PageHeader, PageType, PAGE_SIZE};

/// Root page containing database metadata.
///
/// Layout after header:
/// - next_free_page: DbAddress (4 bytes)
/// - state_root: DbAddress (4 bytes)
/// - reorg_depth: u32 (4 bytes)
/// - abandoned_batch: u64 (8 bytes) - batch in which inline pages were abandoned
/// - abandoned_count: u16 (2 bytes)
/// - abandoned addresses: [DbAddress; ...] (remaining space)
pub struct RootPage {
    page: Page,
}

impl RootPage {
    const NEXT_FREE_OFFSET: usize = PageHeader::SIZE;
    const STATE_ROOT_OFFSET: usize = Self::NEXT_FREE_OFFSET + DbAddress::SIZE;
    const REORG_DEPTH_OFFSET: usize = Self::STATE_ROOT_OFFSET + DbAddress::SIZE;
    const ABANDONED_BATCH_OFFSET: usize = Self::REORG_DEPTH_OFFSET + 4;
    const ABANDONED_COUNT_OFFSET: usize = Self::ABANDONED_BATCH_OFFSET + 8;
    const ABANDONED_ADDRESSES_OFFSET: usize = Self::ABANDONED_COUNT_OFFSET + 2;

    /// Maximum number of abandoned page addresses that can be stored inline.
    pub const MAX_ABANDONED: usize =
        (PAGE_SIZE - Self::ABANDONED_ADDRESSES_OFFSET) / DbAddress::SIZE;

    /// Default reorg depth (64 batches).
    pub const DEFAULT_REORG_DEPTH: u32 = 64;

    /// Creates a new root page.
    pub fn new(batch_id: u64) -> Self {
        let page = Page::with_header(batch_id, PageType::Root, 0);
        // Allocation starts from page 1; page 0 is this root.
        let mut root = Self { page };
        root.set_next_free_page(DbAddress::page(1));
        root.set_reorg_depth(Self::DEFAULT_REORG_DEPTH);
        root
    }

    /// Wraps an existing page as a root page.
    pub fn wrap(page: Page) -> Self {
        debug_assert_eq!(page.header().get_page_type(), Some(PageType::Root));
        Self { page }
    }

    /// Returns the underlying page reference.
    pub fn page(&self) -> &Page {
        &self.page
    }

    /// Returns mutable underlying page reference.
    pub fn page_mut(&mut self) -> &mut Page {
        &mut self.page
    }

    /// Gets the next free page address.
    pub fn next_free_page(&self) -> DbAddress {
        DbAddress::read(&self.page.as_bytes()[Self::NEXT_FREE_OFFSET..])
    }

    /// Sets the next free page address.
    pub fn set_next_free_page(&mut self, addr: DbAddress) {
        addr.write(&mut self.page.as_bytes_mut()[Self::NEXT_FREE_OFFSET..]);
    }

    /// Bumps the allocation watermark and returns the freed address.
    pub fn allocate_page(&mut self) -> DbAddress {
        let addr = self.next_free_page();
        self.set_next_free_page(addr.next());
        addr
    }

    /// Gets the state tree root address.
    pub fn state_root(&self) -> DbAddress {
        DbAddress::read(&self.page.as_bytes()[Self::STATE_ROOT_OFFSET..])
    }

    /// Sets the state tree root address.
    pub fn set_state_root(&mut self, addr: DbAddress) {
        addr.write(&mut self.page.as_bytes_mut()[Self::STATE_ROOT_OFFSET..]);
    }

    /// Gets the reorg depth (batches before abandoned pages can be reused).
    pub fn reorg_depth(&self) -> u32 {
        let data = self.page.as_bytes();
        u32::from_le_bytes([
            data[Self::REORG_DEPTH_OFFSET],
            data[Self::REORG_DEPTH_OFFSET + 1],
            data[Self::REORG_DEPTH_OFFSET + 2],
            data[Self::REORG_DEPTH_OFFSET + 3],
        ])
    }

    /// Sets the reorg depth.
    pub fn set_reorg_depth(&mut self, depth: u32) {
        self.page.as_bytes_mut()[Self::REORG_DEPTH_OFFSET..Self::REORG_DEPTH_OFFSET + 4]
            .copy_from_slice(&depth.to_le_bytes());
    }

    fn abandoned_batch(&self) -> u64 {
        let data = &self.page.as_bytes()[Self::ABANDONED_BATCH_OFFSET..];
        u64::from_le_bytes([
            data[0], data[1], data[2], data[3], data[4], data[5], data[6], data[7],
        ])
    }

    fn set_abandoned_batch(&mut self, batch: u64) {
        self.page.as_bytes_mut()[Self::ABANDONED_BATCH_OFFSET..Self::ABANDONED_BATCH_OFFSET + 8]
            .copy_from_slice(&batch.to_le_bytes());
    }

    fn abandoned_count(&self) -> usize {
        let data = self.page.as_bytes();
        u16::from_le_bytes([
            data[Self::ABANDONED_COUNT_OFFSET],
            data[Self::ABANDONED_COUNT_OFFSET + 1],
        ]) as usize
    }

    fn set_abandoned_count(&mut self, count: usize) {
        self.page.as_bytes_mut()[Self::ABANDONED_COUNT_OFFSET..Self::ABANDONED_COUNT_OFFSET + 2]
            .copy_from_slice(&(count as u16).to_le_bytes());
    }

    /// Tries to record an abandoned page address inline.
    ///
    /// Returns false when inline storage is full or already holds pages from
    /// a different batch; the address is then simply not recycled.
    pub fn try_add_abandoned(&mut self, addr: DbAddress, batch_id: u64) -> bool {
        let count = self.abandoned_count();

        if count == 0 {
            self.set_abandoned_batch(batch_id);
        } else if self.abandoned_batch() != batch_id {
            return false;
        }

        if count >= Self::MAX_ABANDONED {
            return false;
        }

        let offset = Self::ABANDONED_ADDRESSES_OFFSET + count * DbAddress::SIZE;
        addr.write(&mut self.page.as_bytes_mut()[offset..]);
        self.set_abandoned_count(count + 1);
        true
    }

    /// Pops an abandoned page address if it is old enough to reuse.
    pub fn pop_abandoned(&mut self, current_batch: u64) -> Option<DbAddress> {
        let count = self.abandoned_count();
        if count == 0 {
            return None;
        }

        let abandoned_at = self.abandoned_batch();
        let reorg_depth = self.reorg_depth() as u64;
        if current_batch < abandoned_at + reorg_depth {
            return None;
        }

        let offset = Self::ABANDONED_ADDRESSES_OFFSET + (count - 1) * DbAddress::SIZE;
        let addr = DbAddress::read(&self.page.as_bytes()[offset..]);
        self.set_abandoned_count(count - 1);
        Some(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_page_allocation() {
        let mut root = RootPage::new(1);
        assert_eq!(root.next_free_page(), DbAddress::page(1));

        let addr = root.allocate_page();
        assert_eq!(addr, DbAddress::page(1));
        assert_eq!(root.next_free_page(), DbAddress::page(2));
    }

    #[test]
    fn test_state_root() {
        let mut root = RootPage::new(1);
        assert!(root.state_root().is_null());
        root.set_state_root(DbAddress::page(7));
        assert_eq!(root.state_root(), DbAddress::page(7));
    }

    #[test]
    fn test_abandoned_respects_reorg_depth() {
        let mut root = RootPage::new(1);
        root.set_reorg_depth(4);

        assert!(root.try_add_abandoned(DbAddress::page(10), 2));
        assert!(root.try_add_abandoned(DbAddress::page(11), 2));

        // Not old enough yet.
        assert_eq!(root.pop_abandoned(3), None);
        // Past the reorg depth both pop in LIFO order.
        assert_eq!(root.pop_abandoned(6), Some(DbAddress::page(11)));
        assert_eq!(root.pop_abandoned(6), Some(DbAddress::page(10)));
        assert_eq!(root.pop_abandoned(6), None);
    }

    #[test]
    fn test_abandoned_rejects_mixed_batches() {
        let mut root = RootPage::new(1);
        assert!(root.try_add_abandoned(DbAddress::page(10), 2));
        assert!(!root.try_add_abandoned(DbAddress::page(11), 3));
    }
}
