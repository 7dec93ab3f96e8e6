//! DataPage - radix node with nibble fanout and inline storage.
//!
//! The payload starts with sixteen child page addresses, one per nibble of
//! the key path, followed by a long-aligned data region. While some buckets
//! are still null the region holds a [`NibbleMap`]; once every bucket is
//! populated it is cleared and reinterpreted as a [`HashingMap`] absorbing
//! cache-eligible writes. The two views never coexist.
//!
//! Writes are copy-on-write per batch: a page stamped by an older batch is
//! cloned to a fresh address first, and every `set` returns the address
//! that ends up holding the page so parents can repoint their bucket.

use crate::data::{CacheEntry, DataType, HashingMap, Key, MapEntry, NibbleMap};

use super::paged_db::{BatchContext, DbError, PageResolver, Result};
use super::reporter::UsageVisitor;
use super::{DbAddress, Page, PageHeader, PageType, PAGE_SIZE};

/// Number of child buckets, one per nibble.
pub const BUCKET_COUNT: usize = 16;

const BUCKETS_OFFSET: usize = PageHeader::SIZE;
const BUCKETS_SIZE: usize = BUCKET_COUNT * DbAddress::SIZE;
const DATA_OFFSET: usize = BUCKETS_OFFSET + BUCKETS_SIZE;

/// Bytes available to the in-page map or cache.
pub const DATA_REGION_SIZE: usize = PAGE_SIZE - DATA_OFFSET;

/// Share of live slots that must be one account's storage cells before a
/// split extracts them into a dedicated storage subtree.
const STORAGE_TREE_EXTRACTION_RATIO: f64 = 0.9;

/// A data page wrapping a raw 4KB page.
pub struct DataPage {
    page: Page,
}

impl DataPage {
    /// Creates a new data page.
    pub fn new(batch_id: u64, page_type: PageType, level: u8) -> Self {
        debug_assert!(matches!(
            page_type,
            PageType::Data | PageType::MassiveStorageTree
        ));
        Self {
            page: Page::with_header(batch_id, page_type, level),
        }
    }

    /// Wraps an existing page as a data page.
    pub fn wrap(page: Page) -> Self {
        debug_assert!(matches!(
            page.header().get_page_type(),
            Some(PageType::Data | PageType::MassiveStorageTree)
        ));
        Self { page }
    }

    /// Returns the underlying page.
    pub fn into_page(self) -> Page {
        self.page
    }

    /// Returns a reference to the underlying page.
    pub fn page(&self) -> &Page {
        &self.page
    }

    /// Depth of this page in the tree.
    pub fn level(&self) -> u8 {
        self.page.header().level
    }

    fn page_type(&self) -> PageType {
        self.page.header().get_page_type().unwrap_or(PageType::Data)
    }

    /// Gets the child address for a nibble.
    pub fn bucket(&self, nibble: u8) -> DbAddress {
        debug_assert!((nibble as usize) < BUCKET_COUNT);
        let offset = BUCKETS_OFFSET + nibble as usize * DbAddress::SIZE;
        DbAddress::read(&self.page.as_bytes()[offset..])
    }

    /// Sets the child address for a nibble.
    pub fn set_bucket(&mut self, nibble: u8, addr: DbAddress) {
        debug_assert!((nibble as usize) < BUCKET_COUNT);
        let offset = BUCKETS_OFFSET + nibble as usize * DbAddress::SIZE;
        addr.write(&mut self.page.as_bytes_mut()[offset..]);
    }

    /// Returns true when every bucket points at a child page.
    pub fn all_buckets_full(&self) -> bool {
        (0..BUCKET_COUNT as u8).all(|n| !self.bucket(n).is_null())
    }

    /// Number of non-null buckets.
    pub fn buckets_used(&self) -> usize {
        (0..BUCKET_COUNT as u8)
            .filter(|&n| !self.bucket(n).is_null())
            .count()
    }

    /// The data region shared by the map and the cache views.
    pub fn data_region(&self) -> &[u8] {
        &self.page.as_bytes()[DATA_OFFSET..]
    }

    fn data_region_mut(&mut self) -> &mut [u8] {
        &mut self.page.as_bytes_mut()[DATA_OFFSET..]
    }

    /// Writes `value` under `key`, returning the address that now holds
    /// this page (a fresh one if copy-on-write kicked in). Parents must
    /// store the returned address in their bucket slot.
    pub fn set(
        mut self,
        at: DbAddress,
        key: &Key,
        value: &[u8],
        batch: &mut BatchContext<'_>,
    ) -> Result<DbAddress> {
        // Pages stamped by an older batch are deeply immutable.
        if self.page.batch_id() != batch.batch_id() {
            let (addr, page) = batch.get_writable_copy(at)?;
            return DataPage::wrap(page).set(addr, key, value, batch);
        }

        // Descend when a child owns the key's first nibble.
        if !key.path.is_empty() {
            let nibble = key.path.first();
            let child_addr = self.bucket(nibble);
            if !child_addr.is_null() {
                if self.all_buckets_full() && key.can_be_cached() {
                    let hash = key.hash32();
                    if HashingMap::wrap(self.data_region_mut()).try_set(hash, key, value) {
                        batch.mark_dirty(at, self.page);
                        return Ok(at);
                    }
                    self.flush_cache(batch)?;
                }
                let child = batch.get_page(child_addr)?;
                let updated =
                    DataPage::wrap(child).set(child_addr, &key.slice_from(1), value, batch)?;
                self.set_bucket(nibble, updated);
                batch.mark_dirty(at, self.page);
                return Ok(at);
            }
        }

        // A storage cell whose account already owns a dedicated subtree is
        // routed into that subtree instead of the local map.
        if key.data_type == DataType::StorageCell {
            let root_key = Key::storage_tree_root(key.path.clone());
            let tree = NibbleMap::wrap(self.data_region())
                .try_get(&root_key)
                .map(|bytes| DbAddress::read(&bytes));
            if let Some(tree_addr) = tree {
                let cell_key = Key::storage_tree_cell(&key.additional_key);
                let tree_page = batch.get_page(tree_addr)?;
                let updated =
                    DataPage::wrap(tree_page).set(tree_addr, &cell_key, value, batch)?;
                if updated != tree_addr {
                    let mut map = NibbleMap::wrap(self.data_region_mut());
                    if !map.try_set(&root_key, &updated.to_le_bytes()) {
                        return Err(DbError::Invariant(
                            "storage tree root entry could not be rewritten",
                        ));
                    }
                }
                batch.mark_dirty(at, self.page);
                return Ok(at);
            }
        }

        if NibbleMap::wrap(self.data_region_mut()).try_set(key, value) {
            batch.mark_dirty(at, self.page);
            return Ok(at);
        }

        self.split(at, key, value, batch)
    }

    /// Flushes every cached entry into its first-nibble child, then clears
    /// the cache.
    fn flush_cache(&mut self, batch: &mut BatchContext<'_>) -> Result<()> {
        let entries: Vec<CacheEntry> = HashingMap::wrap(self.data_region()).iter().collect();
        for entry in entries {
            let nibble = entry.key.path.first();
            let child_addr = self.bucket(nibble);
            let child = batch.get_page(child_addr)?;
            let updated = DataPage::wrap(child).set(
                child_addr,
                &entry.key.slice_from(1),
                &entry.data,
                batch,
            )?;
            self.set_bucket(nibble, updated);
        }
        HashingMap::wrap(self.data_region_mut()).clear();
        Ok(())
    }

    /// Handles a full map: extract a dominating account's storage cells
    /// into a dedicated subtree, or flush the busiest nibble into a child
    /// page, then retry the pending write.
    fn split(
        mut self,
        at: DbAddress,
        key: &Key,
        value: &[u8],
        batch: &mut BatchContext<'_>,
    ) -> Result<DbAddress> {
        let stats = NibbleMap::wrap(self.data_region()).biggest_nibble_stats();
        if stats.count == 0 {
            return Err(DbError::Invariant("page split found no nibble to flush"));
        }

        let entries: Vec<MapEntry> = NibbleMap::wrap(self.data_region())
            .enumerate_nibble(stats.nibble)
            .collect();

        if stats.storage_cell_ratio > STORAGE_TREE_EXTRACTION_RATIO {
            let cells: Vec<&MapEntry> = entries
                .iter()
                .filter(|e| e.key.data_type == DataType::StorageCell)
                .collect();
            let single_account = cells
                .first()
                .map(|first| cells.iter().all(|e| e.key.path == first.key.path))
                .unwrap_or(false);
            if single_account {
                return self.extract_storage_tree(at, &cells, key, value, batch);
            }
        }

        let (allocated, _child_page) = batch.allocate_page(self.page_type(), self.level() + 1)?;
        let mut child_addr = allocated;
        for entry in &entries {
            let child = batch.get_page(child_addr)?;
            child_addr = DataPage::wrap(child).set(
                child_addr,
                &entry.key.slice_from(1),
                &entry.data,
                batch,
            )?;
        }
        {
            let mut map = NibbleMap::wrap(self.data_region_mut());
            for entry in &entries {
                map.delete(&entry.key);
            }
        }
        self.set_bucket(stats.nibble, child_addr);

        // The last bucket just filled: hand the region over to the
        // hashing cache. Clearing is safe only once no live map entry
        // remains, or when the pending write is itself cache-eligible.
        if self.all_buckets_full() {
            let map_empty = NibbleMap::wrap(self.data_region()).live_count() == 0;
            if key.can_be_cached() || map_empty {
                self.data_region_mut().fill(0);
            }
        }

        batch.mark_dirty(at, self.page.clone());
        self.set(at, key, value, batch)
    }

    /// Moves one account's storage cells into a fresh dedicated subtree and
    /// leaves a root-address entry behind, then retries the pending write.
    fn extract_storage_tree(
        mut self,
        at: DbAddress,
        cells: &[&MapEntry],
        key: &Key,
        value: &[u8],
        batch: &mut BatchContext<'_>,
    ) -> Result<DbAddress> {
        let account_path = cells[0].key.path.clone();
        let (allocated, _tree_page) = batch.allocate_page(PageType::MassiveStorageTree, 0)?;
        let mut tree_addr = allocated;

        for cell in cells {
            let cell_key = Key::storage_tree_cell(&cell.key.additional_key);
            let tree_page = batch.get_page(tree_addr)?;
            tree_addr = DataPage::wrap(tree_page).set(tree_addr, &cell_key, &cell.data, batch)?;
        }

        {
            let mut map = NibbleMap::wrap(self.data_region_mut());
            for cell in cells {
                map.delete(&cell.key);
            }
            let root_key = Key::storage_tree_root(account_path);
            if !map.try_set(&root_key, &tree_addr.to_le_bytes()) {
                return Err(DbError::Invariant(
                    "no room for storage tree root entry after extraction",
                ));
            }
        }

        batch.mark_dirty(at, self.page.clone());
        self.set(at, key, value, batch)
    }

    /// Looks up `key`, descending through children and dedicated storage
    /// subtrees. Never mutates.
    pub fn try_get<R: PageResolver>(&self, key: &Key, resolver: &R) -> Option<Vec<u8>> {
        if !key.path.is_empty() {
            if self.all_buckets_full() && key.can_be_cached() {
                if let Some(value) =
                    HashingMap::wrap(self.data_region()).try_get(key.hash32(), key)
                {
                    return Some(value);
                }
            }
            let child_addr = self.bucket(key.path.first());
            if !child_addr.is_null() {
                let child = resolver.page(child_addr).ok()?;
                return DataPage::wrap(child).try_get(&key.slice_from(1), resolver);
            }
        }

        let map = NibbleMap::wrap(self.data_region());
        if key.data_type == DataType::StorageCell {
            let root_key = Key::storage_tree_root(key.path.clone());
            if let Some(bytes) = map.try_get(&root_key) {
                let tree_addr = DbAddress::read(&bytes);
                let tree = resolver.page(tree_addr).ok()?;
                return DataPage::wrap(tree)
                    .try_get(&Key::storage_tree_cell(&key.additional_key), resolver);
            }
        }
        map.try_get(key)
    }

    /// Recursive usage walk, children before this page.
    pub fn report<R: PageResolver>(
        &self,
        visitor: &mut dyn UsageVisitor,
        resolver: &R,
        level: usize,
    ) {
        for nibble in 0..BUCKET_COUNT as u8 {
            let addr = self.bucket(nibble);
            if addr.is_null() {
                continue;
            }
            if let Ok(child) = resolver.page(addr) {
                DataPage::wrap(child).report(visitor, resolver, level + 1);
            }
        }

        let entries = if self.all_buckets_full() {
            HashingMap::wrap(self.data_region()).len()
        } else {
            NibbleMap::wrap(self.data_region()).live_count()
        };
        visitor.report_data_usage(level, self.buckets_used(), entries);
    }
}

impl std::fmt::Debug for DataPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataPage")
            .field("level", &self.level())
            .field("buckets_used", &self.buckets_used())
            .finish()
    }
}
