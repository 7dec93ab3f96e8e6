//! PagedDb - Memory-mapped page allocator with copy-on-write batches.
//!
//! Persistence works through a memory-mapped file of 4KB pages, inspired by
//! LMDB. Writes happen inside a single `BatchContext` at a time; every page
//! touched by a batch is cloned to a fresh address first, so readers pinned
//! to an older batch keep seeing the exact tree that batch committed.
//! Superseded pages are recorded in the root page and recycled once the
//! reorg depth has passed.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::RwLock;

use hashbrown::HashMap;
use memmap2::MmapMut;
use parking_lot::Mutex;
use rustc_hash::FxBuildHasher;
use thiserror::Error;

use super::metrics::DbMetrics;
use super::{DbAddress, Page, PageType, RootPage, PAGE_SIZE};

/// Type alias for fast HashMap with FxHash.
type FastHashMap<K, V> = HashMap<K, V, FxBuildHasher>;

/// Database errors.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Database is corrupted")]
    Corrupted,
    #[error("Page not found: {0}")]
    PageNotFound(DbAddress),
    #[error("Database is full")]
    Full,
    #[error("Invalid page type")]
    InvalidPageType,
    #[error("Invariant violated: {0}")]
    Invariant(&'static str),
}

/// Result type for database operations.
pub type Result<T> = std::result::Result<T, DbError>;

/// Options for committing a batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitOptions {
    /// Flush data pages but keep root in memory (faster, less durable).
    FlushDataOnly,
    /// Flush both data and root (slower, fully durable).
    FlushDataAndRoot,
    /// Don't flush (fastest, not durable until next flush).
    DangerNoFlush,
}

/// Resolves page addresses to page images.
///
/// Implemented by the database itself, by read-only batches, and by write
/// batches (which overlay their dirty pages), so tree reads run against
/// whichever view the caller holds.
pub trait PageResolver {
    fn page(&self, addr: DbAddress) -> Result<Page>;
}

/// The main database structure.
///
/// Provides memory-mapped storage with copy-on-write semantics for
/// concurrent readers and a single writer.
pub struct PagedDb {
    /// Memory-mapped file (wrapped in Mutex for interior mutability).
    mmap: Mutex<MmapMut>,
    /// The underlying file.
    _file: Option<File>,
    /// Current batch ID (monotonically increasing).
    batch_id: u64,
    /// Root page (page 0).
    root: RwLock<RootPage>,
    /// Maximum number of pages.
    max_pages: u32,
    /// Operation counters.
    metrics: DbMetrics,
}

impl PagedDb {
    /// Default initial size (64MB = 16384 pages).
    const DEFAULT_INITIAL_PAGES: u32 = 16384;

    /// Opens or creates a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_size(path, Self::DEFAULT_INITIAL_PAGES)
    }

    /// Opens or creates a database with the specified initial size.
    pub fn open_with_size<P: AsRef<Path>>(path: P, initial_pages: u32) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        let file_size = file.metadata()?.len();
        let min_size = (initial_pages as u64) * (PAGE_SIZE as u64);

        if file_size < min_size {
            file.set_len(min_size)?;
        }

        let actual_size = file.metadata()?.len();
        let max_pages = (actual_size / PAGE_SIZE as u64) as u32;

        // Safety: exclusive write access is guarded by the Mutex.
        let mmap = unsafe { MmapMut::map_mut(&file)? };

        let is_new = file_size == 0 || mmap[0..PAGE_SIZE].iter().all(|&b| b == 0);

        let (root, batch_id) = if is_new {
            (RootPage::new(1), 1)
        } else {
            let mut page_data = [0u8; PAGE_SIZE];
            page_data.copy_from_slice(&mmap[0..PAGE_SIZE]);
            let page = Page::from_bytes(page_data);
            if page.header().get_page_type() != Some(PageType::Root) {
                return Err(DbError::Corrupted);
            }
            let root = RootPage::wrap(page);
            let batch_id = root.page().batch_id();
            (root, batch_id)
        };

        let db = Self {
            mmap: Mutex::new(mmap),
            _file: Some(file),
            batch_id,
            root: RwLock::new(root),
            max_pages,
            metrics: DbMetrics::new(),
        };

        if is_new {
            db.write_root()?;
        }

        Ok(db)
    }

    /// Creates an in-memory database (for testing).
    pub fn in_memory(pages: u32) -> Result<Self> {
        let size = (pages as usize) * PAGE_SIZE;
        let mmap = MmapMut::map_anon(size)?;

        let db = Self {
            mmap: Mutex::new(mmap),
            _file: None,
            batch_id: 1,
            root: RwLock::new(RootPage::new(1)),
            max_pages: pages,
            metrics: DbMetrics::new(),
        };

        db.write_root()?;
        Ok(db)
    }

    /// Writes the root page to the memory map.
    fn write_root(&self) -> Result<()> {
        let root = self.root.read().unwrap();
        let mut mmap = self.mmap.lock();
        mmap[0..PAGE_SIZE].copy_from_slice(root.page().as_bytes());
        Ok(())
    }

    /// Begins a new read-only batch pinned to the last committed epoch.
    pub fn begin_read_only(&self) -> ReadOnlyBatch<'_> {
        let root = self.root.read().unwrap();
        ReadOnlyBatch {
            db: self,
            batch_id: root.page().batch_id(),
            state_root: root.state_root(),
        }
    }

    /// Begins a new writable batch.
    pub fn begin_batch(&mut self) -> BatchContext<'_> {
        self.batch_id += 1;
        let batch_id = self.batch_id;

        BatchContext {
            db: self,
            batch_id,
            dirty_pages: FastHashMap::with_hasher(FxBuildHasher),
            allocated_pages: Vec::new(),
        }
    }

    /// Returns the current batch ID.
    pub fn batch_id(&self) -> u64 {
        self.batch_id
    }

    /// Returns the state tree root address from the root page.
    pub fn state_root(&self) -> DbAddress {
        self.root.read().unwrap().state_root()
    }

    /// Sets the reorg depth governing abandoned page reuse.
    pub fn set_reorg_depth(&mut self, depth: u32) {
        self.root.write().unwrap().set_reorg_depth(depth);
    }

    /// Returns the operation counters.
    pub fn metrics(&self) -> &DbMetrics {
        &self.metrics
    }

    /// Gets a page by address (read-only).
    pub fn get_page(&self, addr: DbAddress) -> Result<Page> {
        if addr.is_null() {
            return Err(DbError::PageNotFound(addr));
        }

        let offset = addr.file_offset() as usize;
        let mmap = self.mmap.lock();
        if offset + PAGE_SIZE > mmap.len() {
            return Err(DbError::PageNotFound(addr));
        }

        let mut page_data = [0u8; PAGE_SIZE];
        page_data.copy_from_slice(&mmap[offset..offset + PAGE_SIZE]);
        self.metrics.inc_page_reads();
        Ok(Page::from_bytes(page_data))
    }

    /// Flushes all changes to disk.
    pub fn flush(&self) -> Result<()> {
        let mmap = self.mmap.lock();
        mmap.flush()?;
        Ok(())
    }
}

impl PageResolver for PagedDb {
    fn page(&self, addr: DbAddress) -> Result<Page> {
        self.get_page(addr)
    }
}

/// A read-only view of the database pinned to one committed epoch.
pub struct ReadOnlyBatch<'a> {
    db: &'a PagedDb,
    batch_id: u64,
    state_root: DbAddress,
}

impl<'a> ReadOnlyBatch<'a> {
    /// Returns the batch ID this view is pinned to.
    pub fn batch_id(&self) -> u64 {
        self.batch_id
    }

    /// Gets a page by address.
    pub fn get_page(&self, addr: DbAddress) -> Result<Page> {
        self.db.get_page(addr)
    }

    /// Gets the state root address as of this epoch.
    pub fn state_root(&self) -> DbAddress {
        self.state_root
    }
}

impl<'a> PageResolver for ReadOnlyBatch<'a> {
    fn page(&self, addr: DbAddress) -> Result<Page> {
        self.db.get_page(addr)
    }
}

/// A writable batch context.
///
/// Pages are copied to fresh addresses before modification; the prior
/// images stay untouched until they age out of the reorg window.
pub struct BatchContext<'a> {
    db: &'a mut PagedDb,
    batch_id: u64,
    /// Pages modified in this batch (addr -> page data).
    dirty_pages: FastHashMap<DbAddress, Page>,
    /// Addresses allocated or reused in this batch.
    allocated_pages: Vec<DbAddress>,
}

impl<'a> BatchContext<'a> {
    /// Returns the batch ID.
    pub fn batch_id(&self) -> u64 {
        self.batch_id
    }

    /// Returns the operation counters.
    pub fn metrics(&self) -> &DbMetrics {
        self.db.metrics()
    }

    /// Reserves an address, preferring abandoned pages past the reorg depth.
    fn reserve(&mut self) -> Result<DbAddress> {
        let mut root = self.db.root.write().unwrap();
        if let Some(addr) = root.pop_abandoned(self.batch_id) {
            self.db.metrics.inc_pages_reused();
            return Ok(addr);
        }
        let addr = root.allocate_page();
        if addr.raw() >= self.db.max_pages {
            return Err(DbError::Full);
        }
        self.db.metrics.inc_pages_allocated();
        Ok(addr)
    }

    /// Allocates a new zeroed page stamped with the current batch ID.
    pub fn allocate_page(&mut self, page_type: PageType, level: u8) -> Result<(DbAddress, Page)> {
        let addr = self.reserve()?;

        let page = Page::with_header(self.batch_id, page_type, level);

        self.dirty_pages.insert(addr, page.clone());
        self.allocated_pages.push(addr);

        Ok((addr, page))
    }

    /// Gets a page, preferring this batch's dirty copy.
    pub fn get_page(&self, addr: DbAddress) -> Result<Page> {
        if let Some(page) = self.dirty_pages.get(&addr) {
            return Ok(page.clone());
        }
        self.db.get_page(addr)
    }

    /// Gets a writable copy of a page.
    ///
    /// A page already dirtied by this batch is returned at its current
    /// address. Otherwise the image is cloned to a fresh address, stamped
    /// with this batch's ID, and the superseded address is retired for
    /// later reuse. The caller must propagate the returned address into the
    /// parent's bucket slot.
    pub fn get_writable_copy(&mut self, addr: DbAddress) -> Result<(DbAddress, Page)> {
        if let Some(page) = self.dirty_pages.get(&addr) {
            return Ok((addr, page.clone()));
        }

        let mut page = self.db.get_page(addr)?;
        page.stamp_batch(self.batch_id);

        let new_addr = self.reserve()?;
        self.dirty_pages.insert(new_addr, page.clone());
        self.allocated_pages.push(new_addr);

        {
            let mut root = self.db.root.write().unwrap();
            root.try_add_abandoned(addr, self.batch_id);
        }
        self.db.metrics.inc_cow_operations();
        self.db.metrics.inc_pages_abandoned();

        Ok((new_addr, page))
    }

    /// Registers the latest image of a page mutated by this batch.
    pub fn mark_dirty(&mut self, addr: DbAddress, page: Page) {
        self.dirty_pages.insert(addr, page);
    }

    /// Sets the state tree root address.
    pub fn set_state_root(&mut self, addr: DbAddress) {
        self.db.root.write().unwrap().set_state_root(addr);
    }

    /// Commits the batch to the database.
    pub fn commit(self, options: CommitOptions) -> Result<()> {
        let written = self.dirty_pages.len() as u64;
        {
            let mut mmap = self.db.mmap.lock();
            for (addr, page) in &self.dirty_pages {
                let offset = addr.file_offset() as usize;
                if offset + PAGE_SIZE <= mmap.len() {
                    mmap[offset..offset + PAGE_SIZE].copy_from_slice(page.as_bytes());
                }
            }
        }

        {
            let mut root = self.db.root.write().unwrap();
            root.page_mut().stamp_batch(self.batch_id);
        }

        self.db.write_root()?;
        self.db.metrics.add_page_writes(written);
        self.db.metrics.inc_batches_committed();

        match options {
            CommitOptions::FlushDataAndRoot => {
                let mmap = self.db.mmap.lock();
                mmap.flush()?;
            }
            CommitOptions::FlushDataOnly => {
                let mmap = self.db.mmap.lock();
                mmap.flush_async()?;
            }
            CommitOptions::DangerNoFlush => {}
        }

        Ok(())
    }

    /// Aborts the batch, discarding all changes.
    pub fn abort(self) {
        self.db.metrics.inc_batches_aborted();
    }
}

impl<'a> PageResolver for BatchContext<'a> {
    fn page(&self, addr: DbAddress) -> Result<Page> {
        self.get_page(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");

        let db = PagedDb::open(&path).unwrap();
        assert_eq!(db.batch_id(), 1);
        assert!(db.state_root().is_null());
    }

    #[test]
    fn test_in_memory() {
        let db = PagedDb::in_memory(100).unwrap();
        assert_eq!(db.batch_id(), 1);
    }

    #[test]
    fn test_allocate_and_commit() {
        let mut db = PagedDb::in_memory(100).unwrap();

        let mut batch = db.begin_batch();
        let (addr, _page) = batch.allocate_page(PageType::Data, 0).unwrap();
        batch.set_state_root(addr);
        batch.commit(CommitOptions::DangerNoFlush).unwrap();

        assert_eq!(db.state_root(), addr);
        let page = db.get_page(addr).unwrap();
        assert_eq!(page.header().get_page_type(), Some(PageType::Data));
        assert_eq!(page.batch_id(), 2);
    }

    #[test]
    fn test_writable_copy_moves_address() {
        let mut db = PagedDb::in_memory(100).unwrap();

        let addr = {
            let mut batch = db.begin_batch();
            let (addr, mut page) = batch.allocate_page(PageType::Data, 0).unwrap();
            page.as_bytes_mut()[100] = 0xAB;
            batch.mark_dirty(addr, page);
            batch.commit(CommitOptions::DangerNoFlush).unwrap();
            addr
        };
        let before = db.get_page(addr).unwrap();

        let mut batch = db.begin_batch();
        let (new_addr, mut copy) = batch.get_writable_copy(addr).unwrap();
        assert_ne!(new_addr, addr);
        assert_eq!(copy.batch_id(), batch.batch_id());
        copy.as_bytes_mut()[100] = 0xCD;
        batch.mark_dirty(new_addr, copy);
        batch.commit(CommitOptions::DangerNoFlush).unwrap();

        // The old image is byte-identical to what its batch committed.
        let old = db.get_page(addr).unwrap();
        assert_eq!(old.as_bytes(), before.as_bytes());
        assert_eq!(old.as_bytes()[100], 0xAB);
        assert_eq!(db.get_page(new_addr).unwrap().as_bytes()[100], 0xCD);
    }

    #[test]
    fn test_writable_copy_same_batch_is_stable() {
        let mut db = PagedDb::in_memory(100).unwrap();

        let mut batch = db.begin_batch();
        let (addr, _page) = batch.allocate_page(PageType::Data, 0).unwrap();
        let (again, _) = batch.get_writable_copy(addr).unwrap();
        assert_eq!(again, addr);
    }

    #[test]
    fn test_abandoned_pages_are_reused() {
        let mut db = PagedDb::in_memory(100).unwrap();
        db.set_reorg_depth(1);

        let addr = {
            let mut batch = db.begin_batch();
            let (addr, page) = batch.allocate_page(PageType::Data, 0).unwrap();
            batch.mark_dirty(addr, page);
            batch.commit(CommitOptions::DangerNoFlush).unwrap();
            addr
        };

        // COW retires the old address.
        {
            let mut batch = db.begin_batch();
            let (new_addr, page) = batch.get_writable_copy(addr).unwrap();
            batch.mark_dirty(new_addr, page);
            batch.commit(CommitOptions::DangerNoFlush).unwrap();
        }

        // Far enough in the future the retired address comes back.
        db.batch_id += 10;
        let mut batch = db.begin_batch();
        let (reused, _page) = batch.allocate_page(PageType::Data, 0).unwrap();
        assert_eq!(reused, addr);
        assert_eq!(batch.metrics().snapshot().pages_reused, 1);
        batch.abort();
    }

    #[test]
    fn test_read_only_batch_pinned_root() {
        let mut db = PagedDb::in_memory(100).unwrap();

        let mut batch = db.begin_batch();
        let (addr, _page) = batch.allocate_page(PageType::Data, 0).unwrap();
        batch.set_state_root(addr);
        batch.commit(CommitOptions::DangerNoFlush).unwrap();

        let ro = db.begin_read_only();
        assert_eq!(ro.batch_id(), 2);
        assert_eq!(ro.state_root(), addr);
    }

    #[test]
    fn test_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("persist.db");

        let addr = {
            let mut db = PagedDb::open(&path).unwrap();
            let mut batch = db.begin_batch();
            let (addr, mut page) = batch.allocate_page(PageType::Data, 0).unwrap();
            page.as_bytes_mut()[200] = 0x77;
            batch.mark_dirty(addr, page);
            batch.set_state_root(addr);
            batch.commit(CommitOptions::FlushDataAndRoot).unwrap();
            addr
        };

        let db = PagedDb::open(&path).unwrap();
        assert_eq!(db.batch_id(), 2);
        assert_eq!(db.state_root(), addr);
        assert_eq!(db.get_page(addr).unwrap().as_bytes()[200], 0x77);
    }
}
