//! StateStore - batch-oriented facade over the paged state tree.
//!
//! Owns a [`PagedDb`] and keeps the root `DataPage` address in the root
//! page, so callers work with keys and values instead of page plumbing.

use std::path::Path;

use crate::data::Key;

use super::data_page::DataPage;
use super::metrics::DbMetrics;
use super::paged_db::{BatchContext, CommitOptions, PagedDb, Result};
use super::reporter::UsageReport;
use super::{DbAddress, PageType};

/// Key-value state storage backed by the page tree.
pub struct StateStore {
    db: PagedDb,
}

impl StateStore {
    /// Opens or creates a store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self {
            db: PagedDb::open(path)?,
        })
    }

    /// Opens or creates a store with the specified initial page count.
    pub fn open_with_size<P: AsRef<Path>>(path: P, pages: u32) -> Result<Self> {
        Ok(Self {
            db: PagedDb::open_with_size(path, pages)?,
        })
    }

    /// Creates an in-memory store (for testing).
    pub fn in_memory(pages: u32) -> Result<Self> {
        Ok(Self {
            db: PagedDb::in_memory(pages)?,
        })
    }

    /// Begins a write batch rooted at the last committed state.
    ///
    /// The first batch of a fresh store allocates the root data page.
    pub fn begin(&mut self) -> Result<StateBatch<'_>> {
        let root = self.db.state_root();
        let mut batch = self.db.begin_batch();
        let root = if root.is_null() {
            let (addr, _page) = batch.allocate_page(PageType::Data, 0)?;
            addr
        } else {
            root
        };
        Ok(StateBatch { batch, root })
    }

    /// Reads a key as of the last committed batch.
    pub fn get(&self, key: &Key) -> Option<Vec<u8>> {
        let ro = self.db.begin_read_only();
        let root = ro.state_root();
        if root.is_null() {
            return None;
        }
        let page = ro.get_page(root).ok()?;
        DataPage::wrap(page).try_get(key, &ro)
    }

    /// Walks the committed tree and aggregates page usage.
    pub fn usage_report(&self) -> UsageReport {
        let mut report = UsageReport::new();
        let ro = self.db.begin_read_only();
        let root = ro.state_root();
        if root.is_null() {
            return report;
        }
        if let Ok(page) = ro.get_page(root) {
            DataPage::wrap(page).report(&mut report, &ro, 0);
        }
        report
    }

    /// Returns the operation counters.
    pub fn metrics(&self) -> &DbMetrics {
        self.db.metrics()
    }

    /// Returns the current batch ID.
    pub fn batch_id(&self) -> u64 {
        self.db.batch_id()
    }

    /// Sets the reorg depth governing abandoned page reuse.
    pub fn set_reorg_depth(&mut self, depth: u32) {
        self.db.set_reorg_depth(depth);
    }
}

/// A write batch against the state tree.
pub struct StateBatch<'a> {
    batch: BatchContext<'a>,
    root: DbAddress,
}

impl<'a> StateBatch<'a> {
    /// Writes `value` under `key`.
    pub fn set(&mut self, key: &Key, value: &[u8]) -> Result<()> {
        let page = self.batch.get_page(self.root)?;
        self.root = DataPage::wrap(page).set(self.root, key, value, &mut self.batch)?;
        Ok(())
    }

    /// Reads a key, observing this batch's own writes.
    pub fn get(&self, key: &Key) -> Option<Vec<u8>> {
        let page = self.batch.get_page(self.root).ok()?;
        DataPage::wrap(page).try_get(key, &self.batch)
    }

    /// Address of the (possibly moved) root page.
    pub fn root(&self) -> DbAddress {
        self.root
    }

    /// Returns the batch ID.
    pub fn batch_id(&self) -> u64 {
        self.batch.batch_id()
    }

    /// Persists the batch and publishes the new root.
    pub fn commit(mut self, options: CommitOptions) -> Result<()> {
        self.batch.set_state_root(self.root);
        self.batch.commit(options)
    }

    /// Discards the batch; the prior snapshot stays authoritative.
    pub fn abort(self) {
        self.batch.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::NibblePath;

    fn account(bytes: &[u8]) -> Key {
        Key::account(NibblePath::from_bytes(bytes))
    }

    #[test]
    fn test_set_commit_get() {
        let mut store = StateStore::in_memory(200).unwrap();

        let mut batch = store.begin().unwrap();
        batch.set(&account(&[0xAB; 32]), b"balance").unwrap();
        assert_eq!(batch.get(&account(&[0xAB; 32])), Some(b"balance".to_vec()));
        batch.commit(CommitOptions::DangerNoFlush).unwrap();

        assert_eq!(store.get(&account(&[0xAB; 32])), Some(b"balance".to_vec()));
        assert_eq!(store.get(&account(&[0xCD; 32])), None);
    }

    #[test]
    fn test_abort_discards_writes() {
        let mut store = StateStore::in_memory(200).unwrap();

        let mut batch = store.begin().unwrap();
        batch.set(&account(&[0x11; 32]), b"keep").unwrap();
        batch.commit(CommitOptions::DangerNoFlush).unwrap();

        let mut batch = store.begin().unwrap();
        batch.set(&account(&[0x11; 32]), b"drop").unwrap();
        batch.abort();

        assert_eq!(store.get(&account(&[0x11; 32])), Some(b"keep".to_vec()));
        assert_eq!(store.metrics().snapshot().batches_aborted, 1);
    }

    #[test]
    fn test_storage_cells() {
        let mut store = StateStore::in_memory(200).unwrap();
        let path = NibblePath::from_bytes(&[0x42; 32]);

        let mut batch = store.begin().unwrap();
        batch
            .set(&Key::storage_cell(path.clone(), &[0x01; 32]), b"one")
            .unwrap();
        batch
            .set(&Key::storage_cell(path.clone(), &[0x02; 32]), b"two")
            .unwrap();
        batch.commit(CommitOptions::DangerNoFlush).unwrap();

        assert_eq!(
            store.get(&Key::storage_cell(path.clone(), &[0x01; 32])),
            Some(b"one".to_vec())
        );
        assert_eq!(
            store.get(&Key::storage_cell(path, &[0x02; 32])),
            Some(b"two".to_vec())
        );
    }
}
