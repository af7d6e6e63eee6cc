//! Table heap: a linked chain of slotted pages holding row frames.

use crate::access::tuple::{RowImage, TupleId};
use crate::error::{DbError, DbResult};
use crate::storage::buffer::BufferPoolManager;
use crate::storage::page::{self, heap_page, HeapPage, PageId};
use crate::storage::wal::Lsn;

/// Manages one table's pages. The first page id lives in the catalog;
/// `first_page()` reports it back after a lazy creation.
pub struct TableHeap {
    pool: BufferPoolManager,
    first_page: PageId,
}

impl TableHeap {
    pub fn new(pool: BufferPoolManager, first_page: PageId) -> Self {
        Self { pool, first_page }
    }

    pub fn first_page(&self) -> PageId {
        self.first_page
    }

    /// Inserts a row frame, stamping touched pages with `lsn` for the
    /// write-ahead gate. Walks the chain for free space, extending it at the
    /// tail when every page is full.
    pub fn insert(&mut self, data: &[u8], lsn: Lsn) -> DbResult<TupleId> {
        let needed = HeapPage::required_space_for(data.len());
        if needed + page::PAGE_HEADER_SIZE + 8 > self.pool.page_size() {
            return Err(DbError::InvalidArgument(format!(
                "row of {} bytes does not fit a {}-byte page",
                data.len(),
                self.pool.page_size()
            )));
        }

        if !self.first_page.is_valid() {
            let (page_id, mut guard) = self.pool.new_page()?;
            let mut heap = HeapPage::init(&mut guard, page_id);
            let slot = heap.insert_tuple(data)?;
            page::set_lsn(&mut guard, lsn.0);
            self.first_page = page_id;
            return Ok(TupleId::new(page_id, slot));
        }

        let mut current = self.first_page;
        loop {
            let mut guard = self.pool.fetch_page_write(current)?;
            let mut heap = HeapPage::from_data(&mut guard);
            if heap.free_space() >= needed {
                let slot = heap.insert_tuple(data)?;
                page::set_lsn(&mut guard, lsn.0);
                return Ok(TupleId::new(current, slot));
            }
            match heap.next_page_id() {
                Some(next) => current = next,
                None => {
                    let (new_id, mut new_guard) = self.pool.new_page()?;
                    let mut new_heap = HeapPage::init(&mut new_guard, new_id);
                    let slot = new_heap.insert_tuple(data)?;
                    page::set_lsn(&mut new_guard, lsn.0);

                    let mut tail = HeapPage::from_data(&mut guard);
                    tail.set_next_page_id(new_id);
                    page::set_lsn(&mut guard, lsn.0);
                    return Ok(TupleId::new(new_id, slot));
                }
            }
        }
    }

    pub fn get(&self, tid: TupleId) -> DbResult<Option<Vec<u8>>> {
        let guard = self.pool.fetch_page(tid.page_id)?;
        match heap_page::view::get_tuple(&guard, tid.slot) {
            Ok(Some(data)) => Ok(Some(data.to_vec())),
            Ok(None) => Ok(None),
            Err(DbError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn delete(&mut self, tid: TupleId, lsn: Lsn) -> DbResult<()> {
        let mut guard = self.pool.fetch_page_write(tid.page_id)?;
        let mut heap = HeapPage::from_data(&mut guard);
        heap.delete_tuple(tid.slot)?;
        page::set_lsn(&mut guard, lsn.0);
        Ok(())
    }

    /// Iterates every live row frame in chain order.
    pub fn iter(&self) -> HeapIter {
        HeapIter {
            pool: self.pool.clone(),
            current: self.first_page,
            slot: 0,
        }
    }

    /// Collects the page ids of the whole chain (for DROP TABLE).
    pub fn chain_pages(&self) -> DbResult<Vec<PageId>> {
        let mut pages = Vec::new();
        let mut current = self.first_page;
        while current.is_valid() {
            let guard = self.pool.fetch_page(current)?;
            pages.push(current);
            current = heap_page::view::next_page_id(&guard).unwrap_or(PageId::INVALID);
        }
        Ok(pages)
    }
}

/// Lazy iterator over a heap chain. Restartable by constructing a new one;
/// dropping it mid-way has no side effects.
pub struct HeapIter {
    pool: BufferPoolManager,
    current: PageId,
    slot: u16,
}

impl Iterator for HeapIter {
    type Item = DbResult<(TupleId, RowImage)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if !self.current.is_valid() {
                return None;
            }
            let guard = match self.pool.fetch_page(self.current) {
                Ok(g) => g,
                Err(e) => return Some(Err(e)),
            };
            while self.slot < heap_page::view::tuple_count(&guard) {
                let slot = self.slot;
                self.slot += 1;
                match heap_page::view::get_tuple(&guard, slot) {
                    Ok(Some(data)) => {
                        let tid = TupleId::new(self.current, slot);
                        return Some(RowImage::decode(data).map(|image| (tid, image)));
                    }
                    Ok(None) => continue,
                    Err(e) => return Some(Err(e)),
                }
            }
            self.current = heap_page::view::next_page_id(&guard).unwrap_or(PageId::INVALID);
            self.slot = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::buffer::lru::LruReplacer;
    use crate::storage::wal::{WalConfig, WalManager};
    use crate::storage::PageStore;
    use std::sync::Arc;
    use tempfile::tempdir;

    const PAGE_SIZE: usize = 512;

    fn test_heap(dir: &tempfile::TempDir) -> TableHeap {
        let store = PageStore::create(&dir.path().join("data.pdb"), PAGE_SIZE).unwrap();
        let wal = Arc::new(
            WalManager::open(WalConfig {
                dir: dir.path().join("wal"),
                sync_on_commit: false,
                ..Default::default()
            })
            .unwrap(),
        );
        let pool = BufferPoolManager::new(store, wal, Box::new(LruReplacer::new(8)), 8);
        TableHeap::new(pool, PageId::INVALID)
    }

    fn frame(row_id: u64, payload: &[u8]) -> Vec<u8> {
        RowImage::encode(row_id, 1, payload)
    }

    #[test]
    fn test_insert_get_delete() -> DbResult<()> {
        let dir = tempdir().unwrap();
        let mut heap = test_heap(&dir);

        let tid = heap.insert(&frame(1, b"alpha"), Lsn(1))?;
        assert!(heap.first_page().is_valid());
        let data = heap.get(tid)?.unwrap();
        assert_eq!(RowImage::decode(&data)?.values, b"alpha");

        heap.delete(tid, Lsn(2))?;
        assert_eq!(heap.get(tid)?, None);
        Ok(())
    }

    #[test]
    fn test_chain_growth_and_iteration() -> DbResult<()> {
        let dir = tempdir().unwrap();
        let mut heap = test_heap(&dir);

        // Enough rows to span several 512-byte pages.
        let payload = vec![0x5A; 100];
        let mut tids = Vec::new();
        for row_id in 1..=20u64 {
            tids.push(heap.insert(&frame(row_id, &payload), Lsn(row_id))?);
        }
        assert!(heap.chain_pages()?.len() > 1);

        let rows: Vec<u64> = heap
            .iter()
            .map(|r| r.map(|(_, image)| image.row_id))
            .collect::<DbResult<_>>()?;
        assert_eq!(rows, (1..=20).collect::<Vec<u64>>());
        Ok(())
    }

    #[test]
    fn test_deleted_rows_skipped_by_iter() -> DbResult<()> {
        let dir = tempdir().unwrap();
        let mut heap = test_heap(&dir);
        let t1 = heap.insert(&frame(1, b"keep"), Lsn(1))?;
        let t2 = heap.insert(&frame(2, b"drop"), Lsn(1))?;
        let _ = t1;
        heap.delete(t2, Lsn(2))?;

        let rows: Vec<u64> = heap
            .iter()
            .map(|r| r.map(|(_, image)| image.row_id))
            .collect::<DbResult<_>>()?;
        assert_eq!(rows, vec![1]);
        Ok(())
    }

    #[test]
    fn test_oversized_row_rejected() {
        let dir = tempdir().unwrap();
        let mut heap = test_heap(&dir);
        let huge = vec![0u8; PAGE_SIZE * 2];
        assert!(heap.insert(&frame(1, &huge), Lsn(1)).is_err());
    }
}
