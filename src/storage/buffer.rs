//! Buffer pool: a bounded cache of pages with pin/unpin guards.
//!
//! Pages are fetched into frames and pinned for the lifetime of the returned
//! guard; pinned frames are never evicted. Each frame carries its own latch
//! (a reader-writer lock around the page bytes), short-held for physical
//! consistency and separate from MVCC's logical visibility rules. Clean
//! frames are evicted in LRU order; a dirty frame is written back first, and
//! that write-back is gated on the WAL (`flush_up_to` the page's header LSN)
//! so a page can never reach the data file ahead of the log describing it.

pub mod lru;
pub mod replacer;

use crate::error::{DbError, DbResult};
use crate::storage::page::{self, PageId};
use crate::storage::wal::WalManager;
use crate::storage::PageStore;
use dashmap::DashMap;
use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{Mutex, RawRwLock, RwLock};
use replacer::{FrameId, Replacer};
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

type PageData = Arc<RwLock<Box<[u8]>>>;

struct Frame {
    data: PageData,
    page_id: Option<PageId>,
    pin_count: AtomicU32,
    is_dirty: AtomicBool,
}

impl Frame {
    fn new(page_size: usize) -> Self {
        Self {
            data: Arc::new(RwLock::new(vec![0u8; page_size].into_boxed_slice())),
            page_id: None,
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
        }
    }

    fn reset(&mut self) {
        self.page_id = None;
        self.pin_count.store(0, Ordering::SeqCst);
        self.is_dirty.store(false, Ordering::SeqCst);
        self.data.write().fill(0);
    }
}

#[derive(Clone)]
pub struct BufferPoolManager {
    inner: Arc<BufferPoolInner>,
}

struct BufferPoolInner {
    page_table: DashMap<PageId, FrameId>,
    frames: RwLock<HashMap<FrameId, Frame>>,
    replacer: Mutex<Box<dyn Replacer>>,
    store: Mutex<PageStore>,
    wal: Arc<WalManager>,
    next_frame_id: AtomicU32,
    max_frames: usize,
    page_size: usize,
}

impl BufferPoolManager {
    pub fn new(
        store: PageStore,
        wal: Arc<WalManager>,
        replacer: Box<dyn Replacer>,
        max_frames: usize,
    ) -> Self {
        let page_size = store.page_size();
        Self {
            inner: Arc::new(BufferPoolInner {
                page_table: DashMap::new(),
                frames: RwLock::new(HashMap::with_capacity(max_frames)),
                replacer: Mutex::new(replacer),
                store: Mutex::new(store),
                wal,
                next_frame_id: AtomicU32::new(0),
                max_frames,
                page_size,
            }),
        }
    }

    pub fn page_size(&self) -> usize {
        self.inner.page_size
    }

    /// Fetches a page for reading, pinning it for the guard's lifetime.
    pub fn fetch_page(&self, page_id: PageId) -> DbResult<PageReadGuard> {
        let (frame_id, data) = self.pin_frame(page_id, false)?;
        // Latch outside the frame-map lock so waiting on a writer does not
        // stall unrelated fetches.
        let latch = data.read_arc();
        Ok(PageReadGuard {
            inner: self.inner.clone(),
            frame_id,
            latch,
        })
    }

    /// Fetches a page for writing, marking the frame dirty.
    pub fn fetch_page_write(&self, page_id: PageId) -> DbResult<PageWriteGuard> {
        let (frame_id, data) = self.pin_frame(page_id, true)?;
        let latch = data.write_arc();
        Ok(PageWriteGuard {
            inner: self.inner.clone(),
            frame_id,
            latch,
        })
    }

    /// Allocates a fresh page and returns it pinned for writing. The caller
    /// is responsible for formatting it (page header included).
    pub fn new_page(&self) -> DbResult<(PageId, PageWriteGuard)> {
        let frame_id = self.acquire_frame()?;
        let page_id = self.inner.store.lock().allocate_page()?;

        let data = {
            let mut frames = self.inner.frames.write();
            let frame = frames.get_mut(&frame_id).expect("frame just acquired");
            frame.reset();
            frame.page_id = Some(page_id);
            frame.pin_count.store(1, Ordering::SeqCst);
            frame.is_dirty.store(true, Ordering::SeqCst);
            frame.data.clone()
        };
        self.inner.page_table.insert(page_id, frame_id);
        self.inner.replacer.lock().pin(frame_id);

        let latch = data.write_arc();
        Ok((
            page_id,
            PageWriteGuard {
                inner: self.inner.clone(),
                frame_id,
                latch,
            },
        ))
    }

    /// Drops a page from the pool and returns it to the store's free list.
    /// Fails if the page is still pinned.
    pub fn free_page(&self, page_id: PageId) -> DbResult<()> {
        if let Some((_, frame_id)) = self.inner.page_table.remove(&page_id) {
            let mut frames = self.inner.frames.write();
            if let Some(frame) = frames.get_mut(&frame_id) {
                if frame.pin_count.load(Ordering::SeqCst) > 0 {
                    // Re-register before bailing so the page stays reachable.
                    self.inner.page_table.insert(page_id, frame_id);
                    return Err(DbError::InvalidArgument(format!(
                        "cannot free pinned {}",
                        page_id
                    )));
                }
                frame.reset();
                self.inner.replacer.lock().unpin(frame_id);
            }
        }
        self.inner.store.lock().free_page(page_id)
    }

    /// Writes a single dirty page through to the data file (WAL first).
    pub fn flush_page(&self, page_id: PageId) -> DbResult<()> {
        if let Some(frame_id) = self.inner.page_table.get(&page_id).map(|e| *e.value()) {
            let frames = self.inner.frames.read();
            if let Some(frame) = frames.get(&frame_id) {
                if frame.is_dirty.load(Ordering::SeqCst) {
                    self.write_back(page_id, &frame.data)?;
                    frame.is_dirty.store(false, Ordering::SeqCst);
                }
            }
        }
        Ok(())
    }

    /// Flushes every dirty frame and syncs the data file. Used by
    /// checkpointing and close.
    pub fn flush_all(&self) -> DbResult<()> {
        let frames = self.inner.frames.read();
        for frame in frames.values() {
            if let Some(page_id) = frame.page_id {
                if frame.is_dirty.load(Ordering::SeqCst) {
                    self.write_back(page_id, &frame.data)?;
                    frame.is_dirty.store(false, Ordering::SeqCst);
                }
            }
        }
        drop(frames);
        self.inner.store.lock().sync()
    }

    fn write_back(&self, page_id: PageId, data: &PageData) -> DbResult<()> {
        let snapshot = data.read().clone();
        // Write-ahead invariant: the log covering this page goes first.
        let page_lsn = page::lsn_of(&snapshot);
        self.inner
            .wal
            .flush_up_to(crate::storage::wal::Lsn(page_lsn))?;
        let mut copy = snapshot.into_vec();
        self.inner.store.lock().write_page(page_id, &mut copy)
    }

    /// Pins the page's frame, loading it from disk on a miss. Returns the
    /// frame id and a handle to its data latch.
    fn pin_frame(&self, page_id: PageId, dirty: bool) -> DbResult<(FrameId, PageData)> {
        if let Some(frame_id) = self.inner.page_table.get(&page_id).map(|e| *e.value()) {
            let frames = self.inner.frames.read();
            if let Some(frame) = frames.get(&frame_id) {
                if frame.page_id == Some(page_id) {
                    frame.pin_count.fetch_add(1, Ordering::SeqCst);
                    if dirty {
                        frame.is_dirty.store(true, Ordering::SeqCst);
                    }
                    self.inner.replacer.lock().pin(frame_id);
                    return Ok((frame_id, frame.data.clone()));
                }
            }
        }

        let frame_id = self.acquire_frame()?;
        let data = {
            let mut frames = self.inner.frames.write();
            let frame = frames.get_mut(&frame_id).expect("frame just acquired");
            {
                let mut bytes = frame.data.write();
                if let Err(e) = self.inner.store.lock().read_page(page_id, &mut bytes) {
                    drop(bytes);
                    frame.reset();
                    drop(frames);
                    self.inner.replacer.lock().unpin(frame_id);
                    return Err(e);
                }
            }
            frame.page_id = Some(page_id);
            frame.pin_count.store(1, Ordering::SeqCst);
            frame.is_dirty.store(dirty, Ordering::SeqCst);
            frame.data.clone()
        };
        self.inner.page_table.insert(page_id, frame_id);
        self.inner.replacer.lock().pin(frame_id);
        Ok((frame_id, data))
    }

    fn acquire_frame(&self) -> DbResult<FrameId> {
        {
            let frames = self.inner.frames.read();
            if frames.len() < self.inner.max_frames {
                drop(frames);
                let mut frames = self.inner.frames.write();
                if frames.len() < self.inner.max_frames {
                    let frame_id = self.inner.next_frame_id.fetch_add(1, Ordering::SeqCst);
                    frames.insert(frame_id, Frame::new(self.inner.page_size));
                    return Ok(frame_id);
                }
            }
        }

        loop {
            let victim = self
                .inner
                .replacer
                .lock()
                .evict()
                .ok_or_else(|| {
                    DbError::Capacity("buffer pool exhausted: all frames pinned".into())
                })?;

            let (old_page_id, is_dirty, data) = {
                let frames = self.inner.frames.read();
                match frames.get(&victim) {
                    Some(frame) => {
                        // A racing fetch may have re-pinned the victim after
                        // the replacer handed it out; leave it alone.
                        if frame.pin_count.load(Ordering::SeqCst) > 0 {
                            continue;
                        }
                        (
                            frame.page_id,
                            frame.is_dirty.load(Ordering::SeqCst),
                            frame.data.clone(),
                        )
                    }
                    None => return Ok(victim),
                }
            };

            if let Some(page_id) = old_page_id {
                if is_dirty {
                    log::debug!("evicting dirty {}", page_id);
                    self.write_back(page_id, &data)?;
                }
                self.inner.page_table.remove(&page_id);
            }

            let mut frames = self.inner.frames.write();
            if let Some(frame) = frames.get_mut(&victim) {
                frame.reset();
            }
            return Ok(victim);
        }
    }
}

pub struct PageReadGuard {
    inner: Arc<BufferPoolInner>,
    frame_id: FrameId,
    latch: ArcRwLockReadGuard<RawRwLock, Box<[u8]>>,
}

impl Deref for PageReadGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.latch
    }
}

impl Drop for PageReadGuard {
    fn drop(&mut self) {
        unpin(&self.inner, self.frame_id);
    }
}

pub struct PageWriteGuard {
    inner: Arc<BufferPoolInner>,
    frame_id: FrameId,
    latch: ArcRwLockWriteGuard<RawRwLock, Box<[u8]>>,
}

impl Deref for PageWriteGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.latch
    }
}

impl DerefMut for PageWriteGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.latch
    }
}

impl Drop for PageWriteGuard {
    fn drop(&mut self) {
        unpin(&self.inner, self.frame_id);
    }
}

fn unpin(inner: &Arc<BufferPoolInner>, frame_id: FrameId) {
    let became_free = {
        let frames = inner.frames.read();
        match frames.get(&frame_id) {
            Some(frame) => frame.pin_count.fetch_sub(1, Ordering::SeqCst) == 1,
            None => false,
        }
    };
    if became_free {
        inner.replacer.lock().unpin(frame_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page::{HeapPage, PageKind};
    use crate::storage::wal::WalConfig;
    use tempfile::tempdir;

    const PAGE_SIZE: usize = 512;

    fn test_pool(dir: &tempfile::TempDir, max_frames: usize) -> BufferPoolManager {
        let store = PageStore::create(&dir.path().join("data.pdb"), PAGE_SIZE).unwrap();
        let wal = Arc::new(
            WalManager::open(WalConfig {
                dir: dir.path().join("wal"),
                sync_on_commit: false,
                ..Default::default()
            })
            .unwrap(),
        );
        let replacer = Box::new(lru::LruReplacer::new(max_frames));
        BufferPoolManager::new(store, wal, replacer, max_frames)
    }

    #[test]
    fn test_new_page_then_fetch() -> DbResult<()> {
        let dir = tempdir().unwrap();
        let pool = test_pool(&dir, 4);

        let (page_id, mut guard) = pool.new_page()?;
        page::init_page(&mut guard, page_id, PageKind::Heap);
        guard[100] = 42;
        drop(guard);

        let guard = pool.fetch_page(page_id)?;
        assert_eq!(guard[100], 42);
        Ok(())
    }

    #[test]
    fn test_eviction_persists_dirty_pages() -> DbResult<()> {
        let dir = tempdir().unwrap();
        let pool = test_pool(&dir, 2);

        let mut ids = Vec::new();
        for i in 0..3u8 {
            let (page_id, mut guard) = pool.new_page()?;
            page::init_page(&mut guard, page_id, PageKind::Heap);
            guard[64] = i;
            ids.push(page_id);
        }

        // First page was evicted to make room; refetch hits disk.
        let guard = pool.fetch_page(ids[0])?;
        assert_eq!(guard[64], 0);
        Ok(())
    }

    #[test]
    fn test_pinned_pages_survive_pressure() -> DbResult<()> {
        let dir = tempdir().unwrap();
        let pool = test_pool(&dir, 2);

        let (id1, mut g1) = pool.new_page()?;
        page::init_page(&mut g1, id1, PageKind::Heap);
        g1[10] = 1;
        // Keep g1 pinned while cycling other pages through the pool.
        let (id2, mut g2) = pool.new_page()?;
        page::init_page(&mut g2, id2, PageKind::Heap);
        drop(g2);
        let (id3, mut g3) = pool.new_page()?;
        page::init_page(&mut g3, id3, PageKind::Heap);
        drop(g3);

        assert_eq!(g1[10], 1);
        drop(g1);
        Ok(())
    }

    #[test]
    fn test_all_pinned_is_capacity_error() -> DbResult<()> {
        let dir = tempdir().unwrap();
        let pool = test_pool(&dir, 2);

        let (id1, mut g1) = pool.new_page()?;
        page::init_page(&mut g1, id1, PageKind::Heap);
        let (id2, mut g2) = pool.new_page()?;
        page::init_page(&mut g2, id2, PageKind::Heap);

        let result = pool.new_page();
        assert!(matches!(result, Err(DbError::Capacity(_))));
        drop(g1);
        drop(g2);
        Ok(())
    }

    #[test]
    fn test_free_page_returns_to_store() -> DbResult<()> {
        let dir = tempdir().unwrap();
        let pool = test_pool(&dir, 4);

        let (id, mut guard) = pool.new_page()?;
        page::init_page(&mut guard, id, PageKind::Heap);
        drop(guard);
        pool.free_page(id)?;

        // The freed page comes back on the next allocation.
        let (id2, mut guard) = pool.new_page()?;
        page::init_page(&mut guard, id2, PageKind::Heap);
        assert_eq!(id2, id);
        Ok(())
    }

    #[test]
    fn test_concurrent_readers_share_a_page() -> DbResult<()> {
        let dir = tempdir().unwrap();
        let pool = test_pool(&dir, 4);
        let (page_id, mut guard) = pool.new_page()?;
        page::init_page(&mut guard, page_id, PageKind::Heap);
        guard[30] = 9;
        drop(guard);

        let g1 = pool.fetch_page(page_id)?;
        let g2 = pool.fetch_page(page_id)?;
        assert_eq!(g1[30], 9);
        assert_eq!(g2[30], 9);
        Ok(())
    }

    #[test]
    fn test_heap_page_through_pool() -> DbResult<()> {
        let dir = tempdir().unwrap();
        let pool = test_pool(&dir, 4);

        let (page_id, mut guard) = pool.new_page()?;
        let mut heap = HeapPage::init(&mut guard, page_id);
        let slot = heap.insert_tuple(b"buffered tuple")?;
        drop(guard);
        pool.flush_all()?;

        let mut guard = pool.fetch_page_write(page_id)?;
        let heap = HeapPage::from_data(&mut guard);
        assert_eq!(heap.get_tuple(slot)?, Some(&b"buffered tuple"[..]));
        Ok(())
    }
}
