use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::{FrameId, PageId, Result, SiltError, DEFAULT_BUCKET_SIZE, PAGE_SIZE};
use crate::container::ExtendibleHashTable;
use crate::storage::disk::{DiskManager, DiskScheduler};

use super::{Frame, LruKReplacer, ReadPageGuard, WritePageGuard};

/// State shared with page guard release callbacks.
struct PoolState {
    frames: Vec<Arc<Frame>>,
    /// Page table: resolves page ids to resident frames
    page_table: ExtendibleHashTable<PageId, FrameId>,
    free_list: Mutex<VecDeque<FrameId>>,
    replacer: LruKReplacer,
    /// Pool-wide mutex serializing page-table, free-list, replacer and
    /// pin-count transitions
    latch: Mutex<()>,
}

impl PoolState {
    /// The single unpin point. Decrements the pin count, ORs in the dirty
    /// bit, and hands the frame to the replacer when the count reaches
    /// zero. Returns false for a non-resident page or a pin count that is
    /// already zero.
    fn unpin(&self, page_id: PageId, is_dirty: bool) -> bool {
        let _pool = self.latch.lock();
        let frame_id = match self.page_table.find(&page_id) {
            Some(frame_id) => frame_id,
            None => return false,
        };
        let frame = &self.frames[frame_id.as_usize()];
        if is_dirty {
            frame.mark_dirty();
        }
        match frame.unpin() {
            None => false,
            Some(0) => {
                self.replacer.set_evictable(frame_id, true);
                true
            }
            Some(_) => true,
        }
    }
}

/// BufferPoolManager mediates all access between memory and the paged disk
/// file. It owns a fixed array of frames, a free list, the page table and
/// the LRU-K replacer, and hands out RAII guards that hold one pin and the
/// per-page latch.
///
/// Frames with a nonzero pin count are never evicted; eviction flushes a
/// dirty victim before its frame is reused.
pub struct BufferPoolManager {
    pool_size: usize,
    state: Arc<PoolState>,
    disk_scheduler: DiskScheduler,
}

impl BufferPoolManager {
    /// Creates a pool with `pool_size` frames and LRU-`replacer_k`
    /// replacement on top of the given disk manager.
    pub fn new(pool_size: usize, replacer_k: usize, disk_manager: Arc<DiskManager>) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);
        for i in 0..pool_size {
            let frame_id = FrameId::new(i as u32);
            frames.push(Arc::new(Frame::new(frame_id)));
            free_list.push_back(frame_id);
        }

        let state = Arc::new(PoolState {
            frames,
            page_table: ExtendibleHashTable::new(DEFAULT_BUCKET_SIZE),
            free_list: Mutex::new(free_list),
            replacer: LruKReplacer::new(replacer_k, pool_size),
            latch: Mutex::new(()),
        });

        Self {
            pool_size,
            state,
            disk_scheduler: DiskScheduler::new(disk_manager),
        }
    }

    /// Allocates a fresh on-disk page and returns it pinned behind a write
    /// guard. Fails with `BufferPoolFull` when every frame is pinned.
    pub fn new_page(&self) -> Result<(PageId, WritePageGuard)> {
        let frame = {
            let _pool = self.state.latch.lock();
            let frame_id = self.acquire_frame()?;
            let frame = Arc::clone(&self.state.frames[frame_id.as_usize()]);

            let page_id = match self.disk_scheduler.disk_manager().allocate_page() {
                Ok(page_id) => page_id,
                Err(e) => {
                    self.state.free_list.lock().push_back(frame_id);
                    return Err(e);
                }
            };

            frame.reset();
            frame.set_page_id(page_id);
            frame.pin();
            self.state.page_table.insert(page_id, frame_id);
            self.state.replacer.record_access(frame_id);
            self.state.replacer.set_evictable(frame_id, false);
            frame
        };

        let page_id = frame.page_id();
        let guard = unsafe { WritePageGuard::new(page_id, frame, self.release_callback()) };
        Ok((page_id, guard))
    }

    /// Fetches a page for read access: pins the frame, then takes the page's
    /// read latch.
    pub fn fetch_page_read(&self, page_id: PageId) -> Result<ReadPageGuard> {
        let frame = self.fetch_frame(page_id)?;
        Ok(unsafe { ReadPageGuard::new(page_id, frame, self.release_callback()) })
    }

    /// Fetches a page for write access: pins the frame, then takes the
    /// page's write latch.
    pub fn fetch_page_write(&self, page_id: PageId) -> Result<WritePageGuard> {
        let frame = self.fetch_frame(page_id)?;
        Ok(unsafe { WritePageGuard::new(page_id, frame, self.release_callback()) })
    }

    /// Decrements a page's pin count, ORing `is_dirty` into its dirty bit.
    /// Returns false when the page is not resident or not pinned. The dirty
    /// bit is only ever set here; flushing happens on eviction or through
    /// the flush calls.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        self.state.unpin(page_id, is_dirty)
    }

    /// Writes a resident page to disk and clears its dirty bit, regardless
    /// of pin count. Returns false when the page is not resident.
    ///
    /// Must not be called while holding the page's own write guard.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        if !page_id.is_valid() {
            return Err(SiltError::InvalidPageId(page_id));
        }

        let _pool = self.state.latch.lock();
        let frame_id = match self.state.page_table.find(&page_id) {
            Some(frame_id) => frame_id,
            None => return Ok(false),
        };
        let frame = &self.state.frames[frame_id.as_usize()];

        let mut data = [0u8; PAGE_SIZE];
        frame.copy_into(&mut data);
        self.disk_scheduler.write_page_sync(page_id, &data)?;
        frame.clear_dirty();
        Ok(true)
    }

    /// Writes every resident frame holding a valid page to disk and clears
    /// its dirty bit.
    pub fn flush_all_pages(&self) -> Result<()> {
        let _pool = self.state.latch.lock();
        for frame in &self.state.frames {
            let page_id = frame.page_id();
            if !page_id.is_valid() {
                continue;
            }
            let mut data = [0u8; PAGE_SIZE];
            frame.copy_into(&mut data);
            self.disk_scheduler.write_page_sync(page_id, &data)?;
            frame.clear_dirty();
        }
        Ok(())
    }

    /// Deletes a page: removes it from the pool and returns its on-disk
    /// page id to the disk manager. A pinned page cannot be deleted; a
    /// non-resident page only needs the disk-side deallocation.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let _pool = self.state.latch.lock();
        let frame_id = match self.state.page_table.find(&page_id) {
            Some(frame_id) => frame_id,
            None => {
                self.disk_scheduler.disk_manager().deallocate_page(page_id)?;
                return Ok(true);
            }
        };
        let frame = &self.state.frames[frame_id.as_usize()];
        if frame.pin_count() > 0 {
            return Err(SiltError::PageStillPinned(page_id));
        }

        self.state.page_table.remove(&page_id);
        self.state.replacer.remove(frame_id);
        frame.reset();
        self.state.free_list.lock().push_back(frame_id);
        self.disk_scheduler.disk_manager().deallocate_page(page_id)?;
        Ok(true)
    }

    /// Pin count of a resident page, for leak checks in tests.
    pub fn pin_count_of(&self, page_id: PageId) -> Option<u32> {
        let _pool = self.state.latch.lock();
        self.state
            .page_table
            .find(&page_id)
            .map(|frame_id| self.state.frames[frame_id.as_usize()].pin_count())
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn free_frame_count(&self) -> usize {
        self.state.free_list.lock().len()
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        self.disk_scheduler.disk_manager()
    }

    fn release_callback(&self) -> super::page_guard::ReleaseCallback {
        let state = Arc::clone(&self.state);
        Box::new(move |page_id, is_dirty| {
            state.unpin(page_id, is_dirty);
        })
    }

    /// Resolves `page_id` to a pinned frame, reading it from disk on a miss.
    fn fetch_frame(&self, page_id: PageId) -> Result<Arc<Frame>> {
        if !page_id.is_valid() {
            return Err(SiltError::InvalidPageId(page_id));
        }

        let _pool = self.state.latch.lock();
        if let Some(frame_id) = self.state.page_table.find(&page_id) {
            let frame = Arc::clone(&self.state.frames[frame_id.as_usize()]);
            frame.pin();
            self.state.replacer.record_access(frame_id);
            self.state.replacer.set_evictable(frame_id, false);
            return Ok(frame);
        }

        let frame_id = self.acquire_frame()?;
        let frame = Arc::clone(&self.state.frames[frame_id.as_usize()]);

        let mut data = [0u8; PAGE_SIZE];
        if let Err(e) = self.disk_scheduler.read_page_sync(page_id, &mut data) {
            self.state.free_list.lock().push_back(frame_id);
            return Err(e);
        }
        frame.fill_from(&data);
        frame.set_page_id(page_id);
        frame.clear_dirty();
        frame.pin();

        self.state.page_table.insert(page_id, frame_id);
        self.state.replacer.record_access(frame_id);
        self.state.replacer.set_evictable(frame_id, false);
        Ok(frame)
    }

    /// Obtains a reusable frame from the free list, or by evicting the
    /// replacer's victim (flushing it first if dirty). Caller holds the
    /// pool latch.
    fn acquire_frame(&self) -> Result<FrameId> {
        if let Some(frame_id) = self.state.free_list.lock().pop_front() {
            return Ok(frame_id);
        }

        let frame_id = self
            .state
            .replacer
            .evict()
            .ok_or(SiltError::BufferPoolFull)?;
        let frame = &self.state.frames[frame_id.as_usize()];
        let old_page_id = frame.page_id();

        if frame.is_dirty() {
            let mut data = [0u8; PAGE_SIZE];
            frame.copy_into(&mut data);
            self.disk_scheduler.write_page_sync(old_page_id, &data)?;
        }

        self.state.page_table.remove(&old_page_id);
        frame.reset();
        Ok(frame_id)
    }
}
