use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::common::{PageId, PAGE_SIZE};

use super::Frame;

/// Callback invoked when a guard is dropped: `(page_id, became_dirty)`.
/// The buffer pool installs its unpin path here, so every guard release is
/// exactly one unpin.
pub(crate) type ReleaseCallback = Box<dyn FnOnce(PageId, bool) + Send + Sync>;

struct GuardState {
    page_id: PageId,
    /// Keeps the frame alive for the lifetime of the transmuted lock guard
    _frame: Arc<Frame>,
    release: Option<ReleaseCallback>,
    dirtied: bool,
}

impl GuardState {
    fn release(&mut self) {
        if let Some(callback) = self.release.take() {
            callback(self.page_id, self.dirtied);
        }
    }
}

/// RAII guard holding one pin and the page's read latch. Dropping it
/// releases the latch and unpins the page.
pub struct ReadPageGuard {
    state: GuardState,
    _data_guard: RwLockReadGuard<'static, Box<[u8; PAGE_SIZE]>>,
}

impl ReadPageGuard {
    /// # Safety
    /// The lock guard is transmuted to `'static`; the `Arc<Frame>` stored
    /// alongside keeps the lock alive, and the field order drops the guard
    /// before the frame.
    pub(crate) unsafe fn new(page_id: PageId, frame: Arc<Frame>, release: ReleaseCallback) -> Self {
        let data_guard = frame.data.read();
        let data_guard: RwLockReadGuard<'static, Box<[u8; PAGE_SIZE]>> =
            std::mem::transmute(data_guard);

        Self {
            state: GuardState {
                page_id,
                _frame: frame,
                release: Some(release),
                dirtied: false,
            },
            _data_guard: data_guard,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.state.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self._data_guard[..]
    }
}

impl Deref for ReadPageGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

impl Drop for ReadPageGuard {
    fn drop(&mut self) {
        self.state.release();
    }
}

/// RAII guard holding one pin and the page's write latch. Mutable access
/// marks the page dirty; dropping releases the latch, then unpins.
pub struct WritePageGuard {
    state: GuardState,
    data_guard: Option<RwLockWriteGuard<'static, Box<[u8; PAGE_SIZE]>>>,
}

impl WritePageGuard {
    /// # Safety
    /// Same contract as [`ReadPageGuard::new`].
    pub(crate) unsafe fn new(page_id: PageId, frame: Arc<Frame>, release: ReleaseCallback) -> Self {
        let data_guard = frame.data.write();
        let data_guard: RwLockWriteGuard<'static, Box<[u8; PAGE_SIZE]>> =
            std::mem::transmute(data_guard);

        Self {
            state: GuardState {
                page_id,
                _frame: frame,
                release: Some(release),
                dirtied: false,
            },
            data_guard: Some(data_guard),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.state.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.data_guard.as_ref().unwrap()[..]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        self.state.dirtied = true;
        &mut self.data_guard.as_mut().unwrap()[..]
    }
}

impl Deref for WritePageGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

impl DerefMut for WritePageGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.data_mut()
    }
}

impl Drop for WritePageGuard {
    fn drop(&mut self) {
        // Release the write latch before unpinning
        self.data_guard.take();
        self.state.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::FrameId;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_read_guard_releases_on_drop() {
        let frame = Arc::new(Frame::new(FrameId::new(0)));
        frame.set_page_id(PageId::new(1));

        let mut data = [0u8; PAGE_SIZE];
        data[0] = 42;
        frame.fill_from(&data);

        let released = Arc::new(AtomicBool::new(false));
        let released_clone = released.clone();

        let guard = unsafe {
            ReadPageGuard::new(
                PageId::new(1),
                frame.clone(),
                Box::new(move |_, _| {
                    released_clone.store(true, Ordering::SeqCst);
                }),
            )
        };

        assert_eq!(guard.page_id(), PageId::new(1));
        assert_eq!(guard.data()[0], 42);
        assert!(!released.load(Ordering::SeqCst));

        drop(guard);
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_write_guard_reports_dirty() {
        let frame = Arc::new(Frame::new(FrameId::new(0)));
        frame.set_page_id(PageId::new(1));

        let dirty = Arc::new(AtomicBool::new(false));
        let dirty_clone = dirty.clone();

        let mut guard = unsafe {
            WritePageGuard::new(
                PageId::new(1),
                frame.clone(),
                Box::new(move |_, was_dirtied| {
                    dirty_clone.store(was_dirtied, Ordering::SeqCst);
                }),
            )
        };

        guard.data_mut()[0] = 42;
        drop(guard);

        assert!(dirty.load(Ordering::SeqCst));
        let mut data = [0u8; PAGE_SIZE];
        frame.copy_into(&mut data);
        assert_eq!(data[0], 42);
    }

    #[test]
    fn test_write_guard_clean_when_untouched() {
        let frame = Arc::new(Frame::new(FrameId::new(0)));

        let dirty = Arc::new(AtomicBool::new(true));
        let dirty_clone = dirty.clone();

        let guard = unsafe {
            WritePageGuard::new(
                PageId::new(1),
                frame,
                Box::new(move |_, was_dirtied| {
                    dirty_clone.store(was_dirtied, Ordering::SeqCst);
                }),
            )
        };

        drop(guard);
        assert!(!dirty.load(Ordering::SeqCst));
    }
}
