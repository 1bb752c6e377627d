use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::common::FrameId;

/// State behind the replacer's single lock.
struct ReplacerInner {
    /// Frames with fewer than k recorded accesses, FIFO by access time
    history: VecDeque<FrameId>,
    /// Frames with at least k recorded accesses; the tail entry is rewritten
    /// on every further access, so FIFO order here is LRU on the
    /// k-th-most-recent access time
    cache: VecDeque<FrameId>,
    /// Recorded accesses per frame
    counter: Vec<usize>,
    /// Evictable flag per frame
    evictable: Vec<bool>,
    /// Number of evictable frames
    curr_size: usize,
}

impl ReplacerInner {
    fn purge(queue: &mut VecDeque<FrameId>, frame_id: FrameId) {
        queue.retain(|&f| f != frame_id);
    }
}

/// LRU-K replacement policy with a two-tier queue.
///
/// Frames accessed fewer than `k` times sit in the history queue and are
/// evicted first, in classical LRU order; frames whose access count has
/// reached `k` graduate to the cache queue and are evicted by LRU on their
/// k-th-most-recent access. One-touch pages therefore never displace the
/// hot set.
pub struct LruKReplacer {
    k: usize,
    num_frames: usize,
    inner: Mutex<ReplacerInner>,
}

impl LruKReplacer {
    /// Creates a replacer tracking `num_frames` frames with the given k.
    pub fn new(k: usize, num_frames: usize) -> Self {
        assert!(k > 0, "k must be positive");
        Self {
            k,
            num_frames,
            inner: Mutex::new(ReplacerInner {
                history: VecDeque::new(),
                cache: VecDeque::new(),
                counter: vec![0; num_frames],
                evictable: vec![false; num_frames],
                curr_size: 0,
            }),
        }
    }

    /// Records an access to `frame_id`. At the k-th access the frame's
    /// history entries are dropped and it joins the cache queue; afterwards
    /// each access moves its cache entry back to the tail.
    pub fn record_access(&self, frame_id: FrameId) {
        if frame_id.as_usize() >= self.num_frames {
            return;
        }

        let mut inner = self.inner.lock();
        let idx = frame_id.as_usize();
        inner.counter[idx] += 1;
        let count = inner.counter[idx];

        if count < self.k {
            inner.history.push_back(frame_id);
        } else if count == self.k {
            ReplacerInner::purge(&mut inner.history, frame_id);
            inner.cache.push_back(frame_id);
        } else {
            ReplacerInner::purge(&mut inner.cache, frame_id);
            inner.cache.push_back(frame_id);
        }
    }

    /// Evicts the first evictable frame, scanning the history queue before
    /// the cache queue. Clears the victim's bookkeeping.
    pub fn evict(&self) -> Option<FrameId> {
        let mut inner = self.inner.lock();
        if inner.curr_size == 0 {
            return None;
        }

        let victim = inner
            .history
            .iter()
            .copied()
            .find(|f| inner.evictable[f.as_usize()])
            .or_else(|| {
                inner
                    .cache
                    .iter()
                    .copied()
                    .find(|f| inner.evictable[f.as_usize()])
            })?;

        ReplacerInner::purge(&mut inner.history, victim);
        ReplacerInner::purge(&mut inner.cache, victim);
        let idx = victim.as_usize();
        inner.counter[idx] = 0;
        inner.evictable[idx] = false;
        inner.curr_size -= 1;
        Some(victim)
    }

    /// Toggles whether `frame_id` may be evicted.
    pub fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        if frame_id.as_usize() >= self.num_frames {
            return;
        }

        let mut inner = self.inner.lock();
        let idx = frame_id.as_usize();
        if inner.evictable[idx] != evictable {
            if evictable {
                inner.curr_size += 1;
            } else {
                inner.curr_size -= 1;
            }
            inner.evictable[idx] = evictable;
        }
    }

    /// Forcibly purges a frame's access history, e.g. when its page is
    /// deleted from the pool.
    pub fn remove(&self, frame_id: FrameId) {
        if frame_id.as_usize() >= self.num_frames {
            return;
        }

        let mut inner = self.inner.lock();
        let idx = frame_id.as_usize();
        if inner.counter[idx] >= self.k {
            ReplacerInner::purge(&mut inner.cache, frame_id);
        } else {
            ReplacerInner::purge(&mut inner.history, frame_id);
        }
        inner.counter[idx] = 0;
        if inner.evictable[idx] {
            inner.evictable[idx] = false;
            inner.curr_size -= 1;
        }
    }

    /// Number of evictable frames.
    pub fn size(&self) -> usize {
        self.inner.lock().curr_size
    }

    pub fn k(&self) -> usize {
        self.k
    }
}
