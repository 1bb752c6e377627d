use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::buffer::{BufferPoolManager, ReadPageGuard, WritePageGuard};
use crate::common::{
    IndexKey, PageId, RecordId, Result, SiltError, HEADER_PAGE_ID, INVALID_PAGE_ID,
};
use crate::storage::page::{
    BTreePageMut, BTreePageRef, HeaderPage, HeaderPageRef, InternalPage, InternalPageRef, LeafPage,
    LeafPageRef,
};

use super::iterator::TreeIterator;
use super::key_comparator::KeyComparator;

/// Per-call descent state: the write-latched ancestors still retained, plus
/// the root-latch marker. Dropping the context releases everything it still
/// holds, which makes it the single release point for every exit path.
struct WriteContext<'a> {
    root: Option<MutexGuard<'a, PageId>>,
    ancestors: Vec<WritePageGuard>,
}

impl WriteContext<'_> {
    /// Called on reaching a safe node: the retained ancestors cannot be
    /// affected by the operation anymore.
    fn release_all(&mut self) {
        self.ancestors.clear();
        self.root = None;
    }
}

/// Concurrent B+ tree index over the buffer pool, parameterized by its key
/// comparator. Keys map to record ids; duplicates are rejected.
///
/// Latching follows the standard crabbing discipline. Readers couple read
/// latches down the tree, releasing each parent once the child is latched.
/// Writers descend under write latches and keep every ancestor from the
/// last unsafe node downward; a node is safe when it cannot split (insert)
/// or underflow (delete) from one more modification. The root latch is a
/// short-lived mutex that also guards `root_page_id`, and `parent_page_id`
/// hints in page headers are never trusted for navigation.
pub struct BPlusTree<C: KeyComparator> {
    index_name: String,
    root_page_id: Mutex<PageId>,
    bpm: Arc<BufferPoolManager>,
    comparator: C,
    leaf_max_size: usize,
    internal_max_size: usize,
}

impl<C: KeyComparator> BPlusTree<C> {
    /// Opens the named index, adopting its persisted root from the header
    /// page, or registers it there when seen for the first time.
    pub fn new(
        index_name: impl Into<String>,
        bpm: Arc<BufferPoolManager>,
        comparator: C,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self> {
        let index_name = index_name.into();

        let existing = {
            let guard = bpm.fetch_page_read(HEADER_PAGE_ID)?;
            HeaderPageRef::new(guard.data()).find_record(&index_name)
        };
        let root = match existing {
            Some(root_id) => root_id,
            None => {
                let mut guard = bpm.fetch_page_write(HEADER_PAGE_ID)?;
                let mut header = HeaderPage::new(guard.data_mut());
                if !header.insert_record(&index_name, INVALID_PAGE_ID) {
                    return Err(SiltError::HeaderFull);
                }
                INVALID_PAGE_ID
            }
        };

        Ok(Self {
            index_name,
            root_page_id: Mutex::new(root),
            bpm,
            comparator,
            leaf_max_size,
            internal_max_size,
        })
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    pub fn root_page_id(&self) -> PageId {
        *self.root_page_id.lock()
    }

    pub fn is_empty(&self) -> bool {
        !self.root_page_id().is_valid()
    }

    //===--------------------------------------------------------------===//
    // Search
    //===--------------------------------------------------------------===//

    /// Point lookup. Returns the value bound to `key`, if present.
    pub fn get_value(&self, key: &IndexKey) -> Result<Option<RecordId>> {
        let guard = match self.find_leaf_read(key)? {
            Some(guard) => guard,
            None => return Ok(None),
        };
        let leaf = LeafPageRef::new(guard.data());
        Ok(leaf.lookup(key, &self.comparator))
    }

    /// Read-crabbing descent to the leaf that may contain `key`. Returns
    /// None for an empty tree.
    fn find_leaf_read(&self, key: &IndexKey) -> Result<Option<ReadPageGuard>> {
        let root = self.root_page_id.lock();
        if !root.is_valid() {
            return Ok(None);
        }
        let mut guard = self.bpm.fetch_page_read(*root)?;
        drop(root);

        loop {
            let child = {
                let page = BTreePageRef::new(guard.data());
                if page.is_leaf() {
                    return Ok(Some(guard));
                }
                InternalPageRef::new(guard.data()).lookup(key, &self.comparator)
            };
            // Latch the child before the parent guard is replaced (dropped)
            let child_guard = self.bpm.fetch_page_read(child)?;
            guard = child_guard;
        }
    }

    fn find_leftmost_leaf(&self) -> Result<Option<ReadPageGuard>> {
        let root = self.root_page_id.lock();
        if !root.is_valid() {
            return Ok(None);
        }
        let mut guard = self.bpm.fetch_page_read(*root)?;
        drop(root);

        loop {
            let child = {
                let page = BTreePageRef::new(guard.data());
                if page.is_leaf() {
                    return Ok(Some(guard));
                }
                InternalPageRef::new(guard.data()).child_at(0)
            };
            let child_guard = self.bpm.fetch_page_read(child)?;
            guard = child_guard;
        }
    }

    //===--------------------------------------------------------------===//
    // Insert
    //===--------------------------------------------------------------===//

    /// Inserts `key -> value`. Returns false without mutating anything when
    /// the key already exists.
    pub fn insert(&self, key: &IndexKey, value: &RecordId) -> Result<bool> {
        let root = self.root_page_id.lock();

        if !root.is_valid() {
            let mut root = root;
            let (page_id, mut guard) = self.bpm.new_page()?;
            let mut leaf = LeafPage::new(guard.data_mut());
            leaf.init(page_id, INVALID_PAGE_ID, self.leaf_max_size);
            leaf.insert(key, value, &self.comparator);
            drop(guard);
            *root = page_id;
            self.persist_root(page_id)?;
            return Ok(true);
        }

        let root_id = *root;
        let mut ctx = WriteContext {
            root: Some(root),
            ancestors: Vec::new(),
        };
        let mut guard = self.bpm.fetch_page_write(root_id)?;

        loop {
            if BTreePageRef::new(guard.data()).is_leaf() {
                break;
            }
            let (safe, child) = {
                let node = InternalPageRef::new(guard.data());
                (!node.is_full(), node.lookup(key, &self.comparator))
            };
            if safe {
                ctx.release_all();
            }
            let child_guard = self.bpm.fetch_page_write(child)?;
            ctx.ancestors.push(std::mem::replace(&mut guard, child_guard));
        }

        let (exists, has_room) = {
            let leaf = LeafPageRef::new(guard.data());
            (
                leaf.lookup(key, &self.comparator).is_some(),
                !leaf.is_full(),
            )
        };
        if exists {
            return Ok(false);
        }
        if has_room {
            ctx.release_all();
            let mut leaf = LeafPage::new(guard.data_mut());
            leaf.insert(key, value, &self.comparator);
            return Ok(true);
        }

        self.insert_and_split(key, value, guard, &mut ctx)
    }

    /// Splits the full target leaf after taking the new entry, then carries
    /// the promoted key up through the retained ancestors.
    fn insert_and_split(
        &self,
        key: &IndexKey,
        value: &RecordId,
        mut leaf_guard: WritePageGuard,
        ctx: &mut WriteContext<'_>,
    ) -> Result<bool> {
        let (sibling_id, mut sibling_guard) = self.bpm.new_page()?;
        let promoted = {
            let mut leaf = LeafPage::new(leaf_guard.data_mut());
            let mut sibling = LeafPage::new(sibling_guard.data_mut());
            sibling.init(sibling_id, leaf.parent_page_id(), self.leaf_max_size);
            leaf.insert(key, value, &self.comparator);
            leaf.split_to(&mut sibling)
        };
        drop(sibling_guard);
        drop(leaf_guard);

        self.propagate_split(promoted, sibling_id, ctx)
    }

    /// Walks the retained ancestor stack bottom-up, inserting the promoted
    /// separator. An ancestor with room absorbs it; a full one splits and
    /// promotes again. Exhausting the stack means the old root split.
    fn propagate_split(
        &self,
        mut key: IndexKey,
        mut new_child: PageId,
        ctx: &mut WriteContext<'_>,
    ) -> Result<bool> {
        while let Some(mut parent_guard) = ctx.ancestors.pop() {
            let (parent_id, parent_full) = {
                let node = InternalPageRef::new(parent_guard.data());
                (node.page_id(), node.is_full())
            };

            if !parent_full {
                {
                    let mut node = InternalPage::new(parent_guard.data_mut());
                    node.insert(&key, new_child, &self.comparator);
                }
                self.set_parent(new_child, parent_id)?;
                return Ok(true);
            }

            let (sibling_id, mut sibling_guard) = self.bpm.new_page()?;
            let (promoted, moved_children) = {
                let mut node = InternalPage::new(parent_guard.data_mut());
                let mut sibling = InternalPage::new(sibling_guard.data_mut());
                sibling.init(sibling_id, node.parent_page_id(), self.internal_max_size);
                node.insert(&key, new_child, &self.comparator);
                let promoted = node.split_to(&mut sibling);
                let moved: Vec<PageId> =
                    (0..sibling.size()).map(|i| sibling.child_at(i)).collect();
                (promoted, moved)
            };
            drop(sibling_guard);
            drop(parent_guard);

            for child in moved_children {
                self.set_parent(child, sibling_id)?;
            }
            key = promoted;
            new_child = sibling_id;
        }

        // The old root split: install a new root over it and its sibling.
        // The root latch is still held here, because a safe ancestor would
        // have absorbed the promotion above.
        let mut root = ctx.root.take().ok_or_else(|| {
            SiltError::IndexCorrupted("root latch lost during split propagation".into())
        })?;
        let old_root = *root;

        let (new_root_id, mut root_guard) = self.bpm.new_page()?;
        {
            let mut node = InternalPage::new(root_guard.data_mut());
            node.init(new_root_id, INVALID_PAGE_ID, self.internal_max_size);
            node.populate_root(old_root, &key, new_child);
        }
        drop(root_guard);
        self.set_parent(old_root, new_root_id)?;
        self.set_parent(new_child, new_root_id)?;

        *root = new_root_id;
        self.persist_root(new_root_id)?;
        Ok(true)
    }

    //===--------------------------------------------------------------===//
    // Delete
    //===--------------------------------------------------------------===//

    /// Removes `key` from the tree. A missing key is a no-op.
    pub fn remove(&self, key: &IndexKey) -> Result<()> {
        let root = self.root_page_id.lock();
        if !root.is_valid() {
            return Ok(());
        }

        let root_id = *root;
        let mut ctx = WriteContext {
            root: Some(root),
            ancestors: Vec::new(),
        };
        let mut guard = self.bpm.fetch_page_write(root_id)?;

        loop {
            if BTreePageRef::new(guard.data()).is_leaf() {
                break;
            }
            let (safe, child) = {
                let node = InternalPageRef::new(guard.data());
                (
                    node.size() > node.min_size(),
                    node.lookup(key, &self.comparator),
                )
            };
            if safe {
                ctx.release_all();
            }
            let child_guard = self.bpm.fetch_page_write(child)?;
            ctx.ancestors.push(std::mem::replace(&mut guard, child_guard));
        }

        let present = LeafPageRef::new(guard.data())
            .lookup(key, &self.comparator)
            .is_some();
        if !present {
            return Ok(());
        }

        {
            let mut leaf = LeafPage::new(guard.data_mut());
            leaf.remove(key, &self.comparator);
        }
        let (leaf_id, size, min_size) = {
            let leaf = LeafPageRef::new(guard.data());
            (leaf.page_id(), leaf.size(), leaf.min_size())
        };

        // An empty ancestor stack means the leaf is the root: the descent
        // loop never ran, so nothing was released either.
        if ctx.ancestors.is_empty() {
            if size == 0 {
                drop(guard);
                let mut root = ctx.root.take().ok_or_else(|| {
                    SiltError::IndexCorrupted("root latch lost during delete".into())
                })?;
                *root = INVALID_PAGE_ID;
                self.persist_root(INVALID_PAGE_ID)?;
                drop(root);
                self.bpm.delete_page(leaf_id)?;
            }
            return Ok(());
        }

        if size >= min_size {
            return Ok(());
        }
        self.rebalance_leaf(guard, &mut ctx)
    }

    /// Restores the minimum-size invariant of an underfull leaf: borrow
    /// from the left sibling, then the right; merge when neither can lend.
    fn rebalance_leaf(
        &self,
        mut guard: WritePageGuard,
        ctx: &mut WriteContext<'_>,
    ) -> Result<()> {
        let mut parent_guard = ctx.ancestors.pop().ok_or_else(|| {
            SiltError::IndexCorrupted("leaf underflow with no retained parent".into())
        })?;

        let leaf_id = LeafPageRef::new(guard.data()).page_id();
        let (node_idx, parent_size) = {
            let parent = InternalPageRef::new(parent_guard.data());
            let idx = parent
                .child_index_of(leaf_id)
                .ok_or_else(|| SiltError::IndexCorrupted("child missing from parent".into()))?;
            (idx, parent.size())
        };

        let mut left_guard: Option<WritePageGuard> = None;
        if node_idx > 0 {
            let left_id = InternalPageRef::new(parent_guard.data()).child_at(node_idx - 1);
            let mut lg = self.bpm.fetch_page_write(left_id)?;
            let can_lend = {
                let left = LeafPageRef::new(lg.data());
                left.size() > left.min_size()
            };
            if can_lend {
                let (moved_key, moved_value) = LeafPage::new(lg.data_mut()).pop_back();
                LeafPage::new(guard.data_mut()).push_front(&moved_key, &moved_value);
                // The separator left of this leaf now names its new first key
                InternalPage::new(parent_guard.data_mut()).set_key_at(node_idx, &moved_key);
                return Ok(());
            }
            left_guard = Some(lg);
        }

        if node_idx + 1 < parent_size {
            let right_id = InternalPageRef::new(parent_guard.data()).child_at(node_idx + 1);
            let mut rg = self.bpm.fetch_page_write(right_id)?;
            let can_lend = {
                let right = LeafPageRef::new(rg.data());
                right.size() > right.min_size()
            };
            if can_lend {
                let (moved_key, moved_value) = LeafPage::new(rg.data_mut()).pop_front();
                LeafPage::new(guard.data_mut()).push_back(&moved_key, &moved_value);
                let new_first = LeafPageRef::new(rg.data()).key_at(0);
                InternalPage::new(parent_guard.data_mut()).set_key_at(node_idx + 1, &new_first);
                return Ok(());
            }
            if left_guard.is_none() {
                // No left sibling: fold the right sibling into this leaf
                {
                    let mut leaf = LeafPage::new(guard.data_mut());
                    let mut right = LeafPage::new(rg.data_mut());
                    leaf.merge_from(&mut right);
                }
                InternalPage::new(parent_guard.data_mut()).remove_at(node_idx + 1);
                drop(rg);
                drop(guard);
                self.bpm.delete_page(right_id)?;
                return self.finish_parent(parent_guard, ctx);
            }
            drop(rg);
        }

        // Fold this leaf into its left sibling
        let mut lg = left_guard.ok_or_else(|| {
            SiltError::IndexCorrupted("underfull leaf has no siblings".into())
        })?;
        {
            let mut left = LeafPage::new(lg.data_mut());
            let mut leaf = LeafPage::new(guard.data_mut());
            left.merge_from(&mut leaf);
        }
        InternalPage::new(parent_guard.data_mut()).remove_at(node_idx);
        drop(lg);
        drop(guard);
        self.bpm.delete_page(leaf_id)?;
        self.finish_parent(parent_guard, ctx)
    }

    /// After a child merge removed a slot from `parent_guard`'s node:
    /// collapse the root when it is down to one child, or rebalance the
    /// node if it underflowed.
    fn finish_parent(
        &self,
        parent_guard: WritePageGuard,
        ctx: &mut WriteContext<'_>,
    ) -> Result<()> {
        let (node_id, size, min_size) = {
            let node = InternalPageRef::new(parent_guard.data());
            (node.page_id(), node.size(), node.min_size())
        };

        if ctx.ancestors.is_empty() {
            // The node is the root; the root latch is still held because an
            // underflow this high means no safe node was seen on descent.
            if size == 1 {
                let child_id = InternalPageRef::new(parent_guard.data()).child_at(0);
                drop(parent_guard);
                self.set_parent(child_id, INVALID_PAGE_ID)?;
                let mut root = ctx.root.take().ok_or_else(|| {
                    SiltError::IndexCorrupted("root latch lost during root collapse".into())
                })?;
                *root = child_id;
                self.persist_root(child_id)?;
                drop(root);
                self.bpm.delete_page(node_id)?;
            }
            return Ok(());
        }

        if size >= min_size {
            return Ok(());
        }
        self.rebalance_internal(parent_guard, ctx)
    }

    /// Restores the minimum-size invariant of an underfull internal node.
    /// Borrowed entries rotate through the parent separator; merges fold
    /// the sentinel child under the separator key.
    fn rebalance_internal(
        &self,
        mut guard: WritePageGuard,
        ctx: &mut WriteContext<'_>,
    ) -> Result<()> {
        let mut parent_guard = ctx.ancestors.pop().ok_or_else(|| {
            SiltError::IndexCorrupted("internal underflow with no retained parent".into())
        })?;

        let node_id = InternalPageRef::new(guard.data()).page_id();
        let (node_idx, parent_size) = {
            let parent = InternalPageRef::new(parent_guard.data());
            let idx = parent
                .child_index_of(node_id)
                .ok_or_else(|| SiltError::IndexCorrupted("child missing from parent".into()))?;
            (idx, parent.size())
        };

        let mut left_guard: Option<WritePageGuard> = None;
        if node_idx > 0 {
            let left_id = InternalPageRef::new(parent_guard.data()).child_at(node_idx - 1);
            let mut lg = self.bpm.fetch_page_write(left_id)?;
            let can_lend = {
                let left = InternalPageRef::new(lg.data());
                left.size() > left.min_size()
            };
            if can_lend {
                let (moved_key, moved_child) = InternalPage::new(lg.data_mut()).pop_back();
                let separator = InternalPageRef::new(parent_guard.data()).key_at(node_idx);
                InternalPage::new(guard.data_mut()).push_front(moved_child, &separator);
                InternalPage::new(parent_guard.data_mut()).set_key_at(node_idx, &moved_key);
                self.set_parent(moved_child, node_id)?;
                return Ok(());
            }
            left_guard = Some(lg);
        }

        if node_idx + 1 < parent_size {
            let right_id = InternalPageRef::new(parent_guard.data()).child_at(node_idx + 1);
            let mut rg = self.bpm.fetch_page_write(right_id)?;
            let can_lend = {
                let right = InternalPageRef::new(rg.data());
                right.size() > right.min_size()
            };
            if can_lend {
                let separator = InternalPageRef::new(parent_guard.data()).key_at(node_idx + 1);
                let (next_separator, moved_child) = InternalPage::new(rg.data_mut()).pop_front();
                InternalPage::new(guard.data_mut()).push_back(&separator, moved_child);
                InternalPage::new(parent_guard.data_mut()).set_key_at(node_idx + 1, &next_separator);
                self.set_parent(moved_child, node_id)?;
                return Ok(());
            }
            if left_guard.is_none() {
                let separator = InternalPageRef::new(parent_guard.data()).key_at(node_idx + 1);
                let moved_children = {
                    let mut node = InternalPage::new(guard.data_mut());
                    let mut right = InternalPage::new(rg.data_mut());
                    node.merge_from(&separator, &mut right)
                };
                InternalPage::new(parent_guard.data_mut()).remove_at(node_idx + 1);
                drop(rg);
                for child in moved_children {
                    self.set_parent(child, node_id)?;
                }
                drop(guard);
                self.bpm.delete_page(right_id)?;
                return self.finish_parent(parent_guard, ctx);
            }
            drop(rg);
        }

        let mut lg = left_guard.ok_or_else(|| {
            SiltError::IndexCorrupted("underfull internal node has no siblings".into())
        })?;
        let left_id = InternalPageRef::new(lg.data()).page_id();
        let separator = InternalPageRef::new(parent_guard.data()).key_at(node_idx);
        let moved_children = {
            let mut left = InternalPage::new(lg.data_mut());
            let mut node = InternalPage::new(guard.data_mut());
            left.merge_from(&separator, &mut node)
        };
        InternalPage::new(parent_guard.data_mut()).remove_at(node_idx);
        drop(guard);
        for child in moved_children {
            self.set_parent(child, left_id)?;
        }
        drop(lg);
        self.bpm.delete_page(node_id)?;
        self.finish_parent(parent_guard, ctx)
    }

    //===--------------------------------------------------------------===//
    // Iteration
    //===--------------------------------------------------------------===//

    /// Forward iterator positioned at the smallest key.
    pub fn begin(&self) -> Result<TreeIterator> {
        let leaf = self.find_leftmost_leaf()?;
        Ok(TreeIterator::new(Arc::clone(&self.bpm), leaf, 0))
    }

    /// Forward iterator positioned at the first entry >= `key`.
    pub fn begin_from(&self, key: &IndexKey) -> Result<TreeIterator> {
        let guard = match self.find_leaf_read(key)? {
            Some(guard) => guard,
            None => return Ok(self.end()),
        };
        let index = LeafPageRef::new(guard.data()).key_index(key, &self.comparator);
        // index may equal the leaf size here; the iterator steps into the
        // next leaf on its own
        Ok(TreeIterator::new(Arc::clone(&self.bpm), Some(guard), index))
    }

    /// The exhausted-iterator sentinel.
    pub fn end(&self) -> TreeIterator {
        TreeIterator::new(Arc::clone(&self.bpm), None, 0)
    }

    //===--------------------------------------------------------------===//
    // Helpers
    //===--------------------------------------------------------------===//

    /// Rewrites a page's parent hint.
    fn set_parent(&self, page_id: PageId, parent_id: PageId) -> Result<()> {
        let mut guard = self.bpm.fetch_page_write(page_id)?;
        BTreePageMut::new(guard.data_mut()).set_parent_page_id(parent_id);
        Ok(())
    }

    /// Publishes the root page id to the header catalog. The caller holds
    /// the root latch.
    fn persist_root(&self, root_id: PageId) -> Result<()> {
        let mut guard = self.bpm.fetch_page_write(HEADER_PAGE_ID)?;
        let mut header = HeaderPage::new(guard.data_mut());
        if header.update_record(&self.index_name, root_id) {
            Ok(())
        } else {
            Err(SiltError::IndexCorrupted(format!(
                "index {} missing from header catalog",
                self.index_name
            )))
        }
    }
}
