use std::sync::Arc;

use crate::buffer::{BufferPoolManager, ReadPageGuard};
use crate::common::{IndexKey, RecordId, Result};
use crate::storage::page::LeafPageRef;

/// Forward iterator over the leaf chain.
///
/// Holds one pinned, read-latched leaf and an index into it. Stepping past
/// the last entry releases the current leaf, then latches its successor, so
/// only the leaf currently pointed at is ever guarded. It is not
/// mutation-safe against concurrent writers to the same leaf.
pub struct TreeIterator {
    bpm: Arc<BufferPoolManager>,
    leaf: Option<ReadPageGuard>,
    index: usize,
}

impl TreeIterator {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, leaf: Option<ReadPageGuard>, index: usize) -> Self {
        Self { bpm, leaf, index }
    }

    /// True once the iterator has run off the end of the leaf chain.
    pub fn is_end(&self) -> bool {
        self.leaf.is_none()
    }

    fn advance(&mut self) -> Result<Option<(IndexKey, RecordId)>> {
        loop {
            let guard = match self.leaf.as_ref() {
                Some(guard) => guard,
                None => return Ok(None),
            };

            let (size, next) = {
                let leaf = LeafPageRef::new(guard.data());
                (leaf.size(), leaf.next_page_id())
            };

            if self.index < size {
                let leaf = LeafPageRef::new(guard.data());
                let entry = (leaf.key_at(self.index), leaf.value_at(self.index));
                self.index += 1;
                return Ok(Some(entry));
            }

            // Exhausted this leaf: release it before latching the successor
            self.leaf = None;
            self.index = 0;
            if !next.is_valid() {
                return Ok(None);
            }
            self.leaf = Some(self.bpm.fetch_page_read(next)?);
        }
    }
}

impl Iterator for TreeIterator {
    type Item = Result<(IndexKey, RecordId)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.advance().transpose()
    }
}
