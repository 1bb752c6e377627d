//! Silt - the storage and indexing core of a disk-oriented relational
//! database kernel.
//!
//! The crate mediates all access between volatile memory and a paged
//! on-disk file, and builds an ordered index on top of that.
//!
//! # Architecture
//!
//! - **Storage Layer** (`storage`): disk I/O and on-page formats
//!   - `DiskManager`: reads and writes fixed-size pages by id
//!   - `DiskScheduler`: background worker serializing page I/O
//!   - `LeafPage`/`InternalPage`: B+ tree node layouts over raw page bytes
//!   - `HeaderPage`: page-0 catalog of index roots
//!
//! - **Buffer Pool** (`buffer`): memory management for database pages
//!   - `BufferPoolManager`: fixed frame array, free list, page table and
//!     eviction; all page access flows through it
//!   - `LruKReplacer`: two-tier LRU-K replacement policy
//!   - `ReadPageGuard`/`WritePageGuard`: RAII guards holding one pin and
//!     the per-page latch
//!
//! - **Containers** (`container`): `ExtendibleHashTable`, the page-id to
//!   frame-id directory used inside the buffer pool
//!
//! - **Index** (`index`): `BPlusTree`, a latch-crabbed B+ tree with point
//!   lookup, ordered insertion and deletion, and a forward range iterator
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use silt::buffer::BufferPoolManager;
//! use silt::common::{IndexKey, PageId, RecordId, SlotId};
//! use silt::index::{BPlusTree, IntegerComparator};
//! use silt::storage::disk::DiskManager;
//!
//! let disk_manager = Arc::new(DiskManager::new("test.db").unwrap());
//! let bpm = Arc::new(BufferPoolManager::new(64, 2, disk_manager));
//!
//! let tree = BPlusTree::new("orders_pk", bpm, IntegerComparator, 32, 32).unwrap();
//! let key = IndexKey::from_i64(42);
//! let rid = RecordId::new(PageId::new(7), SlotId::new(0));
//!
//! tree.insert(&key, &rid).unwrap();
//! assert_eq!(tree.get_value(&key).unwrap(), Some(rid));
//! ```

pub mod buffer;
pub mod common;
pub mod container;
pub mod index;
pub mod storage;

// Re-export commonly used types at the crate root
pub use common::{IndexKey, PageId, RecordId, Result, SiltError, SlotId};
