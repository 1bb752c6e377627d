//! Integration tests for the extendible hash table

use silt::common::{FrameId, PageId};
use silt::container::ExtendibleHashTable;

#[test]
fn test_hash_table_basic_roundtrip() {
    let table = ExtendibleHashTable::new(4);

    for i in 0..50 {
        table.insert(PageId::new(i), FrameId::new(i as u32 % 8));
    }
    for i in 0..50 {
        assert_eq!(
            table.find(&PageId::new(i)),
            Some(FrameId::new(i as u32 % 8))
        );
    }
    assert_eq!(table.find(&PageId::new(1000)), None);
}

#[test]
fn test_hash_table_insert_updates_existing() {
    let table = ExtendibleHashTable::new(2);

    table.insert(PageId::new(1), FrameId::new(0));
    table.insert(PageId::new(1), FrameId::new(5));

    assert_eq!(table.find(&PageId::new(1)), Some(FrameId::new(5)));
    assert_eq!(table.num_buckets(), 1);
}

#[test]
fn test_hash_table_remove() {
    let table = ExtendibleHashTable::new(4);

    for i in 0..20 {
        table.insert(i, i * 2);
    }
    for i in 0..20 {
        assert!(table.remove(&i));
        assert_eq!(table.find(&i), None);
    }
    assert!(!table.remove(&0));

    // Removed keys can be reinserted
    table.insert(3, 33);
    assert_eq!(table.find(&3), Some(33));
}

#[test]
fn test_hash_table_directory_doubling() {
    let table = ExtendibleHashTable::new(1);

    for i in 0..32 {
        table.insert(i, i);
    }

    assert!(table.global_depth() >= 5);
    assert_eq!(table.dir_size(), 1 << table.global_depth());
    for i in 0..32 {
        assert_eq!(table.find(&i), Some(i));
    }
}

#[test]
fn test_hash_table_slot_sharing_invariant() {
    let table = ExtendibleHashTable::new(2);

    for i in 0..200 {
        table.insert(i, i);
    }

    // Every distinct bucket with local depth ld is shared by exactly
    // 2^(gd - ld) slots, so summing 2^ld over all slots must come out to
    // num_buckets * 2^gd.
    let gd = table.global_depth();
    let sum: usize = (0..table.dir_size())
        .map(|slot| 1usize << table.local_depth(slot))
        .sum();
    assert_eq!(sum, table.num_buckets() << gd);

    for slot in 0..table.dir_size() {
        assert!(table.local_depth(slot) <= gd);
    }
}

#[test]
fn test_hash_table_concurrent_inserts() {
    use std::sync::Arc;
    use std::thread;

    let table = Arc::new(ExtendibleHashTable::new(4));

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let table = Arc::clone(&table);
            thread::spawn(move || {
                for i in 0..100 {
                    let key = t * 100 + i;
                    table.insert(key, key * 7);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for key in 0..400 {
        assert_eq!(table.find(&key), Some(key * 7), "lost key {}", key);
    }
}
