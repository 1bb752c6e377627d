pub mod btree;
pub mod iterator;
pub mod key_comparator;

pub use btree::BPlusTree;
pub use iterator::TreeIterator;
pub use key_comparator::{BytewiseComparator, IntegerComparator, KeyComparator};
