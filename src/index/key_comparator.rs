use std::cmp::Ordering;

use crate::common::IndexKey;

/// Total order over index keys. The tree and its pages never compare key
/// bytes directly; all ordering flows through the comparator the index was
/// constructed with.
pub trait KeyComparator: Send + Sync {
    fn compare(&self, a: &IndexKey, b: &IndexKey) -> Ordering;
}

/// Orders keys by their little-endian signed 64-bit integer encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntegerComparator;

impl KeyComparator for IntegerComparator {
    fn compare(&self, a: &IndexKey, b: &IndexKey) -> Ordering {
        a.as_i64().cmp(&b.as_i64())
    }
}

/// Orders keys lexicographically by their raw bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytewiseComparator;

impl KeyComparator for BytewiseComparator {
    fn compare(&self, a: &IndexKey, b: &IndexKey) -> Ordering {
        a.as_bytes().cmp(b.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_comparator() {
        let cmp = IntegerComparator;
        assert_eq!(
            cmp.compare(&IndexKey::from_i64(-1), &IndexKey::from_i64(1)),
            Ordering::Less
        );
        assert_eq!(
            cmp.compare(&IndexKey::from_i64(5), &IndexKey::from_i64(5)),
            Ordering::Equal
        );
    }

    #[test]
    fn test_bytewise_comparator() {
        let cmp = BytewiseComparator;
        let a = IndexKey::from_bytes([0, 0, 0, 0, 0, 0, 0, 1]);
        let b = IndexKey::from_bytes([1, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(cmp.compare(&a, &b), Ordering::Less);
    }
}
