//! Striped Locks
//!
//! A fixed set of locks indexed by key hash. Misses for the same key always
//! meet on the same stripe, so a value factory runs once per key at a time.

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash};

pub struct Striped<L> {
    stripes: Box<[L]>,
    hasher: RandomState,
}

impl<L> Striped<L> {
    /// Creates `count` stripes (at least one) using `make`.
    pub fn new(count: usize, make: impl Fn() -> L) -> Self {
        let stripes = (0..count.max(1)).map(|_| make()).collect::<Vec<_>>();
        Self {
            stripes: stripes.into_boxed_slice(),
            hasher: RandomState::new(),
        }
    }

    pub fn for_key<K: Hash + ?Sized>(&self, key: &K) -> &L {
        let idx = (self.hasher.hash_one(key) as usize) % self.stripes.len();
        &self.stripes[idx]
    }

    pub fn len(&self) -> usize {
        self.stripes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stripes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_key_same_stripe() {
        let striped = Striped::new(8, || parking_lot::Mutex::new(()));
        let a = striped.for_key("alpha") as *const _;
        let b = striped.for_key("alpha") as *const _;
        assert_eq!(a, b);
        assert_eq!(striped.len(), 8);
    }

    #[test]
    fn test_zero_stripes_rounds_up() {
        let striped = Striped::new(0, || ());
        assert_eq!(striped.len(), 1);
    }
}
