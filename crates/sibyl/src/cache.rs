//! Keyed memoization for the partition-function computation.
//!
//! The log partition function is by far the most expensive quantity in the
//! engine and is queried twice per model per subgraph (once by the
//! likelihood scan, once by the marginal computation). A keyed table makes
//! the reuse independent of call order, and keeps per-subgraph caches sound
//! when subgraphs are evaluated on different threads.

use fnv::FnvHashMap;
use std::hash::Hash;

#[derive(Debug, Clone, Default)]
pub struct MemoCache<K, V> {
    slots: FnvHashMap<K, V>,
}

impl<K: Eq + Hash, V> MemoCache<K, V> {
    pub fn new() -> Self {
        Self {
            slots: FnvHashMap::default(),
        }
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.slots.get(key)
    }

    pub fn insert(&mut self, key: K, value: V) {
        self.slots.insert(key, value);
    }

    pub fn get_or_insert_with<F: FnOnce() -> V>(&mut self, key: K, f: F) -> &V {
        self.slots.entry(key).or_insert_with(f)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
