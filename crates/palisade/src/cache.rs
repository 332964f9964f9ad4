//! Bounded decision cache with SIEVE eviction.
//!
//! - On hit: mark the entry visited.
//! - On insert into a full cache: sweep the hand forward, clearing visited
//!   bits, and evict the first unvisited entry.
//!
//! Entries are never invalidated individually. Any policy or role mutation
//! clears the whole cache.

use std::collections::HashMap;
use std::hash::Hash;

#[derive(Debug)]
struct Slot<K, V> {
    key: K,
    value: V,
    visited: bool,
}

#[derive(Debug)]
pub(crate) struct SieveCache<K, V> {
    slots: Vec<Slot<K, V>>,
    index: HashMap<K, usize>,
    hand: usize,
    capacity: usize,
}

impl<K, V> SieveCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Creates a cache holding at most `capacity` entries (at least one).
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Vec::new(),
            index: HashMap::new(),
            hand: 0,
            capacity,
        }
    }

    pub(crate) fn get(&mut self, key: &K) -> Option<V> {
        let &idx = self.index.get(key)?;
        let slot = &mut self.slots[idx];
        slot.visited = true;
        Some(slot.value.clone())
    }

    pub(crate) fn insert(&mut self, key: K, value: V) {
        if let Some(&idx) = self.index.get(&key) {
            let slot = &mut self.slots[idx];
            slot.value = value;
            slot.visited = true;
            return;
        }

        if self.slots.len() < self.capacity {
            self.index.insert(key.clone(), self.slots.len());
            self.slots.push(Slot {
                key,
                value,
                visited: false,
            });
            return;
        }

        let idx = self.evict();
        let old = std::mem::replace(
            &mut self.slots[idx],
            Slot {
                key: key.clone(),
                value,
                visited: false,
            },
        );
        self.index.remove(&old.key);
        self.index.insert(key, idx);
    }

    /// Sweeps from the hand to the first unvisited slot. Terminates within
    /// two passes since the first pass clears every visited bit.
    fn evict(&mut self) -> usize {
        loop {
            let idx = self.hand;
            self.hand = (self.hand + 1) % self.slots.len();
            let slot = &mut self.slots[idx];
            if !slot.visited {
                return idx;
            }
            slot.visited = false;
        }
    }

    pub(crate) fn clear(&mut self) {
        self.slots.clear();
        self.index.clear();
        self.hand = 0;
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    #[cfg(test)]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_get() {
        let mut cache = SieveCache::new(3);
        cache.insert("a", true);
        cache.insert("b", false);

        assert_eq!(cache.get(&"a"), Some(true));
        assert_eq!(cache.get(&"b"), Some(false));
        assert_eq!(cache.get(&"c"), None);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn eviction_prefers_unvisited() {
        let mut cache = SieveCache::new(3);
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.insert("c", 3);

        cache.get(&"a");
        cache.get(&"c");
        cache.insert("d", 4);

        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"c"), Some(3));
        assert_eq!(cache.get(&"d"), Some(4));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn all_visited_still_evicts() {
        let mut cache = SieveCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.get(&"a");
        cache.get(&"b");

        cache.insert("c", 3);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"c"), Some(3));
    }

    #[test]
    fn update_existing_key() {
        let mut cache = SieveCache::new(2);
        cache.insert("a", 1);
        cache.insert("a", 10);
        assert_eq!(cache.get(&"a"), Some(10));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn clear_empties() {
        let mut cache = SieveCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.clear();

        assert_eq!(cache.len(), 0);
        assert_eq!(cache.get(&"a"), None);

        cache.insert("c", 3);
        assert_eq!(cache.get(&"c"), Some(3));
    }

    #[test]
    fn zero_capacity_holds_one() {
        let mut cache = SieveCache::new(0);
        assert_eq!(cache.capacity(), 1);
        cache.insert("a", 1);
        cache.insert("b", 2);
        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.get(&"b"), Some(2));
    }
}
