// networking/src/known_cache.rs

//! Bounded LRU of item digests, used to suppress re-announcing blocks and
//! transactions a peer has already seen (spec's KnownCache).

use crypto::Hash;
use parking_lot::RwLock;
use std::collections::{HashSet, VecDeque};

struct Inner {
    capacity: usize,
    /// Cold-to-hot order; `push_back` is the hot end, `pop_front` evicts cold.
    order: VecDeque<Hash>,
    set: HashSet<Hash>,
}

impl Inner {
    fn touch(&mut self, h: Hash) {
        if let Some(pos) = self.order.iter().position(|x| *x == h) {
            self.order.remove(pos);
        }
        self.order.push_back(h);
    }

    fn evict_to_capacity(&mut self) {
        while self.order.len() > self.capacity {
            if let Some(cold) = self.order.pop_front() {
                self.set.remove(&cold);
            } else {
                break;
            }
        }
    }
}

/// Thread-safe, fixed-capacity LRU set of hashes. Concurrent readers are
/// allowed; writes take the single lock exclusively.
pub struct KnownCache {
    inner: RwLock<Inner>,
}

impl KnownCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                capacity,
                order: VecDeque::with_capacity(capacity.min(1024)),
                set: HashSet::with_capacity(capacity.min(1024)),
            }),
        }
    }

    /// Inserts `h`, or moves it to the hot end if already present. Evicts
    /// from the cold end when over capacity.
    pub fn add(&self, h: Hash) {
        let mut inner = self.inner.write();
        let is_new = inner.set.insert(h);
        if !is_new {
            inner.touch(h);
            return;
        }
        inner.order.push_back(h);
        inner.evict_to_capacity();
    }

    pub fn contains(&self, h: &Hash) -> bool {
        self.inner.read().set.contains(h)
    }

    pub fn remove(&self, h: &Hash) -> bool {
        let mut inner = self.inner.write();
        if inner.set.remove(h) {
            if let Some(pos) = inner.order.iter().position(|x| x == h) {
                inner.order.remove(pos);
            }
            true
        } else {
            false
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.order.clear();
        inner.set.clear();
    }

    /// Items in hot-to-cold order.
    pub fn items(&self) -> Vec<Hash> {
        let inner = self.inner.read();
        inner.order.iter().rev().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shrinks or grows the capacity; shrinking evicts from the cold end
    /// until `len <= n`. Growing never evicts.
    pub fn resize(&self, n: usize) {
        let mut inner = self.inner.write();
        inner.capacity = n;
        inner.evict_to_capacity();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(n: u8) -> Hash {
        let mut bytes = [0u8; 32];
        bytes[0] = n;
        Hash::new(bytes)
    }

    #[test]
    fn test_eviction_scenario_s5() {
        let cache = KnownCache::new(3);
        cache.add(h(1));
        cache.add(h(2));
        cache.add(h(3));
        cache.add(h(4));

        assert_eq!(cache.len(), 3);
        assert!(!cache.contains(&h(1)));
        assert!(cache.contains(&h(2)));
        assert!(cache.contains(&h(3)));
        assert!(cache.contains(&h(4)));
    }

    #[test]
    fn test_touch_moves_to_hot_end() {
        let cache = KnownCache::new(2);
        cache.add(h(1));
        cache.add(h(2));
        cache.add(h(1)); // re-touch h(1), h(2) becomes cold
        cache.add(h(3)); // evicts h(2), not h(1)

        assert!(cache.contains(&h(1)));
        assert!(!cache.contains(&h(2)));
        assert!(cache.contains(&h(3)));
    }

    #[test]
    fn test_resize_boundaries() {
        let cache = KnownCache::new(5);
        for i in 0..5 {
            cache.add(h(i));
        }
        cache.resize(0);
        assert_eq!(cache.len(), 0);

        for i in 0..3 {
            cache.add(h(i));
        }
        cache.resize(10);
        assert_eq!(cache.len(), 3);
    }
}
