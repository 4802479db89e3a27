//! A chained hash table with explicit, spec-mandated resize thresholds.
//!
//! `std::collections::HashMap` hides exactly the growth/shrink behavior the
//! engine needs to reason about (copy-on-write safety during a background
//! save forks a child that must not see the parent touch pages it doesn't
//! need to). This table grows to double its capacity when `used == capacity`
//! and can be asked to shrink back to fit when `used * 10 < capacity`, but
//! only when the caller says it's safe to (see `maybe_shrink`).

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash, Hasher};

const INITIAL_CAPACITY: usize = 4;

#[derive(Debug, Clone)]
pub struct Dict<K, V> {
    buckets: Vec<Vec<(K, V)>>,
    used: usize,
    hasher: RandomState,
}

impl<K: Hash + Eq, V> Dict<K, V> {
    pub fn new() -> Self {
        Self {
            buckets: (0..INITIAL_CAPACITY).map(|_| Vec::new()).collect(),
            used: 0,
            hasher: RandomState::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.used
    }

    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    pub fn capacity(&self) -> usize {
        self.buckets.len()
    }

    fn bucket_index<Q: Hash + ?Sized>(&self, key: &Q, capacity: usize) -> usize {
        let mut h = self.hasher.build_hasher();
        key.hash(&mut h);
        (h.finish() as usize) & (capacity - 1)
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let idx = self.bucket_index(key, self.buckets.len());
        self.buckets[idx]
            .iter()
            .find(|(k, _)| k.borrow() == key)
            .map(|(_, v)| v)
    }

    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let idx = self.bucket_index(key, self.buckets.len());
        self.buckets[idx]
            .iter_mut()
            .find(|(k, _)| (*k).borrow() == key)
            .map(|(_, v)| v)
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get(key).is_some()
    }

    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let idx = self.bucket_index(&key, self.buckets.len());
        if let Some(slot) = self.buckets[idx].iter_mut().find(|(k, _)| *k == key) {
            return Some(std::mem::replace(&mut slot.1, value));
        }
        self.buckets[idx].push((key, value));
        self.used += 1;
        if self.used == self.buckets.len() {
            self.grow();
        }
        None
    }

    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let idx = self.bucket_index(key, self.buckets.len());
        let bucket = &mut self.buckets[idx];
        let pos = bucket.iter().position(|(k, _)| k.borrow() == key)?;
        let (_, v) = bucket.swap_remove(pos);
        self.used -= 1;
        Some(v)
    }

    fn grow(&mut self) {
        self.rehash(self.buckets.len() * 2);
    }

    fn rehash(&mut self, new_capacity: usize) {
        let new_capacity = new_capacity.max(INITIAL_CAPACITY);
        let hasher = self.hasher.clone();
        let mut new_buckets: Vec<Vec<(K, V)>> = (0..new_capacity).map(|_| Vec::new()).collect();
        for bucket in self.buckets.drain(..) {
            for (k, v) in bucket {
                let mut h = hasher.build_hasher();
                k.hash(&mut h);
                let idx = (h.finish() as usize) & (new_capacity - 1);
                new_buckets[idx].push((k, v));
            }
        }
        self.buckets = new_buckets;
    }

    /// Halves capacity toward `used` when `used * 10 < capacity` and the
    /// caller (the cron) confirms no background save/rewrite child is
    /// forked right now — shrinking touches every page and would defeat
    /// copy-on-write.
    pub fn maybe_shrink(&mut self, child_running: bool) {
        if child_running || self.buckets.len() <= INITIAL_CAPACITY {
            return;
        }
        if self.used * 10 < self.buckets.len() {
            let mut target = INITIAL_CAPACITY;
            while target < self.used {
                target *= 2;
            }
            self.rehash(target);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.buckets.iter().flat_map(|b| b.iter().map(|(k, v)| (k, v)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&K, &mut V)> {
        self.buckets
            .iter_mut()
            .flat_map(|b| b.iter_mut().map(|(k, v)| (&*k, v)))
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.iter().map(|(_, v)| v)
    }

    pub fn clear(&mut self) {
        self.buckets = (0..INITIAL_CAPACITY).map(|_| Vec::new()).collect();
        self.used = 0;
    }

    /// Samples up to `n` arbitrary (key, value) pairs without building a full
    /// index — used by the expire cron and the swap candidate scan, which
    /// both only need "a few random entries", not a uniform distribution.
    pub fn sample(&self, n: usize) -> Vec<(&K, &V)> {
        let mut out = Vec::with_capacity(n);
        'outer: for bucket in &self.buckets {
            for (k, v) in bucket {
                out.push((k, v));
                if out.len() >= n {
                    break 'outer;
                }
            }
        }
        out
    }
}

impl<K: Hash + Eq, V> Default for Dict<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Hash + Eq, V> FromIterator<(K, V)> for Dict<K, V> {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut d = Dict::new();
        for (k, v) in iter {
            d.insert(k, v);
        }
        d
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_when_full_and_shrinks_when_sparse() {
        let mut d: Dict<i32, i32> = Dict::new();
        assert_eq!(d.capacity(), INITIAL_CAPACITY);
        for i in 0..40 {
            d.insert(i, i * 2);
        }
        assert_eq!(d.len(), 40);
        assert!(d.capacity() >= 40);
        for i in 0..38 {
            d.remove(&i);
        }
        assert_eq!(d.len(), 2);
        d.maybe_shrink(false);
        assert!(d.capacity() < 64);
    }

    #[test]
    fn shrink_suppressed_while_child_running() {
        let mut d: Dict<i32, i32> = Dict::new();
        for i in 0..40 {
            d.insert(i, i);
        }
        for i in 0..38 {
            d.remove(&i);
        }
        let before = d.capacity();
        d.maybe_shrink(true);
        assert_eq!(d.capacity(), before);
    }

    #[test]
    fn lookup_and_overwrite() {
        let mut d: Dict<String, i32> = Dict::new();
        d.insert("a".to_string(), 1);
        d.insert("a".to_string(), 2);
        assert_eq!(d.len(), 1);
        assert_eq!(d.get("a"), Some(&2));
        assert_eq!(d.remove("a"), Some(2));
        assert_eq!(d.get("a"), None);
    }
}
