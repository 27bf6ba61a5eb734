//! Thread-safe concurrent hash set.
//!
//! A unit-valued [`ConcurrentHashMap`]: duplicate inserts are no-ops and
//! the same segment/cache machinery applies. See the
//! [module docs](crate::concurrent) for the architecture.

use core::hash::{BuildHasher, Hash};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::Serial;
use crate::concurrent::map::ConcurrentHashMap;
use crate::error::Error;
use crate::hasher::DefaultHashBuilder;
use crate::reducer;

/// A segmented, thread-safe hash set with a non-blocking write path.
///
/// # Example
///
/// ```
/// use aggmap::ConcurrentHashSet;
/// use rayon::prelude::*;
///
/// let seen: ConcurrentHashSet<u64> = ConcurrentHashSet::new();
/// (0..10_000u64).into_par_iter().for_each(|i| seen.async_set(i % 256));
/// seen.sync();
/// assert_eq!(seen.n_keys(), 256);
/// ```
pub struct ConcurrentHashSet<K, S = DefaultHashBuilder> {
    map: ConcurrentHashMap<K, (), S>,
}

impl<K> ConcurrentHashSet<K, DefaultHashBuilder> {
    /// Creates an empty set with the default (deterministic) hasher.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<K, S: Default> Default for ConcurrentHashSet<K, S> {
    fn default() -> Self {
        Self {
            map: ConcurrentHashMap::default(),
        }
    }
}

impl<K, S> ConcurrentHashSet<K, S> {
    /// Creates an empty set with the given build hasher.
    pub fn with_hasher(hash_builder: S) -> Self {
        Self {
            map: ConcurrentHashMap::with_hasher(hash_builder),
        }
    }

    /// Number of segments.
    pub fn n_segments(&self) -> usize {
        self.map.n_segments()
    }

    /// Number of synced keys.
    pub fn n_keys(&self) -> usize {
        self.map.n_keys()
    }

    /// Total bucket count.
    pub fn n_buckets(&self) -> usize {
        self.map.n_buckets()
    }

    /// Maximum load factor.
    pub fn max_load_factor(&self) -> f32 {
        self.map.max_load_factor()
    }

    /// Sets the maximum load factor, in `(0, 1]`.
    pub fn set_max_load_factor(&mut self, max_load_factor: f32) {
        self.map.set_max_load_factor(max_load_factor);
    }

    /// Grows the set so `n_keys_min` keys fit in total.
    pub fn reserve(&self, n_keys_min: usize) {
        self.map.reserve(n_keys_min);
    }
}

impl<K, S> ConcurrentHashSet<K, S>
where
    K: Eq + Hash + Send + Sync,
    S: BuildHasher + Sync,
{
    /// Inserts `key` under its segment lock; duplicates are no-ops.
    pub fn set(&self, key: K) {
        self.map.set(key, (), reducer::keep);
    }

    /// Hash-explicit [`set`](Self::set).
    pub fn set_raw(&self, key: K, hash: u64) {
        self.map.set_raw(key, hash, (), reducer::keep);
    }

    /// Non-blocking insert; parks in the calling thread's cache on
    /// segment contention. Visible after [`sync`](Self::sync).
    pub fn async_set(&self, key: K) {
        self.map.async_set(key, (), reducer::keep);
    }

    /// Hash-explicit [`async_set`](Self::async_set).
    pub fn async_set_raw(&self, key: K, hash: u64) {
        self.map.async_set_raw(key, hash, (), reducer::keep);
    }

    /// Drains every thread cache into the segments.
    pub fn sync(&self) {
        self.map.sync(reducer::keep);
    }

    /// Whether `key` is present among the synced entries.
    pub fn has(&self, key: &K) -> bool {
        self.map.has(key)
    }

    /// Removes `key` from its segment if present.
    pub fn unset(&self, key: &K) {
        self.map.unset(key);
    }

    /// Empties all segments and caches.
    pub fn clear(&self) {
        self.map.clear();
    }

    /// Empties all segments and caches and releases their buckets.
    pub fn clear_and_shrink(&self) {
        self.map.clear_and_shrink();
    }

    /// Visits every synced key, parallelized over segments.
    pub fn for_each<F>(&self, handler: F)
    where
        F: Fn(&K, u64) + Sync,
    {
        self.map.for_each(|key, hash, _value| handler(key, hash));
    }

    /// Visits every synced key sequentially, in segment order.
    pub fn for_each_serial<F>(&self, mut handler: F)
    where
        F: FnMut(&K, u64),
    {
        self.map.for_each_serial(|key, hash, _value| handler(key, hash));
    }
}

impl<K, S> Serial for ConcurrentHashSet<K, S>
where
    K: Eq + Hash + Send + Sync + Serialize + DeserializeOwned,
    S: BuildHasher + Sync,
{
    fn serialize(&self, buf: &mut Vec<u8>) -> Result<(), Error> {
        self.map.serialize(buf)
    }

    fn parse(&mut self, bytes: &mut &[u8]) -> Result<(), Error> {
        self.map.parse(bytes)
    }
}

impl<K: Clone, S: Clone> Clone for ConcurrentHashSet<K, S> {
    fn clone(&self) -> Self {
        Self {
            map: self.map.clone(),
        }
    }
}

impl<K, S> core::fmt::Debug for ConcurrentHashSet<K, S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ConcurrentHashSet")
            .field("n_segments", &self.n_segments())
            .field("n_keys", &self.n_keys())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;

    #[test]
    fn test_set_and_has() {
        let set: ConcurrentHashSet<String> = ConcurrentHashSet::new();
        set.set("aa".to_string());
        assert!(set.has(&"aa".to_string()));
        set.set("aa".to_string());
        assert_eq!(set.n_keys(), 1);
        set.set("cc".to_string());
        assert!(set.has(&"cc".to_string()));
    }

    #[test]
    fn test_parallel_async_set_then_sync() {
        let set: ConcurrentHashSet<i64> = ConcurrentHashSet::new();
        const N_KEYS: i64 = 100_000;
        (0..N_KEYS).into_par_iter().for_each(|i| {
            set.async_set(i * i);
        });
        set.sync();
        assert_eq!(set.n_keys(), N_KEYS as usize);
        for i in (0..N_KEYS).step_by(100) {
            assert!(set.has(&(i * i)));
        }
    }

    #[test]
    fn test_unset_and_clear() {
        let set: ConcurrentHashSet<String> = ConcurrentHashSet::new();
        set.set("aa".to_string());
        set.set("bbb".to_string());
        set.unset(&"aa".to_string());
        assert!(!set.has(&"aa".to_string()));
        assert_eq!(set.n_keys(), 1);

        set.clear();
        assert_eq!(set.n_keys(), 0);
    }

    #[test]
    fn test_serialize_and_parse() {
        let set: ConcurrentHashSet<i64> = ConcurrentHashSet::new();
        set.set(0);
        set.set(1);

        let mut buf = Vec::new();
        set.serialize(&mut buf).unwrap();

        let mut parsed: ConcurrentHashSet<i64> = ConcurrentHashSet::new();
        parsed.parse(&mut buf.as_slice()).unwrap();
        assert_eq!(parsed.n_keys(), 2);
        assert!(parsed.has(&0));
        assert!(parsed.has(&1));
    }
}
