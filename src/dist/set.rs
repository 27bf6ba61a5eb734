//! Distributed hash set.
//!
//! A unit-valued [`DistHashMap`]: same partitioning, same shuffle, no
//! values on the wire beyond the keys. There is no distributed deletion;
//! removing keys requires clearing and rebuilding the set.

use core::hash::{BuildHasher, Hash};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::comm::Comm;
use crate::dist::DistHashMap;
use crate::error::Error;
use crate::hasher::DefaultHashBuilder;
use crate::reducer;

/// A hash set partitioned by hash across cooperating processes.
///
/// # Example (single rank)
///
/// ```
/// use std::sync::Arc;
/// use aggmap::comm::SoloComm;
/// use aggmap::DistHashSet;
///
/// let mut set: DistHashSet<u64, SoloComm> = DistHashSet::new(Arc::new(SoloComm));
/// for i in 0..100 {
///     set.async_set(i % 10);
/// }
/// set.sync().unwrap();
/// assert_eq!(set.n_keys().unwrap(), 10);
/// ```
pub struct DistHashSet<K, C, S = DefaultHashBuilder> {
    map: DistHashMap<K, (), C, S>,
}

impl<K, C: Comm> DistHashSet<K, C, DefaultHashBuilder> {
    /// Creates an empty set over `comm` with the default hasher.
    pub fn new(comm: Arc<C>) -> Self {
        Self {
            map: DistHashMap::new(comm),
        }
    }
}

impl<K, C: Comm, S: Clone> DistHashSet<K, C, S> {
    /// Creates an empty set over `comm` with the given build hasher. The
    /// hasher must be deterministic and identical on every rank.
    pub fn with_hasher(comm: Arc<C>, hash_builder: S) -> Self {
        Self {
            map: DistHashMap::with_hasher(comm, hash_builder),
        }
    }
}

impl<K, C: Comm, S> DistHashSet<K, C, S> {
    /// This process's rank.
    pub fn rank(&self) -> usize {
        self.map.rank()
    }

    /// Number of cooperating processes.
    pub fn n_ranks(&self) -> usize {
        self.map.n_ranks()
    }

    /// Maximum load factor.
    pub fn max_load_factor(&self) -> f32 {
        self.map.max_load_factor()
    }

    /// Sets the maximum load factor on the shard and every buffer.
    pub fn set_max_load_factor(&mut self, max_load_factor: f32) {
        self.map.set_max_load_factor(max_load_factor);
    }
}

impl<K, C, S> DistHashSet<K, C, S>
where
    K: Eq + Hash + Send + Sync,
    C: Comm,
    S: BuildHasher + Sync,
{
    /// Non-blocking insert, routed to the owning rank's buffer. Visible
    /// after every rank calls [`sync`](Self::sync).
    pub fn async_set(&self, key: K) {
        self.map.async_set(key, (), reducer::keep);
    }

    /// Synced key count across all ranks (collective).
    pub fn n_keys(&self) -> Result<usize, Error> {
        self.map.n_keys()
    }

    /// Total bucket count across all ranks (collective).
    pub fn n_buckets(&self) -> Result<usize, Error> {
        self.map.n_buckets()
    }

    /// Grows the shard and buffers for `n_keys_min` keys in total.
    pub fn reserve(&self, n_keys_min: usize) {
        self.map.reserve(n_keys_min);
    }

    /// Empties the shard and every buffer.
    pub fn clear(&self) {
        self.map.clear();
    }

    /// Empties the shard and every buffer and releases their memory.
    pub fn clear_and_shrink(&self) {
        self.map.clear_and_shrink();
    }

    /// Visits this rank's synced shard, parallelized over segments.
    pub fn for_each<F>(&self, handler: F)
    where
        F: Fn(&K, u64) + Sync,
    {
        self.map.for_each(|key, hash, _value| handler(key, hash));
    }

    /// The distributed shuffle (collective); see
    /// [`DistHashMap::sync`](crate::DistHashMap::sync).
    pub fn sync(&mut self) -> Result<(), Error>
    where
        K: Serialize + DeserializeOwned,
    {
        self.map.sync(reducer::keep)
    }

    /// Visits every rank's shard on every rank, in rank order
    /// (collective).
    pub fn for_each_serial<F>(&self, mut handler: F) -> Result<(), Error>
    where
        F: FnMut(&K, u64),
        K: Clone + Serialize + DeserializeOwned,
        S: Clone,
    {
        self.map
            .for_each_serial(|key, hash, _value| handler(key, hash))
    }
}

impl<K, C, S> core::fmt::Debug for DistHashSet<K, C, S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DistHashSet").field("map", &self.map).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SoloComm;

    #[test]
    fn test_duplicates_collapse() {
        let mut set: DistHashSet<i64, SoloComm> = DistHashSet::new(Arc::new(SoloComm));
        for i in 0..100 {
            set.async_set(i % 10);
        }
        set.sync().unwrap();
        assert_eq!(set.n_keys().unwrap(), 10);
    }

    #[test]
    fn test_for_each_serial_sums_keys() {
        let mut set: DistHashSet<i64, SoloComm> = DistHashSet::new(Arc::new(SoloComm));
        for i in 0..100i64 {
            set.async_set(i * i);
        }
        set.sync().unwrap();
        let mut sum = 0i64;
        set.for_each_serial(|key, _hash| sum += key).unwrap();
        assert_eq!(sum, 328350);
    }
}
