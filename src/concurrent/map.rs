//! Thread-safe concurrent hash map with a non-blocking write path.
//!
//! The multi-threaded counterpart to [`HashMap`](crate::HashMap). Shared
//! state lives in lock-striped segments; the `async_set` fast path falls
//! back to a per-thread write cache whenever its segment lock is
//! contended, so writers proceed at cache speed regardless of contention.
//! Correctness is restored by [`sync`](ConcurrentHashMap::sync), which
//! every reader of the aggregate must wait for.
//!
//! # Per-thread caches
//!
//! There is one cache per pool thread, indexed by the pool thread id.
//! Only the owning thread writes its cache on the `async_set` path; the
//! cache mutex is therefore uncontended there and only does real work
//! during the parallel drain in `sync` and `clear`.
//!
//! # Example
//!
//! ```
//! use aggmap::{reducer, ConcurrentHashMap};
//! use rayon::prelude::*;
//!
//! let map: ConcurrentHashMap<u64, u64> = ConcurrentHashMap::new();
//! (0..10_000u64)
//!     .into_par_iter()
//!     .for_each(|i| map.async_set(i % 256, 1, reducer::sum));
//! map.sync(reducer::sum);
//! assert_eq!(map.n_keys(), 256);
//! ```

use core::hash::{BuildHasher, Hash};

use parking_lot::Mutex;
use rayon::prelude::*;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::{self, Serial};
use crate::error::Error;
use crate::hasher::DefaultHashBuilder;
use crate::pool;
use crate::reducer;
use crate::table::{RawTable, DEFAULT_MAX_LOAD_FACTOR};

/// A segmented, thread-safe hash map with reducer-combining writes.
///
/// All mutating operations take `&self` and synchronize internally, so
/// the map can be shared across threads behind an `Arc` (or borrowed into
/// a rayon parallel loop). `async_set` never blocks; writes parked in
/// per-thread caches become visible after `sync`.
pub struct ConcurrentHashMap<K, V, S = DefaultHashBuilder> {
    hash_builder: S,
    max_load_factor: f32,
    segments: Box<[Mutex<RawTable<K, V>>]>,
    thread_caches: Box<[Mutex<RawTable<K, V>>]>,
}

impl<K, V> ConcurrentHashMap<K, V, DefaultHashBuilder> {
    /// Creates an empty map with the default (deterministic) hasher.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<K, V, S: Default> Default for ConcurrentHashMap<K, V, S> {
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

impl<K, V, S> ConcurrentHashMap<K, V, S> {
    /// Creates an empty map with the given build hasher.
    ///
    /// The segment count is fixed here from the pool's thread count and
    /// never changes afterwards.
    pub fn with_hasher(hash_builder: S) -> Self {
        let n_threads = pool::n_threads();
        let n_segments = crate::concurrent::segment_count(n_threads);
        let segments: Vec<_> = (0..n_segments).map(|_| Mutex::new(RawTable::new())).collect();
        let thread_caches: Vec<_> = (0..n_threads).map(|_| Mutex::new(RawTable::new())).collect();
        Self {
            hash_builder,
            max_load_factor: DEFAULT_MAX_LOAD_FACTOR,
            segments: segments.into_boxed_slice(),
            thread_caches: thread_caches.into_boxed_slice(),
        }
    }

    /// Number of segments.
    pub fn n_segments(&self) -> usize {
        self.segments.len()
    }

    /// Maximum load factor shared by all segments and caches.
    pub fn max_load_factor(&self) -> f32 {
        self.max_load_factor
    }

    /// Sets the maximum load factor, in `(0, 1]`.
    pub fn set_max_load_factor(&mut self, max_load_factor: f32) {
        self.max_load_factor = max_load_factor;
        for segment in self.segments.iter_mut() {
            segment.get_mut().set_max_load_factor(max_load_factor);
        }
        for cache in self.thread_caches.iter_mut() {
            cache.get_mut().set_max_load_factor(max_load_factor);
        }
    }

    /// Number of synced keys, summed over segments.
    ///
    /// Writes still parked in thread caches are not counted; call
    /// [`sync`](Self::sync) first for an exact aggregate.
    pub fn n_keys(&self) -> usize {
        self.segments.iter().map(|s| s.lock().n_keys()).sum()
    }

    /// Total bucket count, summed over segments.
    pub fn n_buckets(&self) -> usize {
        self.segments.iter().map(|s| s.lock().n_buckets()).sum()
    }

    /// Current aggregate load factor.
    pub fn load_factor(&self) -> f32 {
        self.n_keys() as f32 / self.n_buckets() as f32
    }

    /// Grows every segment so `n_keys_min` keys fit in total, and gives
    /// the thread caches a small share for contention spill.
    pub fn reserve(&self, n_keys_min: usize) {
        let n_segment_keys_min = n_keys_min / self.segments.len();
        for segment in self.segments.iter() {
            segment.lock().reserve(n_segment_keys_min);
        }
        let n_thread_keys_est = n_keys_min / 1000;
        for cache in self.thread_caches.iter() {
            cache.lock().reserve(n_thread_keys_est);
        }
    }

    /// Segment index for a hash: a bit mask, since S is a power of two.
    #[inline]
    fn segment_for(&self, hash: u64) -> usize {
        (hash & (self.segments.len() as u64 - 1)) as usize
    }
}

impl<K, V, S> ConcurrentHashMap<K, V, S>
where
    K: Eq + Hash + Send + Sync,
    V: Send + Sync,
    S: BuildHasher + Sync,
{
    #[inline]
    fn hash_of(&self, key: &K) -> u64 {
        self.hash_builder.hash_one(key)
    }

    /// Inserts `key` under its segment lock, combining with `reducer` on
    /// an existing slot. Blocks while the segment is contended.
    pub fn set<F>(&self, key: K, value: V, reducer: F)
    where
        F: Fn(&mut V, V),
    {
        let hash = self.hash_of(&key);
        self.set_raw(key, hash, value, reducer);
    }

    /// Hash-explicit [`set`](Self::set), for callers that transformed the
    /// hash themselves.
    pub fn set_raw<F>(&self, key: K, hash: u64, value: V, reducer: F)
    where
        F: Fn(&mut V, V),
    {
        let mut segment = self.segments[self.segment_for(hash)].lock();
        segment.set(key, hash, value, reducer);
    }

    /// Non-blocking insert: try-locks the segment; on contention the
    /// update lands in the calling thread's private cache instead.
    ///
    /// The write becomes visible to readers only after [`sync`](Self::sync).
    pub fn async_set<F>(&self, key: K, value: V, reducer: F)
    where
        F: Fn(&mut V, V),
    {
        let hash = self.hash_of(&key);
        self.async_set_raw(key, hash, value, reducer);
    }

    /// Hash-explicit [`async_set`](Self::async_set).
    pub fn async_set_raw<F>(&self, key: K, hash: u64, value: V, reducer: F)
    where
        F: Fn(&mut V, V),
    {
        match self.segments[self.segment_for(hash)].try_lock() {
            Some(mut segment) => segment.set(key, hash, value, reducer),
            None => {
                let cache_id = pool::thread_index() % self.thread_caches.len();
                self.thread_caches[cache_id].lock().set(key, hash, value, reducer);
            }
        }
    }

    /// Drains every thread cache into the segments, applying `reducer`
    /// per key. Caches are drained in parallel, one worker per cache.
    ///
    /// Must be called after a phase of `async_set` writes and before any
    /// read of the aggregate. A `sync` with no parked writes is a no-op.
    pub fn sync<F>(&self, reducer: F)
    where
        F: Fn(&mut V, V) + Sync,
    {
        self.thread_caches.par_iter().for_each(|cache| {
            let mut cache = cache.lock();
            cache.take_each(|key, hash, value| {
                let mut segment = self.segments[self.segment_for(hash)].lock();
                segment.set(key, hash, value, &reducer);
            });
        });
    }

    /// Returns a copy of the value for `key`, or `default` when absent.
    /// Locks the key's segment; unsynced cached writes are not seen.
    pub fn get(&self, key: &K, default: V) -> V
    where
        V: Clone,
    {
        let hash = self.hash_of(key);
        self.get_raw(key, hash, default)
    }

    /// Hash-explicit [`get`](Self::get).
    pub fn get_raw(&self, key: &K, hash: u64, default: V) -> V
    where
        V: Clone,
    {
        self.segments[self.segment_for(hash)].lock().get(key, hash, default)
    }

    /// Whether `key` is present among the synced entries.
    pub fn has(&self, key: &K) -> bool {
        let hash = self.hash_of(key);
        self.segments[self.segment_for(hash)].lock().has(key, hash)
    }

    /// Removes `key` from its segment if present.
    pub fn unset(&self, key: &K) {
        let hash = self.hash_of(key);
        self.segments[self.segment_for(hash)].lock().unset(key, hash);
    }

    /// Empties all segments and caches, parallelized over segments.
    pub fn clear(&self) {
        self.segments.par_iter().for_each(|segment| segment.lock().clear());
        self.thread_caches.par_iter().for_each(|cache| cache.lock().clear());
    }

    /// Empties all segments and caches and releases their buckets.
    pub fn clear_and_shrink(&self) {
        self.segments
            .par_iter()
            .for_each(|segment| segment.lock().clear_and_shrink());
        self.thread_caches
            .par_iter()
            .for_each(|cache| cache.lock().clear_and_shrink());
    }

    /// Visits every synced entry, parallelized over segments.
    ///
    /// The handler runs under the segment lock; it must not call back
    /// into this map.
    pub fn for_each<F>(&self, handler: F)
    where
        F: Fn(&K, u64, &V) + Sync,
    {
        self.segments.par_iter().for_each(|segment| {
            segment.lock().for_each(&handler);
        });
    }

    /// Visits every synced entry sequentially, in segment order.
    pub fn for_each_serial<F>(&self, mut handler: F)
    where
        F: FnMut(&K, u64, &V),
    {
        for segment in self.segments.iter() {
            segment.lock().for_each(&mut handler);
        }
    }

    /// Drains every synced entry by value, leaving the map empty.
    pub(crate) fn drain_each<F>(&mut self, mut handler: F)
    where
        F: FnMut(K, u64, V),
    {
        for segment in self.segments.iter_mut() {
            segment.get_mut().take_each(&mut handler);
        }
        for cache in self.thread_caches.iter_mut() {
            cache.get_mut().take_each(&mut handler);
        }
    }
}

impl<K, V, S> Serial for ConcurrentHashMap<K, V, S>
where
    K: Eq + Hash + Send + Sync + Serialize + DeserializeOwned,
    V: Send + Sync + Serialize + DeserializeOwned,
    S: BuildHasher + Sync,
{
    /// Emits the segment count, the load factor, then each segment's
    /// entry stream in order.
    fn serialize(&self, buf: &mut Vec<u8>) -> Result<(), Error> {
        codec::write_value(buf, &(self.segments.len() as u64))?;
        codec::write_value(buf, &self.max_load_factor)?;
        for segment in self.segments.iter() {
            segment.lock().serialize_into(buf)?;
        }
        Ok(())
    }

    /// Clears the map, adopts the incoming load factor, then re-inserts
    /// every incoming entry through top-level `set` with the `keep`
    /// reducer. When the writer's segment count differs from this map's,
    /// entries land in different segments; rebalancing is implicit.
    fn parse(&mut self, bytes: &mut &[u8]) -> Result<(), Error> {
        self.clear();
        let n_segments_in: u64 = codec::read_value(bytes)?;
        let max_load_factor: f32 = codec::read_value(bytes)?;
        self.set_max_load_factor(max_load_factor);
        for _ in 0..n_segments_in {
            let n_keys: u64 = codec::read_value(bytes)?;
            for _ in 0..n_keys {
                let key: K = codec::read_value(bytes)?;
                let value: V = codec::read_value(bytes)?;
                let hash = self.hash_of(&key);
                self.set_raw(key, hash, value, reducer::keep);
            }
        }
        Ok(())
    }
}

impl<K: Clone, V: Clone, S: Clone> Clone for ConcurrentHashMap<K, V, S> {
    /// Clones the segments (preserving the source's segment count) with
    /// fresh, empty thread caches: copying cached writes would duplicate
    /// unsynced data.
    fn clone(&self) -> Self {
        let segments: Vec<_> = self
            .segments
            .iter()
            .map(|segment| Mutex::new(segment.lock().clone()))
            .collect();
        let thread_caches: Vec<_> = (0..pool::n_threads())
            .map(|_| {
                let mut cache = RawTable::new();
                cache.set_max_load_factor(self.max_load_factor);
                Mutex::new(cache)
            })
            .collect();
        Self {
            hash_builder: self.hash_builder.clone(),
            max_load_factor: self.max_load_factor,
            segments: segments.into_boxed_slice(),
            thread_caches: thread_caches.into_boxed_slice(),
        }
    }
}

impl<K, V, S> core::fmt::Debug for ConcurrentHashMap<K, V, S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ConcurrentHashMap")
            .field("n_segments", &self.segments.len())
            .field("n_keys", &self.segments.iter().map(|s| s.lock().n_keys()).sum::<usize>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reducer;

    #[test]
    fn test_initialization() {
        let map: ConcurrentHashMap<String, i32> = ConcurrentHashMap::new();
        assert_eq!(map.n_keys(), 0);
        assert!(map.n_segments().is_power_of_two());
    }

    #[test]
    fn test_reserve_spreads_over_segments() {
        let map: ConcurrentHashMap<String, i32> = ConcurrentHashMap::new();
        map.reserve(100_000);
        assert!(map.n_buckets() >= 100_000);
    }

    #[test]
    fn test_set_and_get() {
        let map: ConcurrentHashMap<String, i32> = ConcurrentHashMap::new();
        map.set("aa".to_string(), 1, reducer::overwrite);
        assert!(map.has(&"aa".to_string()));
        map.set("aa".to_string(), 2, reducer::overwrite);
        assert_eq!(map.get(&"aa".to_string(), 0), 2);
        map.set("cc".to_string(), 3, reducer::overwrite);
        assert!(map.has(&"cc".to_string()));
        assert_eq!(map.n_keys(), 2);
    }

    #[test]
    fn test_load_factor_accessors() {
        let mut map: ConcurrentHashMap<i32, i32> = ConcurrentHashMap::new();
        map.set_max_load_factor(0.5);
        assert_eq!(map.max_load_factor(), 0.5);
        for i in 0..100 {
            map.set(i, i, reducer::overwrite);
        }
        assert!(map.n_buckets() as f32 >= 100.0 / 0.5);
    }

    #[test]
    fn test_parallel_set() {
        let map: ConcurrentHashMap<i64, i64> = ConcurrentHashMap::new();
        const N_KEYS: i64 = 100_000;
        (0..N_KEYS).into_par_iter().for_each(|i| {
            map.set(i * i, i, reducer::overwrite);
        });
        assert_eq!(map.n_keys(), N_KEYS as usize);
        assert!(map.n_buckets() >= N_KEYS as usize);
    }

    #[test]
    fn test_parallel_async_set_then_sync() {
        let map: ConcurrentHashMap<i64, i64> = ConcurrentHashMap::new();
        const N_KEYS: i64 = 100_000;
        (0..N_KEYS).into_par_iter().for_each(|i| {
            map.async_set(i * i, i, reducer::overwrite);
        });
        map.sync(reducer::overwrite);
        assert_eq!(map.n_keys(), N_KEYS as usize);
        for i in (0..N_KEYS).step_by(100) {
            assert!(map.has(&(i * i)));
        }
    }

    #[test]
    fn test_async_set_accumulates_with_sum() {
        let map: ConcurrentHashMap<i64, i64> = ConcurrentHashMap::new();
        const N: i64 = 10_000;
        (0..N).into_par_iter().for_each(|i| {
            map.async_set(i % 16, 1, reducer::sum);
        });
        map.sync(reducer::sum);
        let mut total = 0;
        map.for_each_serial(|_key, _hash, value| total += *value);
        assert_eq!(total, N);
    }

    #[test]
    fn test_sync_without_writes_is_a_noop() {
        let map: ConcurrentHashMap<i64, i64> = ConcurrentHashMap::new();
        map.set(1, 1, reducer::overwrite);
        map.sync(reducer::overwrite);
        assert_eq!(map.n_keys(), 1);
    }

    #[test]
    fn test_unset_and_has() {
        let map: ConcurrentHashMap<String, i32> = ConcurrentHashMap::new();
        map.set("aa".to_string(), 1, reducer::overwrite);
        map.set("bbb".to_string(), 2, reducer::overwrite);
        map.unset(&"aa".to_string());
        assert!(!map.has(&"aa".to_string()));
        assert_eq!(map.n_keys(), 1);

        map.unset(&"not_exist_key".to_string());
        assert_eq!(map.n_keys(), 1);
    }

    #[test]
    fn test_clear_and_shrink() {
        let map: ConcurrentHashMap<i64, i64> = ConcurrentHashMap::new();
        const N_KEYS: i64 = 100_000;
        (0..N_KEYS).into_par_iter().for_each(|i| {
            map.set(i * i, i, reducer::overwrite);
        });
        let threshold = N_KEYS as f32 * map.max_load_factor();
        assert!(map.n_buckets() as f32 >= threshold);
        map.clear_and_shrink();
        assert_eq!(map.n_keys(), 0);
        assert!((map.n_buckets() as f32) < threshold);
    }

    #[test]
    fn test_clone_preserves_segments_and_drops_cached_writes() {
        let map: ConcurrentHashMap<String, i32> = ConcurrentHashMap::new();
        map.set("aa".to_string(), 1, reducer::overwrite);
        map.set("bb".to_string(), 2, reducer::overwrite);

        let copy = map.clone();
        assert_eq!(copy.n_segments(), map.n_segments());
        assert!(copy.has(&"aa".to_string()));
        assert!(copy.has(&"bb".to_string()));
    }

    #[test]
    fn test_serialize_and_parse() {
        let map: ConcurrentHashMap<i64, i64> = ConcurrentHashMap::new();
        map.set(0, 0, reducer::overwrite);
        map.set(1, 1, reducer::overwrite);

        let mut buf = Vec::new();
        map.serialize(&mut buf).unwrap();

        let mut parsed: ConcurrentHashMap<i64, i64> = ConcurrentHashMap::new();
        parsed.parse(&mut buf.as_slice()).unwrap();
        assert_eq!(parsed.n_keys(), 2);
        assert!(parsed.has(&0));
        assert!(parsed.has(&1));
    }
}
