//! Single-threaded hash map facade.
//!
//! [`HashMap`] pairs a [`RawTable`] with a build hasher and computes each
//! key's 64-bit hash exactly once at this boundary. Everything below the
//! facade is hash-explicit, which is what lets the concurrent and
//! distributed overlays reuse the same probing code with transformed
//! hashes.

use core::hash::{BuildHasher, Hash};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::{self, Serial};
use crate::error::Error;
use crate::hasher::DefaultHashBuilder;
use crate::reducer;
use crate::table::RawTable;

/// A single-threaded linear-probing hash map.
///
/// Inserts take a reducer that combines the incoming value into an
/// existing slot; lookups return a copy of the value or a caller-supplied
/// default. Not thread-safe; see
/// [`ConcurrentHashMap`](crate::ConcurrentHashMap) for the multi-threaded
/// flavor.
///
/// # Example
///
/// ```
/// use aggmap::{reducer, HashMap};
///
/// let mut word_counts: HashMap<String, u64> = HashMap::new();
/// word_counts.set("the".to_string(), 1, reducer::sum);
/// word_counts.set("the".to_string(), 1, reducer::sum);
/// assert_eq!(word_counts.get(&"the".to_string(), 0), 2);
/// ```
#[derive(Clone, Debug)]
pub struct HashMap<K, V, S = DefaultHashBuilder> {
    table: RawTable<K, V>,
    hash_builder: S,
}

impl<K, V, S: Default> Default for HashMap<K, V, S> {
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

impl<K, V> HashMap<K, V, DefaultHashBuilder> {
    /// Creates an empty map with the default (deterministic) hasher.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<K, V, S> HashMap<K, V, S> {
    /// Creates an empty map with the given build hasher.
    pub fn with_hasher(hash_builder: S) -> Self {
        Self {
            table: RawTable::new(),
            hash_builder,
        }
    }

    /// Number of keys.
    pub fn n_keys(&self) -> usize {
        self.table.n_keys()
    }

    /// Number of buckets.
    pub fn n_buckets(&self) -> usize {
        self.table.n_buckets()
    }

    /// Maximum load factor.
    pub fn max_load_factor(&self) -> f32 {
        self.table.max_load_factor()
    }

    /// Sets the maximum load factor, in `(0, 1]`.
    pub fn set_max_load_factor(&mut self, max_load_factor: f32) {
        self.table.set_max_load_factor(max_load_factor);
    }

    /// Grows the map so `n_keys_min` keys fit under the load factor.
    pub fn reserve(&mut self, n_keys_min: usize) {
        self.table.reserve(n_keys_min);
    }

    /// Empties the map without releasing memory.
    pub fn clear(&mut self) {
        self.table.clear();
    }

    /// Empties the map and releases its buckets.
    pub fn clear_and_shrink(&mut self) {
        self.table.clear_and_shrink();
    }

    /// Visits every entry in physical bucket order as
    /// `(key, hash, value)`.
    pub fn for_each<F>(&self, handler: F)
    where
        F: FnMut(&K, u64, &V),
    {
        self.table.for_each(handler);
    }
}

impl<K, V, S> HashMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    #[inline]
    fn hash_of(&self, key: &K) -> u64 {
        self.hash_builder.hash_one(key)
    }

    /// Inserts `key` or combines `value` into its slot with `reducer`.
    pub fn set<F>(&mut self, key: K, value: V, reducer: F)
    where
        F: Fn(&mut V, V),
    {
        let hash = self.hash_of(&key);
        self.table.set(key, hash, value, reducer);
    }

    /// Returns a copy of the value for `key`, or `default` when absent.
    pub fn get(&self, key: &K, default: V) -> V
    where
        V: Clone,
    {
        self.table.get(key, self.hash_of(key), default)
    }

    /// Whether `key` is present.
    pub fn has(&self, key: &K) -> bool {
        self.table.has(key, self.hash_of(key))
    }

    /// Removes `key` if present.
    pub fn unset(&mut self, key: &K) {
        self.table.unset(key, self.hash_of(key));
    }
}

impl<K, V, S> Serial for HashMap<K, V, S>
where
    K: Hash + Eq + Serialize + DeserializeOwned,
    V: Serialize + DeserializeOwned,
    S: BuildHasher,
{
    /// Emits the key count followed by each `(key, value)` pair. Hashes
    /// are not serialized.
    fn serialize(&self, buf: &mut Vec<u8>) -> Result<(), Error> {
        self.table.serialize_into(buf)
    }

    /// Clears the map, then re-inserts every incoming entry, re-hashing
    /// each key with this map's hasher. The first writer wins on
    /// duplicate keys.
    fn parse(&mut self, bytes: &mut &[u8]) -> Result<(), Error> {
        self.table.clear();
        let n_keys: u64 = codec::read_value(bytes)?;
        self.table.reserve(n_keys as usize);
        for _ in 0..n_keys {
            let key: K = codec::read_value(bytes)?;
            let value: V = codec::read_value(bytes)?;
            let hash = self.hash_of(&key);
            self.table.set(key, hash, value, reducer::keep);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reducer;

    #[test]
    fn test_initialization() {
        let map: HashMap<String, i32> = HashMap::new();
        assert_eq!(map.n_keys(), 0);
    }

    #[test]
    fn test_set_get_and_has() {
        let mut map: HashMap<String, i32> = HashMap::new();
        map.set("aa".to_string(), 1, reducer::overwrite);
        map.set("bb".to_string(), 2, reducer::overwrite);

        assert!(map.has(&"aa".to_string()));
        assert!(map.has(&"bb".to_string()));
        assert!(!map.has(&"cc".to_string()));
        assert_eq!(map.get(&"aa".to_string(), 0), 1);
        assert_eq!(map.get(&"cc".to_string(), -1), -1);
    }

    #[test]
    fn test_clone_preserves_contents() {
        let mut map: HashMap<String, i32> = HashMap::new();
        map.set("aa".to_string(), 1, reducer::overwrite);
        map.set("bb".to_string(), 2, reducer::overwrite);

        let copy = map.clone();
        assert_eq!(copy.get(&"aa".to_string(), 0), 1);
        assert_eq!(copy.get(&"bb".to_string(), 0), 2);
    }

    #[test]
    fn test_reducers_combine_on_existing_keys() {
        let mut map: HashMap<u64, u64> = HashMap::new();
        map.set(7, 3, reducer::sum);
        map.set(7, 4, reducer::sum);
        assert_eq!(map.n_keys(), 1);
        assert_eq!(map.get(&7, 0), 7);

        map.set(7, 100, reducer::min);
        assert_eq!(map.get(&7, 0), 7);
        map.set(7, 1, reducer::min);
        assert_eq!(map.get(&7, 0), 1);
    }

    #[test]
    fn test_large_set_and_has() {
        let mut map: HashMap<i64, i64> = HashMap::new();
        const N_KEYS: i64 = 100_000;
        map.reserve(N_KEYS as usize);
        for i in 0..N_KEYS {
            map.set(i * i, i, reducer::overwrite);
        }
        assert_eq!(map.n_keys(), N_KEYS as usize);
        for i in (0..N_KEYS).step_by(10) {
            assert!(map.has(&(i * i)));
        }
    }

    #[test]
    fn test_unset_and_count() {
        let mut map: HashMap<String, i32> = HashMap::new();
        map.set("aa".to_string(), 1, reducer::overwrite);
        map.set("bbb".to_string(), 2, reducer::overwrite);

        map.unset(&"aa".to_string());
        assert!(!map.has(&"aa".to_string()));
        assert_eq!(map.n_keys(), 1);

        map.unset(&"not_exist_key".to_string());
        assert_eq!(map.n_keys(), 1);

        map.unset(&"bbb".to_string());
        assert_eq!(map.n_keys(), 0);
    }

    #[test]
    fn test_for_each_visits_every_entry() {
        let mut map: HashMap<u64, u64> = HashMap::new();
        for i in 0..100 {
            map.set(i, i * 2, reducer::overwrite);
        }
        let mut sum = 0;
        map.for_each(|_key, _hash, value| sum += *value);
        assert_eq!(sum, 99 * 100);
    }

    #[test]
    fn test_serialize_then_parse_round_trips() {
        let mut map: HashMap<String, i32> = HashMap::new();
        map.set("aa".to_string(), 1, reducer::overwrite);
        map.set("bbb".to_string(), 2, reducer::overwrite);

        let mut buf = Vec::new();
        map.serialize(&mut buf).unwrap();

        let mut parsed: HashMap<String, i32> = HashMap::new();
        parsed.parse(&mut buf.as_slice()).unwrap();
        assert_eq!(parsed.n_keys(), 2);
        assert_eq!(parsed.get(&"aa".to_string(), 0), 1);
        assert_eq!(parsed.get(&"bbb".to_string(), 0), 2);
    }
}
