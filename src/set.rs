//! Single-threaded hash set facade.
//!
//! A set is a unit-valued map: the entries store `()`, which occupies no
//! space, and every operation delegates to [`HashMap`]. Duplicate inserts
//! are no-ops (the `keep` reducer fires on the existing unit value).

use core::hash::{BuildHasher, Hash};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::Serial;
use crate::error::Error;
use crate::hasher::DefaultHashBuilder;
use crate::map::HashMap;
use crate::reducer;

/// A single-threaded linear-probing hash set.
///
/// # Example
///
/// ```
/// use aggmap::HashSet;
///
/// let mut seen: HashSet<u64> = HashSet::new();
/// seen.set(42);
/// seen.set(42);
/// assert_eq!(seen.n_keys(), 1);
/// assert!(seen.has(&42));
/// ```
#[derive(Clone, Debug)]
pub struct HashSet<K, S = DefaultHashBuilder> {
    map: HashMap<K, (), S>,
}

impl<K, S: Default> Default for HashSet<K, S> {
    fn default() -> Self {
        Self {
            map: HashMap::default(),
        }
    }
}

impl<K> HashSet<K, DefaultHashBuilder> {
    /// Creates an empty set with the default (deterministic) hasher.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<K, S> HashSet<K, S> {
    /// Creates an empty set with the given build hasher.
    pub fn with_hasher(hash_builder: S) -> Self {
        Self {
            map: HashMap::with_hasher(hash_builder),
        }
    }

    /// Number of keys.
    pub fn n_keys(&self) -> usize {
        self.map.n_keys()
    }

    /// Number of buckets.
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

    /// Grows the set so `n_keys_min` keys fit under the load factor.
    pub fn reserve(&mut self, n_keys_min: usize) {
        self.map.reserve(n_keys_min);
    }

    /// Empties the set without releasing memory.
    pub fn clear(&mut self) {
        self.map.clear();
    }

    /// Empties the set and releases its buckets.
    pub fn clear_and_shrink(&mut self) {
        self.map.clear_and_shrink();
    }

    /// Visits every key in physical bucket order as `(key, hash)`.
    pub fn for_each<F>(&self, mut handler: F)
    where
        F: FnMut(&K, u64),
    {
        self.map.for_each(|key, hash, _value| handler(key, hash));
    }
}

impl<K, S> HashSet<K, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    /// Inserts `key`; a duplicate insert is a no-op.
    pub fn set(&mut self, key: K) {
        self.map.set(key, (), reducer::keep);
    }

    /// Whether `key` is present.
    pub fn has(&self, key: &K) -> bool {
        self.map.has(key)
    }

    /// Removes `key` if present.
    pub fn unset(&mut self, key: &K) {
        self.map.unset(key);
    }
}

impl<K, S> Serial for HashSet<K, S>
where
    K: Hash + Eq + Serialize + DeserializeOwned,
    S: BuildHasher,
{
    fn serialize(&self, buf: &mut Vec<u8>) -> Result<(), Error> {
        self.map.serialize(buf)
    }

    fn parse(&mut self, bytes: &mut &[u8]) -> Result<(), Error> {
        self.map.parse(bytes)
    }
}
