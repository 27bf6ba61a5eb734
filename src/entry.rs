//! Bucket record for the linear-probing tables.
//!
//! Every filled bucket stores the key together with its precomputed 64-bit
//! hash. Lookups compare the hash first and only fall back to key equality
//! on a hash match, so a probe over a collision chain is mostly integer
//! comparisons. Empty buckets are represented as `None` by the owning
//! table; an entry that exists is always filled.
//!
//! The value type defaults to `()`: set flavors store unit values, which
//! occupy no space.

/// A filled bucket: key, its precomputed hash, and the value.
///
/// Entries are created when the owning table fills a bucket and move as a
/// unit during rehashing and backward-shift deletion. The hash is never
/// recomputed from the key once an entry exists.
#[derive(Clone, Debug)]
pub struct TableEntry<K, V = ()> {
    /// The stored key.
    pub key: K,

    /// Precomputed 64-bit hash of the key, as supplied by the caller.
    pub hash: u64,

    /// The stored value. `()` for set flavors.
    pub value: V,
}

impl<K, V> TableEntry<K, V> {
    /// Creates a filled entry.
    pub fn new(key: K, hash: u64, value: V) -> Self {
        Self { key, hash, value }
    }

    /// Hash-first key comparison.
    ///
    /// Two keys are considered equal only when both the precomputed hashes
    /// and the keys themselves compare equal. Comparing the hash first
    /// short-circuits the (potentially expensive) key comparison.
    #[inline]
    pub fn key_equals(&self, key: &K, hash: u64) -> bool
    where
        K: PartialEq,
    {
        self.hash == hash && self.key == *key
    }
}
