//! Linear-probing hash table core.
//!
//! This module is the single-segment storage engine underneath every map
//! and set in the crate. It is hash-explicit: every operation takes the
//! precomputed 64-bit hash alongside the key and the table never invokes
//! a hasher itself. The typed facades in [`crate::map`] and [`crate::set`]
//! hash once and thread the value through; the concurrent and distributed
//! overlays transform it (segment mask, rank quotient) before it gets
//! here.
//!
//! **Note**: This is internal infrastructure. Most users want the typed
//! facades or the concurrent/distributed overlays instead.
//!
//! # Bucket counts
//!
//! Bucket counts are always products of primes from a fixed table, grown
//! by ~1.25 on explicit reserves and ~1.4 on load-factor triggers. The
//! resulting composite sizes have only large prime factors, which destroys
//! the periodicities that strided integer keys would otherwise resonate
//! with.
//!
//! # Balance guard
//!
//! A single insertion probing more than 64 buckets means the hash
//! distribution is suspect. A mostly-empty table that still probes that
//! far is unsalvageable (the hash function is unusable) and panics;
//! anything else grows by ~1.6 and rehashes.

use serde::Serialize;

use crate::codec;
use crate::entry::TableEntry;
use crate::error::Error;

/// Load factor every table starts with.
pub const DEFAULT_MAX_LOAD_FACTOR: f32 = 0.7;

/// Bucket count of a fresh or shrunken table.
pub const N_INITIAL_BUCKETS: usize = 11;

/// Probe count beyond which the balance guard engages.
const MAX_N_PROBES: usize = 64;

/// Growth applied when the load factor trips during insertion.
const LOAD_GROWTH: f64 = 1.4;

/// Growth applied when the balance guard rehashes.
const BALANCE_GROWTH: f64 = 1.6;

/// Selected primes for bucket counts. Composite counts are products of
/// `GROWTH_PRIME` powers and one entry of this table.
const PRIMES: [usize; 16] = [
    11, 17, 29, 47, 79, 127, 211, 337, 547, 887, 1433, 2311, 3739, 6053, 9791, 15859,
];

const LAST_PRIME: usize = 15859;

const GROWTH_PRIME: usize = 9791;

/// A single-segment linear-probing table.
///
/// Invariants, maintained after every completed operation:
///
/// - `n_keys <= n_buckets * max_load_factor`;
/// - every filled key lies on the contiguous probe chain from its home
///   bucket (`hash % n_buckets`) with no unfilled bucket in between.
///
/// The value type defaults to `()`, which is how the set flavors use it.
#[derive(Clone, Debug)]
pub struct RawTable<K, V = ()> {
    buckets: Vec<Option<TableEntry<K, V>>>,
    n_keys: usize,
    max_load_factor: f32,
    unbalanced_warned: bool,
}

impl<K, V> Default for RawTable<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> RawTable<K, V> {
    /// Creates an empty table with [`N_INITIAL_BUCKETS`] buckets.
    pub fn new() -> Self {
        let mut buckets = Vec::new();
        buckets.resize_with(N_INITIAL_BUCKETS, || None);
        Self {
            buckets,
            n_keys: 0,
            max_load_factor: DEFAULT_MAX_LOAD_FACTOR,
            unbalanced_warned: false,
        }
    }

    /// Number of filled keys.
    pub fn n_keys(&self) -> usize {
        self.n_keys
    }

    /// Current bucket count.
    pub fn n_buckets(&self) -> usize {
        self.buckets.len()
    }

    /// Maximum load factor before an insertion triggers a rehash.
    pub fn max_load_factor(&self) -> f32 {
        self.max_load_factor
    }

    /// Sets the maximum load factor, in `(0, 1]`.
    ///
    /// Takes effect on the next insertion; the table is not rehashed
    /// eagerly.
    pub fn set_max_load_factor(&mut self, max_load_factor: f32) {
        debug_assert!(max_load_factor > 0.0 && max_load_factor <= 1.0);
        self.max_load_factor = max_load_factor;
    }

    /// Grows the table so that `n_keys_min` keys fit under the load
    /// factor. Never shrinks.
    pub fn reserve(&mut self, n_keys_min: usize) {
        self.reserve_n_buckets((n_keys_min as f64 / f64::from(self.max_load_factor)) as usize);
    }

    /// Grows the table to at least `n_buckets_min` buckets. Never shrinks.
    pub fn reserve_n_buckets(&mut self, n_buckets_min: usize) {
        if n_buckets_min <= self.buckets.len() {
            return;
        }
        let n_rehash_buckets = rehash_bucket_count(n_buckets_min);
        self.rehash(n_rehash_buckets);
    }

    /// Empties the table without releasing its buckets.
    pub fn clear(&mut self) {
        if self.n_keys == 0 {
            return;
        }
        for slot in &mut self.buckets {
            *slot = None;
        }
        self.n_keys = 0;
    }

    /// Empties the table and shrinks it back to [`N_INITIAL_BUCKETS`].
    ///
    /// This is the only operation that releases memory.
    pub fn clear_and_shrink(&mut self) {
        self.buckets.truncate(N_INITIAL_BUCKETS);
        self.buckets.shrink_to_fit();
        self.clear();
    }

    fn rehash(&mut self, n_rehash_buckets: usize) {
        let old = core::mem::take(&mut self.buckets);
        let mut buckets: Vec<Option<TableEntry<K, V>>> = Vec::new();
        buckets.resize_with(n_rehash_buckets, || None);
        for entry in old.into_iter().flatten() {
            let mut bucket_id = (entry.hash % n_rehash_buckets as u64) as usize;
            // The new table is strictly larger than the key count, so an
            // empty bucket always exists on the chain.
            while buckets[bucket_id].is_some() {
                bucket_id = (bucket_id + 1) % n_rehash_buckets;
            }
            buckets[bucket_id] = Some(entry);
        }
        self.buckets = buckets;
    }

    fn check_balance(&mut self, n_probes: usize) {
        if n_probes <= MAX_N_PROBES {
            return;
        }
        if self.n_keys < self.buckets.len() / 4 && !self.unbalanced_warned {
            log::warn!(
                "hash table is unbalanced: {} keys in {} buckets probed {} steps",
                self.n_keys,
                self.buckets.len(),
                n_probes
            );
            self.unbalanced_warned = true;
        }
        if self.n_keys < self.buckets.len() / 16 {
            panic!("hash table is severely unbalanced; the hash function is unusable");
        }
        self.reserve_n_buckets((self.buckets.len() as f64 * BALANCE_GROWTH).ceil() as usize);
    }
}

impl<K: PartialEq, V> RawTable<K, V> {
    /// Inserts `key` or combines `value` into its existing slot with
    /// `reducer`.
    ///
    /// Panics if the balance guard finds the table severely unbalanced,
    /// which indicates an unusable hash function.
    pub fn set<F>(&mut self, key: K, hash: u64, value: V, reducer: F)
    where
        F: Fn(&mut V, V),
    {
        let n_buckets = self.buckets.len();
        let mut bucket_id = (hash % n_buckets as u64) as usize;
        let mut n_probes = 0;
        let mut inserted = false;
        loop {
            if n_probes >= n_buckets {
                break;
            }
            match &mut self.buckets[bucket_id] {
                Some(entry) if entry.key_equals(&key, hash) => {
                    reducer(&mut entry.value, value);
                    break;
                }
                Some(_) => {
                    n_probes += 1;
                    bucket_id = (bucket_id + 1) % n_buckets;
                }
                slot => {
                    *slot = Some(TableEntry::new(key, hash, value));
                    inserted = true;
                    break;
                }
            }
        }
        if inserted {
            self.n_keys += 1;
            if self.buckets.len() as f64 * f64::from(self.max_load_factor) <= self.n_keys as f64 {
                self.reserve_n_buckets((self.buckets.len() as f64 * LOAD_GROWTH).ceil() as usize);
            }
        }
        self.check_balance(n_probes);
    }

    /// Returns a copy of the value for `key`, or `default` when absent.
    pub fn get(&self, key: &K, hash: u64, default: V) -> V
    where
        V: Clone,
    {
        let n_buckets = self.buckets.len();
        let mut bucket_id = (hash % n_buckets as u64) as usize;
        let mut n_probes = 0;
        while n_probes < n_buckets {
            match &self.buckets[bucket_id] {
                None => return default,
                Some(entry) if entry.key_equals(key, hash) => return entry.value.clone(),
                Some(_) => {
                    n_probes += 1;
                    bucket_id = (bucket_id + 1) % n_buckets;
                }
            }
        }
        default
    }

    /// Whether `key` is present.
    pub fn has(&self, key: &K, hash: u64) -> bool {
        let n_buckets = self.buckets.len();
        let mut bucket_id = (hash % n_buckets as u64) as usize;
        let mut n_probes = 0;
        while n_probes < n_buckets {
            match &self.buckets[bucket_id] {
                None => return false,
                Some(entry) if entry.key_equals(key, hash) => return true,
                Some(_) => {
                    n_probes += 1;
                    bucket_id = (bucket_id + 1) % n_buckets;
                }
            }
        }
        false
    }

    /// Removes `key` if present, repairing the probe chain behind it.
    ///
    /// Uses standard open-addressing backward shift: after emptying the
    /// slot, every subsequent filled bucket moves into the hole iff the
    /// hole lies on the cyclic arc between the bucket's home and its
    /// current position. Stops at the first naturally empty bucket.
    pub fn unset(&mut self, key: &K, hash: u64) {
        let n_buckets = self.buckets.len();
        let mut bucket_id = (hash % n_buckets as u64) as usize;
        let mut n_probes = 0;
        while n_probes < n_buckets {
            match &self.buckets[bucket_id] {
                None => return,
                Some(entry) if entry.key_equals(key, hash) => {
                    self.buckets[bucket_id] = None;
                    self.n_keys -= 1;
                    let mut hole = bucket_id;
                    let mut probe = (hole + 1) % n_buckets;
                    loop {
                        let origin = match &self.buckets[probe] {
                            Some(entry) => (entry.hash % n_buckets as u64) as usize,
                            None => break,
                        };
                        let fills_hole = (probe < origin && origin <= hole)
                            || (origin <= hole && hole < probe)
                            || (hole < probe && probe < origin);
                        if fills_hole {
                            self.buckets[hole] = self.buckets[probe].take();
                            hole = probe;
                        }
                        probe = (probe + 1) % n_buckets;
                    }
                    return;
                }
                Some(_) => {
                    n_probes += 1;
                    bucket_id = (bucket_id + 1) % n_buckets;
                }
            }
        }
    }
}

impl<K, V> RawTable<K, V> {
    /// Visits every filled entry in physical bucket order.
    ///
    /// The order is unspecified and not stable across rehashes.
    pub fn for_each<F>(&self, mut handler: F)
    where
        F: FnMut(&K, u64, &V),
    {
        if self.n_keys == 0 {
            return;
        }
        for entry in self.buckets.iter().flatten() {
            handler(&entry.key, entry.hash, &entry.value);
        }
    }

    /// Drains every filled entry by value, leaving the table empty.
    pub fn take_each<F>(&mut self, mut handler: F)
    where
        F: FnMut(K, u64, V),
    {
        if self.n_keys == 0 {
            return;
        }
        for slot in &mut self.buckets {
            if let Some(entry) = slot.take() {
                handler(entry.key, entry.hash, entry.value);
            }
        }
        self.n_keys = 0;
    }

    /// Appends the wire form: the key count followed by each filled
    /// `(key, value)` pair. Hashes and bucket layout are not serialized;
    /// the parser re-hashes with its own hasher.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) -> Result<(), Error>
    where
        K: Serialize,
        V: Serialize,
    {
        codec::write_value(buf, &(self.n_keys as u64))?;
        for entry in self.buckets.iter().flatten() {
            codec::write_value(buf, &entry.key)?;
            codec::write_value(buf, &entry.value)?;
        }
        Ok(())
    }
}

/// Smallest admissible bucket count ≥ `n_buckets_min` (with ~25%
/// headroom), as a product of selected primes.
fn rehash_bucket_count(n_buckets_min: usize) -> usize {
    let mut remaining = n_buckets_min + n_buckets_min / 4;
    let mut count = 1usize;
    while remaining > LAST_PRIME {
        remaining /= GROWTH_PRIME;
        count *= GROWTH_PRIME;
    }
    let index = PRIMES.partition_point(|&prime| prime < remaining);
    count * PRIMES[index]
}
