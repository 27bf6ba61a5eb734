//! Distributed hash map.
//!
//! One concurrent local shard plus one outbound concurrent buffer per
//! rank. `async_set` routes by `hash % P` without touching the network;
//! the collective [`sync`](DistHashMap::sync) shuffles every buffer to
//! its owning rank and merges. See the [module docs](crate::dist) for the
//! shuffle algorithm.

use core::hash::{BuildHasher, Hash};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::Serial;
use crate::collective;
use crate::comm::{Comm, Tag};
use crate::concurrent::ConcurrentHashMap;
use crate::dist::shuffled_ranks;
use crate::error::{CommError, Error};
use crate::hasher::{DefaultHashBuilder, RankQuotient};
use crate::pool;

/// Staging bound for one direction of a paired exchange.
const EXCHANGE_CHUNK: usize = 1 << 20;

/// A hash map partitioned by hash across cooperating processes.
///
/// Thread-safe within each process: any number of threads may call
/// [`async_set`](Self::async_set) concurrently. `sync` takes `&mut self`,
/// so the type system guarantees no writer races the shuffle.
///
/// # Example (single rank)
///
/// ```
/// use std::sync::Arc;
/// use aggmap::comm::SoloComm;
/// use aggmap::{reducer, DistHashMap};
///
/// let mut map: DistHashMap<u64, u64, SoloComm> = DistHashMap::new(Arc::new(SoloComm));
/// for i in 0..100 {
///     map.async_set(i, 1, reducer::sum);
/// }
/// map.sync(reducer::sum).unwrap();
/// assert_eq!(map.get_local(&42, 0).unwrap(), 1);
/// ```
pub struct DistHashMap<K, V, C, S = DefaultHashBuilder> {
    comm: Arc<C>,
    hash_builder: S,
    local: ConcurrentHashMap<K, V, RankQuotient<S>>,
    remote: Vec<ConcurrentHashMap<K, V, RankQuotient<S>>>,
}

impl<K, V, C: Comm> DistHashMap<K, V, C, DefaultHashBuilder> {
    /// Creates an empty map over `comm` with the default hasher.
    pub fn new(comm: Arc<C>) -> Self {
        Self::with_hasher(comm, DefaultHashBuilder::default())
    }
}

impl<K, V, C: Comm, S: Clone> DistHashMap<K, V, C, S> {
    /// Creates an empty map over `comm` with the given build hasher.
    ///
    /// The hasher must be deterministic and identical on every rank;
    /// routing on the writer and probing on the owner both re-derive the
    /// same hash from the key.
    pub fn with_hasher(comm: Arc<C>, hash_builder: S) -> Self {
        let n_ranks = comm.n_ranks();
        let quotient = RankQuotient::new(hash_builder.clone(), n_ranks);
        let local = ConcurrentHashMap::with_hasher(quotient.clone());
        let remote = (0..n_ranks)
            .map(|_| ConcurrentHashMap::with_hasher(quotient.clone()))
            .collect();
        Self {
            comm,
            hash_builder,
            local,
            remote,
        }
    }
}

impl<K, V, C: Comm, S> DistHashMap<K, V, C, S> {
    /// This process's rank.
    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    /// Number of cooperating processes.
    pub fn n_ranks(&self) -> usize {
        self.comm.n_ranks()
    }

    /// Maximum load factor shared by the shard and the buffers.
    pub fn max_load_factor(&self) -> f32 {
        self.local.max_load_factor()
    }

    /// Sets the maximum load factor on the shard and every buffer.
    pub fn set_max_load_factor(&mut self, max_load_factor: f32) {
        self.local.set_max_load_factor(max_load_factor);
        for buffer in &mut self.remote {
            buffer.set_max_load_factor(max_load_factor);
        }
    }
}

impl<K, V, C, S> DistHashMap<K, V, C, S>
where
    K: Eq + Hash + Send + Sync,
    V: Send + Sync,
    C: Comm,
    S: BuildHasher + Sync,
{
    #[inline]
    fn route(&self, key: &K) -> (usize, u64) {
        let hash = self.hash_builder.hash_one(key);
        let n_ranks = self.comm.n_ranks() as u64;
        ((hash % n_ranks) as usize, hash / n_ranks)
    }

    /// Non-blocking insert: lands in the local shard when this rank owns
    /// the key, otherwise in the outbound buffer for the owning rank.
    ///
    /// Updates become globally visible only after every rank calls
    /// [`sync`](Self::sync).
    pub fn async_set<F>(&self, key: K, value: V, reducer: F)
    where
        F: Fn(&mut V, V),
    {
        let (dest, hash) = self.route(&key);
        if dest == self.comm.rank() {
            self.local.async_set_raw(key, hash, value, reducer);
        } else {
            self.remote[dest].async_set_raw(key, hash, value, reducer);
        }
    }

    /// Returns the synced value for a key this rank owns, or `default`
    /// when the key is absent.
    ///
    /// Fails with [`Error::NotLocal`] when the key belongs to another
    /// rank: queries are not routed.
    pub fn get_local(&self, key: &K, default: V) -> Result<V, Error>
    where
        V: Clone,
    {
        let (dest, hash) = self.route(key);
        if dest != self.comm.rank() {
            return Err(Error::NotLocal {
                rank: self.comm.rank(),
            });
        }
        Ok(self.local.get_raw(key, hash, default))
    }

    /// Synced key count across all ranks (collective).
    pub fn n_keys(&self) -> Result<usize, Error> {
        let total = self.comm.all_reduce_sum(self.local.n_keys() as u64)?;
        Ok(total as usize)
    }

    /// Total bucket count across all ranks (collective).
    pub fn n_buckets(&self) -> Result<usize, Error> {
        let total = self.comm.all_reduce_sum(self.local.n_buckets() as u64)?;
        Ok(total as usize)
    }

    /// Aggregate load factor across all ranks (collective).
    pub fn load_factor(&self) -> Result<f32, Error> {
        Ok(self.n_keys()? as f32 / self.n_buckets()? as f32)
    }

    /// Grows the shard for its share of `n_keys_min` keys and gives each
    /// outbound buffer a proportional slice.
    pub fn reserve(&self, n_keys_min: usize) {
        let n_ranks = self.comm.n_ranks();
        self.local.reserve(n_keys_min / n_ranks);
        for buffer in &self.remote {
            buffer.reserve(n_keys_min / n_ranks / n_ranks);
        }
    }

    /// Empties the shard and every buffer.
    pub fn clear(&self) {
        self.local.clear();
        for buffer in &self.remote {
            buffer.clear();
        }
    }

    /// Empties the shard and every buffer and releases their memory.
    pub fn clear_and_shrink(&self) {
        self.local.clear_and_shrink();
        for buffer in &self.remote {
            buffer.clear_and_shrink();
        }
    }

    /// Visits this rank's synced shard, parallelized over segments. The
    /// hash passed to the handler is the intra-process quotient.
    pub fn for_each<F>(&self, handler: F)
    where
        F: Fn(&K, u64, &V) + Sync,
    {
        self.local.for_each(handler);
    }

    /// The distributed shuffle (collective): moves every buffered update
    /// to its owning rank and merges with `reducer`.
    ///
    /// Every rank must call `sync` the same number of times, in matching
    /// order with other collectives. A sync on one rank (`P = 1`)
    /// performs zero exchanges and only flushes the local thread caches.
    pub fn sync<F>(&mut self, reducer: F) -> Result<(), Error>
    where
        F: Fn(&mut V, V) + Sync,
        K: Serialize + DeserializeOwned,
        V: Serialize + DeserializeOwned,
    {
        let n_ranks = self.comm.n_ranks();
        let rank = self.comm.rank();
        let order = shuffled_ranks(&*self.comm)?;
        let shuffled_id = order
            .iter()
            .position(|&r| r == rank)
            .ok_or(CommError::UnknownPeer(rank))?;

        let mut send_buf = Vec::new();
        for i in 1..n_ranks {
            let dest = order[(shuffled_id + i) % n_ranks];
            let src = order[(shuffled_id + n_ranks - i) % n_ranks];

            // Drain the outbound buffer for this destination into bytes.
            let buffer = &mut self.remote[dest];
            buffer.sync(&reducer);
            send_buf.clear();
            buffer.serialize(&mut send_buf)?;
            buffer.clear();

            // Size exchange (tag 0), send posted first.
            self.comm.send_u64(dest, Tag::Size, send_buf.len() as u64)?;
            let recv_total = self.comm.recv_u64(src, Tag::Size)? as usize;
            log::debug!(
                "shuffle step {i}: {} B to rank {dest}, {recv_total} B from rank {src}",
                send_buf.len()
            );

            // Chunked overlapped payload exchange (tag 1). Staging per
            // direction is bounded by EXCHANGE_CHUNK regardless of the
            // payload size.
            let mut recv_buf: Vec<u8> = Vec::with_capacity(recv_total);
            let mut sent = 0;
            while sent < send_buf.len() || recv_buf.len() < recv_total {
                let send_chunk = (send_buf.len() - sent).min(EXCHANGE_CHUNK);
                if send_chunk > 0 {
                    self.comm
                        .send(dest, Tag::Payload, send_buf[sent..sent + send_chunk].to_vec())?;
                    sent += send_chunk;
                }
                let recv_chunk = (recv_total - recv_buf.len()).min(EXCHANGE_CHUNK);
                if recv_chunk > 0 {
                    let chunk = self.comm.recv(src, Tag::Payload)?;
                    if chunk.len() != recv_chunk {
                        return Err(CommError::SizeMismatch {
                            expected: recv_chunk,
                            got: chunk.len(),
                        }
                        .into());
                    }
                    recv_buf.extend_from_slice(&chunk);
                }
            }

            // The buffer that just sent is empty again; reuse it as parse
            // scratch. Its quotient hasher reproduces the intra-process
            // hash for every incoming key.
            let scratch = &mut self.remote[dest];
            scratch.parse(&mut recv_buf.as_slice())?;
            let local = &self.local;
            scratch.drain_each(|key, hash, value| {
                local.set_raw(key, hash, value, &reducer);
            });
        }

        self.local.sync(&reducer);
        Ok(())
    }

    /// Visits every rank's shard on every rank, in rank order
    /// (collective). All shards are gathered first, so each rank performs
    /// an identical replicated pass.
    pub fn for_each_serial<F>(&self, mut handler: F) -> Result<(), Error>
    where
        F: FnMut(&K, u64, &V),
        K: Clone + Serialize + DeserializeOwned,
        V: Clone + Serialize + DeserializeOwned,
        S: Clone,
    {
        let shards = collective::gather(&*self.comm, &self.local)?;
        for shard in &shards {
            shard.for_each_serial(&mut handler);
        }
        Ok(())
    }

    /// Folds `mapper(key, value)` over every synced entry on every rank
    /// (collective): thread-local accumulation, then combination of the
    /// gathered per-rank accumulators, all through `reducer`.
    ///
    /// The reducer must be associative and commutative; the fold order is
    /// unspecified.
    pub fn mapreduce<V2, M, R>(&self, mapper: M, reducer: R, default: V2) -> Result<V2, Error>
    where
        V2: Serial + Clone + Send + Sync,
        M: Fn(&K, &V) -> V2 + Sync,
        R: Fn(&mut V2, V2) + Sync,
    {
        let n_threads = pool::n_threads();
        let slots: Vec<Mutex<V2>> = (0..n_threads).map(|_| Mutex::new(default.clone())).collect();
        self.local.for_each(|key, _hash, value| {
            let mut acc = slots[pool::thread_index() % n_threads].lock();
            reducer(&mut acc, mapper(key, value));
        });

        let mut local_acc = default;
        for slot in slots {
            reducer(&mut local_acc, slot.into_inner());
        }

        let mut gathered = collective::gather(&*self.comm, &local_acc)?.into_iter();
        let mut result = gathered.next().unwrap_or(local_acc);
        for acc in gathered {
            reducer(&mut result, acc);
        }
        Ok(result)
    }
}

impl<K, V, C, S> core::fmt::Debug for DistHashMap<K, V, C, S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DistHashMap")
            .field("n_ranks", &self.remote.len())
            .field("local", &self.local)
            .finish()
    }
}
