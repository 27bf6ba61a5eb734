#![doc = include_str!("../README.md")]
//!
//! ---
//!
//! # Crate tour
//!
//! | Layer | Types | Thread-safe | Cross-process |
//! |-------|-------|-------------|---------------|
//! | core | [`HashMap`], [`HashSet`] | no | no |
//! | concurrent | [`ConcurrentHashMap`], [`ConcurrentHashSet`] | yes | no |
//! | distributed | [`DistHashMap`], [`DistHashSet`], [`DistRange`] | yes | yes |
//!
//! The layers compose: a distributed map holds one concurrent map as its
//! local shard and one per remote rank as outbound buffers; a concurrent
//! map holds one single-threaded table per segment and per thread cache.
//! The 64-bit hash is computed once at the outermost facade and threaded
//! through all of them.
//!
//! # The `async_set` / `sync` contract
//!
//! `async_set` never blocks and never talks to the network: it lands in a
//! segment if its lock is free, in the calling thread's cache otherwise,
//! and in an outbound buffer when another rank owns the key. The
//! aggregate is undefined until `sync`, a collective on the distributed
//! layer, has run everywhere. Reducers used across ranks must be
//! associative and commutative.
//!
//! # Consumed interfaces
//!
//! - [`comm::Comm`] for messaging: rank id, tagged sends/receives, scalar
//!   collectives. `SoloComm` (one rank) and `LocalComm` (P ranks as
//!   threads, channel-backed) ship with the crate.
//! - [`pool`] for threading: thread count and current thread id, backed
//!   by rayon's global pool.
//! - [`codec::Serial`] for serialization: byte-level serialize/parse
//!   hooks, backed by serde + bincode.

/// Bucket record shared by every table flavor.
pub mod entry;

/// Hash-explicit linear-probing table core.
///
/// Internal infrastructure: prime-product bucket selection, load-factor
/// rehashing, the balance guard, backward-shift deletion. Most users want
/// the typed facades instead.
pub mod table;

/// Named combiner functions (`keep`, `overwrite`, `sum`, `min`, `max`).
pub mod reducer;

/// Single-threaded hash map facade.
pub mod map;

/// Single-threaded hash set facade.
pub mod set;

/// Default build hasher and the rank-quotient adapter.
pub mod hasher;

/// Serialization trait and bincode helpers.
pub mod codec;

/// Error taxonomy.
pub mod error;

/// Thread-pool interface (rayon-backed).
pub mod pool;

/// Thread-safe segmented containers with per-thread write caches.
pub mod concurrent;

/// Messaging interface and the in-process transports.
pub mod comm;

/// Broadcast and gather of arbitrary serializable values.
pub mod collective;

/// Distributed containers and the all-to-all shuffle.
pub mod dist;

pub use concurrent::{ConcurrentHashMap, ConcurrentHashSet};
pub use dist::{DistHashMap, DistHashSet, DistRange};
pub use error::{CommError, Error};
pub use map::HashMap;
pub use set::HashSet;
