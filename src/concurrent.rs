//! Thread-safe concurrent containers using segmented storage.
//!
//! # Architecture
//!
//! Each concurrent container shards its key space across S independent
//! segments, each a single-threaded [`RawTable`](crate::table::RawTable)
//! behind its own `parking_lot::Mutex`:
//!
//! ```text
//! hash & (S-1)  ──▶  segment selection
//!
//! ┌─────────────┐ ┌─────────────┐     ┌─────────────┐
//! │  Segment 0  │ │  Segment 1  │ ... │ Segment S-1 │
//! │  [Mutex]    │ │  [Mutex]    │     │  [Mutex]    │
//! │  RawTable   │ │  RawTable   │     │  RawTable   │
//! └─────────────┘ └─────────────┘     └─────────────┘
//!
//!       per-thread write caches (one RawTable per pool thread)
//! ┌─────────────┐ ┌─────────────┐     ┌─────────────┐
//! │   Cache 0   │ │   Cache 1   │ ... │  Cache T-1  │
//! └─────────────┘ └─────────────┘     └─────────────┘
//! ```
//!
//! `set` locks the target segment. `async_set` only *try*-locks it: when
//! the segment is contended the update lands in the calling thread's
//! private cache instead, so the write path never blocks. A collective
//! [`sync`](map::ConcurrentHashMap::sync) drains all caches back through
//! the segment locks; it must run before any consumer reads the
//! aggregate.
//!
//! # Segment count
//!
//! S is fixed at construction to the smallest power of two ≥ 4·T, where T
//! is the pool's thread count (minimum 16). A power of two makes segment
//! selection a bit mask, and 4·T keeps the collision probability of two
//! threads on one lock low. S never changes during the container's
//! lifetime.

pub mod map;
pub mod set;

pub use self::map::ConcurrentHashMap;
pub use self::set::ConcurrentHashSet;

/// Segment count for a pool of `n_threads`: the smallest power of two
/// ≥ `4 * n_threads`, with a floor of 16.
pub(crate) fn segment_count(n_threads: usize) -> usize {
    let mut n_segments = 4;
    while n_segments < n_threads {
        n_segments <<= 1;
    }
    n_segments << 2
}
