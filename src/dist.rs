//! Distributed containers partitioned across cooperating processes.
//!
//! # Partitioning
//!
//! A key with hash `h` belongs to the rank `h % P`. Within the owning
//! process the tables probe with the quotient `h / P`, so intra-process
//! bucket selection stays uncorrelated with the partition bits. Writers
//! never talk to the network directly: `async_set` lands either in the
//! local shard or in one of P outbound per-destination buffers, all of
//! them concurrent containers with the same try-lock/cache write path.
//!
//! # The shuffle
//!
//! A collective `sync` moves every buffered update to its owning rank.
//! Rank 0 broadcasts a random permutation of the ranks; at step `i` each
//! rank sends to the partner `i` ahead of it in the permutation and
//! receives from the partner `i` behind, so every pair exchanges exactly
//! once per sync and concurrent jobs don't all hammer the same links in
//! the same order. Each exchange announces its payload size, then streams
//! 1-MiB chunks with the send posted before the blocking receive, keeping
//! staging memory bounded and both directions busy. Received bytes are
//! parsed back into the (now empty) outbound buffer and merged into the
//! local shard under its segment locks; a final local `sync` drains the
//! thread caches.
//!
//! After `sync` returns on all ranks, every key lives on exactly one rank,
//! combined with the supplied reducer. Combination order is unspecified,
//! so reducers used across the shuffle must be associative and
//! commutative.

pub mod map;
pub mod range;
pub mod set;

pub use self::map::DistHashMap;
pub use self::range::{DistRange, RangeItem};
pub use self::set::DistHashSet;

use rand::seq::SliceRandom;

use crate::collective;
use crate::comm::Comm;
use crate::error::Error;

/// Random rank permutation, generated on rank 0 and broadcast to all.
///
/// Randomizing the pairing order spreads concurrent syncs across switch
/// links instead of synchronizing them on the same schedule.
pub(crate) fn shuffled_ranks<C: Comm>(comm: &C) -> Result<Vec<usize>, Error> {
    let n_ranks = comm.n_ranks();
    let mut order: Vec<u64> = (0..n_ranks as u64).collect();
    if comm.is_root() {
        order.shuffle(&mut rand::thread_rng());
    }
    collective::broadcast(comm, 0, &mut order)?;
    Ok(order.into_iter().map(|rank| rank as usize).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SoloComm;

    #[test]
    fn test_solo_shuffle_is_identity() {
        let order = shuffled_ranks(&SoloComm).unwrap();
        assert_eq!(order, vec![0]);
    }
}
