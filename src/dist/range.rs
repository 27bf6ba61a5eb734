//! Strided integer intervals distributed over (process × thread).
//!
//! [`DistRange`] represents `[start, end)` with a step. Rank r of P
//! executes the iterates `start + inc·r, start + inc·(r + P), …`, and
//! dispatches its share over the thread pool with dynamic chunking. The
//! scalar [`mapreduce`](DistRange::mapreduce) folds the whole interval to
//! one value on every rank; the map-emitting variant feeds a
//! [`DistHashMap`] and syncs it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rayon::prelude::*;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::Serial;
use crate::collective;
use crate::comm::Comm;
use crate::dist::DistHashMap;
use crate::error::Error;
use crate::pool;

/// Scheduling granularity of the inner parallel loop.
const SCHEDULE_CHUNK: usize = 5;

/// Integer types a [`DistRange`] can iterate over.
pub trait RangeItem: Copy + Send + Sync {
    /// The unit step.
    fn one() -> Self;

    /// Number of iterates of `start, start + inc, …` strictly below
    /// `end`.
    fn steps_between(start: Self, end: Self, inc: Self) -> usize;

    /// The iterate `start + inc * steps`.
    fn advance(start: Self, inc: Self, steps: usize) -> Self;
}

macro_rules! impl_range_item {
    ($($t:ty),* $(,)?) => {$(
        impl RangeItem for $t {
            #[inline]
            fn one() -> Self {
                1
            }

            #[inline]
            fn steps_between(start: Self, end: Self, inc: Self) -> usize {
                if end <= start {
                    0
                } else {
                    ((end - start + inc - 1) / inc) as usize
                }
            }

            #[inline]
            fn advance(start: Self, inc: Self, steps: usize) -> Self {
                start + inc * steps as $t
            }
        }
    )*};
}

impl_range_item!(i32, i64, isize, u32, u64, usize);

/// A strided interval `[start, end)` shared by all ranks and threads.
pub struct DistRange<T, C> {
    start: T,
    end: T,
    inc: T,
    comm: Arc<C>,
}

impl<T: RangeItem, C: Comm> DistRange<T, C> {
    /// Creates the interval `[start, end)` with a step of one.
    pub fn new(start: T, end: T, comm: Arc<C>) -> Self {
        Self::with_step(start, end, T::one(), comm)
    }

    /// Creates the interval `[start, end)` with step `inc`.
    pub fn with_step(start: T, end: T, inc: T, comm: Arc<C>) -> Self {
        Self {
            start,
            end,
            inc,
            comm,
        }
    }

    /// Runs `handler` over this rank's iterates, in parallel over the
    /// thread pool with dynamic chunks of ≈[`SCHEDULE_CHUNK`].
    ///
    /// With `verbose`, thread 0 reports progress in 10% steps through the
    /// `log` facade.
    pub fn for_each<F>(&self, handler: F, verbose: bool)
    where
        F: Fn(T) + Sync,
    {
        let rank = self.comm.rank();
        let n_ranks = self.comm.n_ranks();
        let n_total = T::steps_between(self.start, self.end, self.inc);
        let n_local = if rank < n_total {
            (n_total - rank).div_ceil(n_ranks)
        } else {
            0
        };

        let completed = AtomicUsize::new(0);
        let reported = AtomicUsize::new(0);
        (0..n_local)
            .into_par_iter()
            .with_min_len(SCHEDULE_CHUNK)
            .for_each(|step| {
                let t = T::advance(self.start, self.inc, rank + step * n_ranks);
                handler(t);
                if verbose {
                    completed.fetch_add(1, Ordering::Relaxed);
                    if pool::thread_index() == 0 {
                        let decile = completed.load(Ordering::Relaxed) * 10 / n_local.max(1);
                        if decile > reported.load(Ordering::Relaxed) {
                            reported.store(decile, Ordering::Relaxed);
                            log::info!("rank {rank}: {}%", decile * 10);
                        }
                    }
                }
            });
        if verbose {
            log::info!("rank {rank}: 100%");
        }
    }

    /// Folds `mapper` over the whole interval on every rank (collective):
    /// thread-local accumulation, then combination of the gathered
    /// per-rank accumulators, all through `reducer`.
    pub fn mapreduce<V2, M, R>(&self, mapper: M, reducer: R, default: V2) -> Result<V2, Error>
    where
        V2: Serial + Clone + Send + Sync,
        M: Fn(T) -> V2 + Sync,
        R: Fn(&mut V2, V2) + Sync,
    {
        let n_threads = pool::n_threads();
        let slots: Vec<Mutex<V2>> = (0..n_threads).map(|_| Mutex::new(default.clone())).collect();
        self.for_each(
            |t| {
                let mut acc = slots[pool::thread_index() % n_threads].lock();
                reducer(&mut acc, mapper(t));
            },
            false,
        );

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

    /// Runs `mapper` over the interval, feeding every emitted `(key,
    /// value)` pair into `map` via `async_set`, then syncs the map
    /// (collective).
    pub fn mapreduce_into<K, V, M, R, S>(
        &self,
        mapper: M,
        reducer: R,
        map: &mut DistHashMap<K, V, C, S>,
    ) -> Result<(), Error>
    where
        K: Eq + core::hash::Hash + Send + Sync + Serialize + DeserializeOwned,
        V: Send + Sync + Serialize + DeserializeOwned,
        M: Fn(T, &dyn Fn(K, V)) + Sync,
        R: Fn(&mut V, V) + Sync,
        S: core::hash::BuildHasher + Sync,
    {
        {
            let target = &*map;
            let emit = |key: K, value: V| target.async_set(key, value, &reducer);
            self.for_each(|t| mapper(t, &emit), false);
        }
        map.sync(&reducer)
    }
}

impl<T: core::fmt::Debug, C> core::fmt::Debug for DistRange<T, C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DistRange")
            .field("start", &self.start)
            .field("end", &self.end)
            .field("inc", &self.inc)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SoloComm;
    use crate::reducer;

    fn solo() -> Arc<SoloComm> {
        Arc::new(SoloComm)
    }

    #[test]
    fn test_steps_between_counts_strided_iterates() {
        assert_eq!(i64::steps_between(0, 10, 1), 10);
        assert_eq!(i64::steps_between(0, 10, 3), 4);
        assert_eq!(i64::steps_between(10, 10, 1), 0);
        assert_eq!(i64::steps_between(10, 0, 1), 0);
    }

    #[test]
    fn test_for_each_visits_every_iterate_once() {
        let range = DistRange::new(0usize, 10_000, solo());
        let hits: Vec<AtomicUsize> = (0..10_000).map(|_| AtomicUsize::new(0)).collect();
        range.for_each(|t| { hits[t].fetch_add(1, Ordering::Relaxed); }, false);
        assert!(hits.iter().all(|h| h.load(Ordering::Relaxed) == 1));
    }

    #[test]
    fn test_strided_range_respects_the_step() {
        let range = DistRange::with_step(1i64, 20, 4, solo());
        let sum = range.mapreduce(|t| t, reducer::sum, 0i64).unwrap();
        // 1 + 5 + 9 + 13 + 17
        assert_eq!(sum, 45);
    }

    #[test]
    fn test_mapreduce_sums_squares() {
        let range = DistRange::new(0i64, 100, solo());
        let sum = range.mapreduce(|t| t * t, reducer::sum, 0i64).unwrap();
        assert_eq!(sum, 328350);
    }

    #[test]
    fn test_mapreduce_into_populates_a_dist_map() {
        let comm = solo();
        let range = DistRange::new(0i64, 100, comm.clone());
        let mut map: DistHashMap<i64, i64, SoloComm> = DistHashMap::new(comm);
        range
            .mapreduce_into(
                |t, emit: &dyn Fn(i64, i64)| emit(t * t, 1),
                reducer::sum,
                &mut map,
            )
            .unwrap();
        assert_eq!(map.n_keys().unwrap(), 100);
        assert_eq!(map.get_local(&81, 0).unwrap(), 1);
    }
}
