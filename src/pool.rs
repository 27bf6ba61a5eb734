//! Thread-pool interface consumed by the concurrent containers.
//!
//! The containers need exactly two things from the runtime: the configured
//! thread count (fixed for the life of the process) and the id of the
//! thread executing the current parallel iteration. Both come from rayon's
//! global pool, which also supplies the dynamic chunked parallel loops via
//! `par_iter`.
//!
//! Calls from outside the pool report thread id 0. Per-thread caches are
//! lock-protected, so an off-pool writer sharing slot 0 with pool thread 0
//! is a contention case, not a correctness case.

/// Number of worker threads in the pool.
pub fn n_threads() -> usize {
    rayon::current_num_threads()
}

/// Id of the calling pool thread, in `0..n_threads()`.
pub fn thread_index() -> usize {
    rayon::current_thread_index().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;

    #[test]
    fn test_thread_index_stays_in_range() {
        let n = n_threads();
        assert!(n >= 1);
        (0..1000).into_par_iter().for_each(|_| {
            assert!(thread_index() < n);
        });
    }

    #[test]
    fn test_outside_the_pool_maps_to_zero() {
        assert_eq!(thread_index(), 0);
    }
}
