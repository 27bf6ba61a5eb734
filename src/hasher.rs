//! Hashing building blocks.
//!
//! The containers never compute hashes themselves: the public facades
//! hash each key exactly once and thread the 64-bit value through every
//! layer. The default build hasher must therefore be deterministic across
//! processes: routing computes `hash % P` on the writing rank and the
//! owning rank recomputes the same hash at parse time. A randomly seeded
//! hasher (like the std `RandomState`) would scatter the partition.
//!
//! xxh3 is fast, high quality, and seed-stable by default.

use core::hash::{BuildHasher, Hasher};

use xxhash_rust::xxh3::Xxh3;

/// Default build hasher for all containers: unseeded xxh3.
///
/// Stateless, so every instance on every process produces identical
/// hashes for identical keys.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultHashBuilder;

impl BuildHasher for DefaultHashBuilder {
    type Hasher = Xxh3;

    fn build_hasher(&self) -> Self::Hasher {
        Xxh3::new()
    }
}

/// Build hasher adapter that divides every hash by the rank count.
///
/// The distributed overlay routes a key by `hash % P` and probes inside
/// the owning process with the quotient `hash / P`, so that intra-process
/// bucket selection is uncorrelated with the partition bits. Wrapping the
/// inner build hasher this way makes parse-time re-hashing on the
/// receiving rank reproduce the quotient without any extra bookkeeping.
#[derive(Clone, Debug)]
pub struct RankQuotient<S> {
    inner: S,
    n_ranks: u64,
}

impl<S> RankQuotient<S> {
    /// Wraps `inner`, dividing its output by `n_ranks`.
    pub fn new(inner: S, n_ranks: usize) -> Self {
        Self {
            inner,
            n_ranks: n_ranks.max(1) as u64,
        }
    }
}

impl<S: BuildHasher> BuildHasher for RankQuotient<S> {
    type Hasher = QuotientHasher<S::Hasher>;

    fn build_hasher(&self) -> Self::Hasher {
        QuotientHasher {
            inner: self.inner.build_hasher(),
            n_ranks: self.n_ranks,
        }
    }
}

/// Hasher produced by [`RankQuotient`].
#[derive(Debug)]
pub struct QuotientHasher<H> {
    inner: H,
    n_ranks: u64,
}

impl<H: Hasher> Hasher for QuotientHasher<H> {
    #[inline]
    fn finish(&self) -> u64 {
        self.inner.finish() / self.n_ranks
    }

    #[inline]
    fn write(&mut self, bytes: &[u8]) {
        self.inner.write(bytes);
    }
}
