//! Error taxonomy.
//!
//! Two fatal conditions never surface as values: a severely unbalanced
//! table (an unusable hash function, detected inside insertion) panics;
//! it indicates a bug no caller can recover from. Everything else
//! propagates as [`Error`].

use thiserror::Error;

/// Failures of the messaging transport.
#[derive(Error, Debug)]
pub enum CommError {
    /// The destination or root rank does not exist in this communicator.
    #[error("unknown peer rank {0}")]
    UnknownPeer(usize),

    /// A peer went away mid-collective. The current collective cannot
    /// complete; there is no retry.
    #[error("peer disconnected during exchange")]
    Disconnected,

    /// A received message did not have the agreed-upon size.
    #[error("payload size mismatch: expected {expected} bytes, got {got}")]
    SizeMismatch {
        /// Bytes the protocol called for.
        expected: usize,
        /// Bytes actually received.
        got: usize,
    },
}

/// Errors surfaced by container and collective operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Serialization or parsing failed.
    #[error("serialization failed: {0}")]
    Codec(#[from] bincode::Error),

    /// The messaging transport failed; the collective is aborted.
    #[error("communication failed: {0}")]
    Comm(#[from] CommError),

    /// A distributed lookup asked for a key owned by another rank.
    /// Queries are not routed; this indicates a caller bug.
    #[error("key is not locally cached on rank {rank}")]
    NotLocal {
        /// The rank that attempted the lookup.
        rank: usize,
    },
}
