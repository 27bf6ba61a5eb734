//! Messaging interface consumed by the distributed containers.
//!
//! The containers are generic over a [`Comm`] transport that supplies the
//! rank id, the process count, tagged point-to-point byte messages, and
//! the scalar collectives (byte/`u64` broadcast, `u64` all-gather and sum
//! all-reduce). Sends are buffered and never block; receives block until
//! the matching message arrives. The distributed shuffle posts its send
//! before its receive to overlap the two directions.
//!
//! All collective methods must be called by every rank, in matching order
//! with respect to other collectives.
//!
//! Two transports ship with the crate:
//!
//! - [`SoloComm`]: the single-rank transport; every collective is
//!   trivial and point-to-point traffic is a caller bug.
//! - [`LocalComm`]: a channel mesh that runs P ranks as threads of one
//!   process. The test suite drives the full shuffle over it; it also
//!   serves as the reference implementation of the wire contract for
//!   an MPI-backed transport.

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::error::CommError;

/// Message tags. The shuffle announces each payload's size on
/// [`Tag::Size`] and streams its chunks on [`Tag::Payload`];
/// [`Tag::Collective`] carries broadcast and gather traffic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tag {
    /// Size exchange preceding a payload (tag 0).
    Size = 0,
    /// Payload chunks (tag 1).
    Payload = 1,
    /// Internal collective traffic.
    Collective = 2,
}

const N_TAGS: usize = 3;

/// A cross-process messaging endpoint.
pub trait Comm: Send + Sync {
    /// This process's rank, in `0..n_ranks()`.
    fn rank(&self) -> usize;

    /// Number of cooperating processes.
    fn n_ranks(&self) -> usize;

    /// Buffered, non-blocking send of one tagged message to `dest`.
    fn send(&self, dest: usize, tag: Tag, payload: Vec<u8>) -> Result<(), CommError>;

    /// Blocking receive of the next tagged message from `src`.
    fn recv(&self, src: usize, tag: Tag) -> Result<Vec<u8>, CommError>;

    /// Broadcasts `buf` from `root` to every rank. The buffer must have
    /// the same length on all ranks.
    fn broadcast_bytes(&self, root: usize, buf: &mut [u8]) -> Result<(), CommError>;

    /// Gathers one `u64` from every rank, indexed by rank, on every rank.
    fn all_gather_u64(&self, value: u64) -> Result<Vec<u64>, CommError>;

    /// Whether this rank is rank 0.
    fn is_root(&self) -> bool {
        self.rank() == 0
    }

    /// [`send`](Self::send) of one `u64` scalar.
    fn send_u64(&self, dest: usize, tag: Tag, value: u64) -> Result<(), CommError> {
        self.send(dest, tag, value.to_le_bytes().to_vec())
    }

    /// [`recv`](Self::recv) of one `u64` scalar.
    fn recv_u64(&self, src: usize, tag: Tag) -> Result<u64, CommError> {
        let bytes = self.recv(src, tag)?;
        let scalar: [u8; 8] = bytes.as_slice().try_into().map_err(|_| CommError::SizeMismatch {
            expected: 8,
            got: bytes.len(),
        })?;
        Ok(u64::from_le_bytes(scalar))
    }

    /// [`broadcast_bytes`](Self::broadcast_bytes) of one `u64` scalar.
    fn broadcast_u64(&self, root: usize, value: &mut u64) -> Result<(), CommError> {
        let mut buf = value.to_le_bytes();
        self.broadcast_bytes(root, &mut buf)?;
        *value = u64::from_le_bytes(buf);
        Ok(())
    }

    /// Sum of one `u64` from every rank, on every rank.
    fn all_reduce_sum(&self, value: u64) -> Result<u64, CommError> {
        Ok(self.all_gather_u64(value)?.into_iter().sum())
    }
}

/// The single-rank transport.
#[derive(Clone, Copy, Debug, Default)]
pub struct SoloComm;

impl Comm for SoloComm {
    fn rank(&self) -> usize {
        0
    }

    fn n_ranks(&self) -> usize {
        1
    }

    fn send(&self, dest: usize, _tag: Tag, _payload: Vec<u8>) -> Result<(), CommError> {
        Err(CommError::UnknownPeer(dest))
    }

    fn recv(&self, src: usize, _tag: Tag) -> Result<Vec<u8>, CommError> {
        Err(CommError::UnknownPeer(src))
    }

    fn broadcast_bytes(&self, root: usize, _buf: &mut [u8]) -> Result<(), CommError> {
        if root != 0 {
            return Err(CommError::UnknownPeer(root));
        }
        Ok(())
    }

    fn all_gather_u64(&self, value: u64) -> Result<Vec<u64>, CommError> {
        Ok(vec![value])
    }
}

/// A channel-mesh transport running P ranks as threads of one process.
///
/// [`split`](LocalComm::split) builds the full mesh up front, one
/// unbounded channel per (tag, sender, receiver) triple, and hands one
/// endpoint per rank to be moved into its thread. Dropping an endpoint
/// disconnects its channels; peers blocked on it observe
/// [`CommError::Disconnected`].
pub struct LocalComm {
    rank: usize,
    n_ranks: usize,
    /// Outgoing ends, indexed `[tag][dest]`.
    senders: Vec<Vec<Sender<Vec<u8>>>>,
    /// Incoming ends, indexed `[tag][src]`.
    receivers: Vec<Vec<Receiver<Vec<u8>>>>,
}

impl LocalComm {
    /// Builds endpoints for `n_ranks` cooperating ranks.
    pub fn split(n_ranks: usize) -> Vec<Self> {
        assert!(n_ranks >= 1, "a communicator needs at least one rank");
        // links[tag][from][to]
        let links: Vec<Vec<Vec<(Sender<Vec<u8>>, Receiver<Vec<u8>>)>>> = (0..N_TAGS)
            .map(|_| {
                (0..n_ranks)
                    .map(|_| (0..n_ranks).map(|_| unbounded()).collect())
                    .collect()
            })
            .collect();
        (0..n_ranks)
            .map(|rank| {
                let senders = (0..N_TAGS)
                    .map(|tag| (0..n_ranks).map(|to| links[tag][rank][to].0.clone()).collect())
                    .collect();
                let receivers = (0..N_TAGS)
                    .map(|tag| (0..n_ranks).map(|from| links[tag][from][rank].1.clone()).collect())
                    .collect();
                Self {
                    rank,
                    n_ranks,
                    senders,
                    receivers,
                }
            })
            .collect()
    }

    fn check_peer(&self, peer: usize) -> Result<(), CommError> {
        if peer >= self.n_ranks {
            return Err(CommError::UnknownPeer(peer));
        }
        Ok(())
    }
}

impl Comm for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn n_ranks(&self) -> usize {
        self.n_ranks
    }

    fn send(&self, dest: usize, tag: Tag, payload: Vec<u8>) -> Result<(), CommError> {
        self.check_peer(dest)?;
        self.senders[tag as usize][dest]
            .send(payload)
            .map_err(|_| CommError::Disconnected)
    }

    fn recv(&self, src: usize, tag: Tag) -> Result<Vec<u8>, CommError> {
        self.check_peer(src)?;
        self.receivers[tag as usize][src]
            .recv()
            .map_err(|_| CommError::Disconnected)
    }

    fn broadcast_bytes(&self, root: usize, buf: &mut [u8]) -> Result<(), CommError> {
        self.check_peer(root)?;
        if self.rank == root {
            for dest in 0..self.n_ranks {
                if dest != root {
                    self.send(dest, Tag::Collective, buf.to_vec())?;
                }
            }
        } else {
            let bytes = self.recv(root, Tag::Collective)?;
            if bytes.len() != buf.len() {
                return Err(CommError::SizeMismatch {
                    expected: buf.len(),
                    got: bytes.len(),
                });
            }
            buf.copy_from_slice(&bytes);
        }
        Ok(())
    }

    fn all_gather_u64(&self, value: u64) -> Result<Vec<u64>, CommError> {
        for dest in 0..self.n_ranks {
            if dest != self.rank {
                self.send_u64(dest, Tag::Collective, value)?;
            }
        }
        (0..self.n_ranks)
            .map(|src| {
                if src == self.rank {
                    Ok(value)
                } else {
                    self.recv_u64(src, Tag::Collective)
                }
            })
            .collect()
    }
}

impl core::fmt::Debug for LocalComm {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LocalComm")
            .field("rank", &self.rank)
            .field("n_ranks", &self.n_ranks)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn run_on_ranks<F>(n_ranks: usize, body: F)
    where
        F: Fn(LocalComm) + Send + Sync + Clone + 'static,
    {
        let handles: Vec<_> = LocalComm::split(n_ranks)
            .into_iter()
            .map(|comm| {
                let body = body.clone();
                thread::spawn(move || body(comm))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_solo_comm_is_trivial() {
        let comm = SoloComm;
        assert_eq!(comm.rank(), 0);
        assert_eq!(comm.n_ranks(), 1);
        assert!(comm.is_root());
        assert_eq!(comm.all_gather_u64(7).unwrap(), vec![7]);
        assert_eq!(comm.all_reduce_sum(7).unwrap(), 7);
        assert!(comm.send(1, Tag::Size, Vec::new()).is_err());
    }

    #[test]
    fn test_point_to_point_ring() {
        run_on_ranks(4, |comm| {
            let next = (comm.rank() + 1) % comm.n_ranks();
            let prev = (comm.rank() + comm.n_ranks() - 1) % comm.n_ranks();
            comm.send_u64(next, Tag::Payload, comm.rank() as u64).unwrap();
            let received = comm.recv_u64(prev, Tag::Payload).unwrap();
            assert_eq!(received, prev as u64);
        });
    }

    #[test]
    fn test_broadcast_from_root() {
        run_on_ranks(3, |comm| {
            let mut buf = if comm.is_root() {
                vec![1u8, 2, 3, 4]
            } else {
                vec![0u8; 4]
            };
            comm.broadcast_bytes(0, &mut buf).unwrap();
            assert_eq!(buf, [1, 2, 3, 4]);
        });
    }

    #[test]
    fn test_all_gather_and_all_reduce() {
        run_on_ranks(4, |comm| {
            let gathered = comm.all_gather_u64(comm.rank() as u64).unwrap();
            assert_eq!(gathered, vec![0, 1, 2, 3]);
            assert_eq!(comm.all_reduce_sum(comm.rank() as u64).unwrap(), 6);
        });
    }

    #[test]
    fn test_tags_keep_streams_apart() {
        run_on_ranks(2, |comm| {
            let peer = 1 - comm.rank();
            comm.send_u64(peer, Tag::Size, 10).unwrap();
            comm.send_u64(peer, Tag::Payload, 20).unwrap();
            // Receive in the opposite order of the sends.
            assert_eq!(comm.recv_u64(peer, Tag::Payload).unwrap(), 20);
            assert_eq!(comm.recv_u64(peer, Tag::Size).unwrap(), 10);
        });
    }

    #[test]
    fn test_unknown_peer_is_rejected() {
        let mut comms = LocalComm::split(2);
        let comm = comms.remove(0);
        assert!(matches!(
            comm.send(5, Tag::Size, Vec::new()),
            Err(CommError::UnknownPeer(5))
        ));
    }
}
