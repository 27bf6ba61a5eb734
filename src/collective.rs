//! Broadcast and gather of arbitrary serializable values.
//!
//! Both collectives move opaque [`Serial`] byte streams over the
//! transport's primitive broadcast, in bounded chunks: broadcasts of
//! payloads are chunked at 1 GiB to respect transports whose counts are
//! 32-bit, and gather streams at 1 MiB per chunk. Every rank must call
//! these in matching order.

use crate::codec::Serial;
use crate::comm::Comm;
use crate::error::Error;

/// Chunk bound for [`broadcast`] payloads.
const BROADCAST_CHUNK: usize = 1 << 30;

/// Chunk bound for [`gather`] payload rounds.
const GATHER_CHUNK: usize = 1 << 20;

/// Broadcasts `value` from `root` to every rank.
///
/// The root serializes once and announces the byte size; non-roots
/// allocate, receive the chunks, and parse in place. On the root the
/// value is left untouched.
pub fn broadcast<T, C>(comm: &C, root: usize, value: &mut T) -> Result<(), Error>
where
    T: Serial,
    C: Comm + ?Sized,
{
    let mut buf = Vec::new();
    if comm.rank() == root {
        value.serialize(&mut buf)?;
    }
    let mut count = buf.len() as u64;
    comm.broadcast_u64(root, &mut count)?;
    if comm.rank() != root {
        buf = vec![0u8; count as usize];
    }
    for chunk in buf.chunks_mut(BROADCAST_CHUNK) {
        comm.broadcast_bytes(root, chunk)?;
    }
    if comm.rank() != root {
        value.parse(&mut buf.as_slice())?;
    }
    Ok(())
}

/// All-gathers `value`: returns every rank's value, indexed by rank, on
/// every rank.
///
/// Sizes are all-gathered first, then each rank's bytes are broadcast
/// from that rank in ≤ 1-MiB chunks. Each received stream is parsed into
/// a clone of the local value (cleared by its `parse`), so the result
/// slots carry the local value's configuration (hasher, segment layout)
/// with the sender's entries.
pub fn gather<T, C>(comm: &C, value: &T) -> Result<Vec<T>, Error>
where
    T: Serial + Clone,
    C: Comm + ?Sized,
{
    let mut buf = Vec::new();
    value.serialize(&mut buf)?;
    let counts = comm.all_gather_u64(buf.len() as u64)?;

    let mut gathered = Vec::with_capacity(comm.n_ranks());
    for (root, &count) in counts.iter().enumerate() {
        let mut root_buf = if comm.rank() == root {
            buf.clone()
        } else {
            vec![0u8; count as usize]
        };
        for chunk in root_buf.chunks_mut(GATHER_CHUNK) {
            comm.broadcast_bytes(root, chunk)?;
        }
        let mut parsed = value.clone();
        parsed.parse(&mut root_buf.as_slice())?;
        gathered.push(parsed);
    }
    Ok(gathered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SoloComm;

    #[test]
    fn test_solo_broadcast_keeps_the_value() {
        let comm = SoloComm;
        let mut value = 42i64;
        broadcast(&comm, 0, &mut value).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_solo_gather_yields_one_slot() {
        let comm = SoloComm;
        let gathered = gather(&comm, &7u64).unwrap();
        assert_eq!(gathered, vec![7]);
    }
}
