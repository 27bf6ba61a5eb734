//! Serialization glue.
//!
//! Arbitrary keys and values ride on serde + bincode. The container types
//! cooperate by implementing [`Serial`]: an opaque `serialize` that
//! appends to a byte buffer and a `parse` that consumes from a byte slice
//! *into an existing instance*. Parsing into an existing instance matters
//! for the containers: a distributed buffer carries its hasher and its
//! segment layout, and re-inserting incoming entries through the
//! destination's own configuration is what keeps the partition and the
//! probe hashes consistent.
//!
//! Wire formats are entry-level, never bucket-level: a table serializes
//! its key count followed by its `(key, value)` pairs, and the parser
//! re-hashes every key with the destination's hasher. Bucket counts and
//! segment counts may therefore differ between the writing and the
//! reading side without loss.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Error;

/// A value that can be serialized to bytes and parsed back in place.
///
/// Implemented for the container types, for the primitive scalars, for
/// `String` and for `Vec`s of serde-compatible elements. User types that
/// already implement serde can delegate to [`write_value`] /
/// [`read_value`] in a two-line impl.
pub trait Serial {
    /// Appends the serialized form of `self` to `buf`.
    fn serialize(&self, buf: &mut Vec<u8>) -> Result<(), Error>;

    /// Replaces `self` with the value parsed from the front of `bytes`,
    /// advancing the slice past the consumed bytes.
    fn parse(&mut self, bytes: &mut &[u8]) -> Result<(), Error>;
}

/// Appends one bincode-encoded value to `buf`.
pub fn write_value<T: Serialize + ?Sized>(buf: &mut Vec<u8>, value: &T) -> Result<(), Error> {
    bincode::serialize_into(&mut *buf, value)?;
    Ok(())
}

/// Decodes one bincode value from the front of `bytes`, advancing it.
pub fn read_value<T: DeserializeOwned>(bytes: &mut &[u8]) -> Result<T, Error> {
    let value = bincode::deserialize_from(&mut *bytes)?;
    Ok(value)
}

macro_rules! impl_serial_for_scalar {
    ($($t:ty),* $(,)?) => {$(
        impl Serial for $t {
            fn serialize(&self, buf: &mut Vec<u8>) -> Result<(), Error> {
                write_value(buf, self)
            }

            fn parse(&mut self, bytes: &mut &[u8]) -> Result<(), Error> {
                *self = read_value(bytes)?;
                Ok(())
            }
        }
    )*};
}

impl_serial_for_scalar!(
    i8, i16, i32, i64, i128, u8, u16, u32, u64, u128, isize, usize, f32, f64, bool, char, String,
);

impl<T: Serialize + DeserializeOwned> Serial for Vec<T> {
    fn serialize(&self, buf: &mut Vec<u8>) -> Result<(), Error> {
        write_value(buf, self)
    }

    fn parse(&mut self, bytes: &mut &[u8]) -> Result<(), Error> {
        *self = read_value(bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_round_trip() {
        let mut buf = Vec::new();
        Serial::serialize(&42i64, &mut buf).unwrap();
        Serial::serialize(&"hello".to_string(), &mut buf).unwrap();

        let mut bytes = buf.as_slice();
        let mut n = 0i64;
        n.parse(&mut bytes).unwrap();
        let mut s = String::new();
        s.parse(&mut bytes).unwrap();

        assert_eq!(n, 42);
        assert_eq!(s, "hello");
        assert!(bytes.is_empty());
    }

    #[test]
    fn test_vec_round_trip() {
        let mut buf = Vec::new();
        Serial::serialize(&vec![1u64, 2, 3], &mut buf).unwrap();

        let mut bytes = buf.as_slice();
        let mut v: Vec<u64> = Vec::new();
        v.parse(&mut bytes).unwrap();
        assert_eq!(v, [1, 2, 3]);
    }

    #[test]
    fn test_parse_of_truncated_input_fails() {
        let mut buf = Vec::new();
        Serial::serialize(&7u64, &mut buf).unwrap();
        buf.truncate(3);

        let mut bytes = buf.as_slice();
        let mut n = 0u64;
        assert!(n.parse(&mut bytes).is_err());
    }
}
