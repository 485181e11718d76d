//! Key serializers.
//!
//! The engine itself orders keys by comparing their serialized bytes, so a
//! serializer must produce exactly `key_size` bytes whose lexicographic
//! order matches the logical order of the keys. Integers are therefore
//! written big-endian and strings are zero-padded on the right.

use bytes::{BufMut, Bytes, BytesMut};
use loam_common::{LoamError, Result};

/// Converts typed keys to and from fixed-width, order-preserving bytes.
pub trait KeySerializer {
    type Key;

    /// Serializes a key into exactly `key_size` bytes.
    fn serialize(&self, key: &Self::Key, key_size: usize) -> Result<Bytes>;

    /// Recovers a key from its serialized form.
    fn deserialize(&self, data: &[u8]) -> Self::Key;
}

/// Serializer for unsigned integer keys.
///
/// Big-endian with left zero-padding, so byte order equals numeric order
/// for any `key_size`.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntSerializer;

impl KeySerializer for IntSerializer {
    type Key = u64;

    fn serialize(&self, key: &u64, key_size: usize) -> Result<Bytes> {
        let be = key.to_be_bytes();
        if key_size >= 8 {
            let mut buf = BytesMut::with_capacity(key_size);
            buf.put_bytes(0, key_size - 8);
            buf.put_slice(&be);
            Ok(buf.freeze())
        } else {
            if be[..8 - key_size].iter().any(|&b| b != 0) {
                return Err(LoamError::BadKeySize {
                    size: 8,
                    expected: key_size,
                });
            }
            Ok(Bytes::copy_from_slice(&be[8 - key_size..]))
        }
    }

    fn deserialize(&self, data: &[u8]) -> u64 {
        let mut be = [0u8; 8];
        let take = data.len().min(8);
        be[8 - take..].copy_from_slice(&data[data.len() - take..]);
        u64::from_be_bytes(be)
    }
}

/// Serializer for UTF-8 string keys, zero-padded on the right.
///
/// Padding preserves order because no UTF-8 byte of a longer string sorts
/// below the 0 pad. Strings containing NUL bytes are rejected since they
/// could not be distinguished from padding.
#[derive(Debug, Clone, Copy, Default)]
pub struct StrSerializer;

impl KeySerializer for StrSerializer {
    type Key = String;

    fn serialize(&self, key: &String, key_size: usize) -> Result<Bytes> {
        let raw = key.as_bytes();
        if raw.len() > key_size || raw.contains(&0) {
            return Err(LoamError::BadKeySize {
                size: raw.len(),
                expected: key_size,
            });
        }
        let mut buf = BytesMut::with_capacity(key_size);
        buf.put_slice(raw);
        buf.put_bytes(0, key_size - raw.len());
        Ok(buf.freeze())
    }

    fn deserialize(&self, data: &[u8]) -> String {
        let end = data
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(data.len());
        String::from_utf8_lossy(&data[..end]).into_owned()
    }
}
