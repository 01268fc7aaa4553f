//! Entity prefix handling.
//!
//! Every encoded key begins with an 8-byte big-endian id. Codecs write the
//! owning table or index id there; a region proxy rewrites it to the
//! region id before the key reaches storage.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{CodecError, Result};

/// Length of the entity prefix in bytes.
pub const PREFIX_LEN: usize = 8;

pub fn encode_prefix(id: u64) -> [u8; PREFIX_LEN] {
    id.to_be_bytes()
}

/// Reads the prefix id of an encoded key.
pub fn prefix_of(key: &[u8]) -> Result<u64> {
    let head = key
        .get(..PREFIX_LEN)
        .ok_or(CodecError::KeyTooShort { len: key.len() })?;
    let mut arr = [0u8; PREFIX_LEN];
    arr.copy_from_slice(head);
    Ok(u64::from_be_bytes(arr))
}

/// Returns the key with its prefix removed.
///
/// Region boundaries compare against this payload.
pub fn key_payload(key: &[u8]) -> Result<&[u8]> {
    key.get(PREFIX_LEN..)
        .ok_or(CodecError::KeyTooShort { len: key.len() })
}

/// Returns a copy of `key` with its prefix replaced by `id`.
pub fn reset_prefix(key: &[u8], id: u64) -> Result<Bytes> {
    let payload = key_payload(key)?;
    Ok(with_prefix(id, payload))
}

/// Concatenates the prefix for `id` with a key payload.
pub fn with_prefix(id: u64, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(PREFIX_LEN + payload.len());
    buf.put_u64(id);
    buf.put_slice(payload);
    buf.freeze()
}

/// Exclusive upper bound of every key carrying the prefix `id`.
///
/// Returns `None` for `u64::MAX`, whose keys are unbounded above.
pub fn prefix_end(id: u64) -> Option<Bytes> {
    id.checked_add(1)
        .map(|next| Bytes::copy_from_slice(&encode_prefix(next)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_prefix_keeps_payload() {
        let key = with_prefix(7, b"payload");
        let moved = reset_prefix(&key, 42).unwrap();
        assert_eq!(prefix_of(&moved).unwrap(), 42);
        assert_eq!(key_payload(&moved).unwrap(), b"payload");
    }

    #[test]
    fn short_key_is_rejected() {
        assert!(matches!(
            reset_prefix(&[1, 2, 3], 1),
            Err(CodecError::KeyTooShort { len: 3 })
        ));
    }

    #[test]
    fn prefix_end_bounds_all_payloads() {
        let end = prefix_end(5).unwrap();
        assert!(with_prefix(5, &[0xFF; 16]) < end);
        assert!(prefix_end(u64::MAX).is_none());
    }
}
