//! Lexicographic key encoding.
//!
//! Encoded keys compare with plain byte comparison in the same order as the
//! values they encode, so region boundaries and scan bounds can be expressed
//! as raw bytes.
//!
//! # Encoding Strategies
//!
//! - **Integer / `BigInt`**: Sign-flip encoding (XOR the sign bit), big-endian
//! - **Double**: Total-order encoding (flip all bits of negatives, sign bit of positives)
//! - **Boolean**: 0x00 for false, 0x01 for true
//! - **Text / Bytes**: 0x00 escaped as 0x00 0xFF, terminated by 0x00 0x00
//!
//! Every column is preceded by a null marker (0x00 = NULL, 0x01 = present),
//! so NULL sorts before every non-NULL value of the same column.

use bytes::Bytes;
use tessera_types::{DataType, Value};

use crate::error::{CodecError, Result};

const NULL_MARKER: u8 = 0x00;
const PRESENT_MARKER: u8 = 0x01;
const ESCAPE: u8 = 0x00;
const ESCAPED_ZERO: u8 = 0xFF;
const TERMINATOR: u8 = 0x00;

/// Encodes an `Integer` (i32) for lexicographic ordering.
pub fn encode_integer(value: i32) -> [u8; 4] {
    let unsigned = (value as u32) ^ (1u32 << 31);
    unsigned.to_be_bytes()
}

/// Decodes an `Integer` from sign-flip encoding.
pub fn decode_integer(bytes: [u8; 4]) -> i32 {
    let unsigned = u32::from_be_bytes(bytes);
    (unsigned ^ (1u32 << 31)) as i32
}

/// Encodes a `BigInt` for lexicographic ordering.
///
/// ```text
/// i64::MIN -> 0x00_00_00_00_00_00_00_00
/// -1       -> 0x7F_FF_FF_FF_FF_FF_FF_FF
///  0       -> 0x80_00_00_00_00_00_00_00
/// i64::MAX -> 0xFF_FF_FF_FF_FF_FF_FF_FF
/// ```
pub fn encode_bigint(value: i64) -> [u8; 8] {
    let unsigned = (value as u64) ^ (1u64 << 63);
    unsigned.to_be_bytes()
}

/// Decodes a `BigInt` from sign-flip encoding.
pub fn decode_bigint(bytes: [u8; 8]) -> i64 {
    let unsigned = u64::from_be_bytes(bytes);
    (unsigned ^ (1u64 << 63)) as i64
}

/// Encodes a `Double` with total ordering.
///
/// -NaN < -Inf < negative values < -0.0 < +0.0 < positive values < +Inf < NaN
pub fn encode_double(value: f64) -> [u8; 8] {
    let bits = value.to_bits();
    let key = if value.is_sign_negative() {
        !bits
    } else {
        bits ^ (1u64 << 63)
    };
    key.to_be_bytes()
}

/// Decodes a `Double` from total-order encoding.
pub fn decode_double(bytes: [u8; 8]) -> f64 {
    let key = u64::from_be_bytes(bytes);
    let bits = if (key & (1u64 << 63)) == 0 {
        !key
    } else {
        key ^ (1u64 << 63)
    };
    f64::from_bits(bits)
}

fn encode_escaped(data: &[u8], buf: &mut Vec<u8>) {
    for &byte in data {
        if byte == ESCAPE {
            buf.extend_from_slice(&[ESCAPE, ESCAPED_ZERO]);
        } else {
            buf.push(byte);
        }
    }
    buf.extend_from_slice(&[ESCAPE, TERMINATOR]);
}

fn decode_escaped(bytes: &[u8], pos: &mut usize) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    loop {
        let Some(&byte) = bytes.get(*pos) else {
            return Err(CodecError::MalformedKey {
                position: *pos,
                reason: "unterminated string",
            });
        };
        *pos += 1;
        if byte != ESCAPE {
            out.push(byte);
            continue;
        }
        match bytes.get(*pos) {
            Some(&TERMINATOR) => {
                *pos += 1;
                return Ok(out);
            }
            Some(&ESCAPED_ZERO) => {
                *pos += 1;
                out.push(0x00);
            }
            _ => {
                return Err(CodecError::MalformedKey {
                    position: *pos,
                    reason: "invalid escape sequence",
                });
            }
        }
    }
}

fn take<const N: usize>(bytes: &[u8], pos: &mut usize) -> Result<[u8; N]> {
    let slice = bytes
        .get(*pos..*pos + N)
        .ok_or(CodecError::MalformedKey {
            position: *pos,
            reason: "truncated fixed-width value",
        })?;
    let mut arr = [0u8; N];
    arr.copy_from_slice(slice);
    *pos += N;
    Ok(arr)
}

/// Appends the key encoding of one column value to `buf`.
///
/// The value must already be coerced to `data_type`.
pub fn encode_value(column: &str, value: &Value, data_type: DataType, buf: &mut Vec<u8>) -> Result<()> {
    if !data_type.is_orderable() {
        return Err(CodecError::NotOrderable {
            column: column.to_string(),
            data_type,
        });
    }
    match value {
        Value::Null => buf.push(NULL_MARKER),
        Value::Boolean(b) => {
            buf.push(PRESENT_MARKER);
            buf.push(u8::from(*b));
        }
        Value::Integer(v) => {
            buf.push(PRESENT_MARKER);
            buf.extend_from_slice(&encode_integer(*v));
        }
        Value::BigInt(v) => {
            buf.push(PRESENT_MARKER);
            buf.extend_from_slice(&encode_bigint(*v));
        }
        Value::Double(v) => {
            buf.push(PRESENT_MARKER);
            buf.extend_from_slice(&encode_double(*v));
        }
        Value::Text(s) => {
            buf.push(PRESENT_MARKER);
            encode_escaped(s.as_bytes(), buf);
        }
        Value::Bytes(b) => {
            buf.push(PRESENT_MARKER);
            encode_escaped(b, buf);
        }
        Value::FloatVector(_) | Value::BinaryVector(_) => {
            return Err(CodecError::NotOrderable {
                column: column.to_string(),
                data_type,
            });
        }
    }
    Ok(())
}

/// Decodes one column value of type `data_type` starting at `pos`.
pub fn decode_value(bytes: &[u8], pos: &mut usize, data_type: DataType) -> Result<Value> {
    let marker = *bytes.get(*pos).ok_or(CodecError::MalformedKey {
        position: *pos,
        reason: "missing null marker",
    })?;
    *pos += 1;
    match marker {
        NULL_MARKER => return Ok(Value::Null),
        PRESENT_MARKER => {}
        _ => {
            return Err(CodecError::MalformedKey {
                position: *pos - 1,
                reason: "unknown null marker",
            });
        }
    }

    let value = match data_type {
        DataType::Boolean => Value::Boolean(take::<1>(bytes, pos)?[0] != 0),
        DataType::Integer => Value::Integer(decode_integer(take(bytes, pos)?)),
        DataType::BigInt => Value::BigInt(decode_bigint(take(bytes, pos)?)),
        DataType::Double => Value::Double(decode_double(take(bytes, pos)?)),
        DataType::Text => {
            let start = *pos;
            let raw = decode_escaped(bytes, pos)?;
            Value::Text(String::from_utf8(raw).map_err(|_| CodecError::MalformedKey {
                position: start,
                reason: "invalid UTF-8 in text",
            })?)
        }
        DataType::Bytes => Value::Bytes(Bytes::from(decode_escaped(bytes, pos)?)),
        DataType::FloatVector | DataType::BinaryVector => {
            return Err(CodecError::MalformedKey {
                position: *pos,
                reason: "vector type in key",
            });
        }
    };
    Ok(value)
}

/// Returns the smallest key greater than every key starting with `key`.
///
/// Returns `None` when `key` is empty or all 0xFF, in which case no finite
/// upper bound exists.
pub fn successor_key(key: &[u8]) -> Option<Bytes> {
    let mut result = key.to_vec();
    while let Some(last) = result.last_mut() {
        if *last < 0xFF {
            *last += 1;
            return Some(Bytes::from(result));
        }
        result.pop();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn encode(value: &Value, data_type: DataType) -> Vec<u8> {
        let mut buf = Vec::new();
        encode_value("c", value, data_type, &mut buf).unwrap();
        buf
    }

    #[test]
    fn test_bigint_encoding_preserves_order() {
        let values = [i64::MIN, i64::MIN + 1, -1000, -1, 0, 1, 1000, i64::MAX];
        let encoded: Vec<_> = values.iter().map(|&v| encode_bigint(v)).collect();
        let mut sorted = encoded.clone();
        sorted.sort_unstable();
        assert_eq!(encoded, sorted);
    }

    #[test]
    fn test_double_encoding_orders_signed_zero_and_infinities() {
        let values = [f64::NEG_INFINITY, -1.5, -0.0, 0.0, 1.5, f64::INFINITY];
        let encoded: Vec<_> = values.iter().map(|&v| encode_double(v)).collect();
        let mut sorted = encoded.clone();
        sorted.sort_unstable();
        assert_eq!(encoded, sorted);
    }

    #[test]
    fn test_null_sorts_first() {
        let null = encode(&Value::Null, DataType::Text);
        let empty = encode(&Value::Text(String::new()), DataType::Text);
        assert!(null < empty);
    }

    #[test]
    fn test_text_with_embedded_zero_decodes() {
        let value = Value::Text("a\0b".to_string());
        let buf = encode(&value, DataType::Text);
        let mut pos = 0;
        assert_eq!(decode_value(&buf, &mut pos, DataType::Text).unwrap(), value);
        assert_eq!(pos, buf.len());
    }

    #[test]
    fn test_vector_rejected_in_key() {
        let mut buf = Vec::new();
        let err = encode_value("v", &Value::FloatVector(vec![1.0]), DataType::FloatVector, &mut buf);
        assert!(matches!(err, Err(CodecError::NotOrderable { .. })));
    }

    #[test]
    fn test_truncated_key_is_an_error() {
        let buf = encode(&Value::BigInt(9), DataType::BigInt);
        let mut pos = 0;
        assert!(decode_value(&buf[..4], &mut pos, DataType::BigInt).is_err());
    }

    #[test]
    fn test_successor_key() {
        assert_eq!(successor_key(&[0x01, 0x02]).unwrap().as_ref(), &[0x01, 0x03]);
        assert_eq!(successor_key(&[0x01, 0xFF]).unwrap().as_ref(), &[0x02]);
        assert!(successor_key(&[0xFF, 0xFF]).is_none());
        assert!(successor_key(&[]).is_none());
    }

    proptest! {
        /// Property: byte order of encoded text equals string order.
        #[test]
        fn prop_text_order_preserved(a in ".{0,12}", b in ".{0,12}") {
            let ea = encode(&Value::Text(a.clone()), DataType::Text);
            let eb = encode(&Value::Text(b.clone()), DataType::Text);
            prop_assert_eq!(ea.cmp(&eb), a.as_bytes().cmp(b.as_bytes()));
        }

        /// Property: byte order of encoded integers equals numeric order.
        #[test]
        fn prop_integer_order_preserved(a in any::<i32>(), b in any::<i32>()) {
            prop_assert_eq!(encode_integer(a).cmp(&encode_integer(b)), a.cmp(&b));
        }

        /// Property: a successor bounds every extension of its input.
        #[test]
        fn prop_successor_bounds_extensions(
            prefix in prop::collection::vec(0u8..0xFF, 1..6),
            suffix in prop::collection::vec(any::<u8>(), 0..6),
        ) {
            let succ = successor_key(&prefix).unwrap();
            let mut extended = prefix.clone();
            extended.extend_from_slice(&suffix);
            prop_assert!(extended.as_slice() < succ.as_ref());
        }
    }
}
