//! Variable-length integer encoding.
//!
//! Both encodings use 7 data bits per byte, least significant group first,
//! with the high bit set on every byte except the last:
//!
//! - uvarint: the value itself
//! - varint: the zig-zag transform `(x << 1) ^ (x >> 63)` of a signed value,
//!   so small negative numbers stay short
//!
//! A 64-bit value needs at most 10 bytes.

use crate::error::{Error, Result};
use bytes::BufMut;

/// Longest valid encoding of a 64-bit value
pub const MAX_VARINT_LEN: usize = 10;

/// Append the uvarint encoding of `value` to `out`.
pub fn encode_uvarint(mut value: u64, out: &mut impl BufMut) {
    while value >= 0x80 {
        out.put_u8((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    out.put_u8(value as u8);
}

/// Append the zig-zag varint encoding of `value` to `out`.
pub fn encode_varint(value: i64, out: &mut impl BufMut) {
    encode_uvarint(zigzag(value), out);
}

/// Number of bytes `encode_uvarint` writes for `value`
pub fn uvarint_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.max(1).div_ceil(7)
}

/// Number of bytes `encode_varint` writes for `value`
pub fn varint_len(value: i64) -> usize {
    uvarint_len(zigzag(value))
}

/// Decode a uvarint from the given bytes.
///
/// Returns the decoded value and the number of bytes consumed.
pub fn decode_uvarint(data: &[u8]) -> Result<(u64, usize)> {
    let mut result: u64 = 0;
    let mut shift = 0;

    for (i, &byte) in data.iter().enumerate() {
        if i >= MAX_VARINT_LEN {
            return Err(Error::varint_decode(i));
        }

        // The tenth byte may only carry the single remaining bit
        if i == MAX_VARINT_LEN - 1 && byte > 1 {
            return Err(Error::varint_decode(i));
        }

        result |= ((byte & 0x7F) as u64) << shift;
        shift += 7;

        if byte & 0x80 == 0 {
            return Ok((result, i + 1));
        }
    }

    Err(Error::varint_decode(data.len()))
}

/// Decode a zig-zag varint from the given bytes.
///
/// Returns the decoded value and the number of bytes consumed.
pub fn decode_varint(data: &[u8]) -> Result<(i64, usize)> {
    let (raw, len) = decode_uvarint(data)?;
    Ok((unzigzag(raw), len))
}

fn zigzag(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

fn unzigzag(raw: u64) -> i64 {
    ((raw >> 1) as i64) ^ -((raw & 1) as i64)
}
