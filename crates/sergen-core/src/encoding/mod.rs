//! Primitive encodings for field values.
//!
//! Every field value is encoded independently into a short byte sequence:
//!
//! | Kind | Encoding |
//! |------|----------|
//! | bool, u16, u32, u64, color | uvarint |
//! | i16, i32 | zig-zag varint |
//! | string, wstring | `uvarint(0)` if absent, else `uvarint(len + 1)`, UTF-8 bytes, `0x00` |
//! | float | shortest round-trip text, then as a string |
//! | struct | `uvarint(offset)`, 0 for null |
//! | array | `uvarint(count)`, then `uvarint(offset)` per element |
//!
//! Struct and array references need the offsets of the referenced records,
//! which the [`serialize`](crate::serialize) module assigns before asking for
//! the encoding of any field that points at them.

pub mod varint;

use crate::error::{Error, Result};
use crate::schema::{FieldKind, StoredField};
use crate::value::{InstanceId, Value, ValueTree};
use bytes::{BufMut, Bytes};
use std::collections::HashMap;

pub use varint::{
    decode_uvarint, decode_varint, encode_uvarint, encode_varint, uvarint_len, varint_len,
    MAX_VARINT_LEN,
};

/// Offset value meaning "no struct"
pub const NULL_OFFSET: u32 = 0;

/// Append the string encoding of `value` to `out`.
pub fn encode_string(value: Option<&str>, out: &mut impl BufMut) {
    match value {
        None => encode_uvarint(0, out),
        Some(s) => {
            encode_uvarint(s.len() as u64 + 1, out);
            out.put_slice(s.as_bytes());
            out.put_u8(0);
        }
    }
}

/// Shortest text that parses back to exactly `value`
pub fn format_float(value: f32) -> String {
    format!("{:?}", value)
}

/// Append the float encoding of `value` to `out`.
pub fn encode_float(value: f32, out: &mut impl BufMut) {
    encode_string(Some(&format_float(value)), out);
}

/// Decode a string.
///
/// Returns the string (`None` for the absent string) and the number of bytes
/// consumed.
pub fn decode_string(data: &[u8]) -> Result<(Option<String>, usize)> {
    let (prefix, prefix_len) = decode_uvarint(data)?;
    if prefix == 0 {
        return Ok((None, prefix_len));
    }

    let total = usize::try_from(prefix)
        .ok()
        .and_then(|n| n.checked_add(prefix_len))
        .filter(|&end| end <= data.len())
        .ok_or_else(|| {
            Error::invalid_wire_format(
                prefix_len,
                format!(
                    "string of {} bytes exceeds the {} available",
                    prefix,
                    data.len() - prefix_len
                ),
            )
        })?;

    let payload = &data[prefix_len..total - 1];
    if data[total - 1] != 0 {
        return Err(Error::invalid_wire_format(total - 1, "string is not zero-terminated"));
    }
    let s = std::str::from_utf8(payload)
        .map_err(|e| Error::invalid_wire_format(prefix_len, format!("invalid UTF-8: {}", e)))?;

    Ok((Some(s.to_string()), total))
}

/// Decode a float written by [`encode_float`].
pub fn decode_float(data: &[u8]) -> Result<(f32, usize)> {
    let (text, len) = decode_string(data)?;
    let text = text.ok_or_else(|| Error::invalid_wire_format(0, "float stored as absent string"))?;
    let value = text
        .parse::<f32>()
        .map_err(|_| Error::invalid_wire_format(0, format!("'{}' is not a float", text)))?;
    Ok((value, len))
}

/// Offsets assigned to instances, indexed by [`InstanceId`]
#[derive(Debug, Clone, Default)]
pub struct OffsetTable {
    offsets: Vec<u32>,
}

impl OffsetTable {
    /// Creates a table for `len` instances, none of them placed yet
    pub fn new(len: usize) -> Self {
        Self {
            offsets: vec![NULL_OFFSET; len],
        }
    }

    /// The offset of `id`, or `None` if it has not been placed
    pub fn get(&self, id: InstanceId) -> Option<u32> {
        self.offsets
            .get(id.index())
            .copied()
            .filter(|&offset| offset != NULL_OFFSET)
    }

    pub(crate) fn assign(&mut self, id: InstanceId, offset: u32) -> Result<()> {
        if offset == NULL_OFFSET {
            return Err(Error::internal(format!("offset 0 assigned to {}", id)));
        }
        let slot = self
            .offsets
            .get_mut(id.index())
            .ok_or_else(|| Error::internal(format!("no offset slot for {}", id)))?;
        *slot = offset;
        Ok(())
    }
}

/// Identity of one field of one instance during a serialization pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldKey {
    /// Owning instance
    pub instance: InstanceId,
    /// Field position within the instance's struct type
    pub slot: usize,
}

/// Encoded field bytes for one serialization pass.
///
/// The resolver fills it while sizing records; the assembler reads the same
/// bytes back when it writes them out and annotates them.
#[derive(Debug, Default)]
pub struct EncodeCache {
    entries: HashMap<FieldKey, Bytes>,
    hits: usize,
}

impl EncodeCache {
    /// Creates an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached bytes for `key`, encoding them with `encode` on
    /// first use.
    pub fn get_or_encode(
        &mut self,
        key: FieldKey,
        encode: impl FnOnce() -> Result<Vec<u8>>,
    ) -> Result<Bytes> {
        if let Some(bytes) = self.entries.get(&key) {
            self.hits += 1;
            return Ok(bytes.clone());
        }
        let bytes = Bytes::from(encode()?);
        self.entries.insert(key, bytes.clone());
        Ok(bytes)
    }

    /// Returns the cached bytes for `key` without encoding
    pub fn get(&self, key: FieldKey) -> Option<&Bytes> {
        self.entries.get(&key)
    }

    /// Number of cached fields
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing has been cached
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of lookups answered from the cache
    pub fn hits(&self) -> usize {
        self.hits
    }
}

/// What the field encoder needs to know about its surroundings
#[derive(Debug, Clone, Copy)]
pub struct FieldContext<'a> {
    /// Name of the struct owning the field, for error messages
    pub struct_name: &'a str,
    /// The tree the value belongs to
    pub tree: &'a ValueTree,
    /// Offsets assigned so far
    pub offsets: &'a OffsetTable,
}

/// Encode one field value, appending to `out`.
pub fn encode_field(
    ctx: &FieldContext<'_>,
    field: &StoredField<'_>,
    value: &Value,
    out: &mut impl BufMut,
) -> Result<()> {
    let out_of_range = |value: String| Error::ValueOutOfRange {
        struct_name: ctx.struct_name.to_string(),
        field: field.name.to_string(),
        value,
        kind: field.kind.name(),
    };

    match (field.kind, value) {
        (FieldKind::Bool, Value::Bool(b)) => encode_uvarint(u64::from(*b), out),
        (
            kind @ (FieldKind::U16 | FieldKind::U32 | FieldKind::U64 | FieldKind::Color),
            Value::Unsigned(v),
        ) => {
            if !kind.fits_unsigned(*v) {
                return Err(out_of_range(v.to_string()));
            }
            encode_uvarint(*v, out);
        }
        (kind @ (FieldKind::I16 | FieldKind::I32), Value::Signed(v)) => {
            if !kind.fits_signed(*v) {
                return Err(out_of_range(v.to_string()));
            }
            encode_varint(*v, out);
        }
        (FieldKind::Float, Value::Float(v)) => encode_float(*v, out),
        (FieldKind::String | FieldKind::WString, Value::String(s)) => {
            encode_string(s.as_deref(), out)
        }
        (FieldKind::Struct(target), Value::Struct(reference)) => match reference {
            None => encode_uvarint(u64::from(NULL_OFFSET), out),
            Some(id) => encode_uvarint(u64::from(reference_offset(ctx, field, target, *id)?), out),
        },
        (FieldKind::Array(target), Value::Array(elements)) => {
            encode_uvarint(elements.len() as u64, out);
            for &id in elements {
                encode_uvarint(u64::from(reference_offset(ctx, field, target, id)?), out);
            }
        }
        (kind, _) => {
            return Err(Error::KindMismatch {
                struct_name: ctx.struct_name.to_string(),
                field: field.name.to_string(),
                expected: kind.name(),
            })
        }
    }
    Ok(())
}

/// Encode one field value into a fresh buffer
pub fn encode_field_to_vec(
    ctx: &FieldContext<'_>,
    field: &StoredField<'_>,
    value: &Value,
) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    encode_field(ctx, field, value, &mut out)?;
    Ok(out)
}

fn reference_offset(
    ctx: &FieldContext<'_>,
    field: &StoredField<'_>,
    target: crate::schema::StructId,
    id: InstanceId,
) -> Result<u32> {
    let child = ctx.tree.instance(id)?;
    if child.struct_id() != target {
        return Err(Error::ArrayElementMismatch {
            struct_name: ctx.struct_name.to_string(),
            field: field.name.to_string(),
            expected: format!("#{}", target.index()),
            found: format!("#{}", child.struct_id().index()),
        });
    }
    ctx.offsets.get(id).ok_or_else(|| Error::UnresolvedReference {
        struct_name: ctx.struct_name.to_string(),
        field: field.name.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::StructId;
    use crate::value::StructInstance;

    fn string_bytes(value: Option<&str>) -> Vec<u8> {
        let mut out = Vec::new();
        encode_string(value, &mut out);
        out
    }

    fn field(kind: FieldKind) -> StoredField<'static> {
        StoredField {
            slot: 0,
            name: "f",
            kind,
        }
    }

    fn encode(kind: FieldKind, value: Value) -> Result<Vec<u8>> {
        let tree = ValueTree::new();
        let offsets = OffsetTable::new(0);
        let ctx = FieldContext {
            struct_name: "S",
            tree: &tree,
            offsets: &offsets,
        };
        encode_field_to_vec(&ctx, &field(kind), &value)
    }

    #[test]
    fn test_string_absent_vs_empty() {
        assert_eq!(string_bytes(None), [0x00]);
        assert_eq!(string_bytes(Some("")), [0x01, 0x00]);
        assert_eq!(string_bytes(Some("ab")), [0x03, b'a', b'b', 0x00]);
    }

    #[test]
    fn test_string_decode_three_cases() {
        assert_eq!(decode_string(&[0x00]).unwrap(), (None, 1));
        assert_eq!(decode_string(&[0x01, 0x00]).unwrap(), (Some(String::new()), 2));

        let text = "Grüße, 世界";
        let data = string_bytes(Some(text));
        assert_eq!(decode_string(&data).unwrap(), (Some(text.to_string()), data.len()));
    }

    #[test]
    fn test_string_decode_errors() {
        assert!(decode_string(&[0x05, b'a']).is_err());
        assert!(decode_string(&[0x02, b'a', b'b']).is_err());
        assert!(decode_string(&[0x03, 0xFF, 0xFE, 0x00]).is_err());
    }

    #[test]
    fn test_float_is_text() {
        let mut out = Vec::new();
        encode_float(100.0, &mut out);
        assert_eq!(out, [0x06, b'1', b'0', b'0', b'.', b'0', 0x00]);
        assert_eq!(decode_float(&out).unwrap(), (100.0, out.len()));
    }

    #[test]
    fn test_float_shortest_round_trip() {
        for value in [0.1f32, -2.5, 1e30, f32::MIN_POSITIVE, 3.402_823_5e38] {
            let mut out = Vec::new();
            encode_float(value, &mut out);
            assert_eq!(decode_float(&out).unwrap().0, value);
        }
        assert_eq!(format_float(0.1), "0.1");
    }

    #[test]
    fn test_encode_scalars() {
        assert_eq!(encode(FieldKind::Bool, Value::Bool(true)).unwrap(), [0x01]);
        assert_eq!(encode(FieldKind::U16, Value::Unsigned(300)).unwrap(), [0xAC, 0x02]);
        assert_eq!(encode(FieldKind::I32, Value::Signed(-1)).unwrap(), [0x01]);
        assert_eq!(encode(FieldKind::WString, Value::String(None)).unwrap(), [0x00]);
        assert_eq!(encode(FieldKind::Struct(StructId::new(0)), Value::Struct(None)).unwrap(), [0x00]);
        assert_eq!(encode(FieldKind::Array(StructId::new(0)), Value::Array(vec![])).unwrap(), [0x00]);
    }

    #[test]
    fn test_encode_out_of_range() {
        assert!(matches!(
            encode(FieldKind::U16, Value::Unsigned(65_536)),
            Err(Error::ValueOutOfRange { .. })
        ));
        assert!(matches!(
            encode(FieldKind::I16, Value::Signed(-40_000)),
            Err(Error::ValueOutOfRange { .. })
        ));
    }

    #[test]
    fn test_encode_kind_mismatch() {
        assert!(matches!(
            encode(FieldKind::Float, Value::String(None)),
            Err(Error::KindMismatch { .. })
        ));
    }

    #[test]
    fn test_encode_references() {
        let mut tree = ValueTree::new();
        let a = tree.insert(StructInstance::new(StructId::new(0), vec![]));
        let b = tree.insert(StructInstance::new(StructId::new(0), vec![]));
        let mut offsets = OffsetTable::new(tree.len());
        offsets.assign(a, 12).unwrap();
        offsets.assign(b, 300).unwrap();
        let ctx = FieldContext {
            struct_name: "S",
            tree: &tree,
            offsets: &offsets,
        };

        let array = field(FieldKind::Array(StructId::new(0)));
        let bytes = encode_field_to_vec(&ctx, &array, &Value::Array(vec![a, b])).unwrap();
        assert_eq!(bytes, [0x02, 0x0C, 0xAC, 0x02]);

        let wrong_type = field(FieldKind::Struct(StructId::new(1)));
        assert!(matches!(
            encode_field_to_vec(&ctx, &wrong_type, &Value::Struct(Some(a))),
            Err(Error::ArrayElementMismatch { .. })
        ));
    }

    #[test]
    fn test_unresolved_reference() {
        let mut tree = ValueTree::new();
        let a = tree.insert(StructInstance::new(StructId::new(0), vec![]));
        let offsets = OffsetTable::new(tree.len());
        let ctx = FieldContext {
            struct_name: "S",
            tree: &tree,
            offsets: &offsets,
        };
        let reference = field(FieldKind::Struct(StructId::new(0)));
        assert!(matches!(
            encode_field_to_vec(&ctx, &reference, &Value::Struct(Some(a))),
            Err(Error::UnresolvedReference { .. })
        ));
    }

    #[test]
    fn test_cache_memoizes() {
        let mut cache = EncodeCache::new();
        let key = FieldKey {
            instance: ValueTree::new().insert(StructInstance::new(StructId::new(0), vec![])),
            slot: 0,
        };
        let first = cache.get_or_encode(key, || Ok(vec![1, 2, 3])).unwrap();
        let second = cache
            .get_or_encode(key, || panic!("encoded twice"))
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.hits(), 1);
    }
}
