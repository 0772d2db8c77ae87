//! Generic runtime over descriptor tables.
//!
//! [`Runtime`] decodes a blob into a [`ValueTree`] using nothing but a
//! [`DescriptorSet`], and encodes trees back. Decoding is defensive:
//!
//! - the header magic must match and the data version must not be newer than
//!   the descriptors' version
//! - every referenced record must lie after the header and strictly before
//!   the record referencing it, so malformed data cannot loop
//! - fields missing from a record (written by an older schema) and fields
//!   whose value is unusable (a float that does not parse, an integer out of
//!   range) take their default
//!
//! Anything else is a decode error. [`Runtime::deserialize_or_default`] falls
//! back to the default blob on those.

use crate::artifact::{serialize_tree, Artifact};
use crate::descriptor::{DescriptorSet, DescriptorTable, FieldDescriptor};
use crate::encoding::{decode_string, decode_uvarint, decode_varint, NULL_OFFSET};
use crate::error::{Error, Result};
use crate::schema::{Encoding, FieldKind, StructId};
use crate::value::{InstanceId, StructInstance, Value, ValueTree};
use crate::version::Version;
use crate::{HEADER_SIZE, MAGIC_ID, RECORD_TAG_SIZE};
use tracing::{debug, warn};

/// Smallest possible record: magic tag and a one-byte field count
const MIN_RECORD_SIZE: usize = RECORD_TAG_SIZE as usize + 1;

/// Result of [`Runtime::deserialize_or_default`]
#[derive(Debug, Clone)]
pub struct Deserialized {
    /// The decoded tree
    pub tree: ValueTree,
    /// True if the input was unusable and the defaults were returned instead
    pub used_default: bool,
}

/// Decodes and encodes value trees described by a [`DescriptorSet`]
#[derive(Debug, Clone, Copy)]
pub struct Runtime<'a> {
    descriptors: &'a DescriptorSet,
}

impl<'a> Runtime<'a> {
    /// Creates a runtime for the given tables
    pub fn new(descriptors: &'a DescriptorSet) -> Self {
        Self { descriptors }
    }

    /// Decodes `data`. Missing and unusable fields get zero values.
    pub fn deserialize(&self, data: &[u8]) -> Result<ValueTree> {
        self.decode(data, None)
    }

    /// Decodes `data`, taking missing and unusable fields from the matching
    /// instance of `defaults`.
    pub fn deserialize_with_defaults(&self, data: &[u8], defaults: &ValueTree) -> Result<ValueTree> {
        self.decode(data, Some(defaults))
    }

    /// Decodes `data`, or `default_blob` if `data` cannot be decoded.
    ///
    /// Fails only if the default blob itself does not decode.
    pub fn deserialize_or_default(&self, data: &[u8], default_blob: &[u8]) -> Result<Deserialized> {
        let defaults = self.deserialize(default_blob)?;
        match self.deserialize_with_defaults(data, &defaults) {
            Ok(tree) => Ok(Deserialized {
                tree,
                used_default: false,
            }),
            Err(e) if e.is_recoverable() => {
                warn!("Falling back to defaults: {}", e);
                Ok(Deserialized {
                    tree: defaults,
                    used_default: true,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Encodes `tree` with the descriptors' version
    pub fn serialize(&self, tree: &ValueTree) -> Result<Artifact> {
        serialize_tree(self.descriptors, tree)
    }

    fn decode(&self, data: &[u8], defaults: Option<&ValueTree>) -> Result<ValueTree> {
        if data.len() < HEADER_SIZE as usize {
            return Err(Error::invalid_wire_format(
                data.len(),
                format!("{} bytes is shorter than the header", data.len()),
            ));
        }

        let magic = read_u32_le(data, 0)?;
        if magic != MAGIC_ID {
            return Err(Error::BadMagic {
                offset: 0,
                found: magic,
            });
        }

        let version = Version::from_bytes([data[4], data[5], data[6], data[7]]);
        let expected = self.descriptors.version();
        if &version > expected {
            return Err(Error::UnsupportedVersion {
                found: version.to_string(),
                expected: expected.to_string(),
            });
        }

        let root_offset = read_u32_le(data, 8)?;
        let mut decoder = Decoder {
            descriptors: self.descriptors,
            data,
            defaults,
            out: ValueTree::new(),
            budget: data.len() / MIN_RECORD_SIZE,
        };
        let default_root = defaults.and_then(|t| t.root().ok());
        let root = decoder.decode_record(
            self.descriptors.root(),
            root_offset,
            data.len(),
            default_root,
        )?;
        decoder.out.set_root(root);

        debug!(
            "Decoded {} instances from {} bytes (version {})",
            decoder.out.len(),
            data.len(),
            version
        );
        Ok(decoder.out)
    }
}

struct Decoder<'a> {
    descriptors: &'a DescriptorSet,
    data: &'a [u8],
    defaults: Option<&'a ValueTree>,
    out: ValueTree,
    /// Records left before the data is considered malformed
    budget: usize,
}

impl<'a> Decoder<'a> {
    /// Decodes the record at `offset`, which must lie below `limit`.
    fn decode_record(
        &mut self,
        struct_id: StructId,
        offset: u32,
        limit: usize,
        default: Option<InstanceId>,
    ) -> Result<InstanceId> {
        let descriptors = self.descriptors;
        let table = descriptors
            .get(struct_id)
            .ok_or_else(|| Error::unknown_struct(format!("#{}", struct_id.index())))?;

        let start = offset as usize;
        if start < HEADER_SIZE as usize || start >= limit {
            return Err(Error::invalid_wire_format(
                start,
                format!(
                    "{} record at {:#x} outside {:#x}..{:#x}",
                    table.name, start, HEADER_SIZE, limit
                ),
            ));
        }
        if self.budget == 0 {
            return Err(Error::invalid_wire_format(start, "too many records"));
        }
        self.budget -= 1;

        let magic = read_u32_le(self.data, start)?;
        if magic != MAGIC_ID {
            return Err(Error::BadMagic {
                offset: start,
                found: magic,
            });
        }

        // A default instance of another type is no use
        let default = default.filter(|&id| {
            self.defaults
                .and_then(|t| t.get(id))
                .is_some_and(|inst| inst.struct_id() == struct_id)
        });

        let mut pos = start + RECORD_TAG_SIZE as usize;
        let (count, len) = decode_uvarint(self.tail(pos)?).map_err(|e| at(e, pos))?;
        pos += len;

        let mut decoded: Vec<Option<Value>> = vec![None; table.slot_count];
        for field in table.fields.iter().take(count.min(table.fields.len() as u64) as usize) {
            let (value, len) = self.decode_field(table, field, pos, start, default)?;
            pos += len;
            if let Some(slot) = decoded.get_mut(field.slot) {
                *slot = value;
            }
        }
        if count < table.fields.len() as u64 {
            debug!(
                "{} record at {:#x} has {} of {} fields",
                table.name,
                start,
                count,
                table.fields.len()
            );
        }

        let mut values = Vec::with_capacity(table.slot_count);
        for member in table.members() {
            let value = match decoded.get_mut(member.slot).and_then(Option::take) {
                Some(value) => value,
                None if table.internal.contains(member) => Value::zero(member.kind),
                None => self.default_value(default, member)?,
            };
            values.push(value);
        }

        Ok(self.out.insert(StructInstance::new(struct_id, values)))
    }

    /// Decodes one field at `pos`.
    ///
    /// Returns `None` as the value if the field was readable but unusable.
    fn decode_field(
        &mut self,
        table: &DescriptorTable,
        field: &FieldDescriptor,
        pos: usize,
        record: usize,
        default: Option<InstanceId>,
    ) -> Result<(Option<Value>, usize)> {
        let data = self.tail(pos)?;
        let unusable = |what: &str| {
            warn!(
                "{}.{} at {:#x}: {}, using default",
                table.name, field.name, pos, what
            );
            None
        };

        match field.kind {
            FieldKind::Struct(target) => {
                let (offset, len) = decode_uvarint(data).map_err(|e| at(e, pos))?;
                if offset == u64::from(NULL_OFFSET) {
                    return Ok((Some(Value::Struct(None)), len));
                }
                let offset = to_offset(offset, pos)?;
                let child_default = self.child_default(default, field.slot, None);
                let id = self.decode_record(target, offset, record, child_default)?;
                Ok((Some(Value::Struct(Some(id))), len))
            }
            FieldKind::Array(target) => {
                let (count, mut len) = decode_uvarint(data).map_err(|e| at(e, pos))?;
                if count > (data.len() - len) as u64 {
                    return Err(Error::invalid_wire_format(
                        pos,
                        format!("array of {} elements exceeds the data", count),
                    ));
                }
                let mut ids = Vec::with_capacity(count as usize);
                for index in 0..count as usize {
                    let (offset, n) = decode_uvarint(&data[len..]).map_err(|e| at(e, pos + len))?;
                    let offset = to_offset(offset, pos + len)?;
                    len += n;
                    let child_default = self.child_default(default, field.slot, Some(index));
                    ids.push(self.decode_record(target, offset, record, child_default)?);
                }
                Ok((Some(Value::Array(ids)), len))
            }
            kind => match kind.encoding() {
                Encoding::Signed => {
                    let (v, len) = decode_varint(data).map_err(|e| at(e, pos))?;
                    let value = if kind.fits_signed(v) {
                        Some(Value::Signed(v))
                    } else {
                        unusable(&format!("{} out of range", v))
                    };
                    Ok((value, len))
                }
                Encoding::Float => {
                    let (text, len) = decode_string(data).map_err(|e| at(e, pos))?;
                    let value = match text.as_deref().map(str::parse::<f32>) {
                        Some(Ok(v)) => Some(Value::Float(v)),
                        _ => unusable(&format!("{:?} is not a float", text)),
                    };
                    Ok((value, len))
                }
                Encoding::String => {
                    let (text, len) = decode_string(data).map_err(|e| at(e, pos))?;
                    Ok((Some(Value::String(text)), len))
                }
                _ => {
                    let (v, len) = decode_uvarint(data).map_err(|e| at(e, pos))?;
                    let value = match kind {
                        _ if !kind.fits_unsigned(v) => unusable(&format!("{} out of range", v)),
                        FieldKind::Bool => Some(Value::Bool(v == 1)),
                        _ => Some(Value::Unsigned(v)),
                    };
                    Ok((value, len))
                }
            },
        }
    }

    /// Default instance for a nested struct or array element
    fn child_default(
        &self,
        default: Option<InstanceId>,
        slot: usize,
        index: Option<usize>,
    ) -> Option<InstanceId> {
        let value = self.defaults?.get(default?)?.value(slot)?;
        match (value, index) {
            (Value::Struct(Some(id)), None) => Some(*id),
            (Value::Array(ids), Some(i)) => ids.get(i).copied(),
            _ => None,
        }
    }

    /// Default value of a persisted field, copying nested defaults into the
    /// output tree
    fn default_value(&mut self, default: Option<InstanceId>, member: &FieldDescriptor) -> Result<Value> {
        let found = self
            .defaults
            .zip(default)
            .and_then(|(tree, id)| Some((tree, tree.get(id)?.value(member.slot)?)));
        let Some((tree, value)) = found else {
            return Ok(Value::zero(member.kind));
        };

        Ok(match value {
            Value::Struct(Some(child)) => Value::Struct(Some(self.out.graft(tree, *child)?)),
            Value::Array(children) => Value::Array(
                children
                    .iter()
                    .map(|&child| self.out.graft(tree, child))
                    .collect::<Result<_>>()?,
            ),
            other => other.clone(),
        })
    }

    fn tail(&self, pos: usize) -> Result<&'a [u8]> {
        self.data
            .get(pos..)
            .ok_or_else(|| Error::invalid_wire_format(pos, "offset past the end of the data"))
    }
}

fn read_u32_le(data: &[u8], pos: usize) -> Result<u32> {
    data.get(pos..pos + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or_else(|| Error::invalid_wire_format(pos, "truncated 32-bit value"))
}

fn to_offset(value: u64, pos: usize) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| Error::invalid_wire_format(pos, format!("offset {} out of range", value)))
}

/// Rebases a decode error reported relative to `base`
fn at(err: Error, base: usize) -> Error {
    match err {
        Error::InvalidWireFormat { offset, details } => Error::InvalidWireFormat {
            offset: base + offset,
            details,
        },
        Error::VarintDecode { offset } => Error::VarintDecode {
            offset: base + offset,
        },
        other => other,
    }
}
