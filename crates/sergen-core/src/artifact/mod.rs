//! Binary artifact assembly.
//!
//! Concatenates the 12-byte header and every record, in the order the
//! resolver placed them, into one contiguous blob:
//!
//! ```text
//! header:  magic (u32 LE) | version (4 bytes) | root offset (u32 LE)
//! record:  magic (u32 LE) | uvarint field count | field bytes...
//! ```
//!
//! While writing, every segment is also reported to a [`ListingWriter`] so
//! the blob can be reviewed as an annotated listing.

mod writer;

use crate::descriptor::c_type;
use crate::encoding::{
    encode_field_to_vec, encode_uvarint, format_float, EncodeCache, FieldContext, FieldKey,
};
use crate::error::{Error, Result};
use crate::schema::{FieldKind, StructCatalog};
use crate::serialize::{resolve, Layout};
use crate::value::{InstanceId, Value, ValueTree};
use crate::version::Version;
use crate::{HEADER_SIZE, MAGIC_ID};
use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, trace};

pub(crate) use writer::escape_string;
pub use writer::{
    hex_bytes, CArrayWriter, FieldEntry, HeaderInfo, ListingWriter, NullWriter, RecordInfo,
    StatsWriter,
};

/// Where one record ended up in the blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSummary {
    /// The encoded instance
    pub instance: InstanceId,
    /// Short instance name
    pub name: String,
    /// Record offset
    pub offset: u32,
    /// Record size in bytes
    pub size: u32,
}

/// An assembled blob
#[derive(Debug, Clone)]
pub struct Artifact {
    bytes: Bytes,
    version: Version,
    root_offset: u32,
    records: Vec<RecordSummary>,
}

impl Artifact {
    /// The encoded bytes
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// Consumes the artifact, returning the encoded bytes
    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }

    /// Blob length
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns true if the blob is empty (never the case for an assembled blob)
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Version written into the header
    pub fn version(&self) -> &Version {
        &self.version
    }

    /// Offset of the root record
    pub fn root_offset(&self) -> u32 {
        self.root_offset
    }

    /// Records in blob order
    pub fn records(&self) -> &[RecordSummary] {
        &self.records
    }
}

/// Writes the blob described by `layout`.
///
/// Field bytes are taken from `cache`, so they are the bytes the resolver
/// measured. Fails if any record does not start at its assigned offset or
/// the blob length differs from the resolved total.
pub fn assemble<W: ListingWriter>(
    catalog: &impl StructCatalog,
    tree: &ValueTree,
    layout: &Layout,
    cache: &mut EncodeCache,
    writer: &mut W,
) -> Result<Artifact> {
    let root = layout.root()?;
    let root_offset = layout.root_offset()?;
    let root_name = catalog
        .struct_name(tree.instance(root)?.struct_id())
        .unwrap_or("Unknown");
    let version = catalog.version();
    let total_size = layout.total_size();

    let mut buf = BytesMut::with_capacity(total_size as usize);
    buf.put_u32_le(MAGIC_ID);
    buf.put_slice(&version.to_bytes());
    buf.put_u32_le(root_offset);
    writer
        .write_header(&HeaderInfo {
            root_name,
            version,
            root_offset,
            total_size,
            magic: &buf[0..4],
            version_bytes: &buf[4..8],
            root_offset_bytes: &buf[8..HEADER_SIZE as usize],
        })
        .map_err(listing_error)?;

    let mut records = Vec::with_capacity(layout.order().len());
    for (&id, &size) in layout.order().iter().zip(layout.sizes()) {
        let offset = layout
            .offset_of(id)
            .ok_or_else(|| Error::internal(format!("{} was never placed", id)))?;
        if buf.len() != offset as usize {
            return Err(Error::internal(format!(
                "record {} starts at {:#x}, expected {:#x}",
                id,
                buf.len(),
                offset
            )));
        }

        let instance = tree.instance(id)?;
        let struct_name = catalog.struct_name(instance.struct_id()).unwrap_or("Unknown");
        let fields = catalog
            .stored_fields(instance.struct_id())
            .ok_or_else(|| Error::unknown_struct(struct_name))?;
        let name = tree.short_name(catalog, id);

        buf.put_u32_le(MAGIC_ID);
        encode_uvarint(fields.len() as u64, &mut buf);
        writer
            .write_record(&RecordInfo {
                name: &name,
                offset,
                field_count: fields.len(),
                magic: &buf[offset as usize..offset as usize + 4],
                count_bytes: &buf[offset as usize + 4..],
            })
            .map_err(listing_error)?;

        let ctx = FieldContext {
            struct_name,
            tree,
            offsets: layout.offsets(),
        };
        for field in &fields {
            let value = instance.value(field.slot).ok_or_else(|| {
                Error::internal(format!("{} has no value for '{}'", id, field.name))
            })?;
            let key = FieldKey {
                instance: id,
                slot: field.slot,
            };
            let bytes = cache.get_or_encode(key, || encode_field_to_vec(&ctx, field, value))?;
            let c_type = c_type(field.kind, catalog);
            let shown = display_value(catalog, tree, field.kind, value);
            writer
                .write_field(&FieldEntry {
                    c_type: &c_type,
                    name: field.name,
                    value: &shown,
                    bytes: &bytes,
                })
                .map_err(listing_error)?;
            buf.put_slice(&bytes);
        }

        let written = buf.len() - offset as usize;
        if written != size as usize {
            return Err(Error::internal(format!(
                "record {} is {} bytes, resolved as {}",
                id, written, size
            )));
        }
        trace!("Wrote {} at {:#x}", name, offset);
        records.push(RecordSummary {
            instance: id,
            name,
            offset,
            size,
        });
    }

    if buf.len() != total_size as usize {
        return Err(Error::internal(format!(
            "assembled {} bytes, resolved {}",
            buf.len(),
            total_size
        )));
    }
    writer.finish(total_size).map_err(listing_error)?;

    debug!(
        "Assembled {} records into {} bytes ({} cache hits)",
        records.len(),
        total_size,
        cache.hits()
    );

    Ok(Artifact {
        bytes: buf.freeze(),
        version: version.clone(),
        root_offset,
        records,
    })
}

/// Flattens, resolves and assembles `tree` in one pass without a listing
pub fn serialize_tree(catalog: &impl StructCatalog, tree: &ValueTree) -> Result<Artifact> {
    serialize_with(catalog, tree, &mut NullWriter)
}

/// Like [`serialize_tree`], reporting the segments to `writer`
pub fn serialize_with<W: ListingWriter>(
    catalog: &impl StructCatalog,
    tree: &ValueTree,
    writer: &mut W,
) -> Result<Artifact> {
    let mut cache = EncodeCache::new();
    let layout = resolve(catalog, tree, &mut cache)?;
    assemble(catalog, tree, &layout, &mut cache, writer)
}

/// Human-readable rendering of a field value for listings
pub fn display_value(
    catalog: &impl StructCatalog,
    tree: &ValueTree,
    kind: FieldKind,
    value: &Value,
) -> String {
    match value {
        Value::Bool(b) => b.to_string(),
        Value::Unsigned(v) if kind == FieldKind::Color => format!(
            "#{:02x}{:02x}{:02x}",
            v & 0xFF,
            (v >> 8) & 0xFF,
            (v >> 16) & 0xFF
        ),
        Value::Unsigned(v) => v.to_string(),
        Value::Signed(v) => v.to_string(),
        Value::Float(v) => format_float(*v),
        Value::String(None) | Value::Struct(None) => "NULL".to_string(),
        Value::String(Some(s)) => format!("\"{}\"", escape_string(s)),
        Value::Struct(Some(id)) => tree.short_name(catalog, *id),
        Value::Array(ids) => {
            let names: Vec<_> = ids.iter().map(|&id| tree.short_name(catalog, id)).collect();
            format!("[{}]", names.join(", "))
        }
    }
}

fn listing_error(_: std::fmt::Error) -> Error {
    Error::internal("failed to write listing")
}
