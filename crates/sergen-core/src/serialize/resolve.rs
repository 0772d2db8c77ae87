//! Offset assignment.

use super::flatten::flatten;
use crate::encoding::{encode_field_to_vec, uvarint_len, EncodeCache, FieldContext, FieldKey, OffsetTable};
use crate::error::{Error, Result};
use crate::schema::StructCatalog;
use crate::value::{InstanceId, ValueTree};
use crate::{HEADER_SIZE, RECORD_TAG_SIZE};
use tracing::{debug, trace};

/// Where every record of a serialization pass lands in the blob
#[derive(Debug, Clone)]
pub struct Layout {
    order: Vec<InstanceId>,
    offsets: OffsetTable,
    sizes: Vec<u32>,
    total_size: u32,
}

impl Layout {
    /// Instances in record order; the root is last
    pub fn order(&self) -> &[InstanceId] {
        &self.order
    }

    /// Offsets indexed by instance
    pub fn offsets(&self) -> &OffsetTable {
        &self.offsets
    }

    /// Offset of the record of `id`
    pub fn offset_of(&self, id: InstanceId) -> Option<u32> {
        self.offsets.get(id)
    }

    /// Record sizes, parallel to [`order`](Self::order)
    pub fn sizes(&self) -> &[u32] {
        &self.sizes
    }

    /// The root instance
    pub fn root(&self) -> Result<InstanceId> {
        self.order
            .last()
            .copied()
            .ok_or_else(|| Error::internal("layout has no records"))
    }

    /// Offset of the root record, as written into the header
    pub fn root_offset(&self) -> Result<u32> {
        let root = self.root()?;
        self.offset_of(root)
            .ok_or_else(|| Error::internal("root record has no offset"))
    }

    /// Size of the whole blob, header included
    pub fn total_size(&self) -> u32 {
        self.total_size
    }
}

/// Assigns an offset to every instance reachable from the root.
///
/// Records are placed in flattened order, starting right after the header.
/// An instance's offset is taken before its fields are encoded; its fields
/// only reference instances placed earlier, so every reference resolves.
/// The record size is the encoded fields plus the magic tag plus the uvarint
/// field count.
///
/// All stored fields end up in `cache`, so the assembler writes exactly the
/// bytes that were measured here.
pub fn resolve(
    catalog: &impl StructCatalog,
    tree: &ValueTree,
    cache: &mut EncodeCache,
) -> Result<Layout> {
    let order = flatten(tree)?;
    let mut offsets = OffsetTable::new(tree.len());
    let mut sizes = Vec::with_capacity(order.len());
    let mut offset = u64::from(HEADER_SIZE);

    for &id in &order {
        let instance = tree.instance(id)?;
        let struct_id = instance.struct_id();
        let struct_name = catalog
            .struct_name(struct_id)
            .ok_or_else(|| Error::unknown_struct(format!("#{}", struct_id.index())))?;
        let fields = catalog
            .stored_fields(struct_id)
            .ok_or_else(|| Error::unknown_struct(struct_name))?;

        let start = to_offset(offset)?;
        offsets.assign(id, start)?;

        let ctx = FieldContext {
            struct_name,
            tree,
            offsets: &offsets,
        };
        let mut fields_len = 0u64;
        for field in &fields {
            let value = instance.value(field.slot).ok_or_else(|| {
                Error::internal(format!("{} has no value for '{}'", id, field.name))
            })?;
            let key = FieldKey {
                instance: id,
                slot: field.slot,
            };
            let bytes = cache.get_or_encode(key, || encode_field_to_vec(&ctx, field, value))?;
            fields_len += bytes.len() as u64;
        }

        let record_len =
            fields_len + u64::from(RECORD_TAG_SIZE) + uvarint_len(fields.len() as u64) as u64;
        offset += record_len;
        sizes.push(to_offset(record_len)?);

        trace!(
            "Placed {} ({}) at {:#x}, {} bytes",
            id,
            struct_name,
            start,
            record_len
        );
    }

    let total_size = to_offset(offset)?;
    debug!(
        "Resolved {} records, {} bytes total",
        order.len(),
        total_size
    );

    Ok(Layout {
        order,
        offsets,
        sizes,
        total_size,
    })
}

fn to_offset(value: u64) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::BlobTooLarge { size: value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{
        DefaultValue, FieldKind, FieldSchema, Schema, StructDefault, StructId, StructSchema,
    };

    fn schema() -> Schema {
        let xy = StructSchema::new("XY")
            .field(FieldSchema::new("x", FieldKind::I32, DefaultValue::Signed(-1)))
            .field(FieldSchema::new("y", FieldKind::I32, DefaultValue::Signed(200)));
        let root = StructSchema::new("Root")
            .field(FieldSchema::new(
                "xy",
                FieldKind::Struct(StructId::new(0)),
                DefaultValue::Struct(Some(StructDefault::new())),
            ))
            .field(FieldSchema::new(
                "items",
                FieldKind::Array(StructId::new(0)),
                DefaultValue::Array(vec![StructDefault::new(), StructDefault::new()]),
            ))
            .field(
                FieldSchema::new("scratch", FieldKind::String, DefaultValue::String(Some("x".into())))
                    .no_store(),
            );
        Schema::new(vec![xy, root], StructId::new(1), "1.0").unwrap()
    }

    #[test]
    fn test_offsets_and_sizes() {
        let schema = schema();
        let tree = ValueTree::from_defaults(&schema).unwrap();
        let mut cache = EncodeCache::new();
        let layout = resolve(&schema, &tree, &mut cache).unwrap();

        // XY record: tag(4) + count(1) + x(1) + y(2) = 8
        // Root record: tag(4) + count(1) + xy(1) + items(1 + 2) = 9
        assert_eq!(layout.order().len(), 4);
        assert_eq!(layout.sizes(), &[8, 8, 8, 9]);
        assert_eq!(layout.total_size(), 12 + 8 * 3 + 9);
        assert_eq!(layout.root_offset().unwrap(), 12 + 8 * 3);

        let mut expected = 12;
        for &id in layout.order() {
            assert_eq!(layout.offset_of(id), Some(expected));
            expected += 8;
        }
    }

    #[test]
    fn test_references_point_backwards() {
        let schema = schema();
        let tree = ValueTree::from_defaults(&schema).unwrap();
        let mut cache = EncodeCache::new();
        let layout = resolve(&schema, &tree, &mut cache).unwrap();

        for &id in layout.order() {
            let own = layout.offset_of(id).unwrap();
            for child in tree.instance(id).unwrap().children() {
                assert!(layout.offset_of(child).unwrap() < own);
            }
        }
    }

    #[test]
    fn test_no_store_fields_not_encoded() {
        let schema = schema();
        let tree = ValueTree::from_defaults(&schema).unwrap();
        let mut cache = EncodeCache::new();
        let layout = resolve(&schema, &tree, &mut cache).unwrap();
        let root = layout.root().unwrap();
        assert!(cache.get(FieldKey { instance: root, slot: 2 }).is_none());
        assert!(cache.get(FieldKey { instance: root, slot: 1 }).is_some());
    }
}
