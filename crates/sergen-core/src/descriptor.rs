//! Descriptor tables for the generic runtime.
//!
//! A [`DescriptorTable`] describes the native layout of one struct type: its
//! size and alignment, and for every persisted field the member offset, a
//! [`TypeTag`] and the nested type for struct and array fields. A runtime
//! walking these tables can decode, encode and free instances of any type
//! without per-type code.
//!
//! Native layout follows the usual C rules: members in declaration order,
//! each aligned to its natural alignment, the struct padded to the largest
//! member alignment. Pointers are [`PointerWidth`] wide; `uint64_t` is always
//! 8-aligned.

use crate::schema::{FieldKind, Schema, StoredField, StructCatalog, StructId};
use crate::version::Version;
use std::fmt;
use tracing::debug;

/// Type tag stored in a field descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    /// `bool`
    Bool,
    /// `int16_t`
    I16,
    /// `uint16_t`
    U16,
    /// `int32_t`
    I32,
    /// `uint32_t`, also used for colors
    U32,
    /// `uint64_t`
    U64,
    /// `float`
    Float,
    /// UTF-8 string
    Str,
    /// Wide string
    WStr,
    /// Pointer to a nested struct
    StructPtr,
    /// Pointer to an array of struct pointers
    Array,
}

impl TypeTag {
    /// Tag for a field kind
    pub fn of(kind: FieldKind) -> Self {
        match kind {
            FieldKind::Bool => TypeTag::Bool,
            FieldKind::I16 => TypeTag::I16,
            FieldKind::U16 => TypeTag::U16,
            FieldKind::I32 => TypeTag::I32,
            FieldKind::U32 | FieldKind::Color => TypeTag::U32,
            FieldKind::U64 => TypeTag::U64,
            FieldKind::Float => TypeTag::Float,
            FieldKind::String => TypeTag::Str,
            FieldKind::WString => TypeTag::WStr,
            FieldKind::Struct(_) => TypeTag::StructPtr,
            FieldKind::Array(_) => TypeTag::Array,
        }
    }

    /// Name of the enumerator in the generated C code
    pub fn c_name(self) -> &'static str {
        match self {
            TypeTag::Bool => "TYPE_BOOL",
            TypeTag::I16 => "TYPE_I16",
            TypeTag::U16 => "TYPE_U16",
            TypeTag::I32 => "TYPE_I32",
            TypeTag::U32 => "TYPE_U32",
            TypeTag::U64 => "TYPE_U64",
            TypeTag::Float => "TYPE_FLOAT",
            TypeTag::Str => "TYPE_STR",
            TypeTag::WStr => "TYPE_WSTR",
            TypeTag::StructPtr => "TYPE_STRUCT_PTR",
            TypeTag::Array => "TYPE_ARRAY",
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.c_name())
    }
}

/// Width of a native pointer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PointerWidth {
    /// 4-byte pointers
    P32,
    /// 8-byte pointers
    #[default]
    P64,
}

impl PointerWidth {
    /// Pointer size in bytes
    pub fn bytes(self) -> u32 {
        match self {
            PointerWidth::P32 => 4,
            PointerWidth::P64 => 8,
        }
    }

    /// Width for a pointer size in bytes, if supported
    pub fn from_bytes(bytes: u32) -> Option<Self> {
        match bytes {
            4 => Some(PointerWidth::P32),
            8 => Some(PointerWidth::P64),
            _ => None,
        }
    }
}

/// Configuration for native layout computation
#[derive(Debug, Clone, Default)]
pub struct LayoutConfig {
    /// Pointer width of the target (default: 8 bytes)
    pub pointer_width: PointerWidth,
}

impl LayoutConfig {
    /// Creates a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the pointer width
    pub fn pointer_width(mut self, width: PointerWidth) -> Self {
        self.pointer_width = width;
        self
    }

    /// Native size and alignment of a member of `kind`
    pub fn size_align(&self, kind: FieldKind) -> (u32, u32) {
        match kind {
            FieldKind::Bool => (1, 1),
            FieldKind::I16 | FieldKind::U16 => (2, 2),
            FieldKind::I32 | FieldKind::U32 | FieldKind::Color | FieldKind::Float => (4, 4),
            FieldKind::U64 => (8, 8),
            FieldKind::String | FieldKind::WString | FieldKind::Struct(_) | FieldKind::Array(_) => {
                let ptr = self.pointer_width.bytes();
                (ptr, ptr)
            }
        }
    }
}

/// Native C type of a member of `kind`
pub fn c_type(kind: FieldKind, catalog: &impl StructCatalog) -> String {
    let name = |id: StructId| catalog.struct_name(id).unwrap_or("void");
    match kind {
        FieldKind::Bool => "bool".to_string(),
        FieldKind::I16 => "int16_t".to_string(),
        FieldKind::U16 => "uint16_t".to_string(),
        FieldKind::I32 => "int32_t".to_string(),
        FieldKind::U32 | FieldKind::Color => "uint32_t".to_string(),
        FieldKind::U64 => "uint64_t".to_string(),
        FieldKind::Float => "float".to_string(),
        FieldKind::String => "const char *".to_string(),
        FieldKind::WString => "const WCHAR *".to_string(),
        FieldKind::Struct(id) => format!("{} *", name(id)),
        FieldKind::Array(id) => format!("Vec<{} *> *", name(id)),
    }
}

/// One member of a native struct
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    /// Member name
    pub name: String,
    /// Position among all fields of the struct
    pub slot: usize,
    /// Declared kind
    pub kind: FieldKind,
    /// Tag written into the table
    pub tag: TypeTag,
    /// Byte offset of the member in the native struct
    pub offset: u32,
    /// Nested struct type of struct and array members
    pub nested: Option<StructId>,
}

/// Layout of one native struct type
#[derive(Debug, Clone, PartialEq)]
pub struct DescriptorTable {
    /// The struct type described
    pub struct_id: StructId,
    /// Type name
    pub name: String,
    /// `sizeof` the native struct
    pub size: u32,
    /// `alignof` the native struct
    pub align: u32,
    /// Total number of fields, persisted or not
    pub slot_count: usize,
    /// Persisted members in record order
    pub fields: Vec<FieldDescriptor>,
    /// Internal members: zero-initialized, never persisted
    pub internal: Vec<FieldDescriptor>,
}

impl DescriptorTable {
    /// Number of persisted fields
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Persisted and internal members in slot order
    pub fn members(&self) -> Vec<&FieldDescriptor> {
        let mut members: Vec<_> = self.fields.iter().chain(&self.internal).collect();
        members.sort_by_key(|f| f.slot);
        members
    }

    fn build(schema: &Schema, id: StructId, config: &LayoutConfig) -> Option<Self> {
        let stru = schema.get(id)?;
        let mut fields = Vec::new();
        let mut internal = Vec::new();
        let mut offset = 0u32;
        let mut align = 1u32;

        for (slot, field) in stru.fields.iter().enumerate() {
            let (size, field_align) = config.size_align(field.kind);
            offset = offset.next_multiple_of(field_align);
            align = align.max(field_align);

            let descriptor = FieldDescriptor {
                name: field.name.clone(),
                slot,
                kind: field.kind,
                tag: TypeTag::of(field.kind),
                offset,
                nested: field.kind.target(),
            };
            if field.is_stored() {
                fields.push(descriptor);
            } else {
                internal.push(descriptor);
            }
            offset += size;
        }

        // C++ gives empty structs size 1
        let size = offset.max(1).next_multiple_of(align);

        Some(Self {
            struct_id: id,
            name: stru.name.clone(),
            size,
            align,
            slot_count: stru.fields.len(),
            fields,
            internal,
        })
    }
}

/// Descriptor tables for every struct type of a schema
#[derive(Debug, Clone)]
pub struct DescriptorSet {
    tables: Vec<DescriptorTable>,
    order: Vec<StructId>,
    root: StructId,
    version: Version,
    config: LayoutConfig,
}

impl DescriptorSet {
    /// Computes the tables for `schema`
    pub fn generate(schema: &Schema, config: &LayoutConfig) -> Self {
        let tables: Vec<_> = (0..schema.structs().len())
            .filter_map(|index| DescriptorTable::build(schema, StructId::new(index), config))
            .collect();

        debug!(
            "Generated {} descriptor tables for {}-byte pointers",
            tables.len(),
            config.pointer_width.bytes()
        );

        Self {
            tables,
            order: schema.dependency_order(),
            root: schema.root(),
            version: schema.version().clone(),
            config: config.clone(),
        }
    }

    /// Table of one struct type
    pub fn get(&self, id: StructId) -> Option<&DescriptorTable> {
        self.tables.get(id.index())
    }

    /// The root struct type
    pub fn root(&self) -> StructId {
        self.root
    }

    /// Table of the root struct type
    pub fn root_table(&self) -> Option<&DescriptorTable> {
        self.get(self.root)
    }

    /// The schema version the tables were generated from
    pub fn version(&self) -> &Version {
        &self.version
    }

    /// The layout the tables were computed for
    pub fn layout(&self) -> &LayoutConfig {
        &self.config
    }

    /// Number of tables
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Returns true if there are no tables
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Tables in dependency order: nested types before the types that
    /// reference them
    pub fn iter(&self) -> impl Iterator<Item = &DescriptorTable> {
        self.order.iter().filter_map(|&id| self.get(id))
    }
}

impl StructCatalog for DescriptorSet {
    fn version(&self) -> &Version {
        &self.version
    }

    fn struct_name(&self, id: StructId) -> Option<&str> {
        self.get(id).map(|t| t.name.as_str())
    }

    fn stored_fields(&self, id: StructId) -> Option<Vec<StoredField<'_>>> {
        let table = self.get(id)?;
        Some(
            table
                .fields
                .iter()
                .map(|f| StoredField {
                    slot: f.slot,
                    name: &f.name,
                    kind: f.kind,
                })
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DefaultValue, FieldSchema, StructDefault, StructSchema};
    use pretty_assertions::assert_eq;

    fn schema() -> Schema {
        let xy = StructSchema::new("SimpleXY")
            .field(FieldSchema::new("x", FieldKind::I32, DefaultValue::Signed(0)))
            .field(FieldSchema::new("y", FieldKind::I32, DefaultValue::Signed(0)));
        let root = StructSchema::new("Simple")
            .field(FieldSchema::new("bTrue", FieldKind::Bool, DefaultValue::Bool(true)))
            .field(FieldSchema::new("i32", FieldKind::I32, DefaultValue::Signed(0)))
            .field(FieldSchema::new(
                "xy",
                FieldKind::Struct(StructId::new(0)),
                DefaultValue::Struct(Some(StructDefault::new())),
            ))
            .field(FieldSchema::new("u16", FieldKind::U16, DefaultValue::Unsigned(0)))
            .field(FieldSchema::new("u64", FieldKind::U64, DefaultValue::Unsigned(0)))
            .field(
                FieldSchema::new("cache", FieldKind::String, DefaultValue::String(None)).no_store(),
            )
            .field(FieldSchema::new(
                "points",
                FieldKind::Array(StructId::new(0)),
                DefaultValue::Array(vec![]),
            ));
        Schema::new(vec![xy, root], StructId::new(1), "2.3").unwrap()
    }

    fn offsets(table: &DescriptorTable) -> Vec<(&str, u32)> {
        table
            .members()
            .into_iter()
            .map(|f| (f.name.as_str(), f.offset))
            .collect()
    }

    #[test]
    fn test_layout_64() {
        let set = DescriptorSet::generate(&schema(), &LayoutConfig::new());
        let table = set.root_table().unwrap();
        assert_eq!(
            offsets(table),
            vec![
                ("bTrue", 0),
                ("i32", 4),
                ("xy", 8),
                ("u16", 16),
                ("u64", 24),
                ("cache", 32),
                ("points", 40),
            ]
        );
        assert_eq!(table.size, 48);
        assert_eq!(table.align, 8);
        assert_eq!(table.slot_count, 7);
        assert_eq!(table.field_count(), 6);
        assert_eq!(table.internal.len(), 1);
    }

    #[test]
    fn test_layout_32() {
        let config = LayoutConfig::new().pointer_width(PointerWidth::P32);
        let set = DescriptorSet::generate(&schema(), &config);
        let table = set.root_table().unwrap();
        assert_eq!(
            offsets(table),
            vec![
                ("bTrue", 0),
                ("i32", 4),
                ("xy", 8),
                ("u16", 12),
                ("u64", 16),
                ("cache", 24),
                ("points", 28),
            ]
        );
        assert_eq!(table.size, 32);
    }

    #[test]
    fn test_tags_and_nested() {
        let set = DescriptorSet::generate(&schema(), &LayoutConfig::new());
        let table = set.root_table().unwrap();
        let xy = &table.fields[2];
        assert_eq!(xy.tag, TypeTag::StructPtr);
        assert_eq!(xy.nested, Some(StructId::new(0)));
        let points = table.fields.last().unwrap();
        assert_eq!(points.tag.c_name(), "TYPE_ARRAY");
        assert_eq!(TypeTag::of(FieldKind::Color), TypeTag::U32);
    }

    #[test]
    fn test_dependency_order() {
        let set = DescriptorSet::generate(&schema(), &LayoutConfig::new());
        let names: Vec<_> = set.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["SimpleXY", "Simple"]);
    }

    #[test]
    fn test_empty_struct_has_size_one() {
        let schema = Schema::new(vec![StructSchema::new("Empty")], StructId::new(0), "1").unwrap();
        let set = DescriptorSet::generate(&schema, &LayoutConfig::new());
        assert_eq!(set.root_table().unwrap().size, 1);
    }

    #[test]
    fn test_c_types() {
        let schema = schema();
        assert_eq!(c_type(FieldKind::WString, &schema), "const WCHAR *");
        assert_eq!(c_type(FieldKind::Struct(StructId::new(0)), &schema), "SimpleXY *");
        assert_eq!(
            c_type(FieldKind::Array(StructId::new(0)), &schema),
            "Vec<SimpleXY *> *"
        );
    }

    #[test]
    fn test_catalog_skips_internal_fields() {
        let set = DescriptorSet::generate(&schema(), &LayoutConfig::new());
        let stored = set.stored_fields(set.root()).unwrap();
        assert_eq!(stored.len(), 6);
        assert!(stored.iter().all(|f| f.name != "cache"));
        assert_eq!(stored.last().unwrap().slot, 6);
    }
}
