//! Schema model: struct types, their ordered fields and default values.
//!
//! A [`Schema`] is the input of the generator. It is either built in code
//! from [`StructSchema`] and [`FieldSchema`] values or loaded from a JSON
//! schema file (see [`Schema::from_json`]).
//!
//! Field order is significant: it fixes both the record layout of the binary
//! encoding and the member order of the generated native structs.

mod json;

use crate::error::{Error, Result};
use crate::version::Version;
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

/// Index of a struct type within its [`Schema`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StructId(usize);

impl StructId {
    /// Creates an id for the struct at `index` in the schema's struct list
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Position of the struct in the schema's struct list
    pub const fn index(self) -> usize {
        self.0
    }
}

/// The declared type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    /// `bool`, encoded as uvarint 0 or 1
    Bool,
    /// 16-bit signed integer
    I16,
    /// 16-bit unsigned integer
    U16,
    /// 32-bit signed integer
    I32,
    /// 32-bit unsigned integer
    U32,
    /// 64-bit unsigned integer
    U64,
    /// 24-bit RGB color stored as a 32-bit unsigned integer
    Color,
    /// 32-bit float, encoded as text
    Float,
    /// UTF-8 string
    String,
    /// Wide string (UTF-8 in the blob, UTF-16 in the native struct)
    WString,
    /// Pointer to a nested struct, possibly null
    Struct(StructId),
    /// Array of pointers to nested structs
    Array(StructId),
}

/// How a field kind is laid out in the binary encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// uvarint
    Unsigned,
    /// zig-zag varint
    Signed,
    /// shortest round-trip text through the string encoding
    Float,
    /// length-prefixed, zero-terminated
    String,
    /// uvarint offset of the referenced record
    Struct,
    /// uvarint count, then one uvarint offset per element
    Array,
}

impl FieldKind {
    /// Returns the binary encoding used for this kind
    pub fn encoding(self) -> Encoding {
        match self {
            FieldKind::Bool | FieldKind::U16 | FieldKind::U32 | FieldKind::U64 | FieldKind::Color => {
                Encoding::Unsigned
            }
            FieldKind::I16 | FieldKind::I32 => Encoding::Signed,
            FieldKind::Float => Encoding::Float,
            FieldKind::String | FieldKind::WString => Encoding::String,
            FieldKind::Struct(_) => Encoding::Struct,
            FieldKind::Array(_) => Encoding::Array,
        }
    }

    /// Returns the type tag as written in schema files
    pub fn name(self) -> &'static str {
        match self {
            FieldKind::Bool => "bool",
            FieldKind::I16 => "i16",
            FieldKind::U16 => "u16",
            FieldKind::I32 => "i32",
            FieldKind::U32 => "u32",
            FieldKind::U64 => "u64",
            FieldKind::Color => "color",
            FieldKind::Float => "float",
            FieldKind::String => "string",
            FieldKind::WString => "wstring",
            FieldKind::Struct(_) => "struct",
            FieldKind::Array(_) => "array",
        }
    }

    /// Parses a schema type tag. Struct and array tags need their target type.
    pub fn from_tag(tag: &str, target: Option<StructId>) -> Option<Self> {
        let kind = match tag {
            "bool" => FieldKind::Bool,
            "i16" => FieldKind::I16,
            "u16" => FieldKind::U16,
            "i32" => FieldKind::I32,
            "u32" => FieldKind::U32,
            "u64" => FieldKind::U64,
            "color" => FieldKind::Color,
            "float" => FieldKind::Float,
            "string" => FieldKind::String,
            "wstring" => FieldKind::WString,
            "struct" => FieldKind::Struct(target?),
            "array" => FieldKind::Array(target?),
            _ => return None,
        };
        Some(kind)
    }

    /// The nested struct type for struct and array kinds
    pub fn target(self) -> Option<StructId> {
        match self {
            FieldKind::Struct(id) | FieldKind::Array(id) => Some(id),
            _ => None,
        }
    }

    /// Returns true if an unsigned value fits this kind
    pub fn fits_unsigned(self, value: u64) -> bool {
        match self {
            FieldKind::Bool => value <= 1,
            FieldKind::U16 => value <= u16::MAX as u64,
            FieldKind::U32 | FieldKind::Color => value <= u32::MAX as u64,
            FieldKind::U64 => true,
            _ => false,
        }
    }

    /// Returns true if a signed value fits this kind
    pub fn fits_signed(self, value: i64) -> bool {
        match self {
            FieldKind::I16 => i16::try_from(value).is_ok(),
            FieldKind::I32 => i32::try_from(value).is_ok(),
            _ => false,
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Default value of a field, as declared in the schema
#[derive(Debug, Clone, PartialEq)]
pub enum DefaultValue {
    /// Boolean default
    Bool(bool),
    /// Default for unsigned and color fields
    Unsigned(u64),
    /// Default for signed fields
    Signed(i64),
    /// Float default
    Float(f32),
    /// String default; `None` is "no string", distinct from `""`
    String(Option<String>),
    /// Nested struct default; `None` is a null pointer
    Struct(Option<StructDefault>),
    /// One entry per array element
    Array(Vec<StructDefault>),
}

/// A nested struct value: the type's own defaults with some fields overridden
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructDefault {
    overrides: Vec<(String, DefaultValue)>,
}

impl StructDefault {
    /// An instance using the nested type's defaults for every field
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the default of one field
    pub fn with(mut self, field: impl Into<String>, value: DefaultValue) -> Self {
        self.overrides.push((field.into(), value));
        self
    }

    /// Returns the override for `field`, if any
    pub fn get(&self, field: &str) -> Option<&DefaultValue> {
        self.overrides
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }

    /// Iterates over the overrides in declaration order
    pub fn overrides(&self) -> impl Iterator<Item = (&str, &DefaultValue)> {
        self.overrides.iter().map(|(name, value)| (name.as_str(), value))
    }
}

/// A single field of a struct type
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSchema {
    /// Field name, used verbatim as the native member name
    pub name: String,
    /// Declared type
    pub kind: FieldKind,
    /// Default value
    pub default: DefaultValue,
    /// Internal field: present in the native struct, never persisted
    pub no_store: bool,
    /// Documentation copied into the generated header
    pub comment: Option<String>,
}

impl FieldSchema {
    /// Creates a persisted field
    pub fn new(name: impl Into<String>, kind: FieldKind, default: DefaultValue) -> Self {
        Self {
            name: name.into(),
            kind,
            default,
            no_store: false,
            comment: None,
        }
    }

    /// Marks the field as internal (not persisted)
    pub fn no_store(mut self) -> Self {
        self.no_store = true;
        self
    }

    /// Attaches a documentation comment
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Returns true if the field is written to the binary encoding
    pub fn is_stored(&self) -> bool {
        !self.no_store
    }
}

/// A struct type: a name and an ordered list of fields
#[derive(Debug, Clone, PartialEq)]
pub struct StructSchema {
    /// Type name
    pub name: String,
    /// Fields in declaration order
    pub fields: Vec<FieldSchema>,
}

impl StructSchema {
    /// Creates a struct type without fields
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Appends a field
    pub fn field(mut self, field: FieldSchema) -> Self {
        self.fields.push(field);
        self
    }

    /// Returns the index of the field called `name`
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Number of fields written to the binary encoding
    pub fn stored_count(&self) -> usize {
        self.fields.iter().filter(|f| f.is_stored()).count()
    }
}

/// A persisted field as seen by the encoder
#[derive(Debug, Clone, Copy)]
pub struct StoredField<'a> {
    /// Position of the field among all fields of its struct
    pub slot: usize,
    /// Field name
    pub name: &'a str,
    /// Declared type
    pub kind: FieldKind,
}

/// Type information the serializer needs, independent of where it comes from.
///
/// Implemented by [`Schema`] for the generator and by
/// [`DescriptorSet`](crate::descriptor::DescriptorSet) for the runtime, which
/// only has descriptor tables.
pub trait StructCatalog {
    /// Schema version written into the blob header
    fn version(&self) -> &Version;

    /// Name of a struct type
    fn struct_name(&self, id: StructId) -> Option<&str>;

    /// Persisted fields of a struct type, in record order
    fn stored_fields(&self, id: StructId) -> Option<Vec<StoredField<'_>>>;
}

/// A validated set of struct types with a designated root
#[derive(Debug, Clone)]
pub struct Schema {
    structs: Vec<StructSchema>,
    root: StructId,
    version: Version,
}

impl Schema {
    /// Creates and validates a schema.
    ///
    /// `root` indexes into `structs`. Fails on unknown struct references,
    /// duplicate names, defaults that do not fit their field, and defaults
    /// that would nest without end.
    pub fn new(structs: Vec<StructSchema>, root: StructId, version: &str) -> Result<Self> {
        let schema = Self {
            structs,
            root,
            version: Version::parse(version)?,
        };
        schema.validate()?;
        Ok(schema)
    }

    /// Parses and validates a JSON schema document
    pub fn from_json(text: &str) -> Result<Self> {
        json::parse(text)
    }

    /// Reads and validates a JSON schema file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| Error::file_read(path, e))?;
        json::parse(&text)
    }

    /// The root struct type
    pub fn root(&self) -> StructId {
        self.root
    }

    /// The schema version
    pub fn version(&self) -> &Version {
        &self.version
    }

    /// All struct types in declaration order
    pub fn structs(&self) -> &[StructSchema] {
        &self.structs
    }

    /// Looks up a struct type by id
    pub fn get(&self, id: StructId) -> Option<&StructSchema> {
        self.structs.get(id.0)
    }

    /// Looks up a struct type by name
    pub fn find(&self, name: &str) -> Option<StructId> {
        self.structs.iter().position(|s| s.name == name).map(StructId)
    }

    /// Struct types ordered so that every type comes after the types its
    /// fields reference.
    pub fn dependency_order(&self) -> Vec<StructId> {
        let mut order = Vec::with_capacity(self.structs.len());
        let mut seen = vec![false; self.structs.len()];
        for index in 0..self.structs.len() {
            self.post_order(StructId(index), &mut seen, &mut order);
        }
        order
    }

    fn post_order(&self, id: StructId, seen: &mut [bool], order: &mut Vec<StructId>) {
        if seen[id.0] {
            return;
        }
        seen[id.0] = true;
        for field in &self.structs[id.0].fields {
            if let Some(target) = field.kind.target() {
                self.post_order(target, seen, order);
            }
        }
        order.push(id);
    }

    fn validate(&self) -> Result<()> {
        if self.get(self.root).is_none() {
            return Err(Error::internal(format!(
                "root struct index {} out of range",
                self.root.0
            )));
        }

        let mut names = HashSet::new();
        for stru in &self.structs {
            if !names.insert(stru.name.as_str()) {
                return Err(Error::DuplicateName {
                    name: stru.name.clone(),
                    scope: "schema".to_string(),
                });
            }

            let mut field_names = HashSet::new();
            for field in &stru.fields {
                if !field_names.insert(field.name.as_str()) {
                    return Err(Error::DuplicateName {
                        name: field.name.clone(),
                        scope: format!("struct '{}'", stru.name),
                    });
                }
                if let Some(target) = field.kind.target() {
                    if self.get(target).is_none() {
                        return Err(Error::unknown_struct(format!("#{}", target.0)));
                    }
                }
            }
        }

        self.check_acyclic()?;

        for stru in &self.structs {
            for field in &stru.fields {
                self.check_default(&stru.name, field, &field.default)?;
            }
        }

        Ok(())
    }

    /// Rejects defaults that would expand forever.
    ///
    /// Struct types may refer to themselves; only a chain of non-null
    /// defaults leading back to the field it started from is an error. Each
    /// node is one field's declared default, and an override replaces the
    /// declared default of the field it names.
    fn check_acyclic(&self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            New,
            Active,
            Done,
        }

        struct Walk<'a> {
            schema: &'a Schema,
            marks: Vec<Vec<Mark>>,
        }

        impl Walk<'_> {
            fn field(&mut self, owner: StructId, slot: usize) -> Result<()> {
                match self.marks[owner.0][slot] {
                    Mark::Done => return Ok(()),
                    Mark::Active => {
                        return Err(Error::CyclicStruct {
                            name: self.schema.structs[owner.0].name.clone(),
                        })
                    }
                    Mark::New => {}
                }
                self.marks[owner.0][slot] = Mark::Active;
                let schema = self.schema;
                let field = &schema.structs[owner.0].fields[slot];
                self.default(field.kind, &field.default)?;
                self.marks[owner.0][slot] = Mark::Done;
                Ok(())
            }

            fn default(&mut self, kind: FieldKind, default: &DefaultValue) -> Result<()> {
                match (kind, default) {
                    (FieldKind::Struct(target), DefaultValue::Struct(Some(nested))) => {
                        self.instance(target, nested)
                    }
                    (FieldKind::Array(target), DefaultValue::Array(elements)) => {
                        for element in elements {
                            self.instance(target, element)?;
                        }
                        Ok(())
                    }
                    _ => Ok(()),
                }
            }

            fn instance(&mut self, id: StructId, overrides: &StructDefault) -> Result<()> {
                let schema = self.schema;
                for (slot, field) in schema.structs[id.0].fields.iter().enumerate() {
                    match overrides.get(&field.name) {
                        Some(value) => self.default(field.kind, value)?,
                        None => self.field(id, slot)?,
                    }
                }
                Ok(())
            }
        }

        let mut walk = Walk {
            schema: self,
            marks: self
                .structs
                .iter()
                .map(|s| vec![Mark::New; s.fields.len()])
                .collect(),
        };
        for (index, stru) in self.structs.iter().enumerate() {
            for slot in 0..stru.fields.len() {
                walk.field(StructId(index), slot)?;
            }
        }
        Ok(())
    }

    fn check_default(&self, owner: &str, field: &FieldSchema, default: &DefaultValue) -> Result<()> {
        let mismatch = || Error::KindMismatch {
            struct_name: owner.to_string(),
            field: field.name.clone(),
            expected: field.kind.name(),
        };
        let out_of_range = |value: String| Error::ValueOutOfRange {
            struct_name: owner.to_string(),
            field: field.name.clone(),
            value,
            kind: field.kind.name(),
        };

        match (field.kind, default) {
            (FieldKind::Bool, DefaultValue::Bool(_)) => Ok(()),
            (kind, DefaultValue::Unsigned(v)) if kind.encoding() == Encoding::Unsigned => {
                if kind == FieldKind::Bool {
                    return Err(mismatch());
                }
                if kind.fits_unsigned(*v) {
                    Ok(())
                } else {
                    Err(out_of_range(v.to_string()))
                }
            }
            (kind, DefaultValue::Signed(v)) if kind.encoding() == Encoding::Signed => {
                if kind.fits_signed(*v) {
                    Ok(())
                } else {
                    Err(out_of_range(v.to_string()))
                }
            }
            (FieldKind::Float, DefaultValue::Float(v)) if !v.is_finite() => {
                Err(out_of_range(v.to_string()))
            }
            (FieldKind::Float, DefaultValue::Float(_)) => Ok(()),
            (FieldKind::String | FieldKind::WString, DefaultValue::String(_)) => Ok(()),
            (FieldKind::Struct(target), DefaultValue::Struct(value)) => match value {
                Some(nested) => self.check_struct_default(target, nested),
                None => Ok(()),
            },
            (FieldKind::Array(target), DefaultValue::Array(elements)) => elements
                .iter()
                .try_for_each(|nested| self.check_struct_default(target, nested)),
            _ => Err(mismatch()),
        }
    }

    fn check_struct_default(&self, target: StructId, nested: &StructDefault) -> Result<()> {
        let stru = &self.structs[target.0];
        for (name, value) in nested.overrides() {
            let field = stru
                .field_index(name)
                .map(|i| &stru.fields[i])
                .ok_or_else(|| {
                    Error::invalid_default(&stru.name, name, "no such field to override")
                })?;
            self.check_default(&stru.name, field, value)?;
        }
        Ok(())
    }
}

impl StructCatalog for Schema {
    fn version(&self) -> &Version {
        &self.version
    }

    fn struct_name(&self, id: StructId) -> Option<&str> {
        self.get(id).map(|s| s.name.as_str())
    }

    fn stored_fields(&self, id: StructId) -> Option<Vec<StoredField<'_>>> {
        let stru = self.get(id)?;
        Some(
            stru.fields
                .iter()
                .enumerate()
                .filter(|(_, f)| f.is_stored())
                .map(|(slot, f)| StoredField {
                    slot,
                    name: &f.name,
                    kind: f.kind,
                })
                .collect(),
        )
    }
}
