//! JSON schema files.
//!
//! ```json
//! {
//!   "version": "1.0",
//!   "root": "Simple",
//!   "structs": [
//!     { "name": "SimpleXY", "fields": [
//!         { "name": "x", "type": "i32", "default": 0 } ] },
//!     { "name": "Simple", "fields": [
//!         { "name": "xy", "type": "struct", "struct": "SimpleXY", "default": { "x": 5 } } ] }
//!   ]
//! }
//! ```
//!
//! A missing `default` means the zero value of the type, except for struct
//! fields where it means an instance built from the nested type's defaults.
//! An explicit `null` struct default is a null pointer.

use super::{DefaultValue, FieldKind, FieldSchema, Schema, StructDefault, StructId, StructSchema};
use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer};
use serde_json::Value as Json;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SchemaFile {
    version: String,
    root: String,
    structs: Vec<StructDef>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StructDef {
    name: String,
    #[serde(default)]
    fields: Vec<FieldDef>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FieldDef {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "struct", default)]
    target: Option<String>,
    #[serde(default, deserialize_with = "present")]
    default: Option<Json>,
    #[serde(default)]
    no_store: bool,
    #[serde(default)]
    comment: Option<String>,
}

/// Keeps an explicit `null` distinct from a missing key
fn present<'de, D>(deserializer: D) -> std::result::Result<Option<Json>, D::Error>
where
    D: Deserializer<'de>,
{
    Json::deserialize(deserializer).map(Some)
}

pub(super) fn parse(text: &str) -> Result<Schema> {
    let file: SchemaFile = serde_json::from_str(text)?;

    let ids: HashMap<&str, StructId> = file
        .structs
        .iter()
        .enumerate()
        .map(|(i, s)| (s.name.as_str(), StructId::new(i)))
        .collect();

    // Kinds first: defaults of struct fields are parsed against the nested type
    let mut kinds = Vec::with_capacity(file.structs.len());
    for stru in &file.structs {
        let mut fields = Vec::with_capacity(stru.fields.len());
        for field in &stru.fields {
            let target = match &field.target {
                Some(name) => Some(
                    *ids.get(name.as_str())
                        .ok_or_else(|| Error::unknown_struct(name.as_str()))?,
                ),
                None => None,
            };
            let kind = FieldKind::from_tag(&field.kind, target).ok_or_else(|| {
                Error::UnknownFieldKind {
                    struct_name: stru.name.clone(),
                    field: field.name.clone(),
                    kind: field.kind.clone(),
                }
            })?;
            fields.push(kind);
        }
        kinds.push(fields);
    }

    let parser = DefaultParser {
        file: &file,
        kinds: &kinds,
    };

    let mut structs = Vec::with_capacity(file.structs.len());
    for (stru, stru_kinds) in file.structs.iter().zip(&kinds) {
        let mut schema = StructSchema::new(&stru.name);
        for (field, &kind) in stru.fields.iter().zip(stru_kinds) {
            let default = parser.parse(&stru.name, &field.name, kind, field.default.as_ref())?;
            let mut field_schema = FieldSchema::new(&field.name, kind, default);
            field_schema.no_store = field.no_store;
            field_schema.comment = field.comment.clone();
            schema = schema.field(field_schema);
        }
        structs.push(schema);
    }

    let root = *ids
        .get(file.root.as_str())
        .ok_or_else(|| Error::unknown_struct(file.root.as_str()))?;

    debug!(
        "Loaded schema: {} structs, root '{}', version {}",
        structs.len(),
        file.root,
        file.version
    );

    Schema::new(structs, root, &file.version)
}

struct DefaultParser<'a> {
    file: &'a SchemaFile,
    kinds: &'a [Vec<FieldKind>],
}

impl DefaultParser<'_> {
    fn parse(
        &self,
        owner: &str,
        field: &str,
        kind: FieldKind,
        value: Option<&Json>,
    ) -> Result<DefaultValue> {
        let invalid = |details: &str| Error::invalid_default(owner, field, details);

        let Some(value) = value else {
            return Ok(zero_default(kind));
        };

        let default = match kind {
            FieldKind::Bool => DefaultValue::Bool(value.as_bool().ok_or_else(|| invalid("expected a boolean"))?),
            FieldKind::U16 | FieldKind::U32 | FieldKind::U64 => DefaultValue::Unsigned(
                value
                    .as_u64()
                    .ok_or_else(|| invalid("expected a non-negative integer"))?,
            ),
            FieldKind::Color => DefaultValue::Unsigned(
                parse_color(value).ok_or_else(|| invalid("expected an integer, \"#rrggbb\" or \"0x...\""))?,
            ),
            FieldKind::I16 | FieldKind::I32 => DefaultValue::Signed(
                value.as_i64().ok_or_else(|| invalid("expected an integer"))?,
            ),
            FieldKind::Float => {
                let v = value.as_f64().ok_or_else(|| invalid("expected a number"))?;
                if !v.is_finite() || v.abs() > f64::from(f32::MAX) {
                    return Err(invalid(&format!("{} does not fit a 32-bit float", v)));
                }
                DefaultValue::Float(v as f32)
            }
            FieldKind::String | FieldKind::WString => match value {
                Json::Null => DefaultValue::String(None),
                Json::String(s) => DefaultValue::String(Some(s.clone())),
                _ => return Err(invalid("expected a string or null")),
            },
            FieldKind::Struct(target) => match value {
                Json::Null => DefaultValue::Struct(None),
                _ => DefaultValue::Struct(Some(self.parse_struct(owner, field, target, value)?)),
            },
            FieldKind::Array(target) => match value {
                Json::Null => DefaultValue::Array(Vec::new()),
                Json::Array(elements) => DefaultValue::Array(
                    elements
                        .iter()
                        .map(|element| self.parse_struct(owner, field, target, element))
                        .collect::<Result<_>>()?,
                ),
                _ => return Err(invalid("expected a list of objects")),
            },
        };
        Ok(default)
    }

    fn parse_struct(
        &self,
        owner: &str,
        field: &str,
        target: StructId,
        value: &Json,
    ) -> Result<StructDefault> {
        let Json::Object(map) = value else {
            return Err(Error::invalid_default(owner, field, "expected an object"));
        };

        let stru = &self.file.structs[target.index()];
        let kinds = &self.kinds[target.index()];
        let mut nested = StructDefault::new();
        for (name, value) in map {
            let index = stru
                .fields
                .iter()
                .position(|f| &f.name == name)
                .ok_or_else(|| {
                    Error::invalid_default(&stru.name, name.as_str(), "no such field to override")
                })?;
            let parsed = self.parse(&stru.name, name, kinds[index], Some(value))?;
            nested = nested.with(name.as_str(), parsed);
        }
        Ok(nested)
    }
}

fn zero_default(kind: FieldKind) -> DefaultValue {
    match kind {
        FieldKind::Bool => DefaultValue::Bool(false),
        FieldKind::U16 | FieldKind::U32 | FieldKind::U64 | FieldKind::Color => {
            DefaultValue::Unsigned(0)
        }
        FieldKind::I16 | FieldKind::I32 => DefaultValue::Signed(0),
        FieldKind::Float => DefaultValue::Float(0.0),
        FieldKind::String | FieldKind::WString => DefaultValue::String(None),
        FieldKind::Struct(_) => DefaultValue::Struct(Some(StructDefault::new())),
        FieldKind::Array(_) => DefaultValue::Array(Vec::new()),
    }
}

/// `#rrggbb` is stored as `0x00bbggrr`, matching the native COLORREF layout
fn parse_color(value: &Json) -> Option<u64> {
    match value {
        Json::Number(n) => n.as_u64(),
        Json::String(s) => {
            if let Some(hex) = s.strip_prefix('#') {
                if hex.len() != 6 {
                    return None;
                }
                let rgb = u32::from_str_radix(hex, 16).ok()?;
                let (r, g, b) = ((rgb >> 16) & 0xFF, (rgb >> 8) & 0xFF, rgb & 0xFF);
                Some((r | (g << 8) | (b << 16)) as u64)
            } else if let Some(hex) = s.strip_prefix("0x") {
                u64::from_str_radix(hex, 16).ok()
            } else {
                None
            }
        }
        _ => None,
    }
}
