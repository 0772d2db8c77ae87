//! Value trees: concrete struct instances to be encoded.
//!
//! Instances live in a [`ValueTree`] arena and refer to each other through
//! [`InstanceId`]s. Ids are handed out sequentially as instances are created,
//! which also gives every instance a stable short name for listings
//! (`SimpleXY_3`).

use crate::error::{Error, Result};
use crate::schema::{
    DefaultValue, Encoding, FieldKind, Schema, StructCatalog, StructDefault, StructId,
};
use std::fmt;

/// Index of an instance within its [`ValueTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(usize);

impl InstanceId {
    /// Position of the instance in the arena
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The current value of one field
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Boolean
    Bool(bool),
    /// Unsigned integer or color
    Unsigned(u64),
    /// Signed integer
    Signed(i64),
    /// Float
    Float(f32),
    /// String; `None` is "no string", distinct from `""`
    String(Option<String>),
    /// Nested struct; `None` is a null pointer
    Struct(Option<InstanceId>),
    /// Array elements in order
    Array(Vec<InstanceId>),
}

impl Value {
    /// The value a freshly allocated native struct holds for `kind`
    pub fn zero(kind: FieldKind) -> Self {
        match kind {
            FieldKind::Bool => Value::Bool(false),
            FieldKind::U16 | FieldKind::U32 | FieldKind::U64 | FieldKind::Color => {
                Value::Unsigned(0)
            }
            FieldKind::I16 | FieldKind::I32 => Value::Signed(0),
            FieldKind::Float => Value::Float(0.0),
            FieldKind::String | FieldKind::WString => Value::String(None),
            FieldKind::Struct(_) => Value::Struct(None),
            FieldKind::Array(_) => Value::Array(Vec::new()),
        }
    }

    /// Returns true if this value can be stored in a field of `kind`
    pub fn matches(&self, kind: FieldKind) -> bool {
        match (kind.encoding(), self) {
            (_, Value::Bool(_)) => kind == FieldKind::Bool,
            (Encoding::Unsigned, Value::Unsigned(_)) => kind != FieldKind::Bool,
            (Encoding::Signed, Value::Signed(_))
            | (Encoding::Float, Value::Float(_))
            | (Encoding::String, Value::String(_))
            | (Encoding::Struct, Value::Struct(_))
            | (Encoding::Array, Value::Array(_)) => true,
            _ => false,
        }
    }
}

/// One node of a value tree
#[derive(Debug, Clone, PartialEq)]
pub struct StructInstance {
    struct_id: StructId,
    values: Vec<Value>,
}

impl StructInstance {
    /// Creates an instance; `values` holds one entry per field of the type
    pub fn new(struct_id: StructId, values: Vec<Value>) -> Self {
        Self { struct_id, values }
    }

    /// The instance's struct type
    pub fn struct_id(&self) -> StructId {
        self.struct_id
    }

    /// Field values in declaration order
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Value of the field at `slot`
    pub fn value(&self, slot: usize) -> Option<&Value> {
        self.values.get(slot)
    }

    /// Replaces the value of the field at `slot`
    pub fn set(&mut self, slot: usize, value: Value) -> Result<()> {
        let entry = self
            .values
            .get_mut(slot)
            .ok_or_else(|| Error::internal(format!("field slot {} out of range", slot)))?;
        *entry = value;
        Ok(())
    }

    /// Instances referenced by struct and array fields, in field order
    pub fn children(&self) -> impl Iterator<Item = InstanceId> + '_ {
        self.values.iter().flat_map(|value| {
            let ids: &[InstanceId] = match value {
                Value::Struct(Some(id)) => std::slice::from_ref(id),
                Value::Array(ids) => ids,
                _ => &[],
            };
            ids.iter().copied()
        })
    }
}

/// An owned, self-contained copy of an instance and everything it references.
///
/// Two trees holding the same values compare equal through their nested form
/// regardless of how their arenas are numbered.
#[derive(Debug, Clone, PartialEq)]
pub struct NestedStruct {
    /// Struct type
    pub struct_id: StructId,
    /// Field values in declaration order
    pub values: Vec<NestedValue>,
}

/// A field value inside a [`NestedStruct`]
#[derive(Debug, Clone, PartialEq)]
pub enum NestedValue {
    /// Boolean
    Bool(bool),
    /// Unsigned integer or color
    Unsigned(u64),
    /// Signed integer
    Signed(i64),
    /// Float
    Float(f32),
    /// String
    String(Option<String>),
    /// Nested struct
    Struct(Option<Box<NestedStruct>>),
    /// Array elements
    Array(Vec<NestedStruct>),
}

/// Arena of struct instances with a designated root
#[derive(Debug, Clone, Default)]
pub struct ValueTree {
    instances: Vec<StructInstance>,
    root: Option<InstanceId>,
}

impl ValueTree {
    /// Creates an empty tree
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the tree of default values for `schema`'s root type
    pub fn from_defaults(schema: &Schema) -> Result<Self> {
        let mut tree = Self::new();
        let root = tree.instantiate(schema, schema.root(), None)?;
        tree.set_root(root);
        tree.validate(schema)?;
        Ok(tree)
    }

    /// Adds an instance to the arena
    pub fn insert(&mut self, instance: StructInstance) -> InstanceId {
        self.instances.push(instance);
        InstanceId(self.instances.len() - 1)
    }

    /// Designates the root instance
    pub fn set_root(&mut self, id: InstanceId) {
        self.root = Some(id);
    }

    /// The root instance
    pub fn root(&self) -> Result<InstanceId> {
        self.root
            .ok_or_else(|| Error::internal("value tree has no root instance"))
    }

    /// Looks up an instance
    pub fn get(&self, id: InstanceId) -> Option<&StructInstance> {
        self.instances.get(id.0)
    }

    /// Looks up an instance for modification
    pub fn get_mut(&mut self, id: InstanceId) -> Option<&mut StructInstance> {
        self.instances.get_mut(id.0)
    }

    /// Looks up an instance, failing with an internal error if it is missing
    pub fn instance(&self, id: InstanceId) -> Result<&StructInstance> {
        self.get(id)
            .ok_or_else(|| Error::internal(format!("dangling instance reference {}", id)))
    }

    /// Number of instances in the arena
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Returns true if the arena holds no instances
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Short listing name such as `SimpleXY_3`
    pub fn short_name(&self, catalog: &impl StructCatalog, id: InstanceId) -> String {
        let name = self
            .get(id)
            .and_then(|inst| catalog.struct_name(inst.struct_id))
            .unwrap_or("Unknown");
        format!("{}_{}", name, id.0)
    }

    fn instantiate(
        &mut self,
        schema: &Schema,
        struct_id: StructId,
        overrides: Option<&StructDefault>,
    ) -> Result<InstanceId> {
        let stru = schema
            .get(struct_id)
            .ok_or_else(|| Error::unknown_struct(format!("#{}", struct_id.index())))?;

        let mut values = Vec::with_capacity(stru.fields.len());
        for field in &stru.fields {
            let default = overrides
                .and_then(|o| o.get(&field.name))
                .unwrap_or(&field.default);
            let value = match (field.kind, default) {
                (_, DefaultValue::Bool(b)) => Value::Bool(*b),
                (_, DefaultValue::Unsigned(v)) => Value::Unsigned(*v),
                (_, DefaultValue::Signed(v)) => Value::Signed(*v),
                (_, DefaultValue::Float(v)) => Value::Float(*v),
                (_, DefaultValue::String(s)) => Value::String(s.clone()),
                (FieldKind::Struct(target), DefaultValue::Struct(nested)) => match nested {
                    Some(nested) => Value::Struct(Some(self.instantiate(schema, target, Some(nested))?)),
                    None => Value::Struct(None),
                },
                (FieldKind::Array(target), DefaultValue::Array(elements)) => {
                    let mut ids = Vec::with_capacity(elements.len());
                    for element in elements {
                        ids.push(self.instantiate(schema, target, Some(element))?);
                    }
                    Value::Array(ids)
                }
                _ => {
                    return Err(Error::KindMismatch {
                        struct_name: stru.name.clone(),
                        field: field.name.clone(),
                        expected: field.kind.name(),
                    })
                }
            };
            values.push(value);
        }

        Ok(self.insert(StructInstance::new(struct_id, values)))
    }

    /// Checks every instance against the schema.
    ///
    /// Each instance must have one value per field, values must match their
    /// field kinds, and nested instances must have the declared struct type.
    pub fn validate(&self, schema: &Schema) -> Result<()> {
        for instance in &self.instances {
            let stru = schema.get(instance.struct_id).ok_or_else(|| {
                Error::unknown_struct(format!("#{}", instance.struct_id.index()))
            })?;
            if instance.values.len() != stru.fields.len() {
                return Err(Error::internal(format!(
                    "instance of '{}' has {} values for {} fields",
                    stru.name,
                    instance.values.len(),
                    stru.fields.len()
                )));
            }

            for (field, value) in stru.fields.iter().zip(&instance.values) {
                if !value.matches(field.kind) {
                    return Err(Error::KindMismatch {
                        struct_name: stru.name.clone(),
                        field: field.name.clone(),
                        expected: field.kind.name(),
                    });
                }
                let Some(target) = field.kind.target() else {
                    continue;
                };
                let referenced: &[InstanceId] = match value {
                    Value::Struct(Some(id)) => std::slice::from_ref(id),
                    Value::Array(ids) => ids,
                    _ => &[],
                };
                for &id in referenced {
                    let child = self.instance(id)?;
                    if child.struct_id != target {
                        return Err(Error::ArrayElementMismatch {
                            struct_name: stru.name.clone(),
                            field: field.name.clone(),
                            expected: schema.struct_name(target).unwrap_or("?").to_string(),
                            found: schema.struct_name(child.struct_id).unwrap_or("?").to_string(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Deep-copies the instance `id` of `other` and everything it references
    /// into this tree.
    pub fn graft(&mut self, other: &ValueTree, id: InstanceId) -> Result<InstanceId> {
        let source = other.instance(id)?;
        let mut values = Vec::with_capacity(source.values.len());
        for value in &source.values {
            values.push(match value {
                Value::Struct(Some(child)) => Value::Struct(Some(self.graft(other, *child)?)),
                Value::Array(children) => Value::Array(
                    children
                        .iter()
                        .map(|&child| self.graft(other, child))
                        .collect::<Result<_>>()?,
                ),
                other_value => other_value.clone(),
            });
        }
        Ok(self.insert(StructInstance::new(source.struct_id, values)))
    }

    /// Resolves the root into its nested form
    pub fn to_nested(&self) -> Result<NestedStruct> {
        let mut path = Vec::new();
        self.nested(self.root()?, &mut path)
    }

    fn nested(&self, id: InstanceId, path: &mut Vec<InstanceId>) -> Result<NestedStruct> {
        if path.contains(&id) {
            return Err(Error::InstanceRevisited {
                instance: id.to_string(),
            });
        }
        path.push(id);

        let instance = self.instance(id)?;
        let mut values = Vec::with_capacity(instance.values.len());
        for value in &instance.values {
            values.push(match value {
                Value::Bool(b) => NestedValue::Bool(*b),
                Value::Unsigned(v) => NestedValue::Unsigned(*v),
                Value::Signed(v) => NestedValue::Signed(*v),
                Value::Float(v) => NestedValue::Float(*v),
                Value::String(s) => NestedValue::String(s.clone()),
                Value::Struct(None) => NestedValue::Struct(None),
                Value::Struct(Some(child)) => {
                    NestedValue::Struct(Some(Box::new(self.nested(*child, path)?)))
                }
                Value::Array(children) => NestedValue::Array(
                    children
                        .iter()
                        .map(|&child| self.nested(child, path))
                        .collect::<Result<_>>()?,
                ),
            });
        }

        path.pop();
        Ok(NestedStruct {
            struct_id: instance.struct_id,
            values,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldSchema, StructSchema};
    use pretty_assertions::assert_eq;

    fn schema() -> Schema {
        let xy = StructSchema::new("SimpleXY")
            .field(FieldSchema::new("x", FieldKind::I32, DefaultValue::Signed(1)))
            .field(FieldSchema::new("y", FieldKind::I32, DefaultValue::Signed(2)));
        let root = StructSchema::new("Simple")
            .field(FieldSchema::new(
                "xy",
                FieldKind::Struct(StructId::new(0)),
                DefaultValue::Struct(Some(StructDefault::new().with("y", DefaultValue::Signed(9)))),
            ))
            .field(FieldSchema::new(
                "list",
                FieldKind::Array(StructId::new(0)),
                DefaultValue::Array(vec![StructDefault::new(), StructDefault::new()]),
            ))
            .field(FieldSchema::new("name", FieldKind::String, DefaultValue::String(None)));
        Schema::new(vec![xy, root], StructId::new(1), "1.0").unwrap()
    }

    #[test]
    fn test_from_defaults() {
        let schema = schema();
        let tree = ValueTree::from_defaults(&schema).unwrap();
        assert_eq!(tree.len(), 4);

        let root = tree.instance(tree.root().unwrap()).unwrap();
        assert_eq!(root.struct_id(), StructId::new(1));
        let Value::Struct(Some(xy)) = root.value(0).unwrap() else {
            panic!("xy should be set");
        };
        assert_eq!(
            tree.instance(*xy).unwrap().values(),
            &[Value::Signed(1), Value::Signed(9)]
        );
        assert_eq!(root.children().count(), 3);
        assert_eq!(root.value(2), Some(&Value::String(None)));
    }

    #[test]
    fn test_short_name() {
        let schema = schema();
        let tree = ValueTree::from_defaults(&schema).unwrap();
        let root = tree.root().unwrap();
        assert_eq!(tree.short_name(&schema, root), format!("Simple_{}", root.index()));
    }

    #[test]
    fn test_validate_rejects_wrong_element_type() {
        let schema = schema();
        let mut tree = ValueTree::from_defaults(&schema).unwrap();
        let root = tree.root().unwrap();
        let stray = tree.insert(StructInstance::new(
            StructId::new(1),
            vec![Value::Struct(None), Value::Array(vec![]), Value::String(None)],
        ));
        tree.get_mut(root)
            .unwrap()
            .set(1, Value::Array(vec![stray]))
            .unwrap();
        assert!(matches!(
            tree.validate(&schema),
            Err(Error::ArrayElementMismatch { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_kind_mismatch() {
        let schema = schema();
        let mut tree = ValueTree::from_defaults(&schema).unwrap();
        let root = tree.root().unwrap();
        tree.get_mut(root).unwrap().set(2, Value::Signed(3)).unwrap();
        assert!(matches!(tree.validate(&schema), Err(Error::KindMismatch { .. })));
    }

    #[test]
    fn test_graft_copies_subtree() {
        let schema = schema();
        let source = ValueTree::from_defaults(&schema).unwrap();
        let mut target = ValueTree::new();
        let root = target.graft(&source, source.root().unwrap()).unwrap();
        target.set_root(root);
        assert_eq!(target.len(), source.len());
        assert_eq!(target.to_nested().unwrap(), source.to_nested().unwrap());
    }

    #[test]
    fn test_value_matches() {
        assert!(Value::Bool(true).matches(FieldKind::Bool));
        assert!(!Value::Unsigned(1).matches(FieldKind::Bool));
        assert!(Value::Unsigned(1).matches(FieldKind::Color));
        assert!(!Value::Bool(true).matches(FieldKind::U32));
        assert!(Value::String(None).matches(FieldKind::WString));
        assert!(!Value::Float(1.0).matches(FieldKind::I32));
    }
}
