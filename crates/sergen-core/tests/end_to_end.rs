use pretty_assertions::assert_eq;
use sergen_core::value::{NestedValue, StructInstance};
use sergen_core::{
    serialize_tree, CArrayWriter, CodeGenerator, DescriptorSet, Error, LayoutConfig, Runtime,
    Schema, Value, ValueTree, HEADER_SIZE, MAGIC_ID,
};
use std::io::Write;

const SCENARIO: &str = r#"{
    "version": "1.0",
    "root": "Simple",
    "structs": [
        { "name": "SimpleXY", "fields": [
            { "name": "x", "type": "i32", "default": 1 },
            { "name": "y", "type": "i32", "default": 2 } ] },
        { "name": "Simple", "fields": [
            { "name": "flag", "type": "bool", "default": true },
            { "name": "xy", "type": "struct", "struct": "SimpleXY" },
            { "name": "pts", "type": "array", "struct": "SimpleXY", "default": [ { "x": 3 }, { "y": -4 } ] },
            { "name": "name", "type": "string", "default": "ab" },
            { "name": "scratch", "type": "u64", "default": 5, "no_store": true } ] }
    ]
}"#;

const EVERY_KIND: &str = r##"{
    "version": "3.1.4",
    "root": "All",
    "structs": [
        { "name": "Leaf", "fields": [ { "name": "n", "type": "u16", "default": 1 } ] },
        { "name": "All", "fields": [
            { "name": "b", "type": "bool", "default": true },
            { "name": "i16", "type": "i16", "default": -32768 },
            { "name": "u16", "type": "u16", "default": 65535 },
            { "name": "i32", "type": "i32", "default": -2147483648 },
            { "name": "u32", "type": "u32", "default": 4294967295 },
            { "name": "u64", "type": "u64", "default": 18446744073709551615 },
            { "name": "col", "type": "color", "default": "#123456" },
            { "name": "f", "type": "float", "default": 0.1 },
            { "name": "hundred", "type": "float", "default": 100 },
            { "name": "s", "type": "string", "default": "Grüße, 世界" },
            { "name": "empty", "type": "string", "default": "" },
            { "name": "absent", "type": "wstring", "default": null },
            { "name": "leaf", "type": "struct", "struct": "Leaf", "default": { "n": 300 } },
            { "name": "none", "type": "struct", "struct": "Leaf", "default": null },
            { "name": "leaves", "type": "array", "struct": "Leaf", "default": [ {}, { "n": 2 }, {} ] },
            { "name": "nothing", "type": "array", "struct": "Leaf", "default": [] } ] }
    ]
}"##;

const LINKED: &str = r#"{
    "version": "1.0",
    "root": "List",
    "structs": [
        { "name": "Node", "fields": [
            { "name": "value", "type": "u32", "default": 1 },
            { "name": "next", "type": "struct", "struct": "Node", "default": null } ] },
        { "name": "List", "fields": [
            { "name": "head", "type": "struct", "struct": "Node", "default": { "value": 2 } } ] }
    ]
}"#;

fn magic() -> [u8; 4] {
    MAGIC_ID.to_le_bytes()
}

#[test]
fn test_scenario_bytes() {
    let schema = Schema::from_json(SCENARIO).unwrap();
    let tree = ValueTree::from_defaults(&schema).unwrap();
    let artifact = serialize_tree(&schema, &tree).unwrap();

    // Records: pts[1] @12, pts[0] @19, xy @26, root @33
    let mut expected = Vec::new();
    expected.extend_from_slice(&magic());
    expected.extend_from_slice(&[0x01, 0x00, 0x00, 0x00]);
    expected.extend_from_slice(&33u32.to_le_bytes());
    for (x, y) in [(0x02, 0x07), (0x06, 0x04), (0x02, 0x04)] {
        expected.extend_from_slice(&magic());
        expected.extend_from_slice(&[0x02, x, y]);
    }
    expected.extend_from_slice(&magic());
    expected.extend_from_slice(&[
        0x04, // stored fields
        0x01, // flag
        0x1a, // xy @26
        0x02, 0x13, 0x0c, // pts @19, @12
        0x03, b'a', b'b', 0x00, // name
    ]);

    assert_eq!(artifact.bytes().as_ref(), expected.as_slice());
    assert_eq!(artifact.root_offset(), 33);
    assert_eq!(artifact.len(), 12 + 3 * 7 + 14);
}

#[test]
fn test_scenario_offsets_point_backwards() {
    let schema = Schema::from_json(SCENARIO).unwrap();
    let tree = ValueTree::from_defaults(&schema).unwrap();
    let artifact = serialize_tree(&schema, &tree).unwrap();

    let offset_of = |id| {
        artifact
            .records()
            .iter()
            .find(|r| r.instance == id)
            .map(|r| r.offset)
            .unwrap()
    };

    let mut next = HEADER_SIZE;
    for record in artifact.records() {
        assert_eq!(record.offset, next);
        next += record.size;
        for child in tree.instance(record.instance).unwrap().children() {
            assert!(offset_of(child) < record.offset);
        }
    }
    assert_eq!(
        artifact.records().last().unwrap().instance,
        tree.root().unwrap()
    );
}

#[test]
fn test_scenario_listing() {
    let schema = Schema::from_json(SCENARIO).unwrap();
    let tree = ValueTree::from_defaults(&schema).unwrap();
    let mut writer = CArrayWriter::new(String::new());
    sergen_core::artifact::serialize_with(&schema, &tree, &mut writer).unwrap();
    let listing = writer.into_inner();

    assert!(listing.starts_with("static const uint8_t gSimpleDefault[47] = {\n"));
    assert!(listing.contains("    0x21, 0x00, 0x00, 0x00, // top-level struct offset 0x21\n"));
    assert!(listing.contains("    // offset: 0x21 Simple_3\n"));
    assert!(listing.contains("    0x04, // 4 fields\n"));
    assert!(listing
        .contains("    0x02, 0x13, 0x0c, // Vec<SimpleXY *> * pts = [SimpleXY_1, SimpleXY_2]\n"));
    assert!(!listing.contains("scratch"));
}

#[test]
fn test_every_kind_round_trips() {
    let schema = Schema::from_json(EVERY_KIND).unwrap();
    let tree = ValueTree::from_defaults(&schema).unwrap();
    let artifact = serialize_tree(&schema, &tree).unwrap();

    let descriptors = DescriptorSet::generate(&schema, &LayoutConfig::new());
    let runtime = Runtime::new(&descriptors);
    let decoded = runtime.deserialize(artifact.bytes()).unwrap();

    assert_eq!(decoded.to_nested().unwrap(), tree.to_nested().unwrap());

    let values = decoded.to_nested().unwrap().values;
    assert_eq!(values[6], NestedValue::Unsigned(0x563412));
    assert_eq!(values[7], NestedValue::Float(0.1));
    assert_eq!(values[8], NestedValue::Float(100.0));
    assert_eq!(values[9], NestedValue::String(Some("Grüße, 世界".to_string())));
    assert_eq!(values[10], NestedValue::String(Some(String::new())));
    assert_eq!(values[11], NestedValue::String(None));
    assert_eq!(values[13], NestedValue::Struct(None));
    assert_eq!(values[15], NestedValue::Array(Vec::new()));
}

#[test]
fn test_float_hundred_is_exact_text() {
    let schema = Schema::from_json(EVERY_KIND).unwrap();
    let tree = ValueTree::from_defaults(&schema).unwrap();
    let artifact = serialize_tree(&schema, &tree).unwrap();
    let needle = [0x06, b'1', b'0', b'0', b'.', b'0', 0x00];
    assert!(artifact
        .bytes()
        .windows(needle.len())
        .any(|w| w == needle));
}

#[test]
fn test_version_header() {
    let schema = Schema::from_json(&SCENARIO.replace("\"1.0\"", "\"2.3\"")).unwrap();
    let tree = ValueTree::from_defaults(&schema).unwrap();
    let artifact = serialize_tree(&schema, &tree).unwrap();
    assert_eq!(&artifact.bytes()[4..8], &[0x02, 0x03, 0x00, 0x00]);
    assert_eq!(artifact.version().packed(), 0x0203_0000);
}

#[test]
fn test_modified_tree_round_trips() {
    let schema = Schema::from_json(SCENARIO).unwrap();
    let descriptors = DescriptorSet::generate(&schema, &LayoutConfig::new());
    let runtime = Runtime::new(&descriptors);
    let defaults = serialize_tree(&schema, &ValueTree::from_defaults(&schema).unwrap()).unwrap();

    let mut tree = runtime.deserialize(defaults.bytes()).unwrap();
    let root = tree.root().unwrap();
    let node = tree.get_mut(root).unwrap();
    node.set(0, Value::Bool(false)).unwrap();
    node.set(1, Value::Struct(None)).unwrap();
    node.set(3, Value::String(None)).unwrap();

    let saved = runtime.serialize(&tree).unwrap();
    let loaded = runtime
        .deserialize_or_default(saved.bytes(), defaults.bytes())
        .unwrap();
    assert!(!loaded.used_default);
    assert_eq!(loaded.tree.to_nested().unwrap(), tree.to_nested().unwrap());
}

#[test]
fn test_generated_blob_matches_listing_size() {
    let schema = Schema::from_json(SCENARIO).unwrap();
    let code = CodeGenerator::new(&schema).generate().unwrap();
    assert_eq!(code.artifact.len(), 47);
    assert!(code.source.contains("static const uint8_t gSimpleDefault[47] = {"));
    assert!(code.header.contains("    uint64_t           scratch;"));
}

#[test]
fn test_schema_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(SCENARIO.as_bytes()).unwrap();
    let schema = Schema::from_file(file.path()).unwrap();
    assert_eq!(schema.structs().len(), 2);

    let missing = file.path().with_extension("missing");
    assert!(matches!(
        Schema::from_file(&missing),
        Err(Error::FileRead { .. })
    ));
}

#[test]
fn test_invalid_schemas_are_rejected() {
    let cyclic = r#"{ "version": "1", "root": "A", "structs": [
        { "name": "A", "fields": [ { "name": "b", "type": "struct", "struct": "B" } ] },
        { "name": "B", "fields": [ { "name": "a", "type": "array", "struct": "A", "default": [ {} ] } ] } ] }"#;
    assert!(matches!(
        Schema::from_json(cyclic),
        Err(Error::CyclicStruct { .. })
    ));

    let out_of_range = SCENARIO.replace("\"default\": 1 }", "\"default\": 4294967296 }");
    assert!(Schema::from_json(&out_of_range).is_err());

    let bad_version = SCENARIO.replace("\"1.0\"", "\"1.255\"");
    assert!(matches!(
        Schema::from_json(&bad_version),
        Err(Error::InvalidVersion { .. })
    ));
}

#[test]
fn test_recursive_type_round_trips() {
    let schema = Schema::from_json(LINKED).unwrap();
    let descriptors = DescriptorSet::generate(&schema, &LayoutConfig::new());
    let runtime = Runtime::new(&descriptors);

    let mut tree = ValueTree::from_defaults(&schema).unwrap();
    let root = tree.root().unwrap();
    let Some(Value::Struct(Some(head))) = tree.get(root).unwrap().value(0).cloned() else {
        panic!("head should be present");
    };
    let node_type = tree.get(head).unwrap().struct_id();

    // head -> second -> third
    let third = tree.insert(StructInstance::new(
        node_type,
        vec![Value::Unsigned(4), Value::Struct(None)],
    ));
    let second = tree.insert(StructInstance::new(
        node_type,
        vec![Value::Unsigned(3), Value::Struct(Some(third))],
    ));
    tree.get_mut(head)
        .unwrap()
        .set(1, Value::Struct(Some(second)))
        .unwrap();

    let blob = runtime.serialize(&tree).unwrap();
    assert_eq!(blob.records().len(), 4);
    let decoded = runtime.deserialize(blob.bytes()).unwrap();
    assert_eq!(decoded.to_nested().unwrap(), tree.to_nested().unwrap());
}
