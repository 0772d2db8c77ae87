//! C source generation.
//!
//! [`CodeGenerator`] turns a [`Schema`] into a header/source pair:
//!
//! - the header declares one native struct per schema type (nested types
//!   first), the version define and the `Deserialize<Root>`,
//!   `Serialize<Root>` and `Free<Root>` prototypes
//! - the source holds the field and struct metadata tables, layout checks,
//!   the annotated default blob and the bodies of the top-level functions,
//!   which fall back to the default blob when the input does not decode
//!
//! The generated code expects `SerializeBin.h` to provide `FieldMetadata`,
//! `StructMetadata`, the `TYPE_*` enumerators, `Vec` and the generic
//! `Deserialize`/`Serialize`/`FreeStruct` functions.

use crate::artifact::{escape_string, serialize_with, Artifact, CArrayWriter};
use crate::descriptor::{c_type, DescriptorSet, DescriptorTable, LayoutConfig};
use crate::error::{Error, Result};
use crate::schema::Schema;
use crate::value::ValueTree;
use std::collections::HashSet;
use std::fmt::{self, Write as FmtWrite};
use tracing::{debug, info};

/// Configuration for code generation
#[derive(Debug, Clone)]
pub struct CodegenConfig {
    /// Indentation string (default: 4 spaces)
    pub indent_str: String,
    /// C++ namespace wrapping the generated code
    pub namespace: Option<String>,
    /// Base name of the generated files (default: root struct name)
    pub file_name: Option<String>,
    /// Copy field comments into the header
    pub include_comments: bool,
    /// Native layout
    pub layout: LayoutConfig,
}

impl Default for CodegenConfig {
    fn default() -> Self {
        Self {
            indent_str: "    ".to_string(),
            namespace: None,
            file_name: None,
            include_comments: true,
            layout: LayoutConfig::default(),
        }
    }
}

impl CodegenConfig {
    /// Creates a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the indentation string
    pub fn indent_str(mut self, s: impl Into<String>) -> Self {
        self.indent_str = s.into();
        self
    }

    /// Wraps the generated code in a namespace
    pub fn namespace(mut self, ns: impl Into<String>) -> Self {
        self.namespace = Some(ns.into());
        self
    }

    /// Sets the base name of the generated files
    pub fn file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    /// Sets whether to include comments
    pub fn include_comments(mut self, include: bool) -> Self {
        self.include_comments = include;
        self
    }

    /// Sets the native layout
    pub fn layout(mut self, layout: LayoutConfig) -> Self {
        self.layout = layout;
        self
    }
}

/// Output of one generator run
#[derive(Debug, Clone)]
pub struct GeneratedCode {
    /// Base name of the files, without extension
    pub file_name: String,
    /// Contents of `<file_name>.h`
    pub header: String,
    /// Contents of `<file_name>.cpp`
    pub source: String,
    /// The annotated default blob, as embedded in the source
    pub listing: String,
    /// The default blob
    pub artifact: Artifact,
    /// The descriptor tables behind the metadata
    pub descriptors: DescriptorSet,
}

/// Generates C code for a schema
#[derive(Debug)]
pub struct CodeGenerator<'a> {
    schema: &'a Schema,
    config: CodegenConfig,
}

impl<'a> CodeGenerator<'a> {
    /// Creates a generator with the default config
    pub fn new(schema: &'a Schema) -> Self {
        Self {
            schema,
            config: CodegenConfig::default(),
        }
    }

    /// Creates a new generator with custom config
    pub fn with_config(mut self, config: CodegenConfig) -> Self {
        self.config = config;
        self
    }

    /// Runs the whole pipeline.
    ///
    /// Nothing is returned unless every step succeeds.
    pub fn generate(&self) -> Result<GeneratedCode> {
        let root = self
            .schema
            .get(self.schema.root())
            .ok_or_else(|| Error::internal("schema has no root struct"))?;
        let file_name = self
            .config
            .file_name
            .clone()
            .unwrap_or_else(|| root.name.clone());

        let tree = ValueTree::from_defaults(self.schema)?;
        let mut writer = CArrayWriter::new(String::new()).indent_str(&self.config.indent_str);
        let artifact = serialize_with(self.schema, &tree, &mut writer)?;
        let listing = writer.into_inner();

        let descriptors = DescriptorSet::generate(self.schema, &self.config.layout);

        let emitter = Emitter {
            schema: self.schema,
            descriptors: &descriptors,
            config: &self.config,
            root_name: &root.name,
            file_name: &file_name,
        };
        let header = emitter.header().map_err(emit_error)?;
        let source = emitter.source(&listing).map_err(emit_error)?;

        info!(
            "Generated {} ({} structs, {}-byte default blob)",
            file_name,
            descriptors.len(),
            artifact.len()
        );

        Ok(GeneratedCode {
            file_name,
            header,
            source,
            listing,
            artifact,
            descriptors,
        })
    }
}

struct Emitter<'a> {
    schema: &'a Schema,
    descriptors: &'a DescriptorSet,
    config: &'a CodegenConfig,
    root_name: &'a str,
    file_name: &'a str,
}

impl Emitter<'_> {
    fn header(&self) -> std::result::Result<String, fmt::Error> {
        let mut out = String::new();
        write_banner(&mut out)?;
        let guard = format!("{}_h", self.file_name);
        writeln!(out, "#ifndef {}", guard)?;
        writeln!(out, "#define {}", guard)?;
        writeln!(out)?;
        self.open_namespace(&mut out)?;

        let forward = self.forward_refs();
        for name in &forward {
            writeln!(out, "struct {};", name)?;
        }
        if !forward.is_empty() {
            writeln!(out)?;
        }

        for table in self.descriptors.iter() {
            self.write_struct(&mut out, table)?;
        }

        let name = self.root_name;
        writeln!(
            out,
            "#define {}Version \"{}\"",
            name,
            self.schema.version()
        )?;
        writeln!(out)?;
        writeln!(
            out,
            "{name} *Deserialize{name}(const uint8_t *data, int dataLen, bool *usedDefaultOut);"
        )?;
        writeln!(out, "uint8_t *Serialize{name}({name} *, int *dataLenOut);")?;
        writeln!(out, "void Free{name}({name} *);")?;
        writeln!(out)?;

        self.close_namespace(&mut out)?;
        writeln!(out, "#endif")?;
        debug!("Emitted header for {}", self.file_name);
        Ok(out)
    }

    fn source(&self, listing: &str) -> std::result::Result<String, fmt::Error> {
        let mut out = String::new();
        write_banner(&mut out)?;
        writeln!(out, "#include \"BaseUtil.h\"")?;
        writeln!(out, "#include \"SerializeBin.h\"")?;
        writeln!(out, "#include \"{}.h\"", self.file_name)?;
        writeln!(out)?;
        self.open_namespace(&mut out)?;

        let forward = self.forward_refs();
        for name in &forward {
            writeln!(out, "extern StructMetadata g{}Metadata;", name)?;
        }
        if !forward.is_empty() {
            writeln!(out)?;
        }

        writeln!(out, "#define of offsetof")?;
        for table in self.descriptors.iter() {
            self.write_metadata(&mut out, table)?;
        }
        writeln!(out, "#undef of")?;
        writeln!(out)?;

        for table in self.descriptors.iter() {
            self.write_layout_checks(&mut out, table)?;
        }
        writeln!(out)?;

        out.push_str(listing);
        writeln!(out)?;
        self.write_top_level_funcs(&mut out)?;

        self.close_namespace(&mut out)?;
        debug!("Emitted source for {}", self.file_name);
        Ok(out)
    }

    /// Types referenced by their own declaration or one emitted before them
    fn forward_refs(&self) -> Vec<&str> {
        let mut emitted = HashSet::new();
        let mut names: Vec<&str> = Vec::new();
        for table in self.descriptors.iter() {
            for target in table.members().iter().filter_map(|m| m.nested) {
                if emitted.contains(&target) {
                    continue;
                }
                if let Some(nested) = self.descriptors.get(target) {
                    if !names.contains(&nested.name.as_str()) {
                        names.push(&nested.name);
                    }
                }
            }
            emitted.insert(table.struct_id);
        }
        names
    }

    fn open_namespace(&self, out: &mut String) -> fmt::Result {
        if let Some(ns) = &self.config.namespace {
            writeln!(out, "namespace {} {{", ns)?;
            writeln!(out)?;
        }
        Ok(())
    }

    fn close_namespace(&self, out: &mut String) -> fmt::Result {
        if let Some(ns) = &self.config.namespace {
            writeln!(out, "}} // namespace {}", ns)?;
        }
        Ok(())
    }

    fn write_struct(&self, out: &mut String, table: &DescriptorTable) -> fmt::Result {
        let indent = &self.config.indent_str;
        let stru = self.schema.get(table.struct_id);
        writeln!(out, "struct {} {{", table.name)?;

        let members = table.members();
        let types: Vec<_> = members
            .iter()
            .map(|f| c_type(f.kind, self.schema))
            .collect();
        let width = types.iter().map(String::len).max().unwrap_or(0);

        for (member, ty) in members.iter().zip(&types) {
            if self.config.include_comments {
                let comment = stru
                    .and_then(|s| s.fields.get(member.slot))
                    .and_then(|f| f.comment.as_deref());
                if let Some(comment) = comment {
                    for line in comment.lines() {
                        writeln!(out, "{}// {}", indent, line)?;
                    }
                }
            }
            writeln!(out, "{}{:<width$}  {};", indent, ty, member.name, width = width)?;
        }

        writeln!(out, "}};")?;
        writeln!(out)
    }

    fn write_metadata(&self, out: &mut String, table: &DescriptorTable) -> fmt::Result {
        let name = &table.name;
        if table.fields.is_empty() {
            return writeln!(
                out,
                "StructMetadata g{name}Metadata = {{ sizeof({name}), 0, NULL }};\n"
            );
        }

        writeln!(out, "FieldMetadata g{}FieldMetadata[] = {{", name)?;
        let rows: Vec<Vec<String>> = table
            .fields
            .iter()
            .map(|f| {
                let nested = f
                    .nested
                    .and_then(|id| self.descriptors.get(id))
                    .map(|t| format!("&g{}Metadata", t.name))
                    .unwrap_or_else(|| "NULL".to_string());
                vec![
                    format!("of({}, {}),", name, f.name),
                    format!("{},", f.tag.c_name()),
                    nested,
                ]
            })
            .collect();
        for row in pad_columns(&rows) {
            writeln!(out, "{}{{ {} }},", self.config.indent_str, row)?;
        }
        writeln!(out, "}};")?;
        writeln!(out)?;
        writeln!(
            out,
            "StructMetadata g{name}Metadata = {{ sizeof({name}), {}, &g{name}FieldMetadata[0] }};",
            table.field_count()
        )?;
        writeln!(out)
    }

    fn write_layout_checks(&self, out: &mut String, table: &DescriptorTable) -> fmt::Result {
        let ptr = self.config.layout.pointer_width.bytes();
        let name = &table.name;
        writeln!(
            out,
            "static_assert(sizeof(void *) != {ptr} || sizeof({name}) == {}, \"{name} size\");",
            table.size
        )?;
        for member in table.members() {
            writeln!(
                out,
                "static_assert(sizeof(void *) != {ptr} || offsetof({name}, {}) == {}, \"{name}::{}\");",
                member.name,
                member.offset,
                escape_string(&member.name)
            )?;
        }
        Ok(())
    }

    fn write_top_level_funcs(&self, out: &mut String) -> fmt::Result {
        let name = self.root_name;
        let i = &self.config.indent_str;
        writeln!(
            out,
            "{name} *Deserialize{name}(const uint8_t *data, int dataLen, bool *usedDefaultOut)"
        )?;
        writeln!(out, "{{")?;
        writeln!(out, "{i}void *res = Deserialize(data, dataLen, {name}Version, &g{name}Metadata);")?;
        writeln!(out, "{i}if (res) {{")?;
        writeln!(out, "{i}{i}*usedDefaultOut = false;")?;
        writeln!(out, "{i}{i}return ({name} *)res;")?;
        writeln!(out, "{i}}}")?;
        writeln!(
            out,
            "{i}res = Deserialize(&g{name}Default[0], sizeof(g{name}Default), {name}Version, &g{name}Metadata);"
        )?;
        writeln!(out, "{i}CrashAlwaysIf(!res);")?;
        writeln!(out, "{i}*usedDefaultOut = true;")?;
        writeln!(out, "{i}return ({name} *)res;")?;
        writeln!(out, "}}")?;
        writeln!(out)?;
        writeln!(out, "uint8_t *Serialize{name}({name} *val, int *dataLenOut)")?;
        writeln!(out, "{{")?;
        writeln!(
            out,
            "{i}return Serialize((const uint8_t *)val, {name}Version, &g{name}Metadata, dataLenOut);"
        )?;
        writeln!(out, "}}")?;
        writeln!(out)?;
        writeln!(out, "void Free{name}({name} *val)")?;
        writeln!(out, "{{")?;
        writeln!(out, "{i}FreeStruct((uint8_t *)val, &g{name}Metadata);")?;
        writeln!(out, "}}")?;
        writeln!(out)
    }
}

fn write_banner(out: &mut String) -> fmt::Result {
    writeln!(out, "// Generated by sergen. Do not edit.")?;
    writeln!(out)
}

/// Pads every column but the last to its widest cell
fn pad_columns(rows: &[Vec<String>]) -> Vec<String> {
    let columns = rows.iter().map(Vec::len).max().unwrap_or(0);
    let widths: Vec<usize> = (0..columns)
        .map(|c| {
            rows.iter()
                .filter_map(|r| r.get(c))
                .map(String::len)
                .max()
                .unwrap_or(0)
        })
        .collect();

    rows.iter()
        .map(|row| {
            let last = row.len().saturating_sub(1);
            row.iter()
                .enumerate()
                .map(|(c, cell)| {
                    if c == last {
                        cell.clone()
                    } else {
                        format!("{:<width$}", cell, width = widths[c])
                    }
                })
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect()
}

fn emit_error(_: fmt::Error) -> Error {
    Error::internal("failed to format generated code")
}
