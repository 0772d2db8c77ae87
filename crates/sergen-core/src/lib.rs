//! # sergen-core
//!
//! A library for compiling settings schemas into a compact binary encoding of
//! their default values and the descriptor tables a generic runtime needs to
//! read and write them.
//!
//! This crate provides the core functionality for:
//! - Loading and validating schemas of nested structs with default values
//! - Encoding a tree of values into a single blob of offset-linked records
//! - Generating C declarations, descriptor tables and an annotated listing
//! - Decoding blobs again with per-field fallback to defaults
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`schema`]: Struct types, fields and defaults, plus the JSON loader
//! - [`value`]: Value trees built from the schema defaults
//! - [`encoding`]: Varints, strings, floats and per-field encoding
//! - [`serialize`]: Flattening and offset resolution
//! - [`artifact`]: Blob assembly and listing writers
//! - [`descriptor`]: Native layout and descriptor tables
//! - [`codegen`]: C header and source generation
//! - [`runtime`]: Generic decoding and encoding over descriptor tables
//! - [`error`]: Error types and handling
//!
//! ## Example
//!
//! ```
//! use sergen_core::{CodeGenerator, Runtime, Schema};
//!
//! let schema = Schema::from_json(r#"{
//!     "version": "1.0",
//!     "root": "Window",
//!     "structs": [
//!         { "name": "Window", "fields": [
//!             { "name": "width", "type": "u32", "default": 800 },
//!             { "name": "title", "type": "string", "default": "main" } ] }
//!     ]
//! }"#)?;
//!
//! let code = CodeGenerator::new(&schema).generate()?;
//! assert!(code.header.contains("struct Window {"));
//!
//! let runtime = Runtime::new(&code.descriptors);
//! let loaded = runtime.deserialize_or_default(b"garbage", code.artifact.bytes())?;
//! assert!(loaded.used_default);
//! # Ok::<(), sergen_core::Error>(())
//! ```
//!
//! ## Binary layout
//!
//! ```text
//! header:  'SetT' magic (u32 LE) | version (4 bytes) | root offset (u32 LE)
//! record:  'SetT' magic (u32 LE) | uvarint field count | encoded fields
//! ```
//!
//! Records are ordered so that every record comes after the records it
//! references; the root record is last.
//!
//! ## Extensibility
//!
//! - [`ListingWriter`]: Customize how the assembled blob is annotated
//! - [`StructCatalog`]: Serialize against any source of type information
//!

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unreachable_pub)]

pub mod artifact;
pub mod codegen;
pub mod descriptor;
pub mod encoding;
pub mod error;
pub mod runtime;
pub mod schema;
pub mod serialize;
pub mod value;
pub mod version;

// Re-export primary types for convenience
pub use artifact::{
    assemble, serialize_tree, Artifact, CArrayWriter, ListingWriter, NullWriter, StatsWriter,
};
pub use codegen::{CodeGenerator, CodegenConfig, GeneratedCode};
pub use descriptor::{DescriptorSet, LayoutConfig, PointerWidth};
pub use encoding::EncodeCache;
pub use error::{Error, Result};
pub use runtime::{Deserialized, Runtime};
pub use schema::{FieldKind, Schema, StructCatalog};
pub use serialize::{flatten, resolve, Layout};
pub use value::{InstanceId, Value, ValueTree};
pub use version::Version;

/// Crate version for programmatic access
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Tag at the start of the blob and of every record: `'SetT'`
pub const MAGIC_ID: u32 = 0x5365_7454;

/// [`MAGIC_ID`] as text, for listings
pub const MAGIC_ID_STR: &str = "SetT";

/// Size of the blob header: magic, version, root offset
pub const HEADER_SIZE: u32 = 12;

/// Size of the magic tag opening each record
pub const RECORD_TAG_SIZE: u32 = 4;
