//! Error types for the sergen-core library.
//!
//! This module provides comprehensive error handling using the `thiserror` crate.
//! Variants fall into four groups: schema errors (bad input), encoding errors
//! (values that cannot be represented), consistency errors (broken internal
//! invariants) and decode errors raised by the runtime.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for sergen operations
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error type for all sergen operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Failed to read input file
    #[error("failed to read file '{path}': {source}")]
    FileRead {
        /// Path to the file that failed to read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Schema file is not valid JSON or does not match the schema shape
    #[error("failed to parse schema: {0}")]
    SchemaParse(#[from] serde_json::Error),

    /// Field declares a type tag no encoding exists for
    #[error("unknown type '{kind}' for field '{struct_name}.{field}'")]
    UnknownFieldKind {
        /// Struct declaring the field
        struct_name: String,
        /// Field name
        field: String,
        /// The unrecognized type tag
        kind: String,
    },

    /// Reference to a struct type that is not declared
    #[error("unknown struct type '{name}'")]
    UnknownStruct {
        /// Name that failed to resolve
        name: String,
    },

    /// Two structs, or two fields of one struct, share a name
    #[error("duplicate name '{name}' in {scope}")]
    DuplicateName {
        /// The repeated name
        name: String,
        /// Where the duplicate was found
        scope: String,
    },

    /// Malformed dotted version string
    #[error("invalid version '{version}': {details}")]
    InvalidVersion {
        /// The version string as given
        version: String,
        /// What is wrong with it
        details: String,
    },

    /// Default value does not fit the declared field type
    #[error("invalid default for '{struct_name}.{field}': {details}")]
    InvalidDefault {
        /// Struct declaring the field
        struct_name: String,
        /// Field name
        field: String,
        /// What is wrong with the default
        details: String,
    },

    /// A value does not match the kind its field declares
    #[error("field '{struct_name}.{field}' expects {expected} value")]
    KindMismatch {
        /// Struct declaring the field
        struct_name: String,
        /// Field name
        field: String,
        /// Declared kind
        expected: &'static str,
    },

    /// An array element (or struct reference) has the wrong struct type
    #[error("field '{struct_name}.{field}' expects '{expected}' instances, found '{found}'")]
    ArrayElementMismatch {
        /// Struct declaring the field
        struct_name: String,
        /// Field name
        field: String,
        /// Declared element type
        expected: String,
        /// Actual element type
        found: String,
    },

    /// Default values nest struct instances without end
    #[error("defaults of struct '{name}' nest without end")]
    CyclicStruct {
        /// A struct on the cycle
        name: String,
    },

    /// Value cannot be represented by its field kind
    #[error("value {value} out of range for {kind} field '{struct_name}.{field}'")]
    ValueOutOfRange {
        /// Struct declaring the field
        struct_name: String,
        /// Field name
        field: String,
        /// The offending value, formatted
        value: String,
        /// Declared kind
        kind: &'static str,
    },

    /// Encoded data does not fit the 32-bit offset space
    #[error("encoded data exceeds the 32-bit offset space ({size} bytes)")]
    BlobTooLarge {
        /// Size reached when the overflow was detected
        size: u64,
    },

    /// An instance was reached twice while flattening
    #[error("instance {instance} is referenced more than once (shared or cyclic reference)")]
    InstanceRevisited {
        /// Short name of the instance
        instance: String,
    },

    /// A struct reference points at an instance without an offset
    #[error("reference from '{struct_name}.{field}' to an instance with no assigned offset")]
    UnresolvedReference {
        /// Struct declaring the field
        struct_name: String,
        /// Field name
        field: String,
    },

    /// Invalid encoded data
    #[error("invalid encoded data at offset {offset}: {details}")]
    InvalidWireFormat {
        /// Byte offset where the error occurred
        offset: usize,
        /// Detailed description of the issue
        details: String,
    },

    /// Failed to decode varint
    #[error("failed to decode varint at offset {offset}: buffer too small or invalid encoding")]
    VarintDecode {
        /// Byte offset where the error occurred
        offset: usize,
    },

    /// Magic tag mismatch in the header or a record
    #[error("bad magic id at offset {offset}: found {found:#010x}")]
    BadMagic {
        /// Byte offset of the tag
        offset: usize,
        /// The tag that was read
        found: u32,
    },

    /// Data was written by a newer schema version
    #[error("unsupported data version {found} (expected at most {expected})")]
    UnsupportedVersion {
        /// Version read from the data
        found: String,
        /// Version the runtime was built for
        expected: String,
    },

    /// Generic internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Creates a new file read error
    pub fn file_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileRead {
            path: path.into(),
            source,
        }
    }

    /// Creates a new unknown struct error
    pub fn unknown_struct(name: impl Into<String>) -> Self {
        Self::UnknownStruct { name: name.into() }
    }

    /// Creates a new invalid version error
    pub fn invalid_version(version: impl Into<String>, details: impl Into<String>) -> Self {
        Self::InvalidVersion {
            version: version.into(),
            details: details.into(),
        }
    }

    /// Creates a new invalid default error
    pub fn invalid_default(
        struct_name: impl Into<String>,
        field: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self::InvalidDefault {
            struct_name: struct_name.into(),
            field: field.into(),
            details: details.into(),
        }
    }

    /// Creates a new wire format error
    pub fn invalid_wire_format(offset: usize, details: impl Into<String>) -> Self {
        Self::InvalidWireFormat {
            offset,
            details: details.into(),
        }
    }

    /// Creates a new varint decode error
    pub fn varint_decode(offset: usize) -> Self {
        Self::VarintDecode { offset }
    }

    /// Creates a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns true if this error comes from reading untrusted data.
    ///
    /// The runtime falls back to defaults on these; every other error aborts
    /// generation.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::InvalidWireFormat { .. }
                | Self::VarintDecode { .. }
                | Self::BadMagic { .. }
                | Self::UnsupportedVersion { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::ValueOutOfRange {
            struct_name: "Simple".into(),
            field: "u16_1".into(),
            value: "70000".into(),
            kind: "u16",
        };
        assert!(err.to_string().contains("Simple.u16_1"));
        assert!(err.to_string().contains("70000"));
    }

    #[test]
    fn test_bad_magic_display() {
        let err = Error::BadMagic {
            offset: 12,
            found: 0xdead_beef,
        };
        assert_eq!(err.to_string(), "bad magic id at offset 12: found 0xdeadbeef");
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::varint_decode(3).is_recoverable());
        assert!(Error::invalid_wire_format(0, "truncated").is_recoverable());
        assert!(!Error::unknown_struct("Missing").is_recoverable());
        assert!(!Error::internal("bug").is_recoverable());
    }
}
