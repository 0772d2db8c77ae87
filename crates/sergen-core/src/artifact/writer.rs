//! Extensible listing writers.
//!
//! The assembler reports every segment it appends to the blob through the
//! [`ListingWriter`] trait. [`CArrayWriter`] turns that into the annotated C
//! byte array embedded in the generated source.

use crate::version::Version;
use crate::MAGIC_ID_STR;
use std::fmt::{self, Result};

/// The blob header as it was written
#[derive(Debug, Clone, Copy)]
pub struct HeaderInfo<'a> {
    /// Root struct type name
    pub root_name: &'a str,
    /// Schema version
    pub version: &'a Version,
    /// Offset of the root record
    pub root_offset: u32,
    /// Size of the whole blob
    pub total_size: u32,
    /// Magic id bytes
    pub magic: &'a [u8],
    /// Version bytes
    pub version_bytes: &'a [u8],
    /// Root offset bytes
    pub root_offset_bytes: &'a [u8],
}

/// The start of one record
#[derive(Debug, Clone, Copy)]
pub struct RecordInfo<'a> {
    /// Short instance name, e.g. `SimpleXY_3`
    pub name: &'a str,
    /// Record offset
    pub offset: u32,
    /// Number of fields in the record
    pub field_count: usize,
    /// Magic id bytes
    pub magic: &'a [u8],
    /// Field count bytes
    pub count_bytes: &'a [u8],
}

/// One encoded field of a record
#[derive(Debug, Clone, Copy)]
pub struct FieldEntry<'a> {
    /// Native C type
    pub c_type: &'a str,
    /// Field name
    pub name: &'a str,
    /// Human-readable value
    pub value: &'a str,
    /// Encoded bytes
    pub bytes: &'a [u8],
}

/// Trait for writing the annotated listing of an assembled blob.
///
/// All methods default to doing nothing, so implementations only override
/// what they need.
pub trait ListingWriter {
    /// Write the blob header
    fn write_header(&mut self, header: &HeaderInfo<'_>) -> Result {
        let _ = header;
        Ok(())
    }

    /// Start a record
    fn write_record(&mut self, record: &RecordInfo<'_>) -> Result {
        let _ = record;
        Ok(())
    }

    /// Write one field of the current record
    fn write_field(&mut self, field: &FieldEntry<'_>) -> Result {
        let _ = field;
        Ok(())
    }

    /// Called once after the last record
    fn finish(&mut self, total_size: u32) -> Result {
        let _ = total_size;
        Ok(())
    }
}

/// A no-op writer that discards all output
pub struct NullWriter;

impl ListingWriter for NullWriter {}

/// A writer that collects statistics about the blob
#[derive(Debug, Default)]
pub struct StatsWriter {
    /// Number of records
    pub record_count: usize,
    /// Number of encoded fields
    pub field_count: usize,
    /// Bytes spent on field values
    pub field_bytes: usize,
    /// Size of the whole blob
    pub total_size: u32,
}

impl ListingWriter for StatsWriter {
    fn write_record(&mut self, _record: &RecordInfo<'_>) -> Result {
        self.record_count += 1;
        Ok(())
    }

    fn write_field(&mut self, field: &FieldEntry<'_>) -> Result {
        self.field_count += 1;
        self.field_bytes += field.bytes.len();
        Ok(())
    }

    fn finish(&mut self, total_size: u32) -> Result {
        self.total_size = total_size;
        Ok(())
    }
}

/// Writes the blob as a C `uint8_t` array, one line per segment:
///
/// ```text
/// static const uint8_t gSimpleDefault[45] = {
///     0x54, 0x74, 0x65, 0x53, // magic id 'SetT'
///     0x01, 0x00, 0x00, 0x00, // version 1.0
///     0x24, 0x00, 0x00, 0x00, // top-level struct offset 0x24
///
///     // offset: 0xc SimpleXY_0
///     0x54, 0x74, 0x65, 0x53, // magic id 'SetT'
///     0x02, // 2 fields
///     0x01, // int32_t x = -1
///     ...
/// };
/// ```
pub struct CArrayWriter<W: fmt::Write> {
    out: W,
    indent_str: String,
}

impl<W: fmt::Write> CArrayWriter<W> {
    /// Creates a writer appending to `out`
    pub fn new(out: W) -> Self {
        Self {
            out,
            indent_str: "    ".to_string(),
        }
    }

    /// Sets the indentation of the array body
    pub fn indent_str(mut self, s: impl Into<String>) -> Self {
        self.indent_str = s.into();
        self
    }

    /// Returns the underlying output
    pub fn into_inner(self) -> W {
        self.out
    }

    fn line(&mut self, bytes: &[u8], comment: fmt::Arguments<'_>) -> Result {
        writeln!(self.out, "{}{}, // {}", self.indent_str, hex_bytes(bytes), comment)
    }
}

impl<W: fmt::Write> ListingWriter for CArrayWriter<W> {
    fn write_header(&mut self, header: &HeaderInfo<'_>) -> Result {
        writeln!(
            self.out,
            "static const uint8_t g{}Default[{}] = {{",
            header.root_name, header.total_size
        )?;
        self.line(header.magic, format_args!("magic id '{}'", MAGIC_ID_STR))?;
        self.line(header.version_bytes, format_args!("version {}", header.version))?;
        self.line(
            header.root_offset_bytes,
            format_args!("top-level struct offset {:#x}", header.root_offset),
        )
    }

    fn write_record(&mut self, record: &RecordInfo<'_>) -> Result {
        writeln!(self.out)?;
        writeln!(
            self.out,
            "{}// offset: {:#x} {}",
            self.indent_str, record.offset, record.name
        )?;
        self.line(record.magic, format_args!("magic id '{}'", MAGIC_ID_STR))?;
        self.line(
            record.count_bytes,
            format_args!("{} fields", record.field_count),
        )
    }

    fn write_field(&mut self, field: &FieldEntry<'_>) -> Result {
        self.line(
            field.bytes,
            format_args!("{} {} = {}", field.c_type, field.name, field.value),
        )
    }

    fn finish(&mut self, _total_size: u32) -> Result {
        writeln!(self.out, "}};")
    }
}

/// `0x01, 0x02` rendering of a byte run
pub fn hex_bytes(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("0x{:02x}", b))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Escape a string for use inside a C string literal or comment.
///
/// The result is plain ASCII.
pub(crate) fn escape_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\t' => result.push_str("\\t"),
            _ if c.is_ascii_control() => {
                result.push_str(&format!("\\x{:02x}", c as u8));
            }
            _ if !c.is_ascii() => result.push_str(&format!("\\u{:04x}", c as u32)),
            _ => result.push(c),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_null_writer() {
        let mut writer = NullWriter;
        assert!(writer.finish(12).is_ok());
    }

    #[test]
    fn test_stats_writer() {
        let mut writer = StatsWriter::default();
        let record = RecordInfo {
            name: "A_0",
            offset: 12,
            field_count: 1,
            magic: &[],
            count_bytes: &[1],
        };
        writer.write_record(&record).unwrap();
        writer
            .write_field(&FieldEntry {
                c_type: "uint16_t",
                name: "n",
                value: "300",
                bytes: &[0xAC, 0x02],
            })
            .unwrap();
        writer.finish(19).unwrap();

        assert_eq!(writer.record_count, 1);
        assert_eq!(writer.field_count, 1);
        assert_eq!(writer.field_bytes, 2);
        assert_eq!(writer.total_size, 19);
    }

    #[test]
    fn test_c_array_writer() {
        let version = Version::parse("1.0").unwrap();
        let magic = crate::MAGIC_ID.to_le_bytes();
        let mut writer = CArrayWriter::new(String::new());
        writer
            .write_header(&HeaderInfo {
                root_name: "Simple",
                version: &version,
                root_offset: 12,
                total_size: 19,
                magic: &magic,
                version_bytes: &version.to_bytes(),
                root_offset_bytes: &12u32.to_le_bytes(),
            })
            .unwrap();
        writer
            .write_record(&RecordInfo {
                name: "Simple_0",
                offset: 12,
                field_count: 1,
                magic: &magic,
                count_bytes: &[0x01],
            })
            .unwrap();
        writer
            .write_field(&FieldEntry {
                c_type: "bool",
                name: "bTrue",
                value: "true",
                bytes: &[0x01],
            })
            .unwrap();
        writer.finish(19).unwrap();

        let expected = "\
static const uint8_t gSimpleDefault[19] = {
    0x54, 0x74, 0x65, 0x53, // magic id 'SetT'
    0x01, 0x00, 0x00, 0x00, // version 1.0
    0x0c, 0x00, 0x00, 0x00, // top-level struct offset 0xc

    // offset: 0xc Simple_0
    0x54, 0x74, 0x65, 0x53, // magic id 'SetT'
    0x01, // 1 fields
    0x01, // bool bTrue = true
};
";
        assert_eq!(writer.into_inner(), expected);
    }

    #[test]
    fn test_escape_string() {
        assert_eq!(escape_string("a\"b\\c"), "a\\\"b\\\\c");
        assert_eq!(escape_string("line\nnext"), "line\\nnext");
        assert_eq!(escape_string("é"), "\\u00e9");
    }
}
