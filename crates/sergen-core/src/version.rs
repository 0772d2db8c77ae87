//! Dotted schema versions packed into four bytes.

use crate::error::{Error, Result};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Largest value a single version component may take
pub const MAX_COMPONENT: u32 = 254;

/// A schema version of up to four dotted components.
///
/// Each component is stored in one byte, most significant first, so the
/// packed big-endian `u32` orders the same way as the dotted components.
#[derive(Debug, Clone)]
pub struct Version {
    components: [u8; 4],
    text: String,
}

impl Version {
    /// Parses a dotted version such as `"2.3"` or `"1.0.4.12"`.
    ///
    /// Missing trailing components default to 0.
    pub fn parse(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('.').collect();
        if parts.len() > 4 {
            return Err(Error::invalid_version(s, "more than 4 components"));
        }

        let mut components = [0u8; 4];
        for (slot, part) in components.iter_mut().zip(&parts) {
            let not_a_number = || Error::invalid_version(s, format!("'{}' is not a number", part));
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(not_a_number());
            }
            let n: u32 = part.parse().map_err(|_| not_a_number())?;
            if n > MAX_COMPONENT {
                return Err(Error::invalid_version(
                    s,
                    format!("component {} exceeds {}", n, MAX_COMPONENT),
                ));
            }
            *slot = n as u8;
        }

        Ok(Self {
            components,
            text: s.to_string(),
        })
    }

    /// Rebuilds a version from its four header bytes
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        let text = bytes
            .iter()
            .map(|b| b.to_string())
            .collect::<Vec<_>>()
            .join(".");
        Self {
            components: bytes,
            text,
        }
    }

    /// The four header bytes, most significant component first
    pub fn to_bytes(&self) -> [u8; 4] {
        self.components
    }

    /// The version as an unsigned integer, comparable with `<`
    pub fn packed(&self) -> u32 {
        u32::from_be_bytes(self.components)
    }

    /// The version string as it was declared
    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.components == other.components
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.packed().cmp(&other.packed())
    }
}
