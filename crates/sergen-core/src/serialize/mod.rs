//! Linearization of value trees.
//!
//! A tree of struct instances is turned into a flat sequence of records that
//! refer to each other by byte offset. Offsets are varint-encoded, so the size
//! of a reference depends on the value it points to: a record can only be
//! sized once the offsets of everything it references are known. Placing
//! children before parents makes that possible in a single pass:
//!
//! 1. [`flatten`] orders the instances children-first
//! 2. [`resolve`] walks that order, assigning each record its offset and
//!    measuring it

mod flatten;
mod resolve;

pub use flatten::flatten;
pub use resolve::{resolve, Layout};
