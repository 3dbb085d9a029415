//! Binary encoding primitives for the C-- object server.
//!
//! All persistent integers use a big-endian varint-like scheme; strings and
//! identifiers are length-prefixed bytes. The format is component-owned:
//! object images, portable packs, and the on-disk index all go through this
//! crate.

pub mod error;
pub mod reader;
pub mod varint;
pub mod writer;

pub use error::{IoError, IoResult};
pub use reader::Reader;
pub use writer::Writer;
