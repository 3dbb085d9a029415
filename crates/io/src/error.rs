//! Error types for binary encoding and decoding.

use thiserror::Error;

/// Encoding and decoding errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IoError {
    /// Ran off the end of the input.
    #[error("unexpected end of stream: needed {needed} more bytes reading {context}")]
    EndOfStream { needed: usize, context: &'static str },

    /// An encoded integer does not fit the declared width.
    #[error("malformed varint at byte {pos}")]
    Varint { pos: usize },

    /// A length prefix is out of range.
    #[error("invalid length {len} reading {context}")]
    InvalidLength { len: i64, context: &'static str },

    /// A string is not valid UTF-8.
    #[error("invalid utf-8 reading {context}")]
    Utf8 { context: &'static str },

    /// An unknown stable opcode number was read.
    #[error("unknown opcode number {number}")]
    UnknownOpcode { number: i64 },

    /// A value type tag was not recognized.
    #[error("unknown value type tag {tag}")]
    UnknownTypeTag { tag: i64 },
}

/// Result alias for encoding operations.
pub type IoResult<T> = Result<T, IoError>;
