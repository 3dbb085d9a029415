//! Core data model for the C-- object server.
//!
//! This crate provides the tagged value type, the reference-counted
//! copy-on-write containers (string, buffer, list, dictionary), the
//! process-wide identifier table, and the opcode table shared by the
//! interpreter and the persistence layer.

pub mod buffer;
pub mod dict;
pub mod error;
pub mod ident;
pub mod list;
pub mod opcode;
pub mod string;
pub mod value;

pub use buffer::Buffer;
pub use dict::Dict;
pub use error::{CoreError, CoreResult};
pub use ident::{ids, Sym};
pub use list::List;
pub use opcode::{ArgType, Op};
pub use string::CmmString;
pub use value::{Dbref, Frob, Value};
