//! Error types for the interpreter.
//!
//! Interpreted errors (`~perm`, `~type`, …) are data flowing through the
//! specifier machinery, never Rust errors. `VmError` covers host-level
//! failures only; all of them are fatal to the process.

use thiserror::Error;

/// Host-level interpreter failures.
#[derive(Error, Debug)]
pub enum VmError {
    /// The database layer failed.
    #[error(transparent)]
    Db(#[from] cmm_db::DbError),

    /// An interpreter stack invariant was violated.
    #[error("interpreter invariant violated: {detail}")]
    Invariant { detail: String },
}

impl VmError {
    pub fn invariant(detail: impl Into<String>) -> Self {
        VmError::Invariant {
            detail: detail.into(),
        }
    }
}

/// Result alias for interpreter operations.
pub type VmResult<T> = Result<T, VmError>;
