//! Error types for the object database.

use std::path::PathBuf;
use thiserror::Error;

/// Database errors. These are host-level failures; interpreted errors such
/// as `~objnf` are data and never appear here.
#[derive(Error, Debug)]
pub enum DbError {
    /// A filesystem operation failed.
    #[error("database I/O failure on {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An image or index could not be decoded.
    #[error("corrupt database: {0}")]
    Corrupt(#[from] cmm_io::IoError),

    /// An image decoded but violated a structural rule.
    #[error("corrupt database: {detail}")]
    Format { detail: String },

    /// The index lists an object the data file cannot produce.
    #[error("object #{dbref} missing from store")]
    Missing { dbref: i64 },
}

impl DbError {
    pub fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DbError::File {
            path: path.into(),
            source,
        }
    }

    pub fn format(detail: impl Into<String>) -> Self {
        DbError::Format {
            detail: detail.into(),
        }
    }
}

/// Result alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
