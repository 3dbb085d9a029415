//! Error types for the core data model.

use thiserror::Error;

/// Core data-model errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A literal could not be parsed.
    #[error("invalid literal at byte {pos}: {text}")]
    Literal { pos: usize, text: String },
}

/// Result alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
