//! Identifier error types.

use thiserror::Error;

/// Errors raised while parsing identifiers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypesError {
    /// The text is not a 40 character hexadecimal object id.
    #[error("invalid object id: {0}")]
    InvalidObjectId(String),
}
