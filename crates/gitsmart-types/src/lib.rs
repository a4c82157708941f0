//! Common types used throughout `gitsmart`.
//!
//! The smart transport only ever handles objects by name, so the one type
//! every crate shares is the object identifier as it appears on the wire.

mod error;
mod oid;

pub use error::TypesError;
pub use oid::{ObjectId, OID_HEX_LEN, OID_RAW_LEN};

/// Result type for identifier parsing.
pub type Result<T> = std::result::Result<T, TypesError>;
