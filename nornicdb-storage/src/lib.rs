pub mod bulkload;
pub mod engine;
mod error;

pub use crate::error::{Error, Result};

/// Re-exports [`nornicdb_api::PropertyValue`] under the path this crate's
/// callers have historically imported it from.
pub mod property {
    pub use nornicdb_api::{DecodeError, PropertyValue};
}
