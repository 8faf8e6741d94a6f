//! Tool Schema Cache.
//!
//! Last-known input contracts keyed by `(connection_id, tool_name)`, replaced
//! wholesale on refresh.

pub mod index;
pub mod types;

pub use index::SchemaCache;
pub use types::{SchemaKey, ToolSchema};
