// ============================================================================
// modelbase
// ============================================================================
//
// Typed record schemas persisted to wide-column or relational stores through
// one async connector interface.

pub mod connection;
pub mod core;
pub mod persist;
pub mod prelude;
pub mod query;
pub mod record;
pub mod schema;
pub mod storage;

// Re-export main types for convenience
pub use core::{OrmError, PrimaryKey, Result, StorageMode, Value};
pub use persist::{Repository, SaveOutcome, SkipReason, UpdatePolicy};
pub use query::{Filter, PageRequest};
pub use record::Record;
pub use schema::{Field, Schema, SchemaBuilder, SchemaRegistry};
