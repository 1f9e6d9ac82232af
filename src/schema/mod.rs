pub mod definition;
pub mod enums;
pub mod family;
pub mod field;
pub mod index;
pub mod model;
pub mod registry;

pub use definition::SchemaFile;
pub use enums::{EnumMember, EnumType};
pub use family::Family;
pub use field::{ColumnOptions, Field, FieldKind, ValidationPolicy};
pub use index::Index;
pub use model::{CREATE_TIME_FIELD, Schema, SchemaBuilder, UPDATE_TIME_FIELD, VERSION_FIELD};
pub use registry::SchemaRegistry;
