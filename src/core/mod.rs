pub mod error;
pub mod types;
pub mod value;

pub use error::{OrmError, Result};
pub use types::{
    COLUMN_SEPARATOR, DEFAULT_PRIMARY_KEY, JsonMap, PK_KEY, PrimaryKey, ROW_KEY, RawRow, RowData,
    StorageMode,
};
pub use value::Value;
