//! Recommended API entrypoints grouped by abstraction level.
//!
//! `models` covers schema declaration and record persistence; `backends` is the
//! escape hatch for writing or configuring connectors.

pub mod models {
    //! Declaring schemas and saving records.
    pub use crate::core::{OrmError, PrimaryKey, Result, StorageMode, Value};
    pub use crate::persist::blocking::BlockingRepository;
    pub use crate::persist::{Repository, SaveOutcome, SkipReason, UpdatePolicy};
    pub use crate::query::{Filter, PageRequest};
    pub use crate::record::Record;
    pub use crate::schema::{
        EnumType, Family, Field, Index, Schema, SchemaBuilder, SchemaRegistry,
    };
}

pub mod backends {
    //! Connector traits, pools and configuration.
    pub use crate::connection::{ConnectorConfig, DatabaseConfig, PoolFactory, WideColumnConfig};
    pub use crate::core::{RawRow, RowData};
    pub use crate::query::{QueryPlan, ScanSpec, SqlStatement};
    pub use crate::storage::{
        ExecOutcome, MemoryConnector, RelationalConnector, SqlExecutor, StorageConnector,
        TableOptions, WideColumnClient, WideColumnConnector, WideRow,
    };
}
