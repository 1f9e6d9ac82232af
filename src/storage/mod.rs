pub mod engine;
pub mod memory;
pub mod relational;
pub mod wide_column;

pub use engine::{StorageConnector, TableOptions};
pub use memory::MemoryConnector;
pub use relational::{ExecOutcome, RelationalConnector, SqlExecutor};
pub use wide_column::{WideColumnClient, WideColumnConnector, WideRow};
