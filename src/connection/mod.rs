pub mod config;
pub mod pool;

pub use config::{ConnectorConfig, DatabaseConfig, WideColumnConfig};
pub use pool::{PoolFactory, PoolRegistry};
