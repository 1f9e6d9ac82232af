pub mod filter;
pub mod index_select;
pub mod plan;
pub mod scan;
pub mod sql;

pub use filter::{Filter, OPERATOR_DELIMITER, Operator};
pub use index_select::select_index;
pub use plan::{ColumnRef, IndexSeek, PageRequest, Predicate, QueryBuilder, QueryPlan};
pub use scan::ScanSpec;
pub use sql::SqlStatement;
