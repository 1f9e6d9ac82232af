use crate::core::{OrmError, PrimaryKey, RawRow, Result, RowData, StorageMode};
use crate::query::QueryPlan;
use crate::schema::ColumnOptions;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Column family name → options, as produced by [`Schema::table_options`](crate::schema::Schema::table_options).
pub type TableOptions = BTreeMap<String, ColumnOptions>;

/// Backend a [`Repository`](crate::persist::Repository) reads and writes through.
///
/// Every raw row returned by a connector carries its own key under the reserved
/// `pk` entry. A database name without a configured connection yields
/// [`OrmError::ConnectorUnavailable`].
#[async_trait]
pub trait StorageConnector: Send + Sync {
    /// Wire representation this connector speaks.
    fn mode(&self) -> StorageMode;

    /// Inserts a row and returns its key. Relational identity tables assign the
    /// key unless `row.key` is set.
    async fn insert(&self, db: &str, table: &str, row: &RowData) -> Result<PrimaryKey>;

    /// Overwrites the row with key `key`; returns the affected row count.
    async fn update(
        &self,
        db: &str,
        table: &str,
        key: &PrimaryKey,
        row: &RowData,
        pk_name: &str,
    ) -> Result<u64>;

    /// Update guarded by the stored version. No bundled connector implements it.
    #[allow(clippy::too_many_arguments)]
    async fn update_if_version(
        &self,
        _db: &str,
        table: &str,
        _key: &PrimaryKey,
        _row: &RowData,
        _pk_name: &str,
        _version_field: &str,
        _expected: i64,
    ) -> Result<u64> {
        Err(OrmError::UnsupportedOperation(format!(
            "version-checked update on '{}'",
            table
        )))
    }

    async fn delete(&self, db: &str, table: &str, key: &PrimaryKey, pk_name: &str) -> Result<()>;

    /// Removes individual `family:qualifier` cells of one row.
    async fn delete_columns(
        &self,
        _db: &str,
        table: &str,
        _key: &PrimaryKey,
        _columns: &[String],
    ) -> Result<()> {
        Err(OrmError::UnsupportedOperation(format!(
            "column delete on '{}'",
            table
        )))
    }

    async fn get_by_primary_keys(
        &self,
        db: &str,
        table: &str,
        keys: &[PrimaryKey],
        pk_name: &str,
    ) -> Result<BTreeMap<PrimaryKey, RawRow>>;

    /// Like [`get_by_primary_keys`](Self::get_by_primary_keys), but rows only carry
    /// the named `family:qualifier` cells.
    async fn get_columns_by_primary_keys(
        &self,
        _db: &str,
        table: &str,
        _keys: &[PrimaryKey],
        _columns: &[String],
    ) -> Result<BTreeMap<PrimaryKey, RawRow>> {
        Err(OrmError::UnsupportedOperation(format!(
            "column projection on '{}'",
            table
        )))
    }

    /// One keyset page.
    async fn query(&self, db: &str, table: &str, plan: &QueryPlan) -> Result<Vec<RawRow>>;

    /// Rows matching the plan's predicates; cursor and limit are ignored.
    async fn query_count(&self, db: &str, table: &str, plan: &QueryPlan) -> Result<u64>;

    /// Creates the table; `Ok(false)` when it already exists or DDL is not managed here.
    async fn create_table(&self, db: &str, table: &str, options: &TableOptions) -> Result<bool>;

    async fn batch_insert(&self, db: &str, table: &str, rows: Vec<RowData>) -> Result<bool>;

    /// Runs a backend-native statement.
    async fn raw_query(&self, db: &str, statement: &str) -> Result<Vec<RawRow>>;
}
