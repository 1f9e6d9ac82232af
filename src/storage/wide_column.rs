use super::engine::{StorageConnector, TableOptions};
use crate::connection::{ConnectorConfig, PoolFactory, PoolRegistry, WideColumnConfig};
use crate::core::{JsonMap, OrmError, PK_KEY, PrimaryKey, RawRow, Result, RowData, StorageMode};
use crate::query::scan::{self, ScanSpec};
use crate::query::QueryPlan;
use async_trait::async_trait;
use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Row key plus its `family:qualifier` cells.
pub type WideRow = (String, JsonMap);

/// Thrift-style client for a column-family store. Table names are physical
/// (already prefixed).
#[async_trait]
pub trait WideColumnClient: Send + Sync {
    async fn tables(&self) -> Result<Vec<String>>;

    async fn create_table(&self, table: &str, families: &TableOptions) -> Result<()>;

    /// Applies one batch of puts; existing cells of a row are overwritten, others kept.
    async fn put_batch(&self, table: &str, rows: Vec<WideRow>) -> Result<()>;

    /// Rows for `keys`, restricted to the `columns` cells when any are given.
    async fn rows(&self, table: &str, keys: &[String], columns: &[String]) -> Result<Vec<WideRow>>;

    /// Deletes the whole row, or only `columns` when given.
    async fn delete(&self, table: &str, key: &str, columns: &[String]) -> Result<()>;

    async fn scan(&self, table: &str, spec: &ScanSpec) -> Result<Vec<WideRow>>;
}

pub struct WideColumnConnector<F>
where
    F: PoolFactory<Config = WideColumnConfig>,
    F::Pool: WideColumnClient,
{
    pools: PoolRegistry<F>,
}

impl<F> WideColumnConnector<F>
where
    F: PoolFactory<Config = WideColumnConfig>,
    F::Pool: WideColumnClient,
{
    pub fn new(factory: F, config: &ConnectorConfig) -> Self {
        Self {
            pools: PoolRegistry::new(factory, config.wide_column.clone()),
        }
    }

    pub fn pools(&self) -> &PoolRegistry<F> {
        &self.pools
    }

    async fn client(&self, db: &str) -> Result<(Arc<F::Pool>, &WideColumnConfig)> {
        let client = self
            .pools
            .get(db)
            .await?
            .ok_or_else(|| OrmError::ConnectorUnavailable(db.to_string()))?;
        let config = self
            .pools
            .config(db)
            .ok_or_else(|| OrmError::ConnectorUnavailable(db.to_string()))?;
        Ok((client, config))
    }

    /// Resolves the physical table, or `None` (logged) when it does not exist.
    async fn existing_table(
        &self,
        db: &str,
        table: &str,
    ) -> Result<Option<(Arc<F::Pool>, String, usize)>> {
        let (client, config) = self.client(db).await?;
        let physical = config.qualified_table(table);
        if !client.tables().await?.contains(&physical) {
            warn!(db = %db, table = %physical, "table does not exist");
            return Ok(None);
        }
        Ok(Some((client, physical, config.batch_size)))
    }

    async fn put(&self, db: &str, table: &str, rows: Vec<WideRow>) -> Result<bool> {
        let Some((client, physical, batch_size)) = self.existing_table(db, table).await? else {
            return Ok(false);
        };
        let mut rows = rows.into_iter().peekable();
        while rows.peek().is_some() {
            let batch: Vec<WideRow> = rows.by_ref().take(batch_size.max(1)).collect();
            debug!(db = %db, table = %physical, rows = batch.len(), "put batch");
            client.put_batch(&physical, batch).await?;
        }
        Ok(true)
    }

    async fn fetch_rows(
        &self,
        db: &str,
        table: &str,
        keys: &[PrimaryKey],
        columns: &[String],
    ) -> Result<BTreeMap<PrimaryKey, RawRow>> {
        let Some((client, physical, _)) = self.existing_table(db, table).await? else {
            return Ok(BTreeMap::new());
        };
        let row_keys: Vec<String> = keys.iter().map(PrimaryKey::to_string).collect();
        debug!(db = %db, table = %physical, keys = row_keys.len(), ?columns, "fetch rows");
        let rows = client.rows(&physical, &row_keys, columns).await?;

        let mut found = BTreeMap::new();
        for row in rows {
            let (text_key, raw) = raw_row(row);
            // answer under the key the caller asked with
            let key = keys
                .iter()
                .find(|k| k.to_string() == text_key.to_string())
                .cloned()
                .unwrap_or(text_key);
            found.insert(key, raw);
        }
        Ok(found)
    }
}

fn wide_row(row: &RowData) -> Result<WideRow> {
    let key = row
        .key
        .as_ref()
        .filter(|key| key.is_usable())
        .ok_or_else(|| OrmError::Connector("wide-column put needs a row key".into()))?;
    Ok((key.to_string(), row.cells.clone()))
}

fn raw_row((key, mut cells): WideRow) -> (PrimaryKey, RawRow) {
    cells.insert(PK_KEY.to_string(), Json::String(key.clone()));
    (PrimaryKey::Text(key), cells)
}

#[async_trait]
impl<F> StorageConnector for WideColumnConnector<F>
where
    F: PoolFactory<Config = WideColumnConfig>,
    F::Pool: WideColumnClient,
{
    fn mode(&self) -> StorageMode {
        StorageMode::WideColumn
    }

    async fn insert(&self, db: &str, table: &str, row: &RowData) -> Result<PrimaryKey> {
        let put = wide_row(row)?;
        let key = row
            .key
            .clone()
            .unwrap_or_else(|| PrimaryKey::Text(put.0.clone()));
        if !self.put(db, table, vec![put]).await? {
            return Err(OrmError::Connector(format!("table '{}' does not exist", table)));
        }
        Ok(key)
    }

    async fn update(
        &self,
        db: &str,
        table: &str,
        _key: &PrimaryKey,
        row: &RowData,
        _pk_name: &str,
    ) -> Result<u64> {
        let written = self.put(db, table, vec![wide_row(row)?]).await?;
        Ok(u64::from(written))
    }

    async fn delete(&self, db: &str, table: &str, key: &PrimaryKey, _pk_name: &str) -> Result<()> {
        if let Some((client, physical, _)) = self.existing_table(db, table).await? {
            debug!(db = %db, table = %physical, key = %key, "delete row");
            client.delete(&physical, &key.to_string(), &[]).await?;
        }
        Ok(())
    }

    async fn delete_columns(
        &self,
        db: &str,
        table: &str,
        key: &PrimaryKey,
        columns: &[String],
    ) -> Result<()> {
        if let Some((client, physical, _)) = self.existing_table(db, table).await? {
            debug!(db = %db, table = %physical, key = %key, ?columns, "delete columns");
            client.delete(&physical, &key.to_string(), columns).await?;
        }
        Ok(())
    }

    async fn get_by_primary_keys(
        &self,
        db: &str,
        table: &str,
        keys: &[PrimaryKey],
        _pk_name: &str,
    ) -> Result<BTreeMap<PrimaryKey, RawRow>> {
        self.fetch_rows(db, table, keys, &[]).await
    }

    async fn get_columns_by_primary_keys(
        &self,
        db: &str,
        table: &str,
        keys: &[PrimaryKey],
        columns: &[String],
    ) -> Result<BTreeMap<PrimaryKey, RawRow>> {
        self.fetch_rows(db, table, keys, columns).await
    }

    async fn query(&self, db: &str, table: &str, plan: &QueryPlan) -> Result<Vec<RawRow>> {
        let Some((client, physical, _)) = self.existing_table(db, table).await? else {
            return Ok(Vec::new());
        };
        let spec = scan::compile(plan)?;
        debug!(db = %db, table = %physical, filter = ?spec.filter, "scan");
        let rows = client.scan(&physical, &spec).await?;
        Ok(rows
            .into_iter()
            .take(plan.limit)
            .map(|row| raw_row(row).1)
            .collect())
    }

    async fn query_count(&self, db: &str, table: &str, plan: &QueryPlan) -> Result<u64> {
        let Some((client, physical, _)) = self.existing_table(db, table).await? else {
            return Ok(0);
        };
        let spec = scan::compile_count(plan)?;
        Ok(client.scan(&physical, &spec).await?.len() as u64)
    }

    async fn create_table(&self, db: &str, table: &str, options: &TableOptions) -> Result<bool> {
        let (client, config) = self.client(db).await?;
        let physical = config.qualified_table(table);
        if client.tables().await?.contains(&physical) {
            debug!(db = %db, table = %physical, "table exists");
            return Ok(false);
        }
        client.create_table(&physical, options).await?;
        Ok(true)
    }

    async fn batch_insert(&self, db: &str, table: &str, rows: Vec<RowData>) -> Result<bool> {
        let puts = rows.iter().map(wide_row).collect::<Result<Vec<_>>>()?;
        self.put(db, table, puts).await
    }

    async fn raw_query(&self, _db: &str, _statement: &str) -> Result<Vec<RawRow>> {
        Err(OrmError::UnsupportedOperation(
            "raw statements on a wide-column store".into(),
        ))
    }
}
