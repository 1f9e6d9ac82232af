use super::engine::{StorageConnector, TableOptions};
use crate::connection::{ConnectorConfig, DatabaseConfig, PoolFactory, PoolRegistry};
use crate::core::{DEFAULT_PRIMARY_KEY, JsonMap, OrmError, PK_KEY, PrimaryKey, RawRow, Result, RowData, StorageMode};
use crate::query::sql::{self, DATA_COLUMN, ID_COLUMN, SqlStatement};
use crate::query::QueryPlan;
use async_trait::async_trait;
use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of a statement that returns no rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecOutcome {
    pub affected: u64,
    pub last_insert_id: Option<i64>,
}

/// A pooled SQL session. Rows come back as column name → value.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    async fn execute(&self, statement: &SqlStatement) -> Result<ExecOutcome>;

    async fn fetch(&self, statement: &SqlStatement) -> Result<Vec<JsonMap>>;

    /// Runs unparameterised SQL text.
    async fn fetch_raw(&self, sql: &str) -> Result<Vec<JsonMap>>;

    /// Liveness check used after a failure.
    async fn is_alive(&self) -> bool;

    async fn reconnect(&self) -> Result<()>;
}

/// Connector for the relational layout (`id`, `data` and mapped columns).
///
/// A failed statement is retried once, after reconnecting, when the session is
/// found dead; failures on a live session are returned unchanged.
pub struct RelationalConnector<F>
where
    F: PoolFactory<Config = DatabaseConfig>,
    F::Pool: SqlExecutor,
{
    pools: PoolRegistry<F>,
}

impl<F> RelationalConnector<F>
where
    F: PoolFactory<Config = DatabaseConfig>,
    F::Pool: SqlExecutor,
{
    pub fn new(factory: F, config: &ConnectorConfig) -> Self {
        Self {
            pools: PoolRegistry::new(factory, config.databases.clone()),
        }
    }

    pub fn pools(&self) -> &PoolRegistry<F> {
        &self.pools
    }

    async fn executor(&self, db: &str) -> Result<Arc<F::Pool>> {
        self.pools
            .get(db)
            .await?
            .ok_or_else(|| OrmError::ConnectorUnavailable(db.to_string()))
    }

    async fn recover(&self, db: &str, executor: &F::Pool, err: OrmError) -> Result<()> {
        if executor.is_alive().await {
            return Err(err);
        }
        warn!(db = %db, error = %err, "connection lost, reconnecting once");
        executor.reconnect().await
    }

    async fn execute(&self, db: &str, statement: &SqlStatement) -> Result<ExecOutcome> {
        let executor = self.executor(db).await?;
        debug!(db = %db, sql = %statement.sql, "execute");
        match executor.execute(statement).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                self.recover(db, &executor, err).await?;
                executor.execute(statement).await
            }
        }
    }

    async fn fetch(&self, db: &str, statement: &SqlStatement) -> Result<Vec<JsonMap>> {
        let executor = self.executor(db).await?;
        debug!(db = %db, sql = %statement.sql, "fetch");
        match executor.fetch(statement).await {
            Ok(rows) => Ok(rows),
            Err(err) => {
                self.recover(db, &executor, err).await?;
                executor.fetch(statement).await
            }
        }
    }
}

/// Turns an `(id, data)` result row into a raw row carrying `pk`.
fn document_row(mut row: JsonMap) -> Result<RawRow> {
    let mut document = match row.remove(DATA_COLUMN) {
        Some(Json::String(text)) => match serde_json::from_str::<Json>(&text)? {
            Json::Object(map) => map,
            other => {
                return Err(OrmError::Decode(format!(
                    "data column holds {} instead of an object",
                    other
                )));
            }
        },
        Some(Json::Object(map)) => map,
        Some(Json::Null) | None => JsonMap::new(),
        Some(other) => {
            return Err(OrmError::Decode(format!("unexpected data column {}", other)));
        }
    };
    if let Some(id) = row.remove(ID_COLUMN) {
        document.insert(PK_KEY.to_string(), id);
    }
    Ok(document)
}

#[async_trait]
impl<F> StorageConnector for RelationalConnector<F>
where
    F: PoolFactory<Config = DatabaseConfig>,
    F::Pool: SqlExecutor,
{
    fn mode(&self) -> StorageMode {
        StorageMode::Relational
    }

    async fn insert(&self, db: &str, table: &str, row: &RowData) -> Result<PrimaryKey> {
        let statement = sql::insert(table, row)?;
        let outcome = self.execute(db, &statement).await?;
        if let Some(key) = &row.key {
            return Ok(key.clone());
        }
        outcome
            .last_insert_id
            .map(PrimaryKey::Int)
            .ok_or_else(|| OrmError::Connector(format!("insert into '{}' returned no id", table)))
    }

    async fn update(
        &self,
        db: &str,
        table: &str,
        key: &PrimaryKey,
        row: &RowData,
        pk_name: &str,
    ) -> Result<u64> {
        let statement = sql::update(table, key, row, pk_name)?;
        Ok(self.execute(db, &statement).await?.affected)
    }

    async fn delete(&self, db: &str, table: &str, key: &PrimaryKey, pk_name: &str) -> Result<()> {
        self.execute(db, &sql::delete(table, key, pk_name)?).await?;
        Ok(())
    }

    async fn get_by_primary_keys(
        &self,
        db: &str,
        table: &str,
        keys: &[PrimaryKey],
        pk_name: &str,
    ) -> Result<BTreeMap<PrimaryKey, RawRow>> {
        let mut found = BTreeMap::new();
        if keys.is_empty() {
            return Ok(found);
        }
        let rows = self.fetch(db, &sql::select_by_keys(table, keys, pk_name)?).await?;
        for row in rows {
            let raw = document_row(row)?;
            let key_entry = if pk_name == DEFAULT_PRIMARY_KEY { PK_KEY } else { pk_name };
            if let Some(key) = raw.get(key_entry).and_then(PrimaryKey::from_json) {
                found.insert(key, raw);
            }
        }
        Ok(found)
    }

    async fn query(&self, db: &str, table: &str, plan: &QueryPlan) -> Result<Vec<RawRow>> {
        let rows = self.fetch(db, &sql::select(table, plan)?).await?;
        rows.into_iter().map(document_row).collect()
    }

    async fn query_count(&self, db: &str, table: &str, plan: &QueryPlan) -> Result<u64> {
        let rows = self.fetch(db, &sql::count(table, plan)?).await?;
        Ok(rows
            .first()
            .and_then(|row| row.values().next())
            .and_then(Json::as_u64)
            .unwrap_or(0))
    }

    async fn create_table(&self, db: &str, table: &str, _options: &TableOptions) -> Result<bool> {
        debug!(db = %db, table = %table, "relational tables are created outside this layer");
        Ok(false)
    }

    async fn batch_insert(&self, db: &str, table: &str, rows: Vec<RowData>) -> Result<bool> {
        for row in &rows {
            self.insert(db, table, row).await?;
        }
        Ok(true)
    }

    async fn raw_query(&self, db: &str, statement: &str) -> Result<Vec<RawRow>> {
        let executor = self.executor(db).await?;
        match executor.fetch_raw(statement).await {
            Ok(rows) => Ok(rows),
            Err(err) => {
                self.recover(db, &executor, err).await?;
                executor.fetch_raw(statement).await
            }
        }
    }
}
