use super::engine::{StorageConnector, TableOptions};
use crate::connection::{PoolFactory, PoolRegistry};
use crate::core::{
    COLUMN_SEPARATOR, DEFAULT_PRIMARY_KEY, JsonMap, OrmError, PK_KEY, PrimaryKey, RawRow, Result,
    RowData, StorageMode,
};
use crate::query::filter::compare_json;
use crate::query::{ColumnRef, Predicate, QueryPlan};
use async_trait::async_trait;
use serde_json::Value as Json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default)]
struct StoredRow {
    cells: JsonMap,
    columns: JsonMap,
}

#[derive(Debug)]
struct MemoryTable {
    rows: BTreeMap<PrimaryKey, StoredRow>,
    next_id: i64,
}

impl MemoryTable {
    fn new() -> Self {
        Self {
            rows: BTreeMap::new(),
            next_id: 1,
        }
    }
}

/// Tables of one in-process database.
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    tables: RwLock<HashMap<String, MemoryTable>>,
}

pub struct MemoryFactory;

#[async_trait]
impl PoolFactory for MemoryFactory {
    type Config = ();
    type Pool = MemoryDatabase;

    async fn create(&self, _name: &str, _config: &()) -> Result<MemoryDatabase> {
        Ok(MemoryDatabase::default())
    }
}

/// In-process connector for either storage mode.
///
/// Relational tables exist implicitly and assign integer identities. Wide-column
/// tables must be created first and merge cells on every put.
pub struct MemoryConnector {
    mode: StorageMode,
    pools: PoolRegistry<MemoryFactory>,
}

impl MemoryConnector {
    pub fn new<I, S>(mode: StorageMode, databases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let configs = databases.into_iter().map(|db| (db.into(), ())).collect();
        Self {
            mode,
            pools: PoolRegistry::new(MemoryFactory, configs),
        }
    }

    pub fn relational<I, S>(databases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(StorageMode::Relational, databases)
    }

    pub fn wide_column<I, S>(databases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(StorageMode::WideColumn, databases)
    }

    async fn database(&self, db: &str) -> Result<Arc<MemoryDatabase>> {
        self.pools
            .get(db)
            .await?
            .ok_or_else(|| OrmError::ConnectorUnavailable(db.to_string()))
    }

    fn raw_row(&self, key: &PrimaryKey, row: &StoredRow) -> RawRow {
        let mut raw = row.cells.clone();
        raw.insert(PK_KEY.to_string(), key.to_json());
        raw
    }

    /// Key a row is addressed, ordered and paged by.
    fn row_key(&self, key: &PrimaryKey, row: &StoredRow, pk_name: &str) -> Option<PrimaryKey> {
        if self.mode == StorageMode::WideColumn || pk_name == DEFAULT_PRIMARY_KEY {
            return Some(key.clone());
        }
        row.columns
            .get(pk_name)
            .or_else(|| row.cells.get(pk_name))
            .and_then(PrimaryKey::from_json)
    }

    fn find_key(&self, table: &MemoryTable, key: &PrimaryKey, pk_name: &str) -> Option<PrimaryKey> {
        if self.mode == StorageMode::WideColumn || pk_name == DEFAULT_PRIMARY_KEY {
            return table.rows.contains_key(key).then(|| key.clone());
        }
        table
            .rows
            .iter()
            .find(|(stored, row)| self.row_key(stored, row, pk_name).as_ref() == Some(key))
            .map(|(stored, _)| stored.clone())
    }

    fn operand(&self, key: &PrimaryKey, row: &StoredRow, column: &ColumnRef) -> Option<Json> {
        match column {
            ColumnRef::Physical(name) => row.columns.get(name).cloned(),
            ColumnRef::Document(name) => row.cells.get(name).cloned(),
            ColumnRef::Cell { family, qualifier } => row
                .cells
                .get(&format!("{}{}{}", family, COLUMN_SEPARATOR, qualifier))
                .cloned(),
            ColumnRef::RowKey => Some(Json::String(key.to_string())),
        }
    }

    fn matches(&self, key: &PrimaryKey, row: &StoredRow, predicates: &[&Predicate]) -> bool {
        predicates.iter().all(|predicate| {
            self.operand(key, row, &predicate.column)
                .and_then(|stored| compare_json(&stored, &predicate.value))
                .is_some_and(|ordering| predicate.op.holds(ordering))
        })
    }

    fn insert_row(&self, table: &mut MemoryTable, row: &RowData) -> Result<PrimaryKey> {
        match self.mode {
            StorageMode::Relational => {
                let key = match &row.key {
                    Some(PrimaryKey::Int(id)) => {
                        if table.rows.contains_key(&PrimaryKey::Int(*id)) {
                            return Err(OrmError::Connector(format!("duplicate id {}", id)));
                        }
                        table.next_id = table.next_id.max(id + 1);
                        PrimaryKey::Int(*id)
                    }
                    Some(other) => {
                        return Err(OrmError::Connector(format!(
                            "identity column cannot hold '{}'",
                            other
                        )));
                    }
                    None => {
                        let id = table.next_id;
                        table.next_id += 1;
                        PrimaryKey::Int(id)
                    }
                };
                table.rows.insert(
                    key.clone(),
                    StoredRow {
                        cells: row.cells.clone(),
                        columns: row.columns.clone(),
                    },
                );
                Ok(key)
            }
            StorageMode::WideColumn => {
                let key = row
                    .key
                    .clone()
                    .filter(PrimaryKey::is_usable)
                    .ok_or_else(|| OrmError::Connector("wide-column put needs a row key".into()))?;
                let stored = table.rows.entry(key.clone()).or_default();
                stored.cells.extend(row.cells.clone());
                Ok(key)
            }
        }
    }
}

#[async_trait]
impl StorageConnector for MemoryConnector {
    fn mode(&self) -> StorageMode {
        self.mode
    }

    async fn insert(&self, db: &str, table: &str, row: &RowData) -> Result<PrimaryKey> {
        let database = self.database(db).await?;
        let mut tables = database.tables.write().await;
        let target = match self.mode {
            StorageMode::Relational => tables.entry(table.to_string()).or_insert_with(MemoryTable::new),
            StorageMode::WideColumn => tables
                .get_mut(table)
                .ok_or_else(|| OrmError::Connector(format!("table '{}' does not exist", table)))?,
        };
        let key = self.insert_row(target, row)?;
        debug!(db = %db, table = %table, key = %key, "row inserted");
        Ok(key)
    }

    async fn update(
        &self,
        db: &str,
        table: &str,
        key: &PrimaryKey,
        row: &RowData,
        pk_name: &str,
    ) -> Result<u64> {
        let database = self.database(db).await?;
        let mut tables = database.tables.write().await;
        let Some(target) = tables.get_mut(table) else {
            return Ok(0);
        };
        let Some(stored_key) = self.find_key(target, key, pk_name) else {
            return Ok(0);
        };
        let Some(stored) = target.rows.get_mut(&stored_key) else {
            return Ok(0);
        };
        match self.mode {
            StorageMode::Relational => {
                stored.cells = row.cells.clone();
                stored.columns.extend(row.columns.clone());
            }
            StorageMode::WideColumn => stored.cells.extend(row.cells.clone()),
        }
        Ok(1)
    }

    async fn delete(&self, db: &str, table: &str, key: &PrimaryKey, pk_name: &str) -> Result<()> {
        let database = self.database(db).await?;
        let mut tables = database.tables.write().await;
        let Some(target) = tables.get_mut(table) else {
            warn!(db = %db, table = %table, "delete on missing table");
            return Ok(());
        };
        if let Some(stored_key) = self.find_key(target, key, pk_name) {
            target.rows.remove(&stored_key);
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
        if self.mode != StorageMode::WideColumn {
            return Err(OrmError::UnsupportedOperation(format!(
                "column delete on relational table '{}'",
                table
            )));
        }
        let database = self.database(db).await?;
        let mut tables = database.tables.write().await;
        if let Some(stored) = tables.get_mut(table).and_then(|t| t.rows.get_mut(key)) {
            for column in columns {
                stored.cells.remove(column);
            }
        }
        Ok(())
    }

    async fn get_by_primary_keys(
        &self,
        db: &str,
        table: &str,
        keys: &[PrimaryKey],
        pk_name: &str,
    ) -> Result<BTreeMap<PrimaryKey, RawRow>> {
        let database = self.database(db).await?;
        let tables = database.tables.read().await;
        let mut found = BTreeMap::new();
        let Some(source) = tables.get(table) else {
            return Ok(found);
        };
        for key in keys {
            if let Some(stored_key) = self.find_key(source, key, pk_name) {
                if let Some(row) = source.rows.get(&stored_key) {
                    found.insert(key.clone(), self.raw_row(&stored_key, row));
                }
            }
        }
        Ok(found)
    }

    async fn get_columns_by_primary_keys(
        &self,
        db: &str,
        table: &str,
        keys: &[PrimaryKey],
        columns: &[String],
    ) -> Result<BTreeMap<PrimaryKey, RawRow>> {
        if self.mode != StorageMode::WideColumn {
            return Err(OrmError::UnsupportedOperation(format!(
                "column projection on relational table '{}'",
                table
            )));
        }
        let mut found = self.get_by_primary_keys(db, table, keys, PK_KEY).await?;
        if !columns.is_empty() {
            for raw in found.values_mut() {
                raw.retain(|name, _| name == PK_KEY || columns.contains(name));
            }
        }
        Ok(found)
    }

    async fn query(&self, db: &str, table: &str, plan: &QueryPlan) -> Result<Vec<RawRow>> {
        let database = self.database(db).await?;
        let tables = database.tables.read().await;
        let Some(source) = tables.get(table) else {
            return Ok(Vec::new());
        };
        let predicates: Vec<&Predicate> = plan.all_predicates().collect();

        let mut hits: Vec<(PrimaryKey, RawRow)> = source
            .rows
            .iter()
            .filter(|(key, row)| self.matches(key, row, &predicates))
            .filter_map(|(key, row)| {
                let order_key = self.row_key(key, row, &plan.primary_key)?;
                let past_cursor = match &plan.cursor {
                    Some(cursor) if plan.descending => order_key < *cursor,
                    Some(cursor) => order_key > *cursor,
                    None => true,
                };
                past_cursor.then(|| (order_key, self.raw_row(key, row)))
            })
            .collect();

        hits.sort_by(|a, b| a.0.cmp(&b.0));
        if plan.descending {
            hits.reverse();
        }
        Ok(hits
            .into_iter()
            .take(plan.limit)
            .map(|(_, raw)| raw)
            .collect())
    }

    async fn query_count(&self, db: &str, table: &str, plan: &QueryPlan) -> Result<u64> {
        let database = self.database(db).await?;
        let tables = database.tables.read().await;
        let Some(source) = tables.get(table) else {
            return Ok(0);
        };
        let predicates: Vec<&Predicate> = plan.all_predicates().collect();
        Ok(source
            .rows
            .iter()
            .filter(|(key, row)| self.matches(key, row, &predicates))
            .count() as u64)
    }

    async fn create_table(&self, db: &str, table: &str, _options: &TableOptions) -> Result<bool> {
        let database = self.database(db).await?;
        if self.mode == StorageMode::Relational {
            return Ok(false);
        }
        let mut tables = database.tables.write().await;
        if tables.contains_key(table) {
            debug!(db = %db, table = %table, "table exists");
            return Ok(false);
        }
        tables.insert(table.to_string(), MemoryTable::new());
        Ok(true)
    }

    async fn batch_insert(&self, db: &str, table: &str, rows: Vec<RowData>) -> Result<bool> {
        let database = self.database(db).await?;
        let mut tables = database.tables.write().await;
        let target = match self.mode {
            StorageMode::Relational => tables.entry(table.to_string()).or_insert_with(MemoryTable::new),
            StorageMode::WideColumn => match tables.get_mut(table) {
                Some(target) => target,
                None => {
                    warn!(db = %db, table = %table, "batch insert into missing table");
                    return Ok(false);
                }
            },
        };
        for row in &rows {
            self.insert_row(target, row)?;
        }
        Ok(true)
    }

    async fn raw_query(&self, _db: &str, _statement: &str) -> Result<Vec<RawRow>> {
        Err(OrmError::UnsupportedOperation(
            "raw statements on the in-memory connector".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Operator;
    use serde_json::json;

    fn plan(descending: bool, cursor: Option<PrimaryKey>, limit: usize) -> QueryPlan {
        QueryPlan {
            index: None,
            predicates: Vec::new(),
            cursor,
            limit,
            descending,
            primary_key: "id".into(),
        }
    }

    fn row(name: &str, age: i64) -> RowData {
        let mut row = RowData::new(None);
        row.cells.insert("name".into(), json!(name));
        row.cells.insert("age".into(), json!(age));
        row
    }

    #[tokio::test]
    async fn test_unknown_database_is_unavailable() {
        let connector = MemoryConnector::relational(["main"]);
        let err = connector.insert("other", "t", &row("a", 1)).await.unwrap_err();
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    async fn test_identity_insert_and_keyset_order() {
        let connector = MemoryConnector::relational(["main"]);
        for (i, name) in ["a", "b", "c", "d"].iter().enumerate() {
            let key = connector.insert("main", "t", &row(name, i as i64)).await.unwrap();
            assert_eq!(key, PrimaryKey::Int(i as i64 + 1));
        }

        let rows = connector.query("main", "t", &plan(true, Some(PrimaryKey::Int(4)), 2)).await.unwrap();
        let keys: Vec<_> = rows.iter().map(|r| r[PK_KEY].clone()).collect();
        assert_eq!(keys, vec![json!(3), json!(2)]);

        let rows = connector.query("main", "t", &plan(false, None, 10)).await.unwrap();
        assert_eq!(rows.first().map(|r| r["name"].clone()), Some(json!("a")));
    }

    #[tokio::test]
    async fn test_predicates_filter_rows() {
        let connector = MemoryConnector::relational(["main"]);
        for age in [10, 20, 30] {
            connector.insert("main", "t", &row("x", age)).await.unwrap();
        }
        let mut query = plan(true, None, 10);
        query.predicates.push(Predicate {
            field: "age".into(),
            column: ColumnRef::Document("age".into()),
            op: Operator::Gte,
            value: json!(20),
        });
        assert_eq!(connector.query_count("main", "t", &query).await.unwrap(), 2);
        assert_eq!(connector.query("main", "t", &query).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_wide_column_put_merges_cells() {
        let connector = MemoryConnector::wide_column(["hb"]);
        let key = PrimaryKey::from("r1");
        let mut first = RowData::new(Some(key.clone()));
        first.cells.insert("name:".into(), json!("neo"));
        assert!(connector.insert("hb", "t", &first).await.is_err());

        assert!(connector.create_table("hb", "t", &TableOptions::new()).await.unwrap());
        assert!(!connector.create_table("hb", "t", &TableOptions::new()).await.unwrap());
        connector.insert("hb", "t", &first).await.unwrap();

        let mut second = RowData::new(Some(key.clone()));
        second.cells.insert("info:email".into(), json!("n@x.io"));
        connector.insert("hb", "t", &second).await.unwrap();

        let rows = connector
            .get_by_primary_keys("hb", "t", &[key.clone()], "rowkey")
            .await
            .unwrap();
        let raw = &rows[&key];
        assert_eq!(raw["name:"], json!("neo"));
        assert_eq!(raw["info:email"], json!("n@x.io"));
        assert_eq!(raw[PK_KEY], json!("r1"));

        connector
            .delete_columns("hb", "t", &key, &["info:email".to_string()])
            .await
            .unwrap();
        let rows = connector.get_by_primary_keys("hb", "t", &[key.clone()], "rowkey").await.unwrap();
        assert!(!rows[&key].contains_key("info:email"));
    }
}
