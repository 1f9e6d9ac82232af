/// Backend connector tests
///
/// Relational reconnect behaviour and wide-column batching against scripted
/// sessions, plus the lazy pool registry.
/// Run with: cargo test --test connector_tests
use async_trait::async_trait;
use modelbase::connection::{
    ConnectorConfig, DatabaseConfig, PoolFactory, PoolRegistry, WideColumnConfig,
};
use modelbase::core::{JsonMap, OrmError, PrimaryKey, Result, RowData, Value};
use modelbase::persist::{Repository, SaveOutcome, SkipReason};
use modelbase::query::{Filter, PageRequest, ScanSpec, SqlStatement};
use modelbase::record::Record;
use modelbase::schema::{Family, Field, Schema, SchemaBuilder};
use modelbase::storage::{
    ExecOutcome, RelationalConnector, SqlExecutor, StorageConnector, TableOptions,
    WideColumnClient, WideColumnConnector, WideRow,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ----------------------------------------------------------------------------
// Relational
// ----------------------------------------------------------------------------

#[derive(Default)]
struct SessionState {
    alive: AtomicBool,
    failures_left: AtomicUsize,
    reconnects: AtomicUsize,
    statements: Mutex<Vec<String>>,
    rows: Mutex<Vec<JsonMap>>,
}

struct ScriptedSession(Arc<SessionState>);

impl ScriptedSession {
    fn run(&self, sql: &str) -> Result<()> {
        self.0.statements.lock().unwrap().push(sql.to_string());
        let left = self.0.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.0.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(OrmError::Connector("server has gone away".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl SqlExecutor for ScriptedSession {
    async fn execute(&self, statement: &SqlStatement) -> Result<ExecOutcome> {
        self.run(&statement.sql)?;
        Ok(ExecOutcome {
            affected: 1,
            last_insert_id: Some(41),
        })
    }

    async fn fetch(&self, statement: &SqlStatement) -> Result<Vec<JsonMap>> {
        self.run(&statement.sql)?;
        Ok(self.0.rows.lock().unwrap().clone())
    }

    async fn fetch_raw(&self, sql: &str) -> Result<Vec<JsonMap>> {
        self.run(sql)?;
        Ok(self.0.rows.lock().unwrap().clone())
    }

    async fn is_alive(&self) -> bool {
        self.0.alive.load(Ordering::SeqCst)
    }

    async fn reconnect(&self) -> Result<()> {
        self.0.reconnects.fetch_add(1, Ordering::SeqCst);
        self.0.alive.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct ScriptedFactory(Arc<SessionState>);

#[async_trait]
impl PoolFactory for ScriptedFactory {
    type Config = DatabaseConfig;
    type Pool = ScriptedSession;

    async fn create(&self, _name: &str, _config: &DatabaseConfig) -> Result<ScriptedSession> {
        Ok(ScriptedSession(Arc::clone(&self.0)))
    }
}

fn relational_connector(state: &Arc<SessionState>) -> RelationalConnector<ScriptedFactory> {
    let config = ConnectorConfig::default().database(
        "shop",
        DatabaseConfig::new("app", "secret").database("shop"),
    );
    RelationalConnector::new(ScriptedFactory(Arc::clone(state)), &config)
}

fn orders() -> Arc<Schema> {
    SchemaBuilder::new("Order")
        .table("orders")
        .database("shop")
        .field(Field::string("item").queryable().mapped())
        .field(Field::int("qty").queryable())
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_dead_session_is_retried_once() {
    let state = Arc::new(SessionState::default());
    state.failures_left.store(1, Ordering::SeqCst);
    let connector = relational_connector(&state);

    let mut row = RowData::new(None);
    row.cells.insert("item".into(), json!("pen"));
    let key = connector.insert("shop", "orders", &row).await.unwrap();

    assert_eq!(key, PrimaryKey::Int(41));
    assert_eq!(state.reconnects.load(Ordering::SeqCst), 1);
    assert_eq!(state.statements.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_live_session_error_is_returned() {
    let state = Arc::new(SessionState::default());
    state.alive.store(true, Ordering::SeqCst);
    state.failures_left.store(1, Ordering::SeqCst);
    let connector = relational_connector(&state);

    let result = connector
        .delete("shop", "orders", &PrimaryKey::Int(3), "id")
        .await;
    assert!(matches!(result, Err(OrmError::Connector(_))));
    assert_eq!(state.reconnects.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_second_failure_after_reconnect_surfaces() {
    let state = Arc::new(SessionState::default());
    state.failures_left.store(2, Ordering::SeqCst);
    let connector = relational_connector(&state);

    let result = connector.raw_query("shop", "SELECT 1").await;
    assert!(result.is_err());
    assert_eq!(state.reconnects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_rows_are_keyed_by_custom_column() {
    let state = Arc::new(SessionState::default());
    state.alive.store(true, Ordering::SeqCst);
    let mut row = JsonMap::new();
    row.insert("id".into(), json!(9));
    row.insert("data".into(), json!("{\"code\":\"X1\",\"qty\":2}"));
    state.rows.lock().unwrap().push(row);
    let connector = relational_connector(&state);

    let found = connector
        .get_by_primary_keys("shop", "orders", &[PrimaryKey::from("X1")], "code")
        .await
        .unwrap();
    let raw = found.get(&PrimaryKey::from("X1")).unwrap();
    assert_eq!(raw["pk"], json!(9));
    assert_eq!(raw["qty"], json!(2));
    assert_eq!(
        state.statements.lock().unwrap()[0],
        "SELECT id, data FROM orders WHERE code IN (?)"
    );
}

#[tokio::test]
async fn test_repository_over_relational_connector() {
    let state = Arc::new(SessionState::default());
    state.alive.store(true, Ordering::SeqCst);
    let repo = Repository::new(Arc::new(relational_connector(&state)));
    let schema = orders();

    let mut order = Record::new(Arc::clone(&schema));
    order.set("item", "ink").unwrap();
    order.set("qty", 3).unwrap();
    assert_eq!(
        repo.save(&mut order).await.unwrap(),
        SaveOutcome::Inserted(PrimaryKey::Int(41))
    );

    let filter = Filter::new().with("item", "ink").with("qty__gt", 1);
    repo.page(&schema, &filter, &PageRequest::new().cursor(50))
        .await
        .unwrap();

    let statements = state.statements.lock().unwrap().clone();
    assert_eq!(statements[0], "INSERT INTO orders (data, item) VALUES (?, ?)");
    assert_eq!(
        statements[1],
        "SELECT id, data FROM orders WHERE item = ? AND JSON_EXTRACT(data, '$.qty') > ? AND id < ? ORDER BY id DESC LIMIT ?"
    );
}

#[tokio::test]
async fn test_unconfigured_database_is_skipped() {
    let state = Arc::new(SessionState::default());
    let repo = Repository::new(Arc::new(relational_connector(&state)));
    let schema = SchemaBuilder::new("Order")
        .table("orders")
        .database("archive")
        .field(Field::string("item"))
        .build()
        .unwrap();

    let mut order = Record::new(schema);
    order.set("item", "ink").unwrap();
    assert_eq!(
        repo.save(&mut order).await.unwrap(),
        SaveOutcome::Skipped(SkipReason::ConnectorUnavailable)
    );
    assert!(state.statements.lock().unwrap().is_empty());
}

// ----------------------------------------------------------------------------
// Wide column
// ----------------------------------------------------------------------------

#[derive(Default)]
struct FakeStore {
    tables: Mutex<BTreeMap<String, BTreeMap<String, JsonMap>>>,
    batches: Mutex<Vec<usize>>,
    scans: Mutex<Vec<ScanSpec>>,
    projections: Mutex<Vec<Vec<String>>>,
}

struct FakeClient(Arc<FakeStore>);

#[async_trait]
impl WideColumnClient for FakeClient {
    async fn tables(&self) -> Result<Vec<String>> {
        Ok(self.0.tables.lock().unwrap().keys().cloned().collect())
    }

    async fn create_table(&self, table: &str, _families: &TableOptions) -> Result<()> {
        self.0.tables.lock().unwrap().insert(table.to_string(), BTreeMap::new());
        Ok(())
    }

    async fn put_batch(&self, table: &str, rows: Vec<WideRow>) -> Result<()> {
        self.0.batches.lock().unwrap().push(rows.len());
        let mut tables = self.0.tables.lock().unwrap();
        let target = tables
            .get_mut(table)
            .ok_or_else(|| OrmError::Connector(format!("no table {}", table)))?;
        for (key, cells) in rows {
            target.entry(key).or_default().extend(cells);
        }
        Ok(())
    }

    async fn rows(&self, table: &str, keys: &[String], columns: &[String]) -> Result<Vec<WideRow>> {
        self.0.projections.lock().unwrap().push(columns.to_vec());
        let tables = self.0.tables.lock().unwrap();
        let Some(source) = tables.get(table) else {
            return Ok(Vec::new());
        };
        Ok(keys
            .iter()
            .filter_map(|key| {
                let mut cells = source.get(key)?.clone();
                if !columns.is_empty() {
                    cells.retain(|name, _| columns.contains(name));
                }
                Some((key.clone(), cells))
            })
            .collect())
    }

    async fn delete(&self, table: &str, key: &str, columns: &[String]) -> Result<()> {
        let mut tables = self.0.tables.lock().unwrap();
        if let Some(source) = tables.get_mut(table) {
            if columns.is_empty() {
                source.remove(key);
            } else if let Some(cells) = source.get_mut(key) {
                for column in columns {
                    cells.remove(column);
                }
            }
        }
        Ok(())
    }

    async fn scan(&self, table: &str, spec: &ScanSpec) -> Result<Vec<WideRow>> {
        self.0.scans.lock().unwrap().push(spec.clone());
        let tables = self.0.tables.lock().unwrap();
        let mut rows: Vec<WideRow> = tables
            .get(table)
            .map(|source| source.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        if spec.reversed {
            rows.reverse();
        }
        Ok(rows)
    }
}

struct FakeFactory(Arc<FakeStore>);

#[async_trait]
impl PoolFactory for FakeFactory {
    type Config = WideColumnConfig;
    type Pool = FakeClient;

    async fn create(&self, _name: &str, _config: &WideColumnConfig) -> Result<FakeClient> {
        Ok(FakeClient(Arc::clone(&self.0)))
    }
}

fn wide_connector(store: &Arc<FakeStore>) -> WideColumnConnector<FakeFactory> {
    let config = ConnectorConfig::default().wide_column(
        "default",
        WideColumnConfig::default().table_prefix("app", "_"),
    );
    WideColumnConnector::new(FakeFactory(Arc::clone(store)), &config)
}

fn sessions() -> Arc<Schema> {
    SchemaBuilder::new("Session")
        .table("sessions")
        .wide_column()
        .field(Field::string("token").primary_key())
        .field(Field::string("device").queryable())
        .family(Family::new("geo").field(Field::string("city").queryable()))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_table_prefix_and_batched_puts() {
    let store = Arc::new(FakeStore::default());
    let repo = Repository::new(Arc::new(wide_connector(&store)));
    let schema = sessions();

    assert!(repo.create_table(&schema).await.unwrap());
    assert!(!repo.create_table(&schema).await.unwrap());
    assert!(store.tables.lock().unwrap().contains_key("app_sessions"));

    let mut batch: Vec<Record> = (0..23)
        .map(|i| {
            let mut session = Record::new(Arc::clone(&schema));
            session.set("token", format!("t{:02}", i)).unwrap();
            session.set("device", "phone").unwrap();
            session
        })
        .collect();
    assert!(repo.batch_insert(&schema, &mut batch).await.unwrap());
    assert_eq!(*store.batches.lock().unwrap(), vec![10, 10, 3]);

    let stored = store.tables.lock().unwrap()["app_sessions"]["t05"].clone();
    assert_eq!(stored["device:"], json!("phone"));
}

#[tokio::test]
async fn test_missing_table_reads_empty() {
    let store = Arc::new(FakeStore::default());
    let repo = Repository::new(Arc::new(wide_connector(&store)));
    let schema = sessions();

    assert!(repo.get(&schema, "nope").await.unwrap().is_none());
    assert_eq!(repo.count(&schema, &Filter::new()).await.unwrap(), 0);

    let mut session = Record::new(Arc::clone(&schema));
    session.set("token", "abc").unwrap();
    assert!(matches!(
        repo.save(&mut session).await,
        Err(OrmError::Connector(_))
    ));
}

#[tokio::test]
async fn test_scan_filter_and_column_delete() {
    let store = Arc::new(FakeStore::default());
    let repo = Repository::new(Arc::new(wide_connector(&store)));
    let schema = sessions();
    repo.create_table(&schema).await.unwrap();

    let mut session = Record::new(Arc::clone(&schema));
    session.set("token", "abc").unwrap();
    session.set("device", "tablet").unwrap();
    session.set("city", "Oslo").unwrap();
    repo.save(&mut session).await.unwrap();

    let fetched = repo.get(&schema, "abc").await.unwrap().unwrap();
    assert_eq!(fetched.get("city").unwrap(), Value::from("Oslo"));

    repo.page(&schema, &Filter::new().with("city", "Oslo"), &PageRequest::new().limit(3))
        .await
        .unwrap();
    let spec = store.scans.lock().unwrap().last().cloned().unwrap();
    assert_eq!(
        spec.filter.as_deref(),
        Some("SingleColumnValueFilter('geo', 'city', =, 'binary:Oslo', true, true)")
    );
    assert!(spec.reversed);
    assert_eq!(spec.limit, Some(3));

    assert!(repo.delete_columns(&session, &["geo:city"]).await.unwrap());
    let trimmed = repo.get(&schema, "abc").await.unwrap().unwrap();
    assert!(!trimmed.is_set("city"));

    assert!(repo.delete(&mut session).await.unwrap());
    assert!(repo.get(&schema, "abc").await.unwrap().is_none());
}

#[tokio::test]
async fn test_selected_columns_reach_the_client() {
    let store = Arc::new(FakeStore::default());
    let repo = Repository::new(Arc::new(wide_connector(&store)));
    let schema = sessions();
    repo.create_table(&schema).await.unwrap();

    let mut session = Record::new(Arc::clone(&schema));
    session.set("token", "xyz").unwrap();
    session.set("device", "laptop").unwrap();
    session.set("city", "Tromso").unwrap();
    repo.save(&mut session).await.unwrap();

    let keys = [PrimaryKey::from("xyz")];
    let found = repo
        .get_by_pks_with_columns(&schema, &keys, &["geo:city"])
        .await
        .unwrap();
    assert_eq!(
        store.projections.lock().unwrap().last(),
        Some(&vec!["geo:city".to_string()])
    );

    let partial = &found[&PrimaryKey::from("xyz")];
    assert_eq!(partial.get("city").unwrap(), Value::from("Tromso"));
    assert!(!partial.is_set("device"));
    assert_eq!(partial.key(), Some(PrimaryKey::from("xyz")));
}

// ----------------------------------------------------------------------------
// Pool registry
// ----------------------------------------------------------------------------

struct SlowFactory;

#[async_trait]
impl PoolFactory for SlowFactory {
    type Config = u32;
    type Pool = u32;

    async fn create(&self, _name: &str, config: &u32) -> Result<u32> {
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        Ok(*config)
    }
}

#[tokio::test]
async fn test_pool_built_once_under_contention() {
    let registry = Arc::new(PoolRegistry::new(
        SlowFactory,
        BTreeMap::from([("main".to_string(), 5u32)]),
    ));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let registry = Arc::clone(&registry);
        handles.push(tokio::spawn(async move { registry.get("main").await }));
    }
    for handle in handles {
        let pool = handle.await.unwrap().unwrap();
        assert_eq!(pool.as_deref(), Some(&5));
    }
    assert_eq!(registry.created_count(), 1);
    assert!(registry.get("other").await.unwrap().is_none());
}
