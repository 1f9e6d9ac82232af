use crate::core::{OrmError, PrimaryKey, RawRow, Result, RowData, StorageMode};
use crate::query::{Filter, PageRequest, QueryBuilder};
use crate::record::Record;
use crate::schema::{Schema, SchemaRegistry};
use crate::storage::StorageConnector;
use chrono::Utc;
use futures::stream::{self, Stream, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub mod blocking;
pub mod save;

/// How an update on an existing row is written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UpdatePolicy {
    /// Unconditional overwrite by key. Concurrent saves may lose updates.
    #[default]
    LastWriteWins,
    /// Route through [`StorageConnector::update_if_version`] with the version read
    /// before the update.
    VersionChecked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    MissingPrimaryKey,
    ConnectorUnavailable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Inserted(PrimaryKey),
    Updated { version: Option<i64>, affected: u64 },
    Skipped(SkipReason),
}

impl SaveOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped(_))
    }
}

/// Reads and writes [`Record`]s through one [`StorageConnector`].
#[derive(Clone)]
pub struct Repository {
    connector: Arc<dyn StorageConnector>,
    update_policy: UpdatePolicy,
}

/// Maps a missing connection to `fallback`; other errors pass through.
fn degrade<T>(result: Result<T>, fallback: T, schema: &Schema, operation: &str) -> Result<T> {
    match result {
        Err(err) if err.is_unavailable() => {
            warn!(db = %schema.database(), table = %schema.table(), operation, error = %err, "connector unavailable");
            Ok(fallback)
        }
        other => other,
    }
}

/// Drops row keys the backend must not see: custom relational keys travel in
/// their mapped column, and an identity table only gets usable keys.
fn identity_row(schema: &Schema, mut row: RowData) -> RowData {
    let forward = if schema.uses_identity() {
        row.key.as_ref().is_some_and(PrimaryKey::is_usable)
    } else {
        schema.mode() == StorageMode::WideColumn
    };
    if !forward {
        row.key = None;
    }
    row
}

impl Repository {
    pub fn new(connector: Arc<dyn StorageConnector>) -> Self {
        Self {
            connector,
            update_policy: UpdatePolicy::default(),
        }
    }

    pub fn with_update_policy(mut self, policy: UpdatePolicy) -> Self {
        self.update_policy = policy;
        self
    }

    pub fn connector(&self) -> &Arc<dyn StorageConnector> {
        &self.connector
    }

    pub fn update_policy(&self) -> UpdatePolicy {
        self.update_policy
    }

    fn check_schema(&self, schema: &Schema) -> Result<()> {
        if schema.is_embedded() {
            return Err(OrmError::UnsupportedOperation(format!(
                "embedded schema '{}' has no table",
                schema.name()
            )));
        }
        if schema.mode() != self.connector.mode() {
            return Err(OrmError::UnsupportedOperation(format!(
                "schema '{}' is {:?} but the connector speaks {:?}",
                schema.name(),
                schema.mode(),
                self.connector.mode()
            )));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Inserts or updates `record`, stamping version and timestamps first.
    pub async fn save(&self, record: &mut Record) -> Result<SaveOutcome> {
        let schema = Arc::clone(record.schema());
        self.check_schema(&schema)?;
        save::prepare(record, Utc::now())?;

        let result = match record.key().filter(PrimaryKey::is_usable) {
            None if !schema.uses_identity() => {
                warn!(table = %schema.table(), key = %schema.primary_key(), "save skipped: no primary key");
                return Ok(SaveOutcome::Skipped(SkipReason::MissingPrimaryKey));
            }
            None => self.insert(record).await.map(SaveOutcome::Inserted),
            Some(key) => self.upsert(record, key).await,
        };

        match result {
            Err(err) if err.is_unavailable() => {
                warn!(db = %schema.database(), table = %schema.table(), error = %err, "save skipped");
                Ok(SaveOutcome::Skipped(SkipReason::ConnectorUnavailable))
            }
            other => other,
        }
    }

    async fn insert(&self, record: &mut Record) -> Result<PrimaryKey> {
        let schema = Arc::clone(record.schema());
        let row = identity_row(&schema, record.serialize()?);
        let assigned = self
            .connector
            .insert(schema.database(), schema.table(), &row)
            .await?;
        if schema.uses_identity() && row.key.is_none() {
            record.set_key(assigned.clone());
        }
        let key = record.key().unwrap_or(assigned);
        debug!(table = %schema.table(), key = %key, "inserted");
        Ok(key)
    }

    async fn upsert(&self, record: &mut Record, key: PrimaryKey) -> Result<SaveOutcome> {
        let schema = Arc::clone(record.schema());
        let existing = self
            .connector
            .get_by_primary_keys(
                schema.database(),
                schema.table(),
                std::slice::from_ref(&key),
                schema.primary_key(),
            )
            .await?;
        let Some(stored) = existing.get(&key) else {
            return self.insert(record).await.map(SaveOutcome::Inserted);
        };

        let old_version = save::stored_version(&schema, stored)?;
        let mut version = None;
        if let Some(field) = schema.version_field() {
            let next = save::next_version(old_version);
            record.set(field, next)?;
            version = Some(next);
        }

        let row = record.serialize()?;
        let (db, table, pk) = (schema.database(), schema.table(), schema.primary_key());
        let affected = match (self.update_policy, schema.version_field()) {
            (UpdatePolicy::VersionChecked, Some(field)) => {
                self.connector
                    .update_if_version(db, table, &key, &row, pk, field, old_version)
                    .await?
            }
            _ => self.connector.update(db, table, &key, &row, pk).await?,
        };
        debug!(table = %table, key = %key, ?version, affected, "updated");
        Ok(SaveOutcome::Updated { version, affected })
    }

    /// Deletes the stored row and clears the record key.
    pub async fn delete(&self, record: &mut Record) -> Result<bool> {
        let schema = Arc::clone(record.schema());
        self.check_schema(&schema)?;
        let Some(key) = record.key().filter(PrimaryKey::is_usable) else {
            warn!(table = %schema.table(), "delete skipped: no primary key");
            return Ok(false);
        };
        let result = self
            .connector
            .delete(schema.database(), schema.table(), &key, schema.primary_key())
            .await
            .map(|()| true);
        let deleted = degrade(result, false, &schema, "delete")?;
        if deleted {
            record.clear_key();
        }
        Ok(deleted)
    }

    /// Removes single `family:qualifier` cells of a wide-column row.
    pub async fn delete_columns(&self, record: &Record, columns: &[&str]) -> Result<bool> {
        let schema = record.schema();
        self.check_schema(schema)?;
        let Some(key) = record.key().filter(PrimaryKey::is_usable) else {
            warn!(table = %schema.table(), "column delete skipped: no primary key");
            return Ok(false);
        };
        let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        let result = self
            .connector
            .delete_columns(schema.database(), schema.table(), &key, &columns)
            .await
            .map(|()| true);
        degrade(result, false, schema, "delete_columns")
    }

    /// Writes records in one connector call. Every record needs its key, except
    /// on relational identity tables where the backend assigns it.
    pub async fn batch_insert(&self, schema: &Arc<Schema>, records: &mut [Record]) -> Result<bool> {
        self.check_schema(schema)?;
        let now = Utc::now();
        let mut rows = Vec::with_capacity(records.len());
        for record in records.iter_mut() {
            if record.schema().table() != schema.table() {
                return Err(OrmError::TypeMismatch(format!(
                    "record of '{}' in a batch for '{}'",
                    record.schema().name(),
                    schema.name()
                )));
            }
            save::prepare(record, now)?;
            let row = identity_row(schema, record.serialize()?);
            if schema.mode() == StorageMode::WideColumn && row.key.is_none() {
                warn!(table = %schema.table(), "batch insert skipped: record without key");
                return Ok(false);
            }
            rows.push(row);
        }
        if rows.is_empty() {
            return Ok(true);
        }
        let result = self
            .connector
            .batch_insert(schema.database(), schema.table(), rows)
            .await;
        degrade(result, false, schema, "batch_insert")
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub async fn get(&self, schema: &Arc<Schema>, key: impl Into<PrimaryKey>) -> Result<Option<Record>> {
        let key = key.into();
        let mut found = self.get_by_pks(schema, std::slice::from_ref(&key)).await?;
        Ok(found.remove(&key))
    }

    /// Single lookup on another unique column, such as an alternate key.
    pub async fn get_by(
        &self,
        schema: &Arc<Schema>,
        column: &str,
        key: impl Into<PrimaryKey>,
    ) -> Result<Option<Record>> {
        let key = key.into();
        let mut found = self
            .get_by_pks_on(schema, std::slice::from_ref(&key), column)
            .await?;
        Ok(found.remove(&key))
    }

    pub async fn get_by_pks(
        &self,
        schema: &Arc<Schema>,
        keys: &[PrimaryKey],
    ) -> Result<BTreeMap<PrimaryKey, Record>> {
        self.get_by_pks_on(schema, keys, schema.primary_key()).await
    }

    /// Records keyed by the value of `pk_name`, which must be a physical column.
    pub async fn get_by_pks_on(
        &self,
        schema: &Arc<Schema>,
        keys: &[PrimaryKey],
        pk_name: &str,
    ) -> Result<BTreeMap<PrimaryKey, Record>> {
        self.check_schema(schema)?;
        if !schema.is_key_column(pk_name) {
            return Err(OrmError::FieldNotFound(
                pk_name.to_string(),
                schema.name().to_string(),
            ));
        }
        let keys: Vec<PrimaryKey> = keys.iter().filter(|k| k.is_usable()).cloned().collect();
        if keys.is_empty() {
            return Ok(BTreeMap::new());
        }
        let result = self
            .connector
            .get_by_primary_keys(schema.database(), schema.table(), &keys, pk_name)
            .await;
        let rows = degrade(result, BTreeMap::new(), schema, "get_by_pks")?;

        let mut records = BTreeMap::new();
        for (key, raw) in rows {
            records.insert(key, Record::from_raw(Arc::clone(schema), &raw)?);
        }
        Ok(records)
    }

    /// Wide-column records carrying only the named `family:qualifier` cells; the
    /// other fields read as their defaults. No columns fetches whole rows.
    pub async fn get_by_pks_with_columns(
        &self,
        schema: &Arc<Schema>,
        keys: &[PrimaryKey],
        columns: &[&str],
    ) -> Result<BTreeMap<PrimaryKey, Record>> {
        if columns.is_empty() {
            return self.get_by_pks(schema, keys).await;
        }
        self.check_schema(schema)?;
        let keys: Vec<PrimaryKey> = keys.iter().filter(|k| k.is_usable()).cloned().collect();
        if keys.is_empty() {
            return Ok(BTreeMap::new());
        }
        let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        let result = self
            .connector
            .get_columns_by_primary_keys(schema.database(), schema.table(), &keys, &columns)
            .await;
        let rows = degrade(result, BTreeMap::new(), schema, "get_by_pks_with_columns")?;

        let mut records = BTreeMap::new();
        for (key, raw) in rows {
            records.insert(key, Record::from_raw(Arc::clone(schema), &raw)?);
        }
        Ok(records)
    }

    /// One keyset page of records matching `filter`.
    pub async fn page(
        &self,
        schema: &Arc<Schema>,
        filter: &Filter,
        page: &PageRequest,
    ) -> Result<Vec<Record>> {
        self.check_schema(schema)?;
        let plan = QueryBuilder::new(Arc::clone(schema)).plan(filter, page)?;
        debug!(table = %schema.table(), index = ?plan.index.as_ref().map(|s| &s.name), "page");
        let result = self
            .connector
            .query(schema.database(), schema.table(), &plan)
            .await;
        let rows = degrade(result, Vec::new(), schema, "page")?;
        rows.iter()
            .map(|raw| Record::from_raw(Arc::clone(schema), raw))
            .collect()
    }

    pub async fn count(&self, schema: &Arc<Schema>, filter: &Filter) -> Result<u64> {
        self.check_schema(schema)?;
        let plan = QueryBuilder::new(Arc::clone(schema)).plan(filter, &PageRequest::default())?;
        let result = self
            .connector
            .query_count(schema.database(), schema.table(), &plan)
            .await;
        degrade(result, 0, schema, "count")
    }

    /// Every matching record, paging from `start` until a short page.
    pub async fn objects(
        &self,
        schema: &Arc<Schema>,
        filter: &Filter,
        start: PageRequest,
    ) -> Result<Vec<Record>> {
        let mut all = Vec::new();
        let mut request = Some(start);
        while let Some(current) = request.take() {
            let records = self.page(schema, filter, &current).await?;
            request = next_page(&current, &records);
            all.extend(records);
        }
        Ok(all)
    }

    /// Streaming form of [`objects`](Self::objects); pages are fetched on demand.
    pub fn objects_stream<'a>(
        &'a self,
        schema: Arc<Schema>,
        filter: Filter,
        start: PageRequest,
    ) -> impl Stream<Item = Result<Record>> + 'a {
        stream::unfold(Some(start), move |state| {
            let schema = Arc::clone(&schema);
            let filter = filter.clone();
            async move {
                let request = state?;
                match self.page(&schema, &filter, &request).await {
                    Ok(records) => {
                        let next = next_page(&request, &records);
                        Some((Ok(records), next))
                    }
                    Err(err) => Some((Err(err), None)),
                }
            }
        })
        .flat_map(|page| match page {
            Ok(records) => stream::iter(records.into_iter().map(Ok)).left_stream(),
            Err(err) => stream::once(futures::future::ready(Err(err))).right_stream(),
        })
    }

    // ------------------------------------------------------------------
    // Tables and raw access
    // ------------------------------------------------------------------

    pub async fn create_table(&self, schema: &Arc<Schema>) -> Result<bool> {
        self.check_schema(schema)?;
        let result = self
            .connector
            .create_table(schema.database(), schema.table(), &schema.table_options())
            .await;
        let created = degrade(result, false, schema, "create_table")?;
        if created {
            info!(db = %schema.database(), table = %schema.table(), "table created");
        }
        Ok(created)
    }

    /// Creates the tables of every registered schema served by this connector.
    pub async fn init_tables(&self, registry: &SchemaRegistry) -> Result<BTreeMap<String, bool>> {
        let mut created = BTreeMap::new();
        for schema in registry.iter() {
            if schema.mode() != self.connector.mode() {
                debug!(table = %schema.table(), "init skipped: other storage mode");
                continue;
            }
            created.insert(schema.table().to_string(), self.create_table(schema).await?);
        }
        Ok(created)
    }

    pub async fn raw_query(&self, db: &str, statement: &str) -> Result<Vec<RawRow>> {
        match self.connector.raw_query(db, statement).await {
            Err(err) if err.is_unavailable() => {
                warn!(db = %db, error = %err, "raw query skipped");
                Ok(Vec::new())
            }
            other => other,
        }
    }
}

/// Request for the page after `records`, or `None` once a short page ends the walk.
fn next_page(current: &PageRequest, records: &[Record]) -> Option<PageRequest> {
    if records.len() < current.limit {
        return None;
    }
    let cursor = records.last().and_then(Record::key)?;
    Some(PageRequest {
        cursor: Some(cursor),
        ..current.clone()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Value;
    use crate::schema::{Field, SchemaBuilder};
    use crate::storage::MemoryConnector;

    fn users() -> Arc<Schema> {
        SchemaBuilder::new("User")
            .table("users")
            .field(Field::string("name").queryable())
            .field(Field::int("age").queryable())
            .field(Field::int("dver"))
            .build()
            .unwrap()
    }

    fn repository() -> Repository {
        Repository::new(Arc::new(MemoryConnector::relational(["default"])))
    }

    #[tokio::test]
    async fn test_identity_insert_assigns_key() {
        let repo = repository();
        let mut user = Record::new(users());
        user.set("name", "ann").unwrap();

        let outcome = repo.save(&mut user).await.unwrap();
        let SaveOutcome::Inserted(key) = outcome else {
            panic!("expected insert, got {:?}", outcome);
        };
        assert_eq!(user.key(), Some(key.clone()));

        let fetched = repo.get(&users(), key).await.unwrap().unwrap();
        assert_eq!(fetched.get("name").unwrap(), Value::from("ann"));
        assert_eq!(fetched.get("dver").unwrap(), Value::Integer(0));
    }

    #[tokio::test]
    async fn test_unusable_identity_key_takes_the_assigned_one() {
        let repo = repository();
        let mut user = Record::new(users());
        user.set("name", "cid").unwrap();
        user.set_key(PrimaryKey::Int(0));

        let outcome = repo.save(&mut user).await.unwrap();
        let SaveOutcome::Inserted(key) = outcome else {
            panic!("expected insert, got {:?}", outcome);
        };
        assert!(key.is_usable());
        assert_eq!(user.key(), Some(key.clone()));

        let outcome = repo.save(&mut user).await.unwrap();
        assert!(matches!(outcome, SaveOutcome::Updated { affected: 1, .. }));
        assert_eq!(repo.count(&users(), &Filter::new()).await.unwrap(), 1);

        let mut other = Record::new(users());
        other.set_key(PrimaryKey::Int(-4));
        let outcome = repo.save(&mut other).await.unwrap();
        assert_eq!(outcome, SaveOutcome::Inserted(other.key().unwrap()));
        assert_ne!(other.key(), Some(key));
    }

    #[tokio::test]
    async fn test_second_save_bumps_version() {
        let repo = repository();
        let mut user = Record::new(users());
        user.set("name", "bob").unwrap();
        repo.save(&mut user).await.unwrap();

        let outcome = repo.save(&mut user).await.unwrap();
        assert_eq!(
            outcome,
            SaveOutcome::Updated {
                version: Some(1),
                affected: 1
            }
        );
    }

    #[tokio::test]
    async fn test_unknown_database_degrades() {
        let repo = Repository::new(Arc::new(MemoryConnector::relational(["other"])));
        let schema = users();
        let mut user = Record::new(Arc::clone(&schema));
        user.set("name", "cy").unwrap();

        assert_eq!(
            repo.save(&mut user).await.unwrap(),
            SaveOutcome::Skipped(SkipReason::ConnectorUnavailable)
        );
        assert!(repo.page(&schema, &Filter::new(), &PageRequest::new()).await.unwrap().is_empty());
        assert_eq!(repo.count(&schema, &Filter::new()).await.unwrap(), 0);
        assert!(repo.get(&schema, 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mode_mismatch_is_rejected() {
        let repo = Repository::new(Arc::new(MemoryConnector::wide_column(["default"])));
        let mut user = Record::new(users());
        assert!(matches!(
            repo.save(&mut user).await,
            Err(OrmError::UnsupportedOperation(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_clears_key() {
        let repo = repository();
        let mut user = Record::new(users());
        user.set("name", "dee").unwrap();
        repo.save(&mut user).await.unwrap();
        let key = user.key().unwrap();

        assert!(repo.delete(&mut user).await.unwrap());
        assert!(user.key().is_none());
        assert!(repo.get(&users(), key).await.unwrap().is_none());
        assert!(!repo.delete(&mut user).await.unwrap());
    }

    #[tokio::test]
    async fn test_version_checked_policy_needs_connector_support() {
        let repo = repository().with_update_policy(UpdatePolicy::VersionChecked);
        let mut user = Record::new(users());
        user.set("name", "eve").unwrap();
        repo.save(&mut user).await.unwrap();
        assert!(matches!(
            repo.save(&mut user).await,
            Err(OrmError::UnsupportedOperation(_))
        ));
    }
}
