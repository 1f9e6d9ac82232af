use super::{Repository, SaveOutcome};
use crate::core::{PrimaryKey, RawRow, Result};
use crate::query::{Filter, PageRequest};
use crate::record::Record;
use crate::schema::{Schema, SchemaRegistry};
use crate::storage::StorageConnector;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::runtime::{Builder, Runtime};

/// Synchronous facade over [`Repository`].
///
/// Owns a current-thread runtime and drives every call with `block_on`, so it
/// must not be used from inside another tokio runtime.
pub struct BlockingRepository {
    runtime: Runtime,
    inner: Repository,
}

impl BlockingRepository {
    pub fn new(connector: Arc<dyn StorageConnector>) -> Result<Self> {
        Self::from_repository(Repository::new(connector))
    }

    pub fn from_repository(inner: Repository) -> Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Ok(Self { runtime, inner })
    }

    pub fn repository(&self) -> &Repository {
        &self.inner
    }

    pub fn save(&self, record: &mut Record) -> Result<SaveOutcome> {
        self.runtime.block_on(self.inner.save(record))
    }

    pub fn delete(&self, record: &mut Record) -> Result<bool> {
        self.runtime.block_on(self.inner.delete(record))
    }

    pub fn delete_columns(&self, record: &Record, columns: &[&str]) -> Result<bool> {
        self.runtime.block_on(self.inner.delete_columns(record, columns))
    }

    pub fn batch_insert(&self, schema: &Arc<Schema>, records: &mut [Record]) -> Result<bool> {
        self.runtime.block_on(self.inner.batch_insert(schema, records))
    }

    pub fn get(&self, schema: &Arc<Schema>, key: impl Into<PrimaryKey>) -> Result<Option<Record>> {
        self.runtime.block_on(self.inner.get(schema, key))
    }

    pub fn get_by(
        &self,
        schema: &Arc<Schema>,
        column: &str,
        key: impl Into<PrimaryKey>,
    ) -> Result<Option<Record>> {
        self.runtime.block_on(self.inner.get_by(schema, column, key))
    }

    pub fn get_by_pks(
        &self,
        schema: &Arc<Schema>,
        keys: &[PrimaryKey],
    ) -> Result<BTreeMap<PrimaryKey, Record>> {
        self.runtime.block_on(self.inner.get_by_pks(schema, keys))
    }

    pub fn get_by_pks_on(
        &self,
        schema: &Arc<Schema>,
        keys: &[PrimaryKey],
        pk_name: &str,
    ) -> Result<BTreeMap<PrimaryKey, Record>> {
        self.runtime
            .block_on(self.inner.get_by_pks_on(schema, keys, pk_name))
    }

    pub fn get_by_pks_with_columns(
        &self,
        schema: &Arc<Schema>,
        keys: &[PrimaryKey],
        columns: &[&str],
    ) -> Result<BTreeMap<PrimaryKey, Record>> {
        self.runtime
            .block_on(self.inner.get_by_pks_with_columns(schema, keys, columns))
    }

    pub fn page(&self, schema: &Arc<Schema>, filter: &Filter, page: &PageRequest) -> Result<Vec<Record>> {
        self.runtime.block_on(self.inner.page(schema, filter, page))
    }

    pub fn count(&self, schema: &Arc<Schema>, filter: &Filter) -> Result<u64> {
        self.runtime.block_on(self.inner.count(schema, filter))
    }

    pub fn objects(&self, schema: &Arc<Schema>, filter: &Filter, start: PageRequest) -> Result<Vec<Record>> {
        self.runtime.block_on(self.inner.objects(schema, filter, start))
    }

    pub fn create_table(&self, schema: &Arc<Schema>) -> Result<bool> {
        self.runtime.block_on(self.inner.create_table(schema))
    }

    pub fn init_tables(&self, registry: &SchemaRegistry) -> Result<BTreeMap<String, bool>> {
        self.runtime.block_on(self.inner.init_tables(registry))
    }

    pub fn raw_query(&self, db: &str, statement: &str) -> Result<Vec<RawRow>> {
        self.runtime.block_on(self.inner.raw_query(db, statement))
    }
}
