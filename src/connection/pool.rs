use crate::core::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, RwLock};
use tracing::info;

/// Builds the connection pool of one configured database.
#[async_trait]
pub trait PoolFactory: Send + Sync {
    type Config: Send + Sync;
    type Pool: Send + Sync;

    async fn create(&self, name: &str, config: &Self::Config) -> Result<Self::Pool>;
}

/// Lazily created pools, one per configured database name.
///
/// Lookups take the read lock only. First construction is serialised by a single
/// init guard and re-checks the cache once the guard is held, so each pool is
/// built at most once.
pub struct PoolRegistry<F: PoolFactory> {
    factory: F,
    configs: BTreeMap<String, F::Config>,
    pools: RwLock<HashMap<String, Arc<F::Pool>>>,
    init_lock: Mutex<()>,
    created: AtomicUsize,
}

impl<F: PoolFactory> PoolRegistry<F> {
    pub fn new(factory: F, configs: BTreeMap<String, F::Config>) -> Self {
        Self {
            factory,
            configs,
            pools: RwLock::new(HashMap::new()),
            init_lock: Mutex::new(()),
            created: AtomicUsize::new(0),
        }
    }

    pub fn is_configured(&self, name: &str) -> bool {
        self.configs.contains_key(name)
    }

    pub fn configured(&self) -> impl Iterator<Item = &str> {
        self.configs.keys().map(String::as_str)
    }

    pub fn config(&self, name: &str) -> Option<&F::Config> {
        self.configs.get(name)
    }

    /// The pool for `name`, built on first use. `None` for unconfigured names.
    pub async fn get(&self, name: &str) -> Result<Option<Arc<F::Pool>>> {
        if let Some(pool) = self.cached(name).await {
            return Ok(Some(pool));
        }
        let Some(config) = self.configs.get(name) else {
            return Ok(None);
        };

        let _guard = self.init_lock.lock().await;
        if let Some(pool) = self.cached(name).await {
            return Ok(Some(pool));
        }

        let pool = Arc::new(self.factory.create(name, config).await?);
        self.created.fetch_add(1, Ordering::SeqCst);
        self.pools
            .write()
            .await
            .insert(name.to_string(), Arc::clone(&pool));
        info!(db = %name, "connection pool initialised");
        Ok(Some(pool))
    }

    /// Drops the cached pool so the next [`get`](Self::get) rebuilds it.
    pub async fn invalidate(&self, name: &str) -> bool {
        self.pools.write().await.remove(name).is_some()
    }

    /// Number of pools built so far.
    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    async fn cached(&self, name: &str) -> Option<Arc<F::Pool>> {
        let pools = self.pools.read().await;
        pools.get(name).cloned()
    }
}
