use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::domain::ports::PriceCache;
use crate::domain::repositories::PriceStore;
use crate::infrastructure::cache::InMemoryPriceCache;
use crate::infrastructure::persistence::{Database, SqlitePriceStore};

pub struct PersistenceHandle {
    pub db: Database,
    pub store: Arc<dyn PriceStore>,
    pub cache: Arc<dyn PriceCache>,
}

pub struct PersistenceBootstrap;

impl PersistenceBootstrap {
    /// Opens the store and the cache. Failures here are fatal for the process.
    pub async fn init(config: &Config) -> Result<PersistenceHandle> {
        let db_url = &config.ingestion.database_url;
        info!("Initializing Database at {}", db_url);

        let db = Database::new(db_url)
            .await
            .context("Failed to initialize database")?;
        let store: Arc<dyn PriceStore> = Arc::new(SqlitePriceStore::new(db.pool.clone()));
        store.ping().await.context("Database is not reachable")?;

        let cache: Arc<dyn PriceCache> = Arc::new(InMemoryPriceCache::new());

        Ok(PersistenceHandle { db, store, cache })
    }

    /// In-memory store and cache for tests and dry runs.
    pub async fn in_memory() -> Result<PersistenceHandle> {
        let db = Database::in_memory()
            .await
            .context("Failed to initialize in-memory database")?;
        let store: Arc<dyn PriceStore> = Arc::new(SqlitePriceStore::new(db.pool.clone()));
        let cache: Arc<dyn PriceCache> = Arc::new(InMemoryPriceCache::new());
        Ok(PersistenceHandle { db, store, cache })
    }
}
