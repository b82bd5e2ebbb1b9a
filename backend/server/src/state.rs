use std::sync::Arc;

use tracing::info;

use super::{
    acts::ActService,
    config::{Config, StoreBackend},
    database::{SharedStore, init_redis},
    error::StartupError,
    memory::MemoryStore,
    redis_store::RedisStore,
    tree::{Allocator, TreeService},
};

pub struct AppState {
    pub config: Config,
    pub tree: Arc<TreeService>,
    pub acts: ActService,
}

impl AppState {
    pub async fn new(config: Config) -> Result<Arc<Self>, StartupError> {
        let store: SharedStore = match config.store_backend {
            StoreBackend::Memory => {
                info!("Using in-memory store");
                Arc::new(MemoryStore::new())
            }
            StoreBackend::Redis => {
                let connection = init_redis(&config.redis_url).await?;
                Arc::new(RedisStore::new(connection))
            }
        };

        Ok(Self::with_store(config, store))
    }

    pub fn with_store(config: Config, store: SharedStore) -> Arc<Self> {
        let tree = Arc::new(TreeService::new(store.clone(), Allocator::default()));
        let acts = ActService::new(store, tree.clone());

        Arc::new(Self { config, tree, acts })
    }
}
