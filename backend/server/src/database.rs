//! # Stores
//!
//! Record stores behind the tree engine and the act feed.
//!
//! ## Contracts
//! - Acts for a user come back ascending by creation time, this order defines act numbers
//! - Decorations for a user come back ascending by creation time
//! - Unlinking an act clears `unlocked_by_act` on its decorations but keeps them, and works
//!   after the act record itself is gone
//! - Progress is a cache, losing it only costs a recompute
//!
//! ## Backends
//! - [`MemoryStore`](crate::memory::MemoryStore): in-process, for tests and single instances
//! - [`RedisStore`](crate::redis_store::RedisStore): shared Redis instance
use std::{collections::HashSet, sync::Arc, time::Duration};

use async_trait::async_trait;
use redis::{
    Client,
    aio::{ConnectionManager, ConnectionManagerConfig},
};

use crate::{
    error::StoreError,
    models::{Act, ActId, Decoration, DecorationId, DecorationType, Progress, UserId},
};

#[async_trait]
pub trait ActStore: Send + Sync {
    async fn insert_act(&self, act: Act) -> Result<(), StoreError>;

    async fn get_act(&self, id: ActId) -> Result<Option<Act>, StoreError>;

    /// Every act, newest first.
    async fn list_acts(&self) -> Result<Vec<Act>, StoreError>;

    async fn acts_for_user(&self, user: UserId) -> Result<Vec<Act>, StoreError>;

    async fn count_acts_for_user(&self, user: UserId) -> Result<u64, StoreError>;

    async fn delete_act(&self, id: ActId) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait DecorationStore: Send + Sync {
    async fn insert_decoration(&self, decoration: Decoration) -> Result<(), StoreError>;

    async fn get_decoration(&self, id: DecorationId) -> Result<Option<Decoration>, StoreError>;

    async fn update_decoration(&self, decoration: Decoration) -> Result<(), StoreError>;

    async fn delete_decoration(&self, id: DecorationId) -> Result<bool, StoreError>;

    async fn decorations_for_user(&self, user: UserId) -> Result<Vec<Decoration>, StoreError>;

    async fn count_decorations_for_user(&self, user: UserId) -> Result<u64, StoreError>;

    /// Acts of this user that already unlocked a decoration.
    async fn decorated_act_ids(&self, user: UserId) -> Result<HashSet<ActId>, StoreError>;

    /// One entry per decoration, in creation order.
    async fn decoration_types_for_user(
        &self,
        user: UserId,
    ) -> Result<Vec<DecorationType>, StoreError>;

    /// Clears the act reference on every decoration it unlocked, returns how many changed.
    async fn unlink_act(&self, act: ActId) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn get_progress(&self, user: UserId) -> Result<Option<Progress>, StoreError>;

    async fn put_progress(&self, progress: Progress) -> Result<(), StoreError>;
}

pub trait Store: ActStore + DecorationStore + ProgressStore {}

impl<T: ActStore + DecorationStore + ProgressStore> Store for T {}

pub type SharedStore = Arc<dyn Store>;

pub async fn init_redis(redis_url: &str) -> Result<ConnectionManager, StoreError> {
    let config = ConnectionManagerConfig::new()
        .set_number_of_retries(1)
        .set_connection_timeout(Duration::from_millis(100));

    let client = Client::open(redis_url)?;
    let connection_manager = client.get_connection_manager_with_config(config).await?;

    Ok(connection_manager)
}
