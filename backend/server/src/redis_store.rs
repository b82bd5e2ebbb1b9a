//! # Redis
//!
//! Shared store for acts, decorations and progress.
//!
//! ## Layout
//! - `act:{id}`, `decoration:{id}`, `progress:{user}`: JSON records
//! - `acts`: sorted set of every act id, scored by creation time in microseconds
//! - `user:{user}:acts`: sorted set of the user's act ids, same scoring
//! - `user:{user}:decorations`: sorted set of the user's decoration ids, same scoring
//! - `act:{id}:decorations`: set of decoration ids unlocked by the act, used to unlink on delete
//!
//! Multi-key writes go through atomic pipelines so indexes never point at missing records
//! for longer than a single command.
use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{AsyncCommands, aio::ConnectionManager};
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    database::{ActStore, DecorationStore, ProgressStore},
    error::StoreError,
    models::{Act, ActId, Decoration, DecorationId, DecorationType, Progress, UserId},
};

const ALL_ACTS: &str = "acts";

fn act_key(id: ActId) -> String {
    format!("act:{id}")
}

fn act_decorations_key(id: ActId) -> String {
    format!("act:{id}:decorations")
}

fn decoration_key(id: DecorationId) -> String {
    format!("decoration:{id}")
}

fn user_acts_key(user: UserId) -> String {
    format!("user:{user}:acts")
}

fn user_decorations_key(user: UserId) -> String {
    format!("user:{user}:decorations")
}

fn progress_key(user: UserId) -> String {
    format!("progress:{user}")
}

fn score(timestamp: DateTime<Utc>) -> i64 {
    timestamp.timestamp_micros()
}

#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
}

impl RedisStore {
    pub fn new(connection: ConnectionManager) -> Self {
        Self { connection }
    }

    async fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let mut conn = self.connection.clone();
        let raw: Option<String> = conn.get(key).await?;

        Ok(raw.map(|json| serde_json::from_str(&json)).transpose()?)
    }

    async fn store<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let json = serde_json::to_string(value)?;
        let _: () = conn.set(key, json).await?;

        Ok(())
    }

    /// Loads the records behind an index, skipping ids whose record vanished.
    async fn load_indexed<T: DeserializeOwned>(
        &self,
        index: &str,
        record_key: fn(uuid::Uuid) -> String,
    ) -> Result<Vec<T>, StoreError> {
        let mut conn = self.connection.clone();
        let ids: Vec<String> = conn.zrange(index, 0, -1).await?;

        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            let Ok(id) = id.parse() else { continue };
            if let Some(record) = self.load(&record_key(id)).await? {
                records.push(record);
            }
        }

        Ok(records)
    }
}

#[async_trait]
impl ActStore for RedisStore {
    async fn insert_act(&self, act: Act) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let json = serde_json::to_string(&act)?;
        let member = act.id.to_string();

        let mut pipe = redis::pipe();
        pipe.atomic()
            .set(act_key(act.id), json)
            .ignore()
            .zadd(ALL_ACTS, &member, score(act.created_at))
            .ignore();

        if let Some(user) = act.user {
            pipe.zadd(user_acts_key(user), &member, score(act.created_at))
                .ignore();
        }

        pipe.query_async::<()>(&mut conn).await?;

        Ok(())
    }

    async fn get_act(&self, id: ActId) -> Result<Option<Act>, StoreError> {
        self.load(&act_key(id)).await
    }

    async fn list_acts(&self) -> Result<Vec<Act>, StoreError> {
        let mut acts: Vec<Act> = self.load_indexed(ALL_ACTS, act_key).await?;
        acts.reverse();

        Ok(acts)
    }

    async fn acts_for_user(&self, user: UserId) -> Result<Vec<Act>, StoreError> {
        self.load_indexed(&user_acts_key(user), act_key).await
    }

    async fn count_acts_for_user(&self, user: UserId) -> Result<u64, StoreError> {
        let mut conn = self.connection.clone();
        Ok(conn.zcard(user_acts_key(user)).await?)
    }

    async fn delete_act(&self, id: ActId) -> Result<bool, StoreError> {
        let Some(act) = self.get_act(id).await? else {
            return Ok(false);
        };

        let mut conn = self.connection.clone();
        let member = id.to_string();

        let mut pipe = redis::pipe();
        pipe.atomic()
            .del(act_key(id))
            .ignore()
            .zrem(ALL_ACTS, &member)
            .ignore();

        if let Some(user) = act.user {
            pipe.zrem(user_acts_key(user), &member).ignore();
        }

        pipe.query_async::<()>(&mut conn).await?;

        Ok(true)
    }
}

#[async_trait]
impl DecorationStore for RedisStore {
    async fn insert_decoration(&self, decoration: Decoration) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let json = serde_json::to_string(&decoration)?;
        let member = decoration.id.to_string();

        let mut pipe = redis::pipe();
        pipe.atomic()
            .set(decoration_key(decoration.id), json)
            .ignore()
            .zadd(
                user_decorations_key(decoration.user),
                &member,
                score(decoration.created_at),
            )
            .ignore();

        if let Some(act) = decoration.unlocked_by_act {
            pipe.sadd(act_decorations_key(act), &member).ignore();
        }

        pipe.query_async::<()>(&mut conn).await?;

        Ok(())
    }

    async fn get_decoration(&self, id: DecorationId) -> Result<Option<Decoration>, StoreError> {
        self.load(&decoration_key(id)).await
    }

    async fn update_decoration(&self, decoration: Decoration) -> Result<(), StoreError> {
        self.store(&decoration_key(decoration.id), &decoration).await
    }

    async fn delete_decoration(&self, id: DecorationId) -> Result<bool, StoreError> {
        let Some(decoration) = self.get_decoration(id).await? else {
            return Ok(false);
        };

        let mut conn = self.connection.clone();
        let member = id.to_string();

        let mut pipe = redis::pipe();
        pipe.atomic()
            .del(decoration_key(id))
            .ignore()
            .zrem(user_decorations_key(decoration.user), &member)
            .ignore();

        if let Some(act) = decoration.unlocked_by_act {
            pipe.srem(act_decorations_key(act), &member).ignore();
        }

        pipe.query_async::<()>(&mut conn).await?;

        Ok(true)
    }

    async fn decorations_for_user(&self, user: UserId) -> Result<Vec<Decoration>, StoreError> {
        self.load_indexed(&user_decorations_key(user), decoration_key)
            .await
    }

    async fn count_decorations_for_user(&self, user: UserId) -> Result<u64, StoreError> {
        let mut conn = self.connection.clone();
        Ok(conn.zcard(user_decorations_key(user)).await?)
    }

    async fn decorated_act_ids(&self, user: UserId) -> Result<HashSet<ActId>, StoreError> {
        Ok(self
            .decorations_for_user(user)
            .await?
            .into_iter()
            .filter_map(|d| d.unlocked_by_act)
            .collect())
    }

    async fn decoration_types_for_user(
        &self,
        user: UserId,
    ) -> Result<Vec<DecorationType>, StoreError> {
        Ok(self
            .decorations_for_user(user)
            .await?
            .into_iter()
            .map(|d| d.decoration_type)
            .collect())
    }

    async fn unlink_act(&self, act: ActId) -> Result<u64, StoreError> {
        let mut conn = self.connection.clone();
        let ids: Vec<String> = conn.smembers(act_decorations_key(act)).await?;
        let now = Utc::now();
        let mut unlinked = 0;

        for id in ids {
            let Ok(id) = id.parse() else { continue };
            let Some(mut decoration) = self.get_decoration(id).await? else {
                continue;
            };

            decoration.unlocked_by_act = None;
            decoration.updated_at = now;
            self.update_decoration(decoration).await?;
            unlinked += 1;
        }

        let _: () = conn.del(act_decorations_key(act)).await?;

        Ok(unlinked)
    }
}

#[async_trait]
impl ProgressStore for RedisStore {
    async fn get_progress(&self, user: UserId) -> Result<Option<Progress>, StoreError> {
        self.load(&progress_key(user)).await
    }

    async fn put_progress(&self, progress: Progress) -> Result<(), StoreError> {
        self.store(&progress_key(progress.user), &progress).await
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::database::{contract, init_redis};

    #[test]
    fn test_keys_are_namespaced() {
        let id = Uuid::nil();
        assert_eq!(act_key(id), format!("act:{id}"));
        assert_eq!(act_decorations_key(id), format!("act:{id}:decorations"));
        assert_eq!(user_acts_key(7), "user:7:acts");
        assert_eq!(user_decorations_key(7), "user:7:decorations");
        assert_eq!(progress_key(7), "progress:7");
    }

    /// Runs only when `REDIS_URL` points at a reachable instance.
    #[tokio::test]
    async fn test_store_contract() {
        let Ok(url) = std::env::var("REDIS_URL") else {
            return;
        };

        let connection = init_redis(&url).await.unwrap();
        contract::check_store(&RedisStore::new(connection)).await;
    }

    #[test]
    fn test_score_orders_by_time() {
        let earlier = Utc::now();
        let later = earlier + chrono::Duration::microseconds(1);
        assert!(score(earlier) < score(later));
    }
}
