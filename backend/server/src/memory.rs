use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::{
    database::{ActStore, DecorationStore, ProgressStore},
    error::StoreError,
    models::{Act, ActId, Decoration, DecorationId, DecorationType, Progress, UserId},
};

/// In-process store. Vectors keep insertion order so equal timestamps stay stable.
#[derive(Default)]
pub struct MemoryStore {
    acts: RwLock<Vec<Act>>,
    decorations: RwLock<Vec<Decoration>>,
    progress: RwLock<HashMap<UserId, Progress>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ActStore for MemoryStore {
    async fn insert_act(&self, act: Act) -> Result<(), StoreError> {
        self.acts.write().await.push(act);
        Ok(())
    }

    async fn get_act(&self, id: ActId) -> Result<Option<Act>, StoreError> {
        Ok(self.acts.read().await.iter().find(|act| act.id == id).cloned())
    }

    async fn list_acts(&self) -> Result<Vec<Act>, StoreError> {
        let mut acts = self.acts.read().await.clone();
        acts.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        acts.reverse();

        Ok(acts)
    }

    async fn acts_for_user(&self, user: UserId) -> Result<Vec<Act>, StoreError> {
        let mut acts: Vec<Act> = self
            .acts
            .read()
            .await
            .iter()
            .filter(|act| act.user == Some(user))
            .cloned()
            .collect();
        acts.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        Ok(acts)
    }

    async fn count_acts_for_user(&self, user: UserId) -> Result<u64, StoreError> {
        let acts = self.acts.read().await;
        Ok(acts.iter().filter(|act| act.user == Some(user)).count() as u64)
    }

    async fn delete_act(&self, id: ActId) -> Result<bool, StoreError> {
        let mut acts = self.acts.write().await;
        let before = acts.len();
        acts.retain(|act| act.id != id);

        Ok(acts.len() != before)
    }
}

#[async_trait]
impl DecorationStore for MemoryStore {
    async fn insert_decoration(&self, decoration: Decoration) -> Result<(), StoreError> {
        self.decorations.write().await.push(decoration);
        Ok(())
    }

    async fn get_decoration(&self, id: DecorationId) -> Result<Option<Decoration>, StoreError> {
        let decorations = self.decorations.read().await;
        Ok(decorations.iter().find(|d| d.id == id).cloned())
    }

    async fn update_decoration(&self, decoration: Decoration) -> Result<(), StoreError> {
        let mut decorations = self.decorations.write().await;
        if let Some(slot) = decorations.iter_mut().find(|d| d.id == decoration.id) {
            *slot = decoration;
        }

        Ok(())
    }

    async fn delete_decoration(&self, id: DecorationId) -> Result<bool, StoreError> {
        let mut decorations = self.decorations.write().await;
        let before = decorations.len();
        decorations.retain(|d| d.id != id);

        Ok(decorations.len() != before)
    }

    async fn decorations_for_user(&self, user: UserId) -> Result<Vec<Decoration>, StoreError> {
        let mut decorations: Vec<Decoration> = self
            .decorations
            .read()
            .await
            .iter()
            .filter(|d| d.user == user)
            .cloned()
            .collect();
        decorations.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        Ok(decorations)
    }

    async fn count_decorations_for_user(&self, user: UserId) -> Result<u64, StoreError> {
        let decorations = self.decorations.read().await;
        Ok(decorations.iter().filter(|d| d.user == user).count() as u64)
    }

    async fn decorated_act_ids(&self, user: UserId) -> Result<HashSet<ActId>, StoreError> {
        let decorations = self.decorations.read().await;
        Ok(decorations
            .iter()
            .filter(|d| d.user == user)
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
        let mut decorations = self.decorations.write().await;
        let now = Utc::now();
        let mut unlinked = 0;

        for decoration in decorations
            .iter_mut()
            .filter(|d| d.unlocked_by_act == Some(act))
        {
            decoration.unlocked_by_act = None;
            decoration.updated_at = now;
            unlinked += 1;
        }

        Ok(unlinked)
    }
}

#[async_trait]
impl ProgressStore for MemoryStore {
    async fn get_progress(&self, user: UserId) -> Result<Option<Progress>, StoreError> {
        Ok(self.progress.read().await.get(&user).cloned())
    }

    async fn put_progress(&self, progress: Progress) -> Result<(), StoreError> {
        self.progress.write().await.insert(progress.user, progress);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use uuid::Uuid;

    use super::*;
    use crate::{
        database::contract,
        models::{Category, Placement},
    };

    fn act(user: Option<UserId>, minutes: i64) -> Act {
        let created_at = Utc::now() + Duration::minutes(minutes);
        Act {
            id: Uuid::new_v4(),
            user,
            description: "Shared lunch".to_string(),
            category: Category::Food,
            latitude: 40.0,
            longitude: -86.9,
            city: "Lafayette".to_string(),
            country: "USA".to_string(),
            evidence_url: None,
            submitted_by: String::new(),
            is_anonymous: true,
            appreciation_count: 0,
            created_at,
            updated_at: created_at,
        }
    }

    fn placement() -> Placement {
        Placement {
            decoration_type: DecorationType::Ornament,
            color: "#DC2626".to_string(),
            size: 1.0,
            position_x: 50.0,
            position_y: 15.0,
        }
    }

    #[tokio::test]
    async fn test_store_contract() {
        contract::check_store(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_acts_for_user_ascending() {
        let store = MemoryStore::new();
        let late = act(Some(1), 10);
        let early = act(Some(1), -10);
        let other = act(Some(2), 0);
        let anonymous = act(None, 0);

        for a in [late.clone(), early.clone(), other, anonymous] {
            store.insert_act(a).await.unwrap();
        }

        let acts = store.acts_for_user(1).await.unwrap();
        assert_eq!(acts.iter().map(|a| a.id).collect::<Vec<_>>(), vec![early.id, late.id]);
        assert_eq!(store.count_acts_for_user(1).await.unwrap(), 2);
        assert_eq!(store.list_acts().await.unwrap()[0].id, late.id);
    }

    #[tokio::test]
    async fn test_unlink_act_keeps_decoration() {
        let store = MemoryStore::new();
        let a = act(Some(1), 0);
        store.insert_act(a.clone()).await.unwrap();

        let decoration = Decoration::auto_placed(1, a.id, placement(), Utc::now());
        store.insert_decoration(decoration.clone()).await.unwrap();
        assert!(store.decorated_act_ids(1).await.unwrap().contains(&a.id));

        assert_eq!(store.unlink_act(a.id).await.unwrap(), 1);
        assert!(store.delete_act(a.id).await.unwrap());

        let kept = store.get_decoration(decoration.id).await.unwrap().unwrap();
        assert_eq!(kept.unlocked_by_act, None);
        assert!(store.decorated_act_ids(1).await.unwrap().is_empty());
        assert_eq!(store.count_decorations_for_user(1).await.unwrap(), 1);
    }
}
