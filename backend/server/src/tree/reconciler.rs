//! # Reconciliation
//!
//! Every act a user owns should carry exactly one auto-placed decoration. Decorations are
//! created lazily: whenever the tree is read, acts without one are decorated in creation
//! order, each act numbered by its rank among the user's acts.
//!
//! ## Pass
//! 1. Refresh progress
//! 2. Read acts ascending, stop if every one of them is linked to a decoration
//! 3. Read the types already on the tree
//! 4. Allocate and store a decoration per undecorated act, feeding each choice back into
//!    the working type list and decoration count
//! 5. Refresh progress and assemble the tree
//!
//! Steps 1-4 run under the user's lock so two passes never decorate the same act twice.
//! Every other write to a user's tree, act deletion included, takes the same lock.
//!
//! Manual decorations never reference an act, they are neither created nor removed here.
use chrono::Utc;
use tracing::{debug, info};

use super::{Allocator, ProgressTracker, locks::UserLocks};
use crate::{
    database::SharedStore,
    error::AppError,
    models::{
        ActId, Decoration, DecorationId, DecorationPatch, NewDecoration, Placement, Progress,
        TreeState, UserId,
    },
    utils::{validate_color, validate_decoration_type, validate_position, validate_size},
};

pub struct TreeService {
    store: SharedStore,
    tracker: ProgressTracker,
    allocator: Allocator,
    locks: UserLocks,
}

impl TreeService {
    pub fn new(store: SharedStore, allocator: Allocator) -> Self {
        Self {
            tracker: ProgressTracker::new(store.clone()),
            store,
            allocator,
            locks: UserLocks::new(),
        }
    }

    pub async fn sync(&self, user: UserId) -> Result<TreeState, AppError> {
        let progress = {
            let _guard = self.locks.acquire(user).await;
            self.reconcile(user).await?
        };

        let decorations = self.store.decorations_for_user(user).await?;

        Ok(TreeState {
            tier_level: progress.tier_level,
            total_acts: progress.total_acts,
            total_decorations: progress.total_decorations,
            decorations,
            progress: progress.into(),
        })
    }

    async fn reconcile(&self, user: UserId) -> Result<Progress, AppError> {
        let progress = self.tracker.refresh(user).await?;
        let decorated = self.store.decorated_act_ids(user).await?;
        let acts = self.store.acts_for_user(user).await?;

        if acts.iter().all(|act| decorated.contains(&act.id)) {
            return Ok(progress);
        }

        let mut present = self.store.decoration_types_for_user(user).await?;
        let mut existing_count = progress.total_decorations;
        let mut created = 0;

        for (rank, act) in acts.iter().enumerate() {
            if decorated.contains(&act.id) {
                continue;
            }

            let act_number = rank as u64 + 1;
            let placement = self.allocator.allocate(
                act_number,
                existing_count,
                progress.total_acts,
                progress.tier_level,
                &present,
            );

            debug!(
                user,
                act_number,
                decoration_type = %placement.decoration_type,
                "Decorating act"
            );

            present.push(placement.decoration_type);
            self.store
                .insert_decoration(Decoration::auto_placed(user, act.id, placement, Utc::now()))
                .await?;

            existing_count += 1;
            created += 1;
        }

        info!(user, created, "Reconciled tree");

        Ok(self.tracker.refresh(user).await?)
    }

    /// Decorates one act from the current snapshot, without ranking it against earlier acts.
    pub async fn auto_decorate(&self, user: UserId, act_id: ActId) -> Result<Decoration, AppError> {
        let _guard = self.locks.acquire(user).await;

        let act = self
            .store
            .get_act(act_id)
            .await?
            .filter(|act| act.user == Some(user))
            .ok_or(AppError::NotFound("Act"))?;

        if self.store.decorated_act_ids(user).await?.contains(&act.id) {
            return Err(AppError::AlreadyDecorated(act.id));
        }

        let progress = self.tracker.refresh(user).await?;
        let present = self.store.decoration_types_for_user(user).await?;
        let placement = self.allocator.allocate(
            progress.total_acts,
            progress.total_decorations,
            progress.total_acts,
            progress.tier_level,
            &present,
        );

        let decoration = Decoration::auto_placed(user, act.id, placement, Utc::now());
        self.store.insert_decoration(decoration.clone()).await?;
        self.tracker.refresh(user).await?;

        info!(
            user,
            act = %act.id,
            decoration_type = %decoration.decoration_type,
            "Auto-decorated act"
        );

        Ok(decoration)
    }

    pub async fn list(&self, user: UserId) -> Result<Vec<Decoration>, AppError> {
        Ok(self.store.decorations_for_user(user).await?)
    }

    pub async fn get(&self, user: UserId, id: DecorationId) -> Result<Decoration, AppError> {
        self.store
            .get_decoration(id)
            .await?
            .filter(|decoration| decoration.user == user)
            .ok_or(AppError::NotFound("Decoration"))
    }

    pub async fn create_manual(
        &self,
        user: UserId,
        input: NewDecoration,
    ) -> Result<Decoration, AppError> {
        let decoration_type = validate_decoration_type(&input.decoration_type)?;
        let position_x = validate_position("position_x", input.position_x)?;
        let position_y = validate_position("position_y", input.position_y)?;
        let color = match input.color {
            Some(color) => validate_color(&color)?,
            None => self.allocator.choose_color(decoration_type),
        };
        let size = validate_size(input.size.unwrap_or(1.0))?;

        let placement = Placement {
            decoration_type,
            color,
            size,
            position_x,
            position_y,
        };

        let _guard = self.locks.acquire(user).await;

        let decoration = Decoration::manual(user, placement, Utc::now());
        self.store.insert_decoration(decoration.clone()).await?;
        self.tracker.refresh(user).await?;

        Ok(decoration)
    }

    /// Moves or restyles a decoration. Provenance and the act link never change here.
    pub async fn update(
        &self,
        user: UserId,
        id: DecorationId,
        patch: DecorationPatch,
    ) -> Result<Decoration, AppError> {
        let _guard = self.locks.acquire(user).await;

        let mut decoration = self.get(user, id).await?;

        if let Some(decoration_type) = patch.decoration_type {
            decoration.decoration_type = validate_decoration_type(&decoration_type)?;
        }
        if let Some(x) = patch.position_x {
            decoration.position_x = validate_position("position_x", x)?;
        }
        if let Some(y) = patch.position_y {
            decoration.position_y = validate_position("position_y", y)?;
        }
        if let Some(color) = patch.color {
            decoration.color = validate_color(&color)?;
        }
        if let Some(size) = patch.size {
            decoration.size = validate_size(size)?;
        }

        decoration.updated_at = Utc::now();
        self.store.update_decoration(decoration.clone()).await?;

        Ok(decoration)
    }

    pub async fn delete(&self, user: UserId, id: DecorationId) -> Result<(), AppError> {
        let _guard = self.locks.acquire(user).await;

        let decoration = self.get(user, id).await?;
        self.store.delete_decoration(decoration.id).await?;
        self.tracker.refresh(user).await?;

        Ok(())
    }

    /// Removes an act and clears the link on every decoration it unlocked. Owned acts are
    /// removed under the owner's lock so no pass can decorate the act halfway through.
    pub async fn forget_act(&self, owner: Option<UserId>, id: ActId) -> Result<u64, AppError> {
        let _guard = match owner {
            Some(user) => Some(self.locks.acquire(user).await),
            None => None,
        };

        self.store.delete_act(id).await?;
        let unlinked = self.store.unlink_act(id).await?;

        if let Some(user) = owner {
            self.tracker.refresh(user).await?;
        }

        Ok(unlinked)
    }

    pub async fn progress(&self, user: UserId) -> Result<Progress, AppError> {
        Ok(self.tracker.refresh(user).await?)
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, sync::Arc};

    use chrono::Duration;
    use uuid::Uuid;

    use super::*;
    use crate::{
        database::{ActStore, DecorationStore},
        memory::MemoryStore,
        models::{Act, Category, DecorationType, Milestone},
        tree::allocator::FixedRandom,
    };

    fn service_with(allocator: Allocator) -> (Arc<MemoryStore>, TreeService) {
        let store = Arc::new(MemoryStore::new());
        let service = TreeService::new(store.clone(), allocator);
        (store, service)
    }

    fn service() -> (Arc<MemoryStore>, TreeService) {
        service_with(Allocator::default())
    }

    fn act_at(user: UserId, created_at: chrono::DateTime<Utc>) -> Act {
        Act {
            id: Uuid::new_v4(),
            user: Some(user),
            description: "Helped a neighbour".to_string(),
            category: Category::Time,
            latitude: 19.07,
            longitude: 72.87,
            city: "Mumbai".to_string(),
            country: "India".to_string(),
            evidence_url: None,
            submitted_by: String::new(),
            is_anonymous: false,
            appreciation_count: 0,
            created_at,
            updated_at: created_at,
        }
    }

    async fn submit_acts(store: &MemoryStore, user: UserId, count: usize) -> Vec<Act> {
        let start = Utc::now() - Duration::hours(1);
        let mut acts = Vec::with_capacity(count);

        for n in 0..count {
            let act = act_at(user, start + Duration::seconds(n as i64));
            store.insert_act(act.clone()).await.unwrap();
            acts.push(act);
        }

        acts
    }

    fn auto_placed(tree: &TreeState) -> Vec<&Decoration> {
        tree.decorations.iter().filter(|d| d.is_auto_placed).collect()
    }

    #[tokio::test]
    async fn test_twelve_acts_decorated_in_order() {
        let (store, service) = service();
        let acts = submit_acts(&store, 1, 12).await;

        let tree = service.sync(1).await.unwrap();
        let decorations = auto_placed(&tree);

        assert_eq!(decorations.len(), 12);
        assert_eq!(tree.total_decorations, 12);
        assert_eq!(tree.total_acts, 12);
        assert_eq!(tree.tier_level, 2);
        assert_eq!(decorations[4].decoration_type, DecorationType::Star);
        assert_eq!(decorations[9].decoration_type, DecorationType::Light);

        let linked: Vec<ActId> = decorations.iter().filter_map(|d| d.unlocked_by_act).collect();
        assert_eq!(linked, acts.iter().map(|a| a.id).collect::<Vec<_>>());

        for pair in decorations.windows(2) {
            assert!(pair[0].position_y <= pair[1].position_y);
        }
        for d in &decorations {
            assert!((30.0..=70.0).contains(&d.position_x));
            assert!((15.0..=80.0).contains(&d.position_y));
            assert!((0.8..=1.2).contains(&d.size));
        }
    }

    #[tokio::test]
    async fn test_five_acts_scenario() {
        let (store, service) = service();
        submit_acts(&store, 1, 5).await;

        let tree = service.sync(1).await.unwrap();

        assert_eq!(tree.decorations.len(), 5);
        assert_eq!(tree.decorations[4].decoration_type, DecorationType::Star);
        assert!(tree.decorations[..4]
            .iter()
            .all(|d| d.decoration_type == DecorationType::Ornament));
        assert_eq!(tree.progress.tier_level, 1);
        assert_eq!(tree.progress.total_acts, 5);
        assert_eq!(
            tree.progress.next_milestone,
            Some(Milestone {
                acts_needed: 5,
                milestone_acts: 10,
                reward: "Lights",
            })
        );
    }

    #[tokio::test]
    async fn test_sync_is_idempotent() {
        let (store, service) = service();
        submit_acts(&store, 1, 7).await;

        let first = service.sync(1).await.unwrap();
        let second = service.sync(1).await.unwrap();

        assert_eq!(first.total_decorations, 7);
        assert_eq!(second.total_decorations, 7);
        assert_eq!(first.decorations, second.decorations);
    }

    #[tokio::test]
    async fn test_incremental_sync_keeps_rank() {
        let (store, service) = service();
        submit_acts(&store, 1, 4).await;
        service.sync(1).await.unwrap();

        // the fifth act arrives later and is still decorated as act number five
        let act = act_at(1, Utc::now());
        store.insert_act(act.clone()).await.unwrap();

        let tree = service.sync(1).await.unwrap();
        let newest = tree.decorations.last().unwrap();
        assert_eq!(newest.unlocked_by_act, Some(act.id));
        assert_eq!(newest.decoration_type, DecorationType::Star);
        assert_eq!(tree.total_decorations, 5);
    }

    #[tokio::test]
    async fn test_concurrent_syncs_do_not_duplicate() {
        let (store, service) = service();
        submit_acts(&store, 1, 20).await;
        let service = Arc::new(service);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let service = Arc::clone(&service);
                tokio::spawn(async move { service.sync(1).await.unwrap() })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.count_decorations_for_user(1).await.unwrap(), 20);
        assert_eq!(store.decorated_act_ids(1).await.unwrap().len(), 20);
    }

    #[tokio::test]
    async fn test_manual_decorations_left_alone() {
        let (store, service) = service();
        let manual = service
            .create_manual(
                1,
                NewDecoration {
                    decoration_type: "gift".to_string(),
                    position_x: 10.0,
                    position_y: 90.0,
                    color: None,
                    size: None,
                },
            )
            .await
            .unwrap();
        assert!(!manual.is_auto_placed);
        assert_eq!(manual.unlocked_by_act, None);

        submit_acts(&store, 1, 3).await;
        let tree = service.sync(1).await.unwrap();

        assert_eq!(tree.total_decorations, 4);
        assert_eq!(auto_placed(&tree).len(), 3);
        assert!(tree.decorations.contains(&manual));
    }

    #[tokio::test]
    async fn test_deleted_act_keeps_decoration() {
        let (store, service) = service();
        let acts = submit_acts(&store, 1, 3).await;
        service.sync(1).await.unwrap();

        assert_eq!(service.forget_act(Some(1), acts[0].id).await.unwrap(), 1);

        let tree = service.sync(1).await.unwrap();
        assert_eq!(tree.total_acts, 2);
        assert_eq!(tree.total_decorations, 3);
        assert_eq!(
            tree.decorations.iter().filter(|d| d.unlocked_by_act.is_none()).count(),
            1
        );
    }

    #[tokio::test]
    async fn test_forget_act_waits_for_running_pass() {
        let (store, service) = service();
        let acts = submit_acts(&store, 1, 2).await;
        service.sync(1).await.unwrap();
        let service = Arc::new(service);

        let guard = service.locks.acquire(1).await;
        let forgetting = {
            let service = Arc::clone(&service);
            let id = acts[0].id;
            tokio::spawn(async move { service.forget_act(Some(1), id).await.unwrap() })
        };

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!forgetting.is_finished());
        assert!(store.get_act(acts[0].id).await.unwrap().is_some());

        drop(guard);
        assert_eq!(forgetting.await.unwrap(), 1);

        let tree = service.sync(1).await.unwrap();
        assert_eq!(tree.total_acts, 1);
        assert_eq!(tree.total_decorations, 2);
        assert!(
            tree.decorations
                .iter()
                .all(|d| d.unlocked_by_act != Some(acts[0].id))
        );
    }

    #[tokio::test]
    async fn test_stale_reference_does_not_hide_new_act() {
        let (store, service) = service();
        let acts = submit_acts(&store, 1, 2).await;
        service.sync(1).await.unwrap();

        // a pass landing between unlinking and deleting leaves a stale act reference
        store.unlink_act(acts[0].id).await.unwrap();
        service.sync(1).await.unwrap();
        store.delete_act(acts[0].id).await.unwrap();

        let fresh = act_at(1, Utc::now());
        store.insert_act(fresh.clone()).await.unwrap();

        service.sync(1).await.unwrap();
        assert!(store.decorated_act_ids(1).await.unwrap().contains(&fresh.id));
    }

    #[tokio::test]
    async fn test_sequential_auto_decorate() {
        let (store, service) = service();
        let start = Utc::now() - Duration::hours(1);

        for n in 0..5 {
            let act = act_at(1, start + Duration::minutes(n));
            store.insert_act(act.clone()).await.unwrap();
            service.auto_decorate(1, act.id).await.unwrap();
        }

        let tree = service.sync(1).await.unwrap();
        let types: Vec<_> = tree.decorations.iter().map(|d| d.decoration_type).collect();
        assert_eq!(
            types,
            [
                DecorationType::Ornament,
                DecorationType::Ornament,
                DecorationType::Ornament,
                DecorationType::Ornament,
                DecorationType::Star,
            ]
        );
        assert_eq!(tree.progress.tier_level, 1);
        assert_eq!(tree.progress.total_acts, 5);
        assert_eq!(tree.progress.next_milestone.map(|m| m.acts_needed), Some(5));
    }

    #[tokio::test]
    async fn test_auto_decorate_uses_snapshot() {
        let (store, service) = service_with(FixedRandom::allocator(0.99, 0, 0.5));
        let acts = submit_acts(&store, 1, 5).await;

        // numbered by the current act total rather than the act's own rank
        let first = service.auto_decorate(1, acts[0].id).await.unwrap();
        assert_eq!(first.decoration_type, DecorationType::Star);
        assert!(first.is_auto_placed);
        assert_eq!(first.unlocked_by_act, Some(acts[0].id));
        assert_eq!((first.position_x, first.position_y), (50.0, 15.0));

        let tree = service.sync(1).await.unwrap();
        assert_eq!(tree.total_decorations, 5);
        assert_eq!(tree.decorations[0], first);
        assert_eq!(tree.decorations[4].decoration_type, DecorationType::Star);
    }

    #[tokio::test]
    async fn test_auto_decorate_rejects_duplicates_and_strangers() {
        let (store, service) = service();
        let mine = submit_acts(&store, 1, 1).await.remove(0);
        let theirs = submit_acts(&store, 2, 1).await.remove(0);

        service.auto_decorate(1, mine.id).await.unwrap();

        assert!(matches!(
            service.auto_decorate(1, mine.id).await,
            Err(AppError::AlreadyDecorated(id)) if id == mine.id
        ));
        assert!(matches!(
            service.auto_decorate(1, theirs.id).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            service.auto_decorate(1, Uuid::new_v4()).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_manual_validation_names_field() {
        let (store, service) = service();
        let base = NewDecoration {
            decoration_type: "star".to_string(),
            position_x: 50.0,
            position_y: 50.0,
            color: None,
            size: None,
        };

        let cases = [
            (
                NewDecoration {
                    decoration_type: "candy".to_string(),
                    ..base.clone()
                },
                "decoration_type",
            ),
            (
                NewDecoration {
                    position_x: 120.0,
                    ..base.clone()
                },
                "position_x",
            ),
            (
                NewDecoration {
                    position_y: -3.0,
                    ..base.clone()
                },
                "position_y",
            ),
            (
                NewDecoration {
                    size: Some(3.0),
                    ..base.clone()
                },
                "size",
            ),
            (
                NewDecoration {
                    color: Some("gold".to_string()),
                    ..base.clone()
                },
                "color",
            ),
        ];

        for (input, expected) in cases {
            match service.create_manual(1, input).await {
                Err(AppError::Validation { field, .. }) => assert_eq!(field, expected),
                other => panic!("expected {expected} validation error, got {other:?}"),
            }
        }

        assert_eq!(store.count_decorations_for_user(1).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_update_and_delete_own_decoration() {
        let (store, service) = service();
        submit_acts(&store, 1, 2).await;
        let tree = service.sync(1).await.unwrap();
        let target = tree.decorations[0].clone();

        let moved = service
            .update(
                1,
                target.id,
                DecorationPatch {
                    position_x: Some(42.0),
                    color: Some("#123abc".to_string()),
                    ..DecorationPatch::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(moved.position_x, 42.0);
        assert_eq!(moved.color, "#123ABC");
        assert!(moved.is_auto_placed);
        assert_eq!(moved.unlocked_by_act, target.unlocked_by_act);

        assert!(matches!(
            service.update(2, target.id, DecorationPatch::default()).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(service.delete(2, target.id).await, Err(AppError::NotFound(_))));

        service.delete(1, target.id).await.unwrap();
        assert_eq!(service.progress(1).await.unwrap().total_decorations, 1);

        // the act lost its decoration, the next read restores one
        let tree = service.sync(1).await.unwrap();
        let linked: HashSet<_> = tree
            .decorations
            .iter()
            .filter_map(|d| d.unlocked_by_act)
            .collect();
        assert_eq!(linked.len(), 2);
    }

    #[tokio::test]
    async fn test_update_waits_for_running_pass() {
        let (store, service) = service();
        submit_acts(&store, 1, 1).await;
        let target = service.sync(1).await.unwrap().decorations[0].clone();
        let service = Arc::new(service);

        let guard = service.locks.acquire(1).await;
        let updating = {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                let patch = DecorationPatch {
                    position_x: Some(60.0),
                    ..DecorationPatch::default()
                };
                service.update(1, target.id, patch).await
            })
        };

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!updating.is_finished());

        // the delete wins the race, the queued update must not bring the record back
        store.delete_decoration(target.id).await.unwrap();
        drop(guard);

        assert!(matches!(updating.await.unwrap(), Err(AppError::NotFound(_))));
        assert_eq!(store.get_decoration(target.id).await.unwrap(), None);
    }
}
