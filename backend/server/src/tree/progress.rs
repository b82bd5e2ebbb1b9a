use chrono::Utc;
use tracing::debug;

use crate::{
    database::SharedStore,
    error::StoreError,
    models::{Milestone, Progress, ProgressView, UserId},
};

/// Upper act bound of each tier, checked in order. Anything above the last bound is tier 5.
const TIER_BOUNDS: [(u64, u8); 4] = [(10, 1), (25, 2), (50, 3), (100, 4)];
const TOP_TIER: u8 = 5;

const MILESTONES: [(u64, &str); 7] = [
    (3, "Colored Ornaments"),
    (5, "Star Topper"),
    (10, "Lights"),
    (15, "Garland"),
    (25, "Snowflakes"),
    (50, "Golden Ornaments"),
    (100, "Special Tree Topper"),
];

pub fn tier_level(total_acts: u64) -> u8 {
    TIER_BOUNDS
        .iter()
        .find(|(bound, _)| total_acts <= *bound)
        .map_or(TOP_TIER, |(_, tier)| *tier)
}

pub fn next_milestone(total_acts: u64) -> Option<Milestone> {
    MILESTONES
        .iter()
        .find(|(milestone_acts, _)| total_acts < *milestone_acts)
        .map(|&(milestone_acts, reward)| Milestone {
            acts_needed: milestone_acts - total_acts,
            milestone_acts,
            reward,
        })
}

impl From<Progress> for ProgressView {
    fn from(progress: Progress) -> Self {
        Self {
            next_milestone: next_milestone(progress.total_acts),
            total_acts: progress.total_acts,
            total_decorations: progress.total_decorations,
            tier_level: progress.tier_level,
            last_updated: progress.last_updated,
        }
    }
}

/// Keeps the cached progress record in step with the act and decoration stores.
#[derive(Clone)]
pub struct ProgressTracker {
    store: SharedStore,
}

impl ProgressTracker {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    pub async fn refresh(&self, user: UserId) -> Result<Progress, StoreError> {
        let now = Utc::now();
        let mut progress = self
            .store
            .get_progress(user)
            .await?
            .unwrap_or_else(|| Progress::new(user, now));

        progress.total_acts = self.store.count_acts_for_user(user).await?;
        progress.total_decorations = self.store.count_decorations_for_user(user).await?;
        progress.tier_level = tier_level(progress.total_acts);
        progress.last_updated = now;

        self.store.put_progress(progress.clone()).await?;

        debug!(
            user,
            total_acts = progress.total_acts,
            total_decorations = progress.total_decorations,
            tier_level = progress.tier_level,
            "Progress refreshed"
        );

        Ok(progress)
    }
}
