use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::models::UserId;

type LockMap = DashMap<UserId, Arc<Mutex<()>>>;

/// One async mutex per user, serialising read-decide-write passes over that user's tree.
/// Entries are dropped once nobody holds or waits on them.
#[derive(Default)]
pub struct UserLocks {
    locks: Arc<LockMap>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, user: UserId) -> UserGuard {
        // clone out of the map so the shard guard is released before awaiting
        let lock = Arc::clone(&self.locks.entry(user).or_default());

        UserGuard {
            user,
            guard: Some(lock.lock_owned().await),
            locks: Arc::clone(&self.locks),
        }
    }
}

pub struct UserGuard {
    user: UserId,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<LockMap>,
}

impl Drop for UserGuard {
    fn drop(&mut self) {
        // release first, the owned guard holds its own reference to the mutex
        drop(self.guard.take());

        // waiters hold a clone, so a count of one means only the map is left
        self.locks
            .remove_if(&self.user, |_, lock| Arc::strong_count(lock) == 1);
    }
}
