//! Single-writer discipline for commits.
//!
//! Commits for the same statute are serialized; commits for different
//! statutes proceed independently. A statute's lock is dropped from the
//! table once nobody holds or awaits it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;
use tracing::debug;

use statutesync_shared::{Result, StatuteId};
use statutesync_storage::{ArticleStore, CommitReport, CommitRequest};

/// Hands out one async lock per statute id.
#[derive(Debug, Default)]
pub struct CommitCoordinator {
    locks: Mutex<HashMap<StatuteId, Arc<tokio::sync::Mutex<()>>>>,
}

impl CommitCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, statute: &StatuteId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(statute.clone()).or_default())
    }

    fn release(&self, statute: &StatuteId) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(statute)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(statute);
        }
    }

    /// Wait for exclusive write access to `statute`. Everything done while
    /// the returned guard lives is serialized against other holders.
    pub async fn acquire(&self, statute: &StatuteId) -> StatuteLock<'_> {
        let mut held = StatuteLock {
            coordinator: self,
            statute: statute.clone(),
            guard: None,
        };
        held.guard = Some(self.lock_for(statute).lock_owned().await);
        debug!(%statute, "acquired commit lock");
        held
    }

    /// Commit through `store` while holding the statute's write lock.
    pub async fn commit<S: ArticleStore>(
        &self,
        store: &S,
        request: &CommitRequest,
    ) -> Result<CommitReport> {
        let _lock = self.acquire(&request.statute_id).await;
        store.commit(request).await
    }
}

/// Write access to one statute, released on drop.
pub struct StatuteLock<'a> {
    coordinator: &'a CommitCoordinator,
    statute: StatuteId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for StatuteLock<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.coordinator.release(&self.statute);
    }
}
