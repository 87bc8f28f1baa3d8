//! Per-id commit serialization.
//!
//! Two workers may race on the same id (a forced re-download next to a
//! concurrent batch). The sink holds an [`IdClaim`] from its duplicate check
//! until the record is written, so the second writer always observes the
//! first writer's record.

use crate::types::ItemId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;

use super::Store;

type ClaimMap = Arc<Mutex<HashMap<ItemId, Arc<tokio::sync::Mutex<()>>>>>;

/// Exclusive right to commit one id; released on drop
pub struct IdClaim {
    id: ItemId,
    guard: Option<OwnedMutexGuard<()>>,
    claims: ClaimMap,
}

impl IdClaim {
    /// The claimed id
    pub fn id(&self) -> &ItemId {
        &self.id
    }
}

impl std::fmt::Debug for IdClaim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdClaim").field("id", &self.id).finish()
    }
}

impl Drop for IdClaim {
    fn drop(&mut self) {
        drop(self.guard.take());

        // Forget the lock once nobody else holds or waits on it
        if let Ok(mut claims) = self.claims.lock()
            && claims
                .get(&self.id)
                .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            claims.remove(&self.id);
        }
    }
}

impl Store {
    /// Wait for exclusive commit rights on `id`
    pub async fn claim(&self, id: &ItemId) -> IdClaim {
        let lock = {
            let mut claims = match self.claims.lock() {
                Ok(claims) => claims,
                Err(poisoned) => poisoned.into_inner(),
            };
            claims
                .entry(id.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };

        let guard = lock.lock_owned().await;

        IdClaim {
            id: id.clone(),
            guard: Some(guard),
            claims: self.claims.clone(),
        }
    }

    /// Number of ids with a live claim or waiter
    pub fn active_claims(&self) -> usize {
        self.claims.lock().map(|c| c.len()).unwrap_or(0)
    }
}
