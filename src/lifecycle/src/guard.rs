//! Guard layer: answers whether a snapshot is protected by an active
//! immutability lock or a legal hold.
//!
//! Every deletion and every tier move below a lock floor consults this
//! module, once at selection time and again right before acting.

use std::collections::HashMap;
use std::sync::Arc;

use common::clock::Clock;
use common::model::{ProtectionReasons, SnapshotKey};
use common::store::{Store, StoreResult};

#[derive(Debug, Clone)]
pub struct Guard {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl Guard {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn is_protected(&self, key: &SnapshotKey) -> StoreResult<bool> {
        Ok(self.protection_reasons(key).await?.is_protected())
    }

    pub async fn protection_reasons(&self, key: &SnapshotKey) -> StoreResult<ProtectionReasons> {
        let status = self
            .protection_status_for_many(std::slice::from_ref(key))
            .await?;
        Ok(status.reasons(key))
    }

    /// Protection of many snapshots with one lock query and one hold query.
    pub async fn protection_status_for_many(
        &self,
        keys: &[SnapshotKey],
    ) -> StoreResult<ProtectionMap> {
        if keys.is_empty() {
            return Ok(ProtectionMap::default());
        }

        let now = self.clock.now();
        let (locks, holds) =
            tokio::try_join!(self.store.locks_for(keys), self.store.holds_for(keys))?;

        let mut reasons: HashMap<SnapshotKey, ProtectionReasons> = HashMap::new();
        for lock in locks.into_iter().filter(|lock| lock.is_active(now)) {
            let entry = reasons.entry(lock.key()).or_default();
            entry.immutable = true;
            entry.floor_tier = lock.floor_tier;
            entry.locked_until = Some(lock.locked_until);
        }
        for hold in holds {
            reasons.entry(hold.key()).or_default().legally_held = true;
        }

        Ok(ProtectionMap { reasons })
    }
}

/// Result of a batched protection lookup. Snapshots without an entry are
/// unprotected.
#[derive(Debug, Clone, Default)]
pub struct ProtectionMap {
    reasons: HashMap<SnapshotKey, ProtectionReasons>,
}

impl ProtectionMap {
    pub fn reasons(&self, key: &SnapshotKey) -> ProtectionReasons {
        self.reasons.get(key).copied().unwrap_or_default()
    }

    pub fn is_protected(&self, key: &SnapshotKey) -> bool {
        self.reasons(key).is_protected()
    }

    /// Number of protected snapshots in the lookup.
    pub fn protected_count(&self) -> usize {
        self.reasons.values().filter(|r| r.is_protected()).count()
    }
}
