//! Single-flight lease per organization and evaluator kind.

use std::time::Duration;

use chrono::{DateTime, Utc};
use common::model::EvaluatorKind;
use common::store::Store;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{LifecycleError, Result};

#[derive(Debug)]
pub(crate) struct EvaluationLease {
    org_id: Uuid,
    kind: EvaluatorKind,
    holder: String,
}

impl EvaluationLease {
    /// Take the lease or fail with [`LifecycleError::EvaluationInProgress`].
    pub(crate) async fn acquire(
        store: &dyn Store,
        org_id: Uuid,
        kind: EvaluatorKind,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<Self> {
        let holder = format!("{kind}-{}", Uuid::new_v4());
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(24));
        if !store
            .try_acquire_lease(org_id, kind, &holder, now, ttl)
            .await?
        {
            return Err(LifecycleError::EvaluationInProgress { org_id, kind });
        }
        debug!(org_id = %org_id, kind = %kind, holder = %holder, "Acquired evaluation lease");
        Ok(Self {
            org_id,
            kind,
            holder,
        })
    }

    /// Give the lease back. Failures are logged; the TTL frees it anyway.
    pub(crate) async fn release(self, store: &dyn Store) {
        if let Err(e) = store
            .release_lease(self.org_id, self.kind, &self.holder)
            .await
        {
            warn!(
                org_id = %self.org_id,
                kind = %self.kind,
                error = %e,
                "Failed to release evaluation lease"
            );
        }
    }
}
