//! Persistence boundary of the lifecycle engine.
//!
//! Every mutation the engine relies on for correctness is expressed as a
//! conditional operation here ("claim only if still pending", "insert unless
//! a non-terminal request exists"), so callers never read-then-write.

pub mod memory;
pub mod sql;

use crate::model::{
    ColdRestoreRequest, EvaluatorKind, ImmutabilityLock, LegalHold, LifecycleDeletionEvent,
    LifecyclePolicy, PolicyRunRecord, RestoreStatus, SnapshotKey, SnapshotRef, SnapshotTier,
    StorageTierConfig, TierCostReport, TierRule, TierTransition, ValidationError,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::fmt::Debug;
use thiserror::Error;
use uuid::Uuid;

pub use memory::InMemoryStore;
pub use sql::SqlStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Failed to decode {entity}: {message}")]
    Decode {
        entity: &'static str,
        message: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
}

impl StoreError {
    pub fn decode(entity: &'static str, err: impl std::fmt::Display) -> Self {
        StoreError::Decode {
            entity,
            message: err.to_string(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl std::fmt::Display) -> Self {
        StoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

impl From<ValidationError> for StoreError {
    fn from(err: ValidationError) -> Self {
        StoreError::decode("row", err)
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of an insert-if-absent restore request.
#[derive(Debug, Clone, PartialEq)]
pub enum RestoreInsert {
    Created(ColdRestoreRequest),
    /// A non-terminal request for the same snapshot already exists.
    Existing(ColdRestoreRequest),
}

impl RestoreInsert {
    pub fn request(&self) -> &ColdRestoreRequest {
        match self {
            RestoreInsert::Created(r) | RestoreInsert::Existing(r) => r,
        }
    }

    pub fn into_request(self) -> ColdRestoreRequest {
        match self {
            RestoreInsert::Created(r) | RestoreInsert::Existing(r) => r,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, RestoreInsert::Created(_))
    }
}

#[async_trait]
pub trait Store: Send + Sync + Debug {
    /// Every organization that owns snapshots, policies, rules or restores.
    async fn list_organizations(&self) -> StoreResult<Vec<Uuid>>;

    /// Register or refresh a snapshot reported by the backup subsystem.
    /// A hot tier record is created the first time a snapshot is seen.
    async fn upsert_snapshot(&self, snapshot: &SnapshotRef) -> StoreResult<()>;
    async fn list_snapshots(&self, org_id: Uuid) -> StoreResult<Vec<SnapshotRef>>;
    /// Drop a deleted snapshot and its tier record.
    async fn remove_snapshot(&self, key: &SnapshotKey) -> StoreResult<()>;

    /// Create or extend the lock for a snapshot. Returns the stored lock.
    async fn upsert_lock(&self, lock: &ImmutabilityLock) -> StoreResult<ImmutabilityLock>;
    async fn locks_for(&self, keys: &[SnapshotKey]) -> StoreResult<Vec<ImmutabilityLock>>;
    async fn place_hold(&self, hold: &LegalHold) -> StoreResult<()>;
    /// Returns false when no such hold existed.
    async fn release_hold(&self, hold_id: Uuid) -> StoreResult<bool>;
    async fn holds_for(&self, keys: &[SnapshotKey]) -> StoreResult<Vec<LegalHold>>;

    /// Insert a policy or update its definition. Bookkeeping fields of an
    /// existing policy are left untouched.
    async fn save_policy(&self, policy: &LifecyclePolicy) -> StoreResult<()>;
    async fn get_policy(&self, id: Uuid) -> StoreResult<Option<LifecyclePolicy>>;
    async fn list_policies(&self, org_id: Uuid) -> StoreResult<Vec<LifecyclePolicy>>;
    async fn record_policy_run(&self, policy_id: Uuid, run: &PolicyRunRecord) -> StoreResult<()>;
    async fn append_deletion_event(&self, event: &LifecycleDeletionEvent) -> StoreResult<()>;
    async fn list_deletion_events(
        &self,
        policy_id: Uuid,
    ) -> StoreResult<Vec<LifecycleDeletionEvent>>;

    async fn upsert_tier_config(&self, config: &StorageTierConfig) -> StoreResult<()>;
    async fn list_tier_configs(&self, org_id: Uuid) -> StoreResult<Vec<StorageTierConfig>>;

    /// Import a tier placement as-is. Tiering itself only changes placement
    /// through [`Store::complete_transition`].
    async fn upsert_snapshot_tier(&self, tier: &SnapshotTier) -> StoreResult<()>;
    async fn get_snapshot_tier(&self, key: &SnapshotKey) -> StoreResult<Option<SnapshotTier>>;
    async fn list_snapshot_tiers(&self, org_id: Uuid) -> StoreResult<Vec<SnapshotTier>>;

    async fn save_tier_rule(&self, rule: &TierRule) -> StoreResult<()>;
    async fn list_tier_rules(&self, org_id: Uuid) -> StoreResult<Vec<TierRule>>;

    /// Insert a pending transition. Returns false when the snapshot already
    /// has a pending or in-progress transition.
    async fn insert_transition(&self, transition: &TierTransition) -> StoreResult<bool>;
    async fn get_transition(&self, id: Uuid) -> StoreResult<Option<TierTransition>>;
    async fn list_transitions(&self, org_id: Uuid) -> StoreResult<Vec<TierTransition>>;
    /// Pending and in-progress transitions of an organization.
    async fn list_open_transitions(&self, org_id: Uuid) -> StoreResult<Vec<TierTransition>>;
    /// Oldest pending transitions across all organizations.
    async fn list_pending_transitions(&self, limit: usize) -> StoreResult<Vec<TierTransition>>;
    /// Move `pending -> in_progress` if the transition is still pending and
    /// its snapshot has no other transition in progress.
    async fn claim_transition(&self, id: Uuid, started_at: DateTime<Utc>) -> StoreResult<bool>;
    /// Move `in_progress -> completed` and update the snapshot's tier in the
    /// same unit of work.
    async fn complete_transition(
        &self,
        transition: &TierTransition,
        completed_at: DateTime<Utc>,
    ) -> StoreResult<bool>;
    /// Move `in_progress -> failed`.
    async fn fail_transition(
        &self,
        id: Uuid,
        error_message: &str,
        failed_at: DateTime<Utc>,
    ) -> StoreResult<bool>;
    /// Fail every transition still in progress that was claimed before
    /// `started_before`. Returns how many were failed.
    async fn fail_stale_transitions(
        &self,
        started_before: DateTime<Utc>,
        error_message: &str,
        failed_at: DateTime<Utc>,
    ) -> StoreResult<u64>;

    /// Insert unless a non-terminal request for the same snapshot exists.
    async fn insert_restore_request(
        &self,
        request: &ColdRestoreRequest,
    ) -> StoreResult<RestoreInsert>;
    async fn get_restore_request(&self, id: Uuid) -> StoreResult<Option<ColdRestoreRequest>>;
    async fn list_restore_requests(&self, org_id: Uuid) -> StoreResult<Vec<ColdRestoreRequest>>;
    /// Non-terminal requests of an organization.
    async fn list_active_restores(&self, org_id: Uuid) -> StoreResult<Vec<ColdRestoreRequest>>;
    async fn list_restores_in_status(
        &self,
        org_id: Uuid,
        status: RestoreStatus,
    ) -> StoreResult<Vec<ColdRestoreRequest>>;
    /// Persist `request` only if the stored status still equals `expected`.
    async fn update_restore_request(
        &self,
        request: &ColdRestoreRequest,
        expected: RestoreStatus,
    ) -> StoreResult<bool>;
    /// Move every `ready` request whose window closed before `now` to
    /// `expired`. Returns the number of requests moved.
    async fn expire_ready_restores(&self, now: DateTime<Utc>) -> StoreResult<u64>;

    /// Insert or overwrite the report for `(org_id, report_date)`. The id of
    /// an existing report is kept.
    async fn upsert_cost_report(&self, report: &TierCostReport) -> StoreResult<TierCostReport>;
    async fn get_cost_report(
        &self,
        org_id: Uuid,
        report_date: NaiveDate,
    ) -> StoreResult<Option<TierCostReport>>;
    /// Newest first.
    async fn list_cost_reports(&self, org_id: Uuid) -> StoreResult<Vec<TierCostReport>>;

    /// Take the single-flight lease for `(org_id, kind)` unless another
    /// holder has an unexpired one.
    async fn try_acquire_lease(
        &self,
        org_id: Uuid,
        kind: EvaluatorKind,
        holder: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> StoreResult<bool>;
    async fn release_lease(&self, org_id: Uuid, kind: EvaluatorKind, holder: &str)
    -> StoreResult<()>;
}

/// Merge a lock request with the stored lock for the same snapshot.
///
/// An active lock is extended, never shortened. An expired lock is replaced
/// by the request but keeps its id.
pub(crate) fn merge_lock(
    existing: Option<ImmutabilityLock>,
    requested: &ImmutabilityLock,
) -> ImmutabilityLock {
    match existing {
        Some(mut current) if current.is_active(requested.locked_at) => {
            current.extend_with(requested);
            current
        }
        Some(expired) => ImmutabilityLock {
            id: expired.id,
            ..requested.clone()
        },
        None => requested.clone(),
    }
}
