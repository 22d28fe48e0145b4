use std::fmt;

use common::model::{EvaluatorKind, PolicyStatus, SnapshotKey, TierType, ValidationError};
use common::store::StoreError;
use thiserror::Error;
use uuid::Uuid;

/// Errors that abort an operation.
///
/// Per-snapshot failures never end up here; they are collected as
/// [`CandidateError`]s on the result of the pass.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Policy {policy_id} is {status}, only active policies are evaluated")]
    PolicyNotActive {
        policy_id: Uuid,
        status: PolicyStatus,
    },

    #[error("A {kind} evaluation is already running for organization {org_id}")]
    EvaluationInProgress { org_id: Uuid, kind: EvaluatorKind },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid {entity} state transition from {from} to {to}")]
    InvalidStateTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("Snapshot {key} is in the {tier} tier, not in cold storage")]
    NotInColdStorage { key: SnapshotKey, tier: TierType },
}

impl LifecycleError {
    pub fn not_found(entity: &'static str, id: impl fmt::Display) -> Self {
        LifecycleError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid_transition(
        entity: &'static str,
        from: impl fmt::Display,
        to: impl fmt::Display,
    ) -> Self {
        LifecycleError::InvalidStateTransition {
            entity,
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, LifecycleError>;

/// A recoverable failure for one snapshot inside a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateError {
    pub repository_id: Uuid,
    pub snapshot_id: String,
    pub message: String,
}

impl CandidateError {
    pub fn new(key: &SnapshotKey, message: impl Into<String>) -> Self {
        Self {
            repository_id: key.repository_id,
            snapshot_id: key.snapshot_id.clone(),
            message: message.into(),
        }
    }
}

impl fmt::Display for CandidateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}: {}",
            self.repository_id, self.snapshot_id, self.message
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let org_id = Uuid::nil();
        let err = LifecycleError::EvaluationInProgress {
            org_id,
            kind: EvaluatorKind::Tiering,
        };
        assert_eq!(
            err.to_string(),
            format!("A tiering evaluation is already running for organization {org_id}")
        );

        let err = LifecycleError::invalid_transition("restore request", "pending", "ready");
        assert_eq!(
            err.to_string(),
            "Invalid restore request state transition from pending to ready"
        );
    }

    #[test]
    fn test_candidate_error_display() {
        let key = SnapshotKey::new(Uuid::nil(), "abc");
        let err = CandidateError::new(&key, "provider timeout");
        assert_eq!(err.to_string(), format!("{}/abc: provider timeout", Uuid::nil()));
    }
}
