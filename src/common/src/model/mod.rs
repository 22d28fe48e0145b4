//! Domain model for snapshot lifecycle, protection and storage tiering.
//!
//! Every tier and status value is a closed enum. String forms only exist at
//! the persistence boundary, where unknown values are rejected with a
//! [`ValidationError`] instead of being carried along.

mod policy;
mod protection;
mod report;
mod restore;
mod snapshot;
mod tier;
mod tiering;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub use policy::{
    LifecycleDeletionEvent, LifecyclePolicy, PolicyRunRecord, PolicyStatus, RetentionRule, Scope,
};
pub use protection::{ImmutabilityLock, LegalHold, ProtectionReasons, ProviderLockMode};
pub use report::{CostSuggestion, TierCostReport, TierStatsSummary, TierUsage};
pub use restore::{ColdRestoreRequest, RestorePriority, RestoreStatus};
pub use snapshot::{BYTES_PER_GB, SnapshotKey, SnapshotRef, SnapshotTier, age_in_days};
pub use tier::TierType;
pub use tiering::{StorageTierConfig, TierRule, TierTransition, TransitionStatus};

/// Errors raised when configuration or persisted values are malformed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Unknown storage tier name.
    #[error("Unknown storage tier '{0}'")]
    UnknownTier(String),

    /// Unknown value for one of the closed enums.
    #[error("Unknown {kind} '{value}'")]
    UnknownValue { kind: &'static str, value: String },

    /// A required text field is empty.
    #[error("{0} must not be empty")]
    EmptyField(&'static str),

    /// Retention rule selects nothing.
    #[error("Retention rule '{0}' must set max_age_days or a positive keep_last")]
    EmptyRetentionRule(String),

    /// Active policy without rules.
    #[error("Policy '{0}' cannot be active without rules")]
    NoRules(String),

    /// Tier rule does not move data to a colder tier.
    #[error("Tier rule '{name}' moves {from} to {to}, which is not a colder tier")]
    NotColder {
        name: String,
        from: TierType,
        to: TierType,
    },

    /// Tier rule scoped to both a repository and a schedule.
    #[error("Tier rule '{0}' cannot be scoped to both a repository and a schedule")]
    AmbiguousScope(String),

    /// Lock that ends before it starts.
    #[error("Lock on snapshot {0} must end after it starts")]
    LockWindow(String),

    /// Negative or non-finite price.
    #[error("Invalid {field} for tier {tier}: {value}")]
    InvalidPrice {
        tier: TierType,
        field: &'static str,
        value: f64,
    },
}

/// Which periodic evaluator holds a single-flight lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluatorKind {
    Lifecycle,
    Tiering,
}

impl EvaluatorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluatorKind::Lifecycle => "lifecycle",
            EvaluatorKind::Tiering => "tiering",
        }
    }
}

impl fmt::Display for EvaluatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvaluatorKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lifecycle" => Ok(EvaluatorKind::Lifecycle),
            "tiering" => Ok(EvaluatorKind::Tiering),
            other => Err(ValidationError::UnknownValue {
                kind: "evaluator kind",
                value: other.to_string(),
            }),
        }
    }
}
