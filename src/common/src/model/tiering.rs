use super::{Scope, SnapshotKey, TierType, ValidationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Per-organization pricing for one storage tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageTierConfig {
    pub org_id: Uuid,
    pub tier_type: TierType,
    pub cost_per_gb_month: f64,
    pub retrieval_cost_per_gb: f64,
    #[serde(with = "humantime_serde")]
    pub retrieval_time: Duration,
    pub enabled: bool,
}

impl StorageTierConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (field, value) in [
            ("cost_per_gb_month", self.cost_per_gb_month),
            ("retrieval_cost_per_gb", self.retrieval_cost_per_gb),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ValidationError::InvalidPrice {
                    tier: self.tier_type,
                    field,
                    value,
                });
            }
        }
        Ok(())
    }
}

/// Ordered tier-transition rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierRule {
    pub id: Uuid,
    pub org_id: Uuid,
    pub repository_id: Option<Uuid>,
    pub schedule_id: Option<Uuid>,
    pub name: String,
    pub from_tier: TierType,
    pub to_tier: TierType,
    pub age_threshold_days: u32,
    /// Hot copies per schedule that must survive a move out of `hot`.
    pub min_copies: u32,
    /// Lower numbers are evaluated first.
    pub priority: i32,
    pub enabled: bool,
}

impl TierRule {
    pub fn scope(&self) -> Scope {
        match (self.repository_id, self.schedule_id) {
            (_, Some(schedule)) => Scope::Schedule(schedule),
            (Some(repository), None) => Scope::Repository(repository),
            (None, None) => Scope::Org,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyField("tier rule name"));
        }
        if self.repository_id.is_some() && self.schedule_id.is_some() {
            return Err(ValidationError::AmbiguousScope(self.name.clone()));
        }
        if !self.to_tier.is_colder_than(self.from_tier) {
            return Err(ValidationError::NotColder {
                name: self.name.clone(),
                from: self.from_tier,
                to: self.to_tier,
            });
        }
        Ok(())
    }
}

/// Lifecycle of a single tier transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TransitionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransitionStatus::Completed | TransitionStatus::Failed)
    }

    pub fn can_transition_to(&self, next: TransitionStatus) -> bool {
        use TransitionStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress) | (InProgress, Completed) | (InProgress, Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionStatus::Pending => "pending",
            TransitionStatus::InProgress => "in_progress",
            TransitionStatus::Completed => "completed",
            TransitionStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TransitionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransitionStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransitionStatus::Pending),
            "in_progress" => Ok(TransitionStatus::InProgress),
            "completed" => Ok(TransitionStatus::Completed),
            "failed" => Ok(TransitionStatus::Failed),
            other => Err(ValidationError::UnknownValue {
                kind: "transition status",
                value: other.to_string(),
            }),
        }
    }
}

/// One rule-triggered migration between storage tiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierTransition {
    pub id: Uuid,
    pub org_id: Uuid,
    pub snapshot_tier_id: Uuid,
    pub snapshot_id: String,
    pub repository_id: Uuid,
    pub from_tier: TierType,
    pub to_tier: TierType,
    pub trigger_rule_id: Option<Uuid>,
    pub size_bytes: u64,
    /// Monthly saving in currency units.
    pub estimated_saving: f64,
    pub status: TransitionStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TierTransition {
    pub fn key(&self) -> SnapshotKey {
        SnapshotKey::new(self.repository_id, self.snapshot_id.clone())
    }
}
