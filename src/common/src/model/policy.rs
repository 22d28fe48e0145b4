use super::{SnapshotRef, ValidationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle policy status. Only active policies are evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyStatus {
    Draft,
    Active,
    Paused,
}

impl PolicyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyStatus::Draft => "draft",
            PolicyStatus::Active => "active",
            PolicyStatus::Paused => "paused",
        }
    }
}

impl fmt::Display for PolicyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PolicyStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(PolicyStatus::Draft),
            "active" => Ok(PolicyStatus::Active),
            "paused" => Ok(PolicyStatus::Paused),
            other => Err(ValidationError::UnknownValue {
                kind: "policy status",
                value: other.to_string(),
            }),
        }
    }
}

/// What part of an organization a policy or rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Scope {
    Org,
    Repository(Uuid),
    Schedule(Uuid),
}

impl Scope {
    pub fn matches(&self, repository_id: Uuid, schedule_id: Option<Uuid>) -> bool {
        match self {
            Scope::Org => true,
            Scope::Repository(id) => *id == repository_id,
            Scope::Schedule(id) => schedule_id == Some(*id),
        }
    }
}

/// Retention predicate: keep the newest `keep_last` snapshots per
/// repository, and of the rest select those older than `max_age_days`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionRule {
    pub name: String,
    #[serde(default)]
    pub max_age_days: Option<u32>,
    #[serde(default)]
    pub keep_last: Option<u32>,
    /// Only snapshots carrying this tag are considered.
    #[serde(default)]
    pub tag: Option<String>,
}

impl RetentionRule {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyField("retention rule name"));
        }
        let keeps = self.keep_last.is_some_and(|k| k > 0);
        if self.max_age_days.is_none() && !keeps {
            return Err(ValidationError::EmptyRetentionRule(self.name.clone()));
        }
        if let Some(tag) = &self.tag {
            if tag.trim().is_empty() {
                return Err(ValidationError::EmptyField("retention rule tag"));
            }
        }
        Ok(())
    }
}

/// Per-organization retention policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecyclePolicy {
    pub id: Uuid,
    pub org_id: Uuid,
    pub name: String,
    pub status: PolicyStatus,
    pub rules: Vec<RetentionRule>,
    /// Empty means the whole organization.
    #[serde(default)]
    pub scopes: Vec<Scope>,
    pub last_evaluated_at: Option<DateTime<Utc>>,
    pub last_deletion_at: Option<DateTime<Utc>>,
    pub deletion_count: u64,
    pub bytes_reclaimed: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LifecyclePolicy {
    /// New draft policy with no bookkeeping.
    pub fn new(org_id: Uuid, name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            org_id,
            name: name.into(),
            status: PolicyStatus::Draft,
            rules: Vec::new(),
            scopes: Vec::new(),
            last_evaluated_at: None,
            last_deletion_at: None,
            deletion_count: 0,
            bytes_reclaimed: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_rule(mut self, rule: RetentionRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scopes.push(scope);
        self
    }

    pub fn with_status(mut self, status: PolicyStatus) -> Self {
        self.status = status;
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyField("policy name"));
        }
        if self.status == PolicyStatus::Active && self.rules.is_empty() {
            return Err(ValidationError::NoRules(self.name.clone()));
        }
        for rule in &self.rules {
            rule.validate()?;
        }
        Ok(())
    }

    /// Scope resolution against a single snapshot.
    pub fn applies_to(&self, snapshot: &SnapshotRef) -> bool {
        self.scopes.is_empty()
            || self
                .scopes
                .iter()
                .any(|s| s.matches(snapshot.repository_id, snapshot.schedule_id))
    }
}

/// Bookkeeping written back after an evaluation run.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyRunRecord {
    pub evaluated_at: DateTime<Utc>,
    pub deleted: u64,
    pub bytes_reclaimed: u64,
}

/// Append-only audit record of a deletion decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleDeletionEvent {
    pub id: Uuid,
    pub policy_id: Uuid,
    pub org_id: Uuid,
    pub snapshot_id: String,
    pub repository_id: Uuid,
    pub reason: String,
    pub size_bytes: u64,
    pub deleted_by: String,
    pub deleted_at: DateTime<Utc>,
}
