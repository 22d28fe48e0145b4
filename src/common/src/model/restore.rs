use super::{SnapshotKey, TierType, ValidationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle of an on-demand cold-storage retrieval.
///
/// `pending -> warming -> ready -> completed`; `failed` and `expired` are
/// alternate terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestoreStatus {
    Pending,
    Warming,
    Ready,
    Completed,
    Failed,
    Expired,
}

impl RestoreStatus {
    pub const NON_TERMINAL: [RestoreStatus; 3] = [
        RestoreStatus::Pending,
        RestoreStatus::Warming,
        RestoreStatus::Ready,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RestoreStatus::Completed | RestoreStatus::Failed | RestoreStatus::Expired
        )
    }

    pub fn can_transition_to(&self, next: RestoreStatus) -> bool {
        use RestoreStatus::*;
        match (self, next) {
            (Pending, Warming) | (Warming, Ready) | (Ready, Completed) => true,
            (from, Failed | Expired) => !from.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RestoreStatus::Pending => "pending",
            RestoreStatus::Warming => "warming",
            RestoreStatus::Ready => "ready",
            RestoreStatus::Completed => "completed",
            RestoreStatus::Failed => "failed",
            RestoreStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for RestoreStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RestoreStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RestoreStatus::Pending),
            "warming" => Ok(RestoreStatus::Warming),
            "ready" => Ok(RestoreStatus::Ready),
            "completed" => Ok(RestoreStatus::Completed),
            "failed" => Ok(RestoreStatus::Failed),
            "expired" => Ok(RestoreStatus::Expired),
            other => Err(ValidationError::UnknownValue {
                kind: "restore status",
                value: other.to_string(),
            }),
        }
    }
}

/// Provider retrieval speed class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestorePriority {
    Expedited,
    #[default]
    Standard,
    Bulk,
}

impl RestorePriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestorePriority::Expedited => "expedited",
            RestorePriority::Standard => "standard",
            RestorePriority::Bulk => "bulk",
        }
    }
}

impl fmt::Display for RestorePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RestorePriority {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "expedited" => Ok(RestorePriority::Expedited),
            "standard" => Ok(RestorePriority::Standard),
            "bulk" => Ok(RestorePriority::Bulk),
            other => Err(ValidationError::UnknownValue {
                kind: "restore priority",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColdRestoreRequest {
    pub id: Uuid,
    pub org_id: Uuid,
    pub snapshot_id: String,
    pub repository_id: Uuid,
    pub requested_by: String,
    pub from_tier: TierType,
    pub target_path: Option<String>,
    pub priority: RestorePriority,
    pub status: RestoreStatus,
    /// Opaque provider handle returned when the retrieval was accepted.
    pub retrieval_handle: Option<String>,
    pub estimated_ready_at: Option<DateTime<Utc>>,
    pub ready_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Fixed at creation time.
    pub retrieval_cost: f64,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ColdRestoreRequest {
    pub fn key(&self) -> SnapshotKey {
        SnapshotKey::new(self.repository_id, self.snapshot_id.clone())
    }

    /// The restore window is open: the request still pins the snapshot to
    /// its current tier.
    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }
}
