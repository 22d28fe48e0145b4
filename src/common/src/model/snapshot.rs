use super::TierType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Bytes per billing gigabyte (GiB).
pub const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Whole days elapsed between `snapshot_time` and `now`.
pub fn age_in_days(snapshot_time: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - snapshot_time).num_days()
}

/// Identifies a snapshot inside a repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SnapshotKey {
    pub repository_id: Uuid,
    pub snapshot_id: String,
}

impl SnapshotKey {
    pub fn new(repository_id: Uuid, snapshot_id: impl Into<String>) -> Self {
        Self {
            repository_id,
            snapshot_id: snapshot_id.into(),
        }
    }
}

impl fmt::Display for SnapshotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.repository_id, self.snapshot_id)
    }
}

/// Point-in-time backup artifact as reported by the backup subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRef {
    pub org_id: Uuid,
    pub repository_id: Uuid,
    pub snapshot_id: String,
    pub short_id: String,
    /// Schedule that produced the snapshot, if any.
    pub schedule_id: Option<Uuid>,
    pub size_bytes: u64,
    pub snapshot_time: DateTime<Utc>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl SnapshotRef {
    pub fn key(&self) -> SnapshotKey {
        SnapshotKey::new(self.repository_id, self.snapshot_id.clone())
    }

    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        age_in_days(self.snapshot_time, now)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// Authoritative record of where a snapshot currently lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotTier {
    pub id: Uuid,
    pub snapshot_id: String,
    pub repository_id: Uuid,
    pub org_id: Uuid,
    /// Owning schedule, used for the min-copies invariant.
    pub schedule_id: Option<Uuid>,
    pub current_tier: TierType,
    pub size_bytes: u64,
    pub snapshot_time: DateTime<Utc>,
    pub tiered_at: Option<DateTime<Utc>>,
}

impl SnapshotTier {
    /// Build the initial hot-tier record for a freshly reported snapshot.
    pub fn hot(snapshot: &SnapshotRef) -> Self {
        Self {
            id: Uuid::new_v4(),
            snapshot_id: snapshot.snapshot_id.clone(),
            repository_id: snapshot.repository_id,
            org_id: snapshot.org_id,
            schedule_id: snapshot.schedule_id,
            current_tier: TierType::Hot,
            size_bytes: snapshot.size_bytes,
            snapshot_time: snapshot.snapshot_time,
            tiered_at: None,
        }
    }

    pub fn key(&self) -> SnapshotKey {
        SnapshotKey::new(self.repository_id, self.snapshot_id.clone())
    }

    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        age_in_days(self.snapshot_time, now)
    }

    pub fn size_gb(&self) -> f64 {
        self.size_bytes as f64 / BYTES_PER_GB
    }

    /// Grouping key for min-copies accounting: the schedule, or the
    /// repository for snapshots taken outside any schedule.
    pub fn copies_group(&self) -> Uuid {
        self.schedule_id.unwrap_or(self.repository_id)
    }
}
