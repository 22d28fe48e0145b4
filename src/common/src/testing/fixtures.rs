//! Snapshot and pricing fixtures.

use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::model::{SnapshotRef, StorageTierConfig, TierType};

const ONE_GIB: u64 = 1 << 30;

/// Builder for [`SnapshotRef`] values with an age relative to a fixed instant.
#[derive(Debug, Clone)]
pub struct SnapshotFixture {
    snapshot: SnapshotRef,
}

impl SnapshotFixture {
    /// A 1 GiB snapshot taken at `now` in a fresh repository.
    pub fn new(org_id: Uuid, snapshot_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            snapshot: SnapshotRef {
                org_id,
                repository_id: Uuid::new_v4(),
                snapshot_id: snapshot_id.to_string(),
                short_id: snapshot_id.chars().take(8).collect(),
                schedule_id: None,
                size_bytes: ONE_GIB,
                snapshot_time: now,
                tags: Vec::new(),
            },
        }
    }

    pub fn aged(mut self, days: i64, now: DateTime<Utc>) -> Self {
        self.snapshot.snapshot_time = now - Duration::days(days);
        self
    }

    pub fn in_repository(mut self, repository_id: Uuid) -> Self {
        self.snapshot.repository_id = repository_id;
        self
    }

    pub fn in_schedule(mut self, schedule_id: Uuid) -> Self {
        self.snapshot.schedule_id = Some(schedule_id);
        self
    }

    pub fn sized(mut self, size_bytes: u64) -> Self {
        self.snapshot.size_bytes = size_bytes;
        self
    }

    pub fn tagged(mut self, tag: &str) -> Self {
        self.snapshot.tags.push(tag.to_string());
        self
    }

    pub fn build(self) -> SnapshotRef {
        self.snapshot
    }
}

/// Typical object storage pricing for all four tiers of an organization.
pub fn tier_pricing(org_id: Uuid) -> Vec<StorageTierConfig> {
    [
        (TierType::Hot, 0.023, 0.0, 0),
        (TierType::Warm, 0.0125, 0.01, 0),
        (TierType::Cold, 0.004, 0.03, 3 * 3600),
        (TierType::Archive, 0.001, 0.05, 12 * 3600),
    ]
    .into_iter()
    .map(
        |(tier_type, cost_per_gb_month, retrieval_cost_per_gb, secs)| StorageTierConfig {
            org_id,
            tier_type,
            cost_per_gb_month,
            retrieval_cost_per_gb,
            retrieval_time: StdDuration::from_secs(secs),
            enabled: true,
        },
    )
    .collect()
}
