//! Candidate selection for a single retention rule.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use common::model::{RetentionRule, SnapshotRef};
use uuid::Uuid;

/// Snapshots that `rule` would remove from `population`, oldest first.
///
/// Selection happens per repository: matching snapshots are ordered newest
/// first, the newest `keep_last` are retained and of the rest every snapshot
/// older than `max_age_days` is a candidate (all of them without an age).
pub fn select_candidates<'a>(
    rule: &RetentionRule,
    population: &[&'a SnapshotRef],
    now: DateTime<Utc>,
) -> Vec<&'a SnapshotRef> {
    let mut by_repository: BTreeMap<Uuid, Vec<&'a SnapshotRef>> = BTreeMap::new();
    for snapshot in population {
        if rule.tag.as_deref().is_none_or(|tag| snapshot.has_tag(tag)) {
            by_repository
                .entry(snapshot.repository_id)
                .or_default()
                .push(*snapshot);
        }
    }

    let keep_last = rule.keep_last.unwrap_or(0) as usize;
    let max_age = rule.max_age_days.map(|days| Duration::days(i64::from(days)));

    let mut candidates = Vec::new();
    for mut snapshots in by_repository.into_values() {
        snapshots.sort_by(|a, b| {
            b.snapshot_time
                .cmp(&a.snapshot_time)
                .then_with(|| b.snapshot_id.cmp(&a.snapshot_id))
        });
        candidates.extend(
            snapshots
                .into_iter()
                .skip(keep_last)
                .filter(|s| max_age.is_none_or(|age| now - s.snapshot_time > age)),
        );
    }

    candidates.sort_by(|a, b| {
        a.snapshot_time
            .cmp(&b.snapshot_time)
            .then_with(|| a.snapshot_id.cmp(&b.snapshot_id))
    });
    candidates
}

/// Human-readable deletion reason recorded on the audit event.
pub fn describe(rule: &RetentionRule) -> String {
    let mut parts = Vec::new();
    if let Some(days) = rule.max_age_days {
        parts.push(format!("older than {days} days"));
    }
    if let Some(keep) = rule.keep_last {
        parts.push(format!("beyond the newest {keep}"));
    }
    if let Some(tag) = &rule.tag {
        parts.push(format!("tagged '{tag}'"));
    }
    format!("rule '{}': {}", rule.name, parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(repository_id: Uuid, id: &str, age_days: i64, now: DateTime<Utc>) -> SnapshotRef {
        SnapshotRef {
            org_id: Uuid::nil(),
            repository_id,
            snapshot_id: id.to_string(),
            short_id: id.to_string(),
            schedule_id: None,
            size_bytes: 100,
            snapshot_time: now - Duration::days(age_days),
            tags: Vec::new(),
        }
    }

    fn rule(max_age_days: Option<u32>, keep_last: Option<u32>) -> RetentionRule {
        RetentionRule {
            name: "test".to_string(),
            max_age_days,
            keep_last,
            tag: None,
        }
    }

    fn ids(candidates: &[&SnapshotRef]) -> Vec<String> {
        candidates.iter().map(|s| s.snapshot_id.clone()).collect()
    }

    #[test]
    fn test_keep_last_retains_newest_even_when_old() {
        let now = Utc::now();
        let repo = Uuid::new_v4();
        let snapshots: Vec<SnapshotRef> = [40, 50, 60, 70]
            .iter()
            .map(|age| snapshot(repo, &format!("s{age}"), *age, now))
            .collect();
        let population: Vec<&SnapshotRef> = snapshots.iter().collect();

        let candidates = select_candidates(&rule(Some(30), Some(2)), &population, now);
        assert_eq!(ids(&candidates), vec!["s70", "s60"]);
    }

    #[test]
    fn test_age_only_and_count_only() {
        let now = Utc::now();
        let repo = Uuid::new_v4();
        let snapshots: Vec<SnapshotRef> = [1, 10, 31, 45]
            .iter()
            .map(|age| snapshot(repo, &format!("s{age}"), *age, now))
            .collect();
        let population: Vec<&SnapshotRef> = snapshots.iter().collect();

        let by_age = select_candidates(&rule(Some(30), None), &population, now);
        assert_eq!(ids(&by_age), vec!["s45", "s31"]);

        let by_count = select_candidates(&rule(None, Some(1)), &population, now);
        assert_eq!(ids(&by_count), vec!["s45", "s31", "s10"]);
    }

    #[test]
    fn test_keep_last_applies_per_repository() {
        let now = Utc::now();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let snapshots = vec![
            snapshot(a, "a1", 40, now),
            snapshot(a, "a2", 50, now),
            snapshot(b, "b1", 60, now),
        ];
        let population: Vec<&SnapshotRef> = snapshots.iter().collect();

        let candidates = select_candidates(&rule(Some(30), Some(1)), &population, now);
        assert_eq!(ids(&candidates), vec!["a2"]);
    }

    #[test]
    fn test_tag_filter() {
        let now = Utc::now();
        let repo = Uuid::new_v4();
        let mut tagged = snapshot(repo, "tagged", 90, now);
        tagged.tags.push("hourly".to_string());
        let snapshots = vec![tagged, snapshot(repo, "plain", 90, now)];
        let population: Vec<&SnapshotRef> = snapshots.iter().collect();

        let mut hourly = rule(Some(7), None);
        hourly.tag = Some("hourly".to_string());
        assert_eq!(
            ids(&select_candidates(&hourly, &population, now)),
            vec!["tagged"]
        );
    }

    #[test]
    fn test_describe() {
        let mut r = rule(Some(30), Some(5));
        r.name = "monthly".to_string();
        assert_eq!(
            describe(&r),
            "rule 'monthly': older than 30 days, beyond the newest 5"
        );
    }
}
