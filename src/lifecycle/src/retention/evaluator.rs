//! Lifecycle Policy Evaluator
//!
//! Applies the retention rules of one policy to the organization's snapshot
//! population and deletes what they select.
//!
//! ## Safety Guarantees
//!
//! - Protected snapshots are never deleted; protection is checked for the
//!   whole population up front and again right before each deletion
//! - Dry-run mode (the default) logs decisions without deleting anything
//! - Every deletion is recorded as an append-only audit event
//! - A failed deletion is reported and does not stop the pass

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::clock::Clock;
use common::config::LifecycleConfig;
use common::model::{
    EvaluatorKind, LifecycleDeletionEvent, LifecyclePolicy, PolicyRunRecord, PolicyStatus,
    SnapshotKey, SnapshotRef,
};
use common::store::Store;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::rules::{describe, select_candidates};
use crate::backend::StorageBackend;
use crate::error::{CandidateError, LifecycleError, Result};
use crate::guard::Guard;
use crate::lease::EvaluationLease;
use crate::metrics::LifecycleMetrics;

/// Result of evaluating one policy
#[derive(Debug, Clone)]
pub struct EvaluationResult {
    pub policy_id: Uuid,
    pub org_id: Uuid,
    pub evaluated_at: DateTime<Utc>,
    pub dry_run: bool,
    /// Snapshots in the policy's scope
    pub snapshots_considered: usize,
    /// Deletions performed, or that would have been performed in dry-run mode
    pub deleted: Vec<LifecycleDeletionEvent>,
    pub skipped_protected: usize,
    pub errors: Vec<CandidateError>,
    /// The deadline passed before every candidate was handled
    pub deadline_reached: bool,
}

impl EvaluationResult {
    pub fn bytes_reclaimed(&self) -> u64 {
        self.deleted.iter().map(|e| e.size_bytes).sum()
    }
}

pub struct PolicyEvaluator {
    store: Arc<dyn Store>,
    guard: Guard,
    backend: Arc<dyn StorageBackend>,
    clock: Arc<dyn Clock>,
    metrics: LifecycleMetrics,
    config: LifecycleConfig,
}

impl PolicyEvaluator {
    pub fn new(
        store: Arc<dyn Store>,
        backend: Arc<dyn StorageBackend>,
        clock: Arc<dyn Clock>,
        config: LifecycleConfig,
        metrics: LifecycleMetrics,
    ) -> Self {
        Self {
            guard: Guard::new(store.clone(), clock.clone()),
            store,
            backend,
            clock,
            metrics,
            config,
        }
    }

    pub async fn evaluate(&self, policy: &LifecyclePolicy) -> Result<EvaluationResult> {
        self.evaluate_until(policy, None).await
    }

    /// Evaluate `policy`, selecting no new candidates once `deadline` passes.
    ///
    /// Fails with [`LifecycleError::PolicyNotActive`] for draft and paused
    /// policies and with [`LifecycleError::EvaluationInProgress`] when another
    /// lifecycle pass is running for the same organization.
    pub async fn evaluate_until(
        &self,
        policy: &LifecyclePolicy,
        deadline: Option<DateTime<Utc>>,
    ) -> Result<EvaluationResult> {
        if policy.status != PolicyStatus::Active {
            return Err(LifecycleError::PolicyNotActive {
                policy_id: policy.id,
                status: policy.status,
            });
        }
        policy.validate()?;

        let lease = match EvaluationLease::acquire(
            self.store.as_ref(),
            policy.org_id,
            EvaluatorKind::Lifecycle,
            self.clock.now(),
            self.config.lease_ttl,
        )
        .await
        {
            Ok(lease) => lease,
            Err(e) => {
                if matches!(e, LifecycleError::EvaluationInProgress { .. }) {
                    self.metrics.record_evaluation_contended();
                }
                return Err(e);
            }
        };

        let result = self.run(policy, deadline).await;
        lease.release(self.store.as_ref()).await;
        result
    }

    async fn run(
        &self,
        policy: &LifecyclePolicy,
        deadline: Option<DateTime<Utc>>,
    ) -> Result<EvaluationResult> {
        let evaluated_at = self.clock.now();
        let dry_run = self.config.dry_run;

        info!(
            org_id = %policy.org_id,
            policy_id = %policy.id,
            policy_name = %policy.name,
            rules = policy.rules.len(),
            dry_run,
            "Starting lifecycle policy evaluation"
        );

        let mut population: Vec<SnapshotRef> = self
            .store
            .list_snapshots(policy.org_id)
            .await?
            .into_iter()
            .filter(|s| policy.applies_to(s))
            .collect();
        let keys: Vec<SnapshotKey> = population.iter().map(SnapshotRef::key).collect();
        let protection = self.guard.protection_status_for_many(&keys).await?;

        let mut result = EvaluationResult {
            policy_id: policy.id,
            org_id: policy.org_id,
            evaluated_at,
            dry_run,
            snapshots_considered: population.len(),
            deleted: Vec::new(),
            skipped_protected: 0,
            errors: Vec::new(),
            deadline_reached: false,
        };

        // Protected or failed snapshots still count towards keep_last of
        // later rules but are never candidates again in this pass.
        let mut excluded: HashSet<SnapshotKey> = HashSet::new();

        'rules: for rule in &policy.rules {
            let reason = describe(rule);
            let selected: Vec<SnapshotRef> = {
                let view: Vec<&SnapshotRef> = population.iter().collect();
                select_candidates(rule, &view, evaluated_at)
                    .into_iter()
                    .filter(|s| !excluded.contains(&s.key()))
                    .cloned()
                    .collect()
            };

            let mut removed: HashSet<SnapshotKey> = HashSet::new();
            for snapshot in selected {
                if deadline.is_some_and(|d| self.clock.now() >= d) {
                    warn!(
                        org_id = %policy.org_id,
                        policy_id = %policy.id,
                        "Evaluation deadline reached, not selecting further candidates"
                    );
                    result.deadline_reached = true;
                    population.retain(|s| !removed.contains(&s.key()));
                    break 'rules;
                }

                let key = snapshot.key();
                if protection.is_protected(&key) || self.guard.is_protected(&key).await? {
                    debug!(
                        org_id = %policy.org_id,
                        policy_id = %policy.id,
                        snapshot = %key,
                        "Skipping protected snapshot"
                    );
                    result.skipped_protected += 1;
                    excluded.insert(key);
                    continue;
                }

                let event = LifecycleDeletionEvent {
                    id: Uuid::new_v4(),
                    policy_id: policy.id,
                    org_id: policy.org_id,
                    snapshot_id: snapshot.snapshot_id.clone(),
                    repository_id: snapshot.repository_id,
                    reason: reason.clone(),
                    size_bytes: snapshot.size_bytes,
                    deleted_by: format!("policy:{}", policy.name),
                    deleted_at: self.clock.now(),
                };

                if dry_run {
                    info!(
                        org_id = %policy.org_id,
                        policy_id = %policy.id,
                        snapshot = %key,
                        size_bytes = snapshot.size_bytes,
                        reason = %reason,
                        "[DRY RUN] Would delete snapshot"
                    );
                    removed.insert(key);
                    result.deleted.push(event);
                    continue;
                }

                match self.backend.delete_snapshot(&key).await {
                    Ok(()) => {
                        self.store.append_deletion_event(&event).await?;
                        self.store.remove_snapshot(&key).await?;
                        self.metrics.record_deletion(event.size_bytes);
                        info!(
                            org_id = %policy.org_id,
                            policy_id = %policy.id,
                            snapshot = %key,
                            size_bytes = event.size_bytes,
                            reason = %reason,
                            "Deleted snapshot"
                        );
                        removed.insert(key);
                        result.deleted.push(event);
                    }
                    Err(e) => {
                        warn!(
                            org_id = %policy.org_id,
                            policy_id = %policy.id,
                            snapshot = %key,
                            error = %e,
                            "Failed to delete snapshot"
                        );
                        result.errors.push(CandidateError::new(&key, e.to_string()));
                        excluded.insert(key);
                    }
                }
            }

            population.retain(|s| !removed.contains(&s.key()));
        }

        let run = PolicyRunRecord {
            evaluated_at,
            deleted: if dry_run { 0 } else { result.deleted.len() as u64 },
            bytes_reclaimed: if dry_run { 0 } else { result.bytes_reclaimed() },
        };
        self.store.record_policy_run(policy.id, &run).await?;

        self.metrics.record_policy_evaluated();
        self.metrics.record_protected_skips(result.skipped_protected);
        self.metrics.record_candidate_errors(result.errors.len());

        info!(
            org_id = %policy.org_id,
            policy_id = %policy.id,
            considered = result.snapshots_considered,
            deleted = result.deleted.len(),
            bytes_reclaimed = result.bytes_reclaimed(),
            skipped_protected = result.skipped_protected,
            errors = result.errors.len(),
            dry_run,
            "Lifecycle policy evaluation completed"
        );

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingBackend;
    use chrono::Duration;
    use common::clock::ManualClock;
    use common::model::{ImmutabilityLock, LegalHold, RetentionRule, Scope};
    use common::store::InMemoryStore;
    use common::testing::SnapshotFixture;

    struct Harness {
        store: InMemoryStore,
        backend: RecordingBackend,
        clock: ManualClock,
        metrics: LifecycleMetrics,
        org_id: Uuid,
        repository_id: Uuid,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                store: InMemoryStore::new(),
                backend: RecordingBackend::new(),
                clock: ManualClock::new(Utc::now()),
                metrics: LifecycleMetrics::new(),
                org_id: Uuid::new_v4(),
                repository_id: Uuid::new_v4(),
            }
        }

        fn evaluator(&self, dry_run: bool) -> PolicyEvaluator {
            PolicyEvaluator::new(
                Arc::new(self.store.clone()),
                Arc::new(self.backend.clone()),
                Arc::new(self.clock.clone()),
                LifecycleConfig {
                    dry_run,
                    ..LifecycleConfig::default()
                },
                self.metrics.clone(),
            )
        }

        /// Snapshots `s<age>` in one repository, one per age.
        async fn seed(&self, ages: &[i64]) -> Vec<SnapshotRef> {
            let now = self.clock.now();
            let mut snapshots = Vec::new();
            for age in ages {
                let snapshot = SnapshotFixture::new(self.org_id, &format!("s{age}"), now)
                    .aged(*age, now)
                    .in_repository(self.repository_id)
                    .sized(1000)
                    .build();
                self.store.upsert_snapshot(&snapshot).await.unwrap();
                snapshots.push(snapshot);
            }
            snapshots
        }

        async fn policy(&self, rules: Vec<RetentionRule>) -> LifecyclePolicy {
            let mut policy = LifecyclePolicy::new(self.org_id, "retention", self.clock.now())
                .with_status(PolicyStatus::Active);
            for rule in rules {
                policy = policy.with_rule(rule);
            }
            self.store.save_policy(&policy).await.unwrap();
            policy
        }

        async fn hold(&self, snapshot: &SnapshotRef) {
            let hold = LegalHold {
                id: Uuid::new_v4(),
                org_id: self.org_id,
                repository_id: snapshot.repository_id,
                snapshot_id: snapshot.snapshot_id.clone(),
                reason: "litigation".to_string(),
                placed_by: "legal".to_string(),
                placed_at: self.clock.now(),
            };
            self.store.place_hold(&hold).await.unwrap();
        }
    }

    fn rule(max_age_days: u32, keep_last: u32) -> RetentionRule {
        RetentionRule {
            name: format!("{max_age_days}d-keep-{keep_last}"),
            max_age_days: Some(max_age_days),
            keep_last: Some(keep_last),
            tag: None,
        }
    }

    fn deleted_ids(result: &EvaluationResult) -> Vec<String> {
        let mut ids: Vec<String> = result.deleted.iter().map(|e| e.snapshot_id.clone()).collect();
        ids.sort();
        ids
    }

    #[tokio::test]
    async fn test_held_snapshot_is_skipped() {
        let _ = env_logger::builder().is_test(true).try_init();
        let h = Harness::new();
        let snapshots = h.seed(&[1, 5, 10, 20, 25, 45, 50, 60, 75, 90]).await;
        h.hold(&snapshots[5]).await;
        let policy = h.policy(vec![rule(30, 5)]).await;

        let result = h.evaluator(false).evaluate(&policy).await.unwrap();

        assert_eq!(deleted_ids(&result), vec!["s50", "s60", "s75", "s90"]);
        assert_eq!(result.skipped_protected, 1);
        assert!(result.errors.is_empty());
        assert_eq!(h.backend.deletes().len(), 4);
        assert_eq!(h.store.list_snapshots(h.org_id).await.unwrap().len(), 6);

        let events = h.store.list_deletion_events(policy.id).await.unwrap();
        assert_eq!(events.len(), 4);
        let stored = h.store.get_policy(policy.id).await.unwrap().unwrap();
        assert_eq!(stored.deletion_count, 4);
        assert_eq!(stored.bytes_reclaimed, 4000);
        assert!(stored.last_deletion_at.is_some());
    }

    #[tokio::test]
    async fn test_expired_lock_no_longer_protects() {
        let h = Harness::new();
        let snapshots = h.seed(&[40]).await;
        let now = h.clock.now();
        let lock = ImmutabilityLock {
            id: Uuid::new_v4(),
            org_id: h.org_id,
            repository_id: snapshots[0].repository_id,
            snapshot_id: snapshots[0].snapshot_id.clone(),
            locked_at: now,
            locked_until: now + Duration::days(2),
            locked_by: "compliance".to_string(),
            reason: "audit".to_string(),
            provider_lock_enabled: false,
            provider_lock_mode: None,
            floor_tier: None,
        };
        h.store.upsert_lock(&lock).await.unwrap();
        let policy = h.policy(vec![rule(30, 0)]).await;

        let result = h.evaluator(false).evaluate(&policy).await.unwrap();
        assert!(result.deleted.is_empty());
        assert_eq!(result.skipped_protected, 1);

        h.clock.advance(Duration::days(3));
        let result = h.evaluator(false).evaluate(&policy).await.unwrap();
        assert_eq!(deleted_ids(&result), vec!["s40"]);
    }

    #[tokio::test]
    async fn test_protected_snapshot_is_not_retested_by_later_rules() {
        let h = Harness::new();
        let snapshots = h.seed(&[40, 50]).await;
        h.hold(&snapshots[1]).await;
        let policy = h.policy(vec![rule(30, 0), rule(10, 0)]).await;

        let result = h.evaluator(false).evaluate(&policy).await.unwrap();
        assert_eq!(deleted_ids(&result), vec!["s40"]);
        assert_eq!(result.skipped_protected, 1);
    }

    #[tokio::test]
    async fn test_dry_run_deletes_nothing() {
        let h = Harness::new();
        h.seed(&[10, 40, 50]).await;
        let policy = h.policy(vec![rule(30, 0)]).await;

        let result = h.evaluator(true).evaluate(&policy).await.unwrap();

        assert!(result.dry_run);
        assert_eq!(deleted_ids(&result), vec!["s40", "s50"]);
        assert!(h.backend.deletes().is_empty());
        assert_eq!(h.store.list_snapshots(h.org_id).await.unwrap().len(), 3);
        assert!(h.store.list_deletion_events(policy.id).await.unwrap().is_empty());
        let stored = h.store.get_policy(policy.id).await.unwrap().unwrap();
        assert_eq!(stored.deletion_count, 0);
        assert!(stored.last_evaluated_at.is_some());
    }

    #[tokio::test]
    async fn test_backend_failure_is_recorded_and_pass_continues() {
        let h = Harness::new();
        let snapshots = h.seed(&[40, 50, 60]).await;
        h.backend.fail_deletes_for(&snapshots[1].key());
        let policy = h.policy(vec![rule(30, 0)]).await;

        let result = h.evaluator(false).evaluate(&policy).await.unwrap();

        assert_eq!(deleted_ids(&result), vec!["s40", "s60"]);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].snapshot_id, "s50");
        let remaining = h.store.list_snapshots(h.org_id).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(h.metrics.candidate_errors(), 1);
    }

    #[tokio::test]
    async fn test_inactive_policy_is_rejected() {
        let h = Harness::new();
        let mut policy = h.policy(vec![rule(30, 0)]).await;
        policy.status = PolicyStatus::Paused;

        let err = h.evaluator(false).evaluate(&policy).await.unwrap_err();
        assert!(matches!(err, LifecycleError::PolicyNotActive { .. }));

        policy.status = PolicyStatus::Draft;
        let err = h.evaluator(false).evaluate(&policy).await.unwrap_err();
        assert!(matches!(err, LifecycleError::PolicyNotActive { .. }));
    }

    #[tokio::test]
    async fn test_concurrent_evaluation_is_rejected() {
        let h = Harness::new();
        let policy = h.policy(vec![rule(30, 0)]).await;
        let lease_ttl = chrono::Duration::minutes(15);
        h.store
            .try_acquire_lease(h.org_id, EvaluatorKind::Lifecycle, "other", h.clock.now(), lease_ttl)
            .await
            .unwrap();

        let err = h.evaluator(false).evaluate(&policy).await.unwrap_err();
        assert!(matches!(err, LifecycleError::EvaluationInProgress { .. }));
        assert_eq!(h.metrics.evaluations_contended(), 1);
    }

    #[tokio::test]
    async fn test_scope_limits_population() {
        let h = Harness::new();
        h.seed(&[40]).await;
        let other_repo = SnapshotFixture::new(h.org_id, "elsewhere", h.clock.now())
            .aged(40, h.clock.now())
            .build();
        h.store.upsert_snapshot(&other_repo).await.unwrap();

        let mut policy = h.policy(vec![rule(30, 0)]).await;
        policy = policy.with_scope(Scope::Repository(h.repository_id));

        let result = h.evaluator(false).evaluate(&policy).await.unwrap();
        assert_eq!(result.snapshots_considered, 1);
        assert_eq!(deleted_ids(&result), vec!["s40"]);
    }

    #[tokio::test]
    async fn test_past_deadline_selects_nothing() {
        let h = Harness::new();
        h.seed(&[40, 50]).await;
        let policy = h.policy(vec![rule(30, 0)]).await;

        let deadline = h.clock.now() - Duration::seconds(1);
        let result = h
            .evaluator(false)
            .evaluate_until(&policy, Some(deadline))
            .await
            .unwrap();

        assert!(result.deadline_reached);
        assert!(result.deleted.is_empty());
    }
}
