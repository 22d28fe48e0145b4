use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{RestoreInsert, Store, StoreError, StoreResult, merge_lock};
use crate::model::{
    ColdRestoreRequest, EvaluatorKind, ImmutabilityLock, LegalHold, LifecycleDeletionEvent,
    LifecyclePolicy, PolicyRunRecord, RestoreStatus, SnapshotKey, SnapshotRef, SnapshotTier,
    StorageTierConfig, TierCostReport, TierRule, TierTransition, TierType, TransitionStatus,
};

#[derive(Debug)]
struct Lease {
    holder: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Inner {
    snapshots: HashMap<SnapshotKey, SnapshotRef>,
    snapshot_tiers: HashMap<SnapshotKey, SnapshotTier>,
    locks: HashMap<SnapshotKey, ImmutabilityLock>,
    holds: HashMap<Uuid, LegalHold>,
    policies: HashMap<Uuid, LifecyclePolicy>,
    deletion_events: Vec<LifecycleDeletionEvent>,
    tier_configs: HashMap<(Uuid, TierType), StorageTierConfig>,
    tier_rules: HashMap<Uuid, TierRule>,
    transitions: Vec<TierTransition>,
    restores: Vec<ColdRestoreRequest>,
    reports: HashMap<(Uuid, NaiveDate), TierCostReport>,
    leases: HashMap<(Uuid, EvaluatorKind), Lease>,
}

/// Store backed by plain collections behind a single lock.
///
/// Every trait operation takes the lock once, so conditional updates are
/// atomic with respect to each other.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn key_set(keys: &[SnapshotKey]) -> HashSet<&SnapshotKey> {
    keys.iter().collect()
}

#[async_trait]
impl Store for InMemoryStore {
    async fn list_organizations(&self) -> StoreResult<Vec<Uuid>> {
        let inner = self.inner.read().await;
        let mut orgs = BTreeSet::new();
        orgs.extend(inner.snapshots.values().map(|s| s.org_id));
        orgs.extend(inner.snapshot_tiers.values().map(|t| t.org_id));
        orgs.extend(inner.policies.values().map(|p| p.org_id));
        orgs.extend(inner.tier_rules.values().map(|r| r.org_id));
        orgs.extend(inner.restores.iter().map(|r| r.org_id));
        Ok(orgs.into_iter().collect())
    }

    async fn upsert_snapshot(&self, snapshot: &SnapshotRef) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let key = snapshot.key();
        inner
            .snapshot_tiers
            .entry(key.clone())
            .or_insert_with(|| SnapshotTier::hot(snapshot));
        inner.snapshots.insert(key, snapshot.clone());
        Ok(())
    }

    async fn list_snapshots(&self, org_id: Uuid) -> StoreResult<Vec<SnapshotRef>> {
        let inner = self.inner.read().await;
        let mut snapshots: Vec<_> = inner
            .snapshots
            .values()
            .filter(|s| s.org_id == org_id)
            .cloned()
            .collect();
        snapshots.sort_by(|a, b| a.snapshot_time.cmp(&b.snapshot_time));
        Ok(snapshots)
    }

    async fn remove_snapshot(&self, key: &SnapshotKey) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.snapshots.remove(key);
        inner.snapshot_tiers.remove(key);
        Ok(())
    }

    async fn upsert_lock(&self, lock: &ImmutabilityLock) -> StoreResult<ImmutabilityLock> {
        let mut inner = self.inner.write().await;
        let key = lock.key();
        let merged = merge_lock(inner.locks.remove(&key), lock);
        inner.locks.insert(key, merged.clone());
        Ok(merged)
    }

    async fn locks_for(&self, keys: &[SnapshotKey]) -> StoreResult<Vec<ImmutabilityLock>> {
        let inner = self.inner.read().await;
        let wanted = key_set(keys);
        Ok(inner
            .locks
            .iter()
            .filter(|(k, _)| wanted.contains(k))
            .map(|(_, l)| l.clone())
            .collect())
    }

    async fn place_hold(&self, hold: &LegalHold) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.holds.insert(hold.id, hold.clone());
        Ok(())
    }

    async fn release_hold(&self, hold_id: Uuid) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        Ok(inner.holds.remove(&hold_id).is_some())
    }

    async fn holds_for(&self, keys: &[SnapshotKey]) -> StoreResult<Vec<LegalHold>> {
        let inner = self.inner.read().await;
        let wanted = key_set(keys);
        Ok(inner
            .holds
            .values()
            .filter(|h| wanted.contains(&h.key()))
            .cloned()
            .collect())
    }

    async fn save_policy(&self, policy: &LifecyclePolicy) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        match inner.policies.get_mut(&policy.id) {
            Some(existing) => {
                existing.name = policy.name.clone();
                existing.status = policy.status;
                existing.rules = policy.rules.clone();
                existing.scopes = policy.scopes.clone();
                existing.updated_at = policy.updated_at;
            }
            None => {
                inner.policies.insert(policy.id, policy.clone());
            }
        }
        Ok(())
    }

    async fn get_policy(&self, id: Uuid) -> StoreResult<Option<LifecyclePolicy>> {
        Ok(self.inner.read().await.policies.get(&id).cloned())
    }

    async fn list_policies(&self, org_id: Uuid) -> StoreResult<Vec<LifecyclePolicy>> {
        let inner = self.inner.read().await;
        let mut policies: Vec<_> = inner
            .policies
            .values()
            .filter(|p| p.org_id == org_id)
            .cloned()
            .collect();
        policies.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(policies)
    }

    async fn record_policy_run(&self, policy_id: Uuid, run: &PolicyRunRecord) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let policy = inner
            .policies
            .get_mut(&policy_id)
            .ok_or_else(|| StoreError::not_found("policy", policy_id))?;
        policy.last_evaluated_at = Some(run.evaluated_at);
        if run.deleted > 0 {
            policy.last_deletion_at = Some(run.evaluated_at);
        }
        policy.deletion_count += run.deleted;
        policy.bytes_reclaimed += run.bytes_reclaimed;
        Ok(())
    }

    async fn append_deletion_event(&self, event: &LifecycleDeletionEvent) -> StoreResult<()> {
        self.inner.write().await.deletion_events.push(event.clone());
        Ok(())
    }

    async fn list_deletion_events(
        &self,
        policy_id: Uuid,
    ) -> StoreResult<Vec<LifecycleDeletionEvent>> {
        let inner = self.inner.read().await;
        Ok(inner
            .deletion_events
            .iter()
            .filter(|e| e.policy_id == policy_id)
            .cloned()
            .collect())
    }

    async fn upsert_tier_config(&self, config: &StorageTierConfig) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner
            .tier_configs
            .insert((config.org_id, config.tier_type), config.clone());
        Ok(())
    }

    async fn list_tier_configs(&self, org_id: Uuid) -> StoreResult<Vec<StorageTierConfig>> {
        let inner = self.inner.read().await;
        let mut configs: Vec<_> = inner
            .tier_configs
            .values()
            .filter(|c| c.org_id == org_id)
            .cloned()
            .collect();
        configs.sort_by_key(|c| c.tier_type);
        Ok(configs)
    }

    async fn upsert_snapshot_tier(&self, tier: &SnapshotTier) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let key = tier.key();
        let id = inner.snapshot_tiers.get(&key).map_or(tier.id, |t| t.id);
        inner
            .snapshot_tiers
            .insert(key, SnapshotTier { id, ..tier.clone() });
        Ok(())
    }

    async fn get_snapshot_tier(&self, key: &SnapshotKey) -> StoreResult<Option<SnapshotTier>> {
        Ok(self.inner.read().await.snapshot_tiers.get(key).cloned())
    }

    async fn list_snapshot_tiers(&self, org_id: Uuid) -> StoreResult<Vec<SnapshotTier>> {
        let inner = self.inner.read().await;
        let mut tiers: Vec<_> = inner
            .snapshot_tiers
            .values()
            .filter(|t| t.org_id == org_id)
            .cloned()
            .collect();
        tiers.sort_by(|a, b| {
            a.snapshot_time
                .cmp(&b.snapshot_time)
                .then_with(|| a.snapshot_id.cmp(&b.snapshot_id))
        });
        Ok(tiers)
    }

    async fn save_tier_rule(&self, rule: &TierRule) -> StoreResult<()> {
        self.inner
            .write()
            .await
            .tier_rules
            .insert(rule.id, rule.clone());
        Ok(())
    }

    async fn list_tier_rules(&self, org_id: Uuid) -> StoreResult<Vec<TierRule>> {
        let inner = self.inner.read().await;
        let mut rules: Vec<_> = inner
            .tier_rules
            .values()
            .filter(|r| r.org_id == org_id)
            .cloned()
            .collect();
        rules.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.id.cmp(&b.id)));
        Ok(rules)
    }

    async fn insert_transition(&self, transition: &TierTransition) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        let open = inner.transitions.iter().any(|t| {
            t.snapshot_tier_id == transition.snapshot_tier_id && !t.status.is_terminal()
        });
        if open {
            return Ok(false);
        }
        inner.transitions.push(transition.clone());
        Ok(true)
    }

    async fn get_transition(&self, id: Uuid) -> StoreResult<Option<TierTransition>> {
        let inner = self.inner.read().await;
        Ok(inner.transitions.iter().find(|t| t.id == id).cloned())
    }

    async fn list_transitions(&self, org_id: Uuid) -> StoreResult<Vec<TierTransition>> {
        let inner = self.inner.read().await;
        Ok(inner
            .transitions
            .iter()
            .filter(|t| t.org_id == org_id)
            .cloned()
            .collect())
    }

    async fn list_open_transitions(&self, org_id: Uuid) -> StoreResult<Vec<TierTransition>> {
        let inner = self.inner.read().await;
        Ok(inner
            .transitions
            .iter()
            .filter(|t| t.org_id == org_id && !t.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn list_pending_transitions(&self, limit: usize) -> StoreResult<Vec<TierTransition>> {
        let inner = self.inner.read().await;
        let mut pending: Vec<_> = inner
            .transitions
            .iter()
            .filter(|t| t.status == TransitionStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|t| t.created_at);
        pending.truncate(limit);
        Ok(pending)
    }

    async fn claim_transition(&self, id: Uuid, started_at: DateTime<Utc>) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        let Some(snapshot_tier_id) = inner
            .transitions
            .iter()
            .find(|t| t.id == id && t.status == TransitionStatus::Pending)
            .map(|t| t.snapshot_tier_id)
        else {
            return Ok(false);
        };
        let busy = inner.transitions.iter().any(|t| {
            t.id != id
                && t.snapshot_tier_id == snapshot_tier_id
                && t.status == TransitionStatus::InProgress
        });
        if busy {
            return Ok(false);
        }
        if let Some(t) = inner.transitions.iter_mut().find(|t| t.id == id) {
            t.status = TransitionStatus::InProgress;
            t.started_at = Some(started_at);
        }
        Ok(true)
    }

    async fn complete_transition(
        &self,
        transition: &TierTransition,
        completed_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        let Some(stored) = inner
            .transitions
            .iter_mut()
            .find(|t| t.id == transition.id && t.status == TransitionStatus::InProgress)
        else {
            return Ok(false);
        };
        stored.status = TransitionStatus::Completed;
        stored.completed_at = Some(completed_at);
        let (tier_id, to_tier) = (stored.snapshot_tier_id, stored.to_tier);

        if let Some(tier) = inner.snapshot_tiers.values_mut().find(|t| t.id == tier_id) {
            tier.current_tier = to_tier;
            tier.tiered_at = Some(completed_at);
        }
        Ok(true)
    }

    async fn fail_transition(
        &self,
        id: Uuid,
        error_message: &str,
        failed_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        let Some(stored) = inner
            .transitions
            .iter_mut()
            .find(|t| t.id == id && t.status == TransitionStatus::InProgress)
        else {
            return Ok(false);
        };
        stored.status = TransitionStatus::Failed;
        stored.error_message = Some(error_message.to_string());
        stored.completed_at = Some(failed_at);
        Ok(true)
    }

    async fn fail_stale_transitions(
        &self,
        started_before: DateTime<Utc>,
        error_message: &str,
        failed_at: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut inner = self.inner.write().await;
        let mut failed = 0;
        for transition in inner.transitions.iter_mut().filter(|t| {
            t.status == TransitionStatus::InProgress
                && t.started_at.is_some_and(|at| at < started_before)
        }) {
            transition.status = TransitionStatus::Failed;
            transition.error_message = Some(error_message.to_string());
            transition.completed_at = Some(failed_at);
            failed += 1;
        }
        Ok(failed)
    }

    async fn insert_restore_request(
        &self,
        request: &ColdRestoreRequest,
    ) -> StoreResult<RestoreInsert> {
        let mut inner = self.inner.write().await;
        let key = request.key();
        if let Some(existing) = inner
            .restores
            .iter()
            .find(|r| r.key() == key && r.is_active())
        {
            return Ok(RestoreInsert::Existing(existing.clone()));
        }
        inner.restores.push(request.clone());
        Ok(RestoreInsert::Created(request.clone()))
    }

    async fn get_restore_request(&self, id: Uuid) -> StoreResult<Option<ColdRestoreRequest>> {
        let inner = self.inner.read().await;
        Ok(inner.restores.iter().find(|r| r.id == id).cloned())
    }

    async fn list_restore_requests(&self, org_id: Uuid) -> StoreResult<Vec<ColdRestoreRequest>> {
        let inner = self.inner.read().await;
        Ok(inner
            .restores
            .iter()
            .filter(|r| r.org_id == org_id)
            .cloned()
            .collect())
    }

    async fn list_active_restores(&self, org_id: Uuid) -> StoreResult<Vec<ColdRestoreRequest>> {
        let inner = self.inner.read().await;
        Ok(inner
            .restores
            .iter()
            .filter(|r| r.org_id == org_id && r.is_active())
            .cloned()
            .collect())
    }

    async fn list_restores_in_status(
        &self,
        org_id: Uuid,
        status: RestoreStatus,
    ) -> StoreResult<Vec<ColdRestoreRequest>> {
        let inner = self.inner.read().await;
        Ok(inner
            .restores
            .iter()
            .filter(|r| r.org_id == org_id && r.status == status)
            .cloned()
            .collect())
    }

    async fn update_restore_request(
        &self,
        request: &ColdRestoreRequest,
        expected: RestoreStatus,
    ) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        let Some(stored) = inner
            .restores
            .iter_mut()
            .find(|r| r.id == request.id && r.status == expected)
        else {
            return Ok(false);
        };
        let retrieval_cost = stored.retrieval_cost;
        *stored = ColdRestoreRequest {
            retrieval_cost,
            ..request.clone()
        };
        Ok(true)
    }

    async fn expire_ready_restores(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut inner = self.inner.write().await;
        let mut expired = 0;
        for request in inner.restores.iter_mut() {
            if request.status == RestoreStatus::Ready
                && request.expires_at.is_some_and(|at| now > at)
            {
                request.status = RestoreStatus::Expired;
                request.updated_at = now;
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn upsert_cost_report(&self, report: &TierCostReport) -> StoreResult<TierCostReport> {
        let mut inner = self.inner.write().await;
        let key = (report.org_id, report.report_date);
        let id = inner.reports.get(&key).map_or(report.id, |r| r.id);
        let stored = TierCostReport {
            id,
            ..report.clone()
        };
        inner.reports.insert(key, stored.clone());
        Ok(stored)
    }

    async fn get_cost_report(
        &self,
        org_id: Uuid,
        report_date: NaiveDate,
    ) -> StoreResult<Option<TierCostReport>> {
        let inner = self.inner.read().await;
        Ok(inner.reports.get(&(org_id, report_date)).cloned())
    }

    async fn list_cost_reports(&self, org_id: Uuid) -> StoreResult<Vec<TierCostReport>> {
        let inner = self.inner.read().await;
        let mut reports: Vec<_> = inner
            .reports
            .values()
            .filter(|r| r.org_id == org_id)
            .cloned()
            .collect();
        reports.sort_by(|a, b| b.report_date.cmp(&a.report_date));
        Ok(reports)
    }

    async fn try_acquire_lease(
        &self,
        org_id: Uuid,
        kind: EvaluatorKind,
        holder: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        if let Some(lease) = inner.leases.get(&(org_id, kind)) {
            if lease.expires_at > now {
                return Ok(false);
            }
        }
        inner.leases.insert(
            (org_id, kind),
            Lease {
                holder: holder.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn release_lease(
        &self,
        org_id: Uuid,
        kind: EvaluatorKind,
        holder: &str,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner
            .leases
            .get(&(org_id, kind))
            .is_some_and(|l| l.holder == holder)
        {
            inner.leases.remove(&(org_id, kind));
        }
        Ok(())
    }
}
