//! Administrative operations: validated writes of policies, rules, pricing,
//! locks and holds, plus the read side used by dashboards.

use std::sync::Arc;

use common::clock::Clock;
use common::config::CostConfig;
use common::model::{
    ColdRestoreRequest, ImmutabilityLock, LegalHold, LifecycleDeletionEvent, LifecyclePolicy,
    PolicyStatus, ProtectionReasons, SnapshotKey, SnapshotRef, StorageTierConfig, TierCostReport,
    TierRule, TierStatsSummary, TierTransition, ValidationError,
};
use common::store::Store;
use tracing::info;
use uuid::Uuid;

use crate::cost::CostAggregator;
use crate::error::{LifecycleError, Result};
use crate::guard::Guard;
use crate::metrics::LifecycleMetrics;

pub struct AdminService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    guard: Guard,
    cost: CostAggregator,
}

impl AdminService {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        cost: CostConfig,
        metrics: LifecycleMetrics,
    ) -> Self {
        Self {
            guard: Guard::new(store.clone(), clock.clone()),
            cost: CostAggregator::new(store.clone(), clock.clone(), cost, metrics),
            store,
            clock,
        }
    }

    /// Snapshot reported by the backup subsystem.
    pub async fn register_snapshot(&self, snapshot: &SnapshotRef) -> Result<()> {
        if snapshot.snapshot_id.trim().is_empty() {
            return Err(ValidationError::EmptyField("snapshot id").into());
        }
        self.store.upsert_snapshot(snapshot).await?;
        Ok(())
    }

    pub async fn create_policy(&self, mut policy: LifecyclePolicy) -> Result<LifecyclePolicy> {
        policy.validate()?;
        let now = self.clock.now();
        policy.created_at = now;
        policy.updated_at = now;
        self.store.save_policy(&policy).await?;
        info!(
            org_id = %policy.org_id,
            policy_id = %policy.id,
            name = %policy.name,
            status = %policy.status,
            "Created lifecycle policy"
        );
        Ok(policy)
    }

    /// Replace the definition of an existing policy. Run bookkeeping is kept.
    pub async fn update_policy(&self, mut policy: LifecyclePolicy) -> Result<LifecyclePolicy> {
        policy.validate()?;
        let existing = self.policy(policy.id).await?;
        policy.created_at = existing.created_at;
        policy.updated_at = self.clock.now();
        policy.last_evaluated_at = existing.last_evaluated_at;
        policy.last_deletion_at = existing.last_deletion_at;
        policy.deletion_count = existing.deletion_count;
        policy.bytes_reclaimed = existing.bytes_reclaimed;
        self.store.save_policy(&policy).await?;
        Ok(policy)
    }

    pub async fn set_policy_status(&self, id: Uuid, status: PolicyStatus) -> Result<LifecyclePolicy> {
        let mut policy = self.policy(id).await?;
        policy.status = status;
        policy.validate()?;
        policy.updated_at = self.clock.now();
        self.store.save_policy(&policy).await?;
        info!(policy_id = %id, status = %status, "Changed lifecycle policy status");
        Ok(policy)
    }

    pub async fn policy(&self, id: Uuid) -> Result<LifecyclePolicy> {
        self.store
            .get_policy(id)
            .await?
            .ok_or_else(|| LifecycleError::not_found("policy", id))
    }

    pub async fn list_policies(&self, org_id: Uuid) -> Result<Vec<LifecyclePolicy>> {
        Ok(self.store.list_policies(org_id).await?)
    }

    pub async fn deletion_history(&self, policy_id: Uuid) -> Result<Vec<LifecycleDeletionEvent>> {
        Ok(self.store.list_deletion_events(policy_id).await?)
    }

    pub async fn save_tier_rule(&self, rule: &TierRule) -> Result<()> {
        rule.validate()?;
        self.store.save_tier_rule(rule).await?;
        info!(
            org_id = %rule.org_id,
            rule_id = %rule.id,
            name = %rule.name,
            from_tier = %rule.from_tier,
            to_tier = %rule.to_tier,
            priority = rule.priority,
            "Saved tier rule"
        );
        Ok(())
    }

    pub async fn list_tier_rules(&self, org_id: Uuid) -> Result<Vec<TierRule>> {
        let mut rules = self.store.list_tier_rules(org_id).await?;
        rules.sort_by_key(|r| (r.priority, r.id));
        Ok(rules)
    }

    pub async fn upsert_tier_pricing(&self, pricing: &StorageTierConfig) -> Result<()> {
        pricing.validate()?;
        self.store.upsert_tier_config(pricing).await?;
        Ok(())
    }

    /// Lock a snapshot, or extend its current lock. Never shortens.
    pub async fn lock_snapshot(&self, lock: &ImmutabilityLock) -> Result<ImmutabilityLock> {
        lock.validate()?;
        let stored = self.store.upsert_lock(lock).await?;
        info!(
            org_id = %stored.org_id,
            snapshot = %stored.key(),
            locked_until = %stored.locked_until,
            "Snapshot locked"
        );
        Ok(stored)
    }

    pub async fn place_hold(&self, hold: &LegalHold) -> Result<()> {
        hold.validate()?;
        self.store.place_hold(hold).await?;
        info!(
            org_id = %hold.org_id,
            hold_id = %hold.id,
            snapshot = %hold.key(),
            "Legal hold placed"
        );
        Ok(())
    }

    pub async fn release_hold(&self, hold_id: Uuid) -> Result<()> {
        if !self.store.release_hold(hold_id).await? {
            return Err(LifecycleError::not_found("legal hold", hold_id));
        }
        info!(hold_id = %hold_id, "Legal hold released");
        Ok(())
    }

    pub async fn protection_status(&self, key: &SnapshotKey) -> Result<ProtectionReasons> {
        Ok(self.guard.protection_reasons(key).await?)
    }

    /// Newest first.
    pub async fn transition_history(&self, org_id: Uuid) -> Result<Vec<TierTransition>> {
        let mut transitions = self.store.list_transitions(org_id).await?;
        transitions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(transitions)
    }

    /// Newest first.
    pub async fn restore_history(&self, org_id: Uuid) -> Result<Vec<ColdRestoreRequest>> {
        let mut restores = self.store.list_restore_requests(org_id).await?;
        restores.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(restores)
    }

    pub async fn tier_stats(&self, org_id: Uuid) -> Result<TierStatsSummary> {
        self.cost.compute_tier_stats(org_id).await
    }

    pub async fn latest_report(&self, org_id: Uuid) -> Result<Option<TierCostReport>> {
        self.cost.latest_report(org_id).await
    }
}
