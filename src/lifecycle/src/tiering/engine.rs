//! Tiering Rule Engine
//!
//! Walks the organization's enabled tier rules in ascending priority and
//! turns the first rule that matches a snapshot into a pending
//! [`TierTransition`]. Rules targeting a tier whose pricing is disabled
//! produce nothing. Nothing is moved here; the transition worker owns
//! `current_tier`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::clock::Clock;
use common::config::TieringConfig;
use common::model::{
    EvaluatorKind, SnapshotKey, SnapshotTier, StorageTierConfig, TierRule, TierTransition,
    TierType, TransitionStatus,
};
use common::store::Store;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::guard::Guard;
use crate::lease::EvaluationLease;
use crate::metrics::LifecycleMetrics;

/// Result of one tiering pass for an organization.
#[derive(Debug, Clone)]
pub struct TieringOutcome {
    pub org_id: Uuid,
    pub evaluated_at: DateTime<Utc>,
    /// Pending transitions created by this pass.
    pub transitions: Vec<TierTransition>,
    /// Candidates left in place because a lock floor forbids the target tier.
    pub skipped_protected: usize,
    /// Candidates left in place to keep enough hot copies of their schedule.
    pub skipped_min_copies: usize,
    /// Candidates with an open transition or an active cold restore.
    pub skipped_in_flight: usize,
    /// Candidates of rules whose target tier is disabled.
    pub skipped_disabled_tier: usize,
    pub deadline_reached: bool,
}

/// Monthly saving of keeping `size_gb` in `to` instead of `from`. Tiers
/// without pricing count as free.
pub fn estimated_saving(
    pricing: &HashMap<TierType, StorageTierConfig>,
    size_gb: f64,
    from: TierType,
    to: TierType,
) -> f64 {
    let cost = |tier: TierType| pricing.get(&tier).map_or(0.0, |p| p.cost_per_gb_month);
    size_gb * (cost(from) - cost(to))
}

pub struct TieringEngine {
    store: Arc<dyn Store>,
    guard: Guard,
    clock: Arc<dyn Clock>,
    metrics: LifecycleMetrics,
    config: TieringConfig,
}

impl TieringEngine {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        config: TieringConfig,
        metrics: LifecycleMetrics,
    ) -> Self {
        Self {
            guard: Guard::new(store.clone(), clock.clone()),
            store,
            clock,
            metrics,
            config,
        }
    }

    pub async fn evaluate(&self, org_id: Uuid) -> Result<TieringOutcome> {
        self.evaluate_until(org_id, None).await
    }

    /// Create pending transitions for `org_id`, stopping once `deadline`
    /// passes. Transitions created before the deadline are kept.
    pub async fn evaluate_until(
        &self,
        org_id: Uuid,
        deadline: Option<DateTime<Utc>>,
    ) -> Result<TieringOutcome> {
        let lease = match EvaluationLease::acquire(
            self.store.as_ref(),
            org_id,
            EvaluatorKind::Tiering,
            self.clock.now(),
            self.config.lease_ttl,
        )
        .await
        {
            Ok(lease) => lease,
            Err(e) => {
                self.metrics.record_evaluation_contended();
                return Err(e);
            }
        };

        let result = self.run(org_id, deadline).await;
        lease.release(self.store.as_ref()).await;
        result
    }

    async fn run(&self, org_id: Uuid, deadline: Option<DateTime<Utc>>) -> Result<TieringOutcome> {
        let evaluated_at = self.clock.now();

        let mut rules: Vec<TierRule> = self
            .store
            .list_tier_rules(org_id)
            .await?
            .into_iter()
            .filter(|r| r.enabled)
            .collect();
        rules.sort_by_key(|r| (r.priority, r.id));

        let mut outcome = TieringOutcome {
            org_id,
            evaluated_at,
            transitions: Vec::new(),
            skipped_protected: 0,
            skipped_min_copies: 0,
            skipped_in_flight: 0,
            skipped_disabled_tier: 0,
            deadline_reached: false,
        };
        if rules.is_empty() {
            debug!(org_id = %org_id, "No enabled tier rules");
            return Ok(outcome);
        }

        let (tiers, pricing, open, restores) = tokio::try_join!(
            self.store.list_snapshot_tiers(org_id),
            self.store.list_tier_configs(org_id),
            self.store.list_open_transitions(org_id),
            self.store.list_active_restores(org_id),
        )?;
        let mut tiers = tiers;
        tiers.sort_by(|a, b| {
            a.snapshot_time
                .cmp(&b.snapshot_time)
                .then_with(|| a.snapshot_id.cmp(&b.snapshot_id))
        });
        let disabled: HashSet<TierType> = pricing
            .iter()
            .filter(|p| !p.enabled)
            .map(|p| p.tier_type)
            .collect();
        let pricing: HashMap<TierType, StorageTierConfig> =
            pricing.into_iter().map(|p| (p.tier_type, p)).collect();
        let in_flight_tiers: HashSet<Uuid> = open.iter().map(|t| t.snapshot_tier_id).collect();
        let restoring: HashSet<SnapshotKey> = restores.iter().map(|r| r.key()).collect();

        let keys: Vec<SnapshotKey> = tiers.iter().map(SnapshotTier::key).collect();
        let protection = self.guard.protection_status_for_many(&keys).await?;

        // Hot copies per schedule that are not already on their way out.
        let mut hot_copies: HashMap<Uuid, u32> = HashMap::new();
        for tier in &tiers {
            if tier.current_tier == TierType::Hot && !in_flight_tiers.contains(&tier.id) {
                *hot_copies.entry(tier.copies_group()).or_default() += 1;
            }
        }

        info!(
            org_id = %org_id,
            rules = rules.len(),
            snapshots = tiers.len(),
            "Starting tiering evaluation"
        );

        let mut matched: HashSet<Uuid> = HashSet::new();
        'rules: for rule in &rules {
            let scope = rule.scope();
            for tier in &tiers {
                if matched.contains(&tier.id)
                    || tier.current_tier != rule.from_tier
                    || !scope.matches(tier.repository_id, tier.schedule_id)
                    || tier.age_days(evaluated_at) < i64::from(rule.age_threshold_days)
                {
                    continue;
                }

                if deadline.is_some_and(|d| self.clock.now() >= d) {
                    warn!(org_id = %org_id, "Tiering deadline reached, stopping evaluation");
                    outcome.deadline_reached = true;
                    break 'rules;
                }

                if disabled.contains(&rule.to_tier) {
                    outcome.skipped_disabled_tier += 1;
                    continue;
                }

                let key = tier.key();
                if in_flight_tiers.contains(&tier.id) || restoring.contains(&key) {
                    outcome.skipped_in_flight += 1;
                    matched.insert(tier.id);
                    continue;
                }

                if protection
                    .reasons(&key)
                    .blocks_tier(rule.to_tier, self.config.default_lock_floor)
                {
                    debug!(
                        org_id = %org_id,
                        snapshot = %key,
                        rule = %rule.name,
                        to_tier = %rule.to_tier,
                        "Lock floor forbids target tier"
                    );
                    outcome.skipped_protected += 1;
                    continue;
                }

                let group = tier.copies_group();
                if rule.from_tier == TierType::Hot {
                    let remaining = hot_copies.get(&group).copied().unwrap_or(0);
                    if remaining.saturating_sub(1) < rule.min_copies {
                        debug!(
                            org_id = %org_id,
                            snapshot = %key,
                            rule = %rule.name,
                            hot_copies = remaining,
                            min_copies = rule.min_copies,
                            "Keeping hot copy"
                        );
                        outcome.skipped_min_copies += 1;
                        continue;
                    }
                }

                // A lock may have been placed since the batch lookup.
                let current = self.guard.protection_reasons(&key).await?;
                if current.blocks_tier(rule.to_tier, self.config.default_lock_floor) {
                    outcome.skipped_protected += 1;
                    continue;
                }

                let transition = TierTransition {
                    id: Uuid::new_v4(),
                    org_id,
                    snapshot_tier_id: tier.id,
                    snapshot_id: tier.snapshot_id.clone(),
                    repository_id: tier.repository_id,
                    from_tier: rule.from_tier,
                    to_tier: rule.to_tier,
                    trigger_rule_id: Some(rule.id),
                    size_bytes: tier.size_bytes,
                    estimated_saving: estimated_saving(
                        &pricing,
                        tier.size_gb(),
                        rule.from_tier,
                        rule.to_tier,
                    ),
                    status: TransitionStatus::Pending,
                    error_message: None,
                    created_at: self.clock.now(),
                    started_at: None,
                    completed_at: None,
                };

                matched.insert(tier.id);
                if !self.store.insert_transition(&transition).await? {
                    outcome.skipped_in_flight += 1;
                    continue;
                }
                if rule.from_tier == TierType::Hot {
                    if let Some(count) = hot_copies.get_mut(&group) {
                        *count = count.saturating_sub(1);
                    }
                }

                info!(
                    org_id = %org_id,
                    transition_id = %transition.id,
                    snapshot = %key,
                    rule = %rule.name,
                    from_tier = %transition.from_tier,
                    to_tier = %transition.to_tier,
                    estimated_saving = transition.estimated_saving,
                    "Created tier transition"
                );
                outcome.transitions.push(transition);
            }
        }

        self.metrics
            .record_transitions_created(outcome.transitions.len());
        self.metrics.record_min_copies_skips(outcome.skipped_min_copies);
        self.metrics.record_protected_skips(outcome.skipped_protected);

        info!(
            org_id = %org_id,
            created = outcome.transitions.len(),
            skipped_protected = outcome.skipped_protected,
            skipped_min_copies = outcome.skipped_min_copies,
            skipped_in_flight = outcome.skipped_in_flight,
            skipped_disabled_tier = outcome.skipped_disabled_tier,
            "Tiering evaluation completed"
        );

        Ok(outcome)
    }
}
