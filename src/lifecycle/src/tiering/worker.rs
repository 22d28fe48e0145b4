//! Tier transition worker.
//!
//! Drains pending transitions through `pending -> in_progress -> completed |
//! failed`. Claims are conditional updates in the store, so any number of
//! workers may drain the same queue. Failed transitions are not retried
//! here; the next tiering pass re-selects the snapshot.
//!
//! A claimed transition never stays `in_progress` on purpose: errors after
//! the claim fail it, and [`TransitionWorker::recover_stale`] fails claims
//! older than the configured timeout, such as those of a crashed worker.

use std::sync::Arc;

use chrono::Duration;
use common::clock::Clock;
use common::config::{TieringConfig, TransitionConfig};
use common::model::TierTransition;
use common::store::Store;
use futures::{StreamExt, stream};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::backend::StorageBackend;
use crate::error::Result;
use crate::guard::Guard;
use crate::metrics::LifecycleMetrics;

/// What happened to one transition handed to [`TransitionWorker::execute`].
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionResult {
    Completed,
    Failed(String),
    /// Another worker claimed it first, or the snapshot is busy.
    ClaimLost,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainOutcome {
    pub claimed: usize,
    pub completed: usize,
    pub failed: usize,
    pub claims_lost: usize,
}

impl DrainOutcome {
    fn add(mut self, result: &TransitionResult) -> Self {
        match result {
            TransitionResult::Completed => {
                self.claimed += 1;
                self.completed += 1;
            }
            TransitionResult::Failed(_) => {
                self.claimed += 1;
                self.failed += 1;
            }
            TransitionResult::ClaimLost => self.claims_lost += 1,
        }
        self
    }
}

#[derive(Clone)]
pub struct TransitionWorker {
    store: Arc<dyn Store>,
    backend: Arc<dyn StorageBackend>,
    guard: Guard,
    clock: Arc<dyn Clock>,
    metrics: LifecycleMetrics,
    config: TransitionConfig,
    tiering: TieringConfig,
}

impl TransitionWorker {
    pub fn new(
        store: Arc<dyn Store>,
        backend: Arc<dyn StorageBackend>,
        clock: Arc<dyn Clock>,
        config: TransitionConfig,
        tiering: TieringConfig,
        metrics: LifecycleMetrics,
    ) -> Self {
        Self {
            guard: Guard::new(store.clone(), clock.clone()),
            store,
            backend,
            clock,
            metrics,
            config,
            tiering,
        }
    }

    /// Run one batch of pending transitions with bounded concurrency.
    pub async fn drain_once(&self) -> Result<DrainOutcome> {
        let pending = self
            .store
            .list_pending_transitions(self.config.batch_size)
            .await?;
        if pending.is_empty() {
            debug!("No pending tier transitions");
            return Ok(DrainOutcome::default());
        }

        info!(
            pending = pending.len(),
            concurrency = self.config.concurrency,
            "Draining tier transitions"
        );

        // One failing transition must not cancel the others mid-flight.
        let outcome = stream::iter(pending)
            .map(|transition| async move {
                match self.execute(&transition).await {
                    Ok(result) => result,
                    Err(e) => {
                        warn!(transition_id = %transition.id, error = %e, "Transition errored");
                        TransitionResult::Failed(e.to_string())
                    }
                }
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .fold(DrainOutcome::default(), |outcome, result| async move {
                outcome.add(&result)
            })
            .await;

        info!(
            claimed = outcome.claimed,
            completed = outcome.completed,
            failed = outcome.failed,
            claims_lost = outcome.claims_lost,
            "Tier transition batch finished"
        );
        Ok(outcome)
    }

    /// Fail transitions claimed longer ago than `claim_timeout`.
    pub async fn recover_stale(&self) -> Result<u64> {
        let now = self.clock.now();
        let timeout = Duration::from_std(self.config.claim_timeout)
            .unwrap_or_else(|_| Duration::hours(1));
        let recovered = self
            .store
            .fail_stale_transitions(now - timeout, "claim timed out", now)
            .await?;
        if recovered > 0 {
            warn!(recovered, "Failed stale in-progress tier transitions");
            self.metrics.record_stale_claims_failed(recovered);
        }
        Ok(recovered)
    }

    /// Claim and execute one transition.
    pub async fn execute(&self, transition: &TierTransition) -> Result<TransitionResult> {
        if !self
            .store
            .claim_transition(transition.id, self.clock.now())
            .await?
        {
            debug!(transition_id = %transition.id, "Transition claimed elsewhere");
            self.metrics.record_claim_lost();
            return Ok(TransitionResult::ClaimLost);
        }

        match self.run_claimed(transition).await {
            Ok(result) => Ok(result),
            Err(e) => {
                warn!(
                    transition_id = %transition.id,
                    error = %e,
                    "Error after claim, failing transition"
                );
                match self
                    .store
                    .fail_transition(transition.id, &e.to_string(), self.clock.now())
                    .await
                {
                    Ok(true) => self.metrics.record_transition_failed(),
                    Ok(false) => {}
                    Err(release) => warn!(
                        transition_id = %transition.id,
                        error = %release,
                        "Could not fail transition, left for the stale sweep"
                    ),
                }
                Err(e)
            }
        }
    }

    async fn run_claimed(&self, transition: &TierTransition) -> Result<TransitionResult> {
        if let Some(reason) = self.precondition_failure(transition).await? {
            return self.fail(transition, reason).await;
        }

        let key = transition.key();
        match self
            .backend
            .move_snapshot(&key, transition.from_tier, transition.to_tier)
            .await
        {
            Ok(()) => {
                if self
                    .store
                    .complete_transition(transition, self.clock.now())
                    .await?
                {
                    self.metrics.record_transition_completed();
                    info!(
                        org_id = %transition.org_id,
                        transition_id = %transition.id,
                        snapshot = %key,
                        from_tier = %transition.from_tier,
                        to_tier = %transition.to_tier,
                        "Tier transition completed"
                    );
                    Ok(TransitionResult::Completed)
                } else {
                    warn!(
                        transition_id = %transition.id,
                        "Transition left in_progress before completion was recorded"
                    );
                    Ok(TransitionResult::Failed(
                        "transition no longer in progress".to_string(),
                    ))
                }
            }
            Err(e) => self.fail(transition, e.to_string()).await,
        }
    }

    /// Conditions that must still hold after the claim: the snapshot is where
    /// the transition expects it, the target tier is enabled, no lock floor
    /// forbids the target and no cold restore is reading it.
    async fn precondition_failure(&self, transition: &TierTransition) -> Result<Option<String>> {
        let key = transition.key();
        let Some(tier) = self.store.get_snapshot_tier(&key).await? else {
            return Ok(Some("snapshot no longer exists".to_string()));
        };
        if tier.current_tier != transition.from_tier {
            return Ok(Some(format!(
                "snapshot is in {} tier, expected {}",
                tier.current_tier, transition.from_tier
            )));
        }

        let target_disabled = self
            .store
            .list_tier_configs(transition.org_id)
            .await?
            .iter()
            .any(|p| p.tier_type == transition.to_tier && !p.enabled);
        if target_disabled {
            return Ok(Some(format!("{} tier is disabled", transition.to_tier)));
        }

        let reasons = self.guard.protection_reasons(&key).await?;
        if reasons.blocks_tier(transition.to_tier, self.tiering.default_lock_floor) {
            return Ok(Some(format!(
                "immutability lock forbids moving to {} tier",
                transition.to_tier
            )));
        }

        let restoring = self
            .store
            .list_active_restores(transition.org_id)
            .await?
            .iter()
            .any(|r| r.key() == key);
        if restoring {
            return Ok(Some("cold restore in progress".to_string()));
        }

        Ok(None)
    }

    async fn fail(&self, transition: &TierTransition, reason: String) -> Result<TransitionResult> {
        warn!(
            org_id = %transition.org_id,
            transition_id = %transition.id,
            snapshot_id = %transition.snapshot_id,
            error = %reason,
            "Tier transition failed"
        );
        self.store
            .fail_transition(transition.id, &reason, self.clock.now())
            .await?;
        self.metrics.record_transition_failed();
        Ok(TransitionResult::Failed(reason))
    }
}
