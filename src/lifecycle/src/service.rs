//! One scheduler tick over every organization.
//!
//! The engine owns no timer; a tick is triggered from outside (the binary's
//! interval loop, a cron job, a test). Organizations are independent: a
//! failure in one is logged and collected, and the others still run.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::clock::Clock;
use common::config::Configuration;
use common::model::PolicyStatus;
use common::store::Store;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::admin::AdminService;
use crate::backend::StorageBackend;
use crate::cost::CostAggregator;
use crate::error::{LifecycleError, Result};
use crate::metrics::LifecycleMetrics;
use crate::restore::ColdRestoreWorkflow;
use crate::retention::PolicyEvaluator;
use crate::tiering::{DrainOutcome, TieringEngine, TransitionWorker};

/// Summary of one tick.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickReport {
    pub organizations: usize,
    pub policies_evaluated: usize,
    pub snapshots_deleted: usize,
    pub transitions_created: usize,
    pub transitions: DrainOutcome,
    /// In-progress transitions failed because their claim timed out
    pub transitions_recovered: u64,
    pub restores_started: usize,
    pub restores_ready: usize,
    pub restores_expired: u64,
    pub reports_generated: usize,
    pub errors: Vec<String>,
}

pub struct LifecycleService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    config: Configuration,
    metrics: LifecycleMetrics,
    evaluator: PolicyEvaluator,
    tiering: TieringEngine,
    worker: TransitionWorker,
    restores: ColdRestoreWorkflow,
    cost: CostAggregator,
    admin: AdminService,
}

impl LifecycleService {
    pub fn new(
        store: Arc<dyn Store>,
        backend: Arc<dyn StorageBackend>,
        clock: Arc<dyn Clock>,
        config: Configuration,
    ) -> Self {
        let metrics = LifecycleMetrics::new();
        Self {
            evaluator: PolicyEvaluator::new(
                store.clone(),
                backend.clone(),
                clock.clone(),
                config.lifecycle.clone(),
                metrics.clone(),
            ),
            tiering: TieringEngine::new(
                store.clone(),
                clock.clone(),
                config.tiering.clone(),
                metrics.clone(),
            ),
            worker: TransitionWorker::new(
                store.clone(),
                backend.clone(),
                clock.clone(),
                config.transitions.clone(),
                config.tiering.clone(),
                metrics.clone(),
            ),
            restores: ColdRestoreWorkflow::new(
                store.clone(),
                backend,
                clock.clone(),
                config.cold_restore.clone(),
                metrics.clone(),
            ),
            cost: CostAggregator::new(
                store.clone(),
                clock.clone(),
                config.cost.clone(),
                metrics.clone(),
            ),
            admin: AdminService::new(
                store.clone(),
                clock.clone(),
                config.cost.clone(),
                metrics.clone(),
            ),
            store,
            clock,
            config,
            metrics,
        }
    }

    pub fn metrics(&self) -> &LifecycleMetrics {
        &self.metrics
    }

    pub fn evaluator(&self) -> &PolicyEvaluator {
        &self.evaluator
    }

    pub fn tiering(&self) -> &TieringEngine {
        &self.tiering
    }

    pub fn worker(&self) -> &TransitionWorker {
        &self.worker
    }

    pub fn restores(&self) -> &ColdRestoreWorkflow {
        &self.restores
    }

    pub fn cost(&self) -> &CostAggregator {
        &self.cost
    }

    pub fn admin(&self) -> &AdminService {
        &self.admin
    }

    /// Tick every `interval` until `shutdown` fires or its sender is
    /// dropped. A tick that has started runs to completion. Returns the
    /// number of ticks run.
    pub async fn run_until_shutdown(
        &self,
        interval: Duration,
        mut shutdown: oneshot::Receiver<()>,
    ) -> usize {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks = 0;

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = ticker.tick() => {}
            }

            debug!("Running lifecycle tick");
            match self.run_tick().await {
                Ok(report) => {
                    for e in &report.errors {
                        warn!(error = %e, "Tick error");
                    }
                }
                Err(e) => error!(error = %e, "Lifecycle tick failed"),
            }
            ticks += 1;
        }

        info!(ticks, "Lifecycle scheduler stopped");
        ticks
    }

    /// Run every evaluator once. Only a failure to list organizations fails
    /// the tick; everything else ends up in [`TickReport::errors`].
    pub async fn run_tick(&self) -> Result<TickReport> {
        let organizations = self.store.list_organizations().await?;
        let mut report = TickReport {
            organizations: organizations.len(),
            ..TickReport::default()
        };

        info!(organizations = organizations.len(), "Starting lifecycle tick");

        // Abandoned claims are failed first so this tick can plan them again.
        match self.worker.recover_stale().await {
            Ok(recovered) => report.transitions_recovered = recovered,
            Err(e) => {
                warn!(error = %e, "Stale transition sweep failed");
                report.errors.push(format!("transition recovery: {e}"));
            }
        }

        let budget = chrono::Duration::from_std(self.config.scheduler.evaluation_budget)
            .unwrap_or_else(|_| chrono::Duration::minutes(5));
        for org_id in organizations {
            // Each organization gets its own budget.
            let deadline = self.clock.now() + budget;
            if let Err(e) = self.run_organization(org_id, deadline, &mut report).await {
                warn!(org_id = %org_id, error = %e, "Organization pass failed");
                report.errors.push(format!("organization {org_id}: {e}"));
            }
        }

        match self.worker.drain_once().await {
            Ok(outcome) => report.transitions = outcome,
            Err(e) => {
                warn!(error = %e, "Transition drain failed");
                report.errors.push(format!("transition drain: {e}"));
            }
        }

        match self.restores.expire_past_due().await {
            Ok(expired) => report.restores_expired = expired,
            Err(e) => {
                warn!(error = %e, "Cold restore expiry sweep failed");
                report.errors.push(format!("restore expiry: {e}"));
            }
        }

        self.metrics.summary().log();
        info!(
            organizations = report.organizations,
            policies_evaluated = report.policies_evaluated,
            snapshots_deleted = report.snapshots_deleted,
            transitions_created = report.transitions_created,
            transitions_completed = report.transitions.completed,
            errors = report.errors.len(),
            "Lifecycle tick completed"
        );
        Ok(report)
    }

    async fn run_organization(
        &self,
        org_id: Uuid,
        deadline: DateTime<Utc>,
        report: &mut TickReport,
    ) -> Result<()> {
        let policies = self.store.list_policies(org_id).await?;
        for policy in policies
            .iter()
            .filter(|p| p.status == PolicyStatus::Active)
        {
            match self.evaluator.evaluate_until(policy, Some(deadline)).await {
                Ok(result) => {
                    report.policies_evaluated += 1;
                    report.snapshots_deleted += result.deleted.len();
                    report
                        .errors
                        .extend(result.errors.iter().map(|e| format!("policy {}: {e}", policy.id)));
                }
                Err(LifecycleError::EvaluationInProgress { .. }) => {
                    debug!(org_id = %org_id, policy_id = %policy.id, "Lifecycle pass already running");
                }
                Err(LifecycleError::Validation(e)) => {
                    report.errors.push(format!("policy {}: {e}", policy.id));
                }
                Err(e) => return Err(e),
            }
        }

        if self.config.tiering.enabled {
            match self.tiering.evaluate_until(org_id, Some(deadline)).await {
                Ok(outcome) => report.transitions_created += outcome.transitions.len(),
                Err(LifecycleError::EvaluationInProgress { .. }) => {
                    debug!(org_id = %org_id, "Tiering pass already running");
                }
                Err(e) => return Err(e),
            }
        }

        report.restores_started += self.restores.start_pending(org_id).await?.len();
        let poll = self.restores.poll_warming(org_id).await?;
        report.restores_ready += poll.ready.len();
        report
            .errors
            .extend(poll.errors.iter().map(|e| format!("restore poll: {e}")));

        self.cost
            .generate_daily_report(org_id, self.clock.now().date_naive())
            .await?;
        report.reports_generated += 1;
        Ok(())
    }
}
