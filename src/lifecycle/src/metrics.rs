//! Lifecycle Engine Metrics
//!
//! Thread-safe counters shared by every component of the engine.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;

/// Thread-safe metrics for tracking lifecycle, tiering and restore activity
#[derive(Debug, Clone)]
pub struct LifecycleMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    /// Policy evaluations that ran to completion
    policies_evaluated: AtomicUsize,
    /// Snapshots deleted by lifecycle policies
    snapshots_deleted: AtomicUsize,
    bytes_reclaimed: AtomicU64,
    /// Candidates skipped because a lock or hold protects them
    protected_skips: AtomicUsize,
    /// Per-candidate failures reported by the storage backend
    candidate_errors: AtomicUsize,
    /// Passes skipped because another evaluation held the lease
    evaluations_contended: AtomicUsize,
    /// Tiering candidates skipped to preserve hot copies
    min_copies_skips: AtomicUsize,
    transitions_created: AtomicUsize,
    transitions_completed: AtomicUsize,
    transitions_failed: AtomicUsize,
    /// Claims lost to another worker
    claims_lost: AtomicUsize,
    restores_requested: AtomicUsize,
    restores_ready: AtomicUsize,
    restores_failed: AtomicUsize,
    restores_expired: AtomicUsize,
    reports_generated: AtomicUsize,
}

impl Default for LifecycleMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleMetrics {
    /// Create a new metrics tracker
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::default()),
        }
    }

    pub fn record_policy_evaluated(&self) {
        self.inner.policies_evaluated.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a snapshot deletion and the bytes it freed
    pub fn record_deletion(&self, bytes: u64) {
        self.inner.snapshots_deleted.fetch_add(1, Ordering::Relaxed);
        self.inner
            .bytes_reclaimed
            .fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_protected_skips(&self, count: usize) {
        self.inner
            .protected_skips
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_candidate_errors(&self, count: usize) {
        self.inner
            .candidate_errors
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_evaluation_contended(&self) {
        self.inner
            .evaluations_contended
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_min_copies_skips(&self, count: usize) {
        self.inner
            .min_copies_skips
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_transitions_created(&self, count: usize) {
        self.inner
            .transitions_created
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_transition_completed(&self) {
        self.inner
            .transitions_completed
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transition_failed(&self) {
        self.inner
            .transitions_failed
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Claims failed by the stale sweep count as failed transitions
    pub fn record_stale_claims_failed(&self, count: u64) {
        self.inner
            .transitions_failed
            .fetch_add(usize::try_from(count).unwrap_or(usize::MAX), Ordering::Relaxed);
    }

    pub fn record_claim_lost(&self) {
        self.inner.claims_lost.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_restore_requested(&self) {
        self.inner
            .restores_requested
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_restore_ready(&self) {
        self.inner.restores_ready.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_restore_failed(&self) {
        self.inner.restores_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_restores_expired(&self, count: u64) {
        self.inner
            .restores_expired
            .fetch_add(usize::try_from(count).unwrap_or(usize::MAX), Ordering::Relaxed);
    }

    pub fn record_report_generated(&self) {
        self.inner
            .reports_generated
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn policies_evaluated(&self) -> usize {
        self.inner.policies_evaluated.load(Ordering::Relaxed)
    }

    pub fn snapshots_deleted(&self) -> usize {
        self.inner.snapshots_deleted.load(Ordering::Relaxed)
    }

    pub fn bytes_reclaimed(&self) -> u64 {
        self.inner.bytes_reclaimed.load(Ordering::Relaxed)
    }

    pub fn protected_skips(&self) -> usize {
        self.inner.protected_skips.load(Ordering::Relaxed)
    }

    pub fn candidate_errors(&self) -> usize {
        self.inner.candidate_errors.load(Ordering::Relaxed)
    }

    pub fn evaluations_contended(&self) -> usize {
        self.inner.evaluations_contended.load(Ordering::Relaxed)
    }

    pub fn min_copies_skips(&self) -> usize {
        self.inner.min_copies_skips.load(Ordering::Relaxed)
    }

    pub fn transitions_created(&self) -> usize {
        self.inner.transitions_created.load(Ordering::Relaxed)
    }

    pub fn transitions_completed(&self) -> usize {
        self.inner.transitions_completed.load(Ordering::Relaxed)
    }

    pub fn transitions_failed(&self) -> usize {
        self.inner.transitions_failed.load(Ordering::Relaxed)
    }

    pub fn claims_lost(&self) -> usize {
        self.inner.claims_lost.load(Ordering::Relaxed)
    }

    pub fn restores_requested(&self) -> usize {
        self.inner.restores_requested.load(Ordering::Relaxed)
    }

    pub fn restores_ready(&self) -> usize {
        self.inner.restores_ready.load(Ordering::Relaxed)
    }

    pub fn restores_failed(&self) -> usize {
        self.inner.restores_failed.load(Ordering::Relaxed)
    }

    pub fn restores_expired(&self) -> usize {
        self.inner.restores_expired.load(Ordering::Relaxed)
    }

    pub fn reports_generated(&self) -> usize {
        self.inner.reports_generated.load(Ordering::Relaxed)
    }

    /// Get a snapshot of all counters
    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            policies_evaluated: self.policies_evaluated(),
            snapshots_deleted: self.snapshots_deleted(),
            bytes_reclaimed: self.bytes_reclaimed(),
            protected_skips: self.protected_skips(),
            candidate_errors: self.candidate_errors(),
            evaluations_contended: self.evaluations_contended(),
            min_copies_skips: self.min_copies_skips(),
            transitions_created: self.transitions_created(),
            transitions_completed: self.transitions_completed(),
            transitions_failed: self.transitions_failed(),
            claims_lost: self.claims_lost(),
            restores_requested: self.restores_requested(),
            restores_ready: self.restores_ready(),
            restores_failed: self.restores_failed(),
            restores_expired: self.restores_expired(),
            reports_generated: self.reports_generated(),
        }
    }
}

/// Point-in-time copy of [`LifecycleMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSummary {
    pub policies_evaluated: usize,
    pub snapshots_deleted: usize,
    pub bytes_reclaimed: u64,
    pub protected_skips: usize,
    pub candidate_errors: usize,
    pub evaluations_contended: usize,
    pub min_copies_skips: usize,
    pub transitions_created: usize,
    pub transitions_completed: usize,
    pub transitions_failed: usize,
    pub claims_lost: usize,
    pub restores_requested: usize,
    pub restores_ready: usize,
    pub restores_failed: usize,
    pub restores_expired: usize,
    pub reports_generated: usize,
}

impl MetricsSummary {
    /// Format bytes as MB with 2 decimal places
    fn format_mb(bytes: u64) -> String {
        format!("{:.2}", bytes as f64 / (1024.0 * 1024.0))
    }

    /// Log the metrics summary
    pub fn log(&self) {
        tracing::info!("=== Lifecycle Metrics Summary ===");
        tracing::info!(
            "Retention: {} policies evaluated, {} snapshots deleted, {} MB reclaimed",
            self.policies_evaluated,
            self.snapshots_deleted,
            Self::format_mb(self.bytes_reclaimed)
        );
        tracing::info!(
            "Skips: {} protected, {} min-copies, {} contended evaluations",
            self.protected_skips,
            self.min_copies_skips,
            self.evaluations_contended
        );
        tracing::info!(
            "Transitions: {} created, {} completed, {} failed, {} claims lost",
            self.transitions_created,
            self.transitions_completed,
            self.transitions_failed,
            self.claims_lost
        );
        tracing::info!(
            "Cold restores: {} requested, {} ready, {} failed, {} expired",
            self.restores_requested,
            self.restores_ready,
            self.restores_failed,
            self.restores_expired
        );
        tracing::info!(
            "Reports generated: {}, candidate errors: {}",
            self.reports_generated,
            self.candidate_errors
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = LifecycleMetrics::new();
        assert_eq!(metrics.summary(), MetricsSummary::default());
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics = LifecycleMetrics::new();
        let other = metrics.clone();

        metrics.record_deletion(1024);
        other.record_deletion(2048);
        other.record_protected_skips(2);
        metrics.record_restores_expired(3);

        let summary = metrics.summary();
        assert_eq!(summary.snapshots_deleted, 2);
        assert_eq!(summary.bytes_reclaimed, 3072);
        assert_eq!(summary.protected_skips, 2);
        assert_eq!(summary.restores_expired, 3);
    }

    #[test]
    fn test_format_mb() {
        assert_eq!(MetricsSummary::format_mb(1024 * 1024), "1.00");
        assert_eq!(MetricsSummary::format_mb(1536 * 1024), "1.50");
    }
}
