//! Cost & Reporting Aggregator
//!
//! [`compute_stats`] is a pure function over tier placements and pricing.
//! `potential_savings` is an estimate: it assumes a configurable share of
//! old hot data could move to a cheaper tier. It is not a commitment and is
//! not derived from the tier rules actually configured. No savings are
//! estimated towards a tier whose pricing is disabled.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use common::clock::Clock;
use common::config::CostConfig;
use common::model::{
    BYTES_PER_GB, CostSuggestion, SnapshotTier, StorageTierConfig, TierCostReport,
    TierStatsSummary, TierType,
};
use common::store::Store;
use tracing::info;
use uuid::Uuid;

use crate::error::Result;
use crate::metrics::LifecycleMetrics;

fn monthly_cost(pricing: &HashMap<TierType, &StorageTierConfig>, tier: TierType, bytes: u64) -> f64 {
    pricing
        .get(&tier)
        .map_or(0.0, |p| bytes as f64 / BYTES_PER_GB * p.cost_per_gb_month)
}

/// Tier occupancy, monthly cost and estimated savings.
pub fn compute_stats(
    tiers: &[SnapshotTier],
    pricing: &[StorageTierConfig],
    config: &CostConfig,
    now: DateTime<Utc>,
) -> TierStatsSummary {
    let pricing: HashMap<TierType, &StorageTierConfig> =
        pricing.iter().map(|p| (p.tier_type, p)).collect();
    let mut summary = TierStatsSummary::default();

    for tier in tiers {
        let usage = summary.by_tier.entry(tier.current_tier).or_default();
        usage.snapshot_count += 1;
        usage.size_bytes += tier.size_bytes;
        summary.total_snapshots += 1;
        summary.total_size_bytes += tier.size_bytes;
    }
    for (tier, usage) in summary.by_tier.iter_mut() {
        usage.monthly_cost = monthly_cost(&pricing, *tier, usage.size_bytes);
        summary.estimated_monthly_cost += usage.monthly_cost;
    }

    let target_disabled = pricing
        .get(&config.savings_target_tier)
        .is_some_and(|p| !p.enabled);
    if target_disabled {
        return summary;
    }

    let movable: u64 = old_hot(tiers, config, now).map(|t| t.size_bytes).sum();
    let delta = monthly_cost(&pricing, TierType::Hot, movable)
        - monthly_cost(&pricing, config.savings_target_tier, movable);
    summary.potential_savings = (delta * config.savings_fraction).max(0.0);

    summary
}

/// Hot snapshots older than the savings threshold.
fn old_hot<'a>(
    tiers: &'a [SnapshotTier],
    config: &'a CostConfig,
    now: DateTime<Utc>,
) -> impl Iterator<Item = &'a SnapshotTier> {
    tiers.iter().filter(move |t| {
        t.current_tier == TierType::Hot
            && t.age_days(now) >= i64::from(config.savings_age_threshold_days)
    })
}

pub struct CostAggregator {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    metrics: LifecycleMetrics,
    config: CostConfig,
}

impl CostAggregator {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        config: CostConfig,
        metrics: LifecycleMetrics,
    ) -> Self {
        Self {
            store,
            clock,
            metrics,
            config,
        }
    }

    pub async fn compute_tier_stats(&self, org_id: Uuid) -> Result<TierStatsSummary> {
        let (tiers, pricing) = tokio::try_join!(
            self.store.list_snapshot_tiers(org_id),
            self.store.list_tier_configs(org_id),
        )?;
        Ok(compute_stats(&tiers, &pricing, &self.config, self.clock.now()))
    }

    /// Build and upsert the report for `(org_id, date)`. Running it again
    /// for the same day overwrites the figures and keeps the report id.
    pub async fn generate_daily_report(
        &self,
        org_id: Uuid,
        date: NaiveDate,
    ) -> Result<TierCostReport> {
        let now = self.clock.now();
        let (tiers, pricing) = tokio::try_join!(
            self.store.list_snapshot_tiers(org_id),
            self.store.list_tier_configs(org_id),
        )?;
        let stats = compute_stats(&tiers, &pricing, &self.config, now);

        let mut suggestions = Vec::new();
        if stats.potential_savings > 0.0 {
            let candidates: Vec<&SnapshotTier> = old_hot(&tiers, &self.config, now).collect();
            let size_bytes = candidates.iter().map(|t| t.size_bytes).sum();
            suggestions.push(CostSuggestion {
                from_tier: TierType::Hot,
                to_tier: self.config.savings_target_tier,
                snapshot_count: candidates.len() as u64,
                size_bytes,
                estimated_monthly_savings: stats.potential_savings,
                message: format!(
                    "{} hot snapshots are older than {} days; moving them to {} could save about {:.2} per month",
                    candidates.len(),
                    self.config.savings_age_threshold_days,
                    self.config.savings_target_tier,
                    stats.potential_savings
                ),
            });
        }

        let report = TierCostReport {
            id: Uuid::new_v4(),
            org_id,
            report_date: date,
            total_size_bytes: stats.total_size_bytes,
            current_monthly_cost: stats.estimated_monthly_cost,
            optimized_monthly_cost: stats.estimated_monthly_cost - stats.potential_savings,
            potential_monthly_savings: stats.potential_savings,
            tier_breakdown: stats.by_tier,
            suggestions,
            generated_at: now,
        };
        let stored = self.store.upsert_cost_report(&report).await?;
        self.metrics.record_report_generated();

        info!(
            org_id = %org_id,
            report_date = %date,
            snapshots = stats.total_snapshots,
            monthly_cost = stored.current_monthly_cost,
            potential_savings = stored.potential_monthly_savings,
            "Generated tier cost report"
        );
        Ok(stored)
    }

    pub async fn latest_report(&self, org_id: Uuid) -> Result<Option<TierCostReport>> {
        Ok(self.store.list_cost_reports(org_id).await?.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use common::clock::ManualClock;
    use common::store::InMemoryStore;
    use common::testing::{SnapshotFixture, tier_pricing};

    const GIB: u64 = 1 << 30;

    fn placed(org_id: Uuid, id: &str, tier: TierType, age_days: i64, now: DateTime<Utc>) -> SnapshotTier {
        let snapshot = SnapshotFixture::new(org_id, id, now)
            .aged(age_days, now)
            .sized(10 * GIB)
            .build();
        SnapshotTier {
            current_tier: tier,
            ..SnapshotTier::hot(&snapshot)
        }
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_compute_stats_by_tier() {
        let org_id = Uuid::new_v4();
        let now = Utc::now();
        let tiers = vec![
            placed(org_id, "a", TierType::Hot, 5, now),
            placed(org_id, "b", TierType::Hot, 40, now),
            placed(org_id, "c", TierType::Cold, 100, now),
        ];

        let stats = compute_stats(&tiers, &tier_pricing(org_id), &CostConfig::default(), now);

        assert_eq!(stats.total_snapshots, 3);
        assert_eq!(stats.total_size_bytes, 30 * GIB);
        let hot = &stats.by_tier[&TierType::Hot];
        assert_eq!(hot.snapshot_count, 2);
        assert!(close(hot.monthly_cost, 20.0 * 0.023));
        assert!(close(stats.by_tier[&TierType::Cold].monthly_cost, 10.0 * 0.004));
        assert!(!stats.by_tier.contains_key(&TierType::Warm));
        assert!(close(stats.estimated_monthly_cost, 20.0 * 0.023 + 10.0 * 0.004));
        // Only "b" is old enough: half of 10 GiB moved hot -> warm.
        assert!(close(stats.potential_savings, 10.0 * (0.023 - 0.0125) * 0.5));
    }

    #[test]
    fn test_no_savings_towards_disabled_tier() {
        let org_id = Uuid::new_v4();
        let now = Utc::now();
        let tiers = vec![placed(org_id, "b", TierType::Hot, 40, now)];
        let pricing: Vec<StorageTierConfig> = tier_pricing(org_id)
            .into_iter()
            .map(|p| StorageTierConfig {
                enabled: p.tier_type != TierType::Warm,
                ..p
            })
            .collect();

        let stats = compute_stats(&tiers, &pricing, &CostConfig::default(), now);

        assert!(close(stats.estimated_monthly_cost, 10.0 * 0.023));
        assert_eq!(stats.potential_savings, 0.0);
    }

    #[test]
    fn test_compute_stats_empty() {
        let stats = compute_stats(&[], &[], &CostConfig::default(), Utc::now());
        assert_eq!(stats, TierStatsSummary::default());
    }

    #[tokio::test]
    async fn test_daily_report_is_idempotent() {
        let store = InMemoryStore::new();
        let clock = ManualClock::new(Utc::now());
        let metrics = LifecycleMetrics::new();
        let org_id = Uuid::new_v4();
        for pricing in tier_pricing(org_id) {
            store.upsert_tier_config(&pricing).await.unwrap();
        }
        let now = clock.now();
        let snapshot = SnapshotFixture::new(org_id, "a", now)
            .aged(60, now)
            .sized(10 * GIB)
            .build();
        store.upsert_snapshot(&snapshot).await.unwrap();

        let aggregator = CostAggregator::new(
            Arc::new(store.clone()),
            Arc::new(clock.clone()),
            CostConfig::default(),
            metrics.clone(),
        );
        let date = now.date_naive();

        let first = aggregator.generate_daily_report(org_id, date).await.unwrap();
        assert_eq!(first.suggestions.len(), 1);
        assert!(close(
            first.optimized_monthly_cost,
            first.current_monthly_cost - first.potential_monthly_savings
        ));

        clock.advance(Duration::minutes(5));
        let second = aggregator.generate_daily_report(org_id, date).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.tier_breakdown, second.tier_breakdown);
        assert!(close(first.current_monthly_cost, second.current_monthly_cost));
        assert_eq!(store.list_cost_reports(org_id).await.unwrap().len(), 1);
        assert_eq!(metrics.reports_generated(), 2);

        let latest = aggregator.latest_report(org_id).await.unwrap().unwrap();
        assert_eq!(latest.id, first.id);
        assert_eq!(latest.generated_at, second.generated_at);
    }
}
