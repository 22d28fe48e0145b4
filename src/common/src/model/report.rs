use super::TierType;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Occupancy and monthly cost of one tier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TierUsage {
    pub snapshot_count: u64,
    pub size_bytes: u64,
    pub monthly_cost: f64,
}

/// Current tier occupancy of an organization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TierStatsSummary {
    pub by_tier: BTreeMap<TierType, TierUsage>,
    pub total_snapshots: u64,
    pub total_size_bytes: u64,
    pub estimated_monthly_cost: f64,
    /// Heuristic estimate of monthly savings, not a commitment.
    pub potential_savings: f64,
}

/// Savings hint attached to a cost report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostSuggestion {
    pub from_tier: TierType,
    pub to_tier: TierType,
    pub snapshot_count: u64,
    pub size_bytes: u64,
    pub estimated_monthly_savings: f64,
    pub message: String,
}

/// Daily cost report, one per organization and day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierCostReport {
    pub id: Uuid,
    pub org_id: Uuid,
    pub report_date: NaiveDate,
    pub total_size_bytes: u64,
    pub current_monthly_cost: f64,
    pub optimized_monthly_cost: f64,
    pub potential_monthly_savings: f64,
    pub tier_breakdown: BTreeMap<TierType, TierUsage>,
    pub suggestions: Vec<CostSuggestion>,
    pub generated_at: DateTime<Utc>,
}
