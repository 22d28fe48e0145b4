use std::collections::{BTreeSet, HashSet};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use sqlx::any::{AnyPoolOptions, AnyRow, install_default_drivers};
use sqlx::{AnyConnection, AnyPool, Row, query};
use uuid::Uuid;

use super::{RestoreInsert, Store, StoreError, StoreResult, merge_lock};
use crate::config::DatabaseConfig;
use crate::model::{
    ColdRestoreRequest, EvaluatorKind, ImmutabilityLock, LegalHold, LifecycleDeletionEvent,
    LifecyclePolicy, PolicyRunRecord, RestoreStatus, SnapshotKey, SnapshotRef, SnapshotTier,
    StorageTierConfig, TierCostReport, TierRule, TierTransition,
};

/// Keys per `IN (...)` lookup.
const LOOKUP_CHUNK: usize = 500;
const REPORT_DATE_FORMAT: &str = "%Y-%m-%d";

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS snapshots (
        repository_id TEXT NOT NULL,
        snapshot_id TEXT NOT NULL,
        org_id TEXT NOT NULL,
        short_id TEXT NOT NULL,
        schedule_id TEXT,
        size_bytes BIGINT NOT NULL,
        snapshot_time BIGINT NOT NULL,
        tags TEXT NOT NULL,
        PRIMARY KEY (repository_id, snapshot_id)
    )"#,
    r#"
    CREATE TABLE IF NOT EXISTS snapshot_tiers (
        id TEXT PRIMARY KEY,
        repository_id TEXT NOT NULL,
        snapshot_id TEXT NOT NULL,
        org_id TEXT NOT NULL,
        schedule_id TEXT,
        current_tier TEXT NOT NULL,
        size_bytes BIGINT NOT NULL,
        snapshot_time BIGINT NOT NULL,
        tiered_at BIGINT,
        UNIQUE (repository_id, snapshot_id)
    )"#,
    r#"
    CREATE TABLE IF NOT EXISTS immutability_locks (
        id TEXT PRIMARY KEY,
        org_id TEXT NOT NULL,
        repository_id TEXT NOT NULL,
        snapshot_id TEXT NOT NULL,
        locked_at BIGINT NOT NULL,
        locked_until BIGINT NOT NULL,
        locked_by TEXT NOT NULL,
        reason TEXT NOT NULL,
        provider_lock_enabled BIGINT NOT NULL,
        provider_lock_mode TEXT,
        floor_tier TEXT,
        UNIQUE (repository_id, snapshot_id)
    )"#,
    r#"
    CREATE TABLE IF NOT EXISTS legal_holds (
        id TEXT PRIMARY KEY,
        org_id TEXT NOT NULL,
        repository_id TEXT NOT NULL,
        snapshot_id TEXT NOT NULL,
        reason TEXT NOT NULL,
        placed_by TEXT NOT NULL,
        placed_at BIGINT NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS ix_legal_holds_snapshot ON legal_holds (snapshot_id)",
    r#"
    CREATE TABLE IF NOT EXISTS lifecycle_policies (
        id TEXT PRIMARY KEY,
        org_id TEXT NOT NULL,
        name TEXT NOT NULL,
        status TEXT NOT NULL,
        rules TEXT NOT NULL,
        scopes TEXT NOT NULL,
        last_evaluated_at BIGINT,
        last_deletion_at BIGINT,
        deletion_count BIGINT NOT NULL,
        bytes_reclaimed BIGINT NOT NULL,
        created_at BIGINT NOT NULL,
        updated_at BIGINT NOT NULL
    )"#,
    r#"
    CREATE TABLE IF NOT EXISTS lifecycle_deletion_events (
        id TEXT PRIMARY KEY,
        policy_id TEXT NOT NULL,
        org_id TEXT NOT NULL,
        snapshot_id TEXT NOT NULL,
        repository_id TEXT NOT NULL,
        reason TEXT NOT NULL,
        size_bytes BIGINT NOT NULL,
        deleted_by TEXT NOT NULL,
        deleted_at BIGINT NOT NULL
    )"#,
    r#"
    CREATE TABLE IF NOT EXISTS storage_tier_configs (
        org_id TEXT NOT NULL,
        tier_type TEXT NOT NULL,
        cost_per_gb_month DOUBLE PRECISION NOT NULL,
        retrieval_cost_per_gb DOUBLE PRECISION NOT NULL,
        retrieval_time_ms BIGINT NOT NULL,
        enabled BIGINT NOT NULL,
        PRIMARY KEY (org_id, tier_type)
    )"#,
    r#"
    CREATE TABLE IF NOT EXISTS tier_rules (
        id TEXT PRIMARY KEY,
        org_id TEXT NOT NULL,
        repository_id TEXT,
        schedule_id TEXT,
        name TEXT NOT NULL,
        from_tier TEXT NOT NULL,
        to_tier TEXT NOT NULL,
        age_threshold_days BIGINT NOT NULL,
        min_copies BIGINT NOT NULL,
        priority BIGINT NOT NULL,
        enabled BIGINT NOT NULL
    )"#,
    r#"
    CREATE TABLE IF NOT EXISTS tier_transitions (
        id TEXT PRIMARY KEY,
        org_id TEXT NOT NULL,
        snapshot_tier_id TEXT NOT NULL,
        snapshot_id TEXT NOT NULL,
        repository_id TEXT NOT NULL,
        from_tier TEXT NOT NULL,
        to_tier TEXT NOT NULL,
        trigger_rule_id TEXT,
        size_bytes BIGINT NOT NULL,
        estimated_saving DOUBLE PRECISION NOT NULL,
        status TEXT NOT NULL,
        error_message TEXT,
        created_at BIGINT NOT NULL,
        started_at BIGINT,
        completed_at BIGINT
    )"#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS ux_tier_transitions_open
        ON tier_transitions (snapshot_tier_id)
        WHERE status IN ('pending', 'in_progress')"#,
    r#"
    CREATE TABLE IF NOT EXISTS cold_restore_requests (
        id TEXT PRIMARY KEY,
        org_id TEXT NOT NULL,
        snapshot_id TEXT NOT NULL,
        repository_id TEXT NOT NULL,
        requested_by TEXT NOT NULL,
        from_tier TEXT NOT NULL,
        target_path TEXT,
        priority TEXT NOT NULL,
        status TEXT NOT NULL,
        retrieval_handle TEXT,
        estimated_ready_at BIGINT,
        ready_at BIGINT,
        expires_at BIGINT,
        completed_at BIGINT,
        retrieval_cost DOUBLE PRECISION NOT NULL,
        error_message TEXT,
        created_at BIGINT NOT NULL,
        updated_at BIGINT NOT NULL
    )"#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS ux_cold_restore_requests_active
        ON cold_restore_requests (repository_id, snapshot_id)
        WHERE status IN ('pending', 'warming', 'ready')"#,
    r#"
    CREATE TABLE IF NOT EXISTS tier_cost_reports (
        id TEXT NOT NULL,
        org_id TEXT NOT NULL,
        report_date TEXT NOT NULL,
        total_size_bytes BIGINT NOT NULL,
        current_monthly_cost DOUBLE PRECISION NOT NULL,
        optimized_monthly_cost DOUBLE PRECISION NOT NULL,
        potential_monthly_savings DOUBLE PRECISION NOT NULL,
        tier_breakdown TEXT NOT NULL,
        suggestions TEXT NOT NULL,
        generated_at BIGINT NOT NULL,
        PRIMARY KEY (org_id, report_date)
    )"#,
    r#"
    CREATE TABLE IF NOT EXISTS evaluation_leases (
        org_id TEXT NOT NULL,
        kind TEXT NOT NULL,
        holder TEXT NOT NULL,
        expires_at BIGINT NOT NULL,
        PRIMARY KEY (org_id, kind)
    )"#,
];

const SNAPSHOT_COLUMNS: &str =
    "org_id, repository_id, snapshot_id, short_id, schedule_id, size_bytes, snapshot_time, tags";
const TIER_COLUMNS: &str = "id, repository_id, snapshot_id, org_id, schedule_id, current_tier, \
     size_bytes, snapshot_time, tiered_at";
const LOCK_COLUMNS: &str = "id, org_id, repository_id, snapshot_id, locked_at, locked_until, \
     locked_by, reason, provider_lock_enabled, provider_lock_mode, floor_tier";
const HOLD_COLUMNS: &str =
    "id, org_id, repository_id, snapshot_id, reason, placed_by, placed_at";
const POLICY_COLUMNS: &str = "id, org_id, name, status, rules, scopes, last_evaluated_at, \
     last_deletion_at, deletion_count, bytes_reclaimed, created_at, updated_at";
const EVENT_COLUMNS: &str = "id, policy_id, org_id, snapshot_id, repository_id, reason, \
     size_bytes, deleted_by, deleted_at";
const TIER_CONFIG_COLUMNS: &str = "org_id, tier_type, cost_per_gb_month, retrieval_cost_per_gb, \
     retrieval_time_ms, enabled";
const RULE_COLUMNS: &str = "id, org_id, repository_id, schedule_id, name, from_tier, to_tier, \
     age_threshold_days, min_copies, priority, enabled";
const TRANSITION_COLUMNS: &str = "id, org_id, snapshot_tier_id, snapshot_id, repository_id, \
     from_tier, to_tier, trigger_rule_id, size_bytes, estimated_saving, status, error_message, \
     created_at, started_at, completed_at";
const RESTORE_COLUMNS: &str = "id, org_id, snapshot_id, repository_id, requested_by, from_tier, \
     target_path, priority, status, retrieval_handle, estimated_ready_at, ready_at, expires_at, \
     completed_at, retrieval_cost, error_message, created_at, updated_at";
const REPORT_COLUMNS: &str = "id, org_id, report_date, total_size_bytes, current_monthly_cost, \
     optimized_monthly_cost, potential_monthly_savings, tier_breakdown, suggestions, generated_at";

/// Store backed by PostgreSQL or SQLite through sqlx's `Any` driver.
///
/// Ids are stored as text, timestamps as epoch milliseconds and structured
/// fields as JSON text, so one schema serves both databases.
#[derive(Debug, Clone)]
pub struct SqlStore {
    pool: AnyPool,
}

impl SqlStore {
    /// Connect and initialize the schema.
    pub async fn connect(config: &DatabaseConfig) -> StoreResult<Self> {
        install_default_drivers();
        let dsn = config.dsn.as_str();
        log::info!("Connecting to lifecycle database with DSN: {dsn}");

        let in_memory = dsn.starts_with("sqlite:") && dsn.contains(":memory:");
        let pool = if in_memory {
            // Every connection to `:memory:` is a separate database
            AnyPoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect(dsn)
                .await
        } else {
            let dsn = if dsn.starts_with("sqlite:") {
                sqlite_create_mode(dsn).await
            } else {
                dsn.to_string()
            };
            AnyPoolOptions::new()
                .max_connections(config.max_connections)
                .connect(&dsn)
                .await
        }
        .map_err(|e| {
            log::error!("Failed to connect to database with DSN '{dsn}': {e}");
            e
        })?;

        let store = Self { pool };
        store.init().await.map_err(|e| {
            log::error!("Failed to initialize lifecycle schema: {e}");
            e
        })?;
        log::info!("Lifecycle schema initialized successfully");
        Ok(store)
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    async fn init(&self) -> StoreResult<()> {
        for statement in SCHEMA {
            query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Rows of `select` (which must end in `WHERE snapshot_id IN`) for the
    /// given keys, filtered to exact `(repository_id, snapshot_id)` matches.
    async fn rows_for_keys(&self, select: &str, keys: &[SnapshotKey]) -> StoreResult<Vec<AnyRow>> {
        let wanted: HashSet<&SnapshotKey> = keys.iter().collect();
        let snapshot_ids: Vec<&str> = keys
            .iter()
            .map(|k| k.snapshot_id.as_str())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut rows = Vec::new();
        for chunk in snapshot_ids.chunks(LOOKUP_CHUNK) {
            let placeholders = (1..=chunk.len())
                .map(|i| format!("${i}"))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!("{select} ({placeholders})");
            let mut q = query(&sql);
            for id in chunk {
                q = q.bind(*id);
            }
            for row in q.fetch_all(&self.pool).await? {
                let key = SnapshotKey::new(
                    parse_uuid(&row.try_get::<String, _>("repository_id")?)?,
                    row.try_get::<String, _>("snapshot_id")?,
                );
                if wanted.contains(&key) {
                    rows.push(row);
                }
            }
        }
        Ok(rows)
    }

    /// Write a merged lock. The update re-applies the extend-only rules
    /// against the row as it is now, so a concurrent re-lock committed after
    /// `merged` was read is never shortened or relaxed. `requested_at` is the
    /// request's `locked_at` and decides whether the stored lock is active.
    async fn write_lock(
        conn: &mut AnyConnection,
        merged: &ImmutabilityLock,
        requested_at: DateTime<Utc>,
    ) -> StoreResult<ImmutabilityLock> {
        let active = "immutability_locks.locked_until > $12";
        let stored_rank = floor_rank("immutability_locks.floor_tier");
        let requested_rank = floor_rank("excluded.floor_tier");
        let upsert = format!(
            r#"
            INSERT INTO immutability_locks ({LOCK_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (repository_id, snapshot_id) DO UPDATE SET
                org_id = excluded.org_id,
                locked_at = CASE WHEN {active}
                    THEN immutability_locks.locked_at ELSE excluded.locked_at END,
                locked_until = CASE
                    WHEN excluded.locked_until > immutability_locks.locked_until
                    THEN excluded.locked_until ELSE immutability_locks.locked_until END,
                locked_by = excluded.locked_by,
                reason = excluded.reason,
                provider_lock_enabled = CASE
                    WHEN {active} AND immutability_locks.provider_lock_enabled <> 0 THEN 1
                    ELSE excluded.provider_lock_enabled END,
                provider_lock_mode = COALESCE(excluded.provider_lock_mode,
                    CASE WHEN {active} THEN immutability_locks.provider_lock_mode END),
                floor_tier = CASE
                    WHEN NOT ({active}) THEN excluded.floor_tier
                    WHEN immutability_locks.floor_tier IS NULL THEN NULL
                    WHEN excluded.floor_tier IS NULL THEN immutability_locks.floor_tier
                    WHEN {requested_rank} < {stored_rank} THEN excluded.floor_tier
                    ELSE immutability_locks.floor_tier END
            "#
        );
        query(&upsert)
            .bind(merged.id.to_string())
            .bind(merged.org_id.to_string())
            .bind(merged.repository_id.to_string())
            .bind(merged.snapshot_id.as_str())
            .bind(millis(merged.locked_at))
            .bind(millis(merged.locked_until))
            .bind(merged.locked_by.as_str())
            .bind(merged.reason.as_str())
            .bind(i64::from(merged.provider_lock_enabled))
            .bind(merged.provider_lock_mode.map(|m| m.as_str()))
            .bind(merged.floor_tier.map(|t| t.as_str()))
            .bind(millis(requested_at))
            .execute(&mut *conn)
            .await?;

        let select = format!(
            "SELECT {LOCK_COLUMNS} FROM immutability_locks \
             WHERE repository_id = $1 AND snapshot_id = $2"
        );
        let row = query(&select)
            .bind(merged.repository_id.to_string())
            .bind(merged.snapshot_id.as_str())
            .fetch_one(&mut *conn)
            .await?;
        lock_from_row(&row)
    }
}

/// Append `mode=rwc` and create the parent directory of a file database.
async fn sqlite_create_mode(dsn: &str) -> String {
    let path = dsn
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                log::warn!("Failed to create database directory {}: {e}", parent.display());
            }
        }
    }

    if dsn.contains("mode=") {
        dsn.to_string()
    } else if dsn.contains('?') {
        format!("{dsn}&mode=rwc")
    } else {
        format!("{dsn}?mode=rwc")
    }
}

/// Ranks a stored floor tier from warmest to coldest.
fn floor_rank(column: &str) -> String {
    format!(
        "CASE {column} WHEN 'hot' THEN 0 WHEN 'warm' THEN 1 WHEN 'cold' THEN 2 ELSE 3 END"
    )
}

fn millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

fn opt_millis(t: Option<DateTime<Utc>>) -> Option<i64> {
    t.map(millis)
}

fn parse_ts(ms: i64) -> StoreResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::decode("timestamp", format!("out of range: {ms}")))
}

fn parse_opt_ts(ms: Option<i64>) -> StoreResult<Option<DateTime<Utc>>> {
    ms.map(parse_ts).transpose()
}

fn parse_uuid(s: &str) -> StoreResult<Uuid> {
    Uuid::parse_str(s).map_err(|e| StoreError::decode("uuid", e))
}

fn parse_opt_uuid(s: Option<String>) -> StoreResult<Option<Uuid>> {
    s.as_deref().map(parse_uuid).transpose()
}

fn to_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

fn to_u64(v: i64, entity: &'static str) -> StoreResult<u64> {
    u64::try_from(v).map_err(|e| StoreError::decode(entity, e))
}

fn to_u32(v: i64, entity: &'static str) -> StoreResult<u32> {
    u32::try_from(v).map_err(|e| StoreError::decode(entity, e))
}

fn parse_enum<T>(row: &AnyRow, column: &str) -> StoreResult<T>
where
    T: std::str::FromStr<Err = crate::model::ValidationError>,
{
    Ok(row.try_get::<String, _>(column)?.parse()?)
}

fn parse_opt_enum<T>(row: &AnyRow, column: &str) -> StoreResult<Option<T>>
where
    T: std::str::FromStr<Err = crate::model::ValidationError>,
{
    Ok(row
        .try_get::<Option<String>, _>(column)?
        .map(|s| s.parse())
        .transpose()?)
}

fn snapshot_from_row(row: &AnyRow) -> StoreResult<SnapshotRef> {
    Ok(SnapshotRef {
        org_id: parse_uuid(&row.try_get::<String, _>("org_id")?)?,
        repository_id: parse_uuid(&row.try_get::<String, _>("repository_id")?)?,
        snapshot_id: row.try_get("snapshot_id")?,
        short_id: row.try_get("short_id")?,
        schedule_id: parse_opt_uuid(row.try_get("schedule_id")?)?,
        size_bytes: to_u64(row.try_get("size_bytes")?, "snapshot")?,
        snapshot_time: parse_ts(row.try_get("snapshot_time")?)?,
        tags: serde_json::from_str(&row.try_get::<String, _>("tags")?)?,
    })
}

fn tier_from_row(row: &AnyRow) -> StoreResult<SnapshotTier> {
    Ok(SnapshotTier {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        snapshot_id: row.try_get("snapshot_id")?,
        repository_id: parse_uuid(&row.try_get::<String, _>("repository_id")?)?,
        org_id: parse_uuid(&row.try_get::<String, _>("org_id")?)?,
        schedule_id: parse_opt_uuid(row.try_get("schedule_id")?)?,
        current_tier: parse_enum(row, "current_tier")?,
        size_bytes: to_u64(row.try_get("size_bytes")?, "snapshot tier")?,
        snapshot_time: parse_ts(row.try_get("snapshot_time")?)?,
        tiered_at: parse_opt_ts(row.try_get("tiered_at")?)?,
    })
}

fn lock_from_row(row: &AnyRow) -> StoreResult<ImmutabilityLock> {
    Ok(ImmutabilityLock {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        org_id: parse_uuid(&row.try_get::<String, _>("org_id")?)?,
        repository_id: parse_uuid(&row.try_get::<String, _>("repository_id")?)?,
        snapshot_id: row.try_get("snapshot_id")?,
        locked_at: parse_ts(row.try_get("locked_at")?)?,
        locked_until: parse_ts(row.try_get("locked_until")?)?,
        locked_by: row.try_get("locked_by")?,
        reason: row.try_get("reason")?,
        provider_lock_enabled: row.try_get::<i64, _>("provider_lock_enabled")? != 0,
        provider_lock_mode: parse_opt_enum(row, "provider_lock_mode")?,
        floor_tier: parse_opt_enum(row, "floor_tier")?,
    })
}

fn hold_from_row(row: &AnyRow) -> StoreResult<LegalHold> {
    Ok(LegalHold {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        org_id: parse_uuid(&row.try_get::<String, _>("org_id")?)?,
        repository_id: parse_uuid(&row.try_get::<String, _>("repository_id")?)?,
        snapshot_id: row.try_get("snapshot_id")?,
        reason: row.try_get("reason")?,
        placed_by: row.try_get("placed_by")?,
        placed_at: parse_ts(row.try_get("placed_at")?)?,
    })
}

fn policy_from_row(row: &AnyRow) -> StoreResult<LifecyclePolicy> {
    Ok(LifecyclePolicy {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        org_id: parse_uuid(&row.try_get::<String, _>("org_id")?)?,
        name: row.try_get("name")?,
        status: parse_enum(row, "status")?,
        rules: serde_json::from_str(&row.try_get::<String, _>("rules")?)?,
        scopes: serde_json::from_str(&row.try_get::<String, _>("scopes")?)?,
        last_evaluated_at: parse_opt_ts(row.try_get("last_evaluated_at")?)?,
        last_deletion_at: parse_opt_ts(row.try_get("last_deletion_at")?)?,
        deletion_count: to_u64(row.try_get("deletion_count")?, "policy")?,
        bytes_reclaimed: to_u64(row.try_get("bytes_reclaimed")?, "policy")?,
        created_at: parse_ts(row.try_get("created_at")?)?,
        updated_at: parse_ts(row.try_get("updated_at")?)?,
    })
}

fn event_from_row(row: &AnyRow) -> StoreResult<LifecycleDeletionEvent> {
    Ok(LifecycleDeletionEvent {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        policy_id: parse_uuid(&row.try_get::<String, _>("policy_id")?)?,
        org_id: parse_uuid(&row.try_get::<String, _>("org_id")?)?,
        snapshot_id: row.try_get("snapshot_id")?,
        repository_id: parse_uuid(&row.try_get::<String, _>("repository_id")?)?,
        reason: row.try_get("reason")?,
        size_bytes: to_u64(row.try_get("size_bytes")?, "deletion event")?,
        deleted_by: row.try_get("deleted_by")?,
        deleted_at: parse_ts(row.try_get("deleted_at")?)?,
    })
}

fn tier_config_from_row(row: &AnyRow) -> StoreResult<StorageTierConfig> {
    Ok(StorageTierConfig {
        org_id: parse_uuid(&row.try_get::<String, _>("org_id")?)?,
        tier_type: parse_enum(row, "tier_type")?,
        cost_per_gb_month: row.try_get("cost_per_gb_month")?,
        retrieval_cost_per_gb: row.try_get("retrieval_cost_per_gb")?,
        retrieval_time: StdDuration::from_millis(to_u64(
            row.try_get("retrieval_time_ms")?,
            "tier config",
        )?),
        enabled: row.try_get::<i64, _>("enabled")? != 0,
    })
}

fn rule_from_row(row: &AnyRow) -> StoreResult<TierRule> {
    Ok(TierRule {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        org_id: parse_uuid(&row.try_get::<String, _>("org_id")?)?,
        repository_id: parse_opt_uuid(row.try_get("repository_id")?)?,
        schedule_id: parse_opt_uuid(row.try_get("schedule_id")?)?,
        name: row.try_get("name")?,
        from_tier: parse_enum(row, "from_tier")?,
        to_tier: parse_enum(row, "to_tier")?,
        age_threshold_days: to_u32(row.try_get("age_threshold_days")?, "tier rule")?,
        min_copies: to_u32(row.try_get("min_copies")?, "tier rule")?,
        priority: i32::try_from(row.try_get::<i64, _>("priority")?)
            .map_err(|e| StoreError::decode("tier rule", e))?,
        enabled: row.try_get::<i64, _>("enabled")? != 0,
    })
}

fn transition_from_row(row: &AnyRow) -> StoreResult<TierTransition> {
    Ok(TierTransition {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        org_id: parse_uuid(&row.try_get::<String, _>("org_id")?)?,
        snapshot_tier_id: parse_uuid(&row.try_get::<String, _>("snapshot_tier_id")?)?,
        snapshot_id: row.try_get("snapshot_id")?,
        repository_id: parse_uuid(&row.try_get::<String, _>("repository_id")?)?,
        from_tier: parse_enum(row, "from_tier")?,
        to_tier: parse_enum(row, "to_tier")?,
        trigger_rule_id: parse_opt_uuid(row.try_get("trigger_rule_id")?)?,
        size_bytes: to_u64(row.try_get("size_bytes")?, "tier transition")?,
        estimated_saving: row.try_get("estimated_saving")?,
        status: parse_enum(row, "status")?,
        error_message: row.try_get("error_message")?,
        created_at: parse_ts(row.try_get("created_at")?)?,
        started_at: parse_opt_ts(row.try_get("started_at")?)?,
        completed_at: parse_opt_ts(row.try_get("completed_at")?)?,
    })
}

fn restore_from_row(row: &AnyRow) -> StoreResult<ColdRestoreRequest> {
    Ok(ColdRestoreRequest {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        org_id: parse_uuid(&row.try_get::<String, _>("org_id")?)?,
        snapshot_id: row.try_get("snapshot_id")?,
        repository_id: parse_uuid(&row.try_get::<String, _>("repository_id")?)?,
        requested_by: row.try_get("requested_by")?,
        from_tier: parse_enum(row, "from_tier")?,
        target_path: row.try_get("target_path")?,
        priority: parse_enum(row, "priority")?,
        status: parse_enum(row, "status")?,
        retrieval_handle: row.try_get("retrieval_handle")?,
        estimated_ready_at: parse_opt_ts(row.try_get("estimated_ready_at")?)?,
        ready_at: parse_opt_ts(row.try_get("ready_at")?)?,
        expires_at: parse_opt_ts(row.try_get("expires_at")?)?,
        completed_at: parse_opt_ts(row.try_get("completed_at")?)?,
        retrieval_cost: row.try_get("retrieval_cost")?,
        error_message: row.try_get("error_message")?,
        created_at: parse_ts(row.try_get("created_at")?)?,
        updated_at: parse_ts(row.try_get("updated_at")?)?,
    })
}

fn report_from_row(row: &AnyRow) -> StoreResult<TierCostReport> {
    let report_date: String = row.try_get("report_date")?;
    Ok(TierCostReport {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        org_id: parse_uuid(&row.try_get::<String, _>("org_id")?)?,
        report_date: NaiveDate::parse_from_str(&report_date, REPORT_DATE_FORMAT)
            .map_err(|e| StoreError::decode("cost report", e))?,
        total_size_bytes: to_u64(row.try_get("total_size_bytes")?, "cost report")?,
        current_monthly_cost: row.try_get("current_monthly_cost")?,
        optimized_monthly_cost: row.try_get("optimized_monthly_cost")?,
        potential_monthly_savings: row.try_get("potential_monthly_savings")?,
        tier_breakdown: serde_json::from_str(&row.try_get::<String, _>("tier_breakdown")?)?,
        suggestions: serde_json::from_str(&row.try_get::<String, _>("suggestions")?)?,
        generated_at: parse_ts(row.try_get("generated_at")?)?,
    })
}

fn decode_all<T>(
    rows: Vec<AnyRow>,
    decode: impl Fn(&AnyRow) -> StoreResult<T>,
) -> StoreResult<Vec<T>> {
    rows.iter().map(decode).collect()
}

#[async_trait]
impl Store for SqlStore {
    async fn list_organizations(&self) -> StoreResult<Vec<Uuid>> {
        let rows = query(
            r#"
            SELECT org_id FROM snapshots
            UNION SELECT org_id FROM snapshot_tiers
            UNION SELECT org_id FROM lifecycle_policies
            UNION SELECT org_id FROM tier_rules
            UNION SELECT org_id FROM cold_restore_requests
            ORDER BY 1
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| parse_uuid(&row.try_get::<String, _>(0)?))
            .collect()
    }

    async fn upsert_snapshot(&self, snapshot: &SnapshotRef) -> StoreResult<()> {
        let tags = serde_json::to_string(&snapshot.tags)?;
        let tier = SnapshotTier::hot(snapshot);
        let mut tx = self.pool.begin().await?;

        let stmt = format!(
            r#"
            INSERT INTO snapshots ({SNAPSHOT_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (repository_id, snapshot_id) DO UPDATE SET
                org_id = excluded.org_id,
                short_id = excluded.short_id,
                schedule_id = excluded.schedule_id,
                size_bytes = excluded.size_bytes,
                snapshot_time = excluded.snapshot_time,
                tags = excluded.tags
            "#
        );
        query(&stmt)
            .bind(snapshot.org_id.to_string())
            .bind(snapshot.repository_id.to_string())
            .bind(snapshot.snapshot_id.as_str())
            .bind(snapshot.short_id.as_str())
            .bind(snapshot.schedule_id.map(|id| id.to_string()))
            .bind(to_i64(snapshot.size_bytes))
            .bind(millis(snapshot.snapshot_time))
            .bind(tags)
            .execute(&mut *tx)
            .await?;

        let stmt = format!(
            r#"
            INSERT INTO snapshot_tiers ({TIER_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (repository_id, snapshot_id) DO NOTHING
            "#
        );
        query(&stmt)
            .bind(tier.id.to_string())
            .bind(tier.repository_id.to_string())
            .bind(tier.snapshot_id.as_str())
            .bind(tier.org_id.to_string())
            .bind(tier.schedule_id.map(|id| id.to_string()))
            .bind(tier.current_tier.as_str())
            .bind(to_i64(tier.size_bytes))
            .bind(millis(tier.snapshot_time))
            .bind(opt_millis(tier.tiered_at))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn list_snapshots(&self, org_id: Uuid) -> StoreResult<Vec<SnapshotRef>> {
        let stmt = format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM snapshots WHERE org_id = $1 \
             ORDER BY snapshot_time, snapshot_id"
        );
        let rows = query(&stmt)
            .bind(org_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        decode_all(rows, snapshot_from_row)
    }

    async fn remove_snapshot(&self, key: &SnapshotKey) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        for table in ["snapshots", "snapshot_tiers"] {
            let stmt =
                format!("DELETE FROM {table} WHERE repository_id = $1 AND snapshot_id = $2");
            query(&stmt)
                .bind(key.repository_id.to_string())
                .bind(key.snapshot_id.as_str())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn upsert_lock(&self, lock: &ImmutabilityLock) -> StoreResult<ImmutabilityLock> {
        let mut tx = self.pool.begin().await?;

        let select = format!(
            "SELECT {LOCK_COLUMNS} FROM immutability_locks \
             WHERE repository_id = $1 AND snapshot_id = $2"
        );
        let existing = query(&select)
            .bind(lock.repository_id.to_string())
            .bind(lock.snapshot_id.as_str())
            .fetch_optional(&mut *tx)
            .await?
            .map(|row| lock_from_row(&row))
            .transpose()?;
        let merged = merge_lock(existing, lock);
        let stored = Self::write_lock(&mut *tx, &merged, lock.locked_at).await?;

        tx.commit().await?;
        Ok(stored)
    }

    async fn locks_for(&self, keys: &[SnapshotKey]) -> StoreResult<Vec<ImmutabilityLock>> {
        let select =
            format!("SELECT {LOCK_COLUMNS} FROM immutability_locks WHERE snapshot_id IN");
        let rows = self.rows_for_keys(&select, keys).await?;
        decode_all(rows, lock_from_row)
    }

    async fn place_hold(&self, hold: &LegalHold) -> StoreResult<()> {
        let stmt = format!(
            "INSERT INTO legal_holds ({HOLD_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7)"
        );
        query(&stmt)
            .bind(hold.id.to_string())
            .bind(hold.org_id.to_string())
            .bind(hold.repository_id.to_string())
            .bind(hold.snapshot_id.as_str())
            .bind(hold.reason.as_str())
            .bind(hold.placed_by.as_str())
            .bind(millis(hold.placed_at))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn release_hold(&self, hold_id: Uuid) -> StoreResult<bool> {
        let result = query("DELETE FROM legal_holds WHERE id = $1")
            .bind(hold_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn holds_for(&self, keys: &[SnapshotKey]) -> StoreResult<Vec<LegalHold>> {
        let select = format!("SELECT {HOLD_COLUMNS} FROM legal_holds WHERE snapshot_id IN");
        let rows = self.rows_for_keys(&select, keys).await?;
        decode_all(rows, hold_from_row)
    }

    async fn save_policy(&self, policy: &LifecyclePolicy) -> StoreResult<()> {
        let stmt = format!(
            r#"
            INSERT INTO lifecycle_policies ({POLICY_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (id) DO UPDATE SET
                name = excluded.name,
                status = excluded.status,
                rules = excluded.rules,
                scopes = excluded.scopes,
                updated_at = excluded.updated_at
            "#
        );
        query(&stmt)
            .bind(policy.id.to_string())
            .bind(policy.org_id.to_string())
            .bind(policy.name.as_str())
            .bind(policy.status.as_str())
            .bind(serde_json::to_string(&policy.rules)?)
            .bind(serde_json::to_string(&policy.scopes)?)
            .bind(opt_millis(policy.last_evaluated_at))
            .bind(opt_millis(policy.last_deletion_at))
            .bind(to_i64(policy.deletion_count))
            .bind(to_i64(policy.bytes_reclaimed))
            .bind(millis(policy.created_at))
            .bind(millis(policy.updated_at))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_policy(&self, id: Uuid) -> StoreResult<Option<LifecyclePolicy>> {
        let stmt = format!("SELECT {POLICY_COLUMNS} FROM lifecycle_policies WHERE id = $1");
        query(&stmt)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .map(|row| policy_from_row(&row))
            .transpose()
    }

    async fn list_policies(&self, org_id: Uuid) -> StoreResult<Vec<LifecyclePolicy>> {
        let stmt = format!(
            "SELECT {POLICY_COLUMNS} FROM lifecycle_policies WHERE org_id = $1 \
             ORDER BY created_at, id"
        );
        let rows = query(&stmt)
            .bind(org_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        decode_all(rows, policy_from_row)
    }

    async fn record_policy_run(&self, policy_id: Uuid, run: &PolicyRunRecord) -> StoreResult<()> {
        let last_deletion = (run.deleted > 0).then(|| millis(run.evaluated_at));
        let result = query(
            r#"
            UPDATE lifecycle_policies SET
                last_evaluated_at = $2,
                last_deletion_at = COALESCE($3, last_deletion_at),
                deletion_count = deletion_count + $4,
                bytes_reclaimed = bytes_reclaimed + $5
            WHERE id = $1
            "#,
        )
        .bind(policy_id.to_string())
        .bind(millis(run.evaluated_at))
        .bind(last_deletion)
        .bind(to_i64(run.deleted))
        .bind(to_i64(run.bytes_reclaimed))
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("policy", policy_id));
        }
        Ok(())
    }

    async fn append_deletion_event(&self, event: &LifecycleDeletionEvent) -> StoreResult<()> {
        let stmt = format!(
            "INSERT INTO lifecycle_deletion_events ({EVENT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        );
        query(&stmt)
            .bind(event.id.to_string())
            .bind(event.policy_id.to_string())
            .bind(event.org_id.to_string())
            .bind(event.snapshot_id.as_str())
            .bind(event.repository_id.to_string())
            .bind(event.reason.as_str())
            .bind(to_i64(event.size_bytes))
            .bind(event.deleted_by.as_str())
            .bind(millis(event.deleted_at))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_deletion_events(
        &self,
        policy_id: Uuid,
    ) -> StoreResult<Vec<LifecycleDeletionEvent>> {
        let stmt = format!(
            "SELECT {EVENT_COLUMNS} FROM lifecycle_deletion_events WHERE policy_id = $1 \
             ORDER BY deleted_at, id"
        );
        let rows = query(&stmt)
            .bind(policy_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        decode_all(rows, event_from_row)
    }

    async fn upsert_tier_config(&self, config: &StorageTierConfig) -> StoreResult<()> {
        let stmt = format!(
            r#"
            INSERT INTO storage_tier_configs ({TIER_CONFIG_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (org_id, tier_type) DO UPDATE SET
                cost_per_gb_month = excluded.cost_per_gb_month,
                retrieval_cost_per_gb = excluded.retrieval_cost_per_gb,
                retrieval_time_ms = excluded.retrieval_time_ms,
                enabled = excluded.enabled
            "#
        );
        query(&stmt)
            .bind(config.org_id.to_string())
            .bind(config.tier_type.as_str())
            .bind(config.cost_per_gb_month)
            .bind(config.retrieval_cost_per_gb)
            .bind(i64::try_from(config.retrieval_time.as_millis()).unwrap_or(i64::MAX))
            .bind(i64::from(config.enabled))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_tier_configs(&self, org_id: Uuid) -> StoreResult<Vec<StorageTierConfig>> {
        let stmt =
            format!("SELECT {TIER_CONFIG_COLUMNS} FROM storage_tier_configs WHERE org_id = $1");
        let rows = query(&stmt)
            .bind(org_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        let mut configs = decode_all(rows, tier_config_from_row)?;
        configs.sort_by_key(|c| c.tier_type);
        Ok(configs)
    }

    async fn upsert_snapshot_tier(&self, tier: &SnapshotTier) -> StoreResult<()> {
        let stmt = format!(
            r#"
            INSERT INTO snapshot_tiers ({TIER_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (repository_id, snapshot_id) DO UPDATE SET
                org_id = excluded.org_id,
                schedule_id = excluded.schedule_id,
                current_tier = excluded.current_tier,
                size_bytes = excluded.size_bytes,
                snapshot_time = excluded.snapshot_time,
                tiered_at = excluded.tiered_at
            "#
        );
        query(&stmt)
            .bind(tier.id.to_string())
            .bind(tier.repository_id.to_string())
            .bind(tier.snapshot_id.as_str())
            .bind(tier.org_id.to_string())
            .bind(tier.schedule_id.map(|id| id.to_string()))
            .bind(tier.current_tier.as_str())
            .bind(to_i64(tier.size_bytes))
            .bind(millis(tier.snapshot_time))
            .bind(opt_millis(tier.tiered_at))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_snapshot_tier(&self, key: &SnapshotKey) -> StoreResult<Option<SnapshotTier>> {
        let stmt = format!(
            "SELECT {TIER_COLUMNS} FROM snapshot_tiers \
             WHERE repository_id = $1 AND snapshot_id = $2"
        );
        query(&stmt)
            .bind(key.repository_id.to_string())
            .bind(key.snapshot_id.as_str())
            .fetch_optional(&self.pool)
            .await?
            .map(|row| tier_from_row(&row))
            .transpose()
    }

    async fn list_snapshot_tiers(&self, org_id: Uuid) -> StoreResult<Vec<SnapshotTier>> {
        let stmt = format!(
            "SELECT {TIER_COLUMNS} FROM snapshot_tiers WHERE org_id = $1 \
             ORDER BY snapshot_time, snapshot_id"
        );
        let rows = query(&stmt)
            .bind(org_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        decode_all(rows, tier_from_row)
    }

    async fn save_tier_rule(&self, rule: &TierRule) -> StoreResult<()> {
        let stmt = format!(
            r#"
            INSERT INTO tier_rules ({RULE_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO UPDATE SET
                repository_id = excluded.repository_id,
                schedule_id = excluded.schedule_id,
                name = excluded.name,
                from_tier = excluded.from_tier,
                to_tier = excluded.to_tier,
                age_threshold_days = excluded.age_threshold_days,
                min_copies = excluded.min_copies,
                priority = excluded.priority,
                enabled = excluded.enabled
            "#
        );
        query(&stmt)
            .bind(rule.id.to_string())
            .bind(rule.org_id.to_string())
            .bind(rule.repository_id.map(|id| id.to_string()))
            .bind(rule.schedule_id.map(|id| id.to_string()))
            .bind(rule.name.as_str())
            .bind(rule.from_tier.as_str())
            .bind(rule.to_tier.as_str())
            .bind(i64::from(rule.age_threshold_days))
            .bind(i64::from(rule.min_copies))
            .bind(i64::from(rule.priority))
            .bind(i64::from(rule.enabled))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_tier_rules(&self, org_id: Uuid) -> StoreResult<Vec<TierRule>> {
        let stmt = format!(
            "SELECT {RULE_COLUMNS} FROM tier_rules WHERE org_id = $1 ORDER BY priority, id"
        );
        let rows = query(&stmt)
            .bind(org_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        decode_all(rows, rule_from_row)
    }

    async fn insert_transition(&self, transition: &TierTransition) -> StoreResult<bool> {
        let stmt = format!(
            r#"
            INSERT INTO tier_transitions ({TRANSITION_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT DO NOTHING
            "#
        );
        let result = query(&stmt)
            .bind(transition.id.to_string())
            .bind(transition.org_id.to_string())
            .bind(transition.snapshot_tier_id.to_string())
            .bind(transition.snapshot_id.as_str())
            .bind(transition.repository_id.to_string())
            .bind(transition.from_tier.as_str())
            .bind(transition.to_tier.as_str())
            .bind(transition.trigger_rule_id.map(|id| id.to_string()))
            .bind(to_i64(transition.size_bytes))
            .bind(transition.estimated_saving)
            .bind(transition.status.as_str())
            .bind(transition.error_message.clone())
            .bind(millis(transition.created_at))
            .bind(opt_millis(transition.started_at))
            .bind(opt_millis(transition.completed_at))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn get_transition(&self, id: Uuid) -> StoreResult<Option<TierTransition>> {
        let stmt = format!("SELECT {TRANSITION_COLUMNS} FROM tier_transitions WHERE id = $1");
        query(&stmt)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .map(|row| transition_from_row(&row))
            .transpose()
    }

    async fn list_transitions(&self, org_id: Uuid) -> StoreResult<Vec<TierTransition>> {
        let stmt = format!(
            "SELECT {TRANSITION_COLUMNS} FROM tier_transitions WHERE org_id = $1 \
             ORDER BY created_at, id"
        );
        let rows = query(&stmt)
            .bind(org_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        decode_all(rows, transition_from_row)
    }

    async fn list_open_transitions(&self, org_id: Uuid) -> StoreResult<Vec<TierTransition>> {
        let stmt = format!(
            "SELECT {TRANSITION_COLUMNS} FROM tier_transitions \
             WHERE org_id = $1 AND status IN ('pending', 'in_progress') \
             ORDER BY created_at, id"
        );
        let rows = query(&stmt)
            .bind(org_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        decode_all(rows, transition_from_row)
    }

    async fn list_pending_transitions(&self, limit: usize) -> StoreResult<Vec<TierTransition>> {
        let stmt = format!(
            "SELECT {TRANSITION_COLUMNS} FROM tier_transitions WHERE status = 'pending' \
             ORDER BY created_at, id LIMIT $1"
        );
        let rows = query(&stmt)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        decode_all(rows, transition_from_row)
    }

    async fn claim_transition(&self, id: Uuid, started_at: DateTime<Utc>) -> StoreResult<bool> {
        let result = query(
            r#"
            UPDATE tier_transitions SET status = 'in_progress', started_at = $2
            WHERE id = $1
              AND status = 'pending'
              AND NOT EXISTS (
                  SELECT 1 FROM tier_transitions other
                  WHERE other.snapshot_tier_id = tier_transitions.snapshot_tier_id
                    AND other.status = 'in_progress'
                    AND other.id <> tier_transitions.id
              )
            "#,
        )
        .bind(id.to_string())
        .bind(millis(started_at))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn complete_transition(
        &self,
        transition: &TierTransition,
        completed_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;

        let result = query(
            r#"
            UPDATE tier_transitions SET status = 'completed', completed_at = $2
            WHERE id = $1 AND status = 'in_progress'
            "#,
        )
        .bind(transition.id.to_string())
        .bind(millis(completed_at))
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        query("UPDATE snapshot_tiers SET current_tier = $1, tiered_at = $2 WHERE id = $3")
            .bind(transition.to_tier.as_str())
            .bind(millis(completed_at))
            .bind(transition.snapshot_tier_id.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn fail_transition(
        &self,
        id: Uuid,
        error_message: &str,
        failed_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = query(
            r#"
            UPDATE tier_transitions
            SET status = 'failed', error_message = $2, completed_at = $3
            WHERE id = $1 AND status = 'in_progress'
            "#,
        )
        .bind(id.to_string())
        .bind(error_message)
        .bind(millis(failed_at))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn fail_stale_transitions(
        &self,
        started_before: DateTime<Utc>,
        error_message: &str,
        failed_at: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let result = query(
            r#"
            UPDATE tier_transitions
            SET status = 'failed', error_message = $2, completed_at = $3
            WHERE status = 'in_progress' AND started_at < $1
            "#,
        )
        .bind(millis(started_before))
        .bind(error_message)
        .bind(millis(failed_at))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn insert_restore_request(
        &self,
        request: &ColdRestoreRequest,
    ) -> StoreResult<RestoreInsert> {
        let insert = format!(
            r#"
            INSERT INTO cold_restore_requests ({RESTORE_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            ON CONFLICT DO NOTHING
            "#
        );
        let select = format!(
            "SELECT {RESTORE_COLUMNS} FROM cold_restore_requests \
             WHERE repository_id = $1 AND snapshot_id = $2 \
               AND status IN ('pending', 'warming', 'ready')"
        );

        // The existing request may turn terminal between the two statements
        for _ in 0..2 {
            let result = query(&insert)
                .bind(request.id.to_string())
                .bind(request.org_id.to_string())
                .bind(request.snapshot_id.as_str())
                .bind(request.repository_id.to_string())
                .bind(request.requested_by.as_str())
                .bind(request.from_tier.as_str())
                .bind(request.target_path.clone())
                .bind(request.priority.as_str())
                .bind(request.status.as_str())
                .bind(request.retrieval_handle.clone())
                .bind(opt_millis(request.estimated_ready_at))
                .bind(opt_millis(request.ready_at))
                .bind(opt_millis(request.expires_at))
                .bind(opt_millis(request.completed_at))
                .bind(request.retrieval_cost)
                .bind(request.error_message.clone())
                .bind(millis(request.created_at))
                .bind(millis(request.updated_at))
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 1 {
                return Ok(RestoreInsert::Created(request.clone()));
            }

            let existing = query(&select)
                .bind(request.repository_id.to_string())
                .bind(request.snapshot_id.as_str())
                .fetch_optional(&self.pool)
                .await?;
            if let Some(row) = existing {
                return Ok(RestoreInsert::Existing(restore_from_row(&row)?));
            }
        }
        Err(StoreError::not_found("active restore request", request.key()))
    }

    async fn get_restore_request(&self, id: Uuid) -> StoreResult<Option<ColdRestoreRequest>> {
        let stmt = format!("SELECT {RESTORE_COLUMNS} FROM cold_restore_requests WHERE id = $1");
        query(&stmt)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .map(|row| restore_from_row(&row))
            .transpose()
    }

    async fn list_restore_requests(&self, org_id: Uuid) -> StoreResult<Vec<ColdRestoreRequest>> {
        let stmt = format!(
            "SELECT {RESTORE_COLUMNS} FROM cold_restore_requests WHERE org_id = $1 \
             ORDER BY created_at, id"
        );
        let rows = query(&stmt)
            .bind(org_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        decode_all(rows, restore_from_row)
    }

    async fn list_active_restores(&self, org_id: Uuid) -> StoreResult<Vec<ColdRestoreRequest>> {
        let stmt = format!(
            "SELECT {RESTORE_COLUMNS} FROM cold_restore_requests \
             WHERE org_id = $1 AND status IN ('pending', 'warming', 'ready') \
             ORDER BY created_at, id"
        );
        let rows = query(&stmt)
            .bind(org_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        decode_all(rows, restore_from_row)
    }

    async fn list_restores_in_status(
        &self,
        org_id: Uuid,
        status: RestoreStatus,
    ) -> StoreResult<Vec<ColdRestoreRequest>> {
        let stmt = format!(
            "SELECT {RESTORE_COLUMNS} FROM cold_restore_requests \
             WHERE org_id = $1 AND status = $2 ORDER BY created_at, id"
        );
        let rows = query(&stmt)
            .bind(org_id.to_string())
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;
        decode_all(rows, restore_from_row)
    }

    async fn update_restore_request(
        &self,
        request: &ColdRestoreRequest,
        expected: RestoreStatus,
    ) -> StoreResult<bool> {
        let result = query(
            r#"
            UPDATE cold_restore_requests SET
                status = $3,
                retrieval_handle = $4,
                estimated_ready_at = $5,
                ready_at = $6,
                expires_at = $7,
                completed_at = $8,
                error_message = $9,
                updated_at = $10
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(request.id.to_string())
        .bind(expected.as_str())
        .bind(request.status.as_str())
        .bind(request.retrieval_handle.clone())
        .bind(opt_millis(request.estimated_ready_at))
        .bind(opt_millis(request.ready_at))
        .bind(opt_millis(request.expires_at))
        .bind(opt_millis(request.completed_at))
        .bind(request.error_message.clone())
        .bind(millis(request.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn expire_ready_restores(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let result = query(
            r#"
            UPDATE cold_restore_requests SET status = 'expired', updated_at = $1
            WHERE status = 'ready' AND expires_at IS NOT NULL AND expires_at < $1
            "#,
        )
        .bind(millis(now))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn upsert_cost_report(&self, report: &TierCostReport) -> StoreResult<TierCostReport> {
        let stmt = format!(
            r#"
            INSERT INTO tier_cost_reports ({REPORT_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (org_id, report_date) DO UPDATE SET
                total_size_bytes = excluded.total_size_bytes,
                current_monthly_cost = excluded.current_monthly_cost,
                optimized_monthly_cost = excluded.optimized_monthly_cost,
                potential_monthly_savings = excluded.potential_monthly_savings,
                tier_breakdown = excluded.tier_breakdown,
                suggestions = excluded.suggestions,
                generated_at = excluded.generated_at
            "#
        );
        query(&stmt)
            .bind(report.id.to_string())
            .bind(report.org_id.to_string())
            .bind(report.report_date.format(REPORT_DATE_FORMAT).to_string())
            .bind(to_i64(report.total_size_bytes))
            .bind(report.current_monthly_cost)
            .bind(report.optimized_monthly_cost)
            .bind(report.potential_monthly_savings)
            .bind(serde_json::to_string(&report.tier_breakdown)?)
            .bind(serde_json::to_string(&report.suggestions)?)
            .bind(millis(report.generated_at))
            .execute(&self.pool)
            .await?;

        self.get_cost_report(report.org_id, report.report_date)
            .await?
            .ok_or_else(|| StoreError::not_found("cost report", report.id))
    }

    async fn get_cost_report(
        &self,
        org_id: Uuid,
        report_date: NaiveDate,
    ) -> StoreResult<Option<TierCostReport>> {
        let stmt = format!(
            "SELECT {REPORT_COLUMNS} FROM tier_cost_reports \
             WHERE org_id = $1 AND report_date = $2"
        );
        query(&stmt)
            .bind(org_id.to_string())
            .bind(report_date.format(REPORT_DATE_FORMAT).to_string())
            .fetch_optional(&self.pool)
            .await?
            .map(|row| report_from_row(&row))
            .transpose()
    }

    async fn list_cost_reports(&self, org_id: Uuid) -> StoreResult<Vec<TierCostReport>> {
        let stmt = format!(
            "SELECT {REPORT_COLUMNS} FROM tier_cost_reports WHERE org_id = $1 \
             ORDER BY report_date DESC"
        );
        let rows = query(&stmt)
            .bind(org_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        decode_all(rows, report_from_row)
    }

    async fn try_acquire_lease(
        &self,
        org_id: Uuid,
        kind: EvaluatorKind,
        holder: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> StoreResult<bool> {
        let result = query(
            r#"
            INSERT INTO evaluation_leases (org_id, kind, holder, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (org_id, kind) DO UPDATE SET
                holder = excluded.holder,
                expires_at = excluded.expires_at
            WHERE evaluation_leases.expires_at <= $5
            "#,
        )
        .bind(org_id.to_string())
        .bind(kind.as_str())
        .bind(holder)
        .bind(millis(now + ttl))
        .bind(millis(now))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn release_lease(
        &self,
        org_id: Uuid,
        kind: EvaluatorKind,
        holder: &str,
    ) -> StoreResult<()> {
        query("DELETE FROM evaluation_leases WHERE org_id = $1 AND kind = $2 AND holder = $3")
            .bind(org_id.to_string())
            .bind(kind.as_str())
            .bind(holder)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        LifecyclePolicy, PolicyStatus, RestorePriority, RetentionRule, Scope, TierType,
        TierUsage, TransitionStatus,
    };
    use std::collections::BTreeMap;

    async fn store() -> SqlStore {
        SqlStore::connect(&DatabaseConfig::in_memory())
            .await
            .expect("in-memory store")
    }

    fn snapshot(org_id: Uuid, id: &str, age_days: i64) -> SnapshotRef {
        SnapshotRef {
            org_id,
            repository_id: Uuid::new_v4(),
            snapshot_id: id.to_string(),
            short_id: id[..id.len().min(8)].to_string(),
            schedule_id: Some(Uuid::new_v4()),
            size_bytes: 5 * 1024 * 1024,
            snapshot_time: DateTime::from_timestamp_millis(
                Utc::now().timestamp_millis() - age_days * 86_400_000,
            )
            .unwrap(),
            tags: vec!["daily".to_string()],
        }
    }

    #[tokio::test]
    async fn test_snapshot_roundtrip_and_hot_tier() {
        let store = store().await;
        let org = Uuid::new_v4();
        let snap = snapshot(org, "abcdef0123", 3);
        store.upsert_snapshot(&snap).await.unwrap();

        assert_eq!(store.list_snapshots(org).await.unwrap(), vec![snap.clone()]);
        let tier = store.get_snapshot_tier(&snap.key()).await.unwrap().unwrap();
        assert_eq!(tier.current_tier, TierType::Hot);
        assert_eq!(tier.schedule_id, snap.schedule_id);
        assert_eq!(store.list_organizations().await.unwrap(), vec![org]);

        store.remove_snapshot(&snap.key()).await.unwrap();
        assert!(store.list_snapshots(org).await.unwrap().is_empty());
        assert!(store.get_snapshot_tier(&snap.key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lock_is_extend_only_and_batched_lookup_filters_repository() {
        let store = store().await;
        let org = Uuid::new_v4();
        let snap = snapshot(org, "s1", 1);
        let now = Utc::now();
        let lock = ImmutabilityLock {
            id: Uuid::new_v4(),
            org_id: org,
            repository_id: snap.repository_id,
            snapshot_id: snap.snapshot_id.clone(),
            locked_at: now,
            locked_until: now + Duration::days(30),
            locked_by: "compliance".to_string(),
            reason: "audit".to_string(),
            provider_lock_enabled: true,
            provider_lock_mode: Some(crate::model::ProviderLockMode::Compliance),
            floor_tier: Some(TierType::Warm),
        };
        store.upsert_lock(&lock).await.unwrap();

        let shorter = ImmutabilityLock {
            id: Uuid::new_v4(),
            locked_until: now + Duration::days(1),
            reason: "renewed".to_string(),
            ..lock.clone()
        };
        let stored = store.upsert_lock(&shorter).await.unwrap();
        assert_eq!(stored.id, lock.id);
        assert_eq!(stored.reason, "renewed");
        assert_eq!(
            stored.locked_until.timestamp_millis(),
            lock.locked_until.timestamp_millis()
        );

        let other_repo = SnapshotKey::new(Uuid::new_v4(), "s1");
        assert!(store.locks_for(&[other_repo]).await.unwrap().is_empty());
        let found = store.locks_for(&[snap.key()]).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].floor_tier, Some(TierType::Warm));
    }

    #[tokio::test]
    async fn test_lock_write_guards_against_stale_merge() {
        let store = store().await;
        let org = Uuid::new_v4();
        let now = Utc::now();
        let lock = |id: &str, at, until, floor| ImmutabilityLock {
            id: Uuid::new_v4(),
            org_id: org,
            repository_id: Uuid::nil(),
            snapshot_id: id.to_string(),
            locked_at: at,
            locked_until: until,
            locked_by: "compliance".to_string(),
            reason: "audit".to_string(),
            provider_lock_enabled: false,
            provider_lock_mode: None,
            floor_tier: floor,
        };

        let held = ImmutabilityLock {
            provider_lock_enabled: true,
            ..lock("held", now, now + Duration::days(30), Some(TierType::Warm))
        };
        store.upsert_lock(&held).await.unwrap();
        store
            .upsert_lock(&lock("default", now, now + Duration::days(30), None))
            .await
            .unwrap();
        store
            .upsert_lock(&lock(
                "lapsed",
                now - Duration::days(10),
                now - Duration::days(1),
                Some(TierType::Warm),
            ))
            .await
            .unwrap();

        // Values merged from a read taken before the rows above were written.
        let mut conn = store.pool().acquire().await.unwrap();
        let stale = lock("held", now, now + Duration::days(5), Some(TierType::Cold));
        let written = SqlStore::write_lock(&mut conn, &stale, now).await.unwrap();
        assert_eq!(
            written.locked_until.timestamp_millis(),
            held.locked_until.timestamp_millis()
        );
        assert_eq!(written.floor_tier, Some(TierType::Warm));
        assert!(written.provider_lock_enabled);

        let stale = lock("default", now, now + Duration::days(30), Some(TierType::Archive));
        let written = SqlStore::write_lock(&mut conn, &stale, now).await.unwrap();
        assert_eq!(written.floor_tier, None);

        let renewal = lock("lapsed", now, now + Duration::days(5), Some(TierType::Cold));
        let written = SqlStore::write_lock(&mut conn, &renewal, now).await.unwrap();
        assert_eq!(
            written.locked_until.timestamp_millis(),
            renewal.locked_until.timestamp_millis()
        );
        assert_eq!(written.floor_tier, Some(TierType::Cold));
    }

    #[tokio::test]
    async fn test_holds_place_and_release() {
        let store = store().await;
        let key = SnapshotKey::new(Uuid::new_v4(), "s1");
        let hold = LegalHold {
            id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            repository_id: key.repository_id,
            snapshot_id: key.snapshot_id.clone(),
            reason: "litigation".to_string(),
            placed_by: "legal".to_string(),
            placed_at: Utc::now(),
        };
        store.place_hold(&hold).await.unwrap();
        assert_eq!(store.holds_for(&[key.clone()]).await.unwrap().len(), 1);

        assert!(store.release_hold(hold.id).await.unwrap());
        assert!(!store.release_hold(hold.id).await.unwrap());
        assert!(store.holds_for(&[key]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_policy_save_keeps_bookkeeping() {
        let store = store().await;
        let now = Utc::now();
        let policy = LifecyclePolicy::new(Uuid::new_v4(), "daily", now)
            .with_status(PolicyStatus::Active)
            .with_scope(Scope::Org)
            .with_rule(RetentionRule {
                name: "30d".to_string(),
                max_age_days: Some(30),
                keep_last: Some(5),
                tag: None,
            });
        store.save_policy(&policy).await.unwrap();

        store
            .record_policy_run(
                policy.id,
                &PolicyRunRecord {
                    evaluated_at: now,
                    deleted: 3,
                    bytes_reclaimed: 300,
                },
            )
            .await
            .unwrap();

        let mut edited = policy.clone();
        edited.status = PolicyStatus::Paused;
        store.save_policy(&edited).await.unwrap();

        let stored = store.get_policy(policy.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PolicyStatus::Paused);
        assert_eq!(stored.deletion_count, 3);
        assert_eq!(stored.bytes_reclaimed, 300);
        assert_eq!(stored.rules, policy.rules);
        assert!(stored.last_deletion_at.is_some());

        let missing = store
            .record_policy_run(
                Uuid::new_v4(),
                &PolicyRunRecord {
                    evaluated_at: now,
                    deleted: 0,
                    bytes_reclaimed: 0,
                },
            )
            .await;
        assert!(matches!(missing, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_transition_lifecycle_and_open_uniqueness() {
        let store = store().await;
        let org = Uuid::new_v4();
        let snap = snapshot(org, "s1", 40);
        store.upsert_snapshot(&snap).await.unwrap();
        let tier = store.get_snapshot_tier(&snap.key()).await.unwrap().unwrap();

        let transition = TierTransition {
            id: Uuid::new_v4(),
            org_id: org,
            snapshot_tier_id: tier.id,
            snapshot_id: tier.snapshot_id.clone(),
            repository_id: tier.repository_id,
            from_tier: TierType::Hot,
            to_tier: TierType::Cold,
            trigger_rule_id: None,
            size_bytes: tier.size_bytes,
            estimated_saving: 0.1,
            status: TransitionStatus::Pending,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        assert!(store.insert_transition(&transition).await.unwrap());
        let duplicate = TierTransition {
            id: Uuid::new_v4(),
            ..transition.clone()
        };
        assert!(!store.insert_transition(&duplicate).await.unwrap());
        assert_eq!(store.list_pending_transitions(10).await.unwrap().len(), 1);

        let now = Utc::now();
        assert!(store.claim_transition(transition.id, now).await.unwrap());
        assert!(!store.claim_transition(transition.id, now).await.unwrap());
        assert!(store.list_pending_transitions(10).await.unwrap().is_empty());

        assert!(store.complete_transition(&transition, now).await.unwrap());
        let stored = store.get_transition(transition.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TransitionStatus::Completed);
        let tier = store.get_snapshot_tier(&snap.key()).await.unwrap().unwrap();
        assert_eq!(tier.current_tier, TierType::Cold);

        assert!(store.insert_transition(&duplicate).await.unwrap());
        assert!(store.claim_transition(duplicate.id, now).await.unwrap());
        assert!(
            store
                .fail_transition(duplicate.id, "provider unavailable", now)
                .await
                .unwrap()
        );
        let failed = store.get_transition(duplicate.id).await.unwrap().unwrap();
        assert_eq!(failed.status, TransitionStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("provider unavailable"));
        assert!(store.list_open_transitions(org).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_restore_dedup_and_expiry_sweep() {
        let store = store().await;
        let now = Utc::now();
        let request = ColdRestoreRequest {
            id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            snapshot_id: "s1".to_string(),
            repository_id: Uuid::new_v4(),
            requested_by: "user".to_string(),
            from_tier: TierType::Archive,
            target_path: Some("/restore".to_string()),
            priority: RestorePriority::Bulk,
            status: RestoreStatus::Pending,
            retrieval_handle: None,
            estimated_ready_at: None,
            ready_at: None,
            expires_at: None,
            completed_at: None,
            retrieval_cost: 2.5,
            error_message: None,
            created_at: now,
            updated_at: now,
        };
        assert!(store.insert_restore_request(&request).await.unwrap().is_created());
        let again = store
            .insert_restore_request(&ColdRestoreRequest {
                id: Uuid::new_v4(),
                ..request.clone()
            })
            .await
            .unwrap();
        assert!(!again.is_created());
        assert_eq!(again.request().id, request.id);

        let mut ready = request.clone();
        ready.status = RestoreStatus::Ready;
        ready.ready_at = Some(now);
        ready.expires_at = Some(now + Duration::hours(1));
        ready.retrieval_cost = 99.0;
        assert!(
            !store
                .update_restore_request(&ready, RestoreStatus::Warming)
                .await
                .unwrap()
        );
        assert!(
            store
                .update_restore_request(&ready, RestoreStatus::Pending)
                .await
                .unwrap()
        );

        assert_eq!(store.expire_ready_restores(now).await.unwrap(), 0);
        let later = now + Duration::hours(2);
        assert_eq!(store.expire_ready_restores(later).await.unwrap(), 1);
        assert_eq!(store.expire_ready_restores(later).await.unwrap(), 0);

        let stored = store.get_restore_request(request.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RestoreStatus::Expired);
        assert_eq!(stored.retrieval_cost, 2.5);

        let fresh = store
            .insert_restore_request(&ColdRestoreRequest {
                id: Uuid::new_v4(),
                ..request.clone()
            })
            .await
            .unwrap();
        assert!(fresh.is_created());
    }

    #[tokio::test]
    async fn test_cost_report_upsert_keeps_single_row() {
        let store = store().await;
        let org = Uuid::new_v4();
        let date = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let mut breakdown = BTreeMap::new();
        breakdown.insert(
            TierType::Hot,
            TierUsage {
                snapshot_count: 2,
                size_bytes: 2048,
                monthly_cost: 1.0,
            },
        );
        let report = TierCostReport {
            id: Uuid::new_v4(),
            org_id: org,
            report_date: date,
            total_size_bytes: 2048,
            current_monthly_cost: 1.0,
            optimized_monthly_cost: 0.5,
            potential_monthly_savings: 0.5,
            tier_breakdown: breakdown,
            suggestions: vec![],
            generated_at: Utc::now(),
        };
        let first = store.upsert_cost_report(&report).await.unwrap();
        let second = store
            .upsert_cost_report(&TierCostReport {
                id: Uuid::new_v4(),
                current_monthly_cost: 3.0,
                ..report.clone()
            })
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.current_monthly_cost, 3.0);
        assert_eq!(store.list_cost_reports(org).await.unwrap().len(), 1);
        assert_eq!(
            second.tier_breakdown.get(&TierType::Hot).map(|u| u.size_bytes),
            Some(2048)
        );
    }

    #[tokio::test]
    async fn test_lease_single_flight() {
        let store = store().await;
        let org = Uuid::new_v4();
        let now = Utc::now();
        let ttl = Duration::minutes(5);

        assert!(
            store
                .try_acquire_lease(org, EvaluatorKind::Tiering, "a", now, ttl)
                .await
                .unwrap()
        );
        assert!(
            !store
                .try_acquire_lease(org, EvaluatorKind::Tiering, "b", now, ttl)
                .await
                .unwrap()
        );
        store
            .release_lease(org, EvaluatorKind::Tiering, "a")
            .await
            .unwrap();
        assert!(
            store
                .try_acquire_lease(org, EvaluatorKind::Tiering, "b", now, ttl)
                .await
                .unwrap()
        );
        assert!(
            store
                .try_acquire_lease(org, EvaluatorKind::Tiering, "c", now + ttl, ttl)
                .await
                .unwrap()
        );
    }
}
