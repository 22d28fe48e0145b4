//! Tier rule evaluation: ordering, min-copies and duplicate suppression

use anyhow::Result;
use common::model::{TierType, TransitionStatus};
use common::store::Store;
use tests_integration::fixtures::LifecycleTestContext;
use uuid::Uuid;

#[tokio::test]
async fn test_min_copies_keeps_last_hot_copies() -> Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();

    let ctx = LifecycleTestContext::new_in_memory().await?;
    ctx.add_pricing().await?;
    let schedule = Uuid::new_v4();
    for id in ["nightly-1", "nightly-2"] {
        ctx.register(ctx.fixture(id, 40).in_schedule(schedule).build())
            .await?;
    }
    ctx.tier_rule("hot-to-warm", TierType::Hot, TierType::Warm, 30, 2, 1)
        .await?;

    let outcome = ctx.tiering().evaluate(ctx.org_id).await?;

    assert!(outcome.transitions.is_empty());
    assert_eq!(outcome.skipped_min_copies, 2);
    assert!(ctx.store.list_transitions(ctx.org_id).await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_min_copies_moves_oldest_surplus_copy() -> Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();

    let ctx = LifecycleTestContext::new_in_memory().await?;
    ctx.add_pricing().await?;
    let schedule = Uuid::new_v4();
    for (id, age) in [("nightly-1", 60), ("nightly-2", 45), ("nightly-3", 40)] {
        ctx.register(ctx.fixture(id, age).in_schedule(schedule).build())
            .await?;
    }
    ctx.tier_rule("hot-to-cold", TierType::Hot, TierType::Cold, 30, 2, 1)
        .await?;

    let outcome = ctx.tiering().evaluate(ctx.org_id).await?;

    let planned: Vec<&str> = outcome
        .transitions
        .iter()
        .map(|t| t.snapshot_id.as_str())
        .collect();
    assert_eq!(planned, vec!["nightly-1"]);
    assert_eq!(outcome.skipped_min_copies, 2);

    Ok(())
}

#[tokio::test]
async fn test_lowest_priority_rule_wins_and_is_not_duplicated() -> Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();

    let ctx = LifecycleTestContext::new_in_memory().await?;
    ctx.add_pricing().await?;
    ctx.add_snapshot("snap-90", 90).await?;
    ctx.tier_rule("deep", TierType::Hot, TierType::Archive, 60, 0, 5)
        .await?;
    let warm = ctx
        .tier_rule("warm", TierType::Hot, TierType::Warm, 30, 0, 1)
        .await?;

    let first = ctx.tiering().evaluate(ctx.org_id).await?;
    assert_eq!(first.transitions.len(), 1);
    let transition = &first.transitions[0];
    assert_eq!(transition.to_tier, TierType::Warm);
    assert_eq!(transition.trigger_rule_id, Some(warm.id));
    assert_eq!(transition.status, TransitionStatus::Pending);
    assert!((transition.estimated_saving - (0.023 - 0.0125)).abs() < 1e-9);

    let second = ctx.tiering().evaluate(ctx.org_id).await?;
    assert!(second.transitions.is_empty());
    assert_eq!(second.skipped_in_flight, 1);
    assert_eq!(ctx.store.list_transitions(ctx.org_id).await?.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_rules_chain_across_ticks() -> Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();

    let ctx = LifecycleTestContext::new_in_memory().await?;
    ctx.add_pricing().await?;
    ctx.add_snapshot("snap-120", 120).await?;
    ctx.tier_rule("warm", TierType::Hot, TierType::Warm, 30, 0, 1)
        .await?;
    ctx.tier_rule("cold", TierType::Warm, TierType::Cold, 90, 0, 2)
        .await?;

    ctx.tiering().evaluate(ctx.org_id).await?;
    ctx.worker().drain_once().await?;
    assert_eq!(ctx.tier_of("snap-120").await?, Some(TierType::Warm));

    let outcome = ctx.tiering().evaluate(ctx.org_id).await?;
    assert_eq!(outcome.transitions.len(), 1);
    assert_eq!(outcome.transitions[0].from_tier, TierType::Warm);
    ctx.worker().drain_once().await?;
    assert_eq!(ctx.tier_of("snap-120").await?, Some(TierType::Cold));

    let history = ctx.admin().transition_history(ctx.org_id).await?;
    assert_eq!(history.len(), 2);
    assert!(
        history
            .iter()
            .all(|t| t.status == TransitionStatus::Completed)
    );

    Ok(())
}

#[tokio::test]
async fn test_failed_move_leaves_tier_unchanged() -> Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();

    let ctx = LifecycleTestContext::new_in_memory().await?;
    ctx.add_snapshot("snap-60", 60).await?;
    ctx.tier_rule("cold", TierType::Hot, TierType::Cold, 30, 0, 1)
        .await?;
    ctx.recorder.fail_moves_for(&ctx.key("snap-60"));

    ctx.tiering().evaluate(ctx.org_id).await?;
    let drained = ctx.worker().drain_once().await?;

    assert_eq!(drained.failed, 1);
    assert_eq!(ctx.tier_of("snap-60").await?, Some(TierType::Hot));
    let failed = ctx.store.list_transitions(ctx.org_id).await?;
    assert_eq!(failed[0].status, TransitionStatus::Failed);
    assert!(failed[0].error_message.is_some());

    // A failed transition no longer blocks planning
    let retry = ctx.tiering().evaluate(ctx.org_id).await?;
    assert_eq!(retry.transitions.len(), 1);

    Ok(())
}
