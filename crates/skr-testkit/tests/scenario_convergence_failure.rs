//! Scenario: runs that cannot reach a fixed point fail with the list of
//! still-divergent entities instead of looping. A waiter timeout is a
//! deferral, and the entity converges once the provider catches up. Runs
//! whose final pass finishes the work converge, never fail.

use skr_engine::{ConvergenceReason, EngineError};
use skr_sim::compute::Instance;
use skr_sim::network::SecurityGroup;
use skr_sim::storage::Bucket;
use skr_testkit::{fast_config, Harness};

fn seed_web(h: &Harness) {
    h.groups()
        .seed(&h.scope, vec![SecurityGroup::new("web", "web tier")]);
    h.instances().seed(
        &h.scope,
        vec![Instance::new("web-1", "ami-0001", "t3.micro", "web")],
    );
}

#[tokio::test]
async fn endless_deferral_is_reported_as_a_stall() -> anyhow::Result<()> {
    let h = Harness::new()?;
    h.install(&["compute"]).await?;
    h.sim.set_reference_lag("security_group", 100);
    seed_web(&h);

    let (report, reason, divergent) = match h.engine.apply(&h.scope).await {
        Err(EngineError::Convergence {
            report,
            reason,
            divergent,
        }) => (report, reason, divergent),
        other => panic!("expected a convergence failure, got {other:?}"),
    };
    assert_eq!(reason, ConvergenceReason::Stalled(4));
    assert_eq!(report.passes, 5);
    assert_eq!(report.counts.created, 1, "the group itself went through");
    assert_eq!(divergent.len(), 1);
    assert_eq!(divergent[0].kind, "instance");
    assert!(divergent[0]
        .last_error
        .as_deref()
        .is_some_and(|e| e.contains("not visible yet")));
    assert!(h.sim.region(&h.scope).volumes.is_empty(), "every attempt compensated");
    Ok(())
}

#[tokio::test]
async fn pass_ceiling_stops_the_run() -> anyhow::Result<()> {
    let mut cfg = fast_config();
    cfg.max_passes = 3;
    cfg.stall_limit = 50;
    let h = Harness::with_config(cfg)?;
    h.install(&["compute"]).await?;
    h.sim.set_reference_lag("security_group", 100);
    seed_web(&h);

    let (report, reason) = match h.engine.apply(&h.scope).await {
        Err(EngineError::Convergence { report, reason, .. }) => (report, reason),
        other => panic!("expected a convergence failure, got {other:?}"),
    };
    assert_eq!(reason, ConvergenceReason::PassCeiling(3));
    assert_eq!(report.passes, 3);
    assert!(report.finished_at_utc.is_some());
    Ok(())
}

#[tokio::test]
async fn waiter_timeout_defers_then_converges_later() -> anyhow::Result<()> {
    let h = Harness::new()?;
    h.install(&["compute"]).await?;
    h.groups()
        .seed(&h.scope, vec![SecurityGroup::new("web", "web tier")]);
    h.engine.apply(&h.scope).await?;

    // Far more polls than the waiter allows.
    h.sim.set_launch_polls(1_000);
    h.instances().seed(
        &h.scope,
        vec![Instance::new("web-1", "ami-0001", "t3.micro", "web")],
    );

    let divergent = match h.engine.apply(&h.scope).await {
        Err(EngineError::Convergence { divergent, .. }) => divergent,
        other => panic!("expected a convergence failure, got {other:?}"),
    };
    let last = divergent[0].last_error.as_deref().unwrap_or_default();
    assert!(last.contains("TRANSIENT"), "{last}");
    assert!(last.contains("wait_running"), "{last}");
    assert!(h.sim.list_instances(&h.scope)?.is_empty(), "timed-out launches were torn down");
    assert!(h.sim.region(&h.scope).volumes.is_empty());

    h.sim.set_launch_polls(3);
    let report = h.engine.apply(&h.scope).await?;
    assert_eq!(report.counts.created, 1);
    assert_eq!(
        h.instance_named("web-1").and_then(|i| i.state),
        Some("running".to_string())
    );
    Ok(())
}

#[tokio::test]
async fn child_landing_on_the_stall_boundary_converges() -> anyhow::Result<()> {
    let h = Harness::new()?;
    h.install(&["compute"]).await?;
    // Four deferred launches, as many as the default stall limit.
    h.sim.set_reference_lag("security_group", 4);
    seed_web(&h);

    let report = h.engine.apply(&h.scope).await?;
    assert_eq!(report.counts.created, 2);
    assert_eq!(report.deferrals, 4);
    assert_eq!(report.passes, 6, "five working passes and one that finds nothing");
    assert!(h.instance_named("web-1").and_then(|i| i.instance_id).is_some());
    Ok(())
}

#[tokio::test]
async fn clean_pass_at_the_ceiling_is_verified_not_failed() -> anyhow::Result<()> {
    let mut cfg = fast_config();
    cfg.max_passes = 1;
    let h = Harness::with_config(cfg)?;
    h.install(&["storage"]).await?;
    h.buckets().seed(&h.scope, vec![Bucket::new("b1")]);

    let report = h.engine.apply(&h.scope).await?;
    assert_eq!(report.counts.created, 1);
    assert_eq!(report.passes, 2, "the ceiling pass plus a diff-only check");
    assert_eq!(h.sim.ops(), vec!["create_bucket b1".to_string()]);
    Ok(())
}

#[tokio::test]
async fn ceiling_failure_lists_only_what_was_not_applied() -> anyhow::Result<()> {
    let mut cfg = fast_config();
    cfg.max_passes = 1;
    let h = Harness::with_config(cfg)?;
    h.install(&["compute"]).await?;
    h.sim.set_reference_lag("security_group", 100);
    seed_web(&h);

    let (report, reason, divergent) = match h.engine.apply(&h.scope).await {
        Err(EngineError::Convergence {
            report,
            reason,
            divergent,
        }) => (report, reason, divergent),
        other => panic!("expected a convergence failure, got {other:?}"),
    };
    assert_eq!(reason, ConvergenceReason::PassCeiling(1));
    assert_eq!(report.passes, 1);
    assert_eq!(report.counts.created, 1, "the group went through on that pass");
    let kinds: Vec<&str> = divergent.iter().map(|d| d.kind.as_str()).collect();
    assert_eq!(kinds, vec!["instance"]);
    Ok(())
}
