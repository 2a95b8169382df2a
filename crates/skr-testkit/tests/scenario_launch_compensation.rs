//! Scenario: an instance launch is three provider steps (volume, instance,
//! tags). A failure at the last step tears down the first two, newest first,
//! before the error surfaces, and nothing leaks.

use skr_engine::EngineError;
use skr_mapper::ErrorKind;
use skr_sim::compute::Instance;
use skr_sim::network::SecurityGroup;
use skr_testkit::Harness;

#[tokio::test]
async fn failed_tagging_unwinds_instance_then_volume() -> anyhow::Result<()> {
    let h = Harness::new()?;
    h.install(&["compute"]).await?;
    h.groups()
        .seed(&h.scope, vec![SecurityGroup::new("web", "web tier")]);
    h.engine.apply(&h.scope).await?;

    let live_before = h.sim.live_ids(&h.scope);
    h.sim.clear_ops();
    h.sim.inject(
        "create_tags",
        None,
        1,
        ErrorKind::Validation,
        "InvalidParameterValue: tag value too long",
    );
    h.instances().seed(
        &h.scope,
        vec![Instance::new("web-1", "ami-0001", "t3.micro", "web")],
    );

    let (report, failures) = match h.engine.apply(&h.scope).await {
        Err(EngineError::EntityFailures { report, failures }) => (report, failures),
        other => panic!("expected entity failures, got {other:?}"),
    };
    assert_eq!(failures.len(), 1);
    let f = &failures[0];
    assert_eq!(f.kind, "instance");
    assert_eq!(f.error.kind, ErrorKind::Validation);
    assert_eq!(f.error.step.as_deref(), Some("create_tags"));
    assert_eq!(f.error.resource_kind.as_deref(), Some("instance"));
    assert_eq!(f.error.compensated, 2);
    assert_eq!(report.counts.created, 0);

    let ops: Vec<String> = h
        .sim
        .ops()
        .iter()
        .filter_map(|o| o.split(' ').next().map(str::to_string))
        .collect();
    assert_eq!(
        ops,
        vec!["create_volume", "run_instance", "terminate_instance", "delete_volume"],
    );
    assert_eq!(h.sim.live_ids(&h.scope), live_before, "nothing leaked");
    assert!(h.instance_named("web-1").and_then(|i| i.instance_id).is_none());

    // The fault was one-shot; the next run launches cleanly.
    let report = h.engine.apply(&h.scope).await?;
    assert_eq!(report.counts.created, 1);
    assert_eq!(h.sim.list_instances(&h.scope)?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn failed_launch_releases_the_volume() -> anyhow::Result<()> {
    let h = Harness::new()?;
    h.install(&["compute"]).await?;
    h.groups()
        .seed(&h.scope, vec![SecurityGroup::new("web", "web tier")]);
    h.engine.apply(&h.scope).await?;

    h.sim.inject(
        "run_instance",
        None,
        1,
        ErrorKind::Validation,
        "InsufficientInstanceCapacity",
    );
    h.instances().seed(
        &h.scope,
        vec![Instance::new("web-1", "ami-0001", "t3.micro", "web")],
    );

    let failures = match h.engine.apply(&h.scope).await {
        Err(EngineError::EntityFailures { failures, .. }) => failures,
        other => panic!("expected entity failures, got {other:?}"),
    };
    assert_eq!(failures[0].error.step.as_deref(), Some("run_instance"));
    assert_eq!(failures[0].error.compensated, 1);
    assert!(h.sim.region(&h.scope).volumes.is_empty());
    Ok(())
}
