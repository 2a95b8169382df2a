//! Scenario: desired and observed agree on a role; the desired policy then
//! changes. The divergence is an update, not a replace, and a re-read of the
//! provider shows the new policy.

use skr_schemas::{Direction, PlanAction};
use skr_testkit::{policy, Harness};

#[tokio::test]
async fn policy_change_is_applied_in_place() -> anyhow::Result<()> {
    let h = Harness::new()?;
    let p1 = policy("s3:GetObject");
    let p2 = policy("s3:PutObject");
    h.sim.create_role(&h.scope, "r1", &p1, None)?;
    h.sim.clear_ops();

    let installed = h.install(&["iam"]).await?;
    let imported = installed.import.expect("import report");
    assert_eq!(imported.counts.created, 1);

    let arn_before = h.roles().all(&h.scope)[0].arn.clone();
    assert!(arn_before.is_some());

    h.roles().edit(&h.scope, |r| r.policy_document = p2.clone());

    let plan = h.engine.plan(&h.scope, Direction::Apply).await?;
    assert_eq!(plan.count(PlanAction::Update), 1);
    assert_eq!(plan.count(PlanAction::Replace), 0);

    let report = h.engine.apply(&h.scope).await?;
    assert_eq!(report.counts.updated, 1);
    assert_eq!(report.counts.replaced, 0);
    assert_eq!(h.sim.ops(), vec!["update_role_policy r1".to_string()]);

    let observed = h.sim.region(&h.scope).roles["r1"].clone();
    assert_eq!(observed.policy_document, p2);
    assert_eq!(Some(observed.arn), arn_before, "same role, not a new one");
    Ok(())
}

#[tokio::test]
async fn formatting_only_policy_difference_is_not_a_change() -> anyhow::Result<()> {
    let h = Harness::new()?;
    h.install(&["iam"]).await?;
    h.sim
        .create_role(&h.scope, "r1", r#"{"Version":"2012-10-17","Statement":[]}"#, None)?;
    h.engine.sync(&h.scope).await?;

    h.roles().edit(&h.scope, |r| {
        r.policy_document = "{ \"Statement\": [], \"Version\": \"2012-10-17\" }".to_string()
    });
    let plan = h.engine.plan(&h.scope, Direction::Apply).await?;
    assert!(plan.is_empty());
    Ok(())
}
