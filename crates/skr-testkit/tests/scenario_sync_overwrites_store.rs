//! Scenario: sync makes the cloud authoritative. Cloud edits, cloud-only
//! objects and store-only records are all resolved in the store without a
//! single provider mutation.

use skr_sim::iam::Role;
use skr_testkit::{policy, Harness};

#[tokio::test]
async fn sync_pulls_cloud_state_into_the_store() -> anyhow::Result<()> {
    let h = Harness::new()?;
    h.sim
        .create_role(&h.scope, "r-keep", &policy("s3:GetObject"), None)?;
    h.install(&["iam"]).await?;
    let keep_id = h
        .roles()
        .all(&h.scope)
        .into_iter()
        .find(|r| r.name == "r-keep")
        .and_then(|r| r.internal_id);

    h.sim
        .update_role_policy(&h.scope, "r-keep", &policy("s3:PutObject"))?;
    h.sim
        .create_role(&h.scope, "r-cloud", &policy("sqs:SendMessage"), Some("queue writer"))?;
    h.roles()
        .seed(&h.scope, vec![Role::new("r-store", &policy("ec2:Describe*"))]);
    h.sim.clear_ops();

    let report = h.engine.sync(&h.scope).await?;
    assert_eq!(report.counts.updated, 1);
    assert_eq!(report.counts.created, 1);
    assert_eq!(report.counts.deleted, 1);
    assert!(h.sim.ops().is_empty());

    let mut stored = h.roles().all(&h.scope);
    stored.sort_by(|a, b| a.name.cmp(&b.name));
    let names: Vec<&str> = stored.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["r-cloud", "r-keep"]);

    let keep = &stored[1];
    assert_eq!(keep.internal_id, keep_id, "sync keeps record identity");
    assert!(keep.policy_document.contains("s3:PutObject"));
    assert_eq!(stored[0].description.as_deref(), Some("queue writer"));

    assert_eq!(h.engine.sync(&h.scope).await?.total_changes(), 0);
    Ok(())
}
