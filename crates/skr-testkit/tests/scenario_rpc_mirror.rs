//! Scenario: RPCs run once against the provider, then the owning module is
//! mirrored back into the Record Store. A call that fails midway still
//! leaves the store matching what the provider actually holds.

use serde_json::json;
use skr_engine::EngineError;
use skr_mapper::ErrorKind;
use skr_schemas::Direction;
use skr_sim::storage::Bucket;
use skr_testkit::Harness;

async fn with_bucket() -> anyhow::Result<Harness> {
    let h = Harness::new()?;
    h.install(&["storage"]).await?;
    h.buckets().seed(&h.scope, vec![Bucket::new("data")]);
    h.engine.apply(&h.scope).await?;
    h.sim.clear_ops();
    Ok(h)
}

fn stored_object_ids(h: &Harness) -> Vec<String> {
    let mut ids: Vec<String> = h
        .objects()
        .all(&h.scope)
        .into_iter()
        .map(|o| format!("{}/{}", o.bucket, o.key))
        .collect();
    ids.sort();
    ids
}

#[tokio::test]
async fn upload_returns_rows_and_mirrors_new_objects() -> anyhow::Result<()> {
    let h = with_bucket().await?;

    let out = h
        .engine
        .invoke_rpc(&h.scope, "storage", "upload_objects", vec![json!("data"), json!(["x", "y"]), json!("hello")])
        .await?;

    assert_eq!(out.rows.len(), 2);
    assert_eq!(out.rows[0]["key"], json!("x"));
    assert_eq!(out.rows[1]["size"], json!(5));
    assert_eq!(out.mirror.direction, Direction::Sync);
    assert_eq!(out.mirror.counts.created, 2);
    assert_eq!(stored_object_ids(&h), vec!["data/x".to_string(), "data/y".to_string()]);
    Ok(())
}

#[tokio::test]
async fn failed_upload_still_mirrors_partial_progress() -> anyhow::Result<()> {
    let h = with_bucket().await?;
    h.sim
        .inject("put_object", Some("data/b"), 1, ErrorKind::Validation, "AccessDenied");

    let res = h
        .engine
        .invoke_rpc(&h.scope, "storage", "upload_objects", vec![json!("data"), json!(["a", "b", "c"])])
        .await;
    let (rpc, error, mirror) = match res {
        Err(EngineError::Rpc { rpc, error, mirror }) => (rpc, error, mirror),
        other => panic!("expected an rpc failure, got {other:?}"),
    };
    assert_eq!(rpc, "storage.upload_objects");
    assert_eq!(error.step.as_deref(), Some("put_object"));
    assert_eq!(error.entity_id.as_deref(), Some("data/b"));
    assert!(error.message.contains("AccessDenied"));

    let mirror = mirror.expect("mirror ran");
    assert_eq!(mirror.counts.created, 1);
    assert_eq!(stored_object_ids(&h), vec!["data/a".to_string()]);
    assert_eq!(h.sim.ops(), vec!["put_object data/a".to_string()]);
    Ok(())
}

#[tokio::test]
async fn rpc_lookup_and_argument_errors() -> anyhow::Result<()> {
    let h = Harness::new()?;

    let err = h
        .engine
        .invoke_rpc(&h.scope, "storage", "upload_objects", vec![json!("data"), json!("k")])
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotInstalled { .. }), "{err}");

    h.install(&["storage"]).await?;

    let err = h
        .engine
        .invoke_rpc(&h.scope, "storage", "download_objects", vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::RpcNotFound { .. }), "{err}");

    let err = h
        .engine
        .invoke_rpc(&h.scope, "storage", "upload_objects", vec![json!("data")])
        .await
        .unwrap_err();
    match err {
        EngineError::RpcArguments { message, .. } => assert!(message.contains("keys"), "{message}"),
        other => panic!("expected an argument error, got {other}"),
    }

    let err = h
        .engine
        .invoke_rpc(&h.scope, "storage", "upload_objects", vec![json!(7), json!("k")])
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::RpcArguments { .. }), "{err}");
    assert!(h.sim.ops().is_empty(), "nothing reached the provider");
    Ok(())
}
