use predicates::prelude::*;

/// The catalog listing needs no database: producers come before consumers
/// and every RPC is shown with its parameters.
#[test]
fn modules_lists_catalog_in_dependency_order() -> anyhow::Result<()> {
    let out = assert_cmd::Command::cargo_bin("skr")?
        .args(["modules"])
        .env_remove("SKR_DATABASE_URL")
        .output()?;
    assert!(out.status.success());
    let stdout = String::from_utf8(out.stdout)?;

    let pos = |m: &str| stdout.find(&format!("module={m} ")).expect(m);
    assert!(pos("network") < pos("compute"));
    assert!(stdout.contains("depends_on=network"));
    assert!(stdout.contains("upload_objects(bucket"));
    assert!(!stdout.contains("installed="));
    Ok(())
}

#[test]
fn rpc_without_database_fails_before_touching_state() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    assert_cmd::Command::cargo_bin("skr")?
        .args(["rpc", "nosuch", "thing", "--account", "111", "--region", "us-east-1"])
        .arg("--sim-state")
        .arg(dir.path().join("sim.json"))
        .env_remove("SKR_DATABASE_URL")
        .assert()
        .failure()
        .stderr(predicate::str::contains("SKR_DATABASE_URL"));
    assert!(!dir.path().join("sim.json").exists());
    Ok(())
}
