use skr_config::{load_layered_yaml_from_strings, report_unused_keys, ConfigMode, UnusedKeyPolicy};

/// scenario_unused_keys_warn_or_fail
///
/// 1) Unused keys are reported in Warn without erroring.
/// 2) Unused keys fail under Fail.
/// 3) CLI-only keys are unused for the embedded engine surface.
/// 4) Unused pointers are sorted.

#[test]
fn warn_mode_reports_unused_keys_without_error() {
    let yaml = r#"
engine:
  max_passes: 10
unused_section:
  foo: 123
  bar: 456
"#;
    let loaded = load_layered_yaml_from_strings(&[yaml]).expect("config load must succeed");
    let report = report_unused_keys(ConfigMode::Engine, &loaded.config_json, UnusedKeyPolicy::Warn)
        .expect("warn mode must not error");

    assert!(!report.is_clean());
    assert!(report
        .unused_leaf_pointers
        .contains(&"/unused_section/foo".to_string()));
    assert!(report
        .unused_leaf_pointers
        .contains(&"/unused_section/bar".to_string()));
    assert!(!report
        .unused_leaf_pointers
        .contains(&"/engine/max_passes".to_string()));
}

#[test]
fn fail_mode_errors_on_unused_keys() {
    let yaml = r#"
engine:
  max_pases: 10
"#;
    let loaded = load_layered_yaml_from_strings(&[yaml]).expect("config load must succeed");
    let result = report_unused_keys(ConfigMode::Cli, &loaded.config_json, UnusedKeyPolicy::Fail);

    let msg = format!("{:?}", result.err().expect("typo must be flagged"));
    assert!(msg.contains("CONFIG_UNUSED_KEYS"));
    assert!(msg.contains("/engine/max_pases"));
}

#[test]
fn scope_keys_are_only_consumed_by_the_cli() {
    let yaml = r#"
scope:
  account: "111111111111"
  region: "us-east-1"
database:
  url_env: "SKR_DATABASE_URL"
"#;
    let loaded = load_layered_yaml_from_strings(&[yaml]).unwrap();

    let cli = report_unused_keys(ConfigMode::Cli, &loaded.config_json, UnusedKeyPolicy::Fail)
        .expect("cli reads scope and database keys");
    assert!(cli.is_clean());

    let engine =
        report_unused_keys(ConfigMode::Engine, &loaded.config_json, UnusedKeyPolicy::Warn).unwrap();
    assert_eq!(engine.unused_leaf_pointers.len(), 3);
}

#[test]
fn deterministic_unused_pointer_ordering() {
    let yaml = r#"
unused:
  b: 2
  a: 1
"#;
    let loaded = load_layered_yaml_from_strings(&[yaml]).unwrap();
    let report =
        report_unused_keys(ConfigMode::Engine, &loaded.config_json, UnusedKeyPolicy::Warn).unwrap();
    assert_eq!(
        report.unused_leaf_pointers,
        vec!["/unused/a".to_string(), "/unused/b".to_string()]
    );
}
