//! Consumed-pointer registry and the unused-key guard.
//!
//! A consumed pointer is a JSON Pointer prefix: "/engine" would consume
//! "/engine/max_passes" but not "/engines/x". Any leaf of the effective
//! config not under a consumed prefix for the surface being started is
//! reported as unused. Callers decide whether that warns or fails.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

use crate::leaves;

/// Which binary surface is reading the config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigMode {
    /// Embedded engine: tuning knobs only.
    Engine,
    /// `skr` CLI: engine knobs plus scope and database wiring.
    Cli,
}

impl ConfigMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigMode::Engine => "ENGINE",
            ConfigMode::Cli => "CLI",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnusedKeyPolicy {
    Warn,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnusedKeyReport {
    pub mode: String,
    /// Sorted, unique.
    pub consumed_prefixes: Vec<String>,
    /// Sorted.
    pub unused_leaf_pointers: Vec<String>,
}

impl UnusedKeyReport {
    pub fn is_clean(&self) -> bool {
        self.unused_leaf_pointers.is_empty()
    }
}

// Reads as of today:
// - skr-engine::EngineConfig::from_config_json: /engine/*, /retry/*, /waiter/*
// - skr-cli: /scope/account, /scope/region, /database/url_env
static ENGINE: &[&str] = &[
    "/engine/max_passes",
    "/engine/stall_limit",
    "/engine/read_workers",
    "/engine/pass_delay_ms",
    "/retry/max_attempts",
    "/retry/backoff_ms",
    "/waiter/poll_interval_ms",
    "/waiter/max_wait_ms",
];

static CLI_ONLY: &[&str] = &["/scope/account", "/scope/region", "/database/url_env"];

/// Pointers a surface actually reads. Only list what code reads.
pub fn consumed_pointers_for_mode(mode: ConfigMode) -> Vec<&'static str> {
    match mode {
        ConfigMode::Engine => ENGINE.to_vec(),
        ConfigMode::Cli => ENGINE.iter().chain(CLI_ONLY.iter()).copied().collect(),
    }
}

/// With `UnusedKeyPolicy::Fail`, any unused leaf is an error.
pub fn report_unused_keys(
    mode: ConfigMode,
    config_json: &Value,
    policy: UnusedKeyPolicy,
) -> Result<UnusedKeyReport> {
    let consumed: BTreeSet<String> = consumed_pointers_for_mode(mode)
        .into_iter()
        .map(normalize_pointer)
        .collect();
    let consumed_prefixes: Vec<String> = consumed.into_iter().collect();

    let mut unused: Vec<String> = leaves(config_json)
        .into_iter()
        .map(|(pointer, _)| pointer)
        .filter(|lp| !consumed_prefixes.iter().any(|cp| is_prefix_pointer(cp, lp)))
        .collect();
    unused.sort();
    unused.dedup();

    let report = UnusedKeyReport {
        mode: mode.as_str().to_string(),
        consumed_prefixes,
        unused_leaf_pointers: unused,
    };

    if policy == UnusedKeyPolicy::Fail && !report.is_clean() {
        let shown: Vec<&String> = report.unused_leaf_pointers.iter().take(12).collect();
        bail!(
            "CONFIG_UNUSED_KEYS mode={} count={}: skr reads none of {:?}",
            report.mode,
            report.unused_leaf_pointers.len(),
            shown
        );
    }

    Ok(report)
}

/// Leading "/" enforced, trailing "/" dropped (except the root).
fn normalize_pointer(p: &str) -> String {
    let body = p.trim().trim_matches('/');
    format!("/{body}")
}

/// "/a/b" consumes "/a/b" and "/a/b/c" but not "/a/bc". "/" consumes all.
fn is_prefix_pointer(prefix: &str, leaf: &str) -> bool {
    prefix == "/"
        || match leaf.strip_prefix(prefix) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
}
