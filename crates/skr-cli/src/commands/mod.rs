//! Shared wiring for commands that touch a scope: config, scope
//! resolution, the simulated provider, the Record Store and the engine.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use skr_config::{report_unused_keys, ConfigMode, LoadedConfig, UnusedKeyPolicy};
use skr_engine::{Engine, EngineConfig, EngineError, RunReport};
use skr_schemas::Scope;
use skr_sim::SimCloud;
use sqlx::PgPool;
use tracing::{info, warn};

pub mod catalog;

/// Load layered config, or an empty one when no paths were given.
pub fn load_config(paths: &[String]) -> Result<LoadedConfig> {
    if paths.is_empty() {
        return LoadedConfig::empty();
    }
    let refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
    let loaded = skr_config::load_layered_yaml(&refs)?;
    let report = report_unused_keys(ConfigMode::Cli, &loaded.config_json, UnusedKeyPolicy::Warn)?;
    for p in &report.unused_leaf_pointers {
        warn!(pointer = %p, "config key is not read by skr");
    }
    Ok(loaded)
}

/// Flags win over `/scope/*` in config.
pub fn resolve_scope(cfg: &Value, account: Option<&str>, region: Option<&str>) -> Result<Scope> {
    let pick = |flag: Option<&str>, ptr: &str, name: &str| -> Result<String> {
        flag.map(str::to_string)
            .or_else(|| cfg.pointer(ptr).and_then(Value::as_str).map(str::to_string))
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| anyhow!("no {name}: pass --{name} or set {ptr} in config"))
    };
    Ok(Scope::new(
        pick(account, "/scope/account", "account")?,
        pick(region, "/scope/region", "region")?,
    ))
}

pub async fn connect(cfg: &Value) -> Result<PgPool> {
    let env = cfg
        .pointer("/database/url_env")
        .and_then(Value::as_str)
        .unwrap_or(skr_db::ENV_DB_URL);
    skr_db::connect_from_env_var(env).await
}

pub struct Session {
    pub scope: Scope,
    pub engine: Engine,
    sim: SimCloud,
    sim_path: PathBuf,
    pool: PgPool,
    config_hash: String,
}

impl Session {
    pub async fn open(
        config_paths: &[String],
        account: Option<&str>,
        region: Option<&str>,
        sim_state: &Path,
    ) -> Result<Self> {
        let loaded = load_config(config_paths)?;
        let scope = resolve_scope(&loaded.config_json, account, region)?;
        let engine_cfg = EngineConfig::from_config_json(&loaded.config_json)?;

        let pool = connect(&loaded.config_json).await?;
        skr_db::migrate(&pool).await?;

        let sim = SimCloud::load_or_new(sim_state)?;
        let stores = skr_db::PgStoreFactory::new(pool.clone());
        let registry = skr_sim::registry(&sim, &stores).context("module registry is invalid")?;
        let engine = Engine::new(
            Arc::new(registry),
            Arc::new(skr_db::PgModuleStore::new(pool.clone())),
            engine_cfg,
        );
        info!(scope = %scope, config_hash = %loaded.config_hash, "session opened");

        Ok(Self {
            scope,
            engine,
            sim,
            sim_path: sim_state.to_path_buf(),
            pool,
            config_hash: loaded.config_hash,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Persist provider state, then append `run` to the ledger. Provider
    /// state goes first: a ledger failure must not lose mutations the run
    /// already made.
    pub async fn conclude(&self, run: Option<Result<&RunReport, &EngineError>>) -> Result<()> {
        self.save_sim()?;
        match run {
            Some(outcome) => self.record(outcome).await,
            None => Ok(()),
        }
    }

    /// Persist simulated provider state. Called whether or not the command
    /// succeeded, since a failed run may still have changed the provider.
    pub fn save_sim(&self) -> Result<()> {
        if let Some(dir) = self.sim_path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create sim state dir failed: {}", dir.display()))?;
        }
        self.sim.save(&self.sim_path)
    }

    /// Append the run to the ledger. Errors that never started a run
    /// (unknown modules, registry problems) are not recorded.
    async fn record(&self, outcome: Result<&RunReport, &EngineError>) -> Result<()> {
        let (report, status, error) = match outcome {
            Ok(r) => (r, "CONVERGED", None),
            Err(e) => match e.report() {
                Some(r) if matches!(e, EngineError::Cancelled { .. }) => (r, "CANCELLED", Some(e.to_string())),
                Some(r) => (r, "FAILED", Some(e.to_string())),
                None => return Ok(()),
            },
        };
        let run = skr_db::NewRun {
            run_id: report.run_id,
            scope: report.scope.clone(),
            direction: report.direction.as_str().to_string(),
            status: status.to_string(),
            passes: i32::try_from(report.passes).unwrap_or(i32::MAX),
            counts: serde_json::to_value(&report.counts)?,
            config_hash: self.config_hash.clone(),
            error,
            started_at_utc: report.started_at_utc,
            finished_at_utc: report.finished_at_utc.unwrap_or(report.started_at_utc),
        };
        skr_db::insert_run(&self.pool, &run).await.map_err(|e| {
            warn!(run_id = %run.run_id, error = %e, "run ledger write failed");
            e
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use skr_mapper::{MemoryModuleStore, MemoryStoreFactory};
    use sqlx::postgres::PgPoolOptions;
    use std::time::Duration;

    /// Session over an in-memory catalog and a database nobody listens on.
    fn offline_session(sim_path: &Path) -> Result<Session> {
        let sim = SimCloud::new();
        let registry = skr_sim::registry(&sim, &MemoryStoreFactory::new())?;
        let engine = Engine::new(
            Arc::new(registry),
            Arc::new(MemoryModuleStore::new()),
            EngineConfig::default(),
        );
        let pool = PgPoolOptions::new()
            .acquire_timeout(Duration::from_millis(200))
            .connect_lazy("postgres://skr@127.0.0.1:1/skr")?;
        Ok(Session {
            scope: Scope::new("111", "us-east-1"),
            engine,
            sim,
            sim_path: sim_path.to_path_buf(),
            pool,
            config_hash: String::new(),
        })
    }

    #[tokio::test]
    async fn provider_state_is_saved_even_when_the_ledger_write_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("sim.json");
        let s = offline_session(&path).unwrap();

        let report = s.engine.apply(&s.scope).await.unwrap();
        assert!(s.conclude(Some(Ok(&report))).await.is_err(), "ledger is unreachable");
        assert!(path.exists(), "provider state written before the ledger");
        assert!(SimCloud::load(&path).is_ok());
    }

    #[test]
    fn flags_override_config_scope() {
        let cfg = json!({"scope": {"account": "111", "region": "us-east-1"}});
        let s = resolve_scope(&cfg, None, Some("eu-west-1")).unwrap();
        assert_eq!(s, Scope::new("111", "eu-west-1"));
    }

    #[test]
    fn missing_scope_is_an_error() {
        let err = resolve_scope(&json!({}), Some("111"), None).unwrap_err();
        assert!(err.to_string().contains("--region"));
    }
}
