//! skr-db
//!
//! Postgres persistence: the Record Store for every mapper (one `records`
//! table, fields as jsonb), the installed-module set per scope, and the
//! reconcile run ledger.

use std::collections::BTreeSet;
use std::marker::PhantomData;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use skr_mapper::{AdapterError, Context, ModuleStore, Record, RecordStore, StoreFactory};
use skr_schemas::Scope;
use sqlx::Row;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::debug;
use uuid::Uuid;

pub const ENV_DB_URL: &str = "SKR_DATABASE_URL";

/// Connect to Postgres using SKR_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    connect_from_env_var(ENV_DB_URL).await
}

/// Connect using the URL held in env var `name`.
pub async fn connect_from_env_var(name: &str) -> Result<PgPool> {
    let url = std::env::var(name).with_context(|| format!("missing env var {name}"))?;
    connect(&url).await
}

pub async fn connect(url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;
    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_records_table: bool,
}

/// Connectivity plus schema presence.
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='records'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok: one == 1,
        has_records_table: exists,
    })
}

fn store_err(what: &str, e: impl std::fmt::Display) -> AdapterError {
    AdapterError::store(format!("{what} failed: {e}"))
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Record Store for one (module, kind), scoped per call by `ctx.scope`.
pub struct PgRecordStore<R> {
    pool: PgPool,
    module: &'static str,
    kind: &'static str,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record> PgRecordStore<R> {
    pub fn new(pool: PgPool, module: &'static str, kind: &'static str) -> Self {
        Self {
            pool,
            module,
            kind,
            _record: PhantomData,
        }
    }

    /// Insert or overwrite by internal id, assigning ids to new rows. One
    /// transaction per batch.
    async fn upsert(&self, records: &[R], scope: &Scope) -> Result<Vec<R>, AdapterError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| store_err("begin upsert", e))?;
        let mut out = Vec::with_capacity(records.len());
        for r in records {
            let mut r = r.clone();
            let id = r.internal_id().unwrap_or_else(Uuid::new_v4);
            r.set_internal_id(Some(id));
            let fields = serde_json::to_value(&r).map_err(|e| store_err("serialize record", e))?;
            sqlx::query(
                r#"
                insert into records (internal_id, account, region, module, kind, entity_id, fields)
                values ($1, $2, $3, $4, $5, $6, $7)
                on conflict (internal_id) do update
                  set entity_id = excluded.entity_id,
                      fields = excluded.fields,
                      updated_at_utc = now()
                "#,
            )
            .bind(id)
            .bind(&scope.account)
            .bind(&scope.region)
            .bind(self.module)
            .bind(self.kind)
            .bind(r.natural_id())
            .bind(&fields)
            .execute(&mut *tx)
            .await
            .map_err(|e| store_err("upsert record", e))?;
            out.push(r);
        }
        tx.commit().await.map_err(|e| store_err("commit upsert", e))?;
        debug!(module = self.module, kind = self.kind, n = out.len(), "records upserted");
        Ok(out)
    }
}

#[async_trait::async_trait]
impl<R: Record> RecordStore<R> for PgRecordStore<R> {
    async fn read(&self, ctx: &Context) -> Result<Vec<R>, AdapterError> {
        let rows = sqlx::query(
            r#"
            select internal_id, fields
            from records
            where account = $1 and region = $2 and module = $3 and kind = $4
            order by created_at_utc, internal_id
            "#,
        )
        .bind(&ctx.scope.account)
        .bind(&ctx.scope.region)
        .bind(self.module)
        .bind(self.kind)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_err("read records", e))?;

        rows.into_iter()
            .map(|row| -> Result<R, AdapterError> {
                let id: Uuid = row
                    .try_get("internal_id")
                    .map_err(|e| store_err("decode internal_id", e))?;
                let fields: Value = row
                    .try_get("fields")
                    .map_err(|e| store_err("decode fields", e))?;
                let mut r: R = serde_json::from_value(fields)
                    .map_err(|e| store_err(&format!("deserialize {} record {id}", self.kind), e))?;
                r.set_internal_id(Some(id));
                Ok(r)
            })
            .collect()
    }

    async fn create(&self, records: &[R], ctx: &Context) -> Result<Vec<R>, AdapterError> {
        self.upsert(records, &ctx.scope).await
    }

    async fn update(&self, records: &[R], ctx: &Context) -> Result<Vec<R>, AdapterError> {
        self.upsert(records, &ctx.scope).await
    }

    async fn delete(&self, records: &[R], ctx: &Context) -> Result<(), AdapterError> {
        let ids: Vec<Uuid> = records.iter().filter_map(|r| r.internal_id()).collect();
        if ids.is_empty() {
            return Ok(());
        }
        sqlx::query(
            r#"
            delete from records
            where account = $1 and region = $2 and module = $3 and kind = $4
              and internal_id = any($5)
            "#,
        )
        .bind(&ctx.scope.account)
        .bind(&ctx.scope.region)
        .bind(self.module)
        .bind(self.kind)
        .bind(&ids)
        .execute(&self.pool)
        .await
        .map_err(|e| store_err("delete records", e))?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct PgStoreFactory {
    pool: PgPool,
}

impl PgStoreFactory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl StoreFactory for PgStoreFactory {
    fn store<R: Record>(&self, module: &'static str, kind: &'static str) -> Arc<dyn RecordStore<R>> {
        Arc::new(PgRecordStore::<R>::new(self.pool.clone(), module, kind))
    }
}

// ---------------------------------------------------------------------------
// Installed modules
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PgModuleStore {
    pool: PgPool,
}

impl PgModuleStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ModuleStore for PgModuleStore {
    async fn installed(&self, scope: &Scope) -> Result<BTreeSet<String>, AdapterError> {
        let rows = sqlx::query_as::<_, (String,)>(
            "select module from installed_modules where account = $1 and region = $2",
        )
        .bind(&scope.account)
        .bind(&scope.region)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_err("read installed modules", e))?;
        Ok(rows.into_iter().map(|(m,)| m).collect())
    }

    async fn mark_installed(&self, scope: &Scope, modules: &[String]) -> Result<(), AdapterError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| store_err("begin mark_installed", e))?;
        for m in modules {
            sqlx::query(
                r#"
                insert into installed_modules (account, region, module)
                values ($1, $2, $3)
                on conflict (account, region, module) do nothing
                "#,
            )
            .bind(&scope.account)
            .bind(&scope.region)
            .bind(m)
            .execute(&mut *tx)
            .await
            .map_err(|e| store_err("mark_installed", e))?;
        }
        tx.commit()
            .await
            .map_err(|e| store_err("commit mark_installed", e))?;
        Ok(())
    }

    async fn mark_uninstalled(&self, scope: &Scope, modules: &[String]) -> Result<(), AdapterError> {
        sqlx::query(
            "delete from installed_modules where account = $1 and region = $2 and module = any($3)",
        )
        .bind(&scope.account)
        .bind(&scope.region)
        .bind(modules)
        .execute(&self.pool)
        .await
        .map_err(|e| store_err("mark_uninstalled", e))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Run ledger
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct NewRun {
    pub run_id: Uuid,
    pub scope: Scope,
    pub direction: String, // APPLY | SYNC
    pub status: String,    // CONVERGED | FAILED | CANCELLED
    pub passes: i32,
    pub counts: Value,
    pub config_hash: String,
    pub error: Option<String>,
    pub started_at_utc: DateTime<Utc>,
    pub finished_at_utc: DateTime<Utc>,
}

pub async fn insert_run(pool: &PgPool, run: &NewRun) -> Result<()> {
    sqlx::query(
        r#"
        insert into reconcile_runs (
          run_id, account, region, direction, status, passes, counts, config_hash, error,
          started_at_utc, finished_at_utc
        ) values (
          $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11
        )
        "#,
    )
    .bind(run.run_id)
    .bind(&run.scope.account)
    .bind(&run.scope.region)
    .bind(&run.direction)
    .bind(&run.status)
    .bind(run.passes)
    .bind(&run.counts)
    .bind(&run.config_hash)
    .bind(&run.error)
    .bind(run.started_at_utc)
    .bind(run.finished_at_utc)
    .execute(pool)
    .await
    .context("insert_run failed")?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct RunRow {
    pub run_id: Uuid,
    pub direction: String,
    pub status: String,
    pub passes: i32,
    pub error: Option<String>,
    pub started_at_utc: DateTime<Utc>,
}

/// Newest first.
pub async fn recent_runs(pool: &PgPool, scope: &Scope, limit: i64) -> Result<Vec<RunRow>> {
    let rows = sqlx::query(
        r#"
        select run_id, direction, status, passes, error, started_at_utc
        from reconcile_runs
        where account = $1 and region = $2
        order by started_at_utc desc
        limit $3
        "#,
    )
    .bind(&scope.account)
    .bind(&scope.region)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("recent_runs failed")?;

    rows.into_iter()
        .map(|row| -> Result<RunRow> {
            Ok(RunRow {
                run_id: row.try_get("run_id")?,
                direction: row.try_get("direction")?,
                status: row.try_get("status")?,
                passes: row.try_get("passes")?,
                error: row.try_get("error")?,
                started_at_utc: row.try_get("started_at_utc")?,
            })
        })
        .collect()
}
