//! Object-safe view of a [`Mapper`] that the engine drives.
//!
//! Every `Mapper` gets this for free through the blanket impl below, so a
//! module registers `Arc<dyn ErasedMapper>` values without knowing about the
//! engine.

use std::any::Any;
use std::collections::BTreeSet;
use std::slice;

use serde::Serialize;
use skr_reconcile::{classify_apply, diff, ChangeSet, DiffCounts};
use skr_schemas::{Direction, PlanAction, PlanRow};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::{AdapterError, Context, Mapper, Record, Source};

/// One mapper's diff for one pass, waiting to be applied.
pub struct PendingChanges {
    pub module: &'static str,
    pub kind: &'static str,
    /// Cloud is the winning side (sync run, or a cloud-sourced mapper).
    pub cloud_wins: bool,
    pub counts: DiffCounts,
    pub rows: Vec<PlanRow>,
    changes: Box<dyn Any + Send + Sync>,
}

impl PendingChanges {
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

/// A change for one entity that did not go through.
#[derive(Debug, Clone, Serialize)]
pub struct EntityError {
    pub module: String,
    pub kind: String,
    pub entity_id: String,
    pub action: PlanAction,
    pub error: AdapterError,
}

#[derive(Debug, Default)]
pub struct StepOutcome {
    pub applied: Vec<PlanRow>,
    /// Deferrable failures; retried on the next pass.
    pub deferred: Vec<EntityError>,
    /// Permanent failures; the entity is dropped for the rest of the run.
    pub failed: Vec<EntityError>,
}

impl StepOutcome {
    pub fn merge(&mut self, other: StepOutcome) {
        self.applied.extend(other.applied);
        self.deferred.extend(other.deferred);
        self.failed.extend(other.failed);
    }
}

#[async_trait::async_trait]
pub trait ErasedMapper: Send + Sync {
    fn module_name(&self) -> &'static str;

    fn kind_name(&self) -> &'static str;

    fn record_source(&self) -> Source;

    /// Warm the cache with both sides.
    async fn prefetch(&self, ctx: &Context) -> Result<(), AdapterError>;

    /// Diff desired against observed, oriented by the run direction.
    /// Entity ids in `skip` are left out.
    async fn diff(&self, ctx: &Context, skip: &BTreeSet<String>) -> Result<PendingChanges, AdapterError>;

    /// Creates, updates, replacements and adoptions.
    async fn apply_upserts(&self, ctx: &Context, pending: &PendingChanges) -> StepOutcome;

    async fn apply_deletes(&self, ctx: &Context, pending: &PendingChanges) -> StepOutcome;

    /// Remove every stored record of this kind for the scope. Used by uninstall.
    async fn purge(&self, ctx: &Context) -> Result<usize, AdapterError>;
}

// ---------------------------------------------------------------------------
// Outcome bookkeeping
// ---------------------------------------------------------------------------

struct Tally<'a> {
    module: &'static str,
    kind: &'static str,
    cloud_wins: bool,
    out: &'a mut StepOutcome,
}

impl Tally<'_> {
    fn settle(&mut self, action: PlanAction, entity_id: &str, internal_id: Option<Uuid>, res: Result<(), AdapterError>) {
        match res {
            Ok(()) => {
                debug!(module = self.module, kind = self.kind, entity_id, action = %action, "applied");
                self.out.applied.push(plan_row(
                    self.module,
                    self.kind,
                    action,
                    entity_id,
                    internal_id,
                    self.cloud_wins,
                ));
            }
            Err(e) => {
                let e = e.for_entity(self.kind, entity_id);
                let entry = EntityError {
                    module: self.module.to_string(),
                    kind: self.kind.to_string(),
                    entity_id: entity_id.to_string(),
                    action,
                    error: e,
                };
                if entry.error.is_deferrable() {
                    warn!(module = self.module, kind = self.kind, entity_id, action = %action, error = %entry.error, "deferred to next pass");
                    self.out.deferred.push(entry);
                } else {
                    error!(module = self.module, kind = self.kind, entity_id, action = %action, error = %entry.error, "permanent failure");
                    self.out.failed.push(entry);
                }
            }
        }
    }
}

fn describe(action: PlanAction, cloud_wins: bool) -> &'static str {
    match (cloud_wins, action) {
        (true, PlanAction::Create) => "import into record store",
        (true, PlanAction::Update) => "overwrite record from cloud",
        (true, PlanAction::Delete) => "remove record missing from cloud",
        (true, _) => "restore record from cloud",
        (false, PlanAction::Create) => "create in cloud",
        (false, PlanAction::Update) => "update in place",
        (false, PlanAction::Replace) => "create replacement, then delete original",
        (false, PlanAction::Adopt) => "restore record from provider-reserved object",
        (false, PlanAction::Delete) => "delete from cloud",
    }
}

fn plan_row(
    module: &str,
    kind: &str,
    action: PlanAction,
    entity_id: &str,
    internal_id: Option<Uuid>,
    cloud_wins: bool,
) -> PlanRow {
    PlanRow {
        action,
        module: module.to_string(),
        kind: kind.to_string(),
        entity_id: entity_id.to_string(),
        internal_id,
        description: describe(action, cloud_wins).to_string(),
    }
}

fn rows_for<R: Record>(module: &str, kind: &str, cs: &ChangeSet<R>, cloud_wins: bool) -> Vec<PlanRow> {
    let mut rows = Vec::new();
    for (id, r) in &cs.to_create {
        rows.push(plan_row(module, kind, PlanAction::Create, id, r.internal_id(), cloud_wins));
    }
    for (id, d) in &cs.to_update {
        let internal = d.source.internal_id().or(d.target.internal_id());
        rows.push(plan_row(module, kind, PlanAction::Update, id, internal, cloud_wins));
    }
    for (id, d) in &cs.to_replace {
        rows.push(plan_row(module, kind, PlanAction::Replace, id, d.source.internal_id(), cloud_wins));
    }
    for (id, a) in &cs.to_adopt {
        let internal = a.desired.as_ref().and_then(|d| d.internal_id());
        rows.push(plan_row(module, kind, PlanAction::Adopt, id, internal, cloud_wins));
    }
    for (id, r) in &cs.to_delete {
        rows.push(plan_row(module, kind, PlanAction::Delete, id, r.internal_id(), cloud_wins));
    }
    rows
}

/// Stamp `internal_id` onto records returned by the provider so the store
/// updates the existing row instead of inserting a new one.
fn with_internal_id<R: Record>(records: Vec<R>, internal_id: Option<Uuid>) -> Vec<R> {
    records
        .into_iter()
        .map(|mut r| {
            r.set_internal_id(internal_id);
            r
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Blanket impl
// ---------------------------------------------------------------------------

#[async_trait::async_trait]
impl<M: Mapper> ErasedMapper for M {
    fn module_name(&self) -> &'static str {
        Mapper::module(self)
    }

    fn kind_name(&self) -> &'static str {
        Mapper::kind(self)
    }

    fn record_source(&self) -> Source {
        Mapper::source(self)
    }

    async fn prefetch(&self, ctx: &Context) -> Result<(), AdapterError> {
        let memo = ctx.memo(self);
        memo.db_list().await?;
        memo.cloud_list().await?;
        Ok(())
    }

    async fn diff(&self, ctx: &Context, skip: &BTreeSet<String>) -> Result<PendingChanges, AdapterError> {
        let memo = ctx.memo(self);
        let desired = memo.db_list().await?;
        let observed = memo.cloud_list().await?;

        let cloud_wins = ctx.direction == Direction::Sync || Mapper::source(self) == Source::Cloud;
        let id = |r: &M::Record| self.entity_id(r);
        let eq = |a: &M::Record, b: &M::Record| self.equals(a, b);

        let mut changes = if cloud_wins {
            diff(observed, desired, id, eq)
        } else {
            classify_apply(
                diff(desired, observed, id, eq),
                |o: &M::Record, d: &M::Record| self.update_or_replace(o, d),
                |o: &M::Record| self.is_reserved(o),
                |r: &M::Record| self.reserved_key(r),
            )
        };
        changes.retain_ids(|id| !skip.contains(id));

        let module = Mapper::module(self);
        let kind = Mapper::kind(self);
        let counts = changes.counts();
        if !counts.is_empty() {
            debug!(
                module,
                kind,
                create = counts.create,
                update = counts.update,
                replace = counts.replace,
                adopt = counts.adopt,
                delete = counts.delete,
                "diff"
            );
        }
        Ok(PendingChanges {
            module,
            kind,
            cloud_wins,
            counts,
            rows: rows_for(module, kind, &changes, cloud_wins),
            changes: Box::new(changes),
        })
    }

    async fn apply_upserts(&self, ctx: &Context, pending: &PendingChanges) -> StepOutcome {
        let mut out = StepOutcome::default();
        let Some(cs) = pending.changes.downcast_ref::<ChangeSet<M::Record>>() else {
            return out;
        };
        let memo = ctx.memo(self);
        let mut tally = Tally {
            module: pending.module,
            kind: pending.kind,
            cloud_wins: pending.cloud_wins,
            out: &mut out,
        };

        if pending.cloud_wins {
            for (id, observed) in &cs.to_create {
                let res = memo.db_create(slice::from_ref(observed)).await.map(|_| ());
                tally.settle(PlanAction::Create, id, None, res);
            }
            for (id, d) in &cs.to_update {
                let internal = d.target.internal_id();
                let mut restored = d.source.clone();
                restored.set_internal_id(internal);
                let res = memo.db_update(slice::from_ref(&restored)).await.map(|_| ());
                tally.settle(PlanAction::Update, id, internal, res);
            }
            return out;
        }

        for (id, desired) in &cs.to_create {
            let internal = desired.internal_id();
            let res = async {
                let created = ctx
                    .retry
                    .run("create", || memo.cloud_create(slice::from_ref(desired)))
                    .await?;
                memo.db_update(&with_internal_id(created, internal))
                    .await
                    .map_err(|e| e.at_step("persist"))?;
                Ok::<(), AdapterError>(())
            }
            .await;
            tally.settle(PlanAction::Create, id, internal, res);
        }

        for (id, d) in &cs.to_update {
            let internal = d.source.internal_id();
            let res = async {
                let updated = ctx
                    .retry
                    .run("update", || memo.cloud_update(slice::from_ref(&d.source)))
                    .await?;
                memo.db_update(&with_internal_id(updated, internal))
                    .await
                    .map_err(|e| e.at_step("persist"))?;
                Ok::<(), AdapterError>(())
            }
            .await;
            tally.settle(PlanAction::Update, id, internal, res);
        }

        // Create-before-destroy: the replacement exists and is persisted
        // onto the same record before the original is deleted.
        for (id, d) in &cs.to_replace {
            let internal = d.source.internal_id();
            let res = async {
                let created = ctx
                    .retry
                    .run("replace", || memo.cloud_create(slice::from_ref(&d.source)))
                    .await?;
                memo.db_update(&with_internal_id(created, internal))
                    .await
                    .map_err(|e| e.at_step("persist"))?;
                match ctx
                    .retry
                    .run("delete", || memo.cloud_delete(slice::from_ref(&d.target)))
                    .await
                {
                    Ok(()) => Ok::<(), AdapterError>(()),
                    // The original is now observed-only and is deleted on a
                    // later pass.
                    Err(e) if e.is_deferrable() => {
                        warn!(entity_id = %id, error = %e, "original left for a later pass");
                        Ok(())
                    }
                    Err(e) => Err(e.at_step("delete original")),
                }
            }
            .await;
            tally.settle(PlanAction::Replace, id, internal, res);
        }

        for (id, a) in &cs.to_adopt {
            let internal = a.desired.as_ref().and_then(|d| d.internal_id());
            let res = match internal {
                Some(_) => {
                    let mut restored = a.observed.clone();
                    restored.set_internal_id(internal);
                    memo.db_update(slice::from_ref(&restored)).await.map(|_| ())
                }
                None => memo.db_create(slice::from_ref(&a.observed)).await.map(|_| ()),
            };
            tally.settle(PlanAction::Adopt, id, internal, res);
        }

        out
    }

    async fn apply_deletes(&self, ctx: &Context, pending: &PendingChanges) -> StepOutcome {
        let mut out = StepOutcome::default();
        let Some(cs) = pending.changes.downcast_ref::<ChangeSet<M::Record>>() else {
            return out;
        };
        let memo = ctx.memo(self);
        let mut tally = Tally {
            module: pending.module,
            kind: pending.kind,
            cloud_wins: pending.cloud_wins,
            out: &mut out,
        };

        for (id, r) in &cs.to_delete {
            let internal = r.internal_id();
            let res = if pending.cloud_wins {
                memo.db_delete(slice::from_ref(r)).await
            } else {
                ctx.retry
                    .run("delete", || memo.cloud_delete(slice::from_ref(r)))
                    .await
            };
            tally.settle(PlanAction::Delete, id, internal, res);
        }
        out
    }

    async fn purge(&self, ctx: &Context) -> Result<usize, AdapterError> {
        let memo = ctx.memo(self);
        let records = memo.db_list().await?;
        if !records.is_empty() {
            memo.db_delete(&records).await?;
        }
        Ok(records.len())
    }
}
