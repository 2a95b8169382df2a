//! The pass-based reconciliation loop.
//!
//! One pass:
//! 1. flush the cache and prefetch every mapper over a bounded worker pool
//! 2. walk mappers producers-first: diff, then creates / updates /
//!    replacements / adoptions
//! 3. walk the same mappers consumers-first: deletes
//!
//! Passes repeat while anything is pending. A newly created parent can
//! unblock a child deferred earlier, which is why one topological sweep is
//! not enough. The loop stops on a pass with nothing to do, or fails on a
//! stall or the pass ceiling. A pass at the ceiling that applied everything
//! it found is followed by one diff-only sweep, so a run whose last allowed
//! pass finished the work still converges.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use skr_mapper::{
    AdapterError, Context, EntityError, ErasedMapper, ModuleStore, PendingChanges, Registry,
    StepOutcome,
};
use skr_reconcile::{DiffCounts, ProgressTracker};
use skr_schemas::{Direction, Plan, Scope};
use tracing::{debug, info, warn};

use crate::{
    CancelHandle, CancelHandles, ConvergenceReason, DivergentEntity, EngineConfig, EngineError, RunReport,
    ScopeLocks,
};

pub struct Engine {
    pub(crate) registry: Arc<Registry>,
    pub(crate) modules: Arc<dyn ModuleStore>,
    pub(crate) config: EngineConfig,
    pub(crate) locks: ScopeLocks,
    cancel: CancelHandles,
}

fn mapper_key(m: &dyn ErasedMapper) -> String {
    format!("{}::{}", m.module_name(), m.kind_name())
}

impl Engine {
    pub fn new(registry: Arc<Registry>, modules: Arc<dyn ModuleStore>, config: EngineConfig) -> Self {
        Self {
            registry,
            modules,
            config,
            locks: ScopeLocks::default(),
            cancel: CancelHandles::default(),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Handle for stopping the run in flight on `scope` before its next
    /// pass. Runs on other scopes are unaffected.
    pub fn cancel_handle(&self, scope: &Scope) -> CancelHandle {
        self.cancel.for_scope(scope)
    }

    /// Record Store is truth; change the cloud to match.
    pub async fn apply(&self, scope: &Scope) -> Result<RunReport, EngineError> {
        let _guard = self.locks.acquire(scope).await;
        self.run_locked(scope, Direction::Apply, None).await
    }

    /// Cloud is truth; overwrite the Record Store.
    pub async fn sync(&self, scope: &Scope) -> Result<RunReport, EngineError> {
        let _guard = self.locks.acquire(scope).await;
        self.run_locked(scope, Direction::Sync, None).await
    }

    /// Dry run: one diff sweep, nothing executed.
    pub async fn plan(&self, scope: &Scope, direction: Direction) -> Result<Plan, EngineError> {
        let _guard = self.locks.acquire(scope).await;
        let installed = self.installed(scope).await?;
        let mappers = self.registry.mappers(&installed);
        let ctx = self.context(scope, direction);

        if let Some((i, error)) = self.prefetch(&ctx, &mappers).await.into_iter().next() {
            return Err(read_error(mappers[i].as_ref(), error));
        }

        let skip = BTreeSet::new();
        let mut rows = Vec::new();
        for m in &mappers {
            let pending = m
                .diff(&ctx, &skip)
                .await
                .map_err(|e| read_error(m.as_ref(), e))?;
            rows.extend(pending.rows);
        }
        Ok(Plan::new(scope.clone(), direction, rows))
    }

    pub async fn installed(&self, scope: &Scope) -> Result<BTreeSet<String>, EngineError> {
        self.modules
            .installed(scope)
            .await
            .map_err(EngineError::Store)
    }

    pub(crate) fn context(&self, scope: &Scope, direction: Direction) -> Context {
        Context::new(scope.clone(), direction)
            .with_retry(self.config.retry)
            .with_waiter(self.config.waiter)
    }

    /// Read fan-out. Returns the failed mappers by index.
    async fn prefetch(
        &self,
        ctx: &Context,
        mappers: &[Arc<dyn ErasedMapper>],
    ) -> BTreeMap<usize, AdapterError> {
        stream::iter(mappers.iter().enumerate())
            .map(|(i, m)| async move { (i, m.prefetch(ctx).await) })
            .buffer_unordered(self.config.read_workers.max(1))
            .filter_map(|(i, res)| async move { res.err().map(|e| (i, e)) })
            .collect()
            .await
    }

    /// Run passes until convergence. The caller holds the scope lock.
    /// `only` restricts the run to a subset of the installed modules.
    pub(crate) async fn run_locked(
        &self,
        scope: &Scope,
        direction: Direction,
        only: Option<&BTreeSet<String>>,
    ) -> Result<RunReport, EngineError> {
        let installed = self.installed(scope).await?;
        let modules: BTreeSet<String> = match only {
            Some(subset) => installed.intersection(subset).cloned().collect(),
            None => installed,
        };
        let mappers = self.registry.mappers(&modules);
        let ctx = self.context(scope, direction);
        let mut report = RunReport::begin(ctx.run_id, scope.clone(), direction, self.registry.sorted(&modules));
        let active = self.cancel.for_scope(scope).begin(ctx.run_id);

        info!(
            run_id = %ctx.run_id,
            scope = %scope,
            direction = %direction,
            mappers = mappers.len(),
            "run started"
        );

        let empty = BTreeSet::new();
        let mut quarantined: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut failures: Vec<EntityError> = Vec::new();
        let mut last_errors: BTreeMap<(String, String), String> = BTreeMap::new();
        let mut tracker = ProgressTracker::new(self.config.stall_limit);

        loop {
            if active.cancelled() {
                warn!(run_id = %ctx.run_id, passes = report.passes, "run cancelled");
                report.finish();
                return Err(EngineError::Cancelled {
                    report: Box::new(report),
                });
            }

            report.passes += 1;
            let pass = report.passes;
            // Past the ceiling only a clean pass is allowed to be checked.
            let verify_only = pass > self.config.max_passes;
            ctx.cache.clear();
            debug!(run_id = %ctx.run_id, pass, verify_only, "pass started");

            let read_errors = self.prefetch(&ctx, &mappers).await;
            let mut totals = DiffCounts::default();
            let mut outcome = StepOutcome::default();
            let mut pending: Vec<(usize, PendingChanges)> = Vec::new();
            let mut unread: Vec<(String, String, AdapterError)> = Vec::new();

            for (i, m) in mappers.iter().enumerate() {
                let diffed = match read_errors.get(&i) {
                    Some(e) => Err(e.clone()),
                    None => {
                        let skip = quarantined.get(&mapper_key(m.as_ref())).unwrap_or(&empty);
                        m.diff(&ctx, skip).await
                    }
                };
                let changes = match diffed {
                    Ok(p) => p,
                    Err(e) if e.is_deferrable() => {
                        warn!(module = m.module_name(), kind = m.kind_name(), error = %e, "listing not readable, deferring kind");
                        unread.push((m.module_name().to_string(), m.kind_name().to_string(), e));
                        continue;
                    }
                    Err(e) => {
                        report.finish();
                        return Err(read_error(m.as_ref(), e));
                    }
                };
                if changes.is_empty() {
                    continue;
                }
                totals += changes.counts;
                if !verify_only {
                    outcome.merge(m.apply_upserts(&ctx, &changes).await);
                }
                pending.push((i, changes));
            }

            if !verify_only {
                for (i, changes) in pending.iter().rev() {
                    outcome.merge(mappers[*i].apply_deletes(&ctx, changes).await);
                }
            }

            if totals.is_empty() && unread.is_empty() {
                info!(run_id = %ctx.run_id, passes = pass, "converged");
                break;
            }

            if verify_only {
                let reason = ConvergenceReason::PassCeiling(self.config.max_passes);
                let divergent = divergent_entities(&pending, &BTreeSet::new(), &unread, &last_errors, &quarantined);
                warn!(run_id = %ctx.run_id, passes = pass, reason = %reason, divergent = divergent.len(), "convergence failure");
                report.finish();
                return Err(EngineError::Convergence {
                    report: Box::new(report),
                    reason,
                    divergent,
                });
            }

            let StepOutcome {
                applied,
                deferred,
                failed,
            } = outcome;
            info!(
                run_id = %ctx.run_id,
                pass,
                pending = totals.total(),
                applied = applied.len(),
                deferred = deferred.len(),
                failed = failed.len(),
                "pass finished"
            );

            let applied_ids: BTreeSet<(String, String)> = applied
                .iter()
                .map(|r| (format!("{}::{}", r.module, r.kind), r.entity_id.clone()))
                .collect();
            let stalled = tracker.observe(totals, applied.len());
            let unresolved = !(deferred.is_empty() && unread.is_empty());

            report.absorb(applied);
            report.deferrals += deferred.len() + unread.len();
            for d in &deferred {
                last_errors.insert(
                    (format!("{}::{}", d.module, d.kind), d.entity_id.clone()),
                    d.error.to_string(),
                );
            }
            for f in failed {
                quarantined
                    .entry(format!("{}::{}", f.module, f.kind))
                    .or_default()
                    .insert(f.entity_id.clone());
                failures.push(f);
            }

            let reason = if stalled {
                Some(ConvergenceReason::Stalled(self.config.stall_limit))
            } else if pass >= self.config.max_passes && unresolved {
                Some(ConvergenceReason::PassCeiling(self.config.max_passes))
            } else {
                None
            };
            if let Some(reason) = reason {
                let divergent = divergent_entities(&pending, &applied_ids, &unread, &last_errors, &quarantined);
                warn!(run_id = %ctx.run_id, passes = pass, reason = %reason, divergent = divergent.len(), "convergence failure");
                report.finish();
                return Err(EngineError::Convergence {
                    report: Box::new(report),
                    reason,
                    divergent,
                });
            }

            if unresolved && !self.config.pass_delay.is_zero() {
                tokio::time::sleep(self.config.pass_delay).await;
            }
        }

        report.finish();
        info!(
            run_id = %ctx.run_id,
            passes = report.passes,
            changes = report.total_changes(),
            failures = failures.len(),
            "run finished"
        );
        if failures.is_empty() {
            Ok(report)
        } else {
            Err(EngineError::EntityFailures {
                report: Box::new(report),
                failures,
            })
        }
    }
}

fn read_error(m: &dyn ErasedMapper, error: AdapterError) -> EngineError {
    EngineError::Read {
        module: m.module_name().to_string(),
        kind: m.kind_name().to_string(),
        error,
    }
}

/// Entities the last pass diffed but did not apply, with the last error
/// seen for each. Quarantined ones are reported through `EntityFailures`
/// instead and left out here.
fn divergent_entities(
    pending: &[(usize, PendingChanges)],
    applied: &BTreeSet<(String, String)>,
    unread: &[(String, String, AdapterError)],
    last_errors: &BTreeMap<(String, String), String>,
    quarantined: &BTreeMap<String, BTreeSet<String>>,
) -> Vec<DivergentEntity> {
    let mut out = Vec::new();
    for (_, changes) in pending {
        let key = format!("{}::{}", changes.module, changes.kind);
        for row in &changes.rows {
            if quarantined
                .get(&key)
                .is_some_and(|q| q.contains(&row.entity_id))
            {
                continue;
            }
            let id = (key.clone(), row.entity_id.clone());
            if applied.contains(&id) {
                continue;
            }
            out.push(DivergentEntity {
                module: row.module.clone(),
                kind: row.kind.clone(),
                entity_id: row.entity_id.clone(),
                action: row.action,
                last_error: last_errors.get(&id).cloned(),
            });
        }
    }
    for (module, kind, error) in unread {
        out.push(DivergentEntity {
            module: module.clone(),
            kind: kind.clone(),
            entity_id: "*".to_string(),
            action: skr_schemas::PlanAction::Update,
            last_error: Some(error.to_string()),
        });
    }
    out
}
