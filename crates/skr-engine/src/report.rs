use chrono::{DateTime, Utc};
use serde::Serialize;
use skr_mapper::RpcRow;
use skr_schemas::{ActionCounts, Direction, PlanRow, Scope};
use uuid::Uuid;

/// What one apply/sync run did.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub scope: Scope,
    pub direction: Direction,
    /// Modules reconciled, producers first.
    pub modules: Vec<String>,
    /// Passes started, including the final one that found nothing to do.
    pub passes: u32,
    pub counts: ActionCounts,
    /// Every change that went through, in the order applied.
    pub affected: Vec<PlanRow>,
    /// Entity operations pushed to a later pass.
    pub deferrals: usize,
    pub started_at_utc: DateTime<Utc>,
    pub finished_at_utc: Option<DateTime<Utc>>,
}

impl RunReport {
    pub(crate) fn begin(run_id: Uuid, scope: Scope, direction: Direction, modules: Vec<String>) -> Self {
        Self {
            run_id,
            scope,
            direction,
            modules,
            passes: 0,
            counts: ActionCounts::default(),
            affected: Vec::new(),
            deferrals: 0,
            started_at_utc: Utc::now(),
            finished_at_utc: None,
        }
    }

    pub(crate) fn absorb(&mut self, applied: Vec<PlanRow>) {
        for row in applied {
            self.counts.record(row.action);
            self.affected.push(row);
        }
    }

    pub(crate) fn finish(&mut self) {
        self.finished_at_utc = Some(Utc::now());
    }

    /// Number of entity changes applied.
    pub fn total_changes(&self) -> usize {
        self.counts.total()
    }

    /// Entity ids touched, as `kind/entity_id`, sorted and unique.
    pub fn affected_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .affected
            .iter()
            .map(|r| format!("{}/{}", r.kind, r.entity_id))
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InstallReport {
    /// Newly installed, producers first. Includes auto-attached dependencies.
    pub installed: Vec<String>,
    /// Dependencies installed without being requested.
    pub auto_attached: Vec<String>,
    /// Requested but already installed.
    pub skipped: Vec<String>,
    /// Cloud state imported for the newly installed modules.
    pub import: Option<RunReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UninstallReport {
    /// Removed, consumers first.
    pub uninstalled: Vec<String>,
    /// Requested but not installed.
    pub skipped: Vec<String>,
    pub records_removed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcOutcome {
    pub rows: Vec<RpcRow>,
    /// The sync run that mirrored the module's cloud state afterwards.
    pub mirror: RunReport,
}
