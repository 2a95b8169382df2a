//! skr-schemas
//!
//! Shared wire types: reconciliation scope, run direction, plan rows and the
//! scalar column types used by RPC signatures. No logic beyond conversions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Version stamped on every dry-run plan.
pub const PLAN_VERSION: u32 = 3;

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

/// Account + region boundary. Runs in different scopes never share state.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub account: String,
    pub region: String,
}

impl Scope {
    pub fn new(account: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            region: region.into(),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.account, self.region)
    }
}

// ---------------------------------------------------------------------------
// Direction
// ---------------------------------------------------------------------------

/// Which side wins a run.
///
/// `Apply`: the Record Store is truth and the cloud is changed to match.
/// `Sync`: the cloud is truth and the Record Store is overwritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Apply,
    Sync,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Apply => "APPLY",
            Direction::Sync => "SYNC",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanAction {
    Create,
    Update,
    Replace,
    Adopt,
    Delete,
}

impl PlanAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanAction::Create => "create",
            PlanAction::Update => "update",
            PlanAction::Replace => "replace",
            PlanAction::Adopt => "adopt",
            PlanAction::Delete => "delete",
        }
    }
}

impl fmt::Display for PlanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One pending (dry run) or applied (run report) change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanRow {
    pub action: PlanAction,
    pub module: String,
    pub kind: String,
    pub entity_id: String,
    pub internal_id: Option<Uuid>,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub version: u32,
    pub scope: Scope,
    pub direction: Direction,
    pub generated_at_utc: DateTime<Utc>,
    pub rows: Vec<PlanRow>,
}

impl Plan {
    pub fn new(scope: Scope, direction: Direction, rows: Vec<PlanRow>) -> Self {
        Self {
            version: PLAN_VERSION,
            scope,
            direction,
            generated_at_utc: Utc::now(),
            rows,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn count(&self, action: PlanAction) -> usize {
        self.rows.iter().filter(|r| r.action == action).count()
    }
}

/// Per-action totals for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionCounts {
    pub created: usize,
    pub updated: usize,
    pub replaced: usize,
    pub adopted: usize,
    pub deleted: usize,
}

impl ActionCounts {
    pub fn record(&mut self, action: PlanAction) {
        match action {
            PlanAction::Create => self.created += 1,
            PlanAction::Update => self.updated += 1,
            PlanAction::Replace => self.replaced += 1,
            PlanAction::Adopt => self.adopted += 1,
            PlanAction::Delete => self.deleted += 1,
        }
    }

    pub fn merge(&mut self, other: &ActionCounts) {
        self.created += other.created;
        self.updated += other.updated;
        self.replaced += other.replaced;
        self.adopted += other.adopted;
        self.deleted += other.deleted;
    }

    pub fn total(&self) -> usize {
        self.created + self.updated + self.replaced + self.adopted + self.deleted
    }
}

// ---------------------------------------------------------------------------
// Scalar column types (RPC parameters and output rows)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    Varchar,
    Integer,
    Boolean,
    Json,
    Timestamp,
}

impl ScalarType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScalarType::Varchar => "varchar",
            ScalarType::Integer => "integer",
            ScalarType::Boolean => "boolean",
            ScalarType::Json => "json",
            ScalarType::Timestamp => "timestamp",
        }
    }

    /// True when `v` is a valid value for a column of this type. Null is
    /// accepted for every type.
    pub fn accepts(&self, v: &Value) -> bool {
        match (self, v) {
            (_, Value::Null) => true,
            (ScalarType::Json, _) => true,
            (ScalarType::Varchar, Value::String(_)) => true,
            (ScalarType::Integer, Value::Number(n)) => n.is_i64(),
            (ScalarType::Boolean, Value::Bool(_)) => true,
            (ScalarType::Timestamp, Value::String(s)) => DateTime::parse_from_rfc3339(s).is_ok(),
            _ => false,
        }
    }

    /// Parse an operator-supplied string (CLI argument) into a typed value.
    pub fn coerce_str(&self, raw: &str) -> Option<Value> {
        match self {
            ScalarType::Varchar => Some(Value::String(raw.to_string())),
            ScalarType::Integer => raw.trim().parse::<i64>().ok().map(Value::from),
            ScalarType::Boolean => match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "t" | "1" => Some(Value::Bool(true)),
                "false" | "f" | "0" => Some(Value::Bool(false)),
                _ => None,
            },
            ScalarType::Json => serde_json::from_str(raw).ok(),
            ScalarType::Timestamp => DateTime::parse_from_rfc3339(raw.trim())
                .ok()
                .map(|_| Value::String(raw.trim().to_string())),
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
