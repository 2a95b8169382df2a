use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use skr_mapper::{AdapterError, EntityError, RegistryError};
use skr_schemas::{PlanAction, Scope};

use crate::RunReport;

/// An entity still out of line when the run gave up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DivergentEntity {
    pub module: String,
    pub kind: String,
    pub entity_id: String,
    pub action: PlanAction,
    /// Most recent deferral reason, when the entity was deferred.
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConvergenceReason {
    /// The pass ceiling was reached.
    PassCeiling(u32),
    /// Diff counts stayed identical for this many passes.
    Stalled(usize),
}

impl fmt::Display for ConvergenceReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConvergenceReason::PassCeiling(n) => write!(f, "pass ceiling of {n} reached"),
            ConvergenceReason::Stalled(n) => write!(f, "no forward progress for {n} passes"),
        }
    }
}

#[derive(Debug)]
pub enum EngineError {
    UnknownModules(Vec<String>),
    NotInstalled {
        scope: Scope,
        modules: Vec<String>,
    },
    /// Uninstall refused: installed modules still depend on the targets.
    DependentsInstalled {
        modules: Vec<String>,
        dependents: BTreeMap<String, Vec<String>>,
    },
    Registry(RegistryError),
    Store(AdapterError),
    /// A mapper's listing could not be read.
    Read {
        module: String,
        kind: String,
        error: AdapterError,
    },
    /// The run converged apart from entities that failed permanently.
    EntityFailures {
        report: Box<RunReport>,
        failures: Vec<EntityError>,
    },
    Convergence {
        report: Box<RunReport>,
        reason: ConvergenceReason,
        divergent: Vec<DivergentEntity>,
    },
    Cancelled {
        report: Box<RunReport>,
    },
    RpcNotFound {
        module: String,
        name: String,
    },
    RpcArguments {
        rpc: String,
        message: String,
    },
    /// The call failed. `mirror` is the sync that ran afterwards anyway.
    Rpc {
        rpc: String,
        error: AdapterError,
        mirror: Option<Box<RunReport>>,
    },
    /// The call succeeded but mirroring its effects failed.
    Mirror {
        rpc: String,
        source: Box<EngineError>,
    },
    RpcOutput {
        rpc: String,
        message: String,
    },
}

impl EngineError {
    /// Run report for errors raised after a run started.
    pub fn report(&self) -> Option<&RunReport> {
        match self {
            EngineError::EntityFailures { report, .. }
            | EngineError::Convergence { report, .. }
            | EngineError::Cancelled { report } => Some(report.as_ref()),
            EngineError::Rpc { mirror, .. } => mirror.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::UnknownModules(ms) => write!(f, "unknown module(s): {}", ms.join(", ")),
            EngineError::NotInstalled { scope, modules } => {
                write!(f, "module(s) not installed in {scope}: {}", modules.join(", "))
            }
            EngineError::DependentsInstalled {
                modules,
                dependents,
            } => {
                let names: Vec<&str> = dependents.keys().map(|k| k.as_str()).collect();
                write!(
                    f,
                    "cannot uninstall {} as {} still depend(s) on one or more of them",
                    modules.join(", "),
                    names.join(", ")
                )
            }
            EngineError::Registry(e) => write!(f, "registry: {e}"),
            EngineError::Store(e) => write!(f, "store: {e}"),
            EngineError::Read { module, kind, error } => {
                write!(f, "reading {module}::{kind} failed: {error}")
            }
            EngineError::EntityFailures { failures, .. } => {
                write!(f, "{} entity operation(s) failed permanently", failures.len())?;
                for e in failures.iter().take(8) {
                    write!(f, "; {} {}: {}", e.action, e.entity_id, e.error)?;
                }
                Ok(())
            }
            EngineError::Convergence {
                reason, divergent, ..
            } => {
                write!(f, "did not converge ({reason}); still divergent:")?;
                for d in divergent.iter().take(8) {
                    write!(f, " {}/{} ({})", d.kind, d.entity_id, d.action)?;
                }
                if divergent.len() > 8 {
                    write!(f, " and {} more", divergent.len() - 8)?;
                }
                Ok(())
            }
            EngineError::Cancelled { report } => {
                write!(f, "run cancelled after {} pass(es)", report.passes)
            }
            EngineError::RpcNotFound { module, name } => write!(f, "no rpc {module}.{name}"),
            EngineError::RpcArguments { rpc, message } => write!(f, "rpc {rpc}: {message}"),
            EngineError::Rpc { rpc, error, .. } => write!(f, "rpc {rpc} failed: {error}"),
            EngineError::Mirror { rpc, source } => {
                write!(f, "rpc {rpc} succeeded but mirroring failed: {source}")
            }
            EngineError::RpcOutput { rpc, message } => {
                write!(f, "rpc {rpc} returned malformed rows: {message}")
            }
        }
    }
}

impl std::error::Error for EngineError {}

impl From<RegistryError> for EngineError {
    fn from(e: RegistryError) -> Self {
        EngineError::Registry(e)
    }
}
