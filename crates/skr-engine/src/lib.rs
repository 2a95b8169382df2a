//! skr-engine
//!
//! Reconciliation engine for one scope (account + region):
//! - `apply` / `sync`: pass-based diff-and-apply until convergence
//! - `plan`: dry run
//! - `install` / `uninstall`: module lifecycle with dependency handling
//! - `invoke_rpc`: one-shot actions mirrored back into the Record Store
//!
//! The engine depends on nothing more specific than the Mapper contract in
//! skr-mapper. Runs on the same scope are serialized in-process; across
//! processes that remains the caller's job.

mod config;
mod engine;
mod error;
mod lifecycle;
mod locks;
mod report;
mod rpc;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{ConvergenceReason, DivergentEntity, EngineError};
pub use locks::{CancelHandle, CancelHandles, ScopeLocks};
pub use report::{InstallReport, RpcOutcome, RunReport, UninstallReport};
