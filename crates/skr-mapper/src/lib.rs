//! skr-mapper
//!
//! The Mapper/Adapter contract and the plumbing every resource module
//! shares:
//! - `Mapper`, `CloudAdapter`, `RecordStore`: how one resource kind is
//!   identified, compared and mutated on both sides
//! - `Cache` / `Memo`: per-run memoization of desired and observed records
//! - `ErasedMapper`: the object-safe view the engine iterates over
//! - `Registry`: module definitions and their dependency graph
//! - `Rpc`: one-shot imperative actions
//! - `wait_until`, `RetryPolicy`, `UndoStack`: waiter, throttling retry and
//!   compensation primitives for adapters
//!
//! No engine logic lives here; skr-engine drives these types.

pub mod cache;
mod context;
mod erased;
mod error;
mod mapper;
pub mod memo;
mod record;
mod registry;
mod retry;
mod rpc;
mod store;
mod undo;
mod waiter;

pub use cache::{Cache, CacheStats, Namespace};
pub use context::Context;
pub use erased::{EntityError, ErasedMapper, PendingChanges, StepOutcome};
pub use error::{AdapterError, ErrorKind};
pub use mapper::{CloudAdapter, Mapper, RecordStore};
pub use memo::Memo;
pub use record::{entity_id_of, Record, Source};
pub use registry::{ModuleDef, Registry, RegistryError};
pub use retry::RetryPolicy;
pub use rpc::{bind_args, validate_rows, OutputColumn, Rpc, RpcParam, RpcRow};
pub use store::{MemoryModuleStore, MemoryStore, MemoryStoreFactory, ModuleStore, StoreFactory};
pub use undo::UndoStack;
pub use waiter::{wait_until, TerminalStates, WaitState, WaiterConfig};

pub use skr_reconcile::UpdateOrReplace;
