//! skr-reconcile
//!
//! Diff-and-classify core of the reconciliation loop.
//!
//! - `diff` partitions a source and a target record set by entity id into
//!   create / update / delete.
//! - `classify_apply` splits divergent pairs into in-place updates and
//!   replacements, and routes provider-reserved objects to adoption.
//! - `ProgressTracker` detects passes that stop making headway.
//!
//! Deterministic, pure logic. No IO. No provider calls.

mod engine;
mod progress;
mod types;

pub use engine::{classify_apply, diff};
pub use progress::{ProgressTracker, DEFAULT_STALL_LIMIT};
pub use types::*;
