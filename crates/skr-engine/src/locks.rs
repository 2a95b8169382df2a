use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use skr_schemas::Scope;
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

/// One async lock per scope. Runs, installs and RPCs on the same scope are
/// serialized within this process; different scopes never wait on each
/// other.
#[derive(Default)]
pub struct ScopeLocks {
    inner: Mutex<HashMap<Scope, Arc<tokio::sync::Mutex<()>>>>,
}

impl ScopeLocks {
    pub async fn acquire(&self, scope: &Scope) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(map.entry(scope.clone()).or_default())
        };
        lock.lock_owned().await
    }
}

#[derive(Debug, Default)]
struct CancelState {
    /// The run currently holding the scope, if any.
    running: Option<Uuid>,
    requested: bool,
}

/// Stops the run in flight on one scope before its next pass. A provider
/// call already in flight is never interrupted.
///
/// A request only ever reaches the run that is active when it is made: with
/// no run in flight `cancel` does nothing, and every run starts clean.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<Mutex<CancelState>>);

impl CancelHandle {
    fn state(&self) -> std::sync::MutexGuard<'_, CancelState> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns false when no run was in flight.
    pub fn cancel(&self) -> bool {
        let mut st = self.state();
        if st.running.is_none() {
            return false;
        }
        st.requested = true;
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.state().requested
    }

    /// Id of the run currently in flight.
    pub fn running(&self) -> Option<Uuid> {
        self.state().running
    }

    /// Claim the handle for `run_id` until the returned guard drops.
    pub(crate) fn begin(&self, run_id: Uuid) -> ActiveRun {
        let mut st = self.state();
        st.running = Some(run_id);
        st.requested = false;
        ActiveRun {
            handle: self.clone(),
            run_id,
        }
    }

    fn requested_for(&self, run_id: Uuid) -> bool {
        let st = self.state();
        st.running == Some(run_id) && st.requested
    }
}

pub(crate) struct ActiveRun {
    handle: CancelHandle,
    run_id: Uuid,
}

impl ActiveRun {
    pub(crate) fn cancelled(&self) -> bool {
        self.handle.requested_for(self.run_id)
    }
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        let mut st = self.handle.state();
        if st.running == Some(self.run_id) {
            *st = CancelState::default();
        }
    }
}

/// One cancel handle per scope, created on first use.
#[derive(Default)]
pub struct CancelHandles {
    inner: Mutex<HashMap<Scope, CancelHandle>>,
}

impl CancelHandles {
    pub fn for_scope(&self, scope: &Scope) -> CancelHandle {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        map.entry(scope.clone()).or_default().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_without_a_run_is_dropped() {
        let h = CancelHandle::default();
        assert!(!h.cancel());
        assert!(!h.is_cancelled());
        let run = h.begin(Uuid::new_v4());
        assert!(!run.cancelled());
    }

    #[test]
    fn request_reaches_the_active_run_and_clears_with_it() {
        let h = CancelHandle::default();
        let run_id = Uuid::new_v4();
        let run = h.begin(run_id);
        assert_eq!(h.running(), Some(run_id));
        assert!(h.cancel());
        assert!(run.cancelled());
        drop(run);
        assert!(!h.is_cancelled());
        assert_eq!(h.running(), None);
    }

    #[test]
    fn handles_are_per_scope() {
        let handles = CancelHandles::default();
        let us = handles.for_scope(&Scope::new("1", "us-east-1"));
        let eu = handles.for_scope(&Scope::new("1", "eu-west-1"));
        let _run = us.begin(Uuid::new_v4());
        assert!(!eu.cancel());
        assert!(!us.is_cancelled());
        assert!(handles.for_scope(&Scope::new("1", "us-east-1")).cancel());
        assert!(us.is_cancelled());
    }
}
