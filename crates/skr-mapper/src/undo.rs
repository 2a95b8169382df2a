//! Compensation stack for multi-step creates.
//!
//! Each successful step pushes a closure that undoes it. On failure the
//! stack is unwound in reverse order before the error is re-raised.

use std::future::Future;

use futures_util::future::BoxFuture;
use tracing::{info, warn};

use crate::AdapterError;

type UndoFn = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), AdapterError>> + Send>;

#[derive(Default)]
pub struct UndoStack {
    steps: Vec<(String, UndoFn)>,
}

impl UndoStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<F, Fut>(&mut self, label: impl Into<String>, undo: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), AdapterError>> + Send + 'static,
    {
        self.steps
            .push((label.into(), Box::new(move || Box::pin(undo()) as BoxFuture<'static, _>)));
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// All steps succeeded; nothing to undo.
    pub fn commit(mut self) {
        self.steps.clear();
    }

    /// Run undo closures newest first. Returns how many succeeded. A failing
    /// undo is logged and does not stop the remaining ones.
    pub async fn unwind(mut self) -> usize {
        let mut undone = 0;
        while let Some((label, undo)) = self.steps.pop() {
            match undo().await {
                Ok(()) => {
                    info!(step = %label, "compensated");
                    undone += 1;
                }
                Err(e) => warn!(step = %label, error = %e, "compensation failed"),
            }
        }
        undone
    }

    /// Unwind, then hand back `err` annotated with the compensation count.
    pub async fn fail(self, err: AdapterError) -> AdapterError {
        let n = self.unwind().await;
        err.with_compensated(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn unwinds_in_reverse_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut stack = UndoStack::new();
        for step in ["volume", "instance"] {
            let log = Arc::clone(&log);
            stack.push(step, move || async move {
                log.lock().unwrap().push(step);
                Ok(())
            });
        }
        let err = stack.fail(AdapterError::validation("tag failed")).await;
        assert_eq!(err.compensated, 2);
        assert_eq!(*log.lock().unwrap(), vec!["instance", "volume"]);
    }

    #[tokio::test]
    async fn failed_undo_is_not_counted() {
        let mut stack = UndoStack::new();
        stack.push("a", || async { Ok(()) });
        stack.push("b", || async { Err(AdapterError::transient("gone")) });
        assert_eq!(stack.unwind().await, 1);
    }
}
