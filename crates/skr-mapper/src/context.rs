use std::sync::Arc;

use skr_schemas::{Direction, Scope};
use uuid::Uuid;

use crate::memo::Memo;
use crate::{Cache, Mapper, RetryPolicy, WaiterConfig};

/// Everything an adapter call needs to know about the run it belongs to.
///
/// Cheap to clone; the cache is shared by every clone of one run.
#[derive(Clone)]
pub struct Context {
    pub run_id: Uuid,
    pub scope: Scope,
    pub direction: Direction,
    pub cache: Arc<Cache>,
    pub retry: RetryPolicy,
    pub waiter: WaiterConfig,
}

impl Context {
    pub fn new(scope: Scope, direction: Direction) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            scope,
            direction,
            cache: Arc::new(Cache::new()),
            retry: RetryPolicy::default(),
            waiter: WaiterConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_waiter(mut self, waiter: WaiterConfig) -> Self {
        self.waiter = waiter;
        self
    }

    /// Cached access to `mapper`'s records for this run.
    pub fn memo<'a, M: Mapper>(&'a self, mapper: &'a M) -> Memo<'a, M> {
        Memo::new(mapper, self)
    }
}
