//! In-memory Record Store and installed-module store.
//!
//! Deterministic, process-local. Used by tests and by the simulated
//! provider flow; the Postgres-backed equivalents live in skr-db.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use skr_schemas::Scope;
use uuid::Uuid;

use crate::{AdapterError, Context, Record, RecordStore};

/// Builds one Record Store per (module, kind), so resource modules stay
/// independent of the storage backend.
pub trait StoreFactory {
    fn store<R: Record>(&self, module: &'static str, kind: &'static str) -> Arc<dyn RecordStore<R>>;
}

/// Installed modules per scope.
#[async_trait::async_trait]
pub trait ModuleStore: Send + Sync {
    async fn installed(&self, scope: &Scope) -> Result<BTreeSet<String>, AdapterError>;

    async fn mark_installed(&self, scope: &Scope, modules: &[String]) -> Result<(), AdapterError>;

    async fn mark_uninstalled(&self, scope: &Scope, modules: &[String]) -> Result<(), AdapterError>;
}

fn locked<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

pub struct MemoryStore<R> {
    rows: Mutex<BTreeMap<Scope, BTreeMap<Uuid, R>>>,
}

impl<R> Default for MemoryStore<R> {
    fn default() -> Self {
        Self {
            rows: Mutex::new(BTreeMap::new()),
        }
    }
}

impl<R: Record> MemoryStore<R> {
    pub fn new() -> Self {
        Self::default()
    }

    fn upsert(&self, scope: &Scope, records: &[R]) -> Vec<R> {
        let mut rows = locked(&self.rows);
        let table = rows.entry(scope.clone()).or_default();
        records
            .iter()
            .map(|r| {
                let mut r = r.clone();
                let id = r.internal_id().unwrap_or_else(Uuid::new_v4);
                r.set_internal_id(Some(id));
                table.insert(id, r.clone());
                r
            })
            .collect()
    }

    /// Insert desired rows directly, outside any run.
    pub fn seed(&self, scope: &Scope, records: Vec<R>) -> Vec<R> {
        self.upsert(scope, &records)
    }

    pub fn all(&self, scope: &Scope) -> Vec<R> {
        locked(&self.rows)
            .get(scope)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Mutate stored rows in place, as an operator statement would.
    pub fn edit<F>(&self, scope: &Scope, mut f: F)
    where
        F: FnMut(&mut R),
    {
        if let Some(t) = locked(&self.rows).get_mut(scope) {
            t.values_mut().for_each(&mut f);
        }
    }

    pub fn remove_where<F>(&self, scope: &Scope, pred: F) -> usize
    where
        F: Fn(&R) -> bool,
    {
        let mut rows = locked(&self.rows);
        let Some(t) = rows.get_mut(scope) else { return 0 };
        let before = t.len();
        t.retain(|_, r| !pred(r));
        before - t.len()
    }
}

#[async_trait::async_trait]
impl<R: Record> RecordStore<R> for MemoryStore<R> {
    async fn read(&self, ctx: &Context) -> Result<Vec<R>, AdapterError> {
        Ok(self.all(&ctx.scope))
    }

    async fn create(&self, records: &[R], ctx: &Context) -> Result<Vec<R>, AdapterError> {
        Ok(self.upsert(&ctx.scope, records))
    }

    async fn update(&self, records: &[R], ctx: &Context) -> Result<Vec<R>, AdapterError> {
        Ok(self.upsert(&ctx.scope, records))
    }

    async fn delete(&self, records: &[R], ctx: &Context) -> Result<(), AdapterError> {
        let mut rows = locked(&self.rows);
        if let Some(t) = rows.get_mut(&ctx.scope) {
            for id in records.iter().filter_map(|r| r.internal_id()) {
                t.remove(&id);
            }
        }
        Ok(())
    }
}

/// Hands out one shared `MemoryStore` per (module, kind) and keeps typed
/// handles so tests can seed and inspect desired state.
#[derive(Default)]
pub struct MemoryStoreFactory {
    stores: Mutex<HashMap<(&'static str, &'static str), Arc<dyn Any + Send + Sync>>>,
}

impl MemoryStoreFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle<R: Record>(&self, module: &'static str, kind: &'static str) -> Arc<MemoryStore<R>> {
        let mut stores = locked(&self.stores);
        if let Some(existing) = stores.get(&(module, kind)) {
            if let Ok(s) = Arc::clone(existing).downcast::<MemoryStore<R>>() {
                return s;
            }
        }
        let s: Arc<MemoryStore<R>> = Arc::new(MemoryStore::new());
        stores.insert((module, kind), s.clone() as Arc<dyn Any + Send + Sync>);
        s
    }
}

impl StoreFactory for MemoryStoreFactory {
    fn store<R: Record>(&self, module: &'static str, kind: &'static str) -> Arc<dyn RecordStore<R>> {
        self.handle::<R>(module, kind)
    }
}

// ---------------------------------------------------------------------------
// Installed modules
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryModuleStore {
    installed: Mutex<BTreeMap<Scope, BTreeSet<String>>>,
}

impl MemoryModuleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ModuleStore for MemoryModuleStore {
    async fn installed(&self, scope: &Scope) -> Result<BTreeSet<String>, AdapterError> {
        Ok(locked(&self.installed)
            .get(scope)
            .cloned()
            .unwrap_or_default())
    }

    async fn mark_installed(&self, scope: &Scope, modules: &[String]) -> Result<(), AdapterError> {
        locked(&self.installed)
            .entry(scope.clone())
            .or_default()
            .extend(modules.iter().cloned());
        Ok(())
    }

    async fn mark_uninstalled(&self, scope: &Scope, modules: &[String]) -> Result<(), AdapterError> {
        if let Some(set) = locked(&self.installed).get_mut(scope) {
            for m in modules {
                set.remove(m);
            }
        }
        Ok(())
    }
}
