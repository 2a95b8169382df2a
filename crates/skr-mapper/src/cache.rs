//! Per-run memoization cache.
//!
//! Two namespaces (desired, observed) of `entity id -> record` maps, one per
//! `module::kind` key. A slot marked complete holds the full listing for
//! its kind; point lookups are served from either complete or partial slots.
//! Never shared across runs.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Desired,
    Observed,
}

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Desired => "desired",
            Namespace::Observed => "observed",
        }
    }
}

type Entry = Arc<dyn Any + Send + Sync>;

#[derive(Default)]
struct Slot {
    records: BTreeMap<String, Entry>,
    complete: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

#[derive(Default)]
pub struct Cache {
    slots: Mutex<HashMap<(Namespace, String), Slot>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<(Namespace, String), Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn hit(&self, ns: Namespace, key: &str, id: &str) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        debug!(namespace = ns.as_str(), key, entity_id = id, "cache hit");
    }

    fn miss(&self, ns: Namespace, key: &str, id: &str) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(namespace = ns.as_str(), key, entity_id = id, "cache miss");
    }

    /// Point lookup.
    pub fn get<R: Record>(&self, ns: Namespace, key: &str, id: &str) -> Option<R> {
        let found = self
            .slots()
            .get(&(ns, key.to_string()))
            .and_then(|s| s.records.get(id))
            .and_then(|e| e.downcast_ref::<R>())
            .cloned();
        match found {
            Some(r) => {
                self.hit(ns, key, id);
                Some(r)
            }
            None => {
                self.miss(ns, key, id);
                None
            }
        }
    }

    /// Whether the full listing for `key` is held. A complete slot that does
    /// not contain an id means the entity does not exist.
    pub fn is_complete(&self, ns: Namespace, key: &str) -> bool {
        self.slots()
            .get(&(ns, key.to_string()))
            .map(|s| s.complete)
            .unwrap_or(false)
    }

    /// The full listing, when one was stored and not invalidated since.
    pub fn list<R: Record>(&self, ns: Namespace, key: &str) -> Option<Vec<R>> {
        let listed = {
            let slots = self.slots();
            match slots.get(&(ns, key.to_string())) {
                Some(s) if s.complete => Some(
                    s.records
                        .values()
                        .filter_map(|e| e.downcast_ref::<R>().cloned())
                        .collect::<Vec<R>>(),
                ),
                _ => None,
            }
        };
        match listed {
            Some(v) => {
                self.hit(ns, key, "*");
                Some(v)
            }
            None => {
                self.miss(ns, key, "*");
                None
            }
        }
    }

    pub fn put<R: Record>(&self, ns: Namespace, key: &str, id: String, record: R) {
        let mut slots = self.slots();
        let slot = slots.entry((ns, key.to_string())).or_default();
        slot.records.insert(id, Arc::new(record));
    }

    /// Store a full listing, replacing whatever the slot held.
    pub fn put_list<R: Record>(&self, ns: Namespace, key: &str, records: Vec<(String, R)>) {
        let mut slot = Slot {
            records: BTreeMap::new(),
            complete: true,
        };
        for (id, r) in records {
            slot.records.entry(id).or_insert_with(|| Arc::new(r) as Entry);
        }
        self.slots().insert((ns, key.to_string()), slot);
    }

    /// Drop the given ids and mark the listing stale.
    pub fn invalidate(&self, ns: Namespace, key: &str, ids: &[String]) {
        let mut slots = self.slots();
        if let Some(slot) = slots.get_mut(&(ns, key.to_string())) {
            for id in ids {
                slot.records.remove(id);
            }
            slot.complete = false;
        }
        debug!(namespace = ns.as_str(), key, ids = ?ids, "cache invalidated");
    }

    pub fn invalidate_kind(&self, ns: Namespace, key: &str) {
        self.slots().remove(&(ns, key.to_string()));
    }

    pub fn clear(&self) {
        self.slots().clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.slots().values().map(|s| s.records.len()).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Row {
        name: String,
    }

    impl Record for Row {
        fn internal_id(&self) -> Option<Uuid> {
            None
        }
        fn set_internal_id(&mut self, _id: Option<Uuid>) {}
        fn natural_id(&self) -> Option<String> {
            Some(self.name.clone())
        }
    }

    fn row(name: &str) -> Row {
        Row {
            name: name.to_string(),
        }
    }

    #[test]
    fn namespaces_are_separate() {
        let c = Cache::new();
        c.put(Namespace::Desired, "m::k", "a".into(), row("a"));
        assert_eq!(c.get::<Row>(Namespace::Desired, "m::k", "a"), Some(row("a")));
        assert_eq!(c.get::<Row>(Namespace::Observed, "m::k", "a"), None);
        let s = c.stats();
        assert_eq!((s.hits, s.misses), (1, 1));
    }

    #[test]
    fn invalidation_marks_listing_stale() {
        let c = Cache::new();
        c.put_list(
            Namespace::Observed,
            "m::k",
            vec![("a".to_string(), row("a")), ("b".to_string(), row("b"))],
        );
        assert_eq!(c.list::<Row>(Namespace::Observed, "m::k").map(|v| v.len()), Some(2));

        c.invalidate(Namespace::Observed, "m::k", &["a".to_string()]);
        assert!(c.list::<Row>(Namespace::Observed, "m::k").is_none());
        assert!(c.get::<Row>(Namespace::Observed, "m::k", "a").is_none());
        assert!(c.get::<Row>(Namespace::Observed, "m::k", "b").is_some());
    }

    #[test]
    fn wrong_type_is_a_miss() {
        #[derive(Debug, Clone, Serialize, Deserialize)]
        struct Other;
        impl Record for Other {
            fn internal_id(&self) -> Option<Uuid> {
                None
            }
            fn set_internal_id(&mut self, _id: Option<Uuid>) {}
            fn natural_id(&self) -> Option<String> {
                None
            }
        }
        let c = Cache::new();
        c.put(Namespace::Desired, "m::k", "a".into(), row("a"));
        assert!(c.get::<Other>(Namespace::Desired, "m::k", "a").is_none());
    }

    #[test]
    fn clear_empties_everything() {
        let c = Cache::new();
        c.put(Namespace::Desired, "m::k", "a".into(), row("a"));
        c.clear();
        assert_eq!(c.stats().entries, 0);
    }
}
