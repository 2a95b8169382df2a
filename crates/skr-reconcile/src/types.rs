use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How a divergent record is brought back in line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateOrReplace {
    /// Resolvable in place (tags, descriptions, policies).
    Update,
    /// An identity-bearing field changed; the resource must be recreated.
    Replace,
}

impl Default for UpdateOrReplace {
    fn default() -> Self {
        UpdateOrReplace::Update
    }
}

/// A record present on both sides with unequal fields.
///
/// `source` is the side that wins for the run direction, `target` the side
/// being brought in line.
#[derive(Debug, Clone, PartialEq)]
pub struct Divergence<R> {
    pub source: R,
    pub target: R,
}

/// A provider-reserved object whose values are restored from the observed
/// side instead of being created, replaced or deleted.
#[derive(Debug, Clone, PartialEq)]
pub struct Adoption<R> {
    pub observed: R,
    /// The desired record being overwritten, when one exists.
    pub desired: Option<R>,
}

/// Diff result for one mapper in one pass, keyed by entity id.
///
/// Invariant: an entity id appears in at most one of the five sets.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeSet<R> {
    pub to_create: BTreeMap<String, R>,
    pub to_update: BTreeMap<String, Divergence<R>>,
    pub to_replace: BTreeMap<String, Divergence<R>>,
    pub to_adopt: BTreeMap<String, Adoption<R>>,
    pub to_delete: BTreeMap<String, R>,
}

impl<R> Default for ChangeSet<R> {
    fn default() -> Self {
        Self {
            to_create: BTreeMap::new(),
            to_update: BTreeMap::new(),
            to_replace: BTreeMap::new(),
            to_adopt: BTreeMap::new(),
            to_delete: BTreeMap::new(),
        }
    }
}

impl<R> ChangeSet<R> {
    pub fn is_empty(&self) -> bool {
        self.counts().is_empty()
    }

    pub fn counts(&self) -> DiffCounts {
        DiffCounts {
            create: self.to_create.len(),
            update: self.to_update.len(),
            replace: self.to_replace.len(),
            adopt: self.to_adopt.len(),
            delete: self.to_delete.len(),
        }
    }

    /// Drop every entry whose entity id is rejected by `keep`.
    pub fn retain_ids<F>(&mut self, keep: F)
    where
        F: Fn(&str) -> bool,
    {
        self.to_create.retain(|k, _| keep(k));
        self.to_update.retain(|k, _| keep(k));
        self.to_replace.retain(|k, _| keep(k));
        self.to_adopt.retain(|k, _| keep(k));
        self.to_delete.retain(|k, _| keep(k));
    }

    /// Every entity id in the change set, sorted.
    pub fn entity_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .to_create
            .keys()
            .chain(self.to_update.keys())
            .chain(self.to_replace.keys())
            .chain(self.to_adopt.keys())
            .chain(self.to_delete.keys())
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}

/// Sizes of the five change sets. Compared across passes to detect stalls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffCounts {
    pub create: usize,
    pub update: usize,
    pub replace: usize,
    pub adopt: usize,
    pub delete: usize,
}

impl DiffCounts {
    pub fn total(&self) -> usize {
        self.create + self.update + self.replace + self.adopt + self.delete
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

impl std::ops::AddAssign for DiffCounts {
    fn add_assign(&mut self, rhs: Self) {
        self.create += rhs.create;
        self.update += rhs.update;
        self.replace += rhs.replace;
        self.adopt += rhs.adopt;
        self.delete += rhs.delete;
    }
}
