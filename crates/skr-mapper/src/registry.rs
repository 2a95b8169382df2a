//! Module registry and dependency graph.
//!
//! Built once at startup from a static list of module definitions. The
//! dependency graph is validated here (unknown dependencies, duplicates,
//! cycles) and flattened into one deterministic topological order: producers
//! before consumers. Deletes walk the same order in reverse.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use crate::{ErasedMapper, Rpc};

pub struct ModuleDef {
    pub name: &'static str,
    pub version: &'static str,
    pub dependencies: Vec<&'static str>,
    pub mappers: Vec<Arc<dyn ErasedMapper>>,
    pub rpcs: Vec<Arc<dyn Rpc>>,
}

impl ModuleDef {
    pub fn new(name: &'static str, version: &'static str) -> Self {
        Self {
            name,
            version,
            dependencies: Vec::new(),
            mappers: Vec::new(),
            rpcs: Vec::new(),
        }
    }

    pub fn depends_on(mut self, deps: &[&'static str]) -> Self {
        self.dependencies.extend_from_slice(deps);
        self
    }

    /// Mappers run in registration order within the module.
    pub fn with_mapper(mut self, mapper: Arc<dyn ErasedMapper>) -> Self {
        self.mappers.push(mapper);
        self
    }

    pub fn with_rpc(mut self, rpc: Arc<dyn Rpc>) -> Self {
        self.rpcs.push(rpc);
        self
    }
}

impl fmt::Debug for ModuleDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDef")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("dependencies", &self.dependencies)
            .field(
                "mappers",
                &self.mappers.iter().map(|m| m.kind_name()).collect::<Vec<_>>(),
            )
            .field("rpcs", &self.rpcs.iter().map(|r| r.name()).collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    DuplicateModule(String),
    UnknownDependency { module: String, dependency: String },
    Cycle(Vec<String>),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::DuplicateModule(m) => write!(f, "module '{m}' registered twice"),
            RegistryError::UnknownDependency { module, dependency } => {
                write!(f, "module '{module}' depends on unknown module '{dependency}'")
            }
            RegistryError::Cycle(ms) => {
                write!(f, "dependency cycle among modules: {}", ms.join(", "))
            }
        }
    }
}

impl std::error::Error for RegistryError {}

#[derive(Debug)]
pub struct Registry {
    modules: BTreeMap<&'static str, ModuleDef>,
    order: Vec<&'static str>,
}

impl Registry {
    pub fn new(defs: Vec<ModuleDef>) -> Result<Self, RegistryError> {
        let mut modules: BTreeMap<&'static str, ModuleDef> = BTreeMap::new();
        for def in defs {
            if modules.contains_key(def.name) {
                return Err(RegistryError::DuplicateModule(def.name.to_string()));
            }
            modules.insert(def.name, def);
        }

        for def in modules.values() {
            for dep in &def.dependencies {
                if !modules.contains_key(dep) {
                    return Err(RegistryError::UnknownDependency {
                        module: def.name.to_string(),
                        dependency: dep.to_string(),
                    });
                }
            }
        }

        // Kahn's algorithm; the ready set is ordered so ties break by name.
        let mut pending: BTreeMap<&'static str, BTreeSet<&'static str>> = modules
            .values()
            .map(|d| (d.name, d.dependencies.iter().copied().collect()))
            .collect();
        let mut ready: BTreeSet<&'static str> = pending
            .iter()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(name, _)| *name)
            .collect();
        let mut order = Vec::with_capacity(modules.len());

        while let Some(next) = ready.pop_first() {
            pending.remove(next);
            order.push(next);
            for (name, deps) in pending.iter_mut() {
                if deps.remove(next) && deps.is_empty() {
                    ready.insert(*name);
                }
            }
        }

        if !pending.is_empty() {
            return Err(RegistryError::Cycle(
                pending.keys().map(|k| k.to_string()).collect(),
            ));
        }

        Ok(Self { modules, order })
    }

    pub fn get(&self, name: &str) -> Option<&ModuleDef> {
        self.modules.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// Every module, producers first.
    pub fn order(&self) -> &[&'static str] {
        &self.order
    }

    /// Names in `names` that are not registered, sorted.
    pub fn unknown<'n>(&self, names: impl IntoIterator<Item = &'n str>) -> Vec<String> {
        let mut out: Vec<String> = names
            .into_iter()
            .filter(|n| !self.contains(n))
            .map(|n| n.to_string())
            .collect();
        out.sort();
        out.dedup();
        out
    }

    /// `names` plus everything they transitively depend on.
    pub fn closure(&self, names: &BTreeSet<String>) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        let mut stack: Vec<String> = names.iter().cloned().collect();
        while let Some(n) = stack.pop() {
            if !out.insert(n.clone()) {
                continue;
            }
            if let Some(def) = self.get(&n) {
                stack.extend(def.dependencies.iter().map(|d| d.to_string()));
            }
        }
        out
    }

    /// `names` in topological order.
    pub fn sorted(&self, names: &BTreeSet<String>) -> Vec<String> {
        self.order
            .iter()
            .filter(|n| names.contains(**n))
            .map(|n| n.to_string())
            .collect()
    }

    /// Modules in `among` (outside `targets`) that directly depend on any
    /// module in `targets`, with the dependencies that block.
    pub fn dependents(
        &self,
        targets: &BTreeSet<String>,
        among: &BTreeSet<String>,
    ) -> BTreeMap<String, Vec<String>> {
        let mut out = BTreeMap::new();
        for name in among.difference(targets) {
            let Some(def) = self.get(name) else { continue };
            let blocking: Vec<String> = def
                .dependencies
                .iter()
                .filter(|d| targets.contains(**d))
                .map(|d| d.to_string())
                .collect();
            if !blocking.is_empty() {
                out.insert(name.clone(), blocking);
            }
        }
        out
    }

    /// Mappers of `modules`, producers first.
    pub fn mappers(&self, modules: &BTreeSet<String>) -> Vec<Arc<dyn ErasedMapper>> {
        self.order
            .iter()
            .filter(|n| modules.contains(**n))
            .filter_map(|n| self.modules.get(n))
            .flat_map(|d| d.mappers.iter().cloned())
            .collect()
    }

    pub fn rpc(&self, module: &str, name: &str) -> Option<Arc<dyn Rpc>> {
        self.get(module)?
            .rpcs
            .iter()
            .find(|r| r.name() == name)
            .cloned()
    }
}
