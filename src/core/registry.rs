//! TG-002: Module registry — discovered modules indexed by ID, directory and leaf name.

use super::discovery::normalize_path;
use super::types::Module;
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};

/// Read-only index over every discovered module.
#[derive(Debug, Clone, Default)]
pub struct ModuleRegistry {
    modules: Vec<Module>,
    by_id: FxHashMap<String, usize>,
    by_path: FxHashMap<PathBuf, usize>,
    by_name: FxHashMap<String, Vec<usize>>,
}

impl ModuleRegistry {
    /// Index modules. Sorted by ID; a duplicate ID keeps the first occurrence.
    pub fn new(mut modules: Vec<Module>) -> Self {
        modules.sort_by_key(|m| m.id());
        modules.dedup_by_key(|m| m.id());

        let mut by_id = FxHashMap::default();
        let mut by_path = FxHashMap::default();
        let mut by_name: FxHashMap<String, Vec<usize>> = FxHashMap::default();
        for (i, module) in modules.iter().enumerate() {
            by_id.insert(module.id(), i);
            if !module.path.as_os_str().is_empty() {
                by_path.insert(normalize_path(&module.path), i);
            }
            by_name.entry(module.name().to_string()).or_default().push(i);
        }

        Self {
            modules,
            by_id,
            by_path,
            by_name,
        }
    }

    pub fn get(&self, id: &str) -> Option<&Module> {
        self.by_id.get(id).map(|&i| &self.modules[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    /// Look up a module by its directory.
    pub fn by_path(&self, path: &Path) -> Option<&Module> {
        self.by_path
            .get(&normalize_path(path))
            .map(|&i| &self.modules[i])
    }

    /// Every module whose leaf name is `name`, in ID order.
    pub fn by_name(&self, name: &str) -> Vec<&Module> {
        self.by_name
            .get(name)
            .map(|idx| idx.iter().map(|&i| &self.modules[i]).collect())
            .unwrap_or_default()
    }

    /// All modules, sorted by ID.
    pub fn all(&self) -> &[Module] {
        &self.modules
    }

    pub fn ids(&self) -> impl Iterator<Item = String> + '_ {
        self.modules.iter().map(Module::id)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Base module of a submodule, when it was discovered too.
    pub fn parent(&self, module: &Module) -> Option<&Module> {
        if !module.is_submodule() {
            return None;
        }
        self.get(&module.base_id())
    }

    pub fn children(&self, module: &Module) -> Vec<&Module> {
        if module.is_submodule() {
            return Vec::new();
        }
        let base = module.base_id();
        self.modules
            .iter()
            .filter(|m| m.is_submodule() && m.base_id() == base)
            .collect()
    }
}
