//! TG-010: Module discovery — walk the `service/environment/region/module[/submodule]` tree.
//!
//! A directory at depth 4 or 5 below the root that holds at least one `*.tf`
//! file is a module. Hidden directories, `.terraform` caches and library
//! directories are never descended into.

use super::error::ExtractionError;
use super::references;
use super::types::{Module, ModuleConfig};
use rustc_hash::FxHashMap;
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

const BASE_DEPTH: usize = 4;
const SUBMODULE_DEPTH: usize = 5;

/// Lexically normalise a path: drop `.` components and fold `..` without
/// touching the filesystem.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = matches!(out.components().next_back(), Some(Component::Normal(_)))
                    && out.pop();
                if !popped && !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Find every module under `root`, sorted by ID.
pub fn discover_modules(root: &Path, library_dirs: &[String]) -> Result<Vec<Module>, String> {
    let root = root
        .canonicalize()
        .map_err(|e| format!("cannot open root {}: {}", root.display(), e))?;

    let walker = WalkDir::new(&root)
        .min_depth(1)
        .max_depth(SUBMODULE_DEPTH)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_skipped(e, library_dirs));

    let mut modules = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|e| format!("cannot walk {}: {}", root.display(), e))?;
        if entry.depth() < BASE_DEPTH || !entry.file_type().is_dir() || !has_tf_files(entry.path()) {
            continue;
        }
        if let Some(module) = module_from_path(&root, entry.path()) {
            debug!(module = %module, "discovered module");
            modules.push(module);
        }
    }

    modules.sort_by_key(|m| m.id());
    Ok(modules)
}

/// Load the parsed configuration of every module.
pub fn load_configs(modules: &[Module]) -> (FxHashMap<String, ModuleConfig>, Vec<ExtractionError>) {
    let mut configs = FxHashMap::default();
    let mut errors = Vec::new();
    for module in modules {
        let (config, module_errors) = references::load_module_config(module);
        configs.insert(module.id(), config);
        errors.extend(module_errors);
    }
    (configs, errors)
}

fn is_skipped(entry: &DirEntry, library_dirs: &[String]) -> bool {
    if entry.depth() == 0 || !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || library_dirs.iter().any(|d| *d == name)
}

fn has_tf_files(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries.flatten().any(|e| {
                let path = e.path();
                path.is_file() && path.extension().is_some_and(|ext| ext == "tf")
            })
        })
        .unwrap_or(false)
}

fn module_from_path(root: &Path, dir: &Path) -> Option<Module> {
    let relative = dir.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Module::from_id(&parts.join("/")).map(|m| m.with_path(dir))
}
