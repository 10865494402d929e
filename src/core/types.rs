//! TG-001: Domain types — modules, project config, references, dependencies, plans.
//!
//! Module identity is positional: `service/environment/region/module[/submodule]`.
//! Everything downstream of discovery works on the canonical ID string.

use super::expr::Expr;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

// ============================================================================
// Modules
// ============================================================================

/// A discovered Terraform module.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Module {
    pub service: String,
    pub environment: String,
    pub region: String,
    pub module: String,

    /// Leaf name when this module is nested one level below a base module
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submodule: Option<String>,

    /// Directory holding the module's `*.tf` files
    #[serde(default)]
    pub path: PathBuf,
}

impl Module {
    pub fn new(service: &str, environment: &str, region: &str, module: &str) -> Self {
        Self {
            service: service.to_string(),
            environment: environment.to_string(),
            region: region.to_string(),
            module: module.to_string(),
            submodule: None,
            path: PathBuf::new(),
        }
    }

    pub fn with_submodule(mut self, submodule: &str) -> Self {
        self.submodule = Some(submodule.to_string());
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    /// Parse a canonical ID. Accepts exactly 4 or 5 non-empty segments.
    pub fn from_id(id: &str) -> Option<Self> {
        let parts: Vec<&str> = id.split('/').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return None;
        }
        match parts.as_slice() {
            [s, e, r, m] => Some(Self::new(s, e, r, m)),
            [s, e, r, m, sub] => Some(Self::new(s, e, r, m).with_submodule(sub)),
            _ => None,
        }
    }

    /// Canonical ID: components joined by `/`.
    pub fn id(&self) -> String {
        match &self.submodule {
            Some(sub) => format!("{}/{}", self.base_id(), sub),
            None => self.base_id(),
        }
    }

    /// ID of the base module (`service/environment/region/module`).
    pub fn base_id(&self) -> String {
        format!("{}/{}", self.context_prefix(), self.module)
    }

    /// `service/environment/region`, shared by every module in one context.
    pub fn context_prefix(&self) -> String {
        format!("{}/{}/{}", self.service, self.environment, self.region)
    }

    pub fn is_submodule(&self) -> bool {
        self.submodule.is_some()
    }

    /// Leaf name: the submodule name for submodules, else the module name.
    pub fn name(&self) -> &str {
        self.submodule.as_deref().unwrap_or(&self.module)
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

// ============================================================================
// Project configuration (tfgraph.yaml)
// ============================================================================

/// Root configuration for a repository of Terraform modules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Schema version (must be "1.0")
    #[serde(default = "default_version")]
    pub version: String,

    /// Directory containing the service/environment/region tree
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// State file name appended to remote state keys
    #[serde(default = "default_state_file")]
    pub state_file: String,

    /// Directory names holding library modules (never discovered as modules)
    #[serde(default = "default_library_dirs")]
    pub library_dirs: Vec<String>,

    /// Declared edges: module ID -> IDs it depends on
    #[serde(default)]
    pub dependencies: IndexMap<String, Vec<String>>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            root: default_root(),
            state_file: default_state_file(),
            library_dirs: default_library_dirs(),
            dependencies: IndexMap::new(),
        }
    }
}

fn default_version() -> String {
    "1.0".to_string()
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_state_file() -> String {
    "terraform.tfstate".to_string()
}

fn default_library_dirs() -> Vec<String> {
    vec!["_modules".to_string()]
}

// ============================================================================
// Parsed module configuration
// ============================================================================

/// A `data "terraform_remote_state"` block.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteStateReference {
    /// Block label, e.g. `vpc`
    pub name: String,

    /// Backend type (`s3`, `gcs`, ...)
    pub backend: String,

    /// Collection expression when the block uses `for_each`
    pub for_each: Option<Expr>,

    /// `config.key` (s3 style)
    pub key: Option<Expr>,

    /// `config.prefix` (gcs style)
    pub prefix: Option<Expr>,
}

impl RemoteStateReference {
    /// The path-producing expression. `None` unless exactly one of key/prefix is set.
    pub fn path_expr(&self) -> Option<&Expr> {
        match (&self.key, &self.prefix) {
            (Some(key), None) => Some(key),
            (None, Some(prefix)) => Some(prefix),
            _ => None,
        }
    }
}

/// A local `module` block whose source points inside the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibrarySource {
    /// Block label
    pub name: String,

    /// Raw `source` value, e.g. `../../../../_modules/kafka`
    pub source: String,

    /// Module directory joined with `source`, lexically normalised
    pub target: PathBuf,
}

/// Everything the dependency engine needs from one module's `*.tf` files.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModuleConfig {
    /// Declared locals in declaration order
    pub locals: IndexMap<String, Expr>,

    pub remote_states: Vec<RemoteStateReference>,

    pub libraries: Vec<LibrarySource>,
}

// ============================================================================
// Dependencies
// ============================================================================

/// How an edge was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    RemoteState,
    Declared,
}

impl fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RemoteState => write!(f, "remote_state"),
            Self::Declared => write!(f, "declared"),
        }
    }
}

/// `from` depends on `to`: `to` must be applied first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dependency {
    pub from: String,
    pub to: String,
    pub kind: DependencyKind,

    /// Remote state block label, or `depends_on` for declared edges
    pub reference: String,
}

// ============================================================================
// Plan / stats
// ============================================================================

/// One module's slot in the plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedModule {
    pub id: String,

    /// Zero-based execution level
    pub level: usize,

    /// Direct dependencies inside the planned scope
    pub needs: Vec<String>,
}

/// Parallel execution plan handed to a pipeline generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Each level only depends on earlier levels
    pub levels: Vec<Vec<String>>,

    /// Modules in level order
    pub modules: Vec<PlannedModule>,
}

impl ExecutionPlan {
    pub fn total_modules(&self) -> usize {
        self.modules.len()
    }
}

/// Summary metrics over a built graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphStats {
    pub total_modules: usize,
    pub total_edges: usize,

    /// Modules with no dependencies
    pub root_modules: usize,

    /// Modules nothing depends on
    pub leaf_modules: usize,

    /// Longest path from a root
    pub max_depth: usize,
    pub average_depth: f64,
    pub has_cycles: bool,
    pub cycle_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tg001_module_ids() {
        let base = Module::new("svc", "stage", "eu-central-1", "eks");
        assert_eq!(base.id(), "svc/stage/eu-central-1/eks");
        assert_eq!(base.name(), "eks");
        assert!(!base.is_submodule());

        let sub = base.clone().with_submodule("addons");
        assert_eq!(sub.id(), "svc/stage/eu-central-1/eks/addons");
        assert_eq!(sub.base_id(), "svc/stage/eu-central-1/eks");
        assert_eq!(sub.name(), "addons");
        assert_eq!(sub.context_prefix(), "svc/stage/eu-central-1");
    }

    #[test]
    fn test_tg001_from_id() {
        let m = Module::from_id("a/b/c/d/e").unwrap();
        assert_eq!(m.submodule.as_deref(), Some("e"));
        assert_eq!(m.id(), "a/b/c/d/e");
        assert!(Module::from_id("a/b/c").is_none());
        assert!(Module::from_id("a/b//d").is_none());
        assert!(Module::from_id("a/b/c/d/e/f").is_none());
    }

    #[test]
    fn test_tg001_config_defaults() {
        let config: ProjectConfig = serde_yaml_ng::from_str("{}").unwrap();
        assert_eq!(config, ProjectConfig::default());
        assert_eq!(config.state_file, "terraform.tfstate");
        assert_eq!(config.library_dirs, vec!["_modules"]);
    }

    #[test]
    fn test_tg001_path_expr_requires_exactly_one() {
        let lit = Expr::Literal(crate::core::expr::Value::String("a".into()));
        let mut r = RemoteStateReference {
            name: "vpc".into(),
            backend: "s3".into(),
            for_each: None,
            key: Some(lit.clone()),
            prefix: None,
        };
        assert!(r.path_expr().is_some());
        r.prefix = Some(lit);
        assert!(r.path_expr().is_none());
        r.key = None;
        assert!(r.path_expr().is_some());
        r.prefix = None;
        assert!(r.path_expr().is_none());
    }

    #[test]
    fn test_tg001_dependency_kind_display() {
        assert_eq!(DependencyKind::RemoteState.to_string(), "remote_state");
        assert_eq!(DependencyKind::Declared.to_string(), "declared");
    }
}
