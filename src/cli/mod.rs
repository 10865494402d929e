//! TG-014: CLI subcommands — init, validate, plan, order, deps, affected, stats.

use crate::core::error::ExtractionError;
use crate::core::graph::DependencyGraph;
use crate::core::parser::{self, CONFIG_FILE};
use crate::core::registry::ModuleRegistry;
use crate::core::types::ProjectConfig;
use crate::core::{discovery, extractor, planner};
use clap::Subcommand;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new tfgraph project
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Discover modules, report warnings and cycles
    Validate {
        /// Path to tfgraph.yaml
        #[arg(short, long, default_value = CONFIG_FILE)]
        file: PathBuf,
    },

    /// Show parallel execution levels
    Plan {
        /// Path to tfgraph.yaml
        #[arg(short, long, default_value = CONFIG_FILE)]
        file: PathBuf,

        /// Changed module (ID or directory); limits the plan to affected modules
        #[arg(long)]
        changed: Vec<String>,

        /// Changed library directory; limits the plan to affected modules
        #[arg(long)]
        library: Vec<PathBuf>,

        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// Show a total apply order
    Order {
        /// Path to tfgraph.yaml
        #[arg(short, long, default_value = CONFIG_FILE)]
        file: PathBuf,

        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// Show what a module depends on (or what depends on it)
    Deps {
        /// Module ID or directory
        target: String,

        /// Path to tfgraph.yaml
        #[arg(short, long, default_value = CONFIG_FILE)]
        file: PathBuf,

        /// Show dependents instead of dependencies
        #[arg(long)]
        reverse: bool,

        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// List modules affected by a change
    Affected {
        /// Path to tfgraph.yaml
        #[arg(short, long, default_value = CONFIG_FILE)]
        file: PathBuf,

        /// Changed module (ID or directory)
        #[arg(long)]
        changed: Vec<String>,

        /// Changed library directory
        #[arg(long)]
        library: Vec<PathBuf>,

        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// Show graph statistics
    Stats {
        /// Path to tfgraph.yaml
        #[arg(short, long, default_value = CONFIG_FILE)]
        file: PathBuf,

        /// Print JSON
        #[arg(long)]
        json: bool,
    },
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<(), String> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Plan {
            file,
            changed,
            library,
            json,
        } => cmd_plan(&file, &changed, &library, json),
        Commands::Order { file, json } => cmd_order(&file, json),
        Commands::Deps {
            target,
            file,
            reverse,
            json,
        } => cmd_deps(&file, &target, reverse, json),
        Commands::Affected {
            file,
            changed,
            library,
            json,
        } => cmd_affected(&file, &changed, &library, json),
        Commands::Stats { file, json } => cmd_stats(&file, json),
    }
}

// ============================================================================
// Project loading
// ============================================================================

/// A loaded repository: config, discovered modules and the built graph.
pub struct Project {
    pub config: ProjectConfig,
    pub registry: ModuleRegistry,
    pub graph: DependencyGraph,

    /// Parse problems followed by extraction and graph warnings
    pub warnings: Vec<ExtractionError>,
}

/// Load tfgraph.yaml, discover modules and build the graph.
pub fn load_project(file: &Path) -> Result<Project, String> {
    let config = parser::load_project(file)?;
    let errors = parser::validate_config(&config);
    if !errors.is_empty() {
        for e in &errors {
            eprintln!("  ERROR: {}", e);
        }
        return Err(format!("{} validation error(s)", errors.len()));
    }

    let modules = discovery::discover_modules(&config.root, &config.library_dirs)?;
    let registry = ModuleRegistry::new(modules);
    let (configs, parse_errors) = discovery::load_configs(registry.all());
    let graph = extractor::build_graph(&registry, &configs, &config);
    info!(
        root = %config.root.display(),
        modules = graph.len(),
        edges = graph.edge_count(),
        "graph built"
    );

    let mut warnings = parse_errors;
    warnings.extend(graph.errors().iter().cloned());
    Ok(Project {
        config,
        registry,
        graph,
        warnings,
    })
}

impl Project {
    /// A module ID, or the ID of the module living in a directory.
    pub fn resolve_target(&self, target: &str) -> Option<String> {
        if let Some(module) = self.registry.get(target.trim_end_matches('/')) {
            return Some(module.id());
        }
        self.registry.by_path(&canonical(Path::new(target))).map(|m| m.id())
    }

    /// Resolve changed targets; unknown ones are reported and skipped.
    fn resolve_changed(&self, changed: &[String]) -> Vec<String> {
        changed
            .iter()
            .filter_map(|target| {
                let id = self.resolve_target(target);
                if id.is_none() {
                    eprintln!("  WARN: ignoring unknown module '{}'", target);
                }
                id
            })
            .collect()
    }

    fn affected(&self, changed: &[String], libraries: &[PathBuf]) -> BTreeSet<String> {
        let changed = self.resolve_changed(changed);
        let libraries: Vec<PathBuf> = libraries.iter().map(|p| canonical(p)).collect();
        self.graph.affected_modules_with_libraries(&changed, &libraries)
    }
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

/// Absolute path with symlinks resolved, the way discovery sees the root.
///
/// A path that no longer exists keeps its missing tail under the nearest
/// existing ancestor.
fn canonical(path: &Path) -> PathBuf {
    let path = absolute(path);
    for ancestor in path.ancestors() {
        if let Ok(real) = ancestor.canonicalize() {
            return match path.strip_prefix(ancestor) {
                Ok(rest) if !rest.as_os_str().is_empty() => real.join(rest),
                _ => real,
            };
        }
    }
    path
}

fn print_warnings(warnings: &[ExtractionError]) {
    for w in warnings {
        eprintln!("  WARN: {}", w);
    }
}

/// Print every cycle; returns how many there were.
fn report_cycles(graph: &DependencyGraph) -> usize {
    let cycles = graph.detect_cycles();
    for cycle in &cycles {
        let first = cycle.first().map(String::as_str).unwrap_or_default();
        eprintln!("  CYCLE: {} -> {}", cycle.join(" -> "), first);
    }
    cycles.len()
}

fn print_json<T: Serialize>(value: &T) -> Result<(), String> {
    let json = serde_json::to_string_pretty(value).map_err(|e| format!("JSON error: {}", e))?;
    println!("{}", json);
    Ok(())
}

// ============================================================================
// Commands
// ============================================================================

fn cmd_init(path: &Path) -> Result<(), String> {
    let config_path = path.join(CONFIG_FILE);
    if config_path.exists() {
        return Err(format!("{} already exists", config_path.display()));
    }

    std::fs::create_dir_all(path).map_err(|e| format!("cannot create {}: {}", path.display(), e))?;
    std::fs::write(&config_path, parser::default_config_yaml())
        .map_err(|e| format!("cannot write {}: {}", config_path.display(), e))?;

    println!("Initialized tfgraph project at {}", path.display());
    println!("  Created: {}", config_path.display());
    Ok(())
}

fn cmd_validate(file: &Path) -> Result<(), String> {
    let project = load_project(file)?;
    print_warnings(&project.warnings);

    let cycles = report_cycles(&project.graph);
    if cycles > 0 {
        return Err(format!("{} dependency cycle(s)", cycles));
    }

    let levels = project.graph.execution_levels().map_err(|e| e.to_string())?;
    println!(
        "OK: {} modules, {} dependencies, {} levels, {} warning(s)",
        project.graph.len(),
        project.graph.edge_count(),
        levels.len(),
        project.warnings.len()
    );
    Ok(())
}

fn cmd_plan(file: &Path, changed: &[String], libraries: &[PathBuf], json: bool) -> Result<(), String> {
    let project = load_project(file)?;
    print_warnings(&project.warnings);

    let scope = if changed.is_empty() && libraries.is_empty() {
        None
    } else {
        Some(project.affected(changed, libraries))
    };

    let plan = match planner::plan(&project.graph, scope.as_ref()) {
        Ok(plan) => plan,
        Err(e) => {
            report_cycles(&project.graph);
            return Err(e.to_string());
        }
    };

    if json {
        return print_json(&plan);
    }
    print!("{}", planner::format_plan(&plan));
    Ok(())
}

fn cmd_order(file: &Path, json: bool) -> Result<(), String> {
    let project = load_project(file)?;
    print_warnings(&project.warnings);

    let order = match project.graph.topological_sort() {
        Ok(order) => order,
        Err(e) => {
            report_cycles(&project.graph);
            return Err(e.to_string());
        }
    };

    if json {
        return print_json(&order);
    }
    for (i, id) in order.iter().enumerate() {
        println!("{:>4}  {}", i + 1, id);
    }
    Ok(())
}

fn cmd_deps(file: &Path, target: &str, reverse: bool, json: bool) -> Result<(), String> {
    let project = load_project(file)?;
    let id = project
        .resolve_target(target)
        .ok_or_else(|| format!("unknown module '{}'", target))?;

    let (direct, all) = if reverse {
        (project.graph.dependents(&id), project.graph.all_dependents(&id))
    } else {
        (project.graph.dependencies(&id), project.graph.all_dependencies(&id))
    };

    if json {
        return print_json(&all);
    }
    let label = if reverse { "dependents" } else { "dependencies" };
    println!("{}: {} {} ({} direct)", id, all.len(), label, direct.len());
    for dep in &all {
        let marker = if direct.contains(dep) { "*" } else { " " };
        println!("  {} {}", marker, dep);
    }
    Ok(())
}

fn cmd_affected(file: &Path, changed: &[String], libraries: &[PathBuf], json: bool) -> Result<(), String> {
    if changed.is_empty() && libraries.is_empty() {
        return Err("nothing changed: pass --changed and/or --library".to_string());
    }
    let project = load_project(file)?;
    let affected = project.affected(changed, libraries);

    if json {
        return print_json(&affected);
    }
    for id in &affected {
        println!("{}", id);
    }
    println!("\n{} module(s) affected", affected.len());
    Ok(())
}

fn cmd_stats(file: &Path, json: bool) -> Result<(), String> {
    let project = load_project(file)?;
    let stats = project.graph.stats();

    if json {
        return print_json(&stats);
    }
    println!("Modules:        {}", stats.total_modules);
    println!("Dependencies:   {}", stats.total_edges);
    println!("Root modules:   {}", stats.root_modules);
    println!("Leaf modules:   {}", stats.leaf_modules);
    println!("Max depth:      {}", stats.max_depth);
    println!("Average depth:  {:.2}", stats.average_depth);
    println!("Cycles:         {}", stats.cycle_count);
    println!("Warnings:       {}", project.warnings.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_module(root: &Path, id: &str, content: &str) {
        let dir = root.join(id);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("main.tf"), content).unwrap();
    }

    fn remote_state(name: &str, key: &str) -> String {
        format!(
            "data \"terraform_remote_state\" \"{}\" {{\n  backend = \"s3\"\n  config = {{\n    key = \"{}\"\n  }}\n}}\n",
            name, key
        )
    }

    /// vpc <- eks <- app, app also reads vpc; msk includes a library.
    fn fixture() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        cmd_init(root).unwrap();

        write_module(root, "svc/stage/eu/vpc", "locals {}\n");
        write_module(
            root,
            "svc/stage/eu/eks",
            &remote_state("vpc", "${local.service}/${local.environment}/${local.region}/vpc/terraform.tfstate"),
        );
        write_module(
            root,
            "svc/stage/eu/app",
            r#"
data "terraform_remote_state" "deps" {
  for_each = toset(["vpc", "eks"])
  backend  = "s3"
  config = {
    key = "svc/stage/eu/${each.key}/terraform.tfstate"
  }
}
"#,
        );
        write_module(
            root,
            "svc/stage/eu/msk",
            "module \"kafka\" {\n  source = \"../../../../_modules/kafka\"\n}\n",
        );
        write_module(root, "_modules/kafka/x/y", "variable \"a\" {}\n");

        let file = root.join(CONFIG_FILE);
        (dir, file)
    }

    #[test]
    fn test_tg014_init() {
        let dir = tempfile::tempdir().unwrap();
        cmd_init(dir.path()).unwrap();
        let config = parser::parse_config_file(&dir.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(config, ProjectConfig::default());
    }

    #[test]
    fn test_tg014_init_already_exists() {
        let dir = tempfile::tempdir().unwrap();
        cmd_init(dir.path()).unwrap();
        let result = cmd_init(dir.path());
        assert!(result.unwrap_err().contains("already exists"));
    }

    #[test]
    fn test_tg014_load_project_builds_graph() {
        let (_dir, file) = fixture();
        let project = load_project(&file).unwrap();
        assert_eq!(project.registry.len(), 4);
        assert!(project.warnings.is_empty(), "{:?}", project.warnings);

        let levels = project.graph.execution_levels().unwrap();
        assert_eq!(
            levels,
            vec![
                vec!["svc/stage/eu/msk".to_string(), "svc/stage/eu/vpc".to_string()],
                vec!["svc/stage/eu/eks".to_string()],
                vec!["svc/stage/eu/app".to_string()],
            ]
        );
        assert_eq!(project.graph.dependencies("svc/stage/eu/app"), vec!["svc/stage/eu/eks", "svc/stage/eu/vpc"]);
    }

    #[test]
    fn test_tg014_resolve_target_by_path() {
        let (dir, file) = fixture();
        let project = load_project(&file).unwrap();
        assert_eq!(project.resolve_target("svc/stage/eu/vpc").as_deref(), Some("svc/stage/eu/vpc"));
        let path = dir.path().join("svc/stage/eu/eks");
        assert_eq!(
            project.resolve_target(path.to_str().unwrap()).as_deref(),
            Some("svc/stage/eu/eks")
        );
        assert!(project.resolve_target("svc/stage/eu/nope").is_none());
    }

    #[test]
    fn test_tg014_affected_with_library() {
        let (dir, file) = fixture();
        let project = load_project(&file).unwrap();

        let by_module = project.affected(&["svc/stage/eu/vpc".to_string()], &[]);
        assert_eq!(by_module.len(), 3);

        let lib = dir.path().canonicalize().unwrap().join("_modules/kafka");
        let by_library = project.affected(&[], &[lib]);
        assert_eq!(by_library.into_iter().collect::<Vec<_>>(), vec!["svc/stage/eu/msk"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_tg014_affected_library_through_symlinked_root() {
        let (dir, _) = fixture();
        let outer = tempfile::tempdir().unwrap();
        let link = outer.path().join("link");
        std::os::unix::fs::symlink(dir.path(), &link).unwrap();

        let project = load_project(&link.join(CONFIG_FILE)).unwrap();
        let by_library = project.affected(&[], &[link.join("_modules/kafka")]);
        assert_eq!(by_library.into_iter().collect::<Vec<_>>(), vec!["svc/stage/eu/msk"]);

        let removed = link.join("_modules/kafka/removed.tf");
        let by_removed = project.affected(&[], &[removed]);
        assert_eq!(by_removed.into_iter().collect::<Vec<_>>(), vec!["svc/stage/eu/msk"]);
    }

    #[test]
    fn test_tg014_validate_and_queries() {
        let (_dir, file) = fixture();
        cmd_validate(&file).unwrap();
        cmd_order(&file, false).unwrap();
        cmd_order(&file, true).unwrap();
        cmd_stats(&file, false).unwrap();
        cmd_stats(&file, true).unwrap();
        cmd_deps(&file, "svc/stage/eu/app", false, false).unwrap();
        cmd_deps(&file, "svc/stage/eu/vpc", true, true).unwrap();
        assert!(cmd_deps(&file, "svc/stage/eu/ghost", false, false).is_err());
    }

    #[test]
    fn test_tg014_plan_scoped() {
        let (_dir, file) = fixture();
        cmd_plan(&file, &[], &[], false).unwrap();
        cmd_plan(&file, &["svc/stage/eu/eks".to_string()], &[], true).unwrap();
    }

    #[test]
    fn test_tg014_affected_requires_changes() {
        let (_dir, file) = fixture();
        assert!(cmd_affected(&file, &[], &[], false).is_err());
        cmd_affected(&file, &["svc/stage/eu/eks".to_string()], &[], false).unwrap();
    }

    #[test]
    fn test_tg014_validate_reports_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        cmd_init(root).unwrap();
        write_module(root, "svc/stage/eu/a", &remote_state("b", "svc/stage/eu/b/terraform.tfstate"));
        write_module(root, "svc/stage/eu/b", &remote_state("a", "svc/stage/eu/a/terraform.tfstate"));
        let file = root.join(CONFIG_FILE);

        let err = cmd_validate(&file).unwrap_err();
        assert!(err.contains("1 dependency cycle"));
        let err = cmd_plan(&file, &[], &[], false).unwrap_err();
        assert!(err.contains("cycle"));
        assert!(cmd_order(&file, false).is_err());
    }

    #[test]
    fn test_tg014_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join(CONFIG_FILE);
        std::fs::write(&file, "version: \"9\"\n").unwrap();
        let err = cmd_validate(&file).unwrap_err();
        assert!(err.contains("validation error"));
    }

    #[test]
    fn test_tg014_dispatch() {
        let (dir, file) = fixture();
        dispatch(Commands::Stats { file: file.clone(), json: false }).unwrap();
        dispatch(Commands::Affected {
            file,
            changed: vec![],
            library: vec![dir.path().join("_modules/kafka")],
            json: true,
        })
        .unwrap();
    }
}
