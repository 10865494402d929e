//! TG-008: Dependency extraction — references to edges.
//!
//! Per module: build the evaluation scope once, resolve every remote state
//! reference into candidates, then match each candidate against the
//! registry. Modules are independent of each other; nothing here holds
//! shared mutable state.

use super::discovery::normalize_path;
use super::error::ExtractionError;
use super::graph::{DependencyGraph, GraphBuilder};
use super::matcher::{NameMatch, PathMatcher};
use super::registry::ModuleRegistry;
use super::resolver::{module_context, resolve_reference, Candidate};
use super::types::{Dependency, DependencyKind, Module, ModuleConfig, ProjectConfig};
use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use std::path::PathBuf;
use tracing::debug;

/// Reference label used for edges declared in `tfgraph.yaml`.
pub const DECLARED_REFERENCE: &str = "depends_on";

/// Edges and warnings found for one module.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModuleExtraction {
    pub dependencies: Vec<Dependency>,
    pub errors: Vec<ExtractionError>,
}

/// Everything extracted across the registry.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub dependencies: Vec<Dependency>,
    pub errors: Vec<ExtractionError>,

    /// Module ID -> normalised library inclusion targets
    pub libraries: FxHashMap<String, Vec<PathBuf>>,
}

/// Extract the remote state dependencies of a single module.
pub fn extract_module(matcher: &PathMatcher<'_>, module: &Module, config: &ModuleConfig) -> ModuleExtraction {
    let module_id = module.id();
    let ctx = module_context(module, &config.locals);
    let mut out = ModuleExtraction::default();

    for reference in &config.remote_states {
        let resolution = resolve_reference(reference, module, &ctx);
        out.errors.extend(resolution.errors);

        let mut matched = false;
        let mut unmatched: Vec<&Candidate> = Vec::new();
        for candidate in &resolution.candidates {
            match matcher.match_candidate(candidate, module) {
                Some(target) => {
                    matched = true;
                    push_edge(&mut out.dependencies, module, target, &reference.name);
                }
                None => unmatched.push(candidate),
            }
        }

        let Some(fallback) = resolution.fallback else {
            for candidate in unmatched {
                out.errors.push(ExtractionError::UnresolvedMatch {
                    module: module_id.clone(),
                    reference: reference.name.clone(),
                    path: candidate.as_str().to_string(),
                });
            }
            continue;
        };
        if matched {
            continue;
        }

        match matcher.match_by_name(&reference.name, module) {
            NameMatch::Matched(target) => {
                push_edge(&mut out.dependencies, module, target, &reference.name);
            }
            NameMatch::Ambiguous(candidates) => out.errors.push(ExtractionError::AmbiguousMatch {
                module: module_id.clone(),
                reference: reference.name.clone(),
                candidates,
            }),
            NameMatch::NoMatch => {
                out.errors.push(fallback);
                out.errors.push(ExtractionError::UnresolvedMatch {
                    module: module_id.clone(),
                    reference: reference.name.clone(),
                    path: unmatched
                        .first()
                        .map_or_else(|| reference.name.clone(), |c| c.as_str().to_string()),
                });
            }
        }
    }

    debug!(
        module = %module_id,
        references = config.remote_states.len(),
        dependencies = out.dependencies.len(),
        warnings = out.errors.len(),
        "extracted dependencies"
    );
    out
}

/// Extract every registered module, plus the declared edges of the project file.
///
/// Modules without a loaded config contribute nothing. Declared edges are
/// passed through unchecked; the graph builder drops unknown endpoints.
pub fn extract_all(
    registry: &ModuleRegistry,
    configs: &FxHashMap<String, ModuleConfig>,
    declared: &IndexMap<String, Vec<String>>,
    state_file: &str,
) -> Extraction {
    let matcher = PathMatcher::new(registry, state_file);
    let mut extraction = Extraction::default();

    for module in registry.all() {
        let id = module.id();
        let Some(config) = configs.get(&id) else {
            continue;
        };

        let result = extract_module(&matcher, module, config);
        extraction.dependencies.extend(result.dependencies);
        extraction.errors.extend(result.errors);

        if !config.libraries.is_empty() {
            let targets = config
                .libraries
                .iter()
                .map(|lib| normalize_path(&lib.target))
                .collect();
            extraction.libraries.insert(id, targets);
        }
    }

    for (from, targets) in declared {
        for to in targets {
            extraction.dependencies.push(Dependency {
                from: from.clone(),
                to: to.clone(),
                kind: DependencyKind::Declared,
                reference: DECLARED_REFERENCE.to_string(),
            });
        }
    }

    extraction
}

/// Discover-to-graph in one step for already loaded configs.
pub fn build_graph(
    registry: &ModuleRegistry,
    configs: &FxHashMap<String, ModuleConfig>,
    project: &ProjectConfig,
) -> DependencyGraph {
    let extraction = extract_all(registry, configs, &project.dependencies, &project.state_file);
    GraphBuilder::new(registry.ids())
        .dependencies(extraction.dependencies)
        .libraries(extraction.libraries)
        .errors(extraction.errors)
        .build()
}

fn push_edge(dependencies: &mut Vec<Dependency>, from: &Module, to: &Module, reference: &str) {
    // reading one's own state is not a dependency
    if from.id() == to.id() {
        debug!(module = %from, reference, "self reference ignored");
        return;
    }
    dependencies.push(Dependency {
        from: from.id(),
        to: to.id(),
        kind: DependencyKind::RemoteState,
        reference: reference.to_string(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::references::{parse_config, parse_into};
    use std::path::Path;

    fn registry(ids: &[&str]) -> ModuleRegistry {
        ModuleRegistry::new(ids.iter().map(|id| Module::from_id(id).unwrap()).collect())
    }

    fn extract(reg: &ModuleRegistry, referrer: &str, src: &str) -> ModuleExtraction {
        let module = reg.get(referrer).unwrap();
        let config = parse_config(src).unwrap();
        extract_module(&PathMatcher::new(reg, "terraform.tfstate"), module, &config)
    }

    fn targets(extraction: &ModuleExtraction) -> Vec<&str> {
        extraction.dependencies.iter().map(|d| d.to.as_str()).collect()
    }

    #[test]
    fn test_tg008_literal_key_creates_edge() {
        let reg = registry(&["svc/stage/eu/vpc", "svc/stage/eu/eks"]);
        let out = extract(
            &reg,
            "svc/stage/eu/eks",
            r#"
data "terraform_remote_state" "vpc" {
  backend = "s3"
  config = {
    key = "svc/stage/eu/vpc/terraform.tfstate"
  }
}
"#,
        );
        assert_eq!(targets(&out), vec!["svc/stage/eu/vpc"]);
        assert_eq!(out.dependencies[0].from, "svc/stage/eu/eks");
        assert_eq!(out.dependencies[0].kind, DependencyKind::RemoteState);
        assert_eq!(out.dependencies[0].reference, "vpc");
        assert!(out.errors.is_empty());
    }

    #[test]
    fn test_tg008_for_each_keeps_every_edge() {
        let reg = registry(&["svc/stage/eu/vpc", "svc/stage/eu/rds", "svc/stage/eu/app"]);
        let out = extract(
            &reg,
            "svc/stage/eu/app",
            r#"
data "terraform_remote_state" "deps" {
  for_each = toset(["vpc", "rds"])
  backend  = "s3"
  config = {
    key = "${local.service}/${local.environment}/${local.region}/${each.key}/terraform.tfstate"
  }
}
"#,
        );
        let mut found = targets(&out);
        found.sort();
        assert_eq!(found, vec!["svc/stage/eu/rds", "svc/stage/eu/vpc"]);
    }

    #[test]
    fn test_tg008_unresolved_expression_uses_naming_convention() {
        let src = r#"
data "terraform_remote_state" "vpc" {
  backend = "s3"
  config = {
    key = "${var.state_prefix}-network"
  }
}
"#;
        let reg = registry(&["svc/stage/eu-central-1/vpc", "svc/stage/eu-central-1/eks"]);
        let out = extract(&reg, "svc/stage/eu-central-1/eks", src);
        assert_eq!(targets(&out), vec!["svc/stage/eu-central-1/vpc"]);
        assert!(out.errors.is_empty());

        let without = registry(&["svc/stage/eu-central-1/eks"]);
        let out = extract(&without, "svc/stage/eu-central-1/eks", src);
        assert!(out.dependencies.is_empty());
        assert!(matches!(out.errors[0], ExtractionError::UnresolvedExpression { .. }));
        assert!(matches!(out.errors[1], ExtractionError::UnresolvedMatch { .. }));
    }

    #[test]
    fn test_tg008_evaluated_path_without_match_is_unresolved() {
        let reg = registry(&["svc/stage/eu/vpc", "svc/stage/eu/eks"]);
        let out = extract(
            &reg,
            "svc/stage/eu/eks",
            r#"
data "terraform_remote_state" "vpc" {
  backend = "s3"
  config = {
    key = "legacy/network/terraform.tfstate"
  }
}
"#,
        );
        // evaluated paths never fall back to the reference name
        assert!(out.dependencies.is_empty());
        assert!(matches!(
            &out.errors[0],
            ExtractionError::UnresolvedMatch { path, .. } if path == "legacy/network/terraform.tfstate"
        ));
    }

    #[test]
    fn test_tg008_ambiguous_name() {
        let reg = registry(&["a/prod/us/dns", "b/prod/us/dns", "svc/stage/eu/eks"]);
        let out = extract(
            &reg,
            "svc/stage/eu/eks",
            r#"
data "terraform_remote_state" "dns" {
  backend = "s3"
  config = {
    key = var.dns_key
  }
}
"#,
        );
        assert!(out.dependencies.is_empty());
        assert!(matches!(
            &out.errors[0],
            ExtractionError::AmbiguousMatch { candidates, .. } if candidates.len() == 2
        ));
    }

    #[test]
    fn test_tg008_self_reference_skipped() {
        let reg = registry(&["svc/stage/eu/vpc"]);
        let out = extract(
            &reg,
            "svc/stage/eu/vpc",
            r#"
data "terraform_remote_state" "me" {
  backend = "s3"
  config = {
    key = "svc/stage/eu/vpc/terraform.tfstate"
  }
}
"#,
        );
        assert!(out.dependencies.is_empty());
        assert!(out.errors.is_empty());
    }

    #[test]
    fn test_tg008_missing_path_is_reported_once() {
        let reg = registry(&["svc/stage/eu/vpc", "svc/stage/eu/eks"]);
        let out = extract(
            &reg,
            "svc/stage/eu/eks",
            r#"
data "terraform_remote_state" "vpc" {
  backend = "s3"
  config = {
    bucket = "state"
  }
}
"#,
        );
        assert!(out.dependencies.is_empty());
        assert_eq!(out.errors.len(), 1);
        assert!(matches!(out.errors[0], ExtractionError::MissingStatePath { .. }));
    }

    #[test]
    fn test_tg008_extract_all_with_declared_and_libraries() {
        let reg = ModuleRegistry::new(vec![
            Module::from_id("svc/stage/eu/vpc").unwrap(),
            Module::from_id("svc/stage/eu/msk")
                .unwrap()
                .with_path("/infra/svc/stage/eu/msk"),
        ]);
        let mut configs = FxHashMap::default();
        let mut msk = ModuleConfig::default();
        parse_into(
            "module \"kafka\" {\n  source = \"../../../../_modules/kafka\"\n}\n",
            Path::new("/infra/svc/stage/eu/msk"),
            &mut msk,
        )
        .unwrap();
        configs.insert("svc/stage/eu/msk".to_string(), msk);

        let mut declared = IndexMap::new();
        declared.insert("svc/stage/eu/msk".to_string(), vec!["svc/stage/eu/vpc".to_string()]);

        let extraction = extract_all(&reg, &configs, &declared, "terraform.tfstate");
        assert_eq!(extraction.dependencies.len(), 1);
        assert_eq!(extraction.dependencies[0].kind, DependencyKind::Declared);
        assert_eq!(extraction.dependencies[0].reference, DECLARED_REFERENCE);
        assert_eq!(
            extraction.libraries["svc/stage/eu/msk"],
            vec![PathBuf::from("/infra/_modules/kafka")]
        );
    }

    #[test]
    fn test_tg008_build_graph_drops_unknown_declared_target() {
        let reg = registry(&["svc/stage/eu/vpc", "svc/stage/eu/eks"]);
        let mut project = ProjectConfig::default();
        project
            .dependencies
            .insert("svc/stage/eu/eks".to_string(), vec!["svc/stage/eu/gone".to_string()]);

        let graph = build_graph(&reg, &FxHashMap::default(), &project);
        assert_eq!(graph.edge_count(), 0);
        assert!(matches!(
            &graph.errors()[0],
            ExtractionError::UnknownNode { target, .. } if target == "svc/stage/eu/gone"
        ));
    }
}
