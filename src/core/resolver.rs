//! TG-006: Remote state path resolution.
//!
//! Builds a module's evaluation scope (declared locals over path-derived
//! bindings), then evaluates each reference's `key`/`prefix` expression,
//! expanding `for_each` into one path per element. When evaluation is not
//! possible the reference degrades to a template candidate that the matcher
//! can still recognise.

use super::context::EvalContext;
use super::error::ExtractionError;
use super::expr::{Expr, Unresolved, Value};
use super::types::{Module, RemoteStateReference};
use indexmap::IndexMap;
use tracing::debug;

/// A path a reference may point at.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Candidate {
    /// Fully evaluated path
    Path(String),
    /// Source text of an expression that could not be evaluated
    Template(String),
}

impl Candidate {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Path(s) | Self::Template(s) => s,
        }
    }

    pub fn is_template(&self) -> bool {
        matches!(self, Self::Template(_))
    }
}

/// Outcome of resolving one reference.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    pub candidates: Vec<Candidate>,

    /// Problems that already cost candidates (missing key, skipped entries)
    pub errors: Vec<ExtractionError>,

    /// Set when candidates come from the template fallback
    pub fallback: Option<ExtractionError>,
}

impl Resolution {
    pub fn used_fallback(&self) -> bool {
        self.fallback.is_some()
    }
}

/// Scope for evaluating a module's expressions.
///
/// `local` holds the declared locals evaluated to a fixed point, layered over
/// `service`, `environment`, `region`, `module` (the leaf name) and, for
/// submodules, `scope` (the parent module name). A declared local that does
/// not evaluate leaves the inferred value in place.
pub fn module_context(module: &Module, locals: &IndexMap<String, Expr>) -> EvalContext<'static> {
    let mut resolved: IndexMap<String, Value> = IndexMap::new();
    resolved.insert("service".into(), Value::String(module.service.clone()));
    resolved.insert("environment".into(), Value::String(module.environment.clone()));
    resolved.insert("region".into(), Value::String(module.region.clone()));
    resolved.insert("module".into(), Value::String(module.name().to_string()));
    if module.is_submodule() {
        resolved.insert("scope".into(), Value::String(module.module.clone()));
    }

    let mut pending: Vec<(&String, &Expr)> = locals.iter().collect();
    loop {
        let mut progressed = false;
        let mut i = 0;
        while i < pending.len() {
            let (name, expr) = pending[i];
            let waiting = expr
                .local_refs()
                .iter()
                .any(|r| r != name && pending.iter().any(|(p, _)| *p == r));
            if waiting {
                i += 1;
                continue;
            }

            let mut scope = EvalContext::new();
            scope.bind("local", Value::Object(resolved.clone()));
            match expr.eval(&scope) {
                Ok(value) => {
                    resolved.insert(name.clone(), value);
                }
                Err(reason) => {
                    debug!(module = %module, local = %name, %reason, "local not evaluated");
                }
            }
            pending.remove(i);
            progressed = true;
        }
        if pending.is_empty() || !progressed {
            break;
        }
    }

    let mut ctx = EvalContext::new();
    ctx.bind("local", Value::Object(resolved));
    ctx
}

/// Resolve a reference into candidate paths.
pub fn resolve_reference(
    reference: &RemoteStateReference,
    module: &Module,
    ctx: &EvalContext<'_>,
) -> Resolution {
    let module_id = module.id();
    let mut resolution = Resolution::default();

    let Some(path_expr) = reference.path_expr() else {
        resolution.errors.push(ExtractionError::MissingStatePath {
            module: module_id,
            reference: reference.name.clone(),
        });
        return resolution;
    };

    let Some(collection) = &reference.for_each else {
        match eval_path(path_expr, ctx) {
            Ok(path) => resolution.candidates.push(Candidate::Path(path)),
            Err(reason) => {
                resolution.candidates.push(template_fallback(path_expr));
                resolution.fallback = Some(ExtractionError::UnresolvedExpression {
                    module: module_id,
                    reference: reference.name.clone(),
                    reason: reason.reason,
                });
            }
        }
        return resolution;
    };

    let entries = match collection.eval(ctx) {
        Ok(value) => match collection_entries(value) {
            Some(entries) => entries,
            None => {
                resolution.candidates.push(template_fallback(path_expr));
                resolution.fallback = Some(ExtractionError::UnresolvedCollection {
                    module: module_id,
                    reference: reference.name.clone(),
                    reason: format!("'{}' is not a map or set", collection),
                });
                return resolution;
            }
        },
        Err(reason) => {
            resolution.candidates.push(template_fallback(path_expr));
            resolution.fallback = Some(ExtractionError::UnresolvedCollection {
                module: module_id,
                reference: reference.name.clone(),
                reason: reason.reason,
            });
            return resolution;
        }
    };

    if entries.is_empty() {
        debug!(module = %module_id, reference = %reference.name, "for_each over empty collection");
        return resolution;
    }

    for (key, value) in entries {
        let mut each = IndexMap::new();
        each.insert("key".to_string(), Value::String(key.clone()));
        each.insert("value".to_string(), value);
        let mut scope = ctx.child();
        scope.bind("each", Value::Object(each));

        match eval_path(path_expr, &scope) {
            Ok(path) => {
                if !resolution.candidates.contains(&Candidate::Path(path.clone())) {
                    resolution.candidates.push(Candidate::Path(path));
                }
            }
            Err(reason) => resolution.errors.push(ExtractionError::SkippedEntry {
                module: module_id.clone(),
                reference: reference.name.clone(),
                key,
                reason: reason.reason,
            }),
        }
    }

    if resolution.candidates.is_empty() {
        resolution.candidates.push(template_fallback(path_expr));
        resolution.fallback = Some(ExtractionError::UnresolvedExpression {
            module: module_id,
            reference: reference.name.clone(),
            reason: "no for_each entry produced a path".to_string(),
        });
    }

    resolution
}

/// Evaluate a path expression. Only string results count.
pub fn eval_path(expr: &Expr, ctx: &EvalContext<'_>) -> Result<String, Unresolved> {
    match expr.eval(ctx)? {
        Value::String(path) => Ok(path),
        other => Err(Unresolved::new(format!(
            "path '{}' is a {}, not a string",
            expr,
            other.type_name()
        ))),
    }
}

/// A statically known path if the expression needs no variables, else its source text.
fn template_fallback(expr: &Expr) -> Candidate {
    match eval_path(expr, &EvalContext::new()) {
        Ok(path) => Candidate::Path(path),
        Err(_) => Candidate::Template(expr.source_text()),
    }
}

/// `(key, value)` pairs of a map, or `(element, element)` for a list/set.
fn collection_entries(value: Value) -> Option<Vec<(String, Value)>> {
    match value {
        Value::Object(map) => Some(map.into_iter().collect()),
        Value::List(items) => Some(
            items
                .into_iter()
                .map(|item| {
                    let key = item.interpolate().unwrap_or_else(|| item.to_string());
                    (key, item)
                })
                .collect(),
        ),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::references::parse_config;

    fn resolve_all(src: &str, module: &Module) -> Vec<Resolution> {
        let config = parse_config(src).unwrap();
        let ctx = module_context(module, &config.locals);
        config
            .remote_states
            .iter()
            .map(|r| resolve_reference(r, module, &ctx))
            .collect()
    }

    fn paths(resolution: &Resolution) -> Vec<&str> {
        let mut out: Vec<&str> = resolution.candidates.iter().map(|c| c.as_str()).collect();
        out.sort();
        out
    }

    fn eks() -> Module {
        Module::new("svc", "stage", "eu-central-1", "eks")
    }

    #[test]
    fn test_tg006_literal_path() {
        let src = r#"
data "terraform_remote_state" "vpc" {
  backend = "s3"
  config = {
    key = "a/b/c/terraform.tfstate"
  }
}
"#;
        let res = resolve_all(src, &eks());
        assert_eq!(res[0].candidates, vec![Candidate::Path("a/b/c/terraform.tfstate".into())]);
        assert!(!res[0].used_fallback());
        assert!(res[0].errors.is_empty());
    }

    #[test]
    fn test_tg006_for_each_over_map() {
        let src = r#"
locals {
  deps = {
    vpc = "x/vpc"
    rds = "x/rds"
  }
}

data "terraform_remote_state" "deps" {
  for_each = local.deps
  backend  = "s3"
  config = {
    key = "${each.value}/terraform.tfstate"
  }
}
"#;
        let res = resolve_all(src, &eks());
        assert_eq!(paths(&res[0]), vec!["x/rds/terraform.tfstate", "x/vpc/terraform.tfstate"]);
        assert!(!res[0].used_fallback());
    }

    #[test]
    fn test_tg006_for_each_over_set_uses_key() {
        let src = r#"
data "terraform_remote_state" "deps" {
  for_each = toset(["vpc", "rds"])
  backend  = "s3"
  config = {
    key = "${local.service}/${local.environment}/${local.region}/${each.key}/terraform.tfstate"
  }
}
"#;
        let res = resolve_all(src, &eks());
        assert_eq!(
            paths(&res[0]),
            vec![
                "svc/stage/eu-central-1/rds/terraform.tfstate",
                "svc/stage/eu-central-1/vpc/terraform.tfstate",
            ]
        );
    }

    #[test]
    fn test_tg006_path_derived_bindings() {
        let src = r#"
data "terraform_remote_state" "vpc" {
  backend = "s3"
  config = {
    key = "${local.service}/${local.environment}/${local.region}/vpc/terraform.tfstate"
  }
}
"#;
        let res = resolve_all(src, &eks());
        assert_eq!(paths(&res[0]), vec!["svc/stage/eu-central-1/vpc/terraform.tfstate"]);
    }

    #[test]
    fn test_tg006_declared_locals_win() {
        let src = r#"
locals {
  environment = "prod"
  prefix      = "${local.service}/${local.environment}"
}

data "terraform_remote_state" "vpc" {
  backend = "s3"
  config = {
    key = "${local.prefix}/${local.region}/vpc/terraform.tfstate"
  }
}
"#;
        let res = resolve_all(src, &eks());
        assert_eq!(paths(&res[0]), vec!["svc/prod/eu-central-1/vpc/terraform.tfstate"]);
    }

    #[test]
    fn test_tg006_locals_declared_out_of_order() {
        let src = r#"
locals {
  key    = "${local.prefix}/vpc"
  prefix = "base"
}

data "terraform_remote_state" "vpc" {
  backend = "s3"
  config = {
    key = local.key
  }
}
"#;
        let res = resolve_all(src, &eks());
        assert_eq!(paths(&res[0]), vec!["base/vpc"]);
    }

    #[test]
    fn test_tg006_unevaluable_local_keeps_inferred() {
        let src = r#"
locals {
  service = split("/", path.cwd)[3]
}

data "terraform_remote_state" "vpc" {
  backend = "s3"
  config = {
    key = "${local.service}/vpc"
  }
}
"#;
        let res = resolve_all(src, &eks());
        assert_eq!(paths(&res[0]), vec!["svc/vpc"]);
    }

    #[test]
    fn test_tg006_submodule_bindings() {
        let module = eks().with_submodule("addons");
        let ctx = module_context(&module, &IndexMap::new());
        let local = ctx.lookup("local").unwrap();
        let Value::Object(map) = local else { panic!("local is not an object") };
        assert_eq!(map["module"], Value::String("addons".into()));
        assert_eq!(map["scope"], Value::String("eks".into()));
        assert_eq!(map["region"], Value::String("eu-central-1".into()));
    }

    #[test]
    fn test_tg006_unresolved_variable_falls_back_to_template() {
        let src = r#"
data "terraform_remote_state" "vpc" {
  backend = "s3"
  config = {
    key = "${var.prefix}/vpc/terraform.tfstate"
  }
}
"#;
        let res = resolve_all(src, &eks());
        assert_eq!(
            res[0].candidates,
            vec![Candidate::Template("${var.prefix}/vpc/terraform.tfstate".into())]
        );
        assert!(matches!(res[0].fallback, Some(ExtractionError::UnresolvedExpression { .. })));
    }

    #[test]
    fn test_tg006_unresolvable_collection_keeps_literal_path() {
        let src = r#"
data "terraform_remote_state" "vpc" {
  for_each = data.external.list.result
  backend  = "s3"
  config = {
    key = "shared/vpc/terraform.tfstate"
  }
}
"#;
        let res = resolve_all(src, &eks());
        assert_eq!(res[0].candidates, vec![Candidate::Path("shared/vpc/terraform.tfstate".into())]);
        assert!(matches!(res[0].fallback, Some(ExtractionError::UnresolvedCollection { .. })));
    }

    #[test]
    fn test_tg006_scalar_collection_falls_back_to_template() {
        let src = r#"
data "terraform_remote_state" "deps" {
  for_each = "vpc"
  backend  = "s3"
  config = {
    key = "${each.key}/terraform.tfstate"
  }
}
"#;
        let res = resolve_all(src, &eks());
        assert_eq!(
            res[0].candidates,
            vec![Candidate::Template("${each.key}/terraform.tfstate".into())]
        );
        assert!(res[0].used_fallback());
        assert!(matches!(
            &res[0].fallback,
            Some(ExtractionError::UnresolvedCollection { reason, .. }) if reason.contains("not a map or set")
        ));
        assert!(res[0].errors.is_empty());
    }

    #[test]
    fn test_tg006_skipped_entries_are_noted() {
        let src = r#"
locals {
  deps = {
    vpc = "x/vpc"
    bad = ["not", "a", "string"]
  }
}

data "terraform_remote_state" "deps" {
  for_each = local.deps
  backend  = "s3"
  config = {
    key = each.value
  }
}
"#;
        let res = resolve_all(src, &eks());
        assert_eq!(paths(&res[0]), vec!["x/vpc"]);
        assert_eq!(res[0].errors.len(), 1);
        assert!(matches!(&res[0].errors[0], ExtractionError::SkippedEntry { key, .. } if key == "bad"));
    }

    #[test]
    fn test_tg006_empty_collection() {
        let src = r#"
data "terraform_remote_state" "deps" {
  for_each = {}
  backend  = "s3"
  config = {
    key = each.value
  }
}
"#;
        let res = resolve_all(src, &eks());
        assert!(res[0].candidates.is_empty());
        assert!(res[0].errors.is_empty());
        assert!(!res[0].used_fallback());
    }

    #[test]
    fn test_tg006_missing_or_double_path() {
        let src = r#"
data "terraform_remote_state" "none" {
  backend = "s3"
  config = {
    bucket = "b"
  }
}

data "terraform_remote_state" "both" {
  backend = "gcs"
  config = {
    key    = "a"
    prefix = "b"
  }
}
"#;
        let res = resolve_all(src, &eks());
        for r in &res {
            assert!(r.candidates.is_empty());
            assert!(matches!(r.errors[0], ExtractionError::MissingStatePath { .. }));
        }
    }

    #[test]
    fn test_tg006_non_string_path() {
        let src = r#"
data "terraform_remote_state" "vpc" {
  backend = "s3"
  config = {
    key = 42
  }
}
"#;
        let res = resolve_all(src, &eks());
        assert!(res[0].used_fallback());
        assert_eq!(res[0].candidates, vec![Candidate::Template("42".into())]);
    }
}
