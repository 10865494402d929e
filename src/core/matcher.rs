//! TG-007: Path matching — candidate paths to registered modules.
//!
//! Matching is an ordered list of independent strategies; the first one to
//! return a module wins. Path strategies run for every candidate. The
//! naming-convention strategies only run for references whose path could not
//! be evaluated, and key off the reference's block label instead of a path.

use super::registry::ModuleRegistry;
use super::resolver::Candidate;
use super::types::Module;
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

/// `s3://bucket/`, `gs://bucket/`, ...
static SCHEME_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.-]*://[^/]*/?").expect("valid scheme regex"));

/// S3 workspace prefix, `env:/<workspace>/`
static WORKSPACE_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^env:/[^/]+/").expect("valid workspace regex"));

/// Everything a path strategy may look at.
pub struct MatchInput<'a, 'r> {
    pub registry: &'a ModuleRegistry,
    pub referrer: &'r Module,
    /// Candidate with scheme and state file stripped
    pub path: String,
    /// Literal trailing segments usable as a bare module name
    pub bare: Option<String>,
}

/// Everything a naming-convention strategy may look at.
pub struct NameInput<'a, 'r> {
    pub registry: &'a ModuleRegistry,
    pub referrer: &'r Module,
    /// Reference name plus its hyphen/underscore variants
    pub variants: Vec<String>,
}

pub type PathStrategy = for<'a, 'r> fn(&MatchInput<'a, 'r>) -> Option<&'a Module>;
pub type NameStrategy = for<'a, 'r> fn(&NameInput<'a, 'r>) -> Option<&'a Module>;

/// Path strategies in the order they are tried.
pub const PATH_STRATEGIES: [(&str, PathStrategy); 4] = [
    ("exact", exact_id),
    ("separators", normalized_separators),
    ("segment-suffix", segment_suffix),
    ("same-context", same_context),
];

/// Naming-convention strategies in the order they are tried, before the global lookup.
pub const NAME_STRATEGIES: [(&str, NameStrategy); 3] = [
    ("name-same-context", name_same_context),
    ("name-split", name_split),
    ("name-relative", name_relative),
];

/// Result of the naming-convention fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameMatch<'a> {
    Matched(&'a Module),
    Ambiguous(Vec<String>),
    NoMatch,
}

/// Matches candidates against a registry.
#[derive(Debug, Clone, Copy)]
pub struct PathMatcher<'a> {
    registry: &'a ModuleRegistry,
    state_file: &'a str,
}

impl<'a> PathMatcher<'a> {
    pub fn new(registry: &'a ModuleRegistry, state_file: &'a str) -> Self {
        Self {
            registry,
            state_file,
        }
    }

    /// Best module for a candidate path, trying every path strategy in order.
    pub fn match_candidate(&self, candidate: &Candidate, referrer: &Module) -> Option<&'a Module> {
        let path = strip_path(candidate.as_str(), self.state_file);
        let bare = match candidate {
            Candidate::Template(text) => template_tail(&strip_path(text, self.state_file)),
            Candidate::Path(_) => {
                let segments = segments(&path);
                (!segments.is_empty() && segments.len() <= 2).then(|| segments.join("/"))
            }
        };
        let input = MatchInput {
            registry: self.registry,
            referrer,
            path,
            bare,
        };

        for (name, strategy) in PATH_STRATEGIES {
            if let Some(module) = strategy(&input) {
                debug!(referrer = %referrer, candidate = candidate.as_str(), dependency = %module, strategy = name, "matched");
                return Some(module);
            }
        }
        debug!(referrer = %referrer, candidate = candidate.as_str(), "no path strategy matched");
        None
    }

    /// Guess the target from the reference's block label.
    pub fn match_by_name(&self, reference_name: &str, referrer: &Module) -> NameMatch<'a> {
        let input = NameInput {
            registry: self.registry,
            referrer,
            variants: name_variants(reference_name),
        };

        for (name, strategy) in NAME_STRATEGIES {
            if let Some(module) = strategy(&input) {
                debug!(referrer = %referrer, reference = reference_name, dependency = %module, strategy = name, "matched");
                return NameMatch::Matched(module);
            }
        }
        global_by_name(&input)
    }
}

// ============================================================================
// Normalisation
// ============================================================================

/// Strip a backend scheme/bucket, an S3 workspace prefix and a trailing state file.
pub fn strip_path(path: &str, state_file: &str) -> String {
    let path = path.trim().replace('\\', "/");
    let path = SCHEME_PREFIX.replace(&path, "");
    let path = WORKSPACE_PREFIX.replace(&path, "");
    let mut path = path.trim_end_matches('/').to_string();

    if let Some((head, last)) = path.rsplit_once('/') {
        if last == state_file || last.ends_with(".tfstate") {
            path = head.to_string();
        }
    } else if path == state_file || path.ends_with(".tfstate") {
        path.clear();
    }
    path.trim_matches('/').to_string()
}

/// Forward slashes only, no empty or `.` segments.
pub fn normalize_separators(path: &str) -> String {
    segments(&path.replace('\\', "/")).join("/")
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty() && *s != ".").collect()
}

/// Literal segments after the last interpolation of a template, if any are whole segments.
fn template_tail(text: &str) -> Option<String> {
    let (rest, partial_first) = match text.rfind('}') {
        Some(i) => {
            let rest = &text[i + 1..];
            (rest, !rest.starts_with('/'))
        }
        None => (text, false),
    };
    let rest = rest.replace('\\', "/");
    let mut tail = segments(&rest);
    if partial_first && !tail.is_empty() {
        tail.remove(0);
    }
    (!tail.is_empty()).then(|| tail.join("/"))
}

fn name_variants(name: &str) -> Vec<String> {
    let mut variants = vec![name.to_string()];
    for variant in [name.replace('_', "-"), name.replace('-', "_")] {
        if !variants.contains(&variant) {
            variants.push(variant);
        }
    }
    variants
}

// ============================================================================
// Path strategies
// ============================================================================

fn exact_id<'a>(input: &MatchInput<'a, '_>) -> Option<&'a Module> {
    input.registry.get(&input.path)
}

fn normalized_separators<'a>(input: &MatchInput<'a, '_>) -> Option<&'a Module> {
    let normalized = normalize_separators(&input.path);
    if normalized == input.path {
        return None;
    }
    input.registry.get(&normalized)
}

fn segment_suffix<'a>(input: &MatchInput<'a, '_>) -> Option<&'a Module> {
    let normalized = normalize_separators(&input.path);
    let parts = segments(&normalized);
    if parts.len() >= 5 {
        let id = parts[parts.len() - 5..].join("/");
        if let Some(module) = input.registry.get(&id) {
            return Some(module);
        }
    }
    if parts.len() >= 4 {
        let id = parts[parts.len() - 4..].join("/");
        return input.registry.get(&id);
    }
    None
}

fn same_context<'a>(input: &MatchInput<'a, '_>) -> Option<&'a Module> {
    let bare = input.bare.as_deref()?;
    let referrer = input.referrer;
    let context = referrer.context_prefix();
    match segments(bare).as_slice() {
        [name] => input
            .registry
            .get(&format!("{}/{}", context, name))
            .or_else(|| sibling(input.registry, referrer, name)),
        [module, submodule] => input
            .registry
            .get(&format!("{}/{}/{}", context, module, submodule)),
        _ => None,
    }
}

fn sibling<'a>(registry: &'a ModuleRegistry, referrer: &Module, name: &str) -> Option<&'a Module> {
    if !referrer.is_submodule() {
        return None;
    }
    registry.get(&format!("{}/{}", referrer.base_id(), name))
}

// ============================================================================
// Naming-convention strategies
// ============================================================================

fn name_same_context<'a>(input: &NameInput<'a, '_>) -> Option<&'a Module> {
    let context = input.referrer.context_prefix();
    input
        .variants
        .iter()
        .find_map(|v| input.registry.get(&format!("{}/{}", context, v)))
}

fn name_split<'a>(input: &NameInput<'a, '_>) -> Option<&'a Module> {
    let context = input.referrer.context_prefix();
    input.variants.iter().find_map(|v| {
        let (module, submodule) = v.split_once(['_', '-'])?;
        if module.is_empty() || submodule.is_empty() {
            return None;
        }
        input
            .registry
            .get(&format!("{}/{}/{}", context, module, submodule))
    })
}

fn name_relative<'a>(input: &NameInput<'a, '_>) -> Option<&'a Module> {
    let referrer = input.referrer;
    if !referrer.is_submodule() {
        return None;
    }
    input.variants.iter().find_map(|v| {
        sibling(input.registry, referrer, v).or_else(|| {
            if *v == referrer.module {
                input.registry.get(&referrer.base_id())
            } else {
                None
            }
        })
    })
}

fn global_by_name<'a>(input: &NameInput<'a, '_>) -> NameMatch<'a> {
    let referrer_id = input.referrer.id();
    let mut found: Vec<&'a Module> = Vec::new();
    for variant in &input.variants {
        for module in input.registry.by_name(variant) {
            if module.id() != referrer_id && !found.contains(&module) {
                found.push(module);
            }
        }
    }

    if found.len() <= 1 {
        return found.first().map_or(NameMatch::NoMatch, |m| NameMatch::Matched(*m));
    }

    let same_env: Vec<&'a Module> = found
        .iter()
        .copied()
        .filter(|m| m.environment == input.referrer.environment)
        .collect();
    if let [only] = same_env.as_slice() {
        return NameMatch::Matched(*only);
    }

    let mut ids: Vec<String> = found.iter().map(|m| m.id()).collect();
    ids.sort();
    NameMatch::Ambiguous(ids)
}
