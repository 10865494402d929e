//! TG-003: Reference extraction — HCL to `ModuleConfig`.
//!
//! Reads the three block kinds the dependency engine cares about:
//! - `locals { ... }` bindings
//! - `data "terraform_remote_state" "<name>" { ... }` references
//! - `module "<name>" { source = "./..." }` local library inclusions
//!
//! Everything else in the file is ignored.

use super::discovery::normalize_path;
use super::error::ExtractionError;
use super::expr::{object_key, Expr};
use super::types::{LibrarySource, Module, ModuleConfig, RemoteStateReference};
use hcl::expr::Expression;
use std::path::Path;
use tracing::debug;

const REMOTE_STATE: &str = "terraform_remote_state";

/// Parse one HCL document and merge its blocks into `config`.
pub fn parse_into(content: &str, module_dir: &Path, config: &mut ModuleConfig) -> Result<(), String> {
    let body = hcl::parse(content).map_err(|e| e.to_string())?;

    for block in body.blocks() {
        let labels: Vec<&str> = block.labels().iter().map(|l| l.as_str()).collect();
        match (block.identifier(), labels.as_slice()) {
            ("locals", []) => {
                for attr in block.body().attributes() {
                    config
                        .locals
                        .insert(attr.key().to_string(), Expr::from_hcl(attr.expr()));
                }
            }
            ("data", [REMOTE_STATE, name]) => {
                config.remote_states.push(remote_state(name, block.body()));
            }
            ("module", [name]) => {
                if let Some(library) = library_source(name, block.body(), module_dir) {
                    config.libraries.push(library);
                }
            }
            _ => {}
        }
    }

    Ok(())
}

/// Parse a standalone document (no library resolution base).
pub fn parse_config(content: &str) -> Result<ModuleConfig, String> {
    let mut config = ModuleConfig::default();
    parse_into(content, Path::new(""), &mut config)?;
    Ok(config)
}

/// Read and merge every `*.tf` file in a module directory, in file name order.
///
/// Unreadable or unparsable files become `Parse` errors; the rest of the
/// module is still used.
pub fn load_module_config(module: &Module) -> (ModuleConfig, Vec<ExtractionError>) {
    let mut config = ModuleConfig::default();
    let mut errors = Vec::new();
    let module_id = module.id();

    let parse_error = |file: &Path, message: String| ExtractionError::Parse {
        module: module_id.clone(),
        file: file.display().to_string(),
        message,
    };

    let entries = match std::fs::read_dir(&module.path) {
        Ok(entries) => entries,
        Err(e) => {
            errors.push(parse_error(&module.path, e.to_string()));
            return (config, errors);
        }
    };

    let mut files: Vec<_> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "tf"))
        .collect();
    files.sort();

    for file in &files {
        let content = match std::fs::read_to_string(file) {
            Ok(content) => content,
            Err(e) => {
                errors.push(parse_error(file, e.to_string()));
                continue;
            }
        };
        if let Err(message) = parse_into(&content, &module.path, &mut config) {
            errors.push(parse_error(file, message));
        }
    }

    debug!(
        module = %module_id,
        files = files.len(),
        locals = config.locals.len(),
        remote_states = config.remote_states.len(),
        libraries = config.libraries.len(),
        "loaded module config"
    );

    (config, errors)
}

fn remote_state(name: &str, body: &hcl::Body) -> RemoteStateReference {
    let mut reference = RemoteStateReference {
        name: name.to_string(),
        backend: String::new(),
        for_each: None,
        key: None,
        prefix: None,
    };

    for attr in body.attributes() {
        match attr.key() {
            "backend" => reference.backend = Expr::from_hcl(attr.expr()).source_text(),
            "for_each" => reference.for_each = Some(Expr::from_hcl(attr.expr())),
            "config" => {
                if let Expression::Object(object) = attr.expr() {
                    for (key, value) in object.iter() {
                        match object_key(key).as_str() {
                            "key" => reference.key = Some(Expr::from_hcl(value)),
                            "prefix" => reference.prefix = Some(Expr::from_hcl(value)),
                            _ => {}
                        }
                    }
                }
            }
            _ => {}
        }
    }

    reference
}

fn library_source(name: &str, body: &hcl::Body, module_dir: &Path) -> Option<LibrarySource> {
    let source = body
        .attributes()
        .find(|attr| attr.key() == "source")
        .and_then(|attr| match attr.expr() {
            Expression::String(s) => Some(s.clone()),
            _ => None,
        })?;

    // registry and git sources are not part of the repository
    if !(source.starts_with("./") || source.starts_with("../")) {
        return None;
    }

    Some(LibrarySource {
        name: name.to_string(),
        target: normalize_path(&module_dir.join(&source)),
        source,
    })
}
