//! TG-012: Project file parsing and validation.
//!
//! Parses tfgraph.yaml and validates structural constraints:
//! - Version must be "1.0"
//! - State file must be a bare file name
//! - Declared dependency IDs must have 4 or 5 segments
//! - A module may not declare itself as a dependency

use super::types::{Module, ProjectConfig};
use std::path::Path;

/// Default project file name.
pub const CONFIG_FILE: &str = "tfgraph.yaml";

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Parse a tfgraph.yaml file from disk.
pub fn parse_config_file(path: &Path) -> Result<ProjectConfig, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    parse_config(&content)
}

/// Load a project file, or defaults when it does not exist.
///
/// A relative `root` is taken relative to the file's directory.
pub fn load_project(path: &Path) -> Result<ProjectConfig, String> {
    let mut config = if path.exists() {
        parse_config_file(path)?
    } else {
        ProjectConfig::default()
    };
    if config.root.is_relative() {
        let base = path.parent().unwrap_or_else(|| Path::new(""));
        config.root = base.join(&config.root);
    }
    Ok(config)
}

/// Parse a tfgraph.yaml from a string. An empty document means all defaults.
pub fn parse_config(yaml: &str) -> Result<ProjectConfig, String> {
    if yaml.trim().is_empty() {
        return Ok(ProjectConfig::default());
    }
    serde_yaml_ng::from_str(yaml).map_err(|e| format!("YAML parse error: {}", e))
}

/// Validate a parsed config. Returns a list of errors (empty = valid).
pub fn validate_config(config: &ProjectConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(ValidationError {
            message: format!("version must be \"1.0\", got \"{}\"", config.version),
        });
    }

    if config.state_file.is_empty() {
        errors.push(ValidationError {
            message: "state_file must not be empty".to_string(),
        });
    } else if config.state_file.contains('/') {
        errors.push(ValidationError {
            message: format!("state_file '{}' must be a file name, not a path", config.state_file),
        });
    }

    for dir in &config.library_dirs {
        if dir.is_empty() || dir.contains('/') {
            errors.push(ValidationError {
                message: format!("library_dirs entry '{}' must be a directory name", dir),
            });
        }
    }

    for (id, targets) in &config.dependencies {
        if Module::from_id(id).is_none() {
            errors.push(ValidationError {
                message: format!("dependency key '{}' is not a module ID", id),
            });
        }
        for target in targets {
            if Module::from_id(target).is_none() {
                errors.push(ValidationError {
                    message: format!("module '{}' depends on '{}', which is not a module ID", id, target),
                });
            }
            if target == id {
                errors.push(ValidationError {
                    message: format!("module '{}' depends on itself", id),
                });
            }
        }
    }

    errors
}

/// Contents written by `tfgraph init`.
pub fn default_config_yaml() -> String {
    r#"version: "1.0"
# directory holding service/environment/region/module[/submodule]
root: .
state_file: terraform.tfstate
# directories with shared library modules, never treated as modules
library_dirs:
  - _modules
# edges not expressed through terraform_remote_state
dependencies: {}
"#
    .to_string()
}
