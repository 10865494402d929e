//! TG-009: Error taxonomy — fatal graph errors and non-fatal extraction warnings.

use thiserror::Error;

/// Errors from graph operations that need a total order.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("dependency cycle detected involving: {}", .members.join(", "))]
    CyclicGraph { members: Vec<String> },
}

/// A non-fatal problem found while extracting dependencies.
///
/// Every variant carries the referrer module ID. Extraction continues past
/// all of these; the module just ends up with fewer edges.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionError {
    #[error("{module}: cannot parse {file}: {message}")]
    Parse {
        module: String,
        file: String,
        message: String,
    },

    #[error("{module}: remote state '{reference}' must set exactly one of key or prefix")]
    MissingStatePath { module: String, reference: String },

    #[error("{module}: remote state '{reference}': cannot evaluate path: {reason}")]
    UnresolvedExpression {
        module: String,
        reference: String,
        reason: String,
    },

    #[error("{module}: remote state '{reference}': cannot evaluate for_each: {reason}")]
    UnresolvedCollection {
        module: String,
        reference: String,
        reason: String,
    },

    #[error("{module}: remote state '{reference}': skipped for_each entry '{key}': {reason}")]
    SkippedEntry {
        module: String,
        reference: String,
        key: String,
        reason: String,
    },

    #[error("{module}: remote state '{reference}': no module matches '{path}'")]
    UnresolvedMatch {
        module: String,
        reference: String,
        path: String,
    },

    #[error("{module}: remote state '{reference}': ambiguous match, candidates: {}", .candidates.join(", "))]
    AmbiguousMatch {
        module: String,
        reference: String,
        candidates: Vec<String>,
    },

    #[error("{module}: dependency on unknown module '{target}' dropped")]
    UnknownNode { module: String, target: String },
}

impl ExtractionError {
    /// The referrer module ID this problem belongs to.
    pub fn module(&self) -> &str {
        match self {
            Self::Parse { module, .. }
            | Self::MissingStatePath { module, .. }
            | Self::UnresolvedExpression { module, .. }
            | Self::UnresolvedCollection { module, .. }
            | Self::SkippedEntry { module, .. }
            | Self::UnresolvedMatch { module, .. }
            | Self::AmbiguousMatch { module, .. }
            | Self::UnknownNode { module, .. } => module,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tg009_cycle_message_lists_members() {
        let err = GraphError::CyclicGraph {
            members: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(err.to_string(), "dependency cycle detected involving: a, b");
    }

    #[test]
    fn test_tg009_ambiguous_message() {
        let err = ExtractionError::AmbiguousMatch {
            module: "svc/prod/eu/eks".to_string(),
            reference: "vpc".to_string(),
            candidates: vec!["x/prod/eu/vpc".to_string(), "y/prod/eu/vpc".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.starts_with("svc/prod/eu/eks"));
        assert!(msg.contains("x/prod/eu/vpc, y/prod/eu/vpc"));
        assert_eq!(err.module(), "svc/prod/eu/eks");
    }
}
