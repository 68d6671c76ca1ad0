//! CP-002: Graph pipeline errors.
//!
//! Every error is terminal for the declare → resolve → compile pipeline.
//! Nothing is retried and no partial graph or plan is returned.

use super::types::ResourceKind;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("duplicate logical id '{0}'")]
    DuplicateId(String),

    #[error("invalid logical id '{0}': must start with a letter and contain only letters, digits, '-' or '_'")]
    InvalidLogicalId(String),

    #[error("resource '{logical_id}' ({kind}): {message}")]
    Schema {
        logical_id: String,
        kind: ResourceKind,
        message: String,
    },

    #[error("resource '{logical_id}' references unknown resource '{target}' at {path}")]
    UnknownReference {
        logical_id: String,
        path: String,
        target: String,
    },

    #[error("resource '{logical_id}' references unknown attribute '{attribute}' of {kind} '{target}' at {path}")]
    UnknownAttribute {
        logical_id: String,
        path: String,
        target: String,
        kind: ResourceKind,
        attribute: String,
    },

    #[error("dependency cycle detected: {}", format_cycle(.cycle))]
    CyclicDependency { cycle: Vec<String> },

    #[error("resource '{logical_id}' at {path}: {message}")]
    Template {
        logical_id: String,
        path: String,
        message: String,
    },
}

/// Render `[a, b]` as `a -> b -> a`.
pub fn format_cycle(cycle: &[String]) -> String {
    let mut parts: Vec<&str> = cycle.iter().map(String::as_str).collect();
    if let Some(first) = cycle.first() {
        parts.push(first);
    }
    parts.join(" -> ")
}
