//! CP-007: Stack file parsing, validation, and loading into a graph.
//!
//! Parses stack.yaml and validates structural constraints:
//! - Version must be "1.0"
//! - Logical IDs must be well formed
//! - depends_on references must exist and not point at the resource itself
//! - Properties must match the kind's schema (after param templates)
//! - Outputs may only reference declared resources

use super::compiler;
use super::error::GraphError;
use super::graph::{self, Graph, GraphBuilder};
use super::resolver::{self, ResolvedGraph};
use super::schema;
use super::types::*;
use indexmap::IndexMap;
use std::path::Path;

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

/// Parse a stack file from disk.
pub fn parse_config_file(path: &Path) -> Result<StackConfig, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    parse_config(&content)
}

/// Parse a stack file from a string.
pub fn parse_config(yaml: &str) -> Result<StackConfig, String> {
    serde_yaml_ng::from_str(yaml).map_err(|e| format!("YAML parse error: {}", e))
}

/// Validate a parsed config. Returns a list of errors (empty = valid).
pub fn validate_config(config: &StackConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut error = |message: String| errors.push(ValidationError { message });

    if config.version != "1.0" {
        error(format!("version must be \"1.0\", got \"{}\"", config.version));
    }

    if config.name.is_empty() {
        error("name must not be empty".to_string());
    } else if !graph::is_valid_logical_id(&config.name) {
        error(format!(
            "name '{}' must start with a letter and contain only letters, digits, '-' or '_'",
            config.name
        ));
    }

    for (id, resource) in &config.resources {
        if !graph::is_valid_logical_id(id) {
            error(format!("resource id '{}' is not a valid logical id", id));
        }

        for dep in &resource.depends_on {
            if dep == id {
                error(format!("resource '{}' depends on itself", id));
            } else if !config.resources.contains_key(dep) {
                error(format!("resource '{}' depends on unknown resource '{}'", id, dep));
            }
        }

        match resolve_properties(&resource.properties, &config.params) {
            Ok(props) => {
                if let Err(message) = schema::validate_properties(resource.kind, &props) {
                    error(format!("resource '{}' ({}): {}", id, resource.kind, message));
                }
            }
            Err(message) => error(format!("resource '{}': {}", id, message)),
        }
    }

    for (name, output) in &config.outputs {
        resolver::visit_references(&output.value, name, &mut |_, r| {
            if !config.resources.contains_key(&r.target) {
                error(format!(
                    "output '{}' references unknown resource '{}'",
                    name, r.target
                ));
            }
        });
    }

    errors
}

fn resolve_properties(
    properties: &Properties,
    params: &IndexMap<String, Value>,
) -> Result<Properties, String> {
    properties
        .iter()
        .map(|(name, value)| {
            resolver::resolve_value_templates(value, params)
                .map(|v| (name.clone(), v))
                .map_err(|e| format!("property '{}': {}", name, e))
        })
        .collect()
}

/// Declare every resource of a stack, in file order, with templates applied.
pub fn build_graph(config: &StackConfig) -> Result<Graph, GraphError> {
    let mut builder = GraphBuilder::new();
    for (id, resource) in &config.resources {
        let mut properties = Properties::new();
        for (name, value) in &resource.properties {
            let resolved = resolver::resolve_value_templates(value, &config.params).map_err(
                |message| GraphError::Template {
                    logical_id: id.clone(),
                    path: format!("properties.{}", name),
                    message,
                },
            )?;
            properties.insert(name.clone(), resolved);
        }
        builder.declare(
            resource.kind,
            id,
            properties,
            resource.depends_on.iter().cloned(),
        )?;
    }
    Ok(builder.build())
}

/// A stack taken through the whole pipeline.
#[derive(Debug, Clone)]
pub struct CompiledStack {
    pub name: String,
    pub graph: ResolvedGraph,
    pub plan: Plan,
    /// Outputs with templates applied
    pub outputs: IndexMap<String, OutputDecl>,
    pub policy: Policy,
}

/// Declare → resolve → compile. All-or-nothing.
pub fn compile_stack(config: &StackConfig) -> Result<CompiledStack, GraphError> {
    let graph = resolver::resolve(build_graph(config)?)?;

    let mut outputs = IndexMap::new();
    for (name, output) in &config.outputs {
        let value = resolver::resolve_value_templates(&output.value, &config.params).map_err(
            |message| GraphError::Template {
                logical_id: "outputs".to_string(),
                path: format!("outputs.{}", name),
                message,
            },
        )?;
        outputs.insert(
            name.clone(),
            OutputDecl {
                value,
                description: output.description.clone(),
            },
        );
    }
    resolver::check_outputs(&graph, &outputs)?;

    let plan = compiler::compile(&graph)?;
    tracing::info!(stack = %config.name, resources = plan.len(), "stack compiled");

    Ok(CompiledStack {
        name: config.name.clone(),
        graph,
        plan,
        outputs,
        policy: config.policy.clone(),
    })
}
