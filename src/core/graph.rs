//! CP-004: Graph builder: accumulate resource descriptors into a dependency graph.
//!
//! Nodes are keyed by logical ID and keep declaration order. Adjacency maps
//! each node to the set of nodes it depends on. `build()` freezes the graph;
//! after that only the resolver and compiler read it.

use super::error::GraphError;
use super::schema;
use super::types::{Properties, ResourceDescriptor, ResourceKind};
use indexmap::{IndexMap, IndexSet};
use regex::Regex;
use std::sync::LazyLock;

static LOGICAL_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9_-]*$").unwrap_or_else(|e| panic!("logical id pattern: {e}"))
});

/// Whether a string is a well-formed logical ID.
pub fn is_valid_logical_id(id: &str) -> bool {
    LOGICAL_ID.is_match(id)
}

/// Incremental graph construction.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    nodes: IndexMap<String, ResourceDescriptor>,
    edges: IndexMap<String, IndexSet<String>>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a resource. Forward references (to IDs not declared yet) are
    /// allowed here and checked by the resolver.
    pub fn declare<I, S>(
        &mut self,
        kind: ResourceKind,
        logical_id: &str,
        properties: Properties,
        depends_on: I,
    ) -> Result<&ResourceDescriptor, GraphError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let descriptor = ResourceDescriptor {
            logical_id: logical_id.to_string(),
            kind,
            properties,
            depends_on: depends_on.into_iter().map(Into::into).collect(),
        };
        self.add_node(descriptor)?;
        Ok(&self.nodes[logical_id])
    }

    /// Add a fully formed descriptor. Its `depends_on` become edges.
    pub fn add_node(&mut self, descriptor: ResourceDescriptor) -> Result<(), GraphError> {
        let id = descriptor.logical_id.clone();
        if !is_valid_logical_id(&id) {
            return Err(GraphError::InvalidLogicalId(id));
        }
        if self.nodes.contains_key(&id) {
            return Err(GraphError::DuplicateId(id));
        }
        schema::validate_properties(descriptor.kind, &descriptor.properties).map_err(
            |message| GraphError::Schema {
                logical_id: id.clone(),
                kind: descriptor.kind,
                message,
            },
        )?;

        tracing::debug!(logical_id = %id, kind = %descriptor.kind, "declared resource");
        self.edges
            .insert(id.clone(), descriptor.depends_on.iter().cloned().collect());
        self.nodes.insert(id, descriptor);
        Ok(())
    }

    /// Record that `dependent` must be provisioned after `dependency`.
    /// Returns false if the edge was already present.
    pub fn add_edge(&mut self, dependent: &str, dependency: &str) -> Result<bool, GraphError> {
        let deps = self
            .edges
            .get_mut(dependent)
            .ok_or_else(|| GraphError::UnknownReference {
                logical_id: dependent.to_string(),
                path: "depends_on".to_string(),
                target: dependent.to_string(),
            })?;
        Ok(deps.insert(dependency.to_string()))
    }

    pub fn contains(&self, logical_id: &str) -> bool {
        self.nodes.contains_key(logical_id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Freeze the graph.
    pub fn build(self) -> Graph {
        Graph {
            nodes: self.nodes,
            edges: self.edges,
        }
    }
}

/// A frozen resource graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Graph {
    nodes: IndexMap<String, ResourceDescriptor>,
    edges: IndexMap<String, IndexSet<String>>,
}

impl Graph {
    pub fn get(&self, logical_id: &str) -> Option<&ResourceDescriptor> {
        self.nodes.get(logical_id)
    }

    pub fn contains(&self, logical_id: &str) -> bool {
        self.nodes.contains_key(logical_id)
    }

    /// Declaration index of a node.
    pub fn index_of(&self, logical_id: &str) -> Option<usize> {
        self.nodes.get_index_of(logical_id)
    }

    /// Descriptors in declaration order.
    pub fn descriptors(&self) -> impl Iterator<Item = &ResourceDescriptor> {
        self.nodes.values()
    }

    /// Logical IDs in declaration order.
    pub fn ids(&self) -> impl Iterator<Item = &String> {
        self.nodes.keys()
    }

    /// Direct dependencies of a node, in insertion order.
    pub fn dependencies(&self, logical_id: &str) -> impl Iterator<Item = &String> {
        self.edges.get(logical_id).into_iter().flatten()
    }

    /// All edges as `(dependent, dependency)`.
    pub fn edges(&self) -> impl Iterator<Item = (&String, &String)> {
        self.edges
            .iter()
            .flat_map(|(dependent, deps)| deps.iter().map(move |dep| (dependent, dep)))
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(IndexSet::len).sum()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Add an edge while resolving. Only the resolver extends a built graph.
    pub(crate) fn insert_edge(&mut self, dependent: &str, dependency: &str) -> bool {
        self.edges
            .entry(dependent.to_string())
            .or_default()
            .insert(dependency.to_string())
    }
}
