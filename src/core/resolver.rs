//! CP-005: Reference resolution, template substitution, and apply-time binding.
//!
//! `resolve` checks every reference in every descriptor against the graph and
//! turns it into a dependency edge, alongside the explicit `depends_on` edges.
//! It never evaluates attribute values; that happens in `bind`, once the
//! referenced resource has been provisioned and reported its attributes.

use super::error::GraphError;
use super::graph::Graph;
use super::schema;
use super::types::{Attributes, OutputDecl, Properties, Reference, Scalar, Value};
use indexmap::{IndexMap, IndexSet};
use std::ops::Deref;

/// A graph whose references have all been checked and turned into edges.
/// Only a resolved graph can be compiled into a plan.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedGraph {
    graph: Graph,
    reference_edges: IndexSet<(String, String)>,
}

impl ResolvedGraph {
    /// Whether `(dependent, dependency)` came from a property reference
    /// (as opposed to an explicit `depends_on`).
    pub fn is_reference_edge(&self, dependent: &str, dependency: &str) -> bool {
        self.reference_edges
            .contains(&(dependent.to_string(), dependency.to_string()))
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }
}

impl Deref for ResolvedGraph {
    type Target = Graph;

    fn deref(&self) -> &Graph {
        &self.graph
    }
}

/// Visit every reference inside a value, with its property path.
pub fn visit_references<'a>(value: &'a Value, path: &str, f: &mut dyn FnMut(&str, &'a Reference)) {
    match value {
        Value::Literal(_) => {}
        Value::Ref(r) => f(path, r),
        Value::List(items) | Value::Concat(items) => {
            for (i, item) in items.iter().enumerate() {
                visit_references(item, &format!("{}[{}]", path, i), f);
            }
        }
        Value::Map(map) => {
            for (key, item) in map {
                visit_references(item, &format!("{}.{}", path, key), f);
            }
        }
    }
}

/// Check one reference and return the edge target.
fn check_reference(
    graph: &Graph,
    logical_id: &str,
    path: &str,
    reference: &Reference,
) -> Result<(), GraphError> {
    let target = graph
        .get(&reference.target)
        .ok_or_else(|| GraphError::UnknownReference {
            logical_id: logical_id.to_string(),
            path: path.to_string(),
            target: reference.target.clone(),
        })?;
    if !schema::exports_attribute(target.kind, &reference.attribute) {
        return Err(GraphError::UnknownAttribute {
            logical_id: logical_id.to_string(),
            path: path.to_string(),
            target: reference.target.clone(),
            kind: target.kind,
            attribute: reference.attribute.clone(),
        });
    }
    Ok(())
}

/// Resolve a built graph: verify every `depends_on` target and every
/// reference, and add one edge per reference.
pub fn resolve(mut graph: Graph) -> Result<ResolvedGraph, GraphError> {
    let mut new_edges: Vec<(String, String)> = Vec::new();

    for descriptor in graph.descriptors() {
        let id = &descriptor.logical_id;

        for dep in graph.dependencies(id) {
            if !graph.contains(dep) {
                return Err(GraphError::UnknownReference {
                    logical_id: id.clone(),
                    path: "depends_on".to_string(),
                    target: dep.clone(),
                });
            }
        }

        let mut found: Vec<(String, &Reference)> = Vec::new();
        for (name, value) in &descriptor.properties {
            visit_references(value, &format!("properties.{}", name), &mut |path, r| {
                found.push((path.to_string(), r));
            });
        }
        for (path, reference) in found {
            check_reference(&graph, id, &path, reference)?;
            new_edges.push((id.clone(), reference.target.clone()));
        }
    }

    let mut reference_edges = IndexSet::new();
    for (dependent, dependency) in new_edges {
        graph.insert_edge(&dependent, &dependency);
        reference_edges.insert((dependent, dependency));
    }

    tracing::debug!(
        nodes = graph.len(),
        edges = graph.edge_count(),
        reference_edges = reference_edges.len(),
        "resolved graph"
    );

    Ok(ResolvedGraph {
        graph,
        reference_edges,
    })
}

/// Check stack outputs against a resolved graph.
pub fn check_outputs(
    graph: &ResolvedGraph,
    outputs: &IndexMap<String, OutputDecl>,
) -> Result<(), GraphError> {
    for (name, output) in outputs {
        let mut found: Vec<(String, &Reference)> = Vec::new();
        visit_references(&output.value, &format!("outputs.{}", name), &mut |path, r| {
            found.push((path.to_string(), r));
        });
        for (path, reference) in found {
            check_reference(graph, "outputs", &path, reference)?;
        }
    }
    Ok(())
}

// ============================================================================
// Templates
// ============================================================================

/// Resolve `{{params.key}}` templates in a string.
pub fn resolve_template(template: &str, params: &IndexMap<String, Value>) -> Result<String, String> {
    let mut result = template.to_string();
    let mut start = 0;

    while let Some(open) = result[start..].find("{{") {
        let open = start + open;
        let close = result[open..]
            .find("}}")
            .ok_or_else(|| format!("unclosed template at position {}", open))?;
        let close = open + close + 2;
        let key = result[open + 2..close - 2].trim();

        let value = match lookup_param(key, params)? {
            Value::Literal(scalar) => scalar.to_string(),
            _ => return Err(format!("param '{}' is not a scalar", key_name(key))),
        };

        result.replace_range(open..close, &value);
        start = open + value.len();
    }

    Ok(result)
}

fn key_name(key: &str) -> &str {
    key.strip_prefix("params.").unwrap_or(key)
}

fn lookup_param<'a>(key: &str, params: &'a IndexMap<String, Value>) -> Result<&'a Value, String> {
    let param_key = key
        .strip_prefix("params.")
        .ok_or_else(|| format!("unknown template variable: {}", key))?;
    params
        .get(param_key)
        .ok_or_else(|| format!("unknown param: {}", param_key))
}

/// If the whole string is one template, return its key.
fn whole_template(s: &str) -> Option<&str> {
    let inner = s.trim().strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    Some(inner.trim())
}

/// Resolve templates in every string literal of a value. A string that is a
/// single template takes the param's value as-is, so `"{{params.port}}"`
/// stays an int.
pub fn resolve_value_templates(value: &Value, params: &IndexMap<String, Value>) -> Result<Value, String> {
    match value {
        Value::Literal(Scalar::String(s)) => {
            if let Some(key) = whole_template(s) {
                return lookup_param(key, params).cloned();
            }
            resolve_template(s, params).map(Value::from)
        }
        Value::Literal(_) | Value::Ref(_) => Ok(value.clone()),
        Value::List(items) => items
            .iter()
            .map(|v| resolve_value_templates(v, params))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        Value::Concat(items) => items
            .iter()
            .map(|v| resolve_value_templates(v, params))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Concat),
        Value::Map(map) => map
            .iter()
            .map(|(k, v)| Ok((k.clone(), resolve_value_templates(v, params)?)))
            .collect::<Result<IndexMap<_, _>, String>>()
            .map(Value::Map),
    }
}

// ============================================================================
// Apply-time binding
// ============================================================================

/// Look up a referenced attribute among provisioned resources.
pub fn lookup_attribute<'a>(
    provisioned: &'a IndexMap<String, Attributes>,
    reference: &Reference,
) -> Result<&'a serde_json::Value, String> {
    let attrs = provisioned
        .get(&reference.target)
        .ok_or_else(|| format!("resource '{}' has not been provisioned", reference.target))?;

    let mut segments = reference.attribute.split('.');
    let head = segments.next().unwrap_or_default();
    let mut current = attrs
        .get(head)
        .ok_or_else(|| format!("resource '{}' did not report attribute '{}'", reference.target, head))?;

    for segment in segments {
        let next = match current {
            serde_json::Value::Object(obj) => obj.get(segment),
            serde_json::Value::Array(arr) => segment.parse::<usize>().ok().and_then(|i| arr.get(i)),
            _ => None,
        };
        current = next.ok_or_else(|| format!("attribute path '{}' not found", reference))?;
    }

    Ok(current)
}

/// Bind a value: replace every reference with the attribute it points at.
pub fn bind(value: &Value, provisioned: &IndexMap<String, Attributes>) -> Result<serde_json::Value, String> {
    match value {
        Value::Literal(scalar) => Ok(scalar.to_json()),
        Value::Ref(r) => lookup_attribute(provisioned, r).cloned(),
        Value::List(items) => items
            .iter()
            .map(|v| bind(v, provisioned))
            .collect::<Result<Vec<_>, _>>()
            .map(serde_json::Value::Array),
        Value::Map(map) => map
            .iter()
            .map(|(k, v)| Ok((k.clone(), bind(v, provisioned)?)))
            .collect::<Result<serde_json::Map<_, _>, String>>()
            .map(serde_json::Value::Object),
        Value::Concat(parts) => {
            let mut out = String::new();
            for part in parts {
                match bind(part, provisioned)? {
                    serde_json::Value::String(s) => out.push_str(&s),
                    serde_json::Value::Null => {}
                    other => out.push_str(&other.to_string()),
                }
            }
            Ok(serde_json::Value::String(out))
        }
    }
}

/// Bind a whole property bag into a JSON object.
pub fn bind_properties(
    properties: &Properties,
    provisioned: &IndexMap<String, Attributes>,
) -> Result<serde_json::Value, String> {
    let mut obj = serde_json::Map::new();
    for (name, value) in properties {
        let bound = bind(value, provisioned).map_err(|e| format!("property '{}': {}", name, e))?;
        obj.insert(name.clone(), bound);
    }
    Ok(serde_json::Value::Object(obj))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::graph::GraphBuilder;
    use crate::core::types::ResourceKind;
    use serde_json::json;

    fn p(pairs: Vec<(&str, Value)>) -> Properties {
        pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    fn none() -> Vec<String> {
        Vec::new()
    }

    fn network() -> GraphBuilder {
        let mut b = GraphBuilder::new();
        b.declare(
            ResourceKind::Vpc,
            "vpc",
            p(vec![("cidr_block", Value::from("10.0.0.0/16"))]),
            none(),
        )
        .unwrap();
        b.declare(
            ResourceKind::InternetGateway,
            "igw",
            p(vec![("vpc_id", Value::reference("vpc", "id"))]),
            none(),
        )
        .unwrap();
        b
    }

    #[test]
    fn test_cp005_reference_creates_edge() {
        let resolved = resolve(network().build()).unwrap();
        assert_eq!(resolved.dependencies("igw").collect::<Vec<_>>(), vec!["vpc"]);
        assert!(resolved.is_reference_edge("igw", "vpc"));
    }

    #[test]
    fn test_cp005_unknown_reference() {
        let mut b = network();
        b.declare(
            ResourceKind::Subnet,
            "subnet",
            p(vec![
                ("vpc_id", Value::reference("vcp", "id")),
                ("cidr_block", Value::from("10.0.1.0/24")),
            ]),
            none(),
        )
        .unwrap();
        let err = resolve(b.build()).unwrap_err();
        assert_eq!(
            err,
            GraphError::UnknownReference {
                logical_id: "subnet".into(),
                path: "properties.vpc_id".into(),
                target: "vcp".into(),
            }
        );
    }

    #[test]
    fn test_cp005_unknown_depends_on() {
        let mut b = network();
        b.declare(ResourceKind::Bucket, "logs", Properties::new(), ["missing"])
            .unwrap();
        let err = resolve(b.build()).unwrap_err();
        assert!(matches!(
            err,
            GraphError::UnknownReference { ref path, ref target, .. }
                if path == "depends_on" && target == "missing"
        ));
    }

    #[test]
    fn test_cp005_unknown_attribute() {
        let mut b = network();
        b.declare(
            ResourceKind::RouteTable,
            "rt",
            p(vec![("vpc_id", Value::reference("vpc", "dns_name"))]),
            none(),
        )
        .unwrap();
        let err = resolve(b.build()).unwrap_err();
        assert!(matches!(
            err,
            GraphError::UnknownAttribute { ref attribute, kind: ResourceKind::Vpc, .. }
                if attribute == "dns_name"
        ));
    }

    #[test]
    fn test_cp005_nested_reference_path() {
        let mut b = network();
        let routes = Value::List(vec![Value::Map(IndexMap::from([
            ("cidr_block".to_string(), Value::from("0.0.0.0/0")),
            ("gateway_id".to_string(), Value::reference("gw", "id")),
        ]))]);
        b.declare(
            ResourceKind::RouteTable,
            "rt",
            p(vec![("vpc_id", Value::reference("vpc", "id")), ("routes", routes)]),
            none(),
        )
        .unwrap();
        let err = resolve(b.build()).unwrap_err();
        match err {
            GraphError::UnknownReference { path, .. } => {
                assert_eq!(path, "properties.routes[0].gateway_id")
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_cp005_nested_references_become_edges() {
        let mut b = network();
        let routes = Value::List(vec![Value::Map(IndexMap::from([(
            "gateway_id".to_string(),
            Value::reference("igw", "id"),
        )]))]);
        b.declare(
            ResourceKind::RouteTable,
            "rt",
            p(vec![("vpc_id", Value::reference("vpc", "id")), ("routes", routes)]),
            none(),
        )
        .unwrap();
        let resolved = resolve(b.build()).unwrap();
        assert_eq!(
            resolved.dependencies("rt").collect::<Vec<_>>(),
            vec!["vpc", "igw"]
        );
    }

    #[test]
    fn test_cp005_explicit_and_reference_edge_merge() {
        let mut b = GraphBuilder::new();
        b.declare(
            ResourceKind::Vpc,
            "vpc",
            p(vec![("cidr_block", Value::from("10.0.0.0/16"))]),
            none(),
        )
        .unwrap();
        b.declare(
            ResourceKind::InternetGateway,
            "igw",
            p(vec![("vpc_id", Value::reference("vpc", "id"))]),
            ["vpc"],
        )
        .unwrap();
        let resolved = resolve(b.build()).unwrap();
        assert_eq!(resolved.edge_count(), 1);
    }

    #[test]
    fn test_cp005_check_outputs() {
        let resolved = resolve(network().build()).unwrap();
        let mut outputs = IndexMap::new();
        outputs.insert(
            "vpc_id".to_string(),
            OutputDecl {
                value: Value::reference("vpc", "id"),
                description: None,
            },
        );
        assert!(check_outputs(&resolved, &outputs).is_ok());
        outputs.insert(
            "bad".to_string(),
            OutputDecl {
                value: Value::reference("nlb", "dns_name"),
                description: None,
            },
        );
        let err = check_outputs(&resolved, &outputs).unwrap_err();
        assert!(err.to_string().contains("outputs.bad"));
    }

    #[test]
    fn test_cp005_resolve_params() {
        let params = IndexMap::from([("name".to_string(), Value::from("world"))]);
        assert_eq!(resolve_template("hello {{params.name}}", &params).unwrap(), "hello world");
        assert_eq!(resolve_template("{{ params.name }}!", &params).unwrap(), "world!");
    }

    #[test]
    fn test_cp005_resolve_multiple() {
        let params = IndexMap::from([
            ("a".to_string(), Value::from("X")),
            ("b".to_string(), Value::from(7i64)),
        ]);
        assert_eq!(resolve_template("{{params.a}}-{{params.b}}", &params).unwrap(), "X-7");
    }

    #[test]
    fn test_cp005_template_errors() {
        let params = IndexMap::from([("list".to_string(), Value::from(vec!["a"]))]);
        assert!(resolve_template("{{params.missing}}", &params)
            .unwrap_err()
            .contains("unknown param"));
        assert!(resolve_template("{{stack.x}}", &params)
            .unwrap_err()
            .contains("unknown template variable"));
        assert!(resolve_template("{{params.list", &params)
            .unwrap_err()
            .contains("unclosed"));
        assert!(resolve_template("x{{params.list}}", &params)
            .unwrap_err()
            .contains("not a scalar"));
    }

    #[test]
    fn test_cp005_whole_template_keeps_type() {
        let params = IndexMap::from([("port".to_string(), Value::from(8089i64))]);
        let v = resolve_value_templates(&Value::from("{{params.port}}"), &params).unwrap();
        assert_eq!(v, Value::from(8089i64));
        let v = resolve_value_templates(&Value::from("port {{params.port}}"), &params).unwrap();
        assert_eq!(v, Value::from("port 8089"));
    }

    #[test]
    fn test_cp005_templates_inside_composites() {
        let params = IndexMap::from([("acct".to_string(), Value::from("112233445566"))]);
        let v = Value::Map(IndexMap::from([(
            "principals".to_string(),
            Value::List(vec![Value::from(
                "arn:aws:organizations::{{params.acct}}:organization/o-x",
            )]),
        )]));
        let resolved = resolve_value_templates(&v, &params).unwrap();
        let bound = bind(&resolved, &IndexMap::new()).unwrap();
        assert_eq!(
            bound,
            json!({"principals": ["arn:aws:organizations::112233445566:organization/o-x"]})
        );
    }

    #[test]
    fn test_cp005_bind_references_and_concat() {
        let mut provisioned: IndexMap<String, Attributes> = IndexMap::new();
        provisioned.insert(
            "bastion".to_string(),
            Attributes::from([
                ("public_ip".to_string(), json!("203.0.113.9")),
                ("tags".to_string(), json!({"Name": "BastionHost"})),
            ]),
        );
        let concat = Value::Concat(vec![
            Value::from("ssh ec2-user@"),
            Value::reference("bastion", "public_ip"),
        ]);
        assert_eq!(bind(&concat, &provisioned).unwrap(), json!("ssh ec2-user@203.0.113.9"));
        assert_eq!(
            bind(&Value::reference("bastion", "tags.Name"), &provisioned).unwrap(),
            json!("BastionHost")
        );
    }

    #[test]
    fn test_cp005_bind_errors() {
        let provisioned: IndexMap<String, Attributes> = IndexMap::from([(
            "vpc".to_string(),
            Attributes::from([("id".to_string(), json!("vpc-1"))]),
        )]);
        assert!(bind(&Value::reference("igw", "id"), &provisioned)
            .unwrap_err()
            .contains("has not been provisioned"));
        assert!(bind(&Value::reference("vpc", "arn"), &provisioned)
            .unwrap_err()
            .contains("did not report attribute 'arn'"));
        let props = p(vec![("vpc_id", Value::reference("vpc", "id.deeper"))]);
        assert!(bind_properties(&props, &provisioned)
            .unwrap_err()
            .starts_with("property 'vpc_id'"));
    }
}
