//! CP-001: Core types: stack files, resource descriptors, values, plans, events.
//!
//! A stack file declares resources keyed by logical ID. Property values form a
//! closed union: literals, references to another resource's attribute, and the
//! composites (list, map, concat) that may nest references. Everything derives
//! Serialize/Deserialize so stack files roundtrip through YAML.

use indexmap::{IndexMap, IndexSet};
use schemars::JsonSchema;
use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::marker::PhantomData;

/// Property bag of a resource, in declaration order.
pub type Properties = IndexMap<String, Value>;

/// Attributes a provisioner reports for a created resource.
pub type Attributes = IndexMap<String, serde_json::Value>;

// ============================================================================
// Top-level stack.yaml
// ============================================================================

/// Root configuration: one stack, one resource graph.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StackConfig {
    /// Schema version (must be "1.0")
    pub version: String,

    /// Stack name
    pub name: String,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,

    /// Template parameters, substituted into `{{params.key}}`
    #[serde(default, deserialize_with = "unique_keys")]
    pub params: IndexMap<String, Value>,

    /// Resource declarations (order-preserving)
    #[serde(deserialize_with = "unique_logical_ids")]
    pub resources: IndexMap<String, ResourceDecl>,

    /// Values exported after apply
    #[serde(default, deserialize_with = "unique_keys")]
    pub outputs: IndexMap<String, OutputDecl>,

    /// Execution policy
    #[serde(default)]
    pub policy: Policy,
}

/// A resource as written in the stack file. The map key is its logical ID.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ResourceDecl {
    /// Resource kind
    pub kind: ResourceKind,

    /// Kind-specific properties
    #[serde(default, deserialize_with = "unique_keys")]
    pub properties: Properties,

    /// Explicit dependencies (logical IDs that must be provisioned first)
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// A stack output.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct OutputDecl {
    pub value: Value,
    #[serde(default)]
    pub description: Option<String>,
}

// ============================================================================
// Duplicate-rejecting maps
// ============================================================================

// Maps that fail on a repeated key instead of keeping the last entry.
struct UniqueMapVisitor<V> {
    what: &'static str,
    marker: PhantomData<V>,
}

impl<'de, V: Deserialize<'de>> Visitor<'de> for UniqueMapVisitor<V> {
    type Value = IndexMap<String, V>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a map with unique {}s", self.what)
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut map = IndexMap::with_capacity(access.size_hint().unwrap_or(0));
        while let Some(key) = access.next_key::<String>()? {
            if map.contains_key(&key) {
                return Err(de::Error::custom(format_args!(
                    "duplicate {} '{}'",
                    self.what, key
                )));
            }
            let value = access.next_value()?;
            map.insert(key, value);
        }
        Ok(map)
    }
}

fn unique_map<'de, D, V>(
    deserializer: D,
    what: &'static str,
) -> Result<IndexMap<String, V>, D::Error>
where
    D: Deserializer<'de>,
    V: Deserialize<'de>,
{
    deserializer.deserialize_map(UniqueMapVisitor {
        what,
        marker: PhantomData,
    })
}

fn unique_logical_ids<'de, D, V>(deserializer: D) -> Result<IndexMap<String, V>, D::Error>
where
    D: Deserializer<'de>,
    V: Deserialize<'de>,
{
    unique_map(deserializer, "logical id")
}

fn unique_keys<'de, D, V>(deserializer: D) -> Result<IndexMap<String, V>, D::Error>
where
    D: Deserializer<'de>,
    V: Deserialize<'de>,
{
    unique_map(deserializer, "key")
}

// ============================================================================
// Policy
// ============================================================================

/// Execution policy.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Policy {
    /// Failure handling
    #[serde(default)]
    pub failure: FailurePolicy,

    /// Write the provenance event log during apply
    #[serde(default = "default_true")]
    pub provenance: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            failure: FailurePolicy::default(),
            provenance: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Failure handling strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    #[default]
    StopOnFirst,
    ContinueIndependent,
}

// ============================================================================
// Resource kinds
// ============================================================================

/// Resource kind tag. Each kind has a property schema (see `core::schema`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Bucket,
    Vpc,
    Subnet,
    InternetGateway,
    RouteTable,
    RouteTableAssociation,
    SecurityGroup,
    IamRole,
    Instance,
    AutoScalingGroup,
    LoadBalancer,
    TargetGroup,
    Listener,
    ResourceShare,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 14] = [
        Self::Bucket,
        Self::Vpc,
        Self::Subnet,
        Self::InternetGateway,
        Self::RouteTable,
        Self::RouteTableAssociation,
        Self::SecurityGroup,
        Self::IamRole,
        Self::Instance,
        Self::AutoScalingGroup,
        Self::LoadBalancer,
        Self::TargetGroup,
        Self::Listener,
        Self::ResourceShare,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bucket => "bucket",
            Self::Vpc => "vpc",
            Self::Subnet => "subnet",
            Self::InternetGateway => "internet_gateway",
            Self::RouteTable => "route_table",
            Self::RouteTableAssociation => "route_table_association",
            Self::SecurityGroup => "security_group",
            Self::IamRole => "iam_role",
            Self::Instance => "instance",
            Self::AutoScalingGroup => "auto_scaling_group",
            Self::LoadBalancer => "load_balancer",
            Self::TargetGroup => "target_group",
            Self::Listener => "listener",
            Self::ResourceShare => "resource_share",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Values
// ============================================================================

/// A scalar literal.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl Scalar {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(n) => serde_json::Value::from(*n),
            Self::Float(x) => serde_json::Number::from_f64(*x)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Self::String(s) => serde_json::Value::String(s.clone()),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(n) => write!(f, "{}", n),
            Self::Float(x) => write!(f, "{}", x),
            Self::String(s) => f.write_str(s),
        }
    }
}

/// A symbolic reference to an attribute of another resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    /// Logical ID of the referenced resource
    pub target: String,
    /// Attribute path (dotted for nested attributes)
    pub attribute: String,
}

impl Reference {
    pub fn new(target: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            attribute: attribute.into(),
        }
    }

    /// Parse `"vpc.id"`. A bare `"vpc"` refers to the `id` attribute.
    pub fn parse(s: &str) -> Self {
        match s.split_once('.') {
            Some((target, attribute)) => Self::new(target, attribute),
            None => Self::new(s, "id"),
        }
    }

    /// First segment of the attribute path.
    pub fn attribute_head(&self) -> &str {
        self.attribute
            .split_once('.')
            .map_or(self.attribute.as_str(), |(head, _)| head)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.target, self.attribute)
    }
}

/// A property value.
///
/// In YAML, scalars are literals, `{ ref: "vpc.id" }` is a reference,
/// `{ concat: [...] }` joins its parts into a string once references are
/// bound, any other mapping is a `Map`, any sequence a `List`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "serde_yaml_ng::Value", into = "serde_yaml_ng::Value")]
pub enum Value {
    Literal(Scalar),
    Ref(Reference),
    List(Vec<Value>),
    Map(IndexMap<String, Value>),
    Concat(Vec<Value>),
}

impl Value {
    pub fn reference(target: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self::Ref(Reference::new(target, attribute))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Literal(Scalar::String(s)) => Some(s),
            _ => None,
        }
    }

    /// True when the value (or anything nested in it) is a reference.
    pub fn has_references(&self) -> bool {
        match self {
            Self::Literal(_) => false,
            Self::Ref(_) => true,
            Self::List(items) | Self::Concat(items) => items.iter().any(Value::has_references),
            Self::Map(map) => map.values().any(Value::has_references),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Literal(Scalar::String(s.to_string()))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Literal(Scalar::String(s))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Literal(Scalar::Int(n))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Literal(Scalar::Bool(b))
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Self::Literal(Scalar::Float(x))
    }
}

impl From<Reference> for Value {
    fn from(r: Reference) -> Self {
        Self::Ref(r)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

impl From<serde_yaml_ng::Value> for Value {
    fn from(yaml: serde_yaml_ng::Value) -> Self {
        use serde_yaml_ng::Value as Y;
        match yaml {
            Y::Null => Self::Literal(Scalar::Null),
            Y::Bool(b) => Self::Literal(Scalar::Bool(b)),
            Y::Number(n) => match n.as_i64() {
                Some(i) => Self::Literal(Scalar::Int(i)),
                None => Self::Literal(Scalar::Float(n.as_f64().unwrap_or(f64::NAN))),
            },
            Y::String(s) => Self::Literal(Scalar::String(s)),
            Y::Sequence(seq) => Self::List(seq.into_iter().map(Value::from).collect()),
            Y::Mapping(mapping) => {
                if mapping.len() == 1 {
                    if let Some(Y::String(target)) = mapping.get("ref") {
                        return Self::Ref(Reference::parse(target));
                    }
                    if let Some(Y::Sequence(parts)) = mapping.get("concat") {
                        return Self::Concat(parts.iter().cloned().map(Value::from).collect());
                    }
                }
                Self::Map(
                    mapping
                        .into_iter()
                        .map(|(k, v)| (yaml_key_to_string(&k), Value::from(v)))
                        .collect(),
                )
            }
            Y::Tagged(tagged) => Value::from(tagged.value),
        }
    }
}

impl From<Value> for serde_yaml_ng::Value {
    fn from(value: Value) -> Self {
        use serde_yaml_ng::Value as Y;
        match value {
            Value::Literal(Scalar::Null) => Y::Null,
            Value::Literal(Scalar::Bool(b)) => Y::Bool(b),
            Value::Literal(Scalar::Int(n)) => Y::Number(n.into()),
            Value::Literal(Scalar::Float(x)) => Y::Number(x.into()),
            Value::Literal(Scalar::String(s)) => Y::String(s),
            Value::Ref(r) => single_entry("ref", Y::String(r.to_string())),
            Value::List(items) => Y::Sequence(items.into_iter().map(Y::from).collect()),
            Value::Concat(parts) => {
                single_entry("concat", Y::Sequence(parts.into_iter().map(Y::from).collect()))
            }
            Value::Map(map) => Y::Mapping(
                map.into_iter()
                    .map(|(k, v)| (Y::String(k), Y::from(v)))
                    .collect(),
            ),
        }
    }
}

fn single_entry(key: &str, value: serde_yaml_ng::Value) -> serde_yaml_ng::Value {
    let mut mapping = serde_yaml_ng::Mapping::new();
    mapping.insert(serde_yaml_ng::Value::String(key.to_string()), value);
    serde_yaml_ng::Value::Mapping(mapping)
}

fn yaml_key_to_string(key: &serde_yaml_ng::Value) -> String {
    match key {
        serde_yaml_ng::Value::String(s) => s.clone(),
        serde_yaml_ng::Value::Number(n) => n.to_string(),
        serde_yaml_ng::Value::Bool(b) => b.to_string(),
        serde_yaml_ng::Value::Null => String::new(),
        other => format!("{:?}", other),
    }
}

impl JsonSchema for Value {
    fn schema_name() -> String {
        "Value".to_string()
    }

    fn json_schema(gen: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
        <serde_json::Value as JsonSchema>::json_schema(gen)
    }
}

// ============================================================================
// Descriptors and plans
// ============================================================================

/// An immutable resource declaration inside a graph.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceDescriptor {
    pub logical_id: String,
    pub kind: ResourceKind,
    pub properties: Properties,
    pub depends_on: IndexSet<String>,
}

/// Compiled provisioning order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    /// Topological order (logical IDs)
    pub order: Vec<String>,

    /// Groups with no dependencies between members; wave N only depends on waves < N
    pub waves: Vec<Vec<String>>,
}

impl Plan {
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Position of a logical ID in the plan.
    pub fn position(&self, logical_id: &str) -> Option<usize> {
        self.order.iter().position(|id| id == logical_id)
    }

    /// BLAKE3 fingerprint of the order. Equal plans have equal fingerprints.
    pub fn fingerprint(&self) -> String {
        let parts: Vec<&str> = self.order.iter().map(String::as_str).collect();
        crate::provenance::hasher::composite_hash(&parts)
    }
}

// ============================================================================
// Provenance events
// ============================================================================

/// Provenance event for the JSONL event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProvenanceEvent {
    ApplyStarted {
        stack: String,
        run_id: String,
        provisioner: String,
        cloudplan_version: String,
    },
    ResourceStarted {
        stack: String,
        resource: String,
        kind: String,
    },
    ResourceProvisioned {
        stack: String,
        resource: String,
        duration_seconds: f64,
        hash: String,
    },
    ResourceFailed {
        stack: String,
        resource: String,
        error: String,
    },
    ResourceSkipped {
        stack: String,
        resource: String,
        blocked_by: String,
    },
    ApplyCompleted {
        stack: String,
        run_id: String,
        resources_provisioned: u32,
        resources_failed: u32,
        resources_skipped: u32,
        total_seconds: f64,
    },
}

/// Timestamped event wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub ts: String,
    #[serde(flatten)]
    pub event: ProvenanceEvent,
}

// ============================================================================
// Apply result
// ============================================================================

/// What happened to one resource during apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceOutcome {
    Provisioned,
    Failed { error: String },
    /// A dependency failed or was skipped.
    Skipped { blocked_by: String },
    /// The run stopped before reaching this resource.
    Halted,
}

impl fmt::Display for ResourceOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Provisioned => write!(f, "PROVISIONED"),
            Self::Failed { .. } => write!(f, "FAILED"),
            Self::Skipped { .. } => write!(f, "SKIPPED"),
            Self::Halted => write!(f, "HALTED"),
        }
    }
}

/// Result of applying a plan.
#[derive(Debug, Clone)]
pub struct ApplyReport {
    pub stack: String,
    pub run_id: String,
    /// Outcome per resource, in plan order
    pub outcomes: IndexMap<String, ResourceOutcome>,
    /// Attributes of provisioned resources
    pub attributes: IndexMap<String, Attributes>,
    /// Stack outputs that could be bound
    pub outputs: IndexMap<String, serde_json::Value>,
    pub total_duration: std::time::Duration,
}

impl ApplyReport {
    pub fn count(&self, pred: impl Fn(&ResourceOutcome) -> bool) -> u32 {
        self.outcomes.values().filter(|o| pred(*o)).count() as u32
    }

    pub fn provisioned(&self) -> u32 {
        self.count(|o| matches!(o, ResourceOutcome::Provisioned))
    }

    pub fn failed(&self) -> u32 {
        self.count(|o| matches!(o, ResourceOutcome::Failed { .. }))
    }

    pub fn skipped(&self) -> u32 {
        self.count(|o| matches!(o, ResourceOutcome::Skipped { .. } | ResourceOutcome::Halted))
    }
}

// ============================================================================
// Tests
// ============================================================================
