//! CP-003: Typed property schema per resource kind.
//!
//! Each kind lists the properties it accepts (with a type and a required
//! flag) and the attributes it exports once provisioned. Properties are
//! checked when a resource is declared. Attributes are checked when
//! references are resolved.

use super::types::{Properties, ResourceKind, Scalar, Value};

/// Expected property type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropType {
    String,
    Int,
    Float,
    Bool,
    List,
    Map,
    Any,
}

impl std::fmt::Display for PropType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::String => "string",
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::List => "list",
            Self::Map => "map",
            Self::Any => "any",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PropSpec {
    pub name: &'static str,
    pub ty: PropType,
    pub required: bool,
}

const fn req(name: &'static str, ty: PropType) -> PropSpec {
    PropSpec {
        name,
        ty,
        required: true,
    }
}

const fn opt(name: &'static str, ty: PropType) -> PropSpec {
    PropSpec {
        name,
        ty,
        required: false,
    }
}

/// Schema of one resource kind.
#[derive(Debug)]
pub struct KindSchema {
    pub kind: ResourceKind,
    pub properties: &'static [PropSpec],
    pub attributes: &'static [&'static str],
}

use PropType::{Any, Bool, Int, List, Map, String as Str};

static BUCKET: KindSchema = KindSchema {
    kind: ResourceKind::Bucket,
    properties: &[
        opt("bucket_name", Str),
        opt("versioned", Bool),
        opt("public_read_access", Bool),
        opt("encryption", Str),
        opt("removal_policy", Str),
        opt("auto_delete_objects", Bool),
        opt("tags", Map),
    ],
    attributes: &["id", "arn", "name", "domain_name"],
};

static VPC: KindSchema = KindSchema {
    kind: ResourceKind::Vpc,
    properties: &[
        req("cidr_block", Str),
        opt("enable_dns_hostnames", Bool),
        opt("enable_dns_support", Bool),
        opt("max_azs", Int),
        opt("nat_gateways", Int),
        opt("subnet_configuration", List),
        opt("tags", Map),
    ],
    attributes: &["id", "arn", "cidr_block", "default_security_group_id"],
};

static SUBNET: KindSchema = KindSchema {
    kind: ResourceKind::Subnet,
    properties: &[
        req("vpc_id", Str),
        req("cidr_block", Str),
        opt("availability_zone", Str),
        opt("map_public_ip_on_launch", Bool),
        opt("tags", Map),
    ],
    attributes: &["id", "arn", "availability_zone"],
};

static INTERNET_GATEWAY: KindSchema = KindSchema {
    kind: ResourceKind::InternetGateway,
    properties: &[req("vpc_id", Str), opt("tags", Map)],
    attributes: &["id", "arn"],
};

static ROUTE_TABLE: KindSchema = KindSchema {
    kind: ResourceKind::RouteTable,
    properties: &[req("vpc_id", Str), opt("routes", List), opt("tags", Map)],
    attributes: &["id", "arn"],
};

static ROUTE_TABLE_ASSOCIATION: KindSchema = KindSchema {
    kind: ResourceKind::RouteTableAssociation,
    properties: &[req("subnet_id", Str), req("route_table_id", Str)],
    attributes: &["id"],
};

static SECURITY_GROUP: KindSchema = KindSchema {
    kind: ResourceKind::SecurityGroup,
    properties: &[
        req("vpc_id", Str),
        opt("description", Str),
        opt("allow_all_outbound", Bool),
        opt("ingress", List),
        opt("egress", List),
        opt("tags", Map),
    ],
    attributes: &["id", "arn", "name"],
};

static IAM_ROLE: KindSchema = KindSchema {
    kind: ResourceKind::IamRole,
    properties: &[
        req("assumed_by", Str),
        opt("managed_policies", List),
        opt("description", Str),
    ],
    attributes: &["id", "arn", "name"],
};

static INSTANCE: KindSchema = KindSchema {
    kind: ResourceKind::Instance,
    properties: &[
        req("ami", Str),
        req("instance_type", Str),
        opt("subnet_id", Str),
        opt("security_group_ids", List),
        opt("key_name", Str),
        opt("associate_public_ip_address", Bool),
        opt("role", Str),
        opt("user_data", Any),
        opt("tags", Map),
    ],
    attributes: &["id", "arn", "public_ip", "private_ip", "public_dns"],
};

static AUTO_SCALING_GROUP: KindSchema = KindSchema {
    kind: ResourceKind::AutoScalingGroup,
    properties: &[
        req("vpc_id", Str),
        req("ami", Str),
        req("instance_type", Str),
        opt("subnet_tier", Str),
        opt("security_group_id", Str),
        opt("role", Str),
        opt("user_data", Any),
        opt("min_capacity", Int),
        opt("max_capacity", Int),
        opt("desired_capacity", Int),
        opt("health_check", Map),
    ],
    attributes: &["id", "arn", "name"],
};

static LOAD_BALANCER: KindSchema = KindSchema {
    kind: ResourceKind::LoadBalancer,
    properties: &[
        req("vpc_id", Str),
        opt("load_balancer_type", Str),
        opt("internet_facing", Bool),
        opt("subnet_tier", Str),
        opt("subnet_ids", List),
        opt("security_group_ids", List),
    ],
    attributes: &["id", "arn", "dns_name", "hosted_zone_id"],
};

static TARGET_GROUP: KindSchema = KindSchema {
    kind: ResourceKind::TargetGroup,
    properties: &[
        req("vpc_id", Str),
        req("port", Int),
        opt("protocol", Str),
        opt("target_type", Str),
        opt("health_check", Map),
        opt("targets", List),
    ],
    attributes: &["id", "arn", "name"],
};

static LISTENER: KindSchema = KindSchema {
    kind: ResourceKind::Listener,
    properties: &[
        req("load_balancer_arn", Str),
        req("port", Int),
        opt("protocol", Str),
        opt("target_group_arns", List),
    ],
    attributes: &["id", "arn"],
};

static RESOURCE_SHARE: KindSchema = KindSchema {
    kind: ResourceKind::ResourceShare,
    properties: &[
        req("name", Str),
        opt("allow_external_principals", Bool),
        opt("principals", List),
        opt("resource_arns", List),
    ],
    attributes: &["id", "arn"],
};

/// Look up the schema of a kind.
pub fn schema_for(kind: ResourceKind) -> &'static KindSchema {
    match kind {
        ResourceKind::Bucket => &BUCKET,
        ResourceKind::Vpc => &VPC,
        ResourceKind::Subnet => &SUBNET,
        ResourceKind::InternetGateway => &INTERNET_GATEWAY,
        ResourceKind::RouteTable => &ROUTE_TABLE,
        ResourceKind::RouteTableAssociation => &ROUTE_TABLE_ASSOCIATION,
        ResourceKind::SecurityGroup => &SECURITY_GROUP,
        ResourceKind::IamRole => &IAM_ROLE,
        ResourceKind::Instance => &INSTANCE,
        ResourceKind::AutoScalingGroup => &AUTO_SCALING_GROUP,
        ResourceKind::LoadBalancer => &LOAD_BALANCER,
        ResourceKind::TargetGroup => &TARGET_GROUP,
        ResourceKind::Listener => &LISTENER,
        ResourceKind::ResourceShare => &RESOURCE_SHARE,
    }
}

/// Whether a kind exports the attribute (only the head of a dotted path is checked).
pub fn exports_attribute(kind: ResourceKind, attribute: &str) -> bool {
    let head = attribute.split('.').next().unwrap_or(attribute);
    schema_for(kind).attributes.contains(&head)
}

/// Check a property bag against the kind's schema.
/// Returns the first problem found, in declaration order of the schema.
pub fn validate_properties(kind: ResourceKind, properties: &Properties) -> Result<(), String> {
    let schema = schema_for(kind);

    for spec in schema.properties.iter().filter(|s| s.required) {
        if !properties.contains_key(spec.name) {
            return Err(format!("missing required property '{}'", spec.name));
        }
    }

    for (name, value) in properties {
        let spec = schema
            .properties
            .iter()
            .find(|s| s.name == name.as_str())
            .ok_or_else(|| format!("unknown property '{}'", name))?;
        if !type_matches(spec.ty, value) {
            return Err(format!(
                "property '{}' must be {}, got {}",
                name,
                spec.ty,
                describe(value)
            ));
        }
    }

    Ok(())
}

/// References and concats are lazily bound strings: they satisfy `string`
/// and `any`. An int literal satisfies `float`.
fn type_matches(ty: PropType, value: &Value) -> bool {
    match (ty, value) {
        (PropType::Any, _) => true,
        (PropType::String, Value::Literal(Scalar::String(_))) => true,
        (PropType::String, Value::Ref(_) | Value::Concat(_)) => true,
        (PropType::Int, Value::Literal(Scalar::Int(_))) => true,
        (PropType::Float, Value::Literal(Scalar::Float(_) | Scalar::Int(_))) => true,
        (PropType::Bool, Value::Literal(Scalar::Bool(_))) => true,
        (PropType::List, Value::List(_)) => true,
        (PropType::Map, Value::Map(_)) => true,
        _ => false,
    }
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Literal(Scalar::Null) => "null",
        Value::Literal(Scalar::Bool(_)) => "bool",
        Value::Literal(Scalar::Int(_)) => "int",
        Value::Literal(Scalar::Float(_)) => "float",
        Value::Literal(Scalar::String(_)) => "string",
        Value::Ref(_) => "reference",
        Value::List(_) => "list",
        Value::Map(_) => "map",
        Value::Concat(_) => "concat",
    }
}
