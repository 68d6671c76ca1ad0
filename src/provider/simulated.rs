//! CP-009: Simulated provisioner.
//!
//! Creates nothing. Reports plausible, deterministic attributes for every
//! attribute the kind exports, derived from BLAKE3 of `stack/logical_id`.
//! The same stack always simulates to the same attributes.

use super::{BoundResource, Provisioner};
use crate::core::schema;
use crate::core::types::{Attributes, ResourceKind};
use crate::provenance::hasher::short_hex;
use indexmap::IndexSet;

const REGION: &str = "us-east-1";
const ACCOUNT: &str = "000000000000";

/// Deterministic in-memory provisioner.
#[derive(Debug, Default)]
pub struct SimulatedProvisioner {
    fail: IndexSet<String>,
    provisioned: Vec<String>,
}

impl SimulatedProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make provisioning of these logical IDs fail.
    pub fn fail_on<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fail.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Logical IDs provisioned so far, in call order.
    pub fn provisioned(&self) -> &[String] {
        &self.provisioned
    }
}

impl Provisioner for SimulatedProvisioner {
    fn name(&self) -> &str {
        "simulated"
    }

    fn provision(&mut self, resource: &BoundResource) -> Result<Attributes, String> {
        if self.fail.contains(&resource.logical_id) {
            return Err(format!("simulated failure for '{}'", resource.logical_id));
        }
        let attrs = simulate_attributes(resource);
        self.provisioned.push(resource.logical_id.clone());
        Ok(attrs)
    }
}

fn id_prefix(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Bucket => "bucket",
        ResourceKind::Vpc => "vpc",
        ResourceKind::Subnet => "subnet",
        ResourceKind::InternetGateway => "igw",
        ResourceKind::RouteTable => "rtb",
        ResourceKind::RouteTableAssociation => "rtbassoc",
        ResourceKind::SecurityGroup => "sg",
        ResourceKind::IamRole => "role",
        ResourceKind::Instance => "i",
        ResourceKind::AutoScalingGroup => "asg",
        ResourceKind::LoadBalancer => "lb",
        ResourceKind::TargetGroup => "tg",
        ResourceKind::Listener => "listener",
        ResourceKind::ResourceShare => "rs",
    }
}

fn arn_service(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Bucket => "s3",
        ResourceKind::IamRole => "iam",
        ResourceKind::AutoScalingGroup => "autoscaling",
        ResourceKind::LoadBalancer | ResourceKind::TargetGroup | ResourceKind::Listener => {
            "elasticloadbalancing"
        }
        ResourceKind::ResourceShare => "ram",
        _ => "ec2",
    }
}

/// Attributes for one resource.
pub fn simulate_attributes(resource: &BoundResource) -> Attributes {
    let seed = format!("{}/{}", resource.stack, resource.logical_id);
    let hex = short_hex(&seed, 17);
    let kind = resource.kind;
    let id = format!("{}-{}", id_prefix(kind), &hex[..8]);
    let name = resource
        .property_str("bucket_name")
        .or_else(|| resource.property_str("name"))
        .map(str::to_string)
        .unwrap_or_else(|| format!("{}-{}-{}", resource.stack, resource.logical_id, &hex[..6]));
    let octet = 1 + u8::from_str_radix(&hex[8..10], 16).unwrap_or(0) % 254;

    let mut attrs = Attributes::new();
    for &attr in schema::schema_for(kind).attributes {
        let value = match attr {
            "id" => match kind {
                ResourceKind::Bucket
                | ResourceKind::IamRole
                | ResourceKind::AutoScalingGroup => name.clone(),
                ResourceKind::Instance => format!("i-{}", &hex[..17]),
                _ => id.clone(),
            },
            "arn" => {
                let resource_path = match kind {
                    ResourceKind::Bucket => name.clone(),
                    ResourceKind::IamRole => format!("role/{}", name),
                    _ => format!("{}/{}", kind.as_str(), id),
                };
                let (region, account) = match kind {
                    ResourceKind::Bucket => ("", ""),
                    ResourceKind::IamRole => ("", ACCOUNT),
                    _ => (REGION, ACCOUNT),
                };
                format!(
                    "arn:aws:{}:{}:{}:{}",
                    arn_service(kind),
                    region,
                    account,
                    resource_path
                )
            }
            "name" => name.clone(),
            "domain_name" => format!("{}.s3.amazonaws.com", name),
            "cidr_block" => resource
                .property_str("cidr_block")
                .unwrap_or("10.0.0.0/16")
                .to_string(),
            "default_security_group_id" => format!("sg-{}", &hex[9..17]),
            "availability_zone" => resource
                .property_str("availability_zone")
                .map(str::to_string)
                .unwrap_or_else(|| format!("{}a", REGION)),
            "public_ip" => format!("203.0.113.{}", octet),
            "private_ip" => format!("10.0.1.{}", octet),
            "public_dns" => format!("ec2-203-0-113-{}.compute-1.amazonaws.com", octet),
            "dns_name" => format!(
                "{}-{}.elb.{}.amazonaws.com",
                resource.logical_id.replace('_', "-"),
                &hex[..8],
                REGION
            ),
            "hosted_zone_id" => "Z26RNL4JYFTOTI".to_string(),
            other => format!("{}-{}", other, &hex[..8]),
        };
        attrs.insert(attr.to_string(), serde_json::Value::String(value));
    }
    attrs
}
