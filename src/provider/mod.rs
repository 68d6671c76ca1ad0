//! CP-009/010: Provisioners: what actually creates a resource.
//!
//! The executor hands each resource to a `Provisioner` with every reference
//! already bound to concrete values, and records the attributes it reports.

pub mod exec;
pub mod simulated;

use crate::core::types::{Attributes, ResourceKind};
use serde::Serialize;

/// A resource ready to be provisioned: references replaced by values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoundResource {
    pub stack: String,
    pub logical_id: String,
    pub kind: ResourceKind,
    /// JSON object of property name to bound value
    pub properties: serde_json::Value,
}

impl BoundResource {
    /// A bound property by name.
    pub fn property(&self, name: &str) -> Option<&serde_json::Value> {
        self.properties.get(name)
    }

    /// A bound string property by name.
    pub fn property_str(&self, name: &str) -> Option<&str> {
        self.property(name).and_then(serde_json::Value::as_str)
    }
}

/// Creates resources and reports their attributes.
pub trait Provisioner {
    /// Short name, recorded in the event log.
    fn name(&self) -> &str;

    /// Create one resource. The returned attributes become referenceable
    /// by resources later in the plan.
    fn provision(&mut self, resource: &BoundResource) -> Result<Attributes, String>;
}
