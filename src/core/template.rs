//! core::template
//!
//! Stack template representation.
//!
//! A template is the JSON document describing a stack's resources, input
//! parameters and outputs:
//!
//! ```json
//! {
//!   "Resources": { "Bucket": { "Type": "AWS::S3::Bucket", "Properties": {} } },
//!   "Parameters": { "Stage": { "Type": "String" } },
//!   "Outputs": { "BucketName": { "Value": { "Ref": "Bucket" } } }
//! }
//! ```
//!
//! Templates are never mutated once loaded. Keys use `BTreeMap` so every
//! rendering (diffs, request bodies) is deterministic.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single resource declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Resource type, e.g. `AWS::IAM::Role`
    #[serde(rename = "Type")]
    pub resource_type: String,

    /// Resource properties
    #[serde(rename = "Properties", default, skip_serializing_if = "Value::is_null")]
    pub properties: Value,

    /// Remaining resource attributes (DependsOn, Metadata, ...)
    #[serde(flatten)]
    pub attributes: BTreeMap<String, Value>,
}

impl Resource {
    /// Create a resource with the given type and properties.
    pub fn new(resource_type: impl Into<String>, properties: Value) -> Self {
        Self {
            resource_type: resource_type.into(),
            properties,
            attributes: BTreeMap::new(),
        }
    }

    /// Look up a top-level property.
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }
}

/// A stack template.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Template {
    /// Resource declarations keyed by logical id
    #[serde(rename = "Resources", default)]
    pub resources: BTreeMap<String, Resource>,

    /// Input parameter declarations
    #[serde(rename = "Parameters", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, Value>,

    /// Output declarations
    #[serde(rename = "Outputs", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, Value>,
}

impl Template {
    /// Create an empty template.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse a template from JSON text.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Render the template as pretty JSON.
    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Add a resource (builder style, mostly for tests and fixtures).
    pub fn with_resource(mut self, logical_id: impl Into<String>, resource: Resource) -> Self {
        self.resources.insert(logical_id.into(), resource);
        self
    }

    /// Whether the template declares no resources.
    ///
    /// Such a template is never deployed.
    pub fn has_no_resources(&self) -> bool {
        self.resources.is_empty()
    }

    /// Number of declared resources.
    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    /// Return a copy with logical ids renamed according to `mappings`
    /// (old id -> new id). Ids without a mapping are kept.
    pub fn with_renamed_resources(&self, mappings: &BTreeMap<String, String>) -> Self {
        let resources = self
            .resources
            .iter()
            .map(|(id, resource)| {
                let new_id = mappings.get(id).cloned().unwrap_or_else(|| id.clone());
                (new_id, resource.clone())
            })
            .collect();
        Self {
            resources,
            parameters: self.parameters.clone(),
            outputs: self.outputs.clone(),
        }
    }
}
