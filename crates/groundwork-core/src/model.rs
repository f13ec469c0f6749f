//! Resource descriptors, attribute values and typed references
//!
//! A stack is a declaration-ordered collection of [`ResourceDescriptor`]s.
//! Attribute values form a tree of literals, lists and maps; a cross-resource
//! link is an explicit [`Reference`] node in that tree, tagged at construction
//! time. Nothing here scans strings for implicit handles.

use crate::error::{GraphError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Typed pointer from one resource's attribute to another resource's output.
///
/// Resolved only after the target resource has been materialized by the
/// control plane; until then it is compared structurally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    /// Descriptor id of the target resource
    pub target: String,

    /// Name of the output attribute to read from the target
    pub output: String,
}

impl Reference {
    pub fn new(target: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            output: output.into(),
        }
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "${{{}.{}}}", self.target, self.output)
    }
}

/// A single attribute value: literal JSON, a reference, or a nested container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttrValue {
    /// Plain literal value
    Literal(serde_json::Value),

    /// Link to another resource's output
    Reference(Reference),

    /// Ordered list of values
    List(Vec<AttrValue>),

    /// Nested attribute map
    Map(BTreeMap<String, AttrValue>),
}

impl AttrValue {
    pub fn reference(target: impl Into<String>, output: impl Into<String>) -> Self {
        Self::Reference(Reference::new(target, output))
    }

    /// Collect every reference in this value tree, depth-first
    pub fn references(&self) -> Vec<&Reference> {
        let mut found = Vec::new();
        self.collect_references(&mut found);
        found
    }

    fn collect_references<'a>(&'a self, found: &mut Vec<&'a Reference>) {
        match self {
            AttrValue::Literal(_) => {}
            AttrValue::Reference(r) => found.push(r),
            AttrValue::List(items) => {
                for item in items {
                    item.collect_references(found);
                }
            }
            AttrValue::Map(entries) => {
                for value in entries.values() {
                    value.collect_references(found);
                }
            }
        }
    }

    /// Replace every reference with the value produced by `resolver`.
    ///
    /// Returns the first reference the resolver could not satisfy, so the
    /// caller can report exactly which link was missing.
    pub fn resolve<F>(&self, resolver: &F) -> std::result::Result<serde_json::Value, Reference>
    where
        F: Fn(&Reference) -> Option<serde_json::Value>,
    {
        match self {
            AttrValue::Literal(value) => Ok(value.clone()),
            AttrValue::Reference(r) => resolver(r).ok_or_else(|| r.clone()),
            AttrValue::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(item.resolve(resolver)?);
                }
                Ok(serde_json::Value::Array(out))
            }
            AttrValue::Map(entries) => {
                let mut out = serde_json::Map::new();
                for (key, value) in entries {
                    out.insert(key.clone(), value.resolve(resolver)?);
                }
                Ok(serde_json::Value::Object(out))
            }
        }
    }
}

impl From<serde_json::Value> for AttrValue {
    fn from(value: serde_json::Value) -> Self {
        Self::Literal(value)
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        Self::Literal(serde_json::Value::String(value.to_string()))
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        Self::Literal(serde_json::Value::String(value))
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        Self::Literal(serde_json::json!(value))
    }
}

impl From<i32> for AttrValue {
    fn from(value: i32) -> Self {
        Self::Literal(serde_json::json!(value))
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        Self::Literal(serde_json::Value::Bool(value))
    }
}

impl From<Reference> for AttrValue {
    fn from(value: Reference) -> Self {
        Self::Reference(value)
    }
}

/// Declarative specification of one resource's desired type and attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    /// Unique id within the stack
    pub id: String,

    /// Resource type tag (e.g. "network", "cluster", "load-balancer")
    pub resource_type: String,

    /// Desired attributes; values may contain references
    pub attributes: BTreeMap<String, AttrValue>,

    /// Explicit ordering hints beyond the references in `attributes`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

impl ResourceDescriptor {
    pub fn new(id: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            resource_type: resource_type.into(),
            attributes: BTreeMap::new(),
            depends_on: Vec::new(),
        }
    }

    /// Set an attribute (builder style)
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Set an attribute that references another resource's output
    pub fn attr_ref(
        mut self,
        name: impl Into<String>,
        target: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        self.attributes
            .insert(name.into(), AttrValue::reference(target, output));
        self
    }

    /// Add an explicit ordering dependency
    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.depends_on.push(id.into());
        self
    }

    /// Every reference carried by this descriptor, with its attribute name
    pub fn references(&self) -> Vec<(&str, &Reference)> {
        let mut found = Vec::new();
        for (name, value) in &self.attributes {
            for reference in value.references() {
                found.push((name.as_str(), reference));
            }
        }
        found
    }
}

/// Named stack output, surfaced once the owning resource is active
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackExport {
    pub name: String,
    pub reference: Reference,
}

/// Top-level named collection of resource descriptors.
///
/// Declaration order is preserved and used as the deterministic tie-break
/// when two resources could otherwise be applied in either order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Stack {
    /// Stack name; also the key under which state is persisted
    pub name: String,

    descriptors: Vec<ResourceDescriptor>,

    /// Named outputs surfaced to the caller after apply
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exports: Vec<StackExport>,
}

impl Stack {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            descriptors: Vec::new(),
            exports: Vec::new(),
        }
    }

    /// Add a descriptor; fails if the id is already declared
    pub fn add(&mut self, descriptor: ResourceDescriptor) -> Result<()> {
        if self.get(&descriptor.id).is_some() {
            return Err(GraphError::DuplicateResource(descriptor.id));
        }
        self.descriptors.push(descriptor);
        Ok(())
    }

    /// Declare a named export pointing at a resource output
    pub fn export(
        &mut self,
        name: impl Into<String>,
        target: impl Into<String>,
        output: impl Into<String>,
    ) {
        self.exports.push(StackExport {
            name: name.into(),
            reference: Reference::new(target, output),
        });
    }

    pub fn get(&self, id: &str) -> Option<&ResourceDescriptor> {
        self.descriptors.iter().find(|d| d.id == id)
    }

    /// Declaration index of a resource, if present
    pub fn position(&self, id: &str) -> Option<usize> {
        self.descriptors.iter().position(|d| d.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceDescriptor> {
        self.descriptors.iter()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Check that explicit dependencies and exports point at declared ids.
    ///
    /// Reference targets inside attributes are checked during graph
    /// construction, where the offending attribute can be named.
    pub fn validate(&self) -> Result<()> {
        for descriptor in &self.descriptors {
            for dependency in &descriptor.depends_on {
                if self.get(dependency).is_none() {
                    return Err(GraphError::UnknownDependency {
                        resource: descriptor.id.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }
        }
        for export in &self.exports {
            if self.get(&export.reference.target).is_none() {
                return Err(GraphError::UnknownExport {
                    export: export.name.clone(),
                    target: export.reference.target.clone(),
                });
            }
        }
        Ok(())
    }
}
