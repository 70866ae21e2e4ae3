//! Resource declarations and the construct trait
//!
//! A [`Resource`] is one node of the stack: a logical id, a resource type and
//! a set of properties. A [`Construct`] is a higher-level building block that
//! expands into one or more resources.

use crate::error::{Error, Result};
use crate::expr::Expr;
use crate::stack::Stack;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// What happens to a resource when the stack is torn down or it is replaced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemovalPolicy {
    /// Delete the underlying resource
    #[serde(rename = "Delete")]
    Destroy,
    /// Keep the underlying resource
    Retain,
    /// Take a snapshot, then delete
    Snapshot,
}

/// A single resource declaration
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    logical_id: String,
    resource_type: String,
    properties: BTreeMap<String, Expr>,
    depends_on: Vec<String>,
    removal_policy: Option<RemovalPolicy>,
}

impl Resource {
    /// Start a declaration of `resource_type` named `logical_id`
    pub fn new(logical_id: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            logical_id: logical_id.into(),
            resource_type: resource_type.into(),
            properties: BTreeMap::new(),
            depends_on: Vec::new(),
            removal_policy: None,
        }
    }

    /// Set a property
    pub fn property(mut self, name: impl Into<String>, value: impl Into<Expr>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Set a property only when a value is present
    pub fn property_opt<V: Into<Expr>>(self, name: impl Into<String>, value: Option<V>) -> Self {
        match value {
            Some(v) => self.property(name, v),
            None => self,
        }
    }

    /// Add an explicit dependency on another declaration
    pub fn depends_on(mut self, logical_id: impl Into<String>) -> Self {
        let id = logical_id.into();
        if !self.depends_on.contains(&id) {
            self.depends_on.push(id);
        }
        self
    }

    pub fn removal_policy(mut self, policy: RemovalPolicy) -> Self {
        self.removal_policy = Some(policy);
        self
    }

    pub fn logical_id(&self) -> &str {
        &self.logical_id
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn properties(&self) -> &BTreeMap<String, Expr> {
        &self.properties
    }

    pub fn get(&self, name: &str) -> Option<&Expr> {
        self.properties.get(name)
    }

    pub fn explicit_dependencies(&self) -> &[String] {
        &self.depends_on
    }

    pub fn removal(&self) -> Option<RemovalPolicy> {
        self.removal_policy
    }

    /// Every logical id this declaration needs, deduplicated, in first-seen order
    pub fn references(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        let from_props = self.properties.values().flat_map(Expr::references);
        for id in from_props.chain(self.depends_on.iter().map(String::as_str)) {
            if !out.contains(&id) {
                out.push(id);
            }
        }
        out
    }

    /// Mapping names used by this declaration's properties
    pub fn mappings(&self) -> Vec<&str> {
        self.properties.values().flat_map(Expr::mappings).collect()
    }
}

/// Check a logical id: 1-255 ASCII alphanumeric characters
pub fn validate_logical_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(Error::InvalidLogicalId {
            id: id.to_string(),
            reason: "must contain at least 1 character",
        });
    }
    if id.len() > 255 {
        return Err(Error::InvalidLogicalId {
            id: id.to_string(),
            reason: "must be at most 255 characters",
        });
    }
    if !id.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(Error::InvalidLogicalId {
            id: id.to_string(),
            reason: "must contain only [A-Za-z0-9]",
        });
    }
    Ok(())
}

/// Strip everything but ASCII alphanumerics so a name can be used in a logical id
pub fn sanitize_id(name: &str) -> String {
    name.chars().filter(char::is_ascii_alphanumeric).collect()
}

/// A building block that declares one or more resources into a stack
///
/// Implementors hold their configuration and return a handle that later
/// constructs use to reference what was declared (names, ARNs, ids).
///
/// # Example
///
/// ```ignore
/// use declarative::{Construct, Resource, Stack, Result};
///
/// #[derive(Debug)]
/// struct Bucket { id: String }
///
/// impl Construct for Bucket {
///     type Handle = String;
///
///     fn id(&self) -> &str { &self.id }
///     fn description(&self) -> String { format!("Bucket {}", self.id) }
///
///     fn declare(&self, stack: &mut Stack) -> Result<String> {
///         stack.add(Resource::new(&self.id, "AWS::S3::Bucket"))
///     }
/// }
/// ```
pub trait Construct: fmt::Debug {
    /// What later constructs receive to wire themselves to this one
    type Handle;

    /// Construct id; usually the logical id of its primary resource
    fn id(&self) -> &str;

    /// Human-readable description
    fn description(&self) -> String;

    /// Add this construct's resources to the stack
    fn declare(&self, stack: &mut Stack) -> Result<Self::Handle>;
}
