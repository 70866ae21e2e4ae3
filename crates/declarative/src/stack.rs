//! Stack - the root container of a deployable unit

use crate::error::{Error, Result};
use crate::expr::Expr;
use crate::resource::{Resource, validate_logical_id};
use std::collections::{BTreeMap, HashMap};

/// `mapping name -> top-level key -> attribute -> value`
pub type Mappings = BTreeMap<String, BTreeMap<String, BTreeMap<String, String>>>;

/// A stack output
#[derive(Debug, Clone, PartialEq)]
pub struct Output {
    pub logical_id: String,
    pub description: Option<String>,
    pub value: Expr,
}

/// All declarations for one deployable unit
///
/// Resources keep their declaration order; emission order is decided later by
/// the dependency graph.
#[derive(Debug, Clone)]
pub struct Stack {
    name: String,
    description: Option<String>,
    resources: Vec<Resource>,
    index: HashMap<String, usize>,
    mappings: Mappings,
    outputs: Vec<Output>,
}

impl Stack {
    /// Create an empty stack, validating its name
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_stack_name(&name)?;
        Ok(Self {
            name,
            description: None,
            resources: Vec::new(),
            index: HashMap::new(),
            mappings: Mappings::new(),
            outputs: Vec::new(),
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Add a declaration, returning its logical id
    pub fn add(&mut self, resource: Resource) -> Result<String> {
        let id = resource.logical_id().to_string();
        validate_logical_id(&id)?;
        if self.index.contains_key(&id) {
            return Err(Error::DuplicateLogicalId(id));
        }
        log::trace!("declare {} ({})", id, resource.resource_type());
        self.index.insert(id.clone(), self.resources.len());
        self.resources.push(resource);
        Ok(id)
    }

    /// Add one mapping entry; re-adding the same value is a no-op
    pub fn add_mapping(
        &mut self,
        mapping: &str,
        key: &str,
        attribute: &str,
        value: &str,
    ) -> Result<()> {
        validate_logical_id(mapping)?;
        let attributes = self
            .mappings
            .entry(mapping.to_string())
            .or_default()
            .entry(key.to_string())
            .or_default();
        match attributes.get(attribute) {
            Some(existing) if existing != value => Err(Error::MappingConflict {
                mapping: mapping.to_string(),
                key: key.to_string(),
                attribute: attribute.to_string(),
                existing: existing.clone(),
            }),
            Some(_) => Ok(()),
            None => {
                attributes.insert(attribute.to_string(), value.to_string());
                Ok(())
            }
        }
    }

    /// Add a stack output
    pub fn add_output(&mut self, output: Output) -> Result<()> {
        validate_logical_id(&output.logical_id)?;
        if self.outputs.iter().any(|o| o.logical_id == output.logical_id) {
            return Err(Error::DuplicateLogicalId(output.logical_id));
        }
        self.outputs.push(output);
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Declarations in the order they were added
    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn get(&self, logical_id: &str) -> Option<&Resource> {
        self.index.get(logical_id).map(|&i| &self.resources[i])
    }

    pub fn contains(&self, logical_id: &str) -> bool {
        self.index.contains_key(logical_id)
    }

    /// Position of a declaration in declaration order
    pub fn position(&self, logical_id: &str) -> Option<usize> {
        self.index.get(logical_id).copied()
    }

    /// All declarations of one resource type
    pub fn of_type<'a>(&'a self, resource_type: &'a str) -> impl Iterator<Item = &'a Resource> {
        self.resources
            .iter()
            .filter(move |r| r.resource_type() == resource_type)
    }

    pub fn mappings(&self) -> &Mappings {
        &self.mappings
    }

    pub fn outputs(&self) -> &[Output] {
        &self.outputs
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

/// A stack name must start with a letter, contain only alphanumerics and
/// hyphens, and be at most 128 characters long
pub fn validate_stack_name(name: &str) -> Result<()> {
    let invalid = |reason| {
        Err(Error::InvalidStackName {
            name: name.to_string(),
            reason,
        })
    };
    match name.chars().next() {
        None => return invalid("must not be empty"),
        Some(c) if !c.is_ascii_alphabetic() => {
            return invalid("must start with an alphabetical character");
        }
        Some(_) => {}
    }
    if name.len() > 128 {
        return invalid("must be at most 128 characters");
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return invalid("must only contain alphanumeric characters and hyphens");
    }
    Ok(())
}
