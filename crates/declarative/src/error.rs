//! Error types for the declarative crate

use thiserror::Error;

/// Errors that can occur while declaring or synthesizing a stack
#[derive(Error, Debug)]
pub enum Error {
    /// Stack name violates CloudFormation naming rules
    #[error("invalid stack name {name:?}: {reason}")]
    InvalidStackName { name: String, reason: &'static str },

    /// Logical id is not 1-255 alphanumeric characters
    #[error("invalid logical id {id:?}: {reason}")]
    InvalidLogicalId { id: String, reason: &'static str },

    /// Two declarations share the same logical id
    #[error("duplicate logical id: {0}")]
    DuplicateLogicalId(String),

    /// A declaration references something that is not in the stack
    #[error("{from} references {to}, which is not declared in this stack")]
    DanglingReference { from: String, to: String },

    /// A `Fn::FindInMap` names a mapping that was never added
    #[error("{from} uses mapping {mapping}, which is not declared in this stack")]
    UnknownMapping { from: String, mapping: String },

    /// The same mapping entry was added twice with different values
    #[error("mapping {mapping}.{key}.{attribute} already set to {existing:?}")]
    MappingConflict {
        mapping: String,
        key: String,
        attribute: String,
        existing: String,
    },

    /// Declarations depend on each other in a loop
    #[error("dependency cycle between: {}", .ids.join(", "))]
    Cycle { ids: Vec<String> },

    /// A construct was configured with values it cannot express
    #[error("invalid property on {id}: {reason}")]
    InvalidProperty { id: String, reason: String },

    /// Template (de)serialization failed
    #[error("template JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Shorthand for [`Error::InvalidProperty`]
    pub fn invalid_property(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidProperty {
            id: id.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for declarative operations
pub type Result<T> = std::result::Result<T, Error>;
