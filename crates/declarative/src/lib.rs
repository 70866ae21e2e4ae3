//! # Declarative
//!
//! Declarative resource graphs synthesized into deployment templates.
//!
//! This crate provides the core abstractions for declaring infrastructure as
//! a graph of named resources, validating that graph, and emitting it as a
//! CloudFormation-style JSON template.
//!
//! ## Core Concepts
//!
//! - **Expr**: A property value; literal JSON or an intrinsic (`Ref`,
//!   `Fn::GetAtt`, `Fn::Join`, ...) resolved by the provisioning engine
//! - **Resource**: One named declaration with a type and properties
//! - **Construct**: A building block that declares one or more resources
//! - **Stack**: The root container of all declarations for one deployable unit
//! - **DependencyGraph**: The DAG derived from references between declarations
//! - **Template**: The synthesized, serializable form of a stack
//!
//! ## Example
//!
//! ```ignore
//! use declarative::{Expr, Resource, Stack, synthesize};
//!
//! let mut stack = Stack::new("Demo")?;
//! stack.add(Resource::new("Eip", "AWS::EC2::EIP"))?;
//! stack.add(
//!     Resource::new("Assoc", "AWS::EC2::EIPAssociation")
//!         .property("EIP", Expr::reference("Eip")),
//! )?;
//!
//! let template = synthesize(&stack)?;
//! println!("{}", template.to_json_pretty()?);
//! ```
//!
//! Emission order is decided by the dependency graph, not by the order in
//! which resources were added. A reference to an undeclared resource or a
//! dependency cycle fails synthesis.

pub mod diff;
pub mod error;
pub mod expr;
pub mod graph;
pub mod resource;
pub mod stack;
pub mod synth;
pub mod types;

// Re-export main types at crate root
pub use diff::{Change, DiffSummary, ResourceDiff, compute_diffs, group_by_type};
pub use error::{Error, Result};
pub use expr::{Expr, Pseudo};
pub use graph::DependencyGraph;
pub use resource::{Construct, RemovalPolicy, Resource, sanitize_id, validate_logical_id};
pub use stack::{Mappings, Output, Stack, validate_stack_name};
pub use synth::{MAX_TEMPLATE_RESOURCES, synthesize};
pub use types::{TEMPLATE_FORMAT_VERSION, Template, TemplateOutput, TemplateResource};
