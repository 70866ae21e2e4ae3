//! AWS constructs for the Kaginawa stack
//!
//! Each construct holds its configuration, expands into one or more
//! declarations on [`declarative::Stack`], and hands back a handle that later
//! constructs use to reference what it declared:
//! - `network` - VPC, subnets, routing, security groups
//! - `certificate` - ACM certificate
//! - `instance` - EC2 instances and elastic IPs
//! - `table` - DynamoDB tables with autoscaling
//! - `service` - ECS cluster, Fargate service and load balancer
//! - `iam` - roles and policies

pub mod certificate;
pub mod iam;
pub mod instance;
pub mod network;
pub mod service;
pub mod table;

pub use certificate::Certificate;
pub use iam::{PolicyStatement, Role};
pub use instance::{ElasticIp, Instance, InstanceType, MachineImage};
pub use network::{Network, NetworkHandle, SubnetConfiguration, SubnetType};
pub use service::{Cluster, HttpsListener, LoadBalancedFargateService, Stickiness};
pub use table::{Attribute, GlobalSecondaryIndex, Scaling, Table, TableHandle};
