//! Planner - configuration in, validated stack out, plus target filters

use crate::builder;
use crate::cli::StackArgs;
use crate::config::StackConfig;
use crate::paths;
use anyhow::Result;
use declarative::{Resource, Stack};

/// Load configuration and build the stack the command operates on
pub fn plan(args: &StackArgs) -> Result<Stack> {
    let env_file = (!args.no_env_file).then(|| paths::expand(&args.env_file));
    plan_from(args, StackConfig::load(env_file.as_deref())?)
}

/// Build the stack from configuration that is already loaded
fn plan_from(args: &StackArgs, config: StackConfig) -> Result<Stack> {
    if args.strict {
        config.ensure_complete()?;
    } else {
        config.warn_missing();
    }

    builder::build(&config, &args.stack_name)
}

/// Resource types behind each target alias; a trailing `::` matches a whole service
fn alias_types(alias: &str) -> Option<&'static [&'static str]> {
    let types: &'static [&'static str] = match alias {
        "network" => &[
            "AWS::EC2::VPC",
            "AWS::EC2::Subnet",
            "AWS::EC2::RouteTable",
            "AWS::EC2::SubnetRouteTableAssociation",
            "AWS::EC2::Route",
            "AWS::EC2::InternetGateway",
            "AWS::EC2::VPCGatewayAttachment",
            "AWS::EC2::SecurityGroup",
            "AWS::EC2::SecurityGroupIngress",
        ],
        "instances" => &[
            "AWS::EC2::Instance",
            "AWS::EC2::EIP",
            "AWS::EC2::EIPAssociation",
            "AWS::IAM::InstanceProfile",
        ],
        "tables" => &["AWS::DynamoDB::Table"],
        "service" => &[
            "AWS::ECS::",
            "AWS::ElasticLoadBalancingV2::",
            "AWS::Logs::",
            "AWS::CertificateManager::",
        ],
        "iam" => &["AWS::IAM::"],
        "scaling" => &["AWS::ApplicationAutoScaling::"],
        _ => return None,
    };
    Some(types)
}

/// Aliases accepted as the type part of a target
pub const ALIASES: [&str; 6] = ["network", "instances", "tables", "service", "iam", "scaling"];

/// Parse a target string like "tables.KaginawaKeys" into (resource_type, name)
///
/// The name part may itself contain dots; only the first one separates.
pub fn parse_target(target: &str) -> (Option<String>, Option<String>) {
    match target.split_once('.') {
        None if is_type_filter(target) => (Some(target.to_string()), None),
        None => (None, Some(target.to_string())),
        Some((kind, name)) => (Some(kind.to_string()), Some(name.to_string())),
    }
}

fn is_type_filter(value: &str) -> bool {
    alias_types(value).is_some() || value.contains("::")
}

fn matches_type(resource_type: &str, filter: &str) -> bool {
    match alias_types(filter) {
        Some(types) => types.iter().any(|t| {
            if t.ends_with("::") {
                resource_type.starts_with(t)
            } else {
                resource_type == *t
            }
        }),
        None => resource_type == filter,
    }
}

/// Check if a resource matches the filter
pub fn matches_filter(
    resource: &Resource,
    resource_type: Option<&str>,
    name: Option<&str>,
) -> bool {
    if let Some(rt) = resource_type
        && !matches_type(resource.resource_type(), rt)
    {
        return false;
    }

    if let Some(n) = name
        && !resource.logical_id().contains(n)
    {
        return false;
    }

    true
}
