use anyhow::{Result, bail};
use colored::Colorize;
use declarative::{DependencyGraph, Resource, Stack};

use crate::Context;
use crate::cli::ListArgs;
use crate::engine::{self, planner};
use crate::ui;

pub fn run(ctx: &Context, args: ListArgs) -> Result<()> {
    let stack = engine::plan(&args.stack)?;
    let graph = DependencyGraph::from_stack(&stack)?;
    let order = graph.topological_order()?;

    let (resource_type, name) = args
        .target
        .as_deref()
        .map(planner::parse_target)
        .unwrap_or((None, None));
    let selected = select(&stack, &order, resource_type.as_deref(), name.as_deref());

    if selected.is_empty() {
        if let Some(target) = &args.target {
            bail!(
                "No resources match '{}'. Aliases: {}",
                target,
                planner::ALIASES.join(", ")
            );
        }
        bail!("The stack declares no resources");
    }

    ui::header(stack.name(), stack.description());

    for resource in &selected {
        let dependencies = graph.dependencies_of(resource.logical_id());
        ui::resource_row(
            resource.logical_id(),
            resource.resource_type(),
            dependencies.len(),
        );
        if ctx.verbose > 0 {
            for dependency in dependencies {
                println!("      {} {}", "←".dimmed(), dependency.dimmed());
            }
        }
    }

    println!();
    ui::dim(&format!(
        "{} of {} resources, {} mappings, {} outputs",
        selected.len(),
        stack.len(),
        stack.mappings().len(),
        stack.outputs().len()
    ));
    Ok(())
}

/// Resources matching the filter, in emission order
fn select<'a>(
    stack: &'a Stack,
    order: &[&str],
    resource_type: Option<&str>,
    name: Option<&str>,
) -> Vec<&'a Resource> {
    order
        .iter()
        .filter_map(|id| stack.get(id))
        .filter(|r| planner::matches_filter(r, resource_type, name))
        .collect()
}
