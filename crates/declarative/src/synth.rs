//! Synthesizer - turns a stack into a template

use crate::error::Result;
use crate::graph::DependencyGraph;
use crate::stack::Stack;
use crate::types::{Template, TemplateOutput, TemplateResource};
use serde_json::Map;

/// Resources CloudFormation accepts in one template
pub const MAX_TEMPLATE_RESOURCES: usize = 500;

/// Validate the stack and emit its template
///
/// Resources are emitted in dependency order (see
/// [`DependencyGraph::topological_order`]). Dangling references, unknown
/// mappings and cycles are errors; nothing is emitted in that case.
pub fn synthesize(stack: &Stack) -> Result<Template> {
    let graph = DependencyGraph::from_stack(stack)?;
    let order = graph.topological_order()?;

    let mut template = Template {
        description: stack.description().map(str::to_string),
        mappings: stack.mappings().clone(),
        ..Default::default()
    };

    for id in order {
        let Some(resource) = stack.get(id) else {
            continue;
        };
        let properties: Map<_, _> = resource
            .properties()
            .iter()
            .map(|(k, v)| (k.clone(), v.to_value()))
            .collect();
        log::trace!("emit {} ({})", id, resource.resource_type());
        template.resources.push((
            id.to_string(),
            TemplateResource {
                resource_type: resource.resource_type().to_string(),
                properties,
                depends_on: resource.explicit_dependencies().to_vec(),
                update_replace_policy: resource.removal(),
                deletion_policy: resource.removal(),
            },
        ));
    }

    for output in stack.outputs() {
        template.outputs.push((
            output.logical_id.clone(),
            TemplateOutput {
                description: output.description.clone(),
                value: output.value.to_value(),
            },
        ));
    }

    if template.resources.len() > MAX_TEMPLATE_RESOURCES {
        log::warn!(
            "{} declares {} resources; CloudFormation rejects templates with more than {}",
            stack.name(),
            template.resources.len(),
            MAX_TEMPLATE_RESOURCES
        );
    }

    log::info!(
        "synthesized stack {} with {} resources and {} outputs",
        stack.name(),
        template.resources.len(),
        template.outputs.len()
    );
    Ok(template)
}
