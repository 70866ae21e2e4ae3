use anyhow::Result;
use declarative::{DependencyGraph, Stack};

use crate::Context;
use crate::cli::GraphArgs;
use crate::engine;

pub fn run(_ctx: &Context, args: GraphArgs) -> Result<()> {
    let stack = engine::plan(&args.stack)?;
    print!("{}", to_dot(&stack)?);
    Ok(())
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

fn quote(value: &str) -> String {
    format!("\"{}\"", escape(value))
}

/// Render the dependency graph as Graphviz DOT, nodes in emission order
fn to_dot(stack: &Stack) -> Result<String> {
    let graph = DependencyGraph::from_stack(stack)?;
    let order = graph.topological_order()?;

    let mut out = format!("digraph {} {{\n", quote(stack.name()));
    out.push_str("  rankdir=LR;\n");
    out.push_str("  node [shape=box, fontname=\"Helvetica\"];\n");
    for id in &order {
        let resource_type = stack.get(id).map_or("", |r| r.resource_type());
        // `\n` inside a quoted DOT label is a line break
        out.push_str(&format!(
            "  {} [label=\"{}\\n{}\"];\n",
            quote(id),
            escape(id),
            escape(resource_type)
        ));
    }
    for (producer, consumer) in graph.edges() {
        out.push_str(&format!("  {} -> {};\n", quote(producer), quote(consumer)));
    }
    out.push_str("}\n");
    Ok(out)
}
