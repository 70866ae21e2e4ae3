use anyhow::{Context as AnyhowContext, Result};
use declarative::{Template, compute_diffs, synthesize};
use std::fs;
use std::path::Path;

use crate::Context;
use crate::cli::DiffArgs;
use crate::engine::{self, differ};
use crate::paths;

pub fn run(_ctx: &Context, args: DiffArgs) -> Result<()> {
    let old = load_template(&paths::expand(&args.against))?;
    let stack = engine::plan(&args.stack)?;
    let new = synthesize(&stack).context("Failed to synthesize stack")?;

    let diffs = compute_diffs(&old, &new);
    log::info!("{} resources differ from {}", diffs.len(), args.against);
    differ::display_diff(&diffs, &old, &new, args.detail);
    Ok(())
}

/// Read a previously synthesized template
fn load_template(path: &Path) -> Result<Template> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Template::from_json(&json).with_context(|| format!("{} is not a template", path.display()))
}
