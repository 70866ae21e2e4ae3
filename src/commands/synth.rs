use anyhow::{Context as AnyhowContext, Result};
use declarative::synthesize;
use std::fs;
use std::path::Path;

use crate::Context;
use crate::cli::SynthArgs;
use crate::engine;
use crate::paths;
use crate::ui;

pub fn run(ctx: &Context, args: SynthArgs) -> Result<()> {
    let stack = engine::plan(&args.stack)?;
    let template = synthesize(&stack).context("Failed to synthesize stack")?;
    let json = template.to_json_pretty()?;

    match args.output {
        Some(output) => {
            let path = paths::expand(&output);
            write_template(&path, &json)?;
            if !ctx.quiet {
                ui::success(&format!(
                    "Wrote {} ({} resources)",
                    path.display(),
                    template.resources.len()
                ));
            }
        }
        None => print!("{json}"),
    }

    Ok(())
}

/// Write a template, creating missing parent directories
fn write_template(path: &Path, json: &str) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}
