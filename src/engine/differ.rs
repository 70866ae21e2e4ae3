//! Diff display - template changes in a user-friendly format

use colored::Colorize;
use declarative::{Change, DiffSummary, ResourceDiff, Template, group_by_type};

/// Pretty JSON of one resource, for line diffs
fn resource_text(template: &Template, logical_id: &str) -> String {
    template
        .resource(logical_id)
        .and_then(|r| serde_json::to_string_pretty(r).ok())
        .map(|mut text| {
            text.push('\n');
            text
        })
        .unwrap_or_default()
}

/// Changed lines between two texts, `-`/`+` prefixed, without color
pub fn line_diff(old: &str, new: &str) -> Vec<String> {
    let diff = similar::TextDiff::from_lines(old, new);
    diff.iter_all_changes()
        .filter_map(|change| match change.tag() {
            similar::ChangeTag::Delete => Some(format!("- {change}")),
            similar::ChangeTag::Insert => Some(format!("+ {change}")),
            similar::ChangeTag::Equal => None,
        })
        .collect()
}

fn symbol(change: &Change) -> colored::ColoredString {
    match change {
        Change::Added => "+".green(),
        Change::Removed => "-".red(),
        Change::Modified { .. } => "~".yellow(),
        Change::Replaced { .. } => "!".red().bold(),
    }
}

fn describe(change: &Change) -> String {
    match change {
        Change::Added => "(new)".to_string(),
        Change::Removed => "(will be deleted)".to_string(),
        Change::Modified { properties } => properties.join(", "),
        Change::Replaced { from_type } => format!("(replaces {from_type})"),
    }
}

/// Display a list of diffs grouped by resource type
pub fn display_diff(diffs: &[ResourceDiff], old: &Template, new: &Template, detail: bool) {
    if diffs.is_empty() {
        println!();
        println!("  {} No changes", "✓".green());
        return;
    }

    println!();
    println!(
        "┌─ {} ─────────────────────────────────────────┐",
        "Template Diff".bold()
    );
    println!("│");

    for (resource_type, type_diffs) in group_by_type(diffs) {
        println!("│ {}", resource_type.bold());

        for diff in type_diffs {
            println!(
                "│   {} {:<40} {}",
                symbol(&diff.change),
                diff.logical_id,
                describe(&diff.change).dimmed()
            );

            if detail && diff.is_modification() {
                let old_text = resource_text(old, &diff.logical_id);
                let new_text = resource_text(new, &diff.logical_id);
                for line in line_diff(&old_text, &new_text) {
                    let styled = if line.starts_with('-') {
                        line.red()
                    } else {
                        line.green()
                    };
                    print!("│       {styled}");
                }
            }
        }
        println!("│");
    }

    let summary = DiffSummary::from_diffs(diffs);
    println!("├─────────────────────────────────────────────────────┤");
    println!(
        "│ Summary: {} changes ({} to add, {} to change, {} to replace, {} to delete)",
        summary.total().to_string().bold(),
        summary.additions.to_string().green(),
        summary.modifications.to_string().yellow(),
        summary.replacements.to_string().red(),
        summary.removals.to_string().red()
    );
    println!("└─────────────────────────────────────────────────────┘");
}
