//! Terminal output helpers

use colored::Colorize;

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a stack header, with its description underneath when there is one
pub fn header(title: &str, description: Option<&str>) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
    if let Some(description) = description {
        println!("  {}", description.italic());
    }
    println!();
}

/// Print one declaration: logical id, type and how many producers it waits on
pub fn resource_row(logical_id: &str, resource_type: &str, dependencies: usize) {
    let deps = match dependencies {
        0 => String::new(),
        1 => "(1 dep)".to_string(),
        n => format!("({n} deps)"),
    };
    println!(
        "  {:<48} {} {}",
        logical_id.bold(),
        resource_type.cyan(),
        deps.dimmed()
    );
}
