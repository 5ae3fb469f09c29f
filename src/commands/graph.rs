use anyhow::Result;
use colored::Colorize;

use super::load_stack;
use crate::Context;
use crate::ui;

/// Print resources in the order they would be created
pub fn run(ctx: &Context, dot: bool) -> Result<()> {
    let stack = load_stack(ctx)?;
    let graph = stack.graph()?;

    if dot {
        print!("{}", graph.to_dot());
        return Ok(());
    }

    ui::header(&format!("Dependency graph ({} resources)", graph.len()));
    for (i, node) in graph.topological_order().iter().enumerate() {
        println!(
            "  {:>3}. {} {}",
            i + 1,
            node.id.bold(),
            format!("[{}]", node.resource_type).dimmed()
        );
        let deps = graph.dependencies(&node.id);
        if !deps.is_empty() {
            println!("       ← {}", deps.join(", ").dimmed());
        }
    }
    Ok(())
}
