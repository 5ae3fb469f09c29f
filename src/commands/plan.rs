use anyhow::Result;

use super::load_stack;
use crate::Context;
use crate::cli::PlanArgs;
use crate::engine;
use crate::ui;

pub fn run(ctx: &Context, args: &PlanArgs) -> Result<()> {
    let stack = load_stack(ctx)?;
    let graph = stack.graph()?;
    let store = stack.state_store(ctx.state_dir.as_deref());
    let plan = declarative::plan(&graph, &store)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&plan.operations)?);
        return Ok(());
    }

    ui::header(&format!("Plan for stack {}", stack.name));
    if let Some(description) = &stack.description {
        ui::dim(description);
    }
    engine::display_plan(&plan, args.all || ctx.verbose > 0);
    Ok(())
}
