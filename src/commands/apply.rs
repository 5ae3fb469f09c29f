//! `strata apply` and `strata destroy`

use anyhow::{Result, bail};
use declarative::{ApplyResult, build_graph};

use super::load_stack;
use crate::Context;
use crate::cli::ApplyArgs;
use crate::engine::{self, RunOptions};
use crate::ui;

pub fn apply(ctx: &Context, args: &ApplyArgs) -> Result<()> {
    let stack = load_stack(ctx)?;
    let graph = stack.graph()?;
    let store = stack.state_store(ctx.state_dir.as_deref());

    ui::header(&format!("Applying stack {}", stack.name));
    if args.dry_run {
        ui::warn("Dry run - no changes will be made");
    }

    let Some(result) = engine::converge(ctx, &graph, &store, &stack.engine, &run_options(args))?
    else {
        return Ok(());
    };

    let exports = result.exports(&stack.exports);
    if !exports.is_empty() {
        ui::header("Outputs");
        for (name, value) in &exports {
            ui::kv(name, &ui::format_value(value));
        }
    }

    check(&result)
}

/// Delete every resource recorded in state
pub fn destroy(ctx: &Context, args: &ApplyArgs) -> Result<()> {
    let stack = load_stack(ctx)?;
    let store = stack.state_store(ctx.state_dir.as_deref());
    let graph = build_graph(Vec::new())?;

    ui::header(&format!("Destroying stack {}", stack.name));
    if args.dry_run {
        ui::warn("Dry run - no changes will be made");
    }

    match engine::converge(ctx, &graph, &store, &stack.engine, &run_options(args))? {
        Some(result) => check(&result),
        None => Ok(()),
    }
}

fn run_options(args: &ApplyArgs) -> RunOptions {
    RunOptions {
        dry_run: args.dry_run,
        yes: args.yes,
        jobs: args.jobs,
    }
}

/// Turn a partial failure into a non-zero exit
fn check(result: &ApplyResult) -> Result<()> {
    let summary = result.summary();
    if summary.is_success() {
        return Ok(());
    }
    bail!(
        "{} of {} operations did not complete",
        summary.failed + summary.blocked + summary.cancelled,
        summary.total()
    )
}
