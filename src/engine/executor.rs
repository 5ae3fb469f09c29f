//! Apply flow - strata-specific executor with UI integration

use anyhow::Result;
use colored::Colorize;
use dialoguer::Confirm;

use crate::Context;
use crate::config::EngineSettings;
use crate::progress::BarProgress;
use crate::providers;
use declarative::{
    ApplyResult, CancellationToken, ConfirmCallback, Convergence, ExecuteOptions, Executor, Graph,
    Plan, StateStore,
};

use super::differ::display_plan;

/// Options for an apply run (includes `yes` for confirmation skip)
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Don't make changes, just show what would happen
    pub dry_run: bool,
    /// Skip confirmation prompts
    pub yes: bool,
    /// Override the stack's parallelism
    pub jobs: Option<usize>,
}

/// Shows the plan, then asks before anything changes
struct PromptConfirm {
    yes: bool,
    show_unchanged: bool,
    cancel: CancellationToken,
}

impl ConfirmCallback for PromptConfirm {
    fn confirm(&mut self, plan: &Plan) -> Result<bool> {
        display_plan(plan, self.show_unchanged);

        let confirmed = self.yes || {
            println!();
            Confirm::new()
                .with_prompt("Continue?")
                .default(true)
                .interact()
                .map_err(|e| std::io::Error::other(e.to_string()))?
        };
        // Past the prompt, Ctrl-C stops the run instead of the process
        if confirmed {
            cancel_on_interrupt(self.cancel.clone());
        }
        Ok(confirmed)
    }
}

/// Cancel `token` on the first Ctrl-C and exit on the second.
fn cancel_on_interrupt(token: CancellationToken) {
    let spawned = std::thread::Builder::new()
        .name("ctrl-c".into())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    log::warn!("Ctrl-C handling unavailable: {e}");
                    return;
                }
            };
            runtime.block_on(async {
                if tokio::signal::ctrl_c().await.is_err() {
                    return;
                }
                eprintln!();
                eprintln!(
                    "  {} Interrupted - waiting for running operations (Ctrl-C again to quit)",
                    "⊘".yellow()
                );
                token.cancel();
                if tokio::signal::ctrl_c().await.is_ok() {
                    std::process::exit(130);
                }
            });
        });
    if let Err(e) = spawned {
        log::warn!("Ctrl-C handling unavailable: {e}");
    }
}

/// Plan `graph` against `store`, confirm, and apply.
///
/// Returns `None` when nothing was applied (dry run or declined).
pub fn converge(
    ctx: &Context,
    graph: &Graph,
    store: &dyn StateStore,
    engine: &EngineSettings,
    opts: &RunOptions,
) -> Result<Option<ApplyResult>> {
    let registry = providers::registry();
    let options = ExecuteOptions {
        dry_run: opts.dry_run,
        parallelism: opts.jobs.unwrap_or(engine.parallelism).max(1),
        retry: engine.retry(),
    };
    let cancel = CancellationToken::new();
    let executor = Executor::new(&registry, store)
        .options(options)
        .cancellation(cancel.clone());

    let mut progress = BarProgress::new(ctx.quiet);
    let mut confirm = PromptConfirm {
        yes: opts.yes,
        show_unchanged: ctx.verbose > 0,
        cancel,
    };

    match executor.converge(graph, &mut progress, &mut confirm)? {
        Convergence::Planned(plan) => {
            display_plan(&plan, ctx.verbose > 0);
            println!();
            println!("  {} Dry run - no changes made", "ℹ".blue());
            Ok(None)
        }
        Convergence::Declined(_) => {
            println!();
            println!("  {} Aborted", "✗".red());
            Ok(None)
        }
        Convergence::Applied { result, .. } => {
            print_summary(&result);
            Ok(Some(result))
        }
    }
}

/// Print final summary
fn print_summary(result: &ApplyResult) {
    let summary = result.summary();

    println!();
    if !summary.is_success() {
        println!("  {} Apply finished with errors", "⚠".yellow().bold());
    } else if summary.total_changes() == 0 {
        println!("  {} No changes needed", "✓".green().bold());
        return;
    } else {
        println!("  {} Stack applied successfully!", "✓".green().bold());
    }

    if summary.created > 0 {
        println!("    • {} resources created", summary.created);
    }
    if summary.updated > 0 {
        println!("    • {} resources updated", summary.updated);
    }
    if summary.deleted > 0 {
        println!("    • {} resources deleted", summary.deleted);
    }
    if summary.unchanged > 0 {
        println!("    • {} resources unchanged", summary.unchanged);
    }
    if summary.failed > 0 {
        println!("    • {} {} failed", summary.failed, "resources".red());
    }
    if summary.blocked > 0 {
        println!("    • {} resources blocked by failures", summary.blocked);
    }
    if summary.cancelled > 0 {
        println!("    • {} resources cancelled", summary.cancelled);
    }

    for chain in result.failures() {
        println!();
        println!("  {} {}: {}", "✗".red(), chain.origin.bold(), chain.error);
        if !chain.blocked.is_empty() {
            println!("    {} {}", "blocked:".dimmed(), chain.blocked.join(", "));
        }
    }
}
