//! Inspect and edit recorded state

use anyhow::{Context as _, Result, bail};
use chrono::Local;
use colored::Colorize;
use declarative::{FileStateStore, StateStore};
use dialoguer::Confirm;

use super::load_stack;
use crate::Context;
use crate::cli::StateCommand;
use crate::ui;

pub fn run(ctx: &Context, cmd: StateCommand) -> Result<()> {
    let store = open_store(ctx)?;
    match cmd {
        StateCommand::List => list(&store),
        StateCommand::Show { id } => show(&store, &id),
        StateCommand::Rm { id, yes } => rm(&store, &id, yes),
    }
}

/// `--state-dir` works without a stack file
fn open_store(ctx: &Context) -> Result<FileStateStore> {
    if let Some(dir) = &ctx.state_dir {
        return Ok(FileStateStore::new(dir));
    }
    let stack = load_stack(ctx)?;
    Ok(stack.state_store(None))
}

fn list(store: &FileStateStore) -> Result<()> {
    let records = store.load()?;
    if records.is_empty() {
        ui::info(&format!("No state recorded in {}", store.dir().display()));
        return Ok(());
    }

    ui::header(&format!("State ({} resources)", records.len()));
    for record in records.values() {
        let applied = record
            .applied_at
            .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:<28} {:<20} {:>4} {}",
            record.node_id.bold(),
            record.resource_type,
            format!("v{}", record.version),
            applied.dimmed()
        );
    }
    Ok(())
}

fn show(store: &FileStateStore, id: &str) -> Result<()> {
    let records = store.load()?;
    let record = records
        .get(id)
        .with_context(|| format!("No state recorded for '{id}'"))?;
    println!("{}", serde_json::to_string_pretty(record)?);
    Ok(())
}

fn rm(store: &FileStateStore, id: &str, yes: bool) -> Result<()> {
    let records = store.load()?;
    if !records.contains_key(id) {
        bail!("No state recorded for '{id}'");
    }

    ui::warn(&format!(
        "Forgetting '{id}' leaves the real resource in place; the next apply will create it again"
    ));
    if !yes {
        let confirmed = Confirm::new()
            .with_prompt("Continue?")
            .default(false)
            .interact()?;
        if !confirmed {
            println!("  {} Aborted", "✗".red());
            return Ok(());
        }
    }

    store.delete(id)?;
    ui::success(&format!("Removed '{id}' from state"));
    Ok(())
}
