//! Plan display - strata-specific UI

use crate::ui;
use colored::Colorize;
use declarative::{AttributeChange, DiffSummary, Plan, group_by_type};
use serde_json::Value;
use similar::{ChangeTag, TextDiff};

const VALUE_WIDTH: usize = 60;

/// Display a plan grouped by resource type
pub fn display_plan(plan: &Plan, show_unchanged: bool) {
    let summary = plan.summary();
    if !summary.has_changes() && !show_unchanged {
        println!();
        println!("  {} No changes needed", "✓".green());
        return;
    }

    println!();
    println!("┌─ {} ─────────────────────────────────────────┐", "Plan".bold());
    println!("│");

    for (resource_type, ops) in group_by_type(&plan.operations) {
        let visible: Vec<_> = ops
            .into_iter()
            .filter(|op| show_unchanged || op.kind.is_change())
            .collect();
        if visible.is_empty() {
            continue;
        }

        println!("│ {}", resource_type.bold());
        for op in visible {
            println!(
                "│   {} {:<30} {}",
                ui::kind_symbol(op.kind, op.replacement),
                op.node_id,
                format!("({})", op.reason).dimmed()
            );
            if let Some(diff) = &op.diff {
                for change in &diff.changes {
                    display_change(change);
                }
            }
        }
        println!("│");
    }

    println!("├─────────────────────────────────────────────────────┤");
    println!("│ {}", summary_line(&summary));
    println!("└─────────────────────────────────────────────────────┘");
}

fn display_change(change: &AttributeChange) {
    let before = change.before.as_ref().map(render);
    let after = change.after.as_ref().map(render);

    match (before, after) {
        (None, Some(after)) => println!(
            "│       {} {} = {}",
            "+".green(),
            change.key,
            ui::truncate(&after, VALUE_WIDTH).green()
        ),
        (Some(before), None) => println!(
            "│       {} {} = {}",
            "-".red(),
            change.key,
            ui::truncate(&before, VALUE_WIDTH).red()
        ),
        (Some(before), Some(after)) if !before.contains('\n') && !after.contains('\n') => {
            println!(
                "│       {} {}: {} → {}",
                "~".yellow(),
                change.key,
                ui::truncate(&before, VALUE_WIDTH).red(),
                ui::truncate(&after, VALUE_WIDTH).green()
            );
        }
        (Some(before), Some(after)) => {
            println!("│       {} {}:", "~".yellow(), change.key);
            let diff = TextDiff::from_lines(&before, &after);
            for line in diff.iter_all_changes() {
                let text = line.to_string_lossy();
                let text = text.trim_end_matches('\n');
                match line.tag() {
                    ChangeTag::Delete => println!("│         {}", format!("- {text}").red()),
                    ChangeTag::Insert => println!("│         {}", format!("+ {text}").green()),
                    ChangeTag::Equal => println!("│           {}", text.dimmed()),
                }
            }
        }
        (None, None) => {}
    }
}

/// Strings print raw, structured values pretty-printed over several lines
fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(_) | Value::Object(_) => {
            serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
        }
        other => other.to_string(),
    }
}

/// One-line plan summary, e.g. "Plan: 2 to create, 0 to update, 1 to delete, 3 unchanged"
pub fn summary_line(summary: &DiffSummary) -> String {
    let mut line = format!(
        "Plan: {} to create, {} to update, {} to delete, {} unchanged",
        summary.creates.to_string().green(),
        summary.updates.to_string().yellow(),
        summary.deletes.to_string().red(),
        summary.unchanged
    );
    if summary.replacements > 0 {
        line.push_str(&format!(" ({} replaced)", summary.replacements));
    }
    line
}
