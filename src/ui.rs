use colored::{ColoredString, Colorize};
use declarative::{NodeStatus, OperationKind};
use serde_json::Value;

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// Plan symbol for an operation
pub fn kind_symbol(kind: OperationKind, replacement: bool) -> ColoredString {
    match (kind, replacement) {
        (OperationKind::Create, true) => "±".magenta(),
        (OperationKind::Delete, true) => "±".magenta(),
        (OperationKind::Create, false) => "+".green(),
        (OperationKind::Update, _) => "~".yellow(),
        (OperationKind::Delete, false) => "-".red(),
        (OperationKind::NoOp, _) => "○".dimmed(),
    }
}

/// Result symbol for a finished operation
pub fn status_symbol(status: NodeStatus) -> ColoredString {
    match status {
        NodeStatus::Applied => "✓".green(),
        NodeStatus::Failed => "✗".red(),
        NodeStatus::Cancelled => "⊘".yellow(),
        NodeStatus::Pending | NodeStatus::Planned | NodeStatus::Applying => "…".dimmed(),
    }
}

/// Render a JSON value compactly, strings without quotes
pub fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Truncate a string for display, keeping the start
pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else if max_chars <= 3 {
        "...".to_string()
    } else {
        let kept: String = text.chars().take(max_chars - 3).collect();
        format!("{kept}...")
    }
}

// ============================================================================
// Tests
// ============================================================================
