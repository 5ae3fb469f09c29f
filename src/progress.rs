//! Progress display for apply runs

use crate::ui;
use colored::Colorize;
use declarative::{Operation, OperationReport, ProgressCallback, ProviderError};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

const TEMPLATE: &str = "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}";

/// Progress bar with one line per finished change
pub struct BarProgress {
    bar: ProgressBar,
    quiet: bool,
}

impl BarProgress {
    pub fn new(quiet: bool) -> Self {
        Self {
            bar: ProgressBar::hidden(),
            quiet,
        }
    }

    fn print(&self, line: &str) {
        if !self.quiet {
            self.bar.suspend(|| println!("{line}"));
        }
    }
}

impl ProgressCallback for BarProgress {
    fn on_run_start(&mut self, total: usize) {
        if self.quiet {
            return;
        }
        let bar = ProgressBar::new(total as u64);
        let style = ProgressStyle::default_bar()
            .template(TEMPLATE)
            .map_or_else(|_| ProgressStyle::default_bar(), |s| s.progress_chars("=>-"));
        bar.set_style(style);
        bar.enable_steady_tick(Duration::from_millis(120));
        self.bar = bar;
    }

    fn on_operation_start(&mut self, operation: &Operation) {
        self.bar
            .set_message(format!("{} {}", operation.kind, operation.node_id));
    }

    fn on_retry(&mut self, node_id: &str, attempt: u32, error: &ProviderError, delay: Duration) {
        self.print(&format!(
            "  {} {} attempt {} failed: {} (retrying in {:.1}s)",
            "↻".yellow(),
            node_id,
            attempt,
            error,
            delay.as_secs_f64()
        ));
    }

    fn on_operation_complete(&mut self, report: &OperationReport) {
        self.bar.inc(1);
        // Unchanged resources only move the bar
        if report.is_success() && !report.is_change() {
            return;
        }
        let detail = match (&report.error, report.attempts) {
            (Some(error), _) => format!(" ({})", error.red()),
            (None, n) if n > 1 => format!(" ({n} attempts)").dimmed().to_string(),
            (None, _) => String::new(),
        };
        self.print(&format!(
            "  {} {} {}{}",
            ui::status_symbol(report.status),
            report.kind,
            report.node_id,
            detail
        ));
    }

    fn on_run_complete(&mut self) {
        self.bar.finish_and_clear();
    }
}
