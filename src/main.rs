mod cli;
mod commands;
mod config;
mod engine;
mod progress;
mod providers;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use std::io;
use std::path::PathBuf;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    /// Stack file
    pub file: PathBuf,
    /// State directory override
    pub state_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        file: cli.file,
        state_dir: cli.state_dir,
    };

    match cli.command {
        Command::Plan(args) => commands::plan::run(&ctx, &args),
        Command::Apply(args) => commands::apply::apply(&ctx, &args),
        Command::Destroy(args) => commands::apply::destroy(&ctx, &args),
        Command::Graph { dot } => commands::graph::run(&ctx, dot),
        Command::Outputs(args) => commands::outputs::run(&ctx, &args),
        Command::State(cmd) => commands::state::run(&ctx, cmd),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "strata", &mut io::stdout());
            Ok(())
        }
    }
}
