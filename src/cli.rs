use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "strata")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(
    about = "Declare resources in a stack file, plan against state, converge",
    long_about = None
)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Stack file to operate on
    #[arg(
        short,
        long,
        env = "STRATA_STACK",
        default_value = "strata.toml",
        global = true
    )]
    pub file: PathBuf,

    /// Directory holding state records (overrides the stack's engine.state_dir)
    #[arg(long, env = "STRATA_STATE_DIR", global = true)]
    pub state_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show what apply would change
    Plan(PlanArgs),

    /// Create, update and delete resources until state matches the stack
    Apply(ApplyArgs),

    /// Delete every resource recorded in state
    Destroy(ApplyArgs),

    /// Show the dependency graph
    Graph {
        /// Emit Graphviz DOT instead of a listing
        #[arg(long)]
        dot: bool,
    },

    /// Show stack exports from the last apply
    Outputs(OutputsArgs),

    /// Inspect recorded state
    #[command(subcommand)]
    State(StateCommand),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Parser)]
pub struct PlanArgs {
    /// Include resources that are already up to date
    #[arg(short, long)]
    pub all: bool,

    /// Print operations as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser)]
pub struct ApplyArgs {
    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Dry run - show what would be done
    #[arg(short, long)]
    pub dry_run: bool,

    /// Number of operations applied in parallel
    #[arg(short, long)]
    pub jobs: Option<usize>,
}

#[derive(Parser)]
pub struct OutputsArgs {
    /// Print a single output's raw value
    pub name: Option<String>,

    /// Print outputs as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum StateCommand {
    /// List recorded resources
    List,

    /// Print one record as JSON
    Show {
        /// Resource id
        id: String,
    },

    /// Forget a resource without deleting it
    Rm {
        /// Resource id
        id: String,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}
