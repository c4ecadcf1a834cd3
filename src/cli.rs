use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "groundwork")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Declarative infrastructure provisioning", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Stack file declaring the resources
    #[arg(
        short,
        long,
        global = true,
        env = "GROUNDWORK_FILE",
        default_value = "groundwork.toml"
    )]
    pub file: PathBuf,

    /// State file (overrides engine.state_path)
    #[arg(long, global = true, env = "GROUNDWORK_STATE")]
    pub state: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Check the stack file and its dependency graph
    Validate,

    /// Show what apply would change
    Plan(PlanArgs),

    /// Create, update and replace resources to match the stack file
    Apply(ApplyArgs),

    /// Delete every resource recorded in state
    Destroy(DestroyArgs),

    /// Print stack outputs from state
    Output(OutputArgs),

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

// ============================================================================
// Plan / Apply / Destroy
// ============================================================================

#[derive(Parser)]
pub struct PlanArgs {
    /// Allow replacing resources that are still referenced
    #[arg(long)]
    pub allow_replace: bool,

    /// Print the change set as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser)]
pub struct ApplyArgs {
    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Dry run - show the plan without applying it
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Maximum number of concurrent provider calls (overrides engine.jobs)
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Allow replacing resources that are still referenced
    #[arg(long)]
    pub allow_replace: bool,
}

#[derive(Parser)]
pub struct DestroyArgs {
    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Dry run - show what would be deleted
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Maximum number of concurrent provider calls (overrides engine.jobs)
    #[arg(short, long)]
    pub jobs: Option<usize>,
}

// ============================================================================
// Output / State
// ============================================================================

#[derive(Parser)]
pub struct OutputArgs {
    /// Print a single output value
    pub name: Option<String>,

    /// Print outputs as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum StateCommand {
    /// List recorded resources
    List,

    /// Show the record of one resource
    Show {
        /// Resource name
        id: String,
    },
}
