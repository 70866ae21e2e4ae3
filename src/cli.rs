use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;

#[derive(Parser)]
#[command(name = "kaginawa-stack")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Declare the Kaginawa infrastructure and synthesize a CloudFormation template")]
#[command(long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Synthesize the stack into a template
    Synth(SynthArgs),

    /// List declared resources in emission order
    List(ListArgs),

    /// Compare the synthesized template with a previous one
    Diff(DiffArgs),

    /// Print the dependency graph in Graphviz DOT form
    Graph(GraphArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Shared stack options
// ============================================================================

#[derive(Args, Debug, Clone)]
pub struct StackArgs {
    /// Dotenv file to read configuration from
    #[arg(long, env = "KAGINAWA_ENV_FILE", default_value = ".env")]
    pub env_file: String,

    /// Read configuration from the process environment only
    #[arg(long)]
    pub no_env_file: bool,

    /// Fail when the domain or OAuth settings are empty
    #[arg(long)]
    pub strict: bool,

    /// Name of the synthesized stack
    #[arg(long, default_value = crate::builder::DEFAULT_STACK_NAME)]
    pub stack_name: String,
}

// ============================================================================
// Command arguments
// ============================================================================

#[derive(Args)]
pub struct SynthArgs {
    #[command(flatten)]
    pub stack: StackArgs,

    /// Write the template to a file instead of stdout
    #[arg(short, long)]
    pub output: Option<String>,
}

#[derive(Args)]
pub struct ListArgs {
    #[command(flatten)]
    pub stack: StackArgs,

    /// Filter: a type alias (network, instances, tables, service, iam, scaling),
    /// a resource type, or alias.name
    pub target: Option<String>,
}

#[derive(Args)]
pub struct DiffArgs {
    #[command(flatten)]
    pub stack: StackArgs,

    /// Previously synthesized template to compare against
    #[arg(short, long)]
    pub against: String,

    /// Show a line diff of each modified resource
    #[arg(short, long)]
    pub detail: bool,
}

#[derive(Args)]
pub struct GraphArgs {
    #[command(flatten)]
    pub stack: StackArgs,
}
