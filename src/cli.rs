use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "defuse-viz")]
#[command(about = "Map global definition-use chains of compiled Java classes back to source lines")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Raise log verbosity (-v debug, -vv trace). DEFUSE_VIZ_LOG overrides.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Print the project explorer tree.
    Tree {
        #[command(flatten)]
        project: ProjectArgs,
    },
    /// Print one row per global def-use chain.
    Chains {
        #[command(flatten)]
        project: ProjectArgs,
    },
}

#[derive(Debug, Clone, Args)]
pub struct ProjectArgs {
    /// Project root; defaults to the current directory.
    #[arg(value_name = "ROOT")]
    pub root: Option<PathBuf>,

    /// Class output directory, absolute or relative to ROOT (repeatable).
    #[arg(short = 'c', long = "classes", value_name = "DIR")]
    pub classes: Vec<PathBuf>,

    /// Source directory, absolute or relative to ROOT (repeatable).
    #[arg(short = 's', long = "sources", value_name = "DIR")]
    pub sources: Vec<PathBuf>,

    /// File-name glob of files to visit (repeatable).
    #[arg(long, value_name = "GLOB")]
    pub include: Vec<String>,

    /// File or directory name glob to skip (repeatable).
    #[arg(long, value_name = "GLOB")]
    pub exclude: Vec<String>,

    /// Group classes under their declared source file.
    #[arg(long)]
    pub group_by_source: bool,

    #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}
