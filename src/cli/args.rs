//! CLI argument definitions using clap derive

use crate::pointer::Pointer;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// lfx - content-addressed cache for large binary artifacts
///
/// Resolves pointer files to local content through a tiered cache:
/// expanded content, local archives, an optional read-only mirror, and
/// finally the network.
#[derive(Parser, Debug)]
#[command(name = "lfx")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "LFX_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Materialize the content behind pointer files
    Fetch(FetchArgs),

    /// Inspect or create pointer files
    Pointer(PointerArgs),

    /// Estimate the work needed to fetch pointer files
    Effort(EffortArgs),

    /// Inspect and maintain the cache directories
    Cache(CacheArgs),

    /// Show or initialize configuration
    Config(ConfigArgs),
}

/// Output format for reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    Table,
    /// JSON output
    Json,
}

/// Arguments for the fetch command
#[derive(Parser, Debug)]
pub struct FetchArgs {
    /// Pointer files to resolve
    #[arg(required_unless_present = "url")]
    pub files: Vec<PathBuf>,

    /// Fetch a URL directly instead of reading pointer files
    #[arg(long, conflicts_with = "files")]
    pub url: Option<String>,

    /// How to expand a directly fetched URL
    #[arg(long = "type", value_enum, default_value = "file")]
    pub kind: PointerKind,

    /// Arguments for self-extracting executables ({0} is the target dir)
    #[arg(long, requires = "url")]
    pub args: Option<String>,

    /// Path inside an expanded zip archive
    #[arg(long, requires = "url")]
    pub hint: Option<String>,

    /// Print only the resolved paths, one per line
    #[arg(long)]
    pub print_path: bool,
}

/// Pointer kinds accepted on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PointerKind {
    File,
    Zip,
    Exe,
    Nuget,
}

/// Build a pointer from command-line pieces
pub fn build_pointer(
    url: &str,
    kind: PointerKind,
    args: Option<&str>,
    hint: Option<&str>,
) -> Pointer {
    match (kind, hint) {
        (PointerKind::Zip, Some(hint)) => Pointer::archive(url, hint),
        (PointerKind::Zip, None) => Pointer::zip(url),
        (PointerKind::File, _) => Pointer::file(url),
        (PointerKind::Nuget, _) => Pointer::nuget(url),
        (PointerKind::Exe, _) => Pointer::exe(url, args.unwrap_or("{0}")),
    }
}

/// Arguments for the pointer command
#[derive(Parser, Debug)]
pub struct PointerArgs {
    #[command(subcommand)]
    pub action: PointerAction,
}

/// Pointer subcommands
#[derive(Subcommand, Debug)]
pub enum PointerAction {
    /// Parse a pointer file and show its fields
    Show {
        /// Pointer file
        file: PathBuf,

        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Download a URL and write a pointer recording its hash and size
    Create {
        /// URL of the artifact
        url: String,

        /// How the artifact is expanded
        #[arg(long = "type", value_enum, default_value = "file")]
        kind: PointerKind,

        /// Arguments for self-extracting executables ({0} is the target dir)
        #[arg(long)]
        args: Option<String>,

        /// Path inside an expanded zip archive
        #[arg(long)]
        hint: Option<String>,

        /// Write the pointer here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Arguments for the effort command
#[derive(Parser, Debug)]
pub struct EffortArgs {
    /// Pointer files to estimate
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the cache command
#[derive(Parser, Debug)]
pub struct CacheArgs {
    /// Subcommand for cache
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Show every store with its size and the recorded infos
    Dump {
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Remove staging directories left by crashed runs
    Clean,

    /// Delete everything in the writable stores
    Clear {
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show effective configuration and cache directories
    Show,

    /// Show configuration file path
    Path,

    /// Write the default configuration file
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}
