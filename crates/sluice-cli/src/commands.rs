//! CLI command definitions.

use crate::config::OutputFormat;
use clap::{Args, Subcommand, ValueEnum};
use sluice_core::change::RunType;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Validate a pipeline configuration
    Validate {
        /// Path to pipeline file
        #[arg(default_value = "sluice.yaml")]
        path: PathBuf,
    },

    /// Show which jobs a change set would run, without running them
    Plan {
        #[command(flatten)]
        trigger: TriggerArgs,

        /// Output format
        #[arg(short, long, value_enum)]
        format: Option<OutputFormat>,
    },

    /// Run the pipeline for a change set
    Run {
        #[command(flatten)]
        trigger: TriggerArgs,

        /// Workspace the steps run in
        #[arg(short, long, default_value = ".")]
        workspace: PathBuf,

        /// Cache metadata directory
        #[arg(long)]
        cache_dir: Option<PathBuf>,

        /// Disable caching
        #[arg(long, conflicts_with = "cache_dir")]
        no_cache: bool,

        /// Concurrency group; a newer run in the group supersedes this one
        #[arg(long)]
        group: Option<String>,

        /// Output format
        #[arg(short, long, value_enum)]
        format: Option<OutputFormat>,
    },

    /// Compute the cache key for a namespace and its input files
    CacheKey {
        /// Cache namespace
        namespace: String,

        /// Input files, in order
        #[arg(required = true)]
        files: Vec<String>,

        /// Opaque runner context mixed into the key
        #[arg(long, default_value = "")]
        context: String,

        /// Directory the input paths are relative to
        #[arg(short, long, default_value = ".")]
        workspace: PathBuf,
    },

    /// Manage cache metadata
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },

    /// Print the JSON schema of the pipeline configuration
    Schema,

    /// Manage CLI configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

/// Pipeline file and the event that triggers a run.
#[derive(Args, Debug, Clone)]
pub struct TriggerArgs {
    /// Path to pipeline file
    #[arg(short, long, default_value = "sluice.yaml")]
    pub config: PathBuf,

    /// Changed path (repeatable)
    #[arg(long = "changed", value_name = "PATH")]
    pub changed: Vec<String>,

    /// File listing changed paths, one per line (e.g. `git diff --name-only`)
    #[arg(long, value_name = "FILE")]
    pub changed_from: Option<PathBuf>,

    /// Kind of event that started the run
    #[arg(long, value_enum, default_value_t = RunTypeArg::Push)]
    pub run_type: RunTypeArg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RunTypeArg {
    Push,
    PullRequest,
    Scheduled,
}

impl From<RunTypeArg> for RunType {
    fn from(arg: RunTypeArg) -> Self {
        match arg {
            RunTypeArg::Push => RunType::Push,
            RunTypeArg::PullRequest => RunType::PullRequest,
            RunTypeArg::Scheduled => RunType::Scheduled,
        }
    }
}

#[derive(Subcommand)]
pub enum CacheCommands {
    /// List cache entries
    List {
        /// Cache key prefix
        #[arg(short, long, default_value = "")]
        prefix: String,

        /// Cache metadata directory
        #[arg(long)]
        cache_dir: Option<PathBuf>,
    },

    /// Clear cache entries
    Clear {
        /// Cache key prefix
        #[arg(short, long, default_value = "")]
        prefix: String,

        /// Cache metadata directory
        #[arg(long)]
        cache_dir: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show configuration
    Show,

    /// Set a configuration value
    Set {
        /// Configuration key
        key: String,

        /// Configuration value
        value: String,
    },
}
