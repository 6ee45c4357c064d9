//! CLI command definitions.

use clap::{Args, Subcommand};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Run a pipeline job on this machine
    Run(JobArgs),

    /// Print the resolved commands without running them
    Plan(JobArgs),

    /// Validate a pipeline definition
    Validate {
        /// Path to pipeline file (the built-in definition if omitted)
        path: Option<PathBuf>,
    },

    /// Check whether a push to a branch would start the pipeline
    Trigger {
        /// Branch name
        #[arg(short, long)]
        branch: String,

        /// Path to pipeline file
        #[arg(short, long)]
        pipeline: Option<PathBuf>,
    },

    /// Write the built-in pipeline definition to a file
    Init {
        /// Destination
        #[arg(default_value = "relstat.yaml")]
        path: PathBuf,

        /// Overwrite without asking
        #[arg(short, long)]
        force: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

/// Options shared by `run` and `plan`.
#[derive(Args, Debug, Clone, Default)]
pub struct JobArgs {
    /// Path to pipeline file
    #[arg(short, long)]
    pub pipeline: Option<PathBuf>,

    /// Job to run (required when the pipeline has several)
    #[arg(short, long)]
    pub job: Option<String>,

    /// Sources directory (defaults to the current directory)
    #[arg(short, long)]
    pub sources_dir: Option<PathBuf>,

    /// Input value, e.g. `--var REPO=https://...`
    #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_var)]
    pub vars: Vec<(String, String)>,

    /// JSON file of input values
    #[arg(long)]
    pub secrets_file: Option<PathBuf>,

    /// dotenv file of input values
    #[arg(long)]
    pub env_file: Option<PathBuf>,

    /// Read inputs from `<PREFIX>_<NAME>` environment variables
    #[arg(long)]
    pub env_prefix: Option<String>,

    /// Tool cache directory for runtimes
    #[arg(long)]
    pub tool_cache: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Set configuration value
    Set {
        /// Key
        key: String,

        /// Value
        value: String,
    },
}

pub fn parse_var(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got `{}`", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty variable name in `{}`", raw));
    }
    Ok((key.to_string(), value.to_string()))
}
