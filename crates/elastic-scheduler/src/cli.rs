//! Command-line argument parsing with clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::LogFormat;
use crate::output::Format;

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/elastic-scheduler/config.toml";

/// Elastic scaling scheduler.
#[derive(Parser, Debug, Clone)]
#[command(name = "elastic-scheduler")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the TOML config file.
    #[arg(short, long, global = true, env = "ELASTIC_SCHEDULER_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Output format.
    #[arg(short, long, global = true, value_enum, default_value_t = Format::Table)]
    pub format: Format,

    /// Log format, overriding the config file.
    #[arg(long, global = true, value_enum, env = "ELASTIC_SCHEDULER_LOG_FORMAT")]
    pub log_format: Option<LogFormat>,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Evaluate strategies every tick until interrupted.
    Run,

    /// Run a single evaluation pass and print the outcome.
    Tick,

    /// Show the execution history, newest first.
    History {
        /// Only rows for this strategy.
        #[arg(long)]
        strategy: Option<u64>,

        /// Maximum rows to show.
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },

    /// Write a default config file.
    InitConfig {
        /// Path to write config.
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        output: PathBuf,

        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}
