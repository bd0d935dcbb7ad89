//! CLI command definitions and dispatch.

pub mod config;
pub mod jobs;

use clap::{Parser, Subcommand};

use crate::output::OutputFormat;
use jobhub_core::config::AppConfig;
use jobhub_core::error::AppError;

/// JobHub: inspect persisted background job state
#[derive(Debug, Parser)]
#[command(name = "jobhub", version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/default.toml")]
    pub config: String,

    /// Configuration environment overlay (`config/{env}.toml`)
    #[arg(short, long, env = "JOBHUB_ENV", default_value = "development")]
    pub env: String,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Inspect persisted jobs
    Jobs(jobs::JobsArgs),
    /// Configuration management
    Config(config::ConfigArgs),
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(&self) -> Result<(), AppError> {
        let config = load_config(&self.config, &self.env)?;
        match &self.command {
            Commands::Jobs(args) => jobs::execute(args, &config, self.format).await,
            Commands::Config(args) => config::execute(args, &config, &self.config, self.format),
        }
    }
}

/// Helper: load configuration from file
pub fn load_config(config_path: &str, env: &str) -> Result<AppConfig, AppError> {
    AppConfig::load(config_path, env)
}
