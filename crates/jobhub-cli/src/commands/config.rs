//! Configuration CLI commands.

use clap::{Args, Subcommand};

use crate::output::{self, OutputFormat};
use jobhub_core::config::AppConfig;
use jobhub_core::error::AppError;

/// Arguments for config commands
#[derive(Debug, Args)]
pub struct ConfigArgs {
    /// Config subcommand
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Config subcommands
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show the effective configuration
    Show,
    /// Validate the configuration file
    Validate,
}

/// Execute config commands
pub fn execute(
    args: &ConfigArgs,
    config: &AppConfig,
    config_path: &str,
    format: OutputFormat,
) -> Result<(), AppError> {
    match &args.command {
        ConfigCommand::Show => match format {
            OutputFormat::Json => output::print_json(config, "{}"),
            OutputFormat::Table => {
                println!("Scheduler:");
                output::print_kv("Enabled", &config.scheduler.enabled.to_string());
                output::print_kv("Max workers", &config.scheduler.max_workers.to_string());
                output::print_kv(
                    "Poll interval",
                    &format!("{}ms", config.scheduler.poll_interval_ms),
                );
                output::print_kv(
                    "Shutdown timeout",
                    &format!("{}s", config.scheduler.shutdown_timeout_seconds),
                );
                output::print_kv(
                    "Default priority",
                    &config.scheduler.default_priority.to_string(),
                );
                output::print_kv(
                    "Default max retries",
                    &config.scheduler.default_max_retries.to_string(),
                );
                println!("Retry:");
                output::print_kv("Strategy", &format!("{:?}", config.retry.strategy));
                output::print_kv("Base delay", &format!("{}s", config.retry.base_delay_seconds));
                output::print_kv("Max delay", &format!("{}s", config.retry.max_delay_seconds));
                output::print_kv("Jitter", &config.retry.jitter.to_string());
                println!("Persistence:");
                output::print_kv("Enabled", &config.persistence.enabled.to_string());
                output::print_kv("Mode", &format!("{:?}", config.persistence.mode));
                output::print_kv("Path", &config.persistence.path);
                println!("Retention:");
                output::print_kv("Days", &config.retention.days.to_string());
                output::print_kv("Sweep", &config.retention.sweep_cron);
                println!("Logging:");
                output::print_kv("Level", &config.logging.level);
                output::print_kv("Format", &config.logging.format);
            }
        },
        ConfigCommand::Validate => {
            // Loading already ran validation.
            output::print_success(&format!("Configuration '{}' is valid", config_path));
            println!(
                "  Workers: {}, persistence: {}",
                config.scheduler.max_workers,
                if config.persistence.enabled {
                    config.persistence.path.as_str()
                } else {
                    "disabled"
                }
            );
        }
    }

    Ok(())
}
