//! Persisted job inspection commands.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};
use serde::Serialize;
use tabled::Tabled;

use crate::output::{self, OutputFormat};
use jobhub_core::config::AppConfig;
use jobhub_core::error::AppError;
use jobhub_entity::job::{JobStatus, PersistedJob};
use jobhub_worker::persistence;

/// Arguments for jobs commands
#[derive(Debug, Args)]
pub struct JobsArgs {
    /// Jobs subcommand
    #[command(subcommand)]
    pub command: JobsCommand,
}

/// Jobs subcommands
#[derive(Debug, Subcommand)]
pub enum JobsCommand {
    /// List persisted jobs
    List {
        /// Only show jobs with this status
        #[arg(short, long)]
        status: Option<JobStatus>,
    },
    /// Show one job in full
    Show {
        /// Job identifier
        id: String,
    },
    /// Job counts per status
    Stats,
    /// Jobs left pending, which require a manual restart
    Pending,
}

/// One table row per job
#[derive(Debug, Tabled)]
struct JobRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Status")]
    status: JobStatus,
    #[tabled(rename = "Priority")]
    priority: i32,
    #[tabled(rename = "Retries")]
    retries: String,
    #[tabled(rename = "Work item")]
    work_item: String,
    #[tabled(rename = "Created")]
    created_at: String,
    #[tabled(rename = "Finished")]
    completed_at: String,
}

impl From<&PersistedJob> for JobRow {
    fn from(job: &PersistedJob) -> Self {
        Self {
            id: job.id.clone(),
            status: job.status,
            priority: job.priority,
            retries: format!("{}/{}", job.retry_count, job.max_retries),
            work_item: job.work_item_description.clone(),
            created_at: format_time(Some(job.created_at)),
            completed_at: format_time(job.completed_at),
        }
    }
}

/// Counts per status as printed by `jobs stats`
#[derive(Debug, Serialize)]
struct PersistedStats {
    total: usize,
    by_status: BTreeMap<JobStatus, usize>,
}

fn format_time(at: Option<DateTime<Utc>>) -> String {
    at.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn stats(jobs: &[PersistedJob]) -> PersistedStats {
    let mut by_status: BTreeMap<JobStatus, usize> =
        JobStatus::ALL.into_iter().map(|status| (status, 0)).collect();
    for job in jobs {
        *by_status.entry(job.status).or_default() += 1;
    }
    PersistedStats {
        total: jobs.len(),
        by_status,
    }
}

fn filter_status(jobs: Vec<PersistedJob>, status: Option<JobStatus>) -> Vec<PersistedJob> {
    jobs.into_iter()
        .filter(|job| status.is_none_or(|s| job.status == s))
        .collect()
}

/// Execute jobs commands
pub async fn execute(
    args: &JobsArgs,
    config: &AppConfig,
    format: OutputFormat,
) -> Result<(), AppError> {
    if !config.persistence.enabled {
        output::print_warning("Persistence is disabled; there is no job state to inspect");
        return Ok(());
    }

    let sink = persistence::from_config(&config.persistence);
    let mut jobs = sink
        .load()
        .await
        .map_err(|e| AppError::storage(format!("Failed to read '{}': {}", config.persistence.path, e)))?;
    jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

    match &args.command {
        JobsCommand::List { status } => {
            let jobs = filter_status(jobs, *status);
            let rows: Vec<JobRow> = jobs.iter().map(JobRow::from).collect();
            output::print_list(&rows, &jobs, format);
        }
        JobsCommand::Show { id } => {
            let job = jobs
                .iter()
                .find(|job| &job.id == id)
                .ok_or_else(|| AppError::not_found(format!("Job '{}' not found", id)))?;
            match format {
                OutputFormat::Json => output::print_json(job, "{}"),
                OutputFormat::Table => print_job(job),
            }
        }
        JobsCommand::Stats => {
            let stats = stats(&jobs);
            match format {
                OutputFormat::Json => output::print_json(&stats, "{}"),
                OutputFormat::Table => {
                    println!("Persisted Job Status:");
                    output::print_kv("Total", &stats.total.to_string());
                    for (status, count) in &stats.by_status {
                        output::print_kv(status.as_str(), &count.to_string());
                    }
                }
            }
        }
        JobsCommand::Pending => {
            let pending = filter_status(jobs, Some(JobStatus::Pending));
            if !pending.is_empty() && format == OutputFormat::Table {
                output::print_warning(&format!(
                    "{} job(s) were left pending and require a manual restart",
                    pending.len()
                ));
            }
            let rows: Vec<JobRow> = pending.iter().map(JobRow::from).collect();
            output::print_list(&rows, &pending, format);
        }
    }

    Ok(())
}

fn print_job(job: &PersistedJob) {
    let json = |value: &serde_json::Value| value.to_string();
    println!("Job {}:", job.id);
    output::print_kv("Status", job.status.as_str());
    output::print_kv("Work item", &job.work_item_description);
    output::print_kv(
        "Args",
        &json(&serde_json::Value::Array(job.args.clone())),
    );
    output::print_kv(
        "Kwargs",
        &json(&serde_json::Value::Object(job.kwargs.clone())),
    );
    output::print_kv("Priority", &job.priority.to_string());
    output::print_kv(
        "Retries",
        &format!("{}/{}", job.retry_count, job.max_retries),
    );
    output::print_kv("Created", &format_time(Some(job.created_at)));
    output::print_kv("Eligible", &format_time(job.eligible_at));
    output::print_kv("Started", &format_time(job.started_at));
    output::print_kv("Finished", &format_time(job.completed_at));
    output::print_kv("Error", job.error.as_deref().unwrap_or("-"));
    output::print_kv(
        "Result",
        &job.result.as_ref().map(json).unwrap_or_else(|| "-".to_string()),
    );
}

#[cfg(test)]
mod tests {
    use jobhub_entity::job::{JobArgs, JobRecord};

    use super::*;

    fn job(id: &str, status: JobStatus) -> PersistedJob {
        let mut job = PersistedJob::from(&JobRecord::new(
            id,
            "tests::noop",
            JobArgs::new(),
            Utc::now(),
        ));
        job.status = status;
        job
    }

    #[test]
    fn stats_include_every_status() {
        let jobs = vec![
            job("a", JobStatus::Completed),
            job("b", JobStatus::Completed),
            job("c", JobStatus::Pending),
        ];
        let stats = stats(&jobs);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_status[&JobStatus::Completed], 2);
        assert_eq!(stats.by_status[&JobStatus::Pending], 1);
        assert_eq!(stats.by_status[&JobStatus::Failed], 0);
    }

    #[test]
    fn filter_keeps_matching_status() {
        let jobs = vec![job("a", JobStatus::Failed), job("b", JobStatus::Pending)];
        let failed = filter_status(jobs.clone(), Some(JobStatus::Failed));
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, "a");
        assert_eq!(filter_status(jobs, None).len(), 2);
    }

    #[test]
    fn row_shows_retry_budget() {
        let mut persisted = job("a", JobStatus::Failed);
        persisted.retry_count = 2;
        let row = JobRow::from(&persisted);
        assert_eq!(row.retries, "2/3");
        assert_eq!(row.completed_at, "-");
    }
}
