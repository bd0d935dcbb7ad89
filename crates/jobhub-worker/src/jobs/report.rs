//! Report generation work item.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing;

use jobhub_entity::job::JobArgs;

use crate::executor::{JobExecutionError, WorkItem};

use super::required_str;

/// Builds a report summary.
///
/// The first positional argument is the report type; keyword arguments are
/// carried into the summary as report parameters.
#[derive(Debug, Clone, Default)]
pub struct GenerateReport;

impl GenerateReport {
    /// Create a new report work item
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl WorkItem for GenerateReport {
    fn describe(&self) -> String {
        "jobs::generate_report".to_string()
    }

    async fn execute(&self, args: &JobArgs) -> Result<Option<Value>, JobExecutionError> {
        let report_type = required_str(args.positional(0), "report_type")?;
        tracing::info!(report_type, "Generating report");

        Ok(Some(serde_json::json!({
            "success": true,
            "report_type": report_type,
            "generated_at": Utc::now().to_rfc3339(),
            "parameters": args.kwargs,
        })))
    }
}
