//! Built-in work items.

pub mod cleanup;
pub mod report;
pub mod upload;

pub use cleanup::TempCleanup;
pub use report::GenerateReport;
pub use upload::ProcessUpload;

use serde_json::Value;

use crate::executor::JobExecutionError;

/// String positional argument, or a permanent failure naming it.
fn required_str<'a>(value: Option<&'a Value>, name: &str) -> Result<&'a str, JobExecutionError> {
    value
        .and_then(Value::as_str)
        .ok_or_else(|| JobExecutionError::Permanent(format!("missing string argument '{name}'")))
}
