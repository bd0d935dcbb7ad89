//! Uploaded file processing work item.

use std::io::ErrorKind;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing;

use jobhub_entity::job::JobArgs;

use crate::executor::{JobExecutionError, WorkItem};

use super::required_str;

/// Inspects an uploaded file and reports its size and line count.
///
/// Positional arguments: `file_path`, then an optional `user_id`.
#[derive(Debug, Clone, Default)]
pub struct ProcessUpload;

impl ProcessUpload {
    /// Create a new upload processing work item
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl WorkItem for ProcessUpload {
    fn describe(&self) -> String {
        "jobs::process_upload".to_string()
    }

    async fn execute(&self, args: &JobArgs) -> Result<Option<Value>, JobExecutionError> {
        let file_path = required_str(args.positional(0), "file_path")?;
        let user_id = args.positional(1).cloned().unwrap_or(Value::Null);
        tracing::info!(file_path, "Processing uploaded file");

        let bytes = tokio::fs::read(file_path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => {
                JobExecutionError::Permanent(format!("Upload '{}' does not exist", file_path))
            }
            _ => JobExecutionError::Transient(format!("Failed to read '{}': {}", file_path, e)),
        })?;
        let lines = count_lines(&bytes);

        tracing::debug!(file_path, size = bytes.len(), lines, "Upload processed");

        Ok(Some(serde_json::json!({
            "success": true,
            "file_path": file_path,
            "user_id": user_id,
            "size_bytes": bytes.len(),
            "lines": lines,
            "processed_at": Utc::now().to_rfc3339(),
        })))
    }
}

fn count_lines(bytes: &[u8]) -> usize {
    let newlines = bytes.iter().filter(|&&b| b == b'\n').count();
    match bytes.last() {
        Some(b'\n') | None => newlines,
        Some(_) => newlines + 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reports_size_and_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.csv");
        std::fs::write(&path, "a,b\n1,2\n3,4").unwrap();

        let out = ProcessUpload::new()
            .execute(&JobArgs::new().arg(path.to_str().unwrap()).arg(42))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(out["size_bytes"], 11);
        assert_eq!(out["lines"], 3);
        assert_eq!(out["user_id"], 42);
    }

    #[tokio::test]
    async fn missing_file_is_permanent() {
        let err = ProcessUpload::new()
            .execute(&JobArgs::new().arg("/nonexistent/upload.bin"))
            .await
            .unwrap_err();
        assert!(matches!(err, JobExecutionError::Permanent(_)));
    }

    #[test]
    fn line_count_handles_trailing_newline() {
        assert_eq!(count_lines(b""), 0);
        assert_eq!(count_lines(b"one\n"), 1);
        assert_eq!(count_lines(b"one\ntwo"), 2);
    }
}
