use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Terminal record of one executed step
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub step_id: String,
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    #[serde(rename = "duration")]
    pub duration_ms: u64,
    pub working_directory: PathBuf,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ExecutionResult {
    /// Result for a step that never produced an exit status
    pub fn failed(
        step_id: impl Into<String>,
        command: impl Into<String>,
        working_directory: PathBuf,
        duration_ms: u64,
        error: impl Into<String>,
    ) -> Self {
        let error = error.into();
        Self {
            step_id: step_id.into(),
            command: command.into(),
            exit_code: -1,
            stdout: String::new(),
            stderr: error.clone(),
            duration_ms,
            working_directory,
            success: false,
            error: Some(error),
            timestamp: Utc::now(),
        }
    }

    /// The most useful text to show for this outcome
    pub fn formatted_output(&self) -> &str {
        if self.success && !self.stdout.is_empty() {
            &self.stdout
        } else if !self.success && !self.stderr.is_empty() {
            &self.stderr
        } else if let Some(ref err) = self.error {
            err
        } else {
            "No output"
        }
    }
}
