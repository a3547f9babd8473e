use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::RiskLevel;

pub const DEFAULT_STEP_TIMEOUT_MS: u64 = 30_000;
pub const NO_ROLLBACK: &str = "No automatic rollback available";

/// One shell command of a plan plus its risk metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub id: String,
    pub description: String,
    pub command: String,
    #[serde(default)]
    pub requires_confirmation: bool,
    #[serde(default)]
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub working_directory: PathBuf,
    #[serde(rename = "timeout", default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub retry_count: u32,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_STEP_TIMEOUT_MS
}

impl Step {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Ordered set of steps derived from one natural-language request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub id: String,
    pub intent: String,
    pub steps: Vec<Step>,
    pub risk_level: RiskLevel,
    pub rollback: String,
    pub estimated_duration: String,
    #[serde(default)]
    pub prerequisites: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Plan {
    pub fn new(
        intent: impl Into<String>,
        steps: Vec<Step>,
        risk_level: RiskLevel,
        rollback: impl Into<String>,
        estimated_duration: impl Into<String>,
        prerequisites: Vec<String>,
    ) -> Self {
        Self {
            id: format!("plan-{}", Uuid::new_v4().simple()),
            intent: intent.into(),
            steps,
            risk_level,
            rollback: rollback.into(),
            estimated_duration: estimated_duration.into(),
            prerequisites,
            created_at: Utc::now(),
        }
    }

    /// Raise the plan level to at least `assessed`.
    ///
    /// Consumes the plan so a validated plan is a distinct value from the one
    /// the planner returned.
    pub fn with_assessed_risk(mut self, assessed: RiskLevel) -> Self {
        let step_max = self
            .steps
            .iter()
            .map(|s| s.risk_level)
            .max()
            .unwrap_or(RiskLevel::None);
        self.risk_level = self.risk_level.max(assessed).max(step_max);
        self
    }

    pub fn high_risk_steps(&self) -> Vec<&Step> {
        self.steps
            .iter()
            .filter(|s| s.risk_level == RiskLevel::High)
            .collect()
    }

    pub fn steps_requiring_confirmation(&self) -> Vec<&Step> {
        self.steps.iter().filter(|s| s.requires_confirmation).collect()
    }

    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| format!("{{\"id\": \"{}\"}}", self.id))
    }
}
