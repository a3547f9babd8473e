use chrono::{DateTime, Utc};
use serde::Serialize;

use super::RiskLevel;

/// Verdict for a single step, produced fresh on every validation call
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub step_id: String,
    pub command: String,
    pub allowed: bool,
    pub risk_level: RiskLevel,
    pub warnings: Vec<String>,
    pub blocked_reasons: Vec<String>,
    pub requires_confirmation: bool,
    pub suggestions: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl ValidationResult {
    pub fn new(step_id: impl Into<String>, command: impl Into<String>, risk_level: RiskLevel) -> Self {
        Self {
            step_id: step_id.into(),
            command: command.into(),
            allowed: true,
            risk_level,
            warnings: Vec::new(),
            blocked_reasons: Vec::new(),
            requires_confirmation: false,
            suggestions: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn is_blocked(&self) -> bool {
        !self.allowed
    }

    pub fn is_high_risk(&self) -> bool {
        self.risk_level == RiskLevel::High
    }
}

/// Aggregate counts over a plan's step results
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationSummary {
    pub total_steps: usize,
    pub blocked_steps: usize,
    pub total_warnings: usize,
    pub high_risk_steps: usize,
    pub overall_safe: bool,
}

impl ValidationSummary {
    pub fn from_results(results: &[ValidationResult]) -> Self {
        let blocked_steps = results.iter().filter(|r| r.is_blocked()).count();
        let high_risk_steps = results.iter().filter(|r| r.is_high_risk()).count();
        Self {
            total_steps: results.len(),
            blocked_steps,
            total_warnings: results.iter().map(|r| r.warnings.len()).sum(),
            high_risk_steps,
            overall_safe: blocked_steps == 0 && high_risk_steps == 0,
        }
    }
}

/// Verdict for a whole plan
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanValidation {
    pub allowed: bool,
    pub risk_level: RiskLevel,
    pub step_results: Vec<ValidationResult>,
    pub summary: ValidationSummary,
}

impl PlanValidation {
    pub fn from_results(step_results: Vec<ValidationResult>) -> Self {
        let allowed = step_results.iter().all(|r| r.allowed);
        let risk_level = step_results
            .iter()
            .map(|r| r.risk_level)
            .max()
            .unwrap_or(RiskLevel::None);
        let summary = ValidationSummary::from_results(&step_results);
        Self {
            allowed,
            risk_level,
            step_results,
            summary,
        }
    }

    pub fn result_for(&self, step_id: &str) -> Option<&ValidationResult> {
        self.step_results.iter().find(|r| r.step_id == step_id)
    }
}
