//! Data carried through the plan, validate and execute stages

mod execution;
mod plan;
mod validation;

pub use execution::ExecutionResult;
pub use plan::{Plan, Step, DEFAULT_STEP_TIMEOUT_MS, NO_ROLLBACK};
pub use validation::{PlanValidation, ValidationResult};

use std::fmt;

use serde::{Deserialize, Serialize};

/// Ordinal risk classification of a command
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    None,
    #[default]
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Parse a level as written by the model. Unknown text is treated as low.
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "none" | "safe" => RiskLevel::None,
            "low" => RiskLevel::Low,
            "medium" | "moderate" => RiskLevel::Medium,
            "high" | "critical" => RiskLevel::High,
            _ => RiskLevel::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::None => "none",
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_ordering() {
        assert!(RiskLevel::High > RiskLevel::Medium);
        assert!(RiskLevel::Medium > RiskLevel::Low);
        assert!(RiskLevel::Low > RiskLevel::None);
        assert_eq!(RiskLevel::Low.max(RiskLevel::High), RiskLevel::High);
    }

    #[test]
    fn test_risk_from_str_is_lenient() {
        assert_eq!(RiskLevel::from_str("HIGH"), RiskLevel::High);
        assert_eq!(RiskLevel::from_str(" none "), RiskLevel::None);
        assert_eq!(RiskLevel::from_str("medium"), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_str("extreme?"), RiskLevel::Low);
    }

    #[test]
    fn test_risk_serde_lowercase() {
        assert_eq!(serde_json::to_string(&RiskLevel::Medium).unwrap(), "\"medium\"");
        let level: RiskLevel = serde_json::from_str("\"none\"").unwrap();
        assert_eq!(level, RiskLevel::None);
    }
}
