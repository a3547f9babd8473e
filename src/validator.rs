//! Step and plan validation.
//!
//! `allowed` and `risk_level` are independent answers: the first says whether
//! a command may run at all, the second (with `requires_confirmation`) whether
//! a human has to approve it first. A step can be allowed and high risk.

use std::path::PathBuf;
use std::sync::OnceLock;

use crate::denylist::{Denylist, DenylistSource};
use crate::error::{ForgeError, Result};
use crate::model::{Plan, PlanValidation, RiskLevel, Step, ValidationResult};
use crate::risk::{self, Category, Classification};
use crate::{log_debug, log_info};

/// Substitutions, recognised anywhere inside a word
const SHELL_SUBSTITUTIONS: &[&str] = &["$(", "`"];

/// Shell syntax the sandbox cannot honour, longest first. Recognised as a
/// whole word or at either end of one, so `a?b=1&c=2` stays an argument.
const SHELL_OPERATORS: &[&str] = &["&&", "||", ">>", "|", ";", ">", "<", "&"];

pub struct Validator {
    denylist_path: Option<PathBuf>,
    denylist: OnceLock<Denylist>,
}

impl Validator {
    pub fn new(denylist_path: Option<PathBuf>) -> Self {
        Self {
            denylist_path,
            denylist: OnceLock::new(),
        }
    }

    /// Validator over an already loaded denylist
    #[cfg(test)]
    pub fn with_denylist(denylist: Denylist) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(denylist);
        Self {
            denylist_path: None,
            denylist: cell,
        }
    }

    /// Loaded on first use, then kept for the life of the validator
    pub fn denylist(&self) -> &Denylist {
        self.denylist.get_or_init(|| {
            let denylist = Denylist::load(self.denylist_path.as_deref());
            match denylist.source() {
                DenylistSource::File(path) => log_info!(
                    "Validator initialized with denylist {} ({} patterns)",
                    path.display(),
                    denylist.pattern_count()
                ),
                DenylistSource::Builtin => log_info!("Validator initialized with built-in denylist"),
            }
            denylist
        })
    }

    pub fn validate_step(&self, step: &Step) -> Result<ValidationResult> {
        let result = self.evaluate(&step.id, &step.command, step.risk_level, step.requires_confirmation)?;
        log_debug!(
            "Step validation completed: step={} allowed={} risk={} warnings={}",
            result.step_id,
            result.allowed,
            result.risk_level,
            result.warnings.len()
        );
        Ok(result)
    }

    /// Validate a command that is not part of any plan
    pub fn check_command(&self, command: &str) -> Result<ValidationResult> {
        self.evaluate("adhoc", command, RiskLevel::None, false)
    }

    pub fn validate_plan(&self, plan: &Plan) -> Result<PlanValidation> {
        let results = plan
            .steps
            .iter()
            .map(|step| self.validate_step(step))
            .collect::<Result<Vec<_>>>()?;

        let validation = PlanValidation::from_results(results);
        log_info!(
            "Plan {} validated: allowed={} risk={} blocked={} high_risk={}",
            plan.id,
            validation.allowed,
            validation.risk_level,
            validation.summary.blocked_steps,
            validation.summary.high_risk_steps
        );
        Ok(validation)
    }

    fn evaluate(
        &self,
        step_id: &str,
        command: &str,
        declared: RiskLevel,
        declared_confirmation: bool,
    ) -> Result<ValidationResult> {
        let trimmed = command.trim();
        if trimmed.is_empty() {
            return Err(ForgeError::Validation(format!(
                "step '{}' has no command to evaluate",
                step_id
            )));
        }

        let denylist = self.denylist();
        let mut result = ValidationResult::new(step_id, command, declared);

        let reasons = denylist.blocked_reasons(trimmed);
        if !reasons.is_empty() {
            result.allowed = false;
            result.blocked_reasons.extend(reasons);
        }

        let classification = risk::classify(trimmed);
        result.risk_level = result.risk_level.max(classification.level);
        result.warnings.extend(classification.warnings.iter().cloned());
        if !classification.is_uncategorized() {
            let labels: Vec<&str> = classification.categories.iter().map(|c| c.description()).collect();
            log_debug!("Command '{}' classified as: {}", trimmed, labels.join(", "));
        }

        let high_risk = denylist.high_risk_matches(trimmed);
        if risk::is_critical(trimmed) || !high_risk.is_empty() {
            result.risk_level = RiskLevel::High;
            result.requires_confirmation = true;
            result
                .warnings
                .extend(high_risk.iter().map(|m| format!("High-risk operation: {}", m)));
        }

        if let Some(op) = find_shell_operator(trimmed) {
            result.allowed = false;
            result.blocked_reasons.push(format!(
                "Shell operator '{}' is not supported; split the command into separate steps",
                op
            ));
        }

        result.requires_confirmation |= declared_confirmation || result.risk_level == RiskLevel::High;
        result.suggestions = suggestions(&result, &classification);
        Ok(result)
    }
}

/// First shell operator appearing in the command, if any
fn find_shell_operator(command: &str) -> Option<&'static str> {
    command.split_whitespace().find_map(|word| {
        if let Some(op) = SHELL_SUBSTITUTIONS.iter().find(|op| word.contains(*op)) {
            return Some(*op);
        }
        // `2>err.log` and `2>&1` redirect a numbered descriptor.
        let redirect = word.trim_start_matches(|c: char| c.is_ascii_digit());
        SHELL_OPERATORS
            .iter()
            .find(|op| redirect.starts_with(*op) || word.ends_with(*op))
            .copied()
    })
}

fn suggestions(result: &ValidationResult, classification: &Classification) -> Vec<String> {
    let mut out = Vec::new();
    if !result.allowed {
        out.push("Rephrase the request or run the command manually if it is really intended".to_string());
    }
    if classification.has_category(Category::FileOperation) && result.risk_level == RiskLevel::High {
        out.push("Move files to a backup location instead of deleting them".to_string());
    }
    if classification.has_category(Category::Network) && result.risk_level == RiskLevel::High {
        out.push("Download the script first and review it before running".to_string());
    }
    if result.risk_level == RiskLevel::High && result.allowed {
        out.push("Review the command carefully before confirming".to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::denylist::DenylistPolicy;
    use crate::model::{NO_ROLLBACK, DEFAULT_STEP_TIMEOUT_MS};

    fn step(id: &str, command: &str, risk: RiskLevel) -> Step {
        Step {
            id: id.to_string(),
            description: format!("step {}", id),
            command: command.to_string(),
            requires_confirmation: false,
            risk_level: risk,
            working_directory: PathBuf::new(),
            timeout_ms: DEFAULT_STEP_TIMEOUT_MS,
            retry_count: 0,
        }
    }

    fn plan(steps: Vec<Step>) -> Plan {
        Plan::new("test", steps, RiskLevel::Low, NO_ROLLBACK, "Unknown", vec![])
    }

    fn validator() -> Validator {
        Validator::with_denylist(Denylist::builtin())
    }

    #[test]
    fn test_root_deletion_is_blocked_and_high() {
        let result = validator().validate_step(&step("s1", "rm -rf /", RiskLevel::Low)).unwrap();
        assert!(!result.allowed);
        assert_eq!(result.risk_level, RiskLevel::High);
        assert!(result.requires_confirmation);
        assert!(result.blocked_reasons.iter().any(|r| r.contains("rm -rf /")));
        assert!(result
            .warnings
            .iter()
            .any(|w| w.to_lowercase().contains("destructive")));
    }

    #[test]
    fn test_benign_command_is_clean() {
        let result = validator().validate_step(&step("s1", "ls -la", RiskLevel::None)).unwrap();
        assert!(result.allowed);
        assert_eq!(result.risk_level, RiskLevel::None);
        assert!(result.warnings.is_empty());
        assert!(result.blocked_reasons.is_empty());
        assert!(!result.requires_confirmation);

        // The declared default is kept when nothing raises it.
        let result = validator().validate_step(&step("s2", "ls -la", RiskLevel::Low)).unwrap();
        assert_eq!(result.risk_level, RiskLevel::Low);
    }

    #[test]
    fn test_denylist_substring_is_reported() {
        let v = validator();
        for blocked in ["mkfs", "sudo rm", "dd if=/dev/zero", "chmod 777"] {
            let command = format!("{} target", blocked);
            let result = v.check_command(&command).unwrap();
            assert!(!result.allowed, "{}", command);
            assert!(
                result
                    .blocked_reasons
                    .contains(&format!("Blocked command pattern: {}", blocked)),
                "{}",
                command
            );
        }
    }

    #[test]
    fn test_critical_forces_high_regardless_of_declared() {
        let v = validator();
        for command in ["fdisk /dev/sdb", "mkfs.ext4 /dev/sdb1", "chmod -R 777 www"] {
            let result = v.validate_step(&step("s", command, RiskLevel::None)).unwrap();
            assert_eq!(result.risk_level, RiskLevel::High, "{}", command);
            assert!(result.requires_confirmation, "{}", command);
        }
    }

    #[test]
    fn test_allowed_but_high_risk() {
        let result = validator()
            .validate_step(&step("s", "git reset --hard HEAD~1", RiskLevel::Low))
            .unwrap();
        assert!(result.allowed);
        assert_eq!(result.risk_level, RiskLevel::High);
        assert!(result.requires_confirmation);
        assert!(result
            .warnings
            .contains(&"High-risk operation: git reset --hard".to_string()));
        assert!(result
            .suggestions
            .contains(&"Review the command carefully before confirming".to_string()));
    }

    #[test]
    fn test_declared_risk_is_never_lowered() {
        let result = validator().validate_step(&step("s", "echo hi", RiskLevel::Medium)).unwrap();
        assert_eq!(result.risk_level, RiskLevel::Medium);
        assert!(result.allowed);
    }

    #[test]
    fn test_declared_confirmation_is_kept() {
        let mut s = step("s", "touch notes.txt", RiskLevel::Low);
        s.requires_confirmation = true;
        let result = validator().validate_step(&s).unwrap();
        assert!(result.requires_confirmation);
        assert!(result.allowed);
    }

    #[test]
    fn test_shell_operators_are_rejected() {
        let v = validator();
        let result = v.check_command("cat log.txt | grep error").unwrap();
        assert!(!result.allowed);
        assert!(result.blocked_reasons[0].contains("'|'"));

        let result = v.check_command("make && make install").unwrap();
        assert!(result.blocked_reasons.iter().any(|r| r.contains("'&&'")));

        let result = v.check_command("echo hi > out.txt").unwrap();
        assert!(!result.allowed);

        assert!(v.check_command("cargo build --release").unwrap().allowed);
    }

    #[test]
    fn test_operators_at_word_boundaries() {
        let v = validator();
        for (command, op) in [
            ("make&& make install", "&&"),
            ("ls;", ";"),
            ("cargo test 2>err.log", ">"),
            ("cargo test 2>&1", ">"),
            ("sort <input.txt", "<"),
            ("sleep 10 &", "&"),
            ("echo $(whoami)", "$("),
            ("echo `id`", "`"),
        ] {
            assert_eq!(find_shell_operator(command), Some(op), "{}", command);
            assert!(!v.check_command(command).unwrap().allowed, "{}", command);
        }
    }

    #[test]
    fn test_operator_characters_inside_arguments_are_allowed() {
        let v = validator();
        for command in [
            "curl -O https://x.io/a?b=1&c=2",
            "git log --pretty=%h<%an>%s",
            "grep -e a|b notes.txt",
        ] {
            assert_eq!(find_shell_operator(command), None, "{}", command);
            let result = v.check_command(command).unwrap();
            assert!(result.blocked_reasons.is_empty(), "{}: {:?}", command, result.blocked_reasons);
            assert!(result.allowed, "{}", command);
        }
    }

    #[test]
    fn test_reordered_rm_flags_need_confirmation() {
        let v = validator();
        for command in [
            "rm -v -rf /home/dev/project",
            "rm --recursive --force /home/dev/project",
            "rm build -rf",
        ] {
            let result = v.check_command(command).unwrap();
            assert_eq!(result.risk_level, RiskLevel::High, "{}", command);
            assert!(result.requires_confirmation, "{}", command);
            assert!(result
                .warnings
                .contains(&"Destructive file operation detected".to_string()));
        }
    }

    #[test]
    fn test_empty_command_is_validation_error() {
        let err = validator().validate_step(&step("s", "   ", RiskLevel::Low)).unwrap_err();
        assert!(matches!(err, ForgeError::Validation(_)));
    }

    #[test]
    fn test_validate_plan_aggregates() {
        let v = validator();
        let p = plan(vec![
            step("s1", "ls -la", RiskLevel::None),
            step("s2", "curl -O https://example.com/a.tgz", RiskLevel::Low),
            step("s3", "rm -rf /", RiskLevel::Low),
        ]);
        let validation = v.validate_plan(&p).unwrap();

        assert!(!validation.allowed);
        assert_eq!(validation.step_results.len(), 3);
        let max = validation.step_results.iter().map(|r| r.risk_level).max().unwrap();
        assert_eq!(validation.risk_level, max);
        assert_eq!(validation.risk_level, RiskLevel::High);
        assert_eq!(validation.summary.blocked_steps, 1);
        assert_eq!(validation.summary.high_risk_steps, 1);
        assert!(!validation.summary.overall_safe);
    }

    #[test]
    fn test_plan_allowed_iff_no_step_blocked() {
        let v = validator();
        let ok = plan(vec![
            step("a", "ls", RiskLevel::None),
            step("b", "git reset --hard", RiskLevel::Low),
        ]);
        let validation = v.validate_plan(&ok).unwrap();
        assert!(validation.allowed);
        assert!(validation.step_results.iter().all(|r| r.allowed));
        // High risk but nothing blocked: allowed, yet not safe.
        assert!(!validation.summary.overall_safe);

        let bad = plan(vec![step("a", "ls", RiskLevel::None), step("b", "mkfs /dev/sdb", RiskLevel::Low)]);
        let validation = v.validate_plan(&bad).unwrap();
        assert!(!validation.allowed);
        assert!(validation.step_results.iter().any(|r| !r.allowed));
    }

    #[test]
    fn test_validation_does_not_touch_plan() {
        let p = plan(vec![step("a", "rm -rf /", RiskLevel::None)]);
        let before = p.clone();
        validator().validate_plan(&p).unwrap();
        assert_eq!(p, before);
    }

    #[test]
    fn test_denylist_is_read_once() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("denylist.toml");
        std::fs::write(&path, "commands = [\"terraform destroy\"]").unwrap();

        let v = Validator::new(Some(path.clone()));
        assert!(!v.check_command("terraform destroy").unwrap().allowed);

        std::fs::write(&path, "commands = [\"helm uninstall\"]").unwrap();
        assert!(!v.check_command("terraform destroy").unwrap().allowed);
        assert!(v.check_command("helm uninstall app").unwrap().allowed);

        let fresh = Validator::new(Some(path));
        assert!(!fresh.check_command("helm uninstall app").unwrap().allowed);
    }

    #[test]
    fn test_custom_policy_compiles() {
        let policy = DenylistPolicy {
            commands: vec![],
            patterns: vec!["^shutdown".to_string()],
            high_risk: vec![],
        };
        let v = Validator::with_denylist(Denylist::compile(policy, DenylistSource::Builtin));
        let result = v.check_command("shutdown now").unwrap();
        assert_eq!(result.blocked_reasons, vec!["Blocked by pattern: ^shutdown".to_string()]);
    }
}
