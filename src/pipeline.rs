//! Validate -> gate -> execute, one step at a time in declared order.

use std::fmt;

use serde::Serialize;

use crate::config::{Config, StepPolicy};
use crate::error::Result;
use crate::model::{ExecutionResult, Plan, PlanValidation, RiskLevel, Step, ValidationResult};
use crate::sandbox::SandboxExecutor;
use crate::validator::Validator;
use crate::{log_info, log_warn};

/// What happens to a step before it may run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GateDecision {
    AutoRun,
    Confirm,
    Block,
}

impl fmt::Display for GateDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GateDecision::AutoRun => "auto-run",
            GateDecision::Confirm => "confirm",
            GateDecision::Block => "block",
        };
        f.pad(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatePolicy {
    pub require_confirmation: bool,
    pub allow_high_risk: bool,
    /// Approve confirmations without asking (`--yes`)
    pub auto_approve: bool,
    pub on_blocked: StepPolicy,
    pub on_failure: StepPolicy,
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self {
            require_confirmation: true,
            allow_high_risk: false,
            auto_approve: false,
            on_blocked: StepPolicy::Halt,
            on_failure: StepPolicy::Halt,
        }
    }
}

impl GatePolicy {
    pub fn from_config(config: &Config, auto_approve: bool) -> Self {
        Self {
            require_confirmation: config.security.require_confirmation,
            allow_high_risk: config.security.allow_high_risk,
            auto_approve,
            on_blocked: config.pipeline.on_blocked,
            on_failure: config.pipeline.on_failure,
        }
    }

    pub fn decide(&self, step: &Step, validation: &ValidationResult) -> GateDecision {
        if !validation.allowed {
            return GateDecision::Block;
        }
        let high = validation.risk_level == RiskLevel::High;
        let wants_confirmation = validation.requires_confirmation || step.requires_confirmation;
        if high || (self.require_confirmation && wants_confirmation) {
            GateDecision::Confirm
        } else {
            GateDecision::AutoRun
        }
    }

    /// Whether `--yes` may answer for this step
    fn may_auto_approve(&self, validation: &ValidationResult) -> bool {
        self.auto_approve && (validation.risk_level != RiskLevel::High || self.allow_high_risk)
    }
}

/// Answers confirmation requests
pub trait ConfirmationGate {
    fn confirm(&mut self, step: &Step, validation: &ValidationResult) -> bool;
}

/// Receives progress as the pipeline runs
pub trait Reporter {
    fn plan(&mut self, plan: &Plan, validation: &PlanValidation);
    fn gate(&mut self, step: &Step, decision: GateDecision);
    fn step_result(&mut self, result: &ExecutionResult);
    fn finished(&mut self, report: &RunReport);
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum StepOutcome {
    Executed(ExecutionResult),
    Blocked { reasons: Vec<String> },
    Declined,
    NotRun,
}

impl StepOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            StepOutcome::Executed(r) if r.success => "succeeded",
            StepOutcome::Executed(_) => "failed",
            StepOutcome::Blocked { .. } => "blocked",
            StepOutcome::Declined => "declined",
            StepOutcome::NotRun => "not run",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepReport {
    pub step_id: String,
    pub outcome: StepOutcome,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub plan_id: String,
    pub risk_level: RiskLevel,
    pub steps: Vec<StepReport>,
    /// False when a halt policy stopped the run early
    pub completed: bool,
}

impl RunReport {
    /// Every step ran and exited successfully
    pub fn succeeded(&self) -> bool {
        self.completed
            && self
                .steps
                .iter()
                .all(|s| matches!(&s.outcome, StepOutcome::Executed(r) if r.success))
    }

    pub fn count(&self, label: &str) -> usize {
        self.steps.iter().filter(|s| s.outcome.label() == label).count()
    }
}

pub struct Pipeline<'a> {
    validator: &'a Validator,
    executor: &'a SandboxExecutor,
    policy: GatePolicy,
}

impl<'a> Pipeline<'a> {
    pub fn new(validator: &'a Validator, executor: &'a SandboxExecutor, policy: GatePolicy) -> Self {
        Self {
            validator,
            executor,
            policy,
        }
    }

    pub async fn run(
        &self,
        plan: &Plan,
        gate: &mut dyn ConfirmationGate,
        reporter: &mut dyn Reporter,
    ) -> Result<RunReport> {
        let validation = self.validator.validate_plan(plan)?;
        reporter.plan(plan, &validation);

        let mut steps = Vec::with_capacity(plan.steps.len());
        let mut halted = false;

        for (step, check) in plan.steps.iter().zip(&validation.step_results) {
            if halted {
                steps.push(StepReport {
                    step_id: step.id.clone(),
                    outcome: StepOutcome::NotRun,
                });
                continue;
            }

            let decision = self.policy.decide(step, check);
            reporter.gate(step, decision);

            let outcome = match decision {
                GateDecision::Block => StepOutcome::Blocked {
                    reasons: check.blocked_reasons.clone(),
                },
                GateDecision::Confirm
                    if !(self.policy.may_auto_approve(check) || gate.confirm(step, check)) =>
                {
                    StepOutcome::Declined
                }
                _ => {
                    let result = self.executor.execute_step(step).await;
                    reporter.step_result(&result);
                    StepOutcome::Executed(result)
                }
            };

            let policy = match &outcome {
                StepOutcome::Blocked { .. } | StepOutcome::Declined => Some(self.policy.on_blocked),
                StepOutcome::Executed(r) if !r.success => Some(self.policy.on_failure),
                _ => None,
            };
            if policy == Some(StepPolicy::Halt) {
                log_warn!("Halting plan {} at step {} ({})", plan.id, step.id, outcome.label());
                halted = true;
            }

            steps.push(StepReport {
                step_id: step.id.clone(),
                outcome,
            });
        }

        let report = RunReport {
            plan_id: plan.id.clone(),
            risk_level: validation.risk_level,
            steps,
            completed: !halted,
        };
        log_info!(
            "Plan {} finished: completed={} succeeded={}",
            plan.id,
            report.completed,
            report.succeeded()
        );
        reporter.finished(&report);
        Ok(report)
    }
}
