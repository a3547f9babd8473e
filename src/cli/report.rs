//! Terminal rendering of plans, validations and run reports

use std::fmt::Write as _;

use serde::Serialize;

use crate::model::{ExecutionResult, Plan, PlanValidation, Step, ValidationResult};
use crate::pipeline::{GateDecision, Reporter, RunReport, StepOutcome};

/// Plan plus its validation, as printed by `plan`, `refine` and `run`
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanView<'a> {
    pub plan: &'a Plan,
    pub validation: &'a PlanValidation,
}

pub fn render_plan(plan: &Plan, validation: &PlanValidation) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Plan {}", plan.id);
    let _ = writeln!(out, "Intent: {}", plan.intent);
    let _ = writeln!(
        out,
        "Risk: {}  Estimated duration: {}",
        validation.risk_level, plan.estimated_duration
    );
    if !plan.prerequisites.is_empty() {
        let _ = writeln!(out, "Prerequisites: {}", plan.prerequisites.join(", "));
    }
    let _ = writeln!(out);

    for (index, step) in plan.steps.iter().enumerate() {
        let _ = writeln!(out, "{:>2}. [{}] {}", index + 1, step.id, step.description);
        let _ = writeln!(out, "      $ {}", step.command);
        if let Some(check) = validation.result_for(&step.id) {
            render_check_details(&mut out, check, "      ");
        }
    }

    let _ = writeln!(out);
    let confirm = plan.steps_requiring_confirmation();
    if !confirm.is_empty() {
        let ids: Vec<&str> = confirm.iter().map(|s| s.id.as_str()).collect();
        let _ = writeln!(out, "Declared for confirmation: {}", ids.join(", "));
    }
    let high = plan.high_risk_steps();
    if !high.is_empty() {
        let ids: Vec<&str> = high.iter().map(|s| s.id.as_str()).collect();
        let _ = writeln!(out, "Declared high risk: {}", ids.join(", "));
    }
    let _ = writeln!(out, "Rollback: {}", plan.rollback);
    let summary = &validation.summary;
    let _ = write!(
        out,
        "Summary: {} step(s), {} blocked, {} high risk, {} warning(s)",
        summary.total_steps, summary.blocked_steps, summary.high_risk_steps, summary.total_warnings
    );
    if !summary.overall_safe {
        let _ = write!(out, " - NOT SAFE TO RUN AS IS");
    }
    out.push('\n');
    out
}

pub fn render_check(result: &ValidationResult) -> String {
    let mut out = String::new();
    let verdict = if result.allowed { "ALLOWED" } else { "BLOCKED" };
    let _ = writeln!(out, "{}: {}", verdict, result.command);
    let _ = writeln!(out, "Risk: {}", result.risk_level);
    if result.requires_confirmation {
        let _ = writeln!(out, "Requires confirmation");
    }
    render_check_details(&mut out, result, "");
    out
}

fn render_check_details(out: &mut String, check: &ValidationResult, indent: &str) {
    let _ = writeln!(
        out,
        "{}risk: {}{}",
        indent,
        check.risk_level,
        if check.requires_confirmation { ", needs confirmation" } else { "" }
    );
    for reason in &check.blocked_reasons {
        let _ = writeln!(out, "{}blocked: {}", indent, reason);
    }
    for warning in &check.warnings {
        let _ = writeln!(out, "{}warning: {}", indent, warning);
    }
    for suggestion in &check.suggestions {
        let _ = writeln!(out, "{}suggestion: {}", indent, suggestion);
    }
}

pub fn render_run(report: &RunReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Run of plan {}:", report.plan_id);
    for step in &report.steps {
        let _ = write!(out, "  {:<12} {}", step.step_id, step.outcome.label());
        match &step.outcome {
            StepOutcome::Executed(r) => {
                let _ = write!(out, " (exit {}, {}ms)", r.exit_code, r.duration_ms);
            }
            StepOutcome::Blocked { reasons } if !reasons.is_empty() => {
                let _ = write!(out, ": {}", reasons.join("; "));
            }
            _ => {}
        }
        out.push('\n');
    }
    let status = if report.succeeded() {
        "completed successfully"
    } else if report.completed {
        "completed with problems"
    } else {
        "halted"
    };
    let _ = writeln!(
        out,
        "Run {}: {} succeeded, {} failed, {} blocked, {} declined, {} not run",
        status,
        report.count("succeeded"),
        report.count("failed"),
        report.count("blocked"),
        report.count("declined"),
        report.count("not run")
    );
    out
}

/// Streams pipeline progress to stdout
pub struct TerminalReporter {
    json: bool,
    quiet: bool,
}

impl TerminalReporter {
    pub fn new(json: bool, quiet: bool) -> Self {
        Self { json, quiet }
    }
}

impl Reporter for TerminalReporter {
    fn plan(&mut self, plan: &Plan, validation: &PlanValidation) {
        if !self.json {
            print!("{}", render_plan(plan, validation));
            println!();
        }
    }

    fn gate(&mut self, step: &Step, decision: GateDecision) {
        if !self.json && !self.quiet && decision == GateDecision::Block {
            println!("Step {} is blocked and will not run", step.id);
        }
    }

    fn step_result(&mut self, result: &ExecutionResult) {
        if self.json {
            return;
        }
        if self.quiet {
            print!("{}", result.stdout);
            return;
        }
        let status = if result.success { "ok" } else { "FAILED" };
        println!("--- {} [{}] $ {}", result.step_id, status, result.command);
        let output = result.formatted_output();
        print!("{}", output);
        if !output.ends_with('\n') {
            println!();
        }
    }

    fn finished(&mut self, report: &RunReport) {
        if self.json {
            match serde_json::to_string_pretty(report) {
                Ok(json) => println!("{}", json),
                Err(e) => eprintln!("Error: failed to serialize report: {}", e),
            }
        } else {
            println!();
            print!("{}", render_run(report));
        }
    }
}
