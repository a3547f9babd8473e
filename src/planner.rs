//! Natural-language request to structured plan.
//!
//! The backend is asked for a single JSON object. Responses are tolerated when
//! the object is wrapped in prose or a code fence; anything that does not
//! yield a well-formed plan is a `PlanParse` error and is never retried.

use std::collections::HashSet;
use std::path::PathBuf;

use serde::Deserialize;

use crate::backend::{ApiManager, CompletionOptions};
use crate::error::{ForgeError, Result};
use crate::model::{Plan, RiskLevel, Step, NO_ROLLBACK};
use crate::{log_error, log_info};

const SYSTEM_PROMPT: &str = r#"You are Forge, an assistant that converts natural language requests into safe, structured execution plans.

Your role is to:
1. Understand user intent from natural language
2. Break down complex tasks into discrete steps
3. Identify potential risks and safety concerns
4. Generate one executable command for each step

CRITICAL REQUIREMENTS:
- Always respond with valid JSON only
- Never suggest destructive operations without setting "requiresConfirmation": true
- Flag any potentially risky operations
- Provide rollback strategies when possible
- Each command must be a single program invocation: no pipes, redirects, "&&", ";" or subshells
- Use standard commands that work across Unix-like systems

Response format (JSON only):
{
  "intent": "Clear description of what the user wants to accomplish",
  "steps": [
    {
      "id": "step-1",
      "description": "Human-readable description of this step",
      "command": "actual command to execute",
      "requiresConfirmation": true|false,
      "riskLevel": "none|low|medium|high",
      "workingDirectory": "path where command should run (optional)"
    }
  ],
  "riskLevel": "none|low|medium|high",
  "rollback": "Commands to undo the operation if something goes wrong",
  "estimatedDuration": "rough time estimate",
  "prerequisites": ["list of requirements or dependencies"]
}

Risk levels:
- none: Safe read-only operations (ls, cat, echo, etc.)
- low: File operations in user directories
- medium: System configuration changes, package installations
- high: Destructive operations, system-wide changes

Always err on the side of caution and require confirmation for anything that could cause data loss or system instability."#;

/// Plan shape as the model writes it; everything optional until checked
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPlan {
    intent: Option<String>,
    steps: Option<Vec<RawStep>>,
    risk_level: Option<String>,
    rollback: Option<String>,
    estimated_duration: Option<String>,
    prerequisites: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStep {
    id: Option<serde_json::Value>,
    description: Option<String>,
    command: Option<String>,
    requires_confirmation: Option<bool>,
    risk_level: Option<String>,
    working_directory: Option<String>,
    timeout: Option<u64>,
    retry_count: Option<u32>,
}

/// What a step gets when the model leaves a field out
#[derive(Debug, Clone)]
pub struct StepDefaults {
    pub working_directory: PathBuf,
    pub timeout_ms: u64,
}

pub struct Planner {
    api: ApiManager,
    options: CompletionOptions,
    defaults: StepDefaults,
}

impl Planner {
    pub fn new(api: ApiManager, options: CompletionOptions, defaults: StepDefaults) -> Self {
        Self { api, options, defaults }
    }

    pub fn api(&self) -> &ApiManager {
        &self.api
    }

    pub async fn create_plan(&self, query: &str) -> Result<Plan> {
        let prompt = format!(
            r#"User request: "{}"

Please analyze this request and create a structured execution plan. Consider:
1. What the user wants to accomplish
2. The safest way to achieve it
3. Any potential risks or side effects
4. Whether confirmation is needed for each step

Respond with valid JSON only."#,
            query
        );

        let plan = self.request_plan(&prompt).await.map_err(|e| {
            log_error!("Failed to create plan for '{}': {}", query, e);
            e
        })?;

        log_info!(
            "Plan created: id={} steps={} risk={}",
            plan.id,
            plan.steps.len(),
            plan.risk_level
        );
        Ok(plan)
    }

    /// Ask for a revised plan. The original is left untouched.
    pub async fn refine_plan(&self, plan: &Plan, feedback: &str) -> Result<Plan> {
        let prompt = format!(
            r#"The user has provided feedback on the execution plan:

Original plan: {}
User feedback: "{}"

Please refine the plan based on this feedback. Respond with the updated JSON plan using the same format."#,
            plan.to_json_pretty(),
            feedback
        );

        let refined = self.request_plan(&prompt).await?;
        log_info!("Plan {} refined into {}", plan.id, refined.id);
        Ok(refined)
    }

    async fn request_plan(&self, prompt: &str) -> Result<Plan> {
        let response = self.api.complete(SYSTEM_PROMPT, prompt, self.options).await?;
        parse_plan(&response, &self.defaults)
    }
}

/// First balanced top-level `{...}` in `text`, ignoring braces inside strings
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse a backend response into a plan, applying defaults
pub fn parse_plan(response: &str, defaults: &StepDefaults) -> Result<Plan> {
    let json = extract_json_object(response).unwrap_or(response);
    let raw: RawPlan = serde_json::from_str(json)
        .map_err(|e| ForgeError::PlanParse(format!("invalid JSON: {}", e)))?;

    let intent = non_empty(raw.intent)
        .ok_or_else(|| ForgeError::PlanParse("Invalid plan structure: missing intent".to_string()))?;
    let raw_steps = raw
        .steps
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ForgeError::PlanParse("Invalid plan structure: missing steps".to_string()))?;

    let mut seen = HashSet::new();
    let mut steps = Vec::with_capacity(raw_steps.len());
    for (index, raw_step) in raw_steps.into_iter().enumerate() {
        let step = build_step(index, raw_step, defaults)?;
        if !seen.insert(step.id.clone()) {
            return Err(ForgeError::PlanParse(format!("duplicate step id '{}'", step.id)));
        }
        steps.push(step);
    }

    Ok(Plan::new(
        intent,
        steps,
        raw.risk_level
            .as_deref()
            .map(RiskLevel::from_str)
            .unwrap_or_default(),
        non_empty(raw.rollback).unwrap_or_else(|| NO_ROLLBACK.to_string()),
        non_empty(raw.estimated_duration).unwrap_or_else(|| "Unknown".to_string()),
        raw.prerequisites.unwrap_or_default(),
    ))
}

fn build_step(index: usize, raw: RawStep, defaults: &StepDefaults) -> Result<Step> {
    let missing = || ForgeError::PlanParse(format!("Invalid step {}: missing required fields", index));

    // Models sometimes number steps instead of naming them.
    let id = match raw.id {
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => s,
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => return Err(missing()),
    };
    let command = non_empty(raw.command).ok_or_else(missing)?;
    let description = non_empty(raw.description).ok_or_else(missing)?;

    let working_directory = non_empty(raw.working_directory)
        .map(PathBuf::from)
        .unwrap_or_else(|| defaults.working_directory.clone());

    Ok(Step {
        id,
        description,
        command,
        requires_confirmation: raw.requires_confirmation.unwrap_or(false),
        risk_level: raw
            .risk_level
            .as_deref()
            .map(RiskLevel::from_str)
            .unwrap_or_default(),
        working_directory,
        timeout_ms: raw.timeout.filter(|t| *t > 0).unwrap_or(defaults.timeout_ms),
        retry_count: raw.retry_count.unwrap_or(0),
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}
