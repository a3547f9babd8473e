mod interactive;
mod report;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use crate::backend::{ApiManager, GeminiBackend, KeyRing};
use crate::config::{default_config_path, Config};
use crate::error::{ForgeError, Result};
use crate::logger::{LogLevel, Logger};
use crate::model::{Plan, PlanValidation};
use crate::pipeline::{GatePolicy, Pipeline};
use crate::planner::{Planner, StepDefaults};
use crate::sandbox::SandboxExecutor;
use crate::state::Manager as StateManager;
use crate::validator::Validator;
use crate::{log_debug, log_warn};

pub use interactive::TerminalGate;
pub use report::TerminalReporter;
use report::{render_check, render_plan, PlanView};

/// forge - turn plain-language requests into validated, sandboxed command plans
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to config file
    #[arg(long, short, global = true)]
    pub config: Option<String>,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Verbose output
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Quiet output
    #[arg(long, short, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create and validate a plan without running it
    Plan {
        /// What you want to do, in plain language
        #[arg(required = true)]
        query: Vec<String>,
    },

    /// Revise the last plan with feedback
    Refine {
        #[arg(required = true)]
        feedback: Vec<String>,
    },

    /// Plan, validate and execute
    Run {
        /// What you want to do (omit with --last)
        query: Vec<String>,

        /// Run the last saved plan instead of creating a new one
        #[arg(long, conflicts_with = "query")]
        last: bool,

        /// Approve confirmations without asking
        #[arg(long, short)]
        yes: bool,
    },

    /// Validate a single command
    Check {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Inspect and manage API keys
    Keys {
        #[command(subcommand)]
        action: KeysAction,
    },

    /// Remove stale files from the sandbox temp directory
    Cleanup,

    /// Show or create the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug, Clone, Copy)]
pub enum KeysAction {
    /// Show key count, current key and retry policy
    Status,
    /// Switch to the next key
    Rotate,
    /// Probe every configured key
    Validate,
}

#[derive(Subcommand, Debug, Clone, Copy)]
pub enum ConfigAction {
    /// Print the effective configuration (keys masked)
    Show,
    /// Write a default config file
    Init,
}

/// Main application
pub struct App {
    pub version: String,
    pub args: Args,
    pub config: Config,
    pub state: StateManager,
    validator: Validator,
    executor: SandboxExecutor,
}

impl App {
    pub fn new(version: impl Into<String>) -> Result<Self> {
        let args = Args::parse();
        let config = Config::load(args.config.as_deref())?;

        let level = if args.verbose {
            LogLevel::Debug
        } else if args.quiet {
            LogLevel::Error
        } else {
            LogLevel::from_str(&config.settings.log_level)
        };
        let log_file = config
            .settings
            .log_file
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(Logger::default_log_path);
        Logger::init(level, Some(log_file), args.verbose);

        let state = StateManager::new(&config.settings.state_file);
        if let Err(e) = state.load() {
            log_warn!("Ignoring unreadable state file {}: {}", state.path().display(), e);
            if args.verbose {
                eprintln!("Warning: failed to load state: {}", e);
            }
        }

        let validator = Validator::new(config.denylist_path());
        let executor = SandboxExecutor::new(&config.sandbox.workdir, config.sandbox.timeout());

        Ok(Self {
            version: version.into(),
            args,
            config,
            state,
            validator,
            executor,
        })
    }

    pub async fn run(&self) -> Result<ExitCode> {
        log_debug!("forge {} starting: {:?}", self.version, self.args.command);

        match &self.args.command {
            Command::Plan { query } => {
                let query = query.join(" ");
                let planner = self.planner()?;
                let result = planner.create_plan(&query).await;
                self.remember_key_index(&planner);
                self.present_plan(result?)?;
            }
            Command::Refine { feedback } => {
                let last = self.last_plan()?;
                let feedback = feedback.join(" ");
                let planner = self.planner()?;
                let result = planner.refine_plan(&last, &feedback).await;
                self.remember_key_index(&planner);
                self.present_plan(result?)?;
            }
            Command::Run { query, last, yes } => {
                let plan = if *last {
                    self.last_plan()?
                } else if query.is_empty() {
                    return Err(ForgeError::Other(
                        "Nothing to run: give a request or use --last".to_string(),
                    ));
                } else {
                    let planner = self.planner()?;
                    let result = planner.create_plan(&query.join(" ")).await;
                    self.remember_key_index(&planner);
                    result?
                };
                return self.execute(plan, *yes).await;
            }
            Command::Check { command } => {
                let result = self.validator.check_command(&command.join(" "))?;
                if self.args.json {
                    print_json(&result)?;
                } else {
                    print!("{}", render_check(&result));
                }
                if !result.allowed {
                    return Ok(ExitCode::from(1));
                }
            }
            Command::Keys { action } => self.keys(*action).await?,
            Command::Cleanup => {
                let removed = self.executor.cleanup();
                if self.args.json {
                    print_json(&serde_json::json!({ "removed": removed }))?;
                } else if !self.args.quiet {
                    println!("Removed {} stale file(s) from {}", removed, self.executor.root().join("tmp").display());
                }
            }
            Command::Config { action } => self.config_command(*action)?,
        }

        Ok(ExitCode::SUCCESS)
    }

    fn planner(&self) -> Result<Planner> {
        let backend_config = &self.config.backend;
        let backend = GeminiBackend::new(
            &backend_config.api_base,
            &backend_config.model,
            backend_config.request_timeout(),
        )?;
        let keys = KeyRing::new(backend_config.api_keys.clone())
            .with_start_index(self.state.current_key_index());
        let api = ApiManager::new(Box::new(backend), keys, self.config.retry.policy());
        let defaults = StepDefaults {
            working_directory: std::env::current_dir()?,
            timeout_ms: self.config.sandbox.timeout_ms,
        };
        Ok(Planner::new(api, backend_config.completion_options(), defaults))
    }

    /// Persist the key the manager ended on so the next run resumes there
    fn remember_key_index(&self, planner: &Planner) {
        if let Err(e) = self.state.set_current_key_index(planner.api().keys().current_index()) {
            log_warn!("Failed to save key index: {}", e);
        }
    }

    fn last_plan(&self) -> Result<Plan> {
        self.state.last_plan().ok_or_else(|| {
            ForgeError::Other("No saved plan; create one with `forge plan <request>`".to_string())
        })
    }

    /// Validate, print and save a freshly created plan
    fn present_plan(&self, plan: Plan) -> Result<()> {
        let validation = self.validator.validate_plan(&plan)?;
        let plan = plan.with_assessed_risk(validation.risk_level);
        self.print_plan(&plan, &validation)?;
        self.state.set_last_plan(plan)
    }

    fn print_plan(&self, plan: &Plan, validation: &PlanValidation) -> Result<()> {
        if self.args.json {
            print_json(&PlanView { plan, validation })
        } else {
            print!("{}", render_plan(plan, validation));
            Ok(())
        }
    }

    async fn execute(&self, plan: Plan, yes: bool) -> Result<ExitCode> {
        self.executor.initialize()?;

        let policy = GatePolicy::from_config(&self.config, yes);
        let pipeline = Pipeline::new(&self.validator, &self.executor, policy);
        let mut gate = TerminalGate::stdio();
        let mut reporter = TerminalReporter::new(self.args.json, self.args.quiet);

        let report = pipeline.run(&plan, &mut gate, &mut reporter).await?;
        let risk = report.risk_level;
        if let Err(e) = self.state.set_last_plan(plan.with_assessed_risk(risk)) {
            log_warn!("Failed to save plan: {}", e);
        }

        Ok(if report.succeeded() {
            ExitCode::SUCCESS
        } else {
            ExitCode::from(1)
        })
    }

    async fn keys(&self, action: KeysAction) -> Result<()> {
        let planner = self.planner()?;
        let api = planner.api();
        match action {
            KeysAction::Status => {
                let stats = api.stats();
                if self.args.json {
                    print_json(&stats)?;
                } else {
                    println!("Backend:     {} ({})", stats.backend, stats.model);
                    println!("Keys:        {}", stats.total_keys);
                    println!("Current key: #{}", stats.current_key_index + 1);
                    println!(
                        "Retries:     {} (base delay {}ms, x{})",
                        stats.max_retries, stats.base_delay_ms, stats.backoff_multiplier
                    );
                }
            }
            KeysAction::Rotate => {
                let rotated = api.keys().rotate();
                self.remember_key_index(&planner);
                let index = api.keys().current_index();
                if self.args.json {
                    print_json(&serde_json::json!({ "rotated": rotated, "currentKeyIndex": index }))?;
                } else if rotated {
                    println!("Now using key #{} of {}", index + 1, api.keys().len());
                } else {
                    println!("Only one key configured; nothing to rotate");
                }
            }
            KeysAction::Validate => {
                let probes = api.validate_keys().await;
                if self.args.json {
                    print_json(&probes)?;
                } else {
                    for probe in &probes {
                        match &probe.error {
                            None => println!("Key #{}: valid", probe.index + 1),
                            Some(e) => println!("Key #{}: invalid ({})", probe.index + 1, e),
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn config_command(&self, action: ConfigAction) -> Result<()> {
        match action {
            ConfigAction::Show => {
                if self.args.json {
                    let mut shown = self.config.clone();
                    shown.backend.api_keys = shown
                        .backend
                        .api_keys
                        .iter()
                        .map(|k| crate::config::mask_key(k))
                        .collect();
                    print_json(&shown)
                } else {
                    print!("{}", self.config.to_masked_toml()?);
                    Ok(())
                }
            }
            ConfigAction::Init => {
                let path = self
                    .args
                    .config
                    .as_ref()
                    .map(PathBuf::from)
                    .unwrap_or_else(default_config_path);
                Config::init(&path)?;
                if !self.args.quiet {
                    println!("Wrote default configuration to {}", path.display());
                }
                Ok(())
            }
        }
    }

    /// Output an error in the appropriate format
    pub fn output_error(&self, err: &ForgeError) {
        if self.args.json {
            let json = match err.api_error() {
                Some(api_err) => serde_json::json!({
                    "error": true,
                    "code": api_err.code,
                    "message": err.to_string(),
                    "retryable": api_err.retryable,
                    "suggestion": api_err.suggestion,
                }),
                None => serde_json::json!({
                    "error": true,
                    "message": err.to_string()
                }),
            };
            eprintln!("{}", json);
        } else {
            eprintln!("Error: {}", err);
            if let Some(suggestion) = err.api_error().and_then(|e| e.suggestion.as_ref()) {
                eprintln!("Suggestion: {}", suggestion);
            }
        }
    }
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| ForgeError::Other(format!("Failed to serialize: {}", e)))?;
    println!("{}", json);
    Ok(())
}
