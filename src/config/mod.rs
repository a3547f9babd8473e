use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::backend::{CompletionOptions, RetryPolicy};
use crate::error::{ForgeError, Result};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Global settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<String>,
    #[serde(default = "default_state_file")]
    pub state_file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub api_keys: Vec<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denylist_file: Option<String>,
    #[serde(default = "default_true")]
    pub require_confirmation: bool,
    #[serde(default)]
    pub allow_high_risk: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default = "default_workdir")]
    pub workdir: String,
    #[serde(default = "default_step_timeout")]
    pub timeout_ms: u64,
}

/// What the pipeline does after a step is blocked, declined or fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepPolicy {
    #[default]
    Halt,
    Continue,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub on_blocked: StepPolicy,
    #[serde(default)]
    pub on_failure: StepPolicy,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_state_file() -> String {
    let data_dir = env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".local/share")
        });

    data_dir
        .join("forge/state.json")
        .to_string_lossy()
        .to_string()
}

fn default_model() -> String {
    "gemini-1.5-flash".to_string()
}

fn default_api_base() -> String {
    crate::backend::DEFAULT_API_BASE.to_string()
}

fn default_request_timeout() -> u64 {
    30_000
}

fn default_temperature() -> f32 {
    0.1
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay() -> u64 {
    1000
}

fn default_backoff_multiplier() -> u32 {
    2
}

fn default_true() -> bool {
    true
}

fn default_workdir() -> String {
    "/tmp/forge-work".to_string()
}

fn default_step_timeout() -> u64 {
    30_000
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_file: None,
            state_file: default_state_file(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            api_base: default_api_base(),
            api_keys: Vec::new(),
            request_timeout_ms: default_request_timeout(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            denylist_file: None,
            require_confirmation: true,
            allow_high_risk: false,
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            workdir: default_workdir(),
            timeout_ms: default_step_timeout(),
        }
    }
}

impl BackendConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn completion_options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            backoff_multiplier: self.backoff_multiplier,
        }
    }
}

impl SandboxConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Config {
    /// Load configuration from file or return defaults
    pub fn load(path: Option<&str>) -> Result<Self> {
        let path = path.map(PathBuf::from).unwrap_or_else(default_config_path);

        let mut config = if path.exists() {
            let content = fs::read_to_string(&path).map_err(|e| {
                ForgeError::Config(format!("Failed to read config file: {}", e))
            })?;
            Self::parse(&content)?
        } else {
            Config::default()
        };

        config.apply_env_overrides(|key| env::var(key).ok());
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| ForgeError::Config(format!("Failed to parse config file: {}", e)))
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(val) = var("FORGE_STATE_FILE") {
            self.settings.state_file = val;
        }
        if let Some(val) = var("FORGE_LOG_LEVEL") {
            self.settings.log_level = val;
        }

        if let Some(val) = var("GEMINI_API_KEYS") {
            let keys: Vec<String> = val
                .split(',')
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect();
            if !keys.is_empty() {
                self.backend.api_keys = keys;
            }
        }
        if self.backend.api_keys.is_empty() {
            if let Some(key) = var("GEMINI_API_KEY")
                .or_else(|| var("GOOGLE_API_KEY"))
                .filter(|k| !k.trim().is_empty())
            {
                self.backend.api_keys.push(key.trim().to_string());
            }
        }
    }

    pub fn denylist_path(&self) -> Option<PathBuf> {
        self.security.denylist_file.as_deref().map(expand_home)
    }

    /// TOML rendering with API keys masked
    pub fn to_masked_toml(&self) -> Result<String> {
        let mut shown = self.clone();
        shown.backend.api_keys = shown.backend.api_keys.iter().map(|k| mask_key(k)).collect();
        toml::to_string_pretty(&shown)
            .map_err(|e| ForgeError::Config(format!("Failed to render config: {}", e)))
    }

    /// Write a default config file. Refuses to replace an existing one.
    pub fn init(path: &Path) -> Result<()> {
        if path.exists() {
            return Err(ForgeError::Config(format!(
                "Config file already exists: {}",
                path.display()
            )));
        }
        let content = toml::to_string_pretty(&Config::default())
            .map_err(|e| ForgeError::Config(format!("Failed to render config: {}", e)))?;
        crate::state::write_atomic(path, content.as_bytes())
    }
}

/// Show only the edges of a secret
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len().max(4));
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

/// Get the default config file path
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = env::var("FORGE_CONFIG") {
        return PathBuf::from(path);
    }

    let config_dir = env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config")
        });

    config_dir.join("forge/config.toml")
}
