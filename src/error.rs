use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Error codes for structured backend errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ApiErrorCode {
    #[serde(rename = "RATE_LIMITED")]
    RateLimited,
    #[serde(rename = "QUOTA_EXCEEDED")]
    QuotaExceeded,
    #[serde(rename = "TIMEOUT")]
    Timeout,
    #[serde(rename = "NETWORK_ERROR")]
    Network,
    #[serde(rename = "SERVER_ERROR")]
    ServerError,
    #[serde(rename = "AUTH_FAILED")]
    AuthFailed,
    #[serde(rename = "INVALID_REQUEST")]
    InvalidRequest,
    #[serde(rename = "NO_API_KEYS")]
    NoApiKeys,
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

/// Markers that make a free-text backend error worth retrying
const RETRYABLE_MARKERS: &[&str] = &[
    "rate limit",
    "quota exceeded",
    "timeout",
    "network error",
    "service unavailable",
    "429",
    "500",
    "502",
    "503",
    "504",
];

impl ApiErrorCode {
    /// Classify an untyped backend error message.
    ///
    /// Backends that only hand back text (SDK errors, proxies) are mapped with
    /// the same keyword list used for HTTP failures.
    pub fn classify(message: &str) -> Self {
        let msg = message.to_lowercase();
        if msg.contains("quota") || msg.contains("resource_exhausted") {
            return ApiErrorCode::QuotaExceeded;
        }
        if msg.contains("rate limit") || msg.contains("429") {
            return ApiErrorCode::RateLimited;
        }
        if msg.contains("timeout") || msg.contains("timed out") {
            return ApiErrorCode::Timeout;
        }
        if msg.contains("network error") {
            return ApiErrorCode::Network;
        }
        if RETRYABLE_MARKERS.iter().any(|m| msg.contains(m)) {
            return ApiErrorCode::ServerError;
        }
        if msg.contains("api key") {
            return ApiErrorCode::AuthFailed;
        }
        ApiErrorCode::Unknown
    }

    /// Map an HTTP status (and its body) to an error code
    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            429 => {
                let lower = body.to_lowercase();
                if lower.contains("quota") || lower.contains("resource_exhausted") {
                    ApiErrorCode::QuotaExceeded
                } else {
                    ApiErrorCode::RateLimited
                }
            }
            500 | 502 | 503 | 504 => ApiErrorCode::ServerError,
            401 | 403 => ApiErrorCode::AuthFailed,
            400 if body.to_lowercase().contains("api key") => ApiErrorCode::AuthFailed,
            _ => ApiErrorCode::InvalidRequest,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiErrorCode::RateLimited
                | ApiErrorCode::QuotaExceeded
                | ApiErrorCode::Timeout
                | ApiErrorCode::Network
                | ApiErrorCode::ServerError
        )
    }

    /// Rate and quota limits are tied to a key, so another key may succeed
    pub fn rotates_key(&self) -> bool {
        matches!(self, ApiErrorCode::RateLimited | ApiErrorCode::QuotaExceeded)
    }
}

/// What the retry loop should do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Fatal,
    Retry,
    RetryWithRotatedKey,
}

/// Structured backend error
#[derive(Debug, Clone, Error, Serialize)]
#[error("{message}")]
pub struct ApiError {
    pub code: ApiErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl ApiError {
    pub fn new(code: ApiErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            status: None,
            retryable: code.is_retryable(),
            suggestion: None,
        }
    }

    /// Build from a plain message, classifying it by content
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(ApiErrorCode::classify(&message), message)
    }

    pub fn from_status(status: u16, body: &str) -> Self {
        let code = ApiErrorCode::from_status(status, body);
        let mut err = Self::new(code, format!("backend returned {}: {}", status, body.trim()));
        err.status = Some(status);
        match code {
            ApiErrorCode::AuthFailed => {
                err.with_suggestion("Check the API keys in your config or GEMINI_API_KEYS")
            }
            ApiErrorCode::QuotaExceeded | ApiErrorCode::RateLimited => {
                err.with_suggestion("Add more API keys to spread load across quotas")
            }
            _ => err,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn no_api_keys() -> Self {
        Self::new(ApiErrorCode::NoApiKeys, "No API keys configured")
            .with_suggestion("Set backend.api_keys in the config file or export GEMINI_API_KEY")
    }

    pub fn disposition(&self) -> Disposition {
        if !self.retryable {
            Disposition::Fatal
        } else if self.code.rotates_key() {
            Disposition::RetryWithRotatedKey
        } else {
            Disposition::Retry
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return ApiError::new(ApiErrorCode::Timeout, format!("request timeout: {}", err));
        }
        if let Some(status) = err.status() {
            return ApiError::from_status(status.as_u16(), &err.to_string());
        }
        if err.is_connect() || err.is_request() || err.is_body() {
            return ApiError::new(ApiErrorCode::Network, format!("network error: {}", err));
        }
        if err.is_decode() {
            return ApiError::new(
                ApiErrorCode::InvalidRequest,
                format!("malformed backend response: {}", err),
            );
        }
        ApiError::from_message(err.to_string())
    }
}

/// Failures inside the sandbox; always folded into an execution result
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Working directory not allowed: {}", .0.display())]
    DirectoryNotAllowed(PathBuf),

    #[error("Command is empty")]
    EmptyCommand,

    #[error("Failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command timed out after {0}ms")]
    Timeout(u64),

    #[error("Sandbox IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// General application error
#[derive(Debug, Error)]
pub enum ForgeError {
    #[error("{0}")]
    Api(#[from] ApiError),

    #[error("API request failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: ApiError },

    #[error("Failed to parse plan response: {0}")]
    PlanParse(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("{0}")]
    Sandbox(#[from] SandboxError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("State error: {0}")]
    State(String),

    #[error("{0}")]
    Other(String),
}

impl ForgeError {
    /// The structured backend error behind this failure, if any
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            ForgeError::Api(e) => Some(e),
            ForgeError::RetriesExhausted { last, .. } => Some(last),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ForgeError>;
