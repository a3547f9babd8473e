//! Generative backend abstraction and the retry/rotation layer around it

mod gemini;
mod retry;

pub use gemini::{GeminiBackend, DEFAULT_API_BASE};
pub use retry::{ApiManager, KeyRing, RetryPolicy};

use async_trait::async_trait;
use serde::Serialize;

use crate::error::ApiError;

/// Generation parameters for one completion
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            max_tokens: 2048,
        }
    }
}

/// One system + user prompt pair sent to the backend
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub system: String,
    pub prompt: String,
    pub options: CompletionOptions,
}

impl CompletionRequest {
    pub fn new(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            prompt: prompt.into(),
            options: CompletionOptions::default(),
        }
    }

    pub fn with_options(mut self, options: CompletionOptions) -> Self {
        self.options = options;
        self
    }
}

/// A text-completion service reachable with an API key
#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    /// Name for logging/identification
    fn name(&self) -> &str;

    /// Model identifier used for requests
    fn model(&self) -> &str;

    /// Run one completion with the given key
    async fn complete(&self, api_key: &str, request: &CompletionRequest) -> Result<String, ApiError>;
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted backend for tests

    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Replays queued outcomes and records which key each call used
    pub struct ScriptedBackend {
        outcomes: Mutex<VecDeque<Result<String, ApiError>>>,
        pub calls: Mutex<Vec<(String, CompletionRequest)>>,
    }

    impl ScriptedBackend {
        pub fn new(outcomes: Vec<Result<String, ApiError>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn keys_used(&self) -> Vec<String> {
            self.calls.lock().unwrap().iter().map(|(k, _)| k.clone()).collect()
        }

        pub fn last_prompt(&self) -> Option<String> {
            self.calls.lock().unwrap().last().map(|(_, r)| r.prompt.clone())
        }
    }

    #[async_trait]
    impl GenerativeBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        fn model(&self) -> &str {
            "scripted-model"
        }

        async fn complete(&self, api_key: &str, request: &CompletionRequest) -> Result<String, ApiError> {
            self.calls
                .lock()
                .unwrap()
                .push((api_key.to_string(), request.clone()));
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ApiError::from_message("script exhausted")))
        }
    }

    /// Lets a test keep a handle on the backend it hands to the manager
    pub struct SharedBackend(pub Arc<ScriptedBackend>);

    #[async_trait]
    impl GenerativeBackend for SharedBackend {
        fn name(&self) -> &str {
            self.0.name()
        }

        fn model(&self) -> &str {
            self.0.model()
        }

        async fn complete(&self, api_key: &str, request: &CompletionRequest) -> Result<String, ApiError> {
            self.0.complete(api_key, request).await
        }
    }
}
