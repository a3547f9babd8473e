//! API key rotation and retry with exponential backoff.
//!
//! Each outbound call runs `max_retries + 1` attempts at most. Failures carry
//! a typed `Disposition`: fatal errors return at once, retryable ones back
//! off, and rate/quota errors also advance the key ring before the next try.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::Serialize;

use super::{CompletionOptions, CompletionRequest, GenerativeBackend};
use crate::error::{ApiError, Disposition, ForgeError, Result};
use crate::{log_info, log_warn};

/// Round-robin set of API keys
#[derive(Debug)]
pub struct KeyRing {
    keys: Vec<String>,
    current: AtomicUsize,
}

impl KeyRing {
    pub fn new(keys: Vec<String>) -> Self {
        let keys = keys
            .into_iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        Self {
            keys,
            current: AtomicUsize::new(0),
        }
    }

    /// Start at a previously persisted index (wrapped into range)
    pub fn with_start_index(self, index: usize) -> Self {
        if !self.keys.is_empty() {
            self.current.store(index % self.keys.len(), Ordering::SeqCst);
        }
        self
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn current_index(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    pub fn current_key(&self) -> Option<&str> {
        self.keys.get(self.current_index()).map(|k| k.as_str())
    }

    pub fn key_at(&self, index: usize) -> Option<&str> {
        self.keys.get(index).map(|k| k.as_str())
    }

    /// Advance to the next key. Returns false, changing nothing, with one key or none.
    pub fn rotate(&self) -> bool {
        let len = self.keys.len();
        if len <= 1 {
            log_warn!("Cannot rotate key: only {} API key(s) available", len);
            return false;
        }
        let previous = self
            .current
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |i| Some((i + 1) % len))
            .unwrap_or(0);
        log_info!(
            "API key rotated: from={} to={} total={}",
            previous,
            (previous + 1) % len,
            len
        );
        true
    }
}

/// Backoff schedule
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub backoff_multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            backoff_multiplier: 2,
        }
    }
}

impl RetryPolicy {
    /// Delay after the failed attempt `attempt` (0-based): base * multiplier^attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor)
    }
}

/// Snapshot of the manager for `keys status`
#[derive(Debug, Clone, Serialize)]
pub struct ApiStats {
    pub backend: String,
    pub model: String,
    pub total_keys: usize,
    pub current_key_index: usize,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub backoff_multiplier: u32,
}

/// Outcome of probing one key
#[derive(Debug, Clone, Serialize)]
pub struct KeyProbe {
    pub index: usize,
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Retry and key-rotation wrapper around a backend
pub struct ApiManager {
    backend: Box<dyn GenerativeBackend>,
    keys: KeyRing,
    policy: RetryPolicy,
}

impl ApiManager {
    pub fn new(backend: Box<dyn GenerativeBackend>, keys: KeyRing, policy: RetryPolicy) -> Self {
        Self {
            backend,
            keys,
            policy,
        }
    }

    pub fn keys(&self) -> &KeyRing {
        &self.keys
    }

    pub fn stats(&self) -> ApiStats {
        ApiStats {
            backend: self.backend.name().to_string(),
            model: self.backend.model().to_string(),
            total_keys: self.keys.len(),
            current_key_index: self.keys.current_index(),
            max_retries: self.policy.max_retries,
            base_delay_ms: self.policy.base_delay.as_millis() as u64,
            backoff_multiplier: self.policy.backoff_multiplier,
        }
    }

    pub async fn complete(&self, system: &str, prompt: &str, options: CompletionOptions) -> Result<String> {
        let request = CompletionRequest::new(system, prompt).with_options(options);
        self.execute_with_retry(&request).await
    }

    async fn execute_with_retry(&self, request: &CompletionRequest) -> Result<String> {
        let mut last_error: Option<ApiError> = None;

        for attempt in 0..=self.policy.max_retries {
            let key = self.keys.current_key().ok_or_else(ApiError::no_api_keys)?;

            let err = match self.backend.complete(key, request).await {
                Ok(text) => return Ok(text),
                Err(err) => err,
            };

            let rotate = match err.disposition() {
                Disposition::Fatal => return Err(err.into()),
                Disposition::RetryWithRotatedKey => true,
                Disposition::Retry => false,
            };

            // Rotate only when another attempt follows.
            if attempt < self.policy.max_retries {
                if rotate {
                    self.keys.rotate();
                }
                let delay = self.policy.delay_for(attempt);
                log_warn!(
                    "Retrying API request: attempt={}/{} delay_ms={} error={}",
                    attempt + 1,
                    self.policy.max_retries,
                    delay.as_millis(),
                    err.message
                );
                tokio::time::sleep(delay).await;
            }
            last_error = Some(err);
        }

        let last = last_error.unwrap_or_else(|| ApiError::from_message("no attempts were made"));
        Err(ForgeError::RetriesExhausted {
            attempts: self.policy.max_retries + 1,
            last,
        })
    }

    /// Send a tiny request with every key, without retries or rotation
    pub async fn validate_keys(&self) -> Vec<KeyProbe> {
        let request = CompletionRequest::new("Reply with the single word: ok", "Test connection")
            .with_options(CompletionOptions {
                temperature: 0.0,
                max_tokens: 8,
            });

        let mut probes = Vec::with_capacity(self.keys.len());
        for index in 0..self.keys.len() {
            let Some(key) = self.keys.key_at(index) else {
                continue;
            };
            let probe = match self.backend.complete(key, &request).await {
                Ok(_) => KeyProbe {
                    index,
                    valid: true,
                    error: None,
                },
                Err(e) => KeyProbe {
                    index,
                    valid: false,
                    error: Some(e.message),
                },
            };
            probes.push(probe);
        }

        log_info!(
            "API key validation completed: total={} valid={}",
            probes.len(),
            probes.iter().filter(|p| p.valid).count()
        );
        probes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::{ScriptedBackend, SharedBackend};
    use crate::error::ApiErrorCode;
    use std::sync::Arc;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            backoff_multiplier: 2,
        }
    }

    fn keys(n: usize) -> KeyRing {
        KeyRing::new((0..n).map(|i| format!("key-{}", i)).collect())
    }

    fn rate_limited() -> ApiError {
        ApiError::new(ApiErrorCode::RateLimited, "429 rate limit exceeded")
    }

    fn manager(outcomes: Vec<std::result::Result<String, ApiError>>, ring: KeyRing, policy: RetryPolicy) -> (ApiManager, Arc<ScriptedBackend>) {
        let backend = Arc::new(ScriptedBackend::new(outcomes));
        let mgr = ApiManager::new(Box::new(SharedBackend(backend.clone())), ring, policy);
        (mgr, backend)
    }

    #[test]
    fn test_rotation_is_noop_with_single_key() {
        let ring = keys(1);
        assert!(!ring.rotate());
        assert_eq!(ring.current_index(), 0);

        let empty = keys(0);
        assert!(!empty.rotate());
        assert_eq!(empty.current_index(), 0);
        assert!(empty.current_key().is_none());
    }

    #[test]
    fn test_rotation_wraps_round_robin() {
        let ring = keys(3);
        assert!(ring.rotate());
        assert_eq!(ring.current_key(), Some("key-1"));
        assert!(ring.rotate());
        assert!(ring.rotate());
        assert_eq!(ring.current_index(), 0);
    }

    #[test]
    fn test_keyring_trims_and_resumes() {
        let ring = KeyRing::new(vec![" a ".to_string(), "".to_string(), "b".to_string()]).with_start_index(5);
        assert_eq!(ring.len(), 2);
        assert_eq!(ring.current_key(), Some("b"));
    }

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let (mgr, backend) = manager(vec![Ok("done".to_string())], keys(2), fast_policy(3));
        let text = mgr.complete("sys", "user", CompletionOptions::default()).await.unwrap();
        assert_eq!(text, "done");
        assert_eq!(backend.keys_used(), vec!["key-0"]);
        assert_eq!(mgr.keys().current_index(), 0);
    }

    #[tokio::test]
    async fn test_rate_limit_retries_then_succeeds_with_rotation() {
        let max_retries = 3;
        let mut outcomes: Vec<_> = (0..max_retries).map(|_| Err(rate_limited())).collect();
        outcomes.push(Ok("plan".to_string()));

        let (mgr, backend) = manager(outcomes, keys(2), fast_policy(max_retries));
        let text = mgr.complete("sys", "user", CompletionOptions::default()).await.unwrap();

        assert_eq!(text, "plan");
        assert_eq!(backend.keys_used(), vec!["key-0", "key-1", "key-0", "key-1"]);
        assert_eq!(mgr.keys().current_index(), 1);
    }

    #[tokio::test]
    async fn test_server_error_retries_without_rotation() {
        let outcomes = vec![
            Err(ApiError::new(ApiErrorCode::ServerError, "503 service unavailable")),
            Ok("ok".to_string()),
        ];
        let (mgr, backend) = manager(outcomes, keys(2), fast_policy(3));
        assert_eq!(mgr.complete("s", "u", CompletionOptions::default()).await.unwrap(), "ok");
        assert_eq!(backend.keys_used(), vec!["key-0", "key-0"]);
    }

    #[tokio::test]
    async fn test_fatal_error_is_not_retried() {
        let outcomes = vec![
            Err(ApiError::new(ApiErrorCode::InvalidRequest, "malformed request")),
            Ok("never".to_string()),
        ];
        let (mgr, backend) = manager(outcomes, keys(2), fast_policy(3));
        let err = mgr.complete("s", "u", CompletionOptions::default()).await.unwrap_err();

        assert!(matches!(err, ForgeError::Api(ref e) if e.code == ApiErrorCode::InvalidRequest));
        assert_eq!(backend.keys_used().len(), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_last_error() {
        let outcomes = vec![
            Err(rate_limited()),
            Err(rate_limited()),
            Err(ApiError::new(ApiErrorCode::Timeout, "request timeout on final try")),
        ];
        let (mgr, backend) = manager(outcomes, keys(1), fast_policy(2));
        let err = mgr.complete("s", "u", CompletionOptions::default()).await.unwrap_err();

        match err {
            ForgeError::RetriesExhausted { attempts, ref last } => {
                assert_eq!(attempts, 3);
                assert_eq!(last.code, ApiErrorCode::Timeout);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains("request timeout on final try"));
        // Single key: rotation never moves.
        assert_eq!(backend.keys_used(), vec!["key-0", "key-0", "key-0"]);
    }

    #[tokio::test]
    async fn test_final_failure_does_not_rotate() {
        let outcomes = vec![Err(rate_limited()), Err(rate_limited())];
        let (mgr, backend) = manager(outcomes, keys(3), fast_policy(1));
        let err = mgr.complete("s", "u", CompletionOptions::default()).await.unwrap_err();

        assert!(matches!(err, ForgeError::RetriesExhausted { attempts: 2, .. }));
        assert_eq!(backend.keys_used(), vec!["key-0", "key-1"]);
        assert_eq!(mgr.keys().current_index(), 1);
    }

    #[tokio::test]
    async fn test_no_keys_fails_fast() {
        let (mgr, backend) = manager(vec![Ok("x".to_string())], keys(0), fast_policy(3));
        let err = mgr.complete("s", "u", CompletionOptions::default()).await.unwrap_err();
        assert!(matches!(err, ForgeError::Api(ref e) if e.code == ApiErrorCode::NoApiKeys));
        assert!(backend.keys_used().is_empty());
    }

    #[tokio::test]
    async fn test_validate_keys_probes_each_key() {
        let outcomes = vec![
            Ok("ok".to_string()),
            Err(ApiError::new(ApiErrorCode::AuthFailed, "API key not valid")),
        ];
        let (mgr, backend) = manager(outcomes, keys(2), fast_policy(3));
        let probes = mgr.validate_keys().await;

        assert_eq!(probes.len(), 2);
        assert!(probes[0].valid);
        assert!(!probes[1].valid);
        assert_eq!(probes[1].error.as_deref(), Some("API key not valid"));
        assert_eq!(backend.keys_used(), vec!["key-0", "key-1"]);
        assert_eq!(mgr.keys().current_index(), 0);
    }

    #[test]
    fn test_stats() {
        let (mgr, _) = manager(vec![], keys(3), RetryPolicy::default());
        let stats = mgr.stats();
        assert_eq!(stats.total_keys, 3);
        assert_eq!(stats.max_retries, 3);
        assert_eq!(stats.base_delay_ms, 1000);
        assert_eq!(stats.model, "scripted-model");
    }
}
