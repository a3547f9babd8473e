//! Restricted subprocess execution for validated steps.

use std::env;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant, SystemTime};

use chrono::Utc;
use tokio::process::Command;

use crate::error::{Result, SandboxError};
use crate::model::{ExecutionResult, Step};
use crate::{log_debug, log_info, log_warn};

/// Subdirectories created under the sandbox root
const LAYOUT: &[&str] = &["tmp", "logs", "workspace"];

/// Environment variables passed through from the parent process
const INHERITED_ENV: &[&str] = &["LANG", "LC_ALL", "TERM", "TZ"];

const SANDBOX_PATH: &str = "/usr/local/bin:/usr/bin:/bin";
const SANDBOX_USER: &str = "forge-user";

/// Temp files older than this are removed by `cleanup`
const TMP_MAX_AGE: Duration = Duration::from_secs(60 * 60);

/// Runs one step at a time as a direct program invocation
pub struct SandboxExecutor {
    root: PathBuf,
    default_timeout: Duration,
    allowed_roots: Vec<PathBuf>,
}

impl SandboxExecutor {
    pub fn new(root: impl Into<PathBuf>, default_timeout: Duration) -> Self {
        let root = normalize(&root.into());
        let mut candidates = vec![root.clone()];
        if let Ok(cwd) = env::current_dir() {
            candidates.push(cwd);
        }
        if let Some(home) = dirs::home_dir() {
            candidates.push(home);
        }

        Self {
            root,
            default_timeout,
            allowed_roots: allowed_roots(candidates),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_allowed_roots(mut self, roots: Vec<PathBuf>) -> Self {
        self.allowed_roots = allowed_roots(roots);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the sandbox root and its fixed layout
    pub fn initialize(&self) -> Result<()> {
        for sub in LAYOUT {
            fs::create_dir_all(self.root.join(sub)).map_err(SandboxError::from)?;
        }
        log_info!("Sandbox initialized at {}", self.root.display());
        Ok(())
    }

    /// Absolute, lexically normalised directory a step would run in
    pub fn resolve_directory(&self, dir: &Path) -> PathBuf {
        if dir.as_os_str().is_empty() {
            return self.root.clone();
        }
        if dir.is_absolute() {
            normalize(dir)
        } else {
            let base = env::current_dir().unwrap_or_else(|_| self.root.clone());
            normalize(&base.join(dir))
        }
    }

    pub fn is_allowed(&self, dir: &Path) -> bool {
        self.allowed_roots.iter().any(|root| dir.starts_with(root))
    }

    /// Execute a step. Every failure is reported inside the result.
    pub async fn execute_step(&self, step: &Step) -> ExecutionResult {
        let start = Instant::now();
        let dir = self.resolve_directory(&step.working_directory);
        let timeout = if step.timeout_ms == 0 {
            self.default_timeout
        } else {
            step.timeout()
        };

        log_debug!("Executing step {} in {}: {}", step.id, dir.display(), step.command);

        match self.run(&step.command, &dir, timeout).await {
            Ok(output) => {
                let exit_code = output.status.code().unwrap_or(-1);
                let result = ExecutionResult {
                    step_id: step.id.clone(),
                    command: step.command.clone(),
                    exit_code,
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                    duration_ms: elapsed_ms(start),
                    working_directory: dir,
                    success: output.status.success(),
                    error: None,
                    timestamp: Utc::now(),
                };
                log_info!(
                    "Step {} finished: exit_code={} duration_ms={}",
                    result.step_id,
                    result.exit_code,
                    result.duration_ms
                );
                result
            }
            Err(e) => {
                log_warn!("Step {} failed: {}", step.id, e);
                ExecutionResult::failed(&step.id, &step.command, dir, elapsed_ms(start), e.to_string())
            }
        }
    }

    async fn run(
        &self,
        command: &str,
        dir: &Path,
        timeout: Duration,
    ) -> std::result::Result<std::process::Output, SandboxError> {
        if !self.is_allowed(dir) {
            return Err(SandboxError::DirectoryNotAllowed(dir.to_path_buf()));
        }

        let mut parts = command.split_whitespace();
        let program = parts.next().ok_or(SandboxError::EmptyCommand)?;

        fs::create_dir_all(dir)?;

        let mut cmd = Command::new(program);
        cmd.args(parts)
            .current_dir(dir)
            .env_clear()
            .envs(INHERITED_ENV.iter().filter_map(|k| env::var(k).ok().map(|v| (*k, v))))
            .env("PATH", SANDBOX_PATH)
            .env("HOME", &self.root)
            .env("TMPDIR", self.root.join("tmp"))
            .env("USER", SANDBOX_USER)
            .env("SHELL", "/bin/sh")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|source| SandboxError::Spawn {
            program: program.to_string(),
            source,
        })?;

        // Dropping the wait future on expiry drops the child, which kills it.
        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(output) => Ok(output?),
            Err(_) => Err(SandboxError::Timeout(timeout.as_millis() as u64)),
        }
    }

    /// Remove stale files from the sandbox tmp directory
    pub fn cleanup(&self) -> usize {
        let tmp = self.root.join("tmp");
        let entries = match fs::read_dir(&tmp) {
            Ok(entries) => entries,
            Err(e) => {
                log_warn!("Sandbox cleanup skipped for {}: {}", tmp.display(), e);
                return 0;
            }
        };

        let now = SystemTime::now();
        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            let stale = entry
                .metadata()
                .ok()
                .filter(|m| m.is_file())
                .and_then(|m| m.modified().ok())
                .and_then(|modified| now.duration_since(modified).ok())
                .is_some_and(|age| age > TMP_MAX_AGE);
            if !stale {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => log_warn!("Failed to remove {}: {}", path.display(), e),
            }
        }

        log_info!("Sandbox cleanup removed {} file(s)", removed);
        removed
    }
}

fn allowed_roots(candidates: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut roots: Vec<PathBuf> = candidates
        .iter()
        .map(|p| normalize(p))
        .filter(|p| p.is_absolute() && p.parent().is_some())
        .collect();
    roots.dedup();
    roots
}

/// Resolve `.` and `..` without touching the filesystem
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}
