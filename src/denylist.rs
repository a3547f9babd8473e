//! Denylist policy store.
//!
//! A policy names exact substrings that block a command, regex patterns that
//! block a command, and substrings that only mark it high risk. Loading never
//! fails: a missing or broken policy file yields the built-in defaults.

use std::fs;
use std::path::{Path, PathBuf};

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::{log_debug, log_warn};

/// Policy document as written on disk
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DenylistPolicy {
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default, alias = "high_risk")]
    pub high_risk: Vec<String>,
}

impl DenylistPolicy {
    pub fn builtin() -> Self {
        let owned = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            commands: owned(&[
                "rm -rf /",
                "rm -rf /*",
                "rm -rf ~",
                "rm -rf $HOME",
                "dd if=/dev/zero",
                "mkfs",
                "fdisk",
                "format",
                "sudo rm",
                "chmod 777",
                "curl | bash",
                "wget | sh",
            ]),
            patterns: owned(&[
                r"rm\s+-rf\s+/",
                r"chmod\s+777\s+",
                r"\|\s*bash",
                r"\|\s*sh",
                r">/dev/sd[a-z]",
            ]),
            high_risk: owned(&[
                "git reset --hard",
                "git clean -fd",
                "npm ci",
                "docker system prune",
            ]),
        }
    }

    /// Parse a policy file. `.json` files are JSON, everything else TOML.
    fn parse(path: &Path, content: &str) -> std::result::Result<Self, String> {
        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        if is_json {
            serde_json::from_str(content).map_err(|e| e.to_string())
        } else {
            toml::from_str(content).map_err(|e| e.to_string())
        }
    }
}

/// Where a loaded denylist came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenylistSource {
    File(PathBuf),
    Builtin,
}

/// Compiled, read-only denylist
#[derive(Debug)]
pub struct Denylist {
    commands: Vec<String>,
    patterns: Vec<(String, Regex)>,
    high_risk: Vec<String>,
    source: DenylistSource,
}

impl Denylist {
    /// Load from `path`, falling back to the built-in policy
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            log_debug!("No denylist file configured, using built-in rules");
            return Self::builtin();
        };

        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                log_warn!("Using default denylist rules: cannot read {}: {}", path.display(), e);
                return Self::builtin();
            }
        };

        match DenylistPolicy::parse(path, &content) {
            Ok(policy) => {
                log_debug!("Loaded denylist from {}", path.display());
                Self::compile(policy, DenylistSource::File(path.to_path_buf()))
            }
            Err(e) => {
                log_warn!("Using default denylist rules: cannot parse {}: {}", path.display(), e);
                Self::builtin()
            }
        }
    }

    pub fn builtin() -> Self {
        Self::compile(DenylistPolicy::builtin(), DenylistSource::Builtin)
    }

    /// Compile patterns case-insensitively; invalid ones are logged and dropped
    pub fn compile(policy: DenylistPolicy, source: DenylistSource) -> Self {
        let patterns = policy
            .patterns
            .into_iter()
            .filter_map(|pattern| {
                match RegexBuilder::new(&pattern).case_insensitive(true).build() {
                    Ok(re) => Some((pattern, re)),
                    Err(e) => {
                        log_warn!("Invalid regex pattern in denylist '{}': {}", pattern, e);
                        None
                    }
                }
            })
            .collect();

        Self {
            commands: policy.commands.into_iter().filter(|c| !c.is_empty()).collect(),
            patterns,
            high_risk: policy.high_risk.into_iter().filter(|c| !c.is_empty()).collect(),
            source,
        }
    }

    pub fn source(&self) -> &DenylistSource {
        &self.source
    }

    /// Reasons this command is blocked; empty when allowed
    pub fn blocked_reasons(&self, command: &str) -> Vec<String> {
        let mut reasons: Vec<String> = self
            .commands
            .iter()
            .filter(|blocked| command.contains(blocked.as_str()))
            .map(|blocked| format!("Blocked command pattern: {}", blocked))
            .collect();

        reasons.extend(
            self.patterns
                .iter()
                .filter(|(_, re)| re.is_match(command))
                .map(|(pattern, _)| format!("Blocked by pattern: {}", pattern)),
        );
        reasons
    }

    /// High-risk substrings present in this command
    pub fn high_risk_matches(&self, command: &str) -> Vec<&str> {
        self.high_risk
            .iter()
            .filter(|risky| command.contains(risky.as_str()))
            .map(|s| s.as_str())
            .collect()
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }
}
