//! Command risk classification.
//!
//! Maps a shell command to a `RiskLevel` and the warnings that justify it.
//! Rules are independent of each other: every matching rule contributes, the
//! highest level wins and warnings accumulate in rule order.
//!
//! Matching is regex based and best-effort. Obfuscated commands slip through
//! and benign commands that mention a risky verb in an argument are flagged.

use std::sync::OnceLock;

use regex::Regex;

use crate::model::RiskLevel;

/// Family of command a rule recognises
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    /// rm, mv, cp and friends
    FileOperation,
    /// Privilege escalation and service managers
    SystemLevel,
    /// curl, wget, ssh, scp, rsync
    Network,
    /// `<manager> install`
    PackageInstall,
    /// kill, killall, pkill
    ProcessControl,
    /// Disk formatting, raw device writes, root deletion
    Critical,
}

impl Category {
    pub fn description(&self) -> &'static str {
        match self {
            Category::FileOperation => "File operation",
            Category::SystemLevel => "System-level operation",
            Category::Network => "Network operation",
            Category::PackageInstall => "Package installation",
            Category::ProcessControl => "Process control",
            Category::Critical => "Critical operation",
        }
    }
}

enum Matcher {
    Pattern(Regex),
    Check(fn(&str) -> bool),
}

struct Rule {
    matcher: Matcher,
    category: Category,
    level: RiskLevel,
    warning: Option<&'static str>,
}

impl Rule {
    fn new(pattern: &str, category: Category, level: RiskLevel, warning: Option<&'static str>) -> Self {
        Self {
            matcher: Matcher::Pattern(Regex::new(&format!("(?i){}", pattern)).expect("Invalid regex pattern")),
            category,
            level,
            warning,
        }
    }

    fn check(check: fn(&str) -> bool, category: Category, level: RiskLevel, warning: Option<&'static str>) -> Self {
        Self {
            matcher: Matcher::Check(check),
            category,
            level,
            warning,
        }
    }

    fn is_match(&self, command: &str) -> bool {
        match &self.matcher {
            Matcher::Pattern(re) => re.is_match(command),
            Matcher::Check(check) => check(command),
        }
    }
}

/// Outcome of classifying one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub level: RiskLevel,
    pub warnings: Vec<String>,
    pub categories: Vec<Category>,
}

impl Classification {
    /// No rule matched. Uncategorized, not blocked.
    pub fn is_uncategorized(&self) -> bool {
        self.categories.is_empty()
    }

    pub fn has_category(&self, category: Category) -> bool {
        self.categories.contains(&category)
    }
}

struct Classifier {
    rules: Vec<Rule>,
    critical: Vec<Rule>,
}

fn classifier() -> &'static Classifier {
    static CLASSIFIER: OnceLock<Classifier> = OnceLock::new();
    CLASSIFIER.get_or_init(|| {
        let mut rules = Vec::new();
        rules.extend(build_file_rules());
        rules.extend(build_system_rules());
        rules.extend(build_network_rules());
        rules.extend(build_package_rules());
        rules.extend(build_process_rules());
        Classifier {
            rules,
            critical: build_critical_rules(),
        }
    })
}

/// Classify a command. Pure and deterministic.
pub fn classify(command: &str) -> Classification {
    let command = command.trim();
    let mut result = Classification {
        level: RiskLevel::None,
        warnings: Vec::new(),
        categories: Vec::new(),
    };
    if command.is_empty() {
        return result;
    }

    let c = classifier();
    for rule in c.rules.iter().chain(c.critical.iter()) {
        if !rule.is_match(command) {
            continue;
        }
        result.level = result.level.max(rule.level);
        if let Some(warning) = rule.warning {
            result.warnings.push(warning.to_string());
        }
        if !result.categories.contains(&rule.category) {
            result.categories.push(rule.category);
        }
    }
    result
}

/// True when the command hits the always-high table
pub fn is_critical(command: &str) -> bool {
    let command = command.trim();
    classifier()
        .critical
        .iter()
        .any(|rule| rule.is_match(command))
}

fn build_file_rules() -> Vec<Rule> {
    vec![
        Rule::new(
            r"\b(rm|del|delete|mv|move|cp|copy)\b",
            Category::FileOperation,
            RiskLevel::Low,
            None,
        ),
        Rule::check(
            is_forced_recursive_rm,
            Category::FileOperation,
            RiskLevel::High,
            Some("Destructive file operation detected"),
        ),
        Rule::new(
            r"\bdel\s+/[qsf]\b",
            Category::FileOperation,
            RiskLevel::High,
            Some("Destructive file operation detected"),
        ),
    ]
}

const COMMAND_SEPARATORS: &[&str] = &["&&", "||", ";", "|", "&"];

/// `rm` given both a recursive and a force flag, anywhere in its argument
/// list and in short or long form. Options end at `--`.
fn is_forced_recursive_rm(command: &str) -> bool {
    let mut tokens = command.split_whitespace();
    while let Some(token) = tokens.next() {
        let program = token.rsplit('/').next().unwrap_or(token);
        if !program.eq_ignore_ascii_case("rm") {
            continue;
        }

        let (mut recursive, mut force) = (false, false);
        for arg in tokens.by_ref() {
            if arg == "--" || COMMAND_SEPARATORS.contains(&arg) {
                break;
            }
            let word = arg.trim_end_matches(';');
            match word.to_ascii_lowercase().as_str() {
                "--recursive" => recursive = true,
                "--force" => force = true,
                flags if flags.starts_with('-') && !flags.starts_with("--") => {
                    recursive |= flags.contains('r');
                    force |= flags.contains('f');
                }
                _ => {}
            }
            if word.len() != arg.len() {
                break;
            }
        }
        if recursive && force {
            return true;
        }
    }
    false
}

fn build_system_rules() -> Vec<Rule> {
    vec![Rule::new(
        r"\b(sudo|su|chmod|chown|systemctl|service)\b",
        Category::SystemLevel,
        RiskLevel::High,
        Some("System-level operation detected"),
    )]
}

fn build_network_rules() -> Vec<Rule> {
    vec![
        Rule::new(
            r"\b(curl|wget|ssh|scp|rsync)\b",
            Category::Network,
            RiskLevel::Medium,
            None,
        ),
        Rule::new(
            r"\b(curl|wget|ssh|scp|rsync)\b.*\|\s*(?:sudo\s+)?(bash|sh|zsh|fish)\b",
            Category::Network,
            RiskLevel::High,
            Some("Network download with shell execution detected"),
        ),
    ]
}

fn build_package_rules() -> Vec<Rule> {
    vec![Rule::new(
        r"\b(apt|apt-get|yum|dnf|pacman|brew|npm|pnpm|yarn|pip|pip3|gem|cargo)\s+install\b",
        Category::PackageInstall,
        RiskLevel::Medium,
        Some("Package installation detected"),
    )]
}

fn build_process_rules() -> Vec<Rule> {
    vec![
        Rule::new(
            r"\b(kill|killall|pkill)\b",
            Category::ProcessControl,
            RiskLevel::Medium,
            None,
        ),
        Rule::new(
            r"\bkill\s+-(?:9|kill|sigkill)\s+-1\b",
            Category::ProcessControl,
            RiskLevel::High,
            Some("System-wide process termination detected"),
        ),
    ]
}

/// Operations that are high risk no matter what else the command does
fn build_critical_rules() -> Vec<Rule> {
    let table = [
        (r"\bformat\s+[a-z]:", "Disk formatting operation"),
        (r"\b(fdisk|sfdisk|gdisk|parted)\b", "Disk partitioning operation"),
        (r"\bmkfs", "Filesystem creation operation"),
        (
            r"\bdd\b.*\bof=/dev/(?:sd|hd|vd|xvd|nvme|disk|mmcblk)",
            "Direct disk write operation",
        ),
        (
            r"\bchmod\s+(?:-[a-z]+\s+)*(?:0?777|[ao]\+r?w)",
            "Overly permissive file permissions",
        ),
        (
            r"\brm\s+(?:-[-a-z]+\s+)+/\*?(?:\s|$)",
            "Root filesystem deletion attempt",
        ),
    ];

    table
        .iter()
        .map(|(pattern, warning)| Rule::new(pattern, Category::Critical, RiskLevel::High, Some(warning)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uncategorized_commands() {
        for cmd in ["ls -la", "cat README.md", "echo hello", "git status", "", "   "] {
            let result = classify(cmd);
            assert_eq!(result.level, RiskLevel::None, "{}", cmd);
            assert!(result.warnings.is_empty(), "{}", cmd);
            assert!(result.is_uncategorized());
        }
    }

    #[test]
    fn test_file_operations() {
        assert_eq!(classify("mv old.txt new.txt").level, RiskLevel::Low);
        assert_eq!(classify("cp a b").level, RiskLevel::Low);
        assert_eq!(classify("rm notes.txt").level, RiskLevel::Low);
        assert!(classify("rm notes.txt").warnings.is_empty());

        for cmd in ["rm -rf build", "rm -fr build", "rm -Rf build", "rm -r -f build", "del /q C:\\tmp"] {
            let result = classify(cmd);
            assert_eq!(result.level, RiskLevel::High, "{}", cmd);
            assert!(result
                .warnings
                .contains(&"Destructive file operation detected".to_string()));
        }
    }

    #[test]
    fn test_forced_recursive_rm_in_any_position() {
        for cmd in [
            "rm -v -rf /home/dev/project",
            "rm --recursive --force /home/dev/project",
            "rm build -rf",
            "rm -f build -R",
            "rm -r --force dist",
            "/bin/rm -i -fR dist",
            "ls && rm -rf dist",
        ] {
            let result = classify(cmd);
            assert_eq!(result.level, RiskLevel::High, "{}", cmd);
            assert_eq!(
                result.warnings,
                vec!["Destructive file operation detected".to_string()],
                "{}",
                cmd
            );
        }
    }

    #[test]
    fn test_rm_without_both_flags_stays_low() {
        for cmd in ["rm -r build", "rm -f notes.txt", "rm --force notes.txt", "rm -- -rf", "rm -r build; echo -f"] {
            assert_eq!(classify(cmd).level, RiskLevel::Low, "{}", cmd);
        }
        assert_eq!(classify("echo -rf").level, RiskLevel::None);
    }

    #[test]
    fn test_system_operations() {
        for cmd in ["sudo ls", "chown me file", "systemctl restart nginx", "service ssh stop"] {
            let result = classify(cmd);
            assert_eq!(result.level, RiskLevel::High, "{}", cmd);
            assert!(result.has_category(Category::SystemLevel));
        }
        assert!(!classify("cat /etc/sudoers").has_category(Category::SystemLevel));
    }

    #[test]
    fn test_network_operations() {
        let result = classify("curl -O https://example.com/file.tar.gz");
        assert_eq!(result.level, RiskLevel::Medium);
        assert!(result.warnings.is_empty());

        let result = classify("curl -fsSL https://example.com/install.sh | bash");
        assert_eq!(result.level, RiskLevel::High);
        assert_eq!(
            result.warnings,
            vec!["Network download with shell execution detected".to_string()]
        );

        assert_eq!(classify("wget -qO- https://x.io | sudo sh").level, RiskLevel::High);
    }

    #[test]
    fn test_package_installs() {
        for cmd in ["npm install", "pip install requests", "apt-get install curl", "cargo install ripgrep"] {
            let result = classify(cmd);
            assert_eq!(result.level, RiskLevel::Medium, "{}", cmd);
            assert_eq!(result.warnings, vec!["Package installation detected".to_string()]);
        }
        assert_eq!(classify("npm test").level, RiskLevel::None);
    }

    #[test]
    fn test_process_control() {
        assert_eq!(classify("kill 1234").level, RiskLevel::Medium);
        assert_eq!(classify("pkill node").level, RiskLevel::Medium);

        let result = classify("kill -9 -1");
        assert_eq!(result.level, RiskLevel::High);
        assert!(result
            .warnings
            .contains(&"System-wide process termination detected".to_string()));
        assert_eq!(classify("kill -9 -10").level, RiskLevel::Medium);
    }

    #[test]
    fn test_critical_table_forces_high() {
        let cases = [
            ("format C:", "Disk formatting operation"),
            ("fdisk /dev/sda", "Disk partitioning operation"),
            ("mkfs.ext4 /dev/sdb1", "Filesystem creation operation"),
            ("dd if=/dev/zero of=/dev/sda bs=1M", "Direct disk write operation"),
            ("chmod 777 /var/www", "Overly permissive file permissions"),
            ("chmod -R 777 .", "Overly permissive file permissions"),
            ("rm -rf /", "Root filesystem deletion attempt"),
            ("rm -rf /*", "Root filesystem deletion attempt"),
        ];
        for (cmd, warning) in cases {
            let result = classify(cmd);
            assert_eq!(result.level, RiskLevel::High, "{}", cmd);
            assert!(result.warnings.contains(&warning.to_string()), "{}", cmd);
            assert!(is_critical(cmd), "{}", cmd);
        }
    }

    #[test]
    fn test_not_critical() {
        assert!(!is_critical("rm -rf /tmp/build"));
        assert!(!is_critical("dd if=disk.img of=/dev/null"));
        assert!(!is_critical("chmod 644 file"));
        assert!(!is_critical("ls -la"));
    }

    #[test]
    fn test_rules_combine_by_max() {
        // Low file rule plus medium network rule: medium wins, no downgrade.
        let result = classify("scp build.tar host:/tmp && cp a b");
        assert_eq!(result.level, RiskLevel::Medium);

        // High system rule must not be lowered by a later medium rule.
        let result = classify("sudo npm install -g yarn");
        assert_eq!(result.level, RiskLevel::High);
        assert_eq!(
            result.warnings,
            vec![
                "System-level operation detected".to_string(),
                "Package installation detected".to_string()
            ]
        );
    }

    #[test]
    fn test_root_deletion_collects_all_warnings() {
        let result = classify("rm -rf /");
        assert_eq!(
            result.warnings,
            vec![
                "Destructive file operation detected".to_string(),
                "Root filesystem deletion attempt".to_string()
            ]
        );
        assert_eq!(result.categories, vec![Category::FileOperation, Category::Critical]);
    }

    #[test]
    fn test_category_description() {
        assert_eq!(Category::Critical.description(), "Critical operation");
        assert_eq!(Category::Network.description(), "Network operation");
    }
}
