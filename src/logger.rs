//! Leveled file logger for forge
//!
//! Every pipeline stage reports through the `log_*!` macros. Messages go to
//! the log file; errors are always echoed to stderr, debug output only when
//! running verbose.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "off" | "none" => LogLevel::Off,
            "error" => LogLevel::Error,
            "warn" | "warning" => LogLevel::Warn,
            "info" => LogLevel::Info,
            "debug" | "trace" => LogLevel::Debug,
            _ => LogLevel::Info,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Off => "OFF",
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        };
        f.pad(s)
    }
}

static LOGGER: Mutex<Option<Logger>> = Mutex::new(None);

pub struct Logger {
    level: LogLevel,
    log_file: Option<PathBuf>,
    verbose: bool,
}

impl Logger {
    /// Install the process logger, replacing any previous one
    pub fn init(level: LogLevel, log_file: Option<PathBuf>, verbose: bool) {
        if let Ok(mut logger) = LOGGER.lock() {
            *logger = Some(Logger {
                level,
                log_file,
                verbose,
            });
        }
    }

    pub fn default_log_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
            .join("forge")
            .join("forge.log")
    }

    fn format_line(level: LogLevel, message: &str) -> String {
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        format!("[{}] {:<5} {}\n", timestamp, level, message)
    }

    fn log(&self, level: LogLevel, message: &str) {
        if level == LogLevel::Off || level > self.level {
            return;
        }

        let line = Self::format_line(level, message);

        if let Some(ref path) = self.log_file {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).ok();
            }
            if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
                file.write_all(line.as_bytes()).ok();
            }
        }

        if level == LogLevel::Error || (self.verbose && level == LogLevel::Debug) {
            eprint!("{}", line);
        }
    }
}

pub fn log(level: LogLevel, message: &str) {
    if let Ok(guard) = LOGGER.lock() {
        if let Some(ref logger) = *guard {
            logger.log(level, message);
        }
    }
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::logger::log($crate::logger::LogLevel::Error, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::logger::log($crate::logger::LogLevel::Warn, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logger::log($crate::logger::LogLevel::Info, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::logger::log($crate::logger::LogLevel::Debug, &format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_from_str() {
        assert_eq!(LogLevel::from_str("debug"), LogLevel::Debug);
        assert_eq!(LogLevel::from_str("TRACE"), LogLevel::Debug);
        assert_eq!(LogLevel::from_str("warning"), LogLevel::Warn);
        assert_eq!(LogLevel::from_str("none"), LogLevel::Off);
        assert_eq!(LogLevel::from_str("INFO"), LogLevel::Info);
        assert_eq!(LogLevel::from_str("loud"), LogLevel::Info);
    }

    #[test]
    fn test_level_filtering_writes_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("logs/forge.log");
        let logger = Logger {
            level: LogLevel::Warn,
            log_file: Some(path.clone()),
            verbose: false,
        };

        logger.log(LogLevel::Info, "skipped");
        logger.log(LogLevel::Warn, "denylist fallback");

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("WARN  denylist fallback"));
        assert!(!content.contains("skipped"));
    }
}
