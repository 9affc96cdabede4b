//! Logging and output control
//!
//! This module provides the [`Logger`] for controlling output verbosity, formatting logs,
//! and tracking operation timing. Console output honours quiet/verbose settings; when a
//! run log file is attached every message is also appended there with its level and
//! elapsed time, regardless of console verbosity.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl Level {
    fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        }
    }
}

/// Where a message goes on the console, with its prefix
enum Console {
    Heading,
    Normal(&'static str),
    Verbose(&'static str),
    Stderr(&'static str),
}

/// Logger responsible for all user-visible output
#[derive(Debug, Clone)]
pub struct Logger {
    pub verbose: bool,
    pub quiet: bool,
    pub start_time: Option<Instant>,
    log_file: Option<Arc<Mutex<File>>>,
}

impl Logger {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            quiet: false,
            start_time: Some(Instant::now()),
            log_file: None,
        }
    }

    pub fn new_quiet() -> Self {
        Self {
            verbose: false,
            quiet: true,
            start_time: Some(Instant::now()),
            log_file: None,
        }
    }

    /// Attach an append-only run log file. Falls back to console-only output
    /// (with a warning) when the file cannot be opened.
    pub fn with_log_file(mut self, path: &Path) -> Self {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => self.log_file = Some(Arc::new(Mutex::new(file))),
            Err(e) => self.warning(&format!(
                "Cannot open log file {}: {}, using console only",
                path.display(),
                e
            )),
        }
        self
    }

    pub fn has_log_file(&self) -> bool {
        self.log_file.is_some()
    }

    fn write_file(&self, level: &str, message: &str) {
        let Some(file) = &self.log_file else {
            return;
        };
        let elapsed = self
            .start_time
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or_default();
        if let Ok(mut file) = file.lock() {
            let _ = writeln!(file, "[{:10.3}s] {:<7} {}", elapsed, level, message);
        }
    }

    /// Main section heading
    pub fn section(&self, title: &str) {
        self.emit(Level::Info, &format!("=== {} ===", title), Console::Heading);
    }

    /// Shown only with `--verbose`
    pub fn verbose(&self, message: &str) {
        self.emit(Level::Info, message, Console::Verbose("📝 "));
    }

    /// Per-request detail, shown only with `--verbose`
    pub fn detail(&self, message: &str) {
        self.emit(Level::Debug, message, Console::Verbose("   "));
    }

    pub fn info(&self, message: &str) {
        self.emit(Level::Info, message, Console::Normal("ℹ️  "));
    }

    pub fn step(&self, message: &str) {
        self.emit(Level::Info, message, Console::Normal("▶️  "));
    }

    pub fn success(&self, message: &str) {
        self.emit(Level::Info, message, Console::Normal("✅ "));
    }

    pub fn warning(&self, message: &str) {
        self.emit(Level::Warn, message, Console::Normal("⚠️  WARNING: "));
    }

    /// Errors reach stderr even in quiet mode
    pub fn error(&self, message: &str) {
        self.emit(Level::Error, message, Console::Stderr("❌ ERROR: "));
    }

    fn emit(&self, level: Level, message: &str, console: Console) {
        self.write_file(level.as_str(), message);
        match console {
            Console::Stderr(prefix) => eprintln!("{}{}", prefix, message),
            _ if self.quiet => {}
            Console::Heading => println!("\n{}", message),
            Console::Normal(prefix) => println!("{}{}", prefix, message),
            Console::Verbose(prefix) if self.verbose => println!("{}{}", prefix, message),
            Console::Verbose(_) => {}
        }
    }

    /// Single-line progress update, rewritten in place on a terminal.
    /// Not mirrored to the log file; `ImageProgress::finish` logs the result.
    pub fn progress_line(&self, message: &str) {
        if self.quiet {
            return;
        }
        if self.verbose {
            println!("⏳ {}", message);
        } else {
            print!("\r\x1b[K⏳ {}", message);
            let _ = io::stdout().flush();
        }
    }

    /// Key-value pair summary display
    pub fn summary_kv(&self, title: &str, items: &[(&str, String)]) {
        for (key, value) in items {
            self.write_file("INFO", &format!("{}: {}: {}", title, key, value));
        }
        if !self.quiet {
            println!("\n--- {} ---", title);
            for (key, value) in items {
                println!("  {}: {}", key, value);
            }
        }
    }

    /// Format duration in human-readable format
    pub fn format_duration(&self, duration: Duration) -> String {
        let secs = duration.as_secs();
        if secs < 60 {
            format!("{}s", secs)
        } else if secs < 3600 {
            format!("{}m{}s", secs / 60, secs % 60)
        } else {
            format!("{}h{}m{}s", secs / 3600, (secs % 3600) / 60, secs % 60)
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time
            .map(|t| t.elapsed())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        let logger = Logger::new_quiet();
        assert_eq!(logger.format_duration(Duration::from_secs(42)), "42s");
        assert_eq!(logger.format_duration(Duration::from_secs(125)), "2m5s");
        assert_eq!(logger.format_duration(Duration::from_secs(3725)), "1h2m5s");
    }

    #[test]
    fn test_log_file_receives_all_levels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("download.log");
        let logger = Logger::new_quiet().with_log_file(&path);
        assert!(logger.has_log_file());

        logger.detail("hidden on console");
        logger.warning("disk space");

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("DEBUG   hidden on console"));
        assert!(content.contains("WARN    disk space"));
    }
}
