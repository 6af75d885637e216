//! Tracing setup and debug helpers
//!
//! Provides structured logging with scoped filtering for debugging load,
//! save and state transition issues.
//!
//! # Usage
//!
//! Configure via RUST_LOG environment variable:
//! - `RUST_LOG=debug` - all debug logs
//! - `RUST_LOG=message=debug,document=debug` - scoped filtering
//! - `RUST_LOG=quill::saver=trace` - module-level filtering
//!
//! # Log Files
//!
//! Logs are written to `~/.config/quill/logs/quill.log` with daily rotation.
//! File logging uses debug level by default for more verbose troubleshooting.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::model::{Container, TabState};

/// Initialize tracing subscriber with console and file logging
///
/// Console output respects RUST_LOG and goes to stderr, so command output on
/// stdout stays clean. `default_level` applies when RUST_LOG is unset.
pub fn init(default_level: &str) {
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_line_number(true)
        .with_filter(console_filter);

    // File layer - always debug level for troubleshooting
    let file_layer = match crate::config_paths::ensure_logs_dir() {
        Ok(logs_dir) => {
            let file_appender =
                tracing_appender::rolling::daily(logs_dir, crate::config_paths::LOG_FILE_PREFIX);
            Some(
                fmt::layer()
                    .with_writer(file_appender)
                    .with_ansi(false)
                    .with_target(true)
                    .with_line_number(true)
                    .with_filter(EnvFilter::new("debug")),
            )
        }
        Err(e) => {
            eprintln!("Warning: Could not initialize file logging: {}", e);
            None
        }
    };

    // A second init (tests, embedding) keeps the first subscriber
    let _ = tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init();
}

/// Lightweight snapshot of a container for diffing around an update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSnapshot {
    pub state: TabState,
    pub revision: u64,
    pub modified: bool,
    pub line: usize,
    pub column: usize,
    pub auto_save_armed: bool,
}

impl DocumentSnapshot {
    pub fn from_container(container: &Container) -> Self {
        Self {
            state: container.state,
            revision: container.document.revision,
            modified: container.document.is_modified,
            line: container.document.cursor.line,
            column: container.document.cursor.column,
            auto_save_armed: container.auto_save.is_armed(),
        }
    }

    /// Generate a diff description between two snapshots
    pub fn diff(&self, other: &DocumentSnapshot) -> Option<String> {
        let mut changes = Vec::new();
        if self.state != other.state {
            changes.push(format!("state: {:?} → {:?}", self.state, other.state));
        }
        if self.revision != other.revision {
            changes.push(format!("revision: {} → {}", self.revision, other.revision));
        }
        if self.modified != other.modified {
            let status = if other.modified { "modified" } else { "clean" };
            changes.push(status.to_string());
        }
        if (self.line, self.column) != (other.line, other.column) {
            changes.push(format!(
                "cursor: ({},{}) → ({},{})",
                self.line, self.column, other.line, other.column
            ));
        }
        if self.auto_save_armed != other.auto_save_armed {
            let status = if other.auto_save_armed {
                "armed"
            } else {
                "disarmed"
            };
            changes.push(format!("auto-save {}", status));
        }

        if changes.is_empty() {
            None
        } else {
            Some(changes.join("; "))
        }
    }
}
