//! Logging and Diagnostics
//!
//! Warnings and errors raised by the harness go to `tracing` and are also
//! kept in a per-context [`Diagnostics`] log so a runner (or a test) can
//! attach them to results and count them. Failures of tasks that have no
//! caller to return to are also held as the context's uncaught error until
//! the next harness call takes it.

use crate::result::SettleError;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::rc::Rc;
use tracing_subscriber::EnvFilter;

/// Environment variable consulted by [`init_tracing`]
pub const LOG_ENV: &str = "SETTLE_LOG";

/// Install a formatted `tracing` subscriber.
///
/// The filter comes from `SETTLE_LOG`, then `RUST_LOG`, then `warn`. Calling
/// this more than once is harmless.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Console log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsoleLevel {
    /// Informational
    Info,
    /// Warning
    Warn,
    /// Error
    Error,
}

impl ConsoleLevel {
    /// Prefix for terminal output
    #[must_use]
    pub fn prefix(&self) -> &'static str {
        match self {
            ConsoleLevel::Info => "[INFO]",
            ConsoleLevel::Warn => "[WARN]",
            ConsoleLevel::Error => "[ERROR]",
        }
    }
}

/// A single recorded message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleEntry {
    /// Log level
    pub level: ConsoleLevel,
    /// Message text
    pub message: String,
}

impl std::fmt::Display for ConsoleEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.level.prefix(), self.message)
    }
}

/// Shared diagnostics log
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    entries: Rc<RefCell<Vec<ConsoleEntry>>>,
    uncaught: Rc<RefCell<Option<String>>>,
}

impl Diagnostics {
    /// Create an empty log
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record and emit an informational message
    pub fn info(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("{message}");
        self.push(ConsoleLevel::Info, message);
    }

    /// Record and emit a warning
    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{message}");
        self.push(ConsoleLevel::Warn, message);
    }

    /// Record and emit an error
    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!("{message}");
        self.push(ConsoleLevel::Error, message);
    }

    /// Record a failed task as an error and keep the first one as the
    /// uncaught error
    pub fn task_failed(&self, message: impl Into<String>) {
        let message = message.into();
        self.uncaught.borrow_mut().get_or_insert_with(|| message.clone());
        self.error(message);
    }

    /// Take the uncaught task error, if any
    pub fn take_task_error(&self) -> Option<SettleError> {
        self.uncaught
            .borrow_mut()
            .take()
            .map(|message| SettleError::TaskFailed { message })
    }

    fn push(&self, level: ConsoleLevel, message: String) {
        self.entries.borrow_mut().push(ConsoleEntry { level, message });
    }

    /// All entries in order
    #[must_use]
    pub fn entries(&self) -> Vec<ConsoleEntry> {
        self.entries.borrow().clone()
    }

    /// Messages recorded at `level`
    #[must_use]
    pub fn messages(&self, level: ConsoleLevel) -> Vec<String> {
        self.entries
            .borrow()
            .iter()
            .filter(|e| e.level == level)
            .map(|e| e.message.clone())
            .collect()
    }

    /// Warning messages
    #[must_use]
    pub fn warnings(&self) -> Vec<String> {
        self.messages(ConsoleLevel::Warn)
    }

    /// Error messages
    #[must_use]
    pub fn errors(&self) -> Vec<String> {
        self.messages(ConsoleLevel::Error)
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Whether nothing was recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Remove and return all entries
    pub fn drain(&self) -> Vec<ConsoleEntry> {
        std::mem::take(&mut *self.entries.borrow_mut())
    }
}
