//! In-memory log backend.
use std::sync::Mutex;

use super::subscriber::{DRY_RUN_TARGET, STAGE_TARGET};
use super::types::{Log, TaskEntry, TaskStatus};

/// Severity of a captured message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    /// Stage header.
    Stage,
    /// Informational.
    Info,
    /// Debug.
    Debug,
    /// Warning.
    Warn,
    /// Error.
    Error,
    /// Dry-run prediction.
    DryRun,
}

/// A [`Log`] that captures every message in memory.
///
/// Messages are also forwarded to `tracing` so a subscriber, if installed,
/// still sees them.
#[derive(Debug, Default)]
pub struct BufferedLog {
    entries: Mutex<Vec<(Level, String)>>,
    tasks: Mutex<Vec<TaskEntry>>,
}

/// Implement the display methods of [`Log`] by capturing each message with
/// its [`Level`].
macro_rules! buffer_log_methods {
    ($($method:ident => $variant:ident),+ $(,)?) => {
        $(
            fn $method(&self, msg: &str) {
                self.push(Level::$variant, msg);
            }
        )+
    };
}

impl BufferedLog {
    /// Create an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, level: Level, msg: &str) {
        match level {
            Level::Stage => tracing::info!(target: STAGE_TARGET, "{msg}"),
            Level::Info => tracing::info!("{msg}"),
            Level::Debug => tracing::debug!("{msg}"),
            Level::Warn => tracing::warn!("{msg}"),
            Level::Error => tracing::error!("{msg}"),
            Level::DryRun => tracing::info!(target: DRY_RUN_TARGET, "{msg}"),
        }
        if let Ok(mut guard) = self.entries.lock() {
            guard.push((level, msg.to_string()));
        }
    }

    /// All captured messages in order.
    #[must_use]
    pub fn entries(&self) -> Vec<(Level, String)> {
        self.entries.lock().map_or_else(|_| vec![], |g| g.clone())
    }

    /// Captured messages at `level`.
    #[must_use]
    pub fn messages(&self, level: Level) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m)
            .collect()
    }

    /// Recorded task results.
    #[must_use]
    pub fn task_entries(&self) -> Vec<TaskEntry> {
        self.tasks.lock().map_or_else(|_| vec![], |g| g.clone())
    }
}

impl Log for BufferedLog {
    buffer_log_methods! {
        stage   => Stage,
        info    => Info,
        debug   => Debug,
        warn    => Warn,
        error   => Error,
        dry_run => DryRun,
    }

    fn record_task(&self, name: &str, status: TaskStatus, message: Option<&str>) {
        if let Ok(mut guard) = self.tasks.lock() {
            guard.push(TaskEntry {
                name: name.to_string(),
                status,
                message: message.map(String::from),
            });
        }
    }
}
