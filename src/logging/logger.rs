//! Structured logger with dry-run awareness, progress line, and summary
//! collection.
use std::io::{IsTerminal as _, Write as _};
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use super::subscriber::{DRY_RUN_TARGET, STAGE_TARGET};
use super::types::{Log, TaskEntry, TaskStatus};
use super::utils::{fit_to_width, log_file_path, terminal_columns};

/// Implement the display methods of [`Log`] by delegating to inherent methods
/// of the same name on the implementing type.
macro_rules! forward_log_methods {
    ($($method:ident),+ $(,)?) => {
        $(
            fn $method(&self, msg: &str) {
                self.$method(msg);
            }
        )+
    };
}

/// Structured logger with dry-run awareness and summary collection.
///
/// Every message is also written to `$XDG_CACHE_HOME/dotfiles/<command>.log`
/// by the file layer installed in
/// [`init_subscriber`](super::subscriber::init_subscriber).
#[derive(Debug)]
pub struct Logger {
    tasks: Mutex<Vec<TaskEntry>>,
    log_file: PathBuf,
    progress_enabled: bool,
    /// Whether a progress line is currently on screen.
    progress_shown: Mutex<bool>,
}

impl Logger {
    /// Create a new logger.
    ///
    /// The progress line is drawn only when `progress` is set and stdout is
    /// a terminal. This constructor does not touch the filesystem.
    #[must_use]
    pub fn new(command: &str, progress: bool) -> Self {
        Self::build(command, progress && std::io::stdout().is_terminal())
    }

    fn build(command: &str, progress_enabled: bool) -> Self {
        Self {
            tasks: Mutex::new(Vec::new()),
            log_file: log_file_path(command),
            progress_enabled,
            progress_shown: Mutex::new(false),
        }
    }

    /// Log an error message.
    pub fn error(&self, msg: &str) {
        self.clear_progress();
        tracing::error!("{msg}");
    }

    /// Log a warning message.
    pub fn warn(&self, msg: &str) {
        self.clear_progress();
        tracing::warn!("{msg}");
    }

    /// Log a stage header (major section).
    pub fn stage(&self, msg: &str) {
        self.clear_progress();
        tracing::info!(target: STAGE_TARGET, "{msg}");
    }

    /// Log an informational message.
    pub fn info(&self, msg: &str) {
        self.clear_progress();
        tracing::info!("{msg}");
    }

    /// Log a debug message (suppressed on console unless verbose; always
    /// written to the log file).
    pub fn debug(&self, msg: &str) {
        self.clear_progress();
        tracing::debug!("{msg}");
    }

    /// Log a dry-run action message.
    pub fn dry_run(&self, msg: &str) {
        self.clear_progress();
        tracing::info!(target: DRY_RUN_TARGET, "{msg}");
    }

    /// Record a task result for the summary.
    pub fn record_task(&self, name: &str, status: TaskStatus, message: Option<&str>) {
        if let Ok(mut guard) = self.tasks.lock() {
            guard.push(TaskEntry {
                name: name.to_string(),
                status,
                message: message.map(String::from),
            });
        }
    }

    /// Count the number of failed tasks.
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.tasks.lock().map_or(0, |guard| {
            guard
                .iter()
                .filter(|t| t.status == TaskStatus::Failed)
                .count()
        })
    }

    /// Print the summary of all recorded tasks.
    pub fn print_summary(&self) {
        let tasks = match self.tasks.lock() {
            Ok(guard) => guard.clone(),
            Err(_) => return,
        };
        if tasks.is_empty() {
            return;
        }

        self.stage("Summary");
        for task in &tasks {
            self.info(&task.summary_line());
        }
        self.info(&format!("\x1b[2mlog: {}\x1b[0m", self.log_file.display()));
    }

    /// Draw `[current/total] label` over the previous progress line.
    pub fn progress(&self, current: usize, total: usize, label: &str) {
        if !self.progress_enabled {
            return;
        }
        let line = fit_to_width(
            &format!("[{current}/{total}] {label}"),
            terminal_columns().saturating_sub(1),
        );
        let mut out = std::io::stdout().lock();
        write!(out, "\r\x1b[K\x1b[2m{line}\x1b[0m").ok();
        out.flush().ok();
        *self
            .progress_shown
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = true;
    }

    /// Erase the progress line, if one is shown.
    pub fn clear_progress(&self) {
        let mut shown = self
            .progress_shown
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *shown {
            let mut out = std::io::stdout().lock();
            write!(out, "\r\x1b[K").ok();
            out.flush().ok();
            *shown = false;
        }
    }

    #[cfg(test)]
    fn progress_visible(&self) -> bool {
        *self
            .progress_shown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    fn task_entries(&self) -> Vec<TaskEntry> {
        self.tasks.lock().map_or_else(|_| vec![], |g| g.clone())
    }
}

impl Log for Logger {
    forward_log_methods!(stage, info, debug, warn, error, dry_run);

    fn record_task(&self, name: &str, status: TaskStatus, message: Option<&str>) {
        self.record_task(name, status, message);
    }

    fn progress(&self, current: usize, total: usize, label: &str) {
        self.progress(current, total, label);
    }

    fn clear_progress(&self) {
        self.clear_progress();
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn record_task_with_message() {
        let log = Logger::new("test", false);
        log.record_task("provision", TaskStatus::Ok, None);
        log.record_task("sync-local", TaskStatus::NotApplicable, Some("not requested"));
        let tasks = log.task_entries();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[1].message.as_deref(), Some("not requested"));
    }

    #[test]
    fn failure_count_returns_correct_count() {
        let log = Logger::new("test", false);
        assert_eq!(log.failure_count(), 0);
        log.record_task("a", TaskStatus::Ok, None);
        log.record_task("b", TaskStatus::Failed, Some("1 entry failed"));
        assert_eq!(log.failure_count(), 1);
    }

    #[test]
    fn log_trait_delegates_to_logger() {
        let log = Logger::new("test", false);
        let log_ref: &dyn Log = &log;
        log_ref.record_task("via-trait", TaskStatus::DryRun, None);
        assert_eq!(log.task_entries().len(), 1);
    }

    #[test]
    fn disabled_progress_draws_nothing() {
        let log = Logger::build("test", false);
        log.progress(1, 3, "zsh");
        assert!(!log.progress_visible());
    }

    #[test]
    fn progress_is_cleared_before_other_output() {
        let log = Logger::build("test", true);
        log.progress(1, 3, "zsh");
        assert!(log.progress_visible());
        log.warn("cannot classify ~/.zshrc");
        assert!(!log.progress_visible());
    }
}
