use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;

use crate::config::Config;
use crate::logging::Log;
use crate::merge::Merger;
use crate::paths::display_relative;
use crate::rollback::{Operation, RollbackRecorder};
use crate::safety::SafetyGate;

/// Per-run switches.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Report what would change without mutating anything.
    pub dry_run: bool,
    /// Reverse-sync home changes instead of provisioning.
    pub sync_local: bool,
    /// Keep conflicting objects at their backup path instead of deleting them.
    pub backup_conflicts: bool,
    /// Run timestamp (`YYYYmmdd-HHMMSS`) used in backup and script names.
    pub timestamp: String,
    /// Root under which reverse sync backs up repository files.
    pub sync_backup_dir: PathBuf,
}

/// How reverse sync reconciles a drifted file.
pub enum SyncMode {
    /// Copy the home file over the repository file.
    Overwrite,
    /// Three-way merge the home file into the repository file.
    Merge(Box<dyn Merger>),
}

impl std::fmt::Debug for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Overwrite => f.write_str("Overwrite"),
            Self::Merge(_) => f.write_str("Merge(<dyn Merger>)"),
        }
    }
}

/// Shared context for task execution.
pub struct Context {
    /// Repository layout and packages.
    pub config: Config,
    /// Logger for output and task recording.
    pub log: Arc<dyn Log>,
    /// User's home directory.
    pub home: PathBuf,
    /// Boundary check for every mutation.
    pub gate: SafetyGate,
    /// Per-run switches.
    pub opts: RunOptions,
    /// Reverse sync strategy.
    pub sync_mode: SyncMode,
    rollback: Mutex<RollbackRecorder>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("config", &self.config)
            .field("log", &"<dyn Log>")
            .field("home", &self.home)
            .field("gate", &self.gate)
            .field("opts", &self.opts)
            .field("sync_mode", &self.sync_mode)
            .finish_non_exhaustive()
    }
}

impl Context {
    /// Creates a new context for task execution.
    #[must_use]
    pub fn new(
        config: Config,
        log: Arc<dyn Log>,
        home: PathBuf,
        gate: SafetyGate,
        opts: RunOptions,
        sync_mode: SyncMode,
        rollback: RollbackRecorder,
    ) -> Self {
        Self {
            config,
            log,
            home,
            gate,
            opts,
            sync_mode,
            rollback: Mutex::new(rollback),
        }
    }

    /// Record a completed mutation for the rollback script.
    ///
    /// # Errors
    ///
    /// Returns an error if the script cannot be appended to.
    pub fn record(&self, op: Operation) -> Result<()> {
        self.rollback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(op)
    }

    /// Operations recorded so far.
    #[must_use]
    pub fn recorded(&self) -> Vec<Operation> {
        self.rollback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .operations()
            .to_vec()
    }

    /// Close the rollback script with `message` and return its path.
    ///
    /// Later records go to an in-memory recorder.
    ///
    /// # Errors
    ///
    /// Returns an error if the trailer cannot be written.
    pub fn finalize_rollback(&self, message: &str) -> Result<Option<PathBuf>> {
        let recorder = std::mem::replace(
            &mut *self.rollback.lock().unwrap_or_else(PoisonError::into_inner),
            RollbackRecorder::in_memory(),
        );
        recorder.finalize(message)
    }

    /// `path` relative to home (`~/...`) for messages.
    #[must_use]
    pub fn display(&self, path: &Path) -> String {
        display_relative(path, &self.home)
    }
}
