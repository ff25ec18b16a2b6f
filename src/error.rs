//! Domain-specific error types for the provisioning engine.
//!
//! Internal modules return typed errors (e.g., [`SafetyError`],
//! [`ResourceError`]) while the command layer converts them to
//! [`anyhow::Error`] via the standard `?` operator.
//!
//! # Error hierarchy
//!
//! ```text
//! DotfilesError
//! ├── Config(ConfigError)      repository root, home, packages.toml
//! ├── Safety(SafetyError)      target escapes home or lands in the repository
//! ├── Resource(ResourceError)  classification and link/remove failures
//! └── Merge(MergeError)        merge utility missing or failing
//! ```
//!
//! Only [`ConfigError`] (and [`MergeError::Unavailable`] in merge mode) abort
//! a run. Everything else is reported per file and the run continues.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type for the engine.
#[derive(Error, Debug)]
pub enum DotfilesError {
    /// Fatal configuration or boundary error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A target path failed the safety check.
    #[error("Safety violation: {0}")]
    Safety(#[from] SafetyError),

    /// A filesystem operation on a single entry failed.
    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),

    /// Three-way merge could not be performed.
    #[error("Merge error: {0}")]
    Merge(#[from] MergeError),
}

/// Errors that abort the whole run.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No repository root could be determined.
    #[error("cannot determine dotfiles root. Use --root or set DOTFILES_ROOT env var")]
    RootNotFound,

    /// Neither `--home` nor the environment names a home directory.
    #[error("home directory is not set (use --home or set HOME)")]
    HomeNotSet,

    /// A required base directory does not exist.
    #[error("required directory missing: {}", path.display())]
    MissingDirectory {
        /// The directory that was expected to exist.
        path: PathBuf,
    },

    /// A configuration file could not be parsed.
    #[error("Invalid TOML syntax in {file}: {message}")]
    InvalidSyntax {
        /// Name of the offending file.
        file: String,
        /// Parser message.
        message: String,
    },

    /// An I/O error occurred while reading a config file.
    #[error("IO error reading config file {path}: {source}")]
    Io {
        /// Path to the file that could not be read.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Reasons a target path is refused by the
/// [`SafetyGate`](crate::safety::SafetyGate).
#[derive(Error, Debug)]
pub enum SafetyError {
    /// The resolved target is not below the home directory.
    #[error("target escapes home directory: {}", path.display())]
    OutsideHome {
        /// Resolved target path.
        path: PathBuf,
    },

    /// The resolved target lies inside the source repository.
    #[error("target lies inside the repository: {}", path.display())]
    InsideRepository {
        /// Resolved target path.
        path: PathBuf,
    },

    /// A reverse-sync write would land outside its package source tree.
    #[error("write escapes the repository package: {}", path.display())]
    OutsideRepository {
        /// Resolved destination path.
        path: PathBuf,
    },

    /// The target's parent directories could not be resolved.
    #[error("cannot resolve {}: {source}", path.display())]
    Unresolvable {
        /// Path whose ancestors failed to resolve.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Per-entry filesystem errors.
#[derive(Error, Debug)]
pub enum ResourceError {
    /// The target could not be stat-ed or its link read.
    #[error("cannot classify {}: {source}", path.display())]
    Classify {
        /// Target path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A symlink operation failed.
    #[error("Symlink error: {0}")]
    Symlink(String),

    /// A required file was not found.
    #[error("File not found: {0}")]
    NotFound(String),
}

/// Errors from the three-way merge path.
#[derive(Error, Debug)]
pub enum MergeError {
    /// Merge mode was requested but no merge utility is installed.
    #[error("merge utility unavailable: {0}")]
    Unavailable(String),

    /// The merge utility ran but reported an error (not a conflict).
    #[error("merge of {path} failed: {reason}")]
    Failed {
        /// Repository file being merged.
        path: String,
        /// Human-readable reason.
        reason: String,
    },
}
