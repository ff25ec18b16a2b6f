//! Filesystem primitives: link state, conflict handling, symlinks.
pub mod classify;
pub mod helpers;
pub mod resolve;
pub mod symlink;

use anyhow::Result;
use std::path::PathBuf;

/// Minimal interface for resources that can be described and applied.
pub trait Applicable {
    /// Human-readable description of this resource.
    fn description(&self) -> String;

    /// Apply the resource change.
    ///
    /// Creates parent directories if needed and reports them in the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the resource cannot be applied due to I/O failures,
    /// permission issues, or invalid paths.
    fn apply(&self) -> Result<ResourceChange>;
}

/// Result of applying a resource.
///
/// # Examples
///
/// ```
/// use dotfiles_stow::resources::ResourceChange;
///
/// let applied = ResourceChange::Applied { created_dirs: vec![] };
/// assert_ne!(applied, ResourceChange::AlreadyCorrect);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceChange {
    /// Resource was created.
    Applied {
        /// Directories created on the way, deepest first.
        created_dirs: Vec<PathBuf>,
    },
    /// Resource was already in the desired state; nothing changed.
    AlreadyCorrect,
}
