//! Symlink resource.
use anyhow::{Context as _, Result};
use std::path::{Path, PathBuf};

use super::helpers::fs::ensure_parent_dir;
use super::{Applicable, ResourceChange};

/// A per-file link from a home path to a repository file.
#[derive(Debug, Clone)]
pub struct SymlinkResource {
    /// The repository file (what the symlink points to).
    pub source: PathBuf,
    /// Where the symlink is created.
    pub target: PathBuf,
}

impl SymlinkResource {
    /// Create a new symlink resource.
    #[must_use]
    pub const fn new(source: PathBuf, target: PathBuf) -> Self {
        Self { source, target }
    }
}

impl Applicable for SymlinkResource {
    fn description(&self) -> String {
        format!("{} -> {}", self.target.display(), self.source.display())
    }

    /// Create parent directories and the link. The target must be absent
    /// unless it already links to `source`.
    fn apply(&self) -> Result<ResourceChange> {
        if std::fs::read_link(&self.target).is_ok_and(|dest| dest == self.source) {
            return Ok(ResourceChange::AlreadyCorrect);
        }
        let created_dirs = ensure_parent_dir(&self.target)?;
        create_symlink(&self.source, &self.target)
            .with_context(|| format!("create link: {}", self.target.display()))?;
        Ok(ResourceChange::Applied { created_dirs })
    }
}

/// Create a symlink at `link` pointing to `target`.
///
/// # Errors
///
/// Returns an error if the link cannot be created (existing entry,
/// permission denied, or no symlink privilege on Windows).
fn create_symlink(target: &Path, link: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(target, link).with_context(|| {
            format!(
                "creating symlink {} -> {}",
                link.display(),
                target.display()
            )
        })?;
    }

    #[cfg(windows)]
    {
        let result = if target.is_dir() {
            std::os::windows::fs::symlink_dir(target, link)
        } else {
            std::os::windows::fs::symlink_file(target, link)
        };
        result.with_context(|| {
            format!(
                "creating symlink {} -> {} (requires developer mode or admin)",
                link.display(),
                target.display()
            )
        })?;
    }

    Ok(())
}
