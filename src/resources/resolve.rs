//! Conflict resolution: what to do with a classified target, and the
//! gated steps that make room for a link.
//!
//! A conflicting object is renamed to its backup path rather than deleted,
//! so a failed link can put it back. It is deleted only once the link
//! exists, unless the run keeps backups.
use anyhow::{Context as _, Result, bail};
use std::path::{Path, PathBuf};

use super::classify::Classification;
use super::helpers::fs::{remove_path, sha256_hex};
use crate::safety::SafetyGate;

/// Action chosen for one link entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Nothing at the target: create the link.
    CreateLink,
    /// Already satisfied (correct link, or covered by a linked directory).
    NoOp,
    /// Move the stale link or foreign object aside, then link.
    RemoveThenLink,
}

impl Action {
    /// `true` for actions that mutate the filesystem.
    #[must_use]
    pub const fn mutates(self) -> bool {
        matches!(self, Self::CreateLink | Self::RemoveThenLink)
    }
}

/// Decide the action for `classification`.
///
/// A [`Classification::WrongLink`] never resolves to the expected source:
/// [`classify`](super::classify::classify) reports equivalent destinations
/// as [`Classification::CorrectLink`].
#[must_use]
pub const fn resolve(classification: &Classification) -> Action {
    match classification {
        Classification::Absent => Action::CreateLink,
        Classification::CorrectLink | Classification::CoveredByAncestorSymlink(_) => Action::NoOp,
        Classification::WrongLink(_) | Classification::ForeignObject => Action::RemoveThenLink,
    }
}

/// What a conflict removal took away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Removed {
    /// A symlink pointing somewhere else.
    Link {
        /// Where it pointed.
        destination: PathBuf,
    },
    /// A regular file.
    File {
        /// SHA-256 of its content.
        sha256: String,
    },
    /// A directory tree.
    Directory,
}

/// A conflicting object renamed out of the way of a link.
#[derive(Debug)]
pub struct SetAside {
    /// Resolved location the object was taken from.
    pub target: PathBuf,
    /// Where the object sits now.
    pub aside: PathBuf,
    /// What the object was.
    pub removed: Removed,
}

impl SetAside {
    /// Move the object back to where it was.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the rename fails.
    pub fn restore(&self) -> Result<()> {
        std::fs::rename(&self.aside, &self.target).with_context(|| {
            format!(
                "moving {} back to {}",
                self.aside.display(),
                self.target.display()
            )
        })
    }

    /// Delete the object for good.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if removal fails.
    pub fn discard(&self) -> Result<()> {
        remove_path(&self.aside)
    }
}

/// Path of the pre-removal backup for `target`.
#[must_use]
pub fn backup_path(target: &Path, timestamp: &str) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".dotfiles-backup-{timestamp}"));
    target.with_file_name(name)
}

/// Rename the object at `target` to its [`backup_path`] after the gate
/// approves both locations.
///
/// # Errors
///
/// Returns a [`SafetyError`](crate::error::SafetyError) (downcastable) if the
/// gate refuses either path, an error if the backup path is taken, or an I/O
/// error. The target is left untouched on error.
pub fn set_aside(gate: &SafetyGate, target: &Path, timestamp: &str) -> Result<SetAside> {
    let target = gate.check(target)?;
    let aside = gate.check(&backup_path(&target, timestamp))?;
    if aside.symlink_metadata().is_ok() {
        bail!("backup path already exists: {}", aside.display());
    }
    let removed = inspect(&target)?;
    std::fs::rename(&target, &aside)
        .with_context(|| format!("moving {} to {}", target.display(), aside.display()))?;
    Ok(SetAside {
        target,
        aside,
        removed,
    })
}

fn inspect(target: &Path) -> Result<Removed> {
    let meta = std::fs::symlink_metadata(target)
        .with_context(|| format!("reading metadata: {}", target.display()))?;
    Ok(if meta.file_type().is_symlink() {
        Removed::Link {
            destination: std::fs::read_link(target)
                .with_context(|| format!("reading link: {}", target.display()))?,
        }
    } else if meta.is_dir() {
        Removed::Directory
    } else {
        Removed::File {
            sha256: sha256_hex(target)?,
        }
    })
}
