//! Boundary check run before every mutating filesystem call.
//!
//! A target is acceptable only when, after resolution of its *parent*
//! directories the way the kernel walks them, it lies strictly below the home
//! directory and outside the source repository. `..` is applied to the
//! already-resolved prefix, so `link/..` leaves through the link's
//! destination. The final component is never resolved: a stale symlink in
//! `$HOME` that points into the repository is itself a valid thing to remove.
use std::path::{Component, Path, PathBuf};

use crate::error::{ConfigError, SafetyError};

/// Canonicalized home/repository boundaries.
#[derive(Debug, Clone)]
pub struct SafetyGate {
    home: PathBuf,
    repo: PathBuf,
}

impl SafetyGate {
    /// Build a gate from the home directory and repository root.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingDirectory`] if either boundary cannot be
    /// canonicalized. An unset boundary is fatal for the run.
    pub fn new(home: &Path, repo: &Path) -> Result<Self, ConfigError> {
        let canon = |p: &Path| {
            dunce::canonicalize(p).map_err(|_| ConfigError::MissingDirectory {
                path: p.to_path_buf(),
            })
        };
        Ok(Self {
            home: canon(home)?,
            repo: canon(repo)?,
        })
    }

    /// Canonical home directory.
    #[must_use]
    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Canonical repository root.
    #[must_use]
    pub fn repo(&self) -> &Path {
        &self.repo
    }

    /// Validate a home-side target and return its resolved form.
    ///
    /// # Errors
    ///
    /// Returns a [`SafetyError`] if the target escapes the home directory,
    /// lands inside the repository, or its parents cannot be resolved.
    pub fn check(&self, target: &Path) -> Result<PathBuf, SafetyError> {
        let resolved = resolve_parents(target)?;
        if resolved == self.home || !resolved.starts_with(&self.home) {
            return Err(SafetyError::OutsideHome { path: resolved });
        }
        if resolved.starts_with(&self.repo) {
            return Err(SafetyError::InsideRepository { path: resolved });
        }
        Ok(resolved)
    }

    /// `true` if [`check`](Self::check) accepts `target`.
    #[must_use]
    pub fn is_safe(&self, target: &Path) -> bool {
        self.check(target).is_ok()
    }

    /// Validate a repository-side write (reverse sync) confined to `within`.
    ///
    /// # Errors
    ///
    /// Returns [`SafetyError::OutsideRepository`] unless the resolved path is
    /// strictly below both `within` and the repository root.
    pub fn check_repo_write(&self, path: &Path, within: &Path) -> Result<PathBuf, SafetyError> {
        let resolved = resolve_parents(path)?;
        let within = resolve_parents(within)?;
        if resolved == within || !resolved.starts_with(&within) || !within.starts_with(&self.repo)
        {
            return Err(SafetyError::OutsideRepository { path: resolved });
        }
        Ok(resolved)
    }
}

/// Contract form of the gate: `true` only if `target` is under `home` and
/// not under `repo`. Returns `false` when the boundaries themselves cannot be
/// resolved.
#[must_use]
pub fn is_safe(target: &Path, home: &Path, repo: &Path) -> bool {
    SafetyGate::new(home, repo).is_ok_and(|gate| gate.is_safe(target))
}

/// Resolve every component of `path` but the last, one at a time. Each
/// existing prefix is canonicalized (following symlinks) before the next
/// component is applied, so `..` climbs out of a link's destination rather
/// than out of the link. Once a component is missing, the rest of the parent
/// chain is applied lexically; nothing below a missing directory can be a
/// symlink. A trailing `.` or `..` is resolved like any parent component.
fn resolve_parents(path: &Path) -> Result<PathBuf, SafetyError> {
    let mut components: Vec<Component<'_>> = path.components().collect();
    let name = match components.last().copied() {
        Some(Component::Normal(name)) => {
            components.pop();
            Some(name)
        }
        _ => None,
    };

    let mut resolved = PathBuf::new();
    let mut missing = 0_usize;
    for component in components {
        match component {
            Component::Prefix(_) | Component::RootDir => resolved.push(component),
            Component::CurDir => {}
            Component::ParentDir => {
                if missing > 0 {
                    missing -= 1;
                    resolved.pop();
                } else if matches!(
                    resolved.components().next_back(),
                    None | Some(Component::ParentDir)
                ) {
                    // Relative path climbing above its start.
                    resolved.push(component);
                } else {
                    resolved.pop();
                }
            }
            Component::Normal(part) => {
                resolved.push(part);
                if missing == 0 && resolved.symlink_metadata().is_ok() {
                    resolved = dunce::canonicalize(&resolved).map_err(|source| {
                        SafetyError::Unresolvable {
                            path: resolved.clone(),
                            source,
                        }
                    })?;
                } else {
                    missing += 1;
                }
            }
        }
    }
    if let Some(name) = name {
        resolved.push(name);
    }
    Ok(resolved)
}
