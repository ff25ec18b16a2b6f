//! Per-run tallies returned by provisioning and reverse sync.
//!
//! The same structs are filled in a dry run, so the report of a dry run has
//! the same shape as the report of the real run it predicts.
use std::ops::AddAssign;
use std::path::PathBuf;

use anyhow::Result;

use super::{Context, TaskResult};

/// Outcome of provisioning one or more packages.
///
/// # Examples
///
/// ```
/// use std::path::PathBuf;
/// use dotfiles_stow::tasks::Summary;
///
/// let mut total = Summary::default();
/// total += Summary {
///     linked: vec![PathBuf::from("/h/.zshrc")],
///     already_satisfied: 2,
///     ..Summary::default()
/// };
/// assert_eq!(total.links_created(), 1);
/// assert_eq!(total.report(false), "1 link created, 0 conflicts removed, 2 already satisfied");
/// ```
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Summary {
    /// Targets linked where nothing existed.
    pub linked: Vec<PathBuf>,
    /// Targets whose stale link or foreign object was removed, then linked.
    pub replaced: Vec<PathBuf>,
    /// Entries already correct or covered by a linked directory.
    pub already_satisfied: u32,
    /// Entries skipped after a classification or safety failure.
    pub skipped: u32,
    /// Entries whose mutation failed.
    pub failed: Vec<PathBuf>,
}

impl Summary {
    /// Number of links created (or that would be).
    #[must_use]
    pub const fn links_created(&self) -> usize {
        self.linked.len() + self.replaced.len()
    }

    /// Number of conflicts removed (or that would be).
    #[must_use]
    pub const fn conflicts_removed(&self) -> usize {
        self.replaced.len()
    }

    /// One-line report, e.g. `3 links created, 1 conflict removed, 9 already satisfied`.
    #[must_use]
    pub fn report(&self, dry_run: bool) -> String {
        let (created, removed) = if dry_run {
            ("would be created", "would be removed")
        } else {
            ("created", "removed")
        };
        let mut line = format!(
            "{} {created}, {} {removed}, {} already satisfied",
            plural(self.links_created(), "link"),
            plural(self.conflicts_removed(), "conflict"),
            self.already_satisfied,
        );
        if self.skipped > 0 {
            line.push_str(&format!(", {} skipped", self.skipped));
        }
        if !self.failed.is_empty() {
            line.push_str(&format!(", {} failed", self.failed.len()));
        }
        line
    }

    /// Log the report and turn the tally into a task result.
    ///
    /// # Errors
    ///
    /// Returns an error naming the failed targets if any entry failed.
    pub fn finish(&self, ctx: &Context) -> Result<TaskResult> {
        ctx.log.info(&self.report(ctx.opts.dry_run));
        finish_with(ctx, &self.failed)
    }
}

impl AddAssign for Summary {
    fn add_assign(&mut self, rhs: Self) {
        self.linked.extend(rhs.linked);
        self.replaced.extend(rhs.replaced);
        self.already_satisfied += rhs.already_satisfied;
        self.skipped += rhs.skipped;
        self.failed.extend(rhs.failed);
    }
}

/// Outcome of reverse-syncing one or more packages.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncSummary {
    /// Repository files overwritten or cleanly merged from home.
    pub files_synced: Vec<PathBuf>,
    /// Files copied into the repository from home for the first time.
    pub files_added: Vec<PathBuf>,
    /// Repository files written with conflict markers.
    pub merge_conflicts: Vec<PathBuf>,
    /// Candidates whose content already matched.
    pub unchanged: u32,
    /// Candidates skipped (binary, unsafe, or unclassifiable).
    pub skipped: u32,
    /// Files whose sync failed.
    pub failed: Vec<PathBuf>,
}

impl SyncSummary {
    /// Number of repository files changed (or that would be).
    #[must_use]
    pub const fn files_synced(&self) -> usize {
        self.files_synced.len() + self.merge_conflicts.len()
    }

    /// One-line report, e.g. `2 files synced, 1 file added, 5 unchanged`.
    #[must_use]
    pub fn report(&self, dry_run: bool) -> String {
        let (synced, added) = if dry_run {
            ("would be synced", "would be added")
        } else {
            ("synced", "added")
        };
        let mut line = format!(
            "{} {synced}, {} {added}, {} unchanged",
            plural(self.files_synced(), "file"),
            plural(self.files_added.len(), "file"),
            self.unchanged,
        );
        if !self.merge_conflicts.is_empty() {
            line.push_str(&format!(
                ", {} with conflicts",
                plural(self.merge_conflicts.len(), "merge")
            ));
        }
        if self.skipped > 0 {
            line.push_str(&format!(", {} skipped", self.skipped));
        }
        if !self.failed.is_empty() {
            line.push_str(&format!(", {} failed", self.failed.len()));
        }
        line
    }

    /// Log the report and turn the tally into a task result.
    ///
    /// # Errors
    ///
    /// Returns an error naming the failed files if any sync failed.
    pub fn finish(&self, ctx: &Context) -> Result<TaskResult> {
        ctx.log.info(&self.report(ctx.opts.dry_run));
        finish_with(ctx, &self.failed)
    }
}

impl AddAssign for SyncSummary {
    fn add_assign(&mut self, rhs: Self) {
        self.files_synced.extend(rhs.files_synced);
        self.files_added.extend(rhs.files_added);
        self.merge_conflicts.extend(rhs.merge_conflicts);
        self.unchanged += rhs.unchanged;
        self.skipped += rhs.skipped;
        self.failed.extend(rhs.failed);
    }
}

fn finish_with(ctx: &Context, failed: &[PathBuf]) -> Result<TaskResult> {
    if !failed.is_empty() {
        let names: Vec<String> = failed.iter().map(|p| ctx.display(p)).collect();
        anyhow::bail!("{} failed: {}", plural(failed.len(), "entry"), names.join(", "));
    }
    Ok(if ctx.opts.dry_run {
        TaskResult::DryRun
    } else {
        TaskResult::Ok
    })
}

fn plural(n: usize, noun: &str) -> String {
    match (n, noun) {
        (1, _) => format!("1 {noun}"),
        (_, "entry") => format!("{n} entries"),
        _ => format!("{n} {noun}s"),
    }
}
