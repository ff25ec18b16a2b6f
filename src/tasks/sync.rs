//! Reverse sync: pull home-side edits back into the repository.
//!
//! A file is a candidate only when its home path holds a regular file that
//! replaced the link. Links, linked directories and binaries are never
//! reconciled. Every repository file is copied to the run's backup
//! directory before it is written.
use anyhow::{Context as _, Result};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use super::entries::{IGNORED_FILE, LinkEntry, enumerate};
use super::{Context, SyncMode, SyncSummary, Task, TaskResult};
use crate::config::Package;
use crate::merge::{MergeOutcome, head_content};
use crate::paths::PathTransformer;
use crate::resources::classify::{Classification, classify};
use crate::resources::helpers::fs::{ensure_parent_dir, files_equal, is_binary};
use crate::rollback::Operation;

/// Pulls locally modified and new files back into the repository.
#[derive(Debug)]
pub struct SyncPackages;

impl Task for SyncPackages {
    fn name(&self) -> &str {
        "Sync local changes"
    }

    fn should_run(&self, ctx: &Context) -> bool {
        ctx.opts.sync_local
    }

    fn run(&self, ctx: &Context) -> Result<TaskResult> {
        sync_local(ctx, &ctx.config.packages).finish(ctx)
    }
}

/// Reverse-sync `packages` in order and return the combined tally.
pub fn sync_local(ctx: &Context, packages: &[Package]) -> SyncSummary {
    let mut total = SyncSummary::default();
    for (i, package) in packages.iter().enumerate() {
        ctx.log.progress(i + 1, packages.len(), &package.name);
        total += sync_package(ctx, package);
    }
    ctx.log.clear_progress();
    total
}

/// Reverse-sync a single package: drifted files first, then new files.
pub fn sync_package(ctx: &Context, package: &Package) -> SyncSummary {
    let mut summary = SyncSummary::default();
    if !package.source_dir.is_dir() {
        ctx.log.debug(&format!(
            "{}: no source directory at {}, skipping",
            package.name,
            package.source_dir.display()
        ));
        return summary;
    }
    let entries = match enumerate(package) {
        Ok(entries) => entries,
        Err(e) => {
            ctx.log.warn(&format!("{}: {e:#}", package.name));
            summary.skipped += 1;
            return summary;
        }
    };
    for entry in &entries {
        sync_entry(ctx, package, entry, &mut summary);
    }
    add_new_files(ctx, package, &entries, &mut summary);
    summary
}

fn sync_entry(ctx: &Context, package: &Package, entry: &LinkEntry, summary: &mut SyncSummary) {
    let target = &entry.target_path;
    let source = &entry.source_file;
    let shown = ctx.display(target);

    match classify(target, source, package) {
        Ok(Classification::ForeignObject) => {}
        Ok(Classification::WrongLink(dest)) => {
            ctx.log.debug(&format!(
                "{shown}: links to {}, not synced",
                dest.display()
            ));
            return;
        }
        Ok(_) => return,
        Err(e) => {
            ctx.log.warn(&e.to_string());
            summary.skipped += 1;
            return;
        }
    }

    if target.is_dir() {
        ctx.log.debug(&format!("{shown}: is a directory, not synced"));
        summary.skipped += 1;
        return;
    }
    let binary = is_binary(target).and_then(|t| if t { Ok(true) } else { is_binary(source) });
    match binary {
        Ok(false) => {}
        Ok(true) => {
            ctx.log.debug(&format!("{shown}: binary, not synced"));
            summary.skipped += 1;
            return;
        }
        Err(e) => {
            ctx.log.warn(&format!("{shown}: {e:#}"));
            summary.skipped += 1;
            return;
        }
    }
    match files_equal(target, source) {
        Ok(true) => {
            summary.unchanged += 1;
            return;
        }
        Ok(false) => {}
        Err(e) => {
            ctx.log.warn(&format!("{shown}: {e:#}"));
            summary.failed.push(source.clone());
            return;
        }
    }

    let repo_file = repo_display(ctx, source);
    if let Err(e) = ctx.gate.check_repo_write(source, &package.source_dir) {
        ctx.log.error(&e.to_string());
        summary.skipped += 1;
        return;
    }
    if ctx.opts.dry_run {
        ctx.log
            .dry_run(&format!("would sync {shown} into {repo_file}"));
        summary.files_synced.push(source.clone());
        return;
    }

    match reconcile(ctx, package, entry) {
        Ok(Reconciled::Synced) => {
            ctx.log.debug(&format!("synced {shown} into {repo_file}"));
            summary.files_synced.push(source.clone());
        }
        Ok(Reconciled::Conflicted) => {
            ctx.log.warn(&format!(
                "{repo_file}: merge conflict with {shown}, resolve the markers by hand"
            ));
            summary.merge_conflicts.push(source.clone());
        }
        Err(e) => {
            ctx.log.warn(&format!("{repo_file}: {e:#}"));
            summary.failed.push(source.clone());
        }
    }
}

enum Reconciled {
    Synced,
    Conflicted,
}

/// Back up the repository file, then overwrite or merge it.
fn reconcile(ctx: &Context, package: &Package, entry: &LinkEntry) -> Result<Reconciled> {
    let source = &entry.source_file;
    let target = &entry.target_path;

    let backup = ctx
        .opts
        .sync_backup_dir
        .join(&package.name)
        .join(&entry.repo_relative_path);
    ensure_parent_dir(&backup)?;
    std::fs::copy(source, &backup)
        .with_context(|| format!("backing up {} to {}", source.display(), backup.display()))?;
    ctx.record(Operation::backup_taken(source, &backup))?;

    match &ctx.sync_mode {
        SyncMode::Overwrite => {
            std::fs::copy(target, source)
                .with_context(|| format!("copying {} to {}", target.display(), source.display()))?;
            Ok(Reconciled::Synced)
        }
        SyncMode::Merge(merger) => {
            let ours =
                std::fs::read(source).with_context(|| format!("reading {}", source.display()))?;
            let theirs =
                std::fs::read(target).with_context(|| format!("reading {}", target.display()))?;
            let base = head_content(&ctx.config.root, source).unwrap_or_else(|| ours.clone());
            let (merged, outcome) = match merger.merge(&base, &ours, &theirs)? {
                MergeOutcome::Clean(merged) => (merged, Reconciled::Synced),
                MergeOutcome::Conflicted(merged) => (merged, Reconciled::Conflicted),
            };
            std::fs::write(source, merged)
                .with_context(|| format!("writing {}", source.display()))?;
            Ok(outcome)
        }
    }
}

/// Copy files that exist in a package's mapped home directories but not in
/// the repository.
fn add_new_files(
    ctx: &Context,
    package: &Package,
    entries: &[LinkEntry],
    summary: &mut SyncSummary,
) {
    let known: HashSet<&Path> = entries.iter().map(|e| e.target_path.as_path()).collect();
    let mut dirs: BTreeMap<&Path, &Path> = BTreeMap::new();
    for entry in entries {
        if let (Some(home_dir), Some(source_dir)) =
            (entry.target_path.parent(), entry.source_file.parent())
            && source_dir != package.source_dir
        {
            dirs.insert(home_dir, source_dir);
        }
    }

    let transformer = package.transformer();
    // Names a dry run has claimed; the real run finds them on disk instead.
    let mut planned: HashSet<PathBuf> = HashSet::new();
    for (home_dir, source_dir) in dirs {
        if !scannable(ctx, home_dir) {
            continue;
        }
        let files = match list_files(home_dir) {
            Ok(files) => files,
            Err(e) => {
                ctx.log.warn(&format!("{}: {e:#}", ctx.display(home_dir)));
                continue;
            }
        };
        for file in files {
            if known.contains(file.as_path()) {
                continue;
            }
            add_new_file(
                ctx,
                package,
                transformer.as_ref(),
                &file,
                source_dir,
                &mut planned,
                summary,
            );
        }
    }
}

/// A real directory that does not lead back into the repository.
fn scannable(ctx: &Context, dir: &Path) -> bool {
    let is_real_dir = std::fs::symlink_metadata(dir).is_ok_and(|m| m.is_dir());
    is_real_dir && dunce::canonicalize(dir).is_ok_and(|resolved| !resolved.starts_with(ctx.gate.repo()))
}

/// Regular files directly inside `dir`, sorted.
fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let entry = entry.with_context(|| format!("reading {}", dir.display()))?;
        if entry.file_type().is_ok_and(|t| t.is_file()) {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// Add the home `file` to `source_dir` unless its repository name is taken,
/// on disk or by an earlier dry-run prediction in `planned`.
fn add_new_file(
    ctx: &Context,
    package: &Package,
    transformer: &dyn PathTransformer,
    file: &Path,
    source_dir: &Path,
    planned: &mut HashSet<PathBuf>,
    summary: &mut SyncSummary,
) {
    let Some(name) = file.file_name().and_then(|n| n.to_str()) else {
        return;
    };
    if name == IGNORED_FILE || package.ignores(name) {
        return;
    }
    let shown = ctx.display(file);
    match is_binary(file) {
        Ok(false) => {}
        Ok(true) => {
            ctx.log.debug(&format!("{shown}: binary, not added"));
            summary.skipped += 1;
            return;
        }
        Err(e) => {
            ctx.log.warn(&format!("{shown}: {e:#}"));
            summary.skipped += 1;
            return;
        }
    }

    let repo_path = source_dir.join(transformer.to_repo(name));
    let repo_file = repo_display(ctx, &repo_path);
    if repo_path.symlink_metadata().is_ok() || planned.contains(&repo_path) {
        ctx.log
            .debug(&format!("{shown}: {repo_file} already exists, not added"));
        return;
    }
    if let Err(e) = ctx.gate.check_repo_write(&repo_path, &package.source_dir) {
        ctx.log.error(&e.to_string());
        summary.skipped += 1;
        return;
    }
    if ctx.opts.dry_run {
        ctx.log.dry_run(&format!("would add {shown} as {repo_file}"));
        planned.insert(repo_path.clone());
        summary.files_added.push(repo_path);
        return;
    }

    let copied = std::fs::copy(file, &repo_path)
        .with_context(|| format!("copying {} to {}", file.display(), repo_path.display()))
        .and_then(|_| ctx.record(Operation::file_added(&repo_path)));
    match copied {
        Ok(()) => {
            ctx.log.debug(&format!("added {shown} as {repo_file}"));
            summary.files_added.push(repo_path);
        }
        Err(e) => {
            ctx.log.warn(&format!("{repo_file}: {e:#}"));
            summary.failed.push(repo_path);
        }
    }
}

/// `path` relative to the repository root, for messages.
fn repo_display(ctx: &Context, path: &Path) -> String {
    path.strip_prefix(&ctx.config.root)
        .map_or_else(|_| path.display().to_string(), |rel| rel.display().to_string())
}

#[cfg(test)]
#[allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use super::*;
    use crate::error::MergeError;
    use crate::logging::Level;
    use crate::merge::MockMerger;
    use crate::rollback::OperationKind;
    use crate::tasks::test_helpers::Harness;

    /// Replace the provisioned link at `target` with a plain file.
    fn break_link(target: &Path, content: &str) {
        let _ = std::fs::remove_file(target);
        std::fs::create_dir_all(target.parent().unwrap()).unwrap();
        std::fs::write(target, content).unwrap();
    }

    #[test]
    fn overwrite_copies_home_content_with_backup() {
        let h = Harness::new();
        let source = h.write_source("git", "dot-gitconfig", "A");
        break_link(&h.home.join(".gitconfig"), "B");
        let ctx = h.context(false);

        let summary = sync_local(&ctx, &ctx.config.packages);
        assert_eq!(summary.files_synced, vec![source.clone()]);
        assert_eq!(std::fs::read_to_string(&source).unwrap(), "B");
        let backup = ctx.opts.sync_backup_dir.join("git/dot-gitconfig");
        assert_eq!(std::fs::read_to_string(backup).unwrap(), "A");
        assert_eq!(ctx.recorded()[0].kind, OperationKind::RestoreBackup);
    }

    #[test]
    fn identical_and_linked_files_are_left_alone() {
        let h = Harness::new();
        h.write_source("zsh", "dot-zshrc", "same");
        h.write_source("zsh", "dot-zshenv", "env");
        break_link(&h.home.join(".zshrc"), "same");
        let ctx = h.context(false);

        let summary = sync_local(&ctx, &ctx.config.packages);
        assert_eq!(summary.unchanged, 1);
        assert_eq!(summary.files_synced(), 0);
        assert!(ctx.recorded().is_empty());
    }

    #[test]
    fn binary_files_are_skipped() {
        let h = Harness::new();
        let source = h.write_source("kitty", "dot-icon", "repo");
        std::fs::create_dir_all(&h.home).unwrap();
        std::fs::write(h.home.join(".icon"), b"\x89PNG\0\0data").unwrap();
        let ctx = h.context(false);

        let summary = sync_local(&ctx, &ctx.config.packages);
        assert_eq!(summary.skipped, 1);
        assert_eq!(std::fs::read_to_string(source).unwrap(), "repo");
    }

    #[cfg(unix)]
    #[test]
    fn links_pointing_elsewhere_are_not_synced() {
        let h = Harness::new();
        let source = h.write_source("vim", "dot-vimrc", "repo");
        let other = h.home.join("other");
        std::fs::write(&other, "other").unwrap();
        std::os::unix::fs::symlink(&other, h.home.join(".vimrc")).unwrap();
        let ctx = h.context(false);

        let summary = sync_local(&ctx, &ctx.config.packages);
        assert_eq!(summary, SyncSummary::default());
        assert_eq!(std::fs::read_to_string(source).unwrap(), "repo");
    }

    #[test]
    fn dry_run_reports_without_writing() {
        let h = Harness::new();
        let source = h.write_source("git", "dot-gitconfig", "A");
        break_link(&h.home.join(".gitconfig"), "B");
        let (ctx, log) = h.logged_context(true);

        let summary = sync_local(&ctx, &ctx.config.packages);
        assert_eq!(summary.files_synced, vec![source.clone()]);
        assert_eq!(std::fs::read_to_string(&source).unwrap(), "A");
        assert!(!ctx.opts.sync_backup_dir.exists());
        assert_eq!(
            log.messages(Level::DryRun),
            vec!["would sync ~/.gitconfig into stow/git/dot-gitconfig"]
        );
    }

    #[test]
    fn merge_writes_clean_result() {
        let h = Harness::new();
        let source = h.write_source("git", "dot-gitconfig", "ours\n");
        break_link(&h.home.join(".gitconfig"), "theirs\n");

        let mut merger = MockMerger::new();
        merger
            .expect_merge()
            .withf(|base, ours, theirs| {
                base.to_vec() == b"ours\n" && ours.to_vec() == b"ours\n" && theirs.to_vec() == b"theirs\n"
            })
            .times(1)
            .returning(|_, _, _| Ok(MergeOutcome::Clean(b"merged\n".to_vec())));
        let ctx = h.context_with(h.opts(false), SyncMode::Merge(Box::new(merger)));

        let summary = sync_local(&ctx, &ctx.config.packages);
        assert_eq!(summary.files_synced, vec![source.clone()]);
        assert_eq!(std::fs::read_to_string(&source).unwrap(), "merged\n");
    }

    #[test]
    fn merge_conflict_keeps_markers_and_backup() {
        let h = Harness::new();
        let source = h.write_source("git", "dot-gitconfig", "ours\n");
        break_link(&h.home.join(".gitconfig"), "theirs\n");

        let mut merger = MockMerger::new();
        merger.expect_merge().returning(|_, _, _| {
            Ok(MergeOutcome::Conflicted(
                b"<<<<<<< repo\nours\n=======\ntheirs\n>>>>>>> home\n".to_vec(),
            ))
        });
        let (ctx, log) =
            h.logged_context_with(h.opts(false), SyncMode::Merge(Box::new(merger)));

        let summary = sync_local(&ctx, &ctx.config.packages);
        assert_eq!(summary.merge_conflicts, vec![source.clone()]);
        assert!(std::fs::read_to_string(&source).unwrap().contains("<<<<<<< repo"));
        let backup = ctx.opts.sync_backup_dir.join("git/dot-gitconfig");
        assert_eq!(std::fs::read_to_string(backup).unwrap(), "ours\n");
        assert_eq!(log.messages(Level::Warn).len(), 1);
    }

    #[test]
    fn merge_failure_is_reported_per_file() {
        let h = Harness::new();
        let source = h.write_source("git", "dot-gitconfig", "ours\n");
        break_link(&h.home.join(".gitconfig"), "theirs\n");

        let mut merger = MockMerger::new();
        merger.expect_merge().returning(|_, _, _| {
            Err(MergeError::Failed {
                path: "git merge-file".to_string(),
                reason: "exit 255".to_string(),
            })
        });
        let ctx = h.context_with(h.opts(false), SyncMode::Merge(Box::new(merger)));

        let summary = sync_local(&ctx, &ctx.config.packages);
        assert_eq!(summary.failed, vec![source.clone()]);
        assert_eq!(std::fs::read_to_string(&source).unwrap(), "ours\n");
    }

    #[test]
    fn new_files_in_mapped_directories_are_added() {
        let h = Harness::new();
        h.write_source("nvim", "dot-config/nvim/init.lua", "-- init\n");
        let nvim = h.home.join(".config/nvim");
        std::fs::create_dir_all(&nvim).unwrap();
        std::fs::write(nvim.join("plugins"), "-- plugins\n").unwrap();
        std::fs::write(nvim.join(".DS_Store"), "").unwrap();
        std::fs::write(h.home.join(".bash_history"), "ls\n").unwrap();
        let ctx = h.context(false);

        let summary = sync_local(&ctx, &ctx.config.packages);
        let added = h.root.join("stow/nvim/dot-config/nvim/plugins");
        assert_eq!(summary.files_added, vec![added.clone()]);
        assert_eq!(std::fs::read_to_string(&added).unwrap(), "-- plugins\n");
        assert!(!h.root.join("stow/nvim/dot-bash_history").exists());
        assert_eq!(ctx.recorded()[0].kind, OperationKind::RemoveFile);
    }

    #[test]
    fn colliding_new_names_are_predicted_like_the_real_run() {
        let h = Harness::new();
        h.write_source("nvim", "dot-config/nvim/init.lua", "-- init\n");
        let nvim = h.home.join(".config/nvim");
        std::fs::create_dir_all(&nvim).unwrap();
        // Both map to `adot-b` under the legacy transform.
        std::fs::write(nvim.join("a.b"), "first\n").unwrap();
        std::fs::write(nvim.join("adot-b"), "second\n").unwrap();
        let added = h.root.join("stow/nvim/dot-config/nvim/adot-b");

        let (dry, log) = h.logged_context(true);
        let predicted = sync_local(&dry, &dry.config.packages);
        assert_eq!(predicted.files_added, vec![added.clone()]);
        assert_eq!(log.messages(Level::DryRun).len(), 1);
        assert!(!added.exists());

        let real = h.context(false);
        let actual = sync_local(&real, &real.config.packages);
        assert_eq!(actual.files_added, predicted.files_added);
        assert_eq!(std::fs::read_to_string(&added).unwrap(), "first\n");
    }

    #[test]
    fn ignored_new_files_are_not_added() {
        let h = Harness::new();
        h.write_source("ssh", "dot-ssh/config", "Host *\n");
        let ssh = h.home.join(".ssh");
        std::fs::create_dir_all(&ssh).unwrap();
        std::fs::write(ssh.join("id_ed25519"), "secret").unwrap();
        std::fs::write(ssh.join("known_hosts"), "host").unwrap();
        let mut ctx = h.context(false);
        ctx.config.packages[0].sync_ignore = vec![
            glob::Pattern::new("id_*").unwrap(),
            glob::Pattern::new("known_hosts*").unwrap(),
        ];

        let summary = sync_local(&ctx, &ctx.config.packages);
        assert!(summary.files_added.is_empty());
    }

    #[test]
    fn task_runs_only_in_sync_mode() {
        let h = Harness::new();
        assert!(!SyncPackages.should_run(&h.context(false)));
        let mut opts = h.opts(false);
        opts.sync_local = true;
        assert!(SyncPackages.should_run(&h.context_with(opts, SyncMode::Overwrite)));
    }
}
