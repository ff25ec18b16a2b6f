//! Forward provisioning: link every package file into the home directory.
use anyhow::Result;
use std::path::Path;

use super::entries::{LinkEntry, enumerate};
use super::{Context, Summary, Task, TaskResult};
use crate::config::Package;
use crate::resources::classify::{Classification, classify};
use crate::resources::resolve::{Action, Removed, SetAside, resolve, set_aside};
use crate::resources::symlink::SymlinkResource;
use crate::resources::{Applicable, ResourceChange};
use crate::rollback::Operation;

/// Links package files into the home directory.
#[derive(Debug)]
pub struct ProvisionPackages;

impl Task for ProvisionPackages {
    fn name(&self) -> &str {
        "Provision symlinks"
    }

    fn should_run(&self, ctx: &Context) -> bool {
        !ctx.opts.sync_local
    }

    fn run(&self, ctx: &Context) -> Result<TaskResult> {
        provision(ctx, &ctx.config.packages).finish(ctx)
    }
}

/// Provision `packages` in order and return the combined tally.
///
/// Per-entry failures are logged and counted; they never stop the run.
pub fn provision(ctx: &Context, packages: &[Package]) -> Summary {
    let mut total = Summary::default();
    for (i, package) in packages.iter().enumerate() {
        ctx.log.progress(i + 1, packages.len(), &package.name);
        total += provision_package(ctx, package);
    }
    ctx.log.clear_progress();
    total
}

/// Provision a single package.
pub fn provision_package(ctx: &Context, package: &Package) -> Summary {
    let mut summary = Summary::default();
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
        provision_entry(ctx, package, entry, &mut summary);
    }
    summary
}

fn provision_entry(ctx: &Context, package: &Package, entry: &LinkEntry, summary: &mut Summary) {
    let target = &entry.target_path;
    let shown = ctx.display(target);

    let classification = match classify(target, &entry.source_file, package) {
        Ok(c) => c,
        Err(e) => {
            ctx.log.warn(&e.to_string());
            summary.skipped += 1;
            return;
        }
    };
    let action = resolve(&classification);
    if !action.mutates() {
        match &classification {
            Classification::CoveredByAncestorSymlink(dir) => ctx.log.debug(&format!(
                "{shown}: covered by linked directory {}",
                ctx.display(dir)
            )),
            _ => ctx.log.debug(&format!("{shown}: already linked")),
        }
        summary.already_satisfied += 1;
        return;
    }

    let resolved = match ctx.gate.check(target) {
        Ok(resolved) => resolved,
        Err(e) => {
            ctx.log.error(&e.to_string());
            summary.skipped += 1;
            return;
        }
    };

    let replacing = action == Action::RemoveThenLink;
    if ctx.opts.dry_run {
        if replacing {
            ctx.log.dry_run(&format!(
                "would replace {shown} ({})",
                describe(&classification)
            ));
            summary.replaced.push(target.clone());
        } else {
            ctx.log.dry_run(&format!(
                "would link {shown} -> {}",
                entry.source_file.display()
            ));
            summary.linked.push(target.clone());
        }
        return;
    }

    match link_entry(ctx, entry, &resolved, replacing) {
        Ok(()) => {
            if replacing {
                summary.replaced.push(target.clone());
            } else {
                summary.linked.push(target.clone());
            }
        }
        Err(e) => {
            ctx.log.warn(&format!("{shown}: {e:#}"));
            summary.failed.push(target.clone());
        }
    }
}

/// Move a conflict aside if needed, create the link, and record the undo
/// steps. `target` is the gate-resolved location.
///
/// An error means the target is as it was before. Once the link exists the
/// entry counts as linked; a rollback record that cannot be written is only
/// warned about.
///
/// Records are ordered so the script, read top to bottom, first drops the
/// new link, then brings back what was there, then removes created parents.
fn link_entry(ctx: &Context, entry: &LinkEntry, target: &Path, replacing: bool) -> Result<()> {
    let aside = if replacing {
        Some(set_aside(&ctx.gate, target, &ctx.opts.timestamp)?)
    } else {
        None
    };

    let link = SymlinkResource::new(entry.source_file.clone(), target.to_path_buf());
    let created_dirs = match apply_or_restore(ctx, &link, aside.as_ref())? {
        ResourceChange::Applied { created_dirs } => created_dirs,
        ResourceChange::AlreadyCorrect => return Ok(()),
    };
    ctx.log.debug(&format!("linked {}", link.description()));

    let restore = aside.map(|aside| settle(ctx, &aside));
    let ops = std::iter::once(Operation::link_created(target))
        .chain(restore)
        .chain(created_dirs.iter().map(|dir| Operation::directory_created(dir)));
    for op in ops {
        record_or_warn(ctx, op);
    }
    Ok(())
}

/// Apply `link`; if that fails, move the set-aside object back.
fn apply_or_restore(
    ctx: &Context,
    link: &dyn Applicable,
    aside: Option<&SetAside>,
) -> Result<ResourceChange> {
    let err = match link.apply() {
        Ok(change) => return Ok(change),
        Err(e) => e,
    };
    if let Some(aside) = aside
        && let Err(restore_err) = aside.restore()
    {
        ctx.log.warn(&format!(
            "{}: left at {}: {restore_err:#}",
            ctx.display(&aside.target),
            ctx.display(&aside.aside)
        ));
        record_or_warn(ctx, Operation::backup_taken(&aside.target, &aside.aside));
    }
    Err(err)
}

/// Keep the set-aside object as the backup, or delete it, and return the
/// matching undo step.
fn settle(ctx: &Context, aside: &SetAside) -> Operation {
    let shown = ctx.display(&aside.target);
    if ctx.opts.backup_conflicts {
        ctx.log
            .debug(&format!("backed up {shown} to {}", ctx.display(&aside.aside)));
        return Operation::backup_taken(&aside.target, &aside.aside);
    }
    if let Err(e) = aside.discard() {
        ctx.log
            .warn(&format!("{shown}: kept at {}: {e:#}", ctx.display(&aside.aside)));
        return Operation::backup_taken(&aside.target, &aside.aside);
    }
    ctx.log
        .debug(&format!("removed {shown} ({})", removed_kind(&aside.removed)));
    match &aside.removed {
        Removed::Link { destination } => Operation::link_removed(&aside.target, destination),
        Removed::File { sha256 } => Operation::object_removed(&aside.target, Some(sha256)),
        Removed::Directory => Operation::object_removed(&aside.target, None),
    }
}

fn record_or_warn(ctx: &Context, op: Operation) {
    let path = op.path.clone();
    if let Err(e) = ctx.record(op) {
        ctx.log.warn(&format!(
            "{}: not in rollback script: {e:#}",
            ctx.display(&path)
        ));
    }
}

fn describe(classification: &Classification) -> String {
    match classification {
        Classification::WrongLink(dest) => format!("link to {}", dest.display()),
        Classification::ForeignObject => "existing file".to_string(),
        other => format!("{other:?}"),
    }
}

const fn removed_kind(removed: &Removed) -> &'static str {
    match removed {
        Removed::Link { .. } => "stale link",
        Removed::File { .. } => "file",
        Removed::Directory => "directory",
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::logging::Level;
    use crate::rollback::{OperationKind, RollbackRecorder};
    use crate::tasks::test_helpers::Harness;

    #[test]
    fn creates_links_with_parent_directories() {
        let h = Harness::new();
        let source = h.write_source("git", "dot-config/git/ignore", "*.swp\n");
        let ctx = h.context(false);

        let summary = provision(&ctx, &ctx.config.packages);
        let target = h.home.join(".config/git/ignore");
        assert_eq!(summary.linked, vec![target.clone()]);
        assert_eq!(std::fs::read_link(&target).unwrap(), source);

        let kinds: Vec<OperationKind> = ctx.recorded().iter().map(|op| op.kind).collect();
        assert_eq!(
            kinds,
            vec![
                OperationKind::RemoveSymlink,
                OperationKind::RemoveDirectoryIfEmpty,
                OperationKind::RemoveDirectoryIfEmpty,
            ]
        );
    }

    #[test]
    fn second_run_changes_nothing() {
        let h = Harness::new();
        h.write_source("zsh", "dot-zshrc", "export A=1\n");
        h.write_source("zsh", "dot-zshenv", "export B=1\n");
        let first = h.context(false);
        assert_eq!(provision(&first, &first.config.packages).links_created(), 2);

        let second = h.context(false);
        let summary = provision(&second, &second.config.packages);
        assert_eq!(summary.links_created(), 0);
        assert_eq!(summary.already_satisfied, 2);
        assert!(second.recorded().is_empty());
    }

    #[test]
    fn dry_run_predicts_without_mutating() {
        let h = Harness::new();
        h.write_source("zsh", "dot-zshrc", "repo\n");
        h.write_source("zsh", "dot-zprofile", "repo\n");
        std::fs::write(h.home.join(".zprofile"), "mine\n").unwrap();
        let (ctx, log) = h.logged_context(true);

        let summary = provision(&ctx, &ctx.config.packages);
        assert_eq!(summary.linked, vec![h.home.join(".zshrc")]);
        assert_eq!(summary.replaced, vec![h.home.join(".zprofile")]);
        assert!(!h.home.join(".zshrc").exists());
        assert_eq!(
            std::fs::read_to_string(h.home.join(".zprofile")).unwrap(),
            "mine\n"
        );
        assert_eq!(log.messages(Level::DryRun).len(), 2);
        assert!(ctx.recorded().is_empty());
    }

    #[test]
    fn foreign_file_is_removed_and_hashed() {
        let h = Harness::new();
        h.write_source("git", "dot-gitconfig", "A");
        std::fs::write(h.home.join(".gitconfig"), "abc").unwrap();
        let ctx = h.context(false);

        let summary = provision(&ctx, &ctx.config.packages);
        assert_eq!(summary.conflicts_removed(), 1);
        assert!(
            !h.home
                .join(format!(".gitconfig.dotfiles-backup-{}", ctx.opts.timestamp))
                .exists(),
            "nothing is kept without --backup"
        );
        let ops = ctx.recorded();
        assert_eq!(ops[0].kind, OperationKind::RemoveSymlink);
        assert_eq!(ops[1].kind, OperationKind::RemoveFile);
        assert!(ops[1].description.contains(
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        ));
    }

    #[test]
    fn backup_flag_copies_conflict_aside() {
        let h = Harness::new();
        h.write_source("git", "dot-gitconfig", "A");
        std::fs::write(h.home.join(".gitconfig"), "B").unwrap();
        let mut opts = h.opts(false);
        opts.backup_conflicts = true;
        let ctx = h.context_with(opts, crate::tasks::SyncMode::Overwrite);

        provision(&ctx, &ctx.config.packages);
        let backup = h
            .home
            .join(format!(".gitconfig.dotfiles-backup-{}", ctx.opts.timestamp));
        assert_eq!(std::fs::read_to_string(backup).unwrap(), "B");
        assert_eq!(ctx.recorded()[1].kind, OperationKind::RestoreBackup);
    }

    /// A link that cannot be created, as on Windows without symlink
    /// privilege.
    struct FailingLink;

    impl Applicable for FailingLink {
        fn description(&self) -> String {
            "unlinkable".to_string()
        }

        fn apply(&self) -> Result<ResourceChange> {
            anyhow::bail!("no symlink privilege")
        }
    }

    #[test]
    fn failed_link_puts_the_conflict_back() {
        let h = Harness::new();
        let target = h.home.join(".gitconfig");
        std::fs::write(&target, "mine").unwrap();
        let ctx = h.context(false);

        let aside = set_aside(&ctx.gate, &target, &ctx.opts.timestamp).unwrap();
        assert!(!target.exists());
        let err = apply_or_restore(&ctx, &FailingLink, Some(&aside)).unwrap_err();

        assert!(err.to_string().contains("no symlink privilege"));
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "mine");
        assert!(!aside.aside.exists());
        assert!(ctx.recorded().is_empty());
    }

    #[test]
    fn occupied_backup_path_fails_the_entry_untouched() {
        let h = Harness::new();
        h.write_source("git", "dot-gitconfig", "A");
        let target = h.home.join(".gitconfig");
        std::fs::write(&target, "mine").unwrap();
        let (ctx, log) = h.logged_context(false);
        let taken = h
            .home
            .join(format!(".gitconfig.dotfiles-backup-{}", ctx.opts.timestamp));
        std::fs::write(&taken, "old").unwrap();

        let summary = provision(&ctx, &ctx.config.packages);
        assert_eq!(summary.failed, vec![target.clone()]);
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "mine");
        assert_eq!(std::fs::read_to_string(&taken).unwrap(), "old");
        assert_eq!(log.messages(Level::Warn).len(), 1);
        assert!(ctx.recorded().is_empty());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn unwritable_rollback_script_still_counts_the_link() {
        let h = Harness::new();
        let source = h.write_source("git", "dot-gitconfig", "A");
        std::fs::write(h.home.join(".gitconfig"), "mine").unwrap();
        let full = std::fs::OpenOptions::new()
            .write(true)
            .open("/dev/full")
            .unwrap();
        let recorder = RollbackRecorder::writing_to("/dev/full".into(), full);
        let (ctx, log) = h.logged_context_recording(
            h.opts(false),
            crate::tasks::SyncMode::Overwrite,
            recorder,
        );

        let summary = provision(&ctx, &ctx.config.packages);
        assert_eq!(summary.replaced, vec![h.home.join(".gitconfig")]);
        assert!(summary.failed.is_empty());
        assert_eq!(std::fs::read_link(h.home.join(".gitconfig")).unwrap(), source);
        let kinds: Vec<OperationKind> = ctx.recorded().iter().map(|op| op.kind).collect();
        assert_eq!(kinds, vec![OperationKind::RemoveSymlink, OperationKind::RemoveFile]);
        let warnings = log.messages(Level::Warn);
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("not in rollback script"));
    }

    #[cfg(unix)]
    #[test]
    fn dotdot_through_symlinked_target_base_is_refused() {
        let h = Harness::new();
        h.write_source("git", "dot-gitconfig", "A");
        let outside = h.home.parent().unwrap().join("outside");
        std::fs::create_dir_all(outside.join("deep")).unwrap();
        std::fs::write(outside.join(".gitconfig"), "keep").unwrap();
        std::os::unix::fs::symlink(outside.join("deep"), h.home.join("link")).unwrap();
        let (mut ctx, log) = h.logged_context(false);
        ctx.config.packages[0].target_base = h.home.join("link/..");

        let summary = provision(&ctx, &ctx.config.packages);
        assert_eq!(summary.skipped, 1);
        assert_eq!(log.messages(Level::Error).len(), 1);
        assert_eq!(
            std::fs::read_to_string(outside.join(".gitconfig")).unwrap(),
            "keep"
        );
    }

    #[cfg(unix)]
    #[test]
    fn stale_link_is_replaced_and_restorable() {
        let h = Harness::new();
        let source = h.write_source("vim", "dot-vimrc", "set nu\n");
        std::os::unix::fs::symlink("/nonexistent/vimrc", h.home.join(".vimrc")).unwrap();
        let ctx = h.context(false);

        let summary = provision(&ctx, &ctx.config.packages);
        assert_eq!(summary.replaced, vec![h.home.join(".vimrc")]);
        assert_eq!(std::fs::read_link(h.home.join(".vimrc")).unwrap(), source);
        assert!(ctx.recorded()[1]
            .inverse_command
            .contains("ln -s '/nonexistent/vimrc'"));
    }

    #[cfg(unix)]
    #[test]
    fn linked_directory_covers_its_files() {
        let h = Harness::new();
        h.write_source("git", "dot-config/git/config", "[user]\n");
        std::fs::create_dir_all(h.home.join(".config")).unwrap();
        std::os::unix::fs::symlink(
            h.root.join("stow/git/dot-config/git"),
            h.home.join(".config/git"),
        )
        .unwrap();
        let ctx = h.context(false);

        let summary = provision(&ctx, &ctx.config.packages);
        assert_eq!(summary.already_satisfied, 1);
        assert_eq!(summary.links_created(), 0);
        assert!(ctx.recorded().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn target_resolving_into_repository_is_refused() {
        let h = Harness::new();
        h.write_source("nvim", "dot-config/nvim/init.lua", "-- repo\n");
        let elsewhere = h.root.join("scratch");
        std::fs::create_dir_all(&elsewhere).unwrap();
        std::os::unix::fs::symlink(&elsewhere, h.home.join(".config")).unwrap();
        let (ctx, log) = h.logged_context(false);

        let summary = provision(&ctx, &ctx.config.packages);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.links_created(), 0);
        assert_eq!(log.messages(Level::Error).len(), 1);
        assert!(!elsewhere.join("nvim").exists());
    }

    #[test]
    fn missing_source_dir_is_skipped_quietly() {
        let h = Harness::new();
        let ctx = h.context(false);
        let summary = provision_package(&ctx, &h.package("tmux"));
        assert_eq!(summary, Summary::default());
    }

    #[test]
    fn task_is_not_applicable_in_sync_mode() {
        let h = Harness::new();
        let mut opts = h.opts(false);
        opts.sync_local = true;
        let ctx = h.context_with(opts, crate::tasks::SyncMode::Overwrite);
        assert!(!ProvisionPackages.should_run(&ctx));
    }
}
