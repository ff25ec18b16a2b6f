use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;

use super::{CommandSetup, run_tasks_to_completion};
use crate::cli::Cli;
use crate::config::STOW_DIR;
use crate::error::ConfigError;
use crate::exec::SystemExecutor;
use crate::logging::{Log, Logger, dotfiles_cache_dir};
use crate::merge::GitMergeFile;
use crate::rollback::RollbackRecorder;
use crate::safety::SafetyGate;
use crate::tasks::{self, Context, RunOptions, SyncMode};

#[cfg(windows)]
const HOME_VAR: &str = "USERPROFILE";
#[cfg(not(windows))]
const HOME_VAR: &str = "HOME";

/// Run the engine: provision links, or with `--sync-local` pull local edits
/// back into the repository.
///
/// # Errors
///
/// Returns an error if the run cannot start (root, home, configuration,
/// merge utility, rollback script) or if any task failed.
pub fn run(cli: &Cli, log: &Arc<Logger>) -> Result<()> {
    let version = option_env!("DOTFILES_VERSION").unwrap_or(env!("CARGO_PKG_VERSION"));
    log.info(&format!("dotfiles {version}"));

    let setup = CommandSetup::init(cli, log)?;
    let gate = SafetyGate::new(&setup.home, &setup.config.root)?;

    let timestamp = chrono::Local::now().format("%Y%m%d-%H%M%S").to_string();
    let cache = dotfiles_cache_dir();
    let scratch = cache.join(format!("scratch-{timestamp}"));
    install_interrupt_handler(&scratch, log);

    let sync_mode = select_sync_mode(cli, &scratch, log)?;
    let rollback = if cli.dry_run {
        RollbackRecorder::in_memory()
    } else {
        RollbackRecorder::create(cli.rollback_dir.as_deref().unwrap_or(&cache), &timestamp)?
    };
    let opts = RunOptions {
        dry_run: cli.dry_run,
        sync_local: cli.sync_local,
        backup_conflicts: cli.backup,
        sync_backup_dir: cache.join("backups").join(&timestamp),
        timestamp,
    };
    let ctx = Context::new(
        setup.config,
        Arc::clone(log) as Arc<dyn Log>,
        setup.home,
        gate,
        opts,
        sync_mode,
        rollback,
    );

    let all = tasks::all_tasks();
    let result = run_tasks_to_completion(all.iter().map(AsRef::as_ref), &ctx, log);
    if scratch.exists()
        && let Err(e) = std::fs::remove_dir_all(&scratch)
    {
        log.debug(&format!("cannot remove {}: {e}", scratch.display()));
    }
    result
}

/// Remove the run's scratch directory and exit 130 on Ctrl-C.
///
/// Completed links stay in place; the rollback script written so far
/// undoes them.
fn install_interrupt_handler(scratch: &Path, log: &Logger) {
    let scratch = scratch.to_path_buf();
    let installed = ctrlc::set_handler(move || {
        let _ = std::fs::remove_dir_all(&scratch);
        std::process::exit(130);
    });
    if let Err(e) = installed {
        log.debug(&format!("interrupt handler not installed: {e}"));
    }
}

fn select_sync_mode(cli: &Cli, scratch: &Path, log: &Logger) -> Result<SyncMode> {
    if !cli.merge {
        return Ok(SyncMode::Overwrite);
    }
    if !cli.sync_local {
        log.warn("--merge has no effect without --sync-local");
        return Ok(SyncMode::Overwrite);
    }
    let merger = GitMergeFile::detect(Arc::new(SystemExecutor), scratch)?;
    log.debug("merging with git merge-file");
    Ok(SyncMode::Merge(Box::new(merger)))
}

/// Resolve the dotfiles root directory from `--root` or auto-detection.
///
/// # Errors
///
/// Returns [`ConfigError::RootNotFound`] if no candidate qualifies.
pub fn resolve_root(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
    resolve_root_with(
        explicit,
        std::env::var_os("DOTFILES_ROOT"),
        std::env::current_dir().ok().as_deref(),
        std::env::current_exe().ok().as_deref(),
    )
}

/// Candidates in order: explicit path, `DOTFILES_ROOT`, the git work tree
/// containing `cwd`, the binary's install location, `cwd` itself.
///
/// Explicit and environment roots are taken as given. Detected roots must
/// contain `stow/`.
fn resolve_root_with(
    explicit: Option<&Path>,
    env_root: Option<OsString>,
    cwd: Option<&Path>,
    exe: Option<&Path>,
) -> Result<PathBuf, ConfigError> {
    if let Some(root) = explicit {
        return Ok(root.to_path_buf());
    }
    if let Some(root) = env_root.filter(|r| !r.is_empty()) {
        return Ok(PathBuf::from(root));
    }
    if let Some(root) = cwd.and_then(discover_work_tree)
        && is_root(&root)
    {
        return Ok(root);
    }
    if let Some(parent) = exe.and_then(Path::parent) {
        // cli/target/release/ or bin/
        for candidate in [parent.join("../../.."), parent.join("..")] {
            if is_root(&candidate) {
                return dunce::canonicalize(&candidate).map_err(|_| ConfigError::RootNotFound);
            }
        }
    }
    match cwd {
        Some(cwd) if is_root(cwd) => Ok(cwd.to_path_buf()),
        _ => Err(ConfigError::RootNotFound),
    }
}

fn discover_work_tree(dir: &Path) -> Option<PathBuf> {
    let repo = git2::Repository::discover(dir).ok()?;
    repo.workdir().map(Path::to_path_buf)
}

fn is_root(dir: &Path) -> bool {
    dir.join(STOW_DIR).is_dir()
}

/// Resolve the home directory from `--home` or the environment.
///
/// # Errors
///
/// Returns [`ConfigError::HomeNotSet`] if nothing names a home directory, or
/// [`ConfigError::MissingDirectory`] if it does not exist.
pub fn resolve_home(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
    resolve_home_with(explicit, std::env::var_os(HOME_VAR))
}

fn resolve_home_with(
    explicit: Option<&Path>,
    env_home: Option<OsString>,
) -> Result<PathBuf, ConfigError> {
    let home = explicit
        .map(Path::to_path_buf)
        .or_else(|| env_home.filter(|h| !h.is_empty()).map(PathBuf::from))
        .ok_or(ConfigError::HomeNotSet)?;
    if !home.is_dir() {
        return Err(ConfigError::MissingDirectory { path: home });
    }
    Ok(home)
}
