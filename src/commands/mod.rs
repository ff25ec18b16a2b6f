//! Top-level command orchestration.
pub mod run;

use std::path::PathBuf;

use anyhow::Result;

use crate::cli::Cli;
use crate::config::Config;
use crate::logging::Logger;
use crate::platform::Platform;
use crate::tasks::{self, Context, Task};

/// Shared state produced by the common command setup sequence.
///
/// Resolves the repository root and home directory, then loads the package
/// list for the current platform.
#[derive(Debug)]
pub struct CommandSetup {
    /// Detected platform.
    pub platform: Platform,
    /// Home directory.
    pub home: PathBuf,
    /// Repository layout and selected packages.
    pub config: Config,
}

impl CommandSetup {
    /// Detect the platform, resolve boundaries, and load configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the root or home directory cannot be determined,
    /// `stow/` is missing, or `conf/packages.toml` fails to parse.
    pub fn init(cli: &Cli, log: &Logger) -> Result<Self> {
        let platform = Platform::detect();
        let root = run::resolve_root(cli.root.as_deref())?;
        let home = run::resolve_home(cli.home.as_deref())?;
        log.debug(&format!("platform: {}", platform.os));
        log.debug(&format!("root: {}", root.display()));
        log.debug(&format!("home: {}", home.display()));

        log.stage("Loading configuration");
        let mut config = Config::load(&root, &home, &platform)?;
        let available: Vec<String> = config.packages.iter().map(|p| p.name.clone()).collect();
        for name in cli.only.iter().chain(&cli.skip) {
            if !available.contains(name) {
                log.warn(&format!("unknown package: {name}"));
            }
        }
        config.retain_selected(&cli.only, &cli.skip);
        log.info(&format!(
            "loaded {} of {} packages: {}",
            config.packages.len(),
            available.len(),
            config
                .packages
                .iter()
                .map(|p| p.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ));

        Ok(Self {
            platform,
            home,
            config,
        })
    }
}

/// Execute every task in order, close the rollback script, print the
/// summary, and bail if any task failed.
///
/// # Errors
///
/// Returns an error if one or more tasks recorded a failure.
pub fn run_tasks_to_completion<'a>(
    tasks: impl IntoIterator<Item = &'a dyn Task>,
    ctx: &Context,
    log: &Logger,
) -> Result<()> {
    for task in tasks {
        tasks::execute(task, ctx);
    }

    finish_rollback(ctx, log);
    log.print_summary();

    let count = log.failure_count();
    if count > 0 {
        anyhow::bail!("{count} task(s) failed");
    }
    Ok(())
}

/// Finalize the rollback script and report where it is.
///
/// A script with nothing to undo is deleted.
fn finish_rollback(ctx: &Context, log: &Logger) {
    let recorded = ctx.recorded().len();
    match ctx.finalize_rollback("rollback complete") {
        Ok(Some(path)) if recorded == 0 => {
            if let Err(e) = std::fs::remove_file(&path) {
                log.debug(&format!("cannot remove {}: {e}", path.display()));
            }
        }
        Ok(Some(path)) => {
            log.info(&format!(
                "rollback script ({recorded} operations): {}",
                path.display()
            ));
        }
        Ok(None) => {}
        Err(e) => log.warn(&format!("rollback script incomplete: {e:#}")),
    }
}
