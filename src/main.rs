use std::sync::Arc;

use anyhow::Result;
use dotfiles_stow::cli::Cli;
use dotfiles_stow::{commands, logging};

fn main() -> Result<()> {
    let _ = enable_ansi_support::enable_ansi_support();
    let (args, ignored) =
        Cli::parse_lenient(std::env::args_os().map(|a| a.to_string_lossy().into_owned()));
    logging::init_subscriber(args.verbose, "dotfiles");
    let log = Arc::new(logging::Logger::new("dotfiles", !args.no_progress));
    for arg in &ignored {
        log.debug(&format!("ignoring unrecognized argument: {arg}"));
    }

    commands::run::run(&args, &log)
}
