use std::path::PathBuf;

use clap::{CommandFactory, Parser};

/// Top-level CLI entry point for the dotfiles provisioning engine.
#[derive(Parser, Debug, Clone, Default)]
#[command(
    name = "dotfiles",
    about = "Link dotfiles into the home directory and sync local edits back",
    version
)]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    /// Preview changes without applying
    #[arg(short = 'd', long)]
    pub dry_run: bool,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Copy locally edited files back into the repository instead of linking
    #[arg(long)]
    pub sync_local: bool,

    /// Three-way merge local edits instead of overwriting (with --sync-local)
    #[arg(long)]
    pub merge: bool,

    /// Disable the transient progress line
    #[arg(long)]
    pub no_progress: bool,

    /// Keep replaced files at a backup path instead of deleting them
    #[arg(long)]
    pub backup: bool,

    /// Override dotfiles root directory
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Override home directory
    #[arg(long)]
    pub home: Option<PathBuf>,

    /// Process only these packages
    #[arg(long, value_delimiter = ',')]
    pub only: Vec<String>,

    /// Skip these packages
    #[arg(long, value_delimiter = ',')]
    pub skip: Vec<String>,

    /// Directory for the generated rollback script
    #[arg(long)]
    pub rollback_dir: Option<PathBuf>,
}

impl Cli {
    /// Parse `args`, dropping anything this command does not recognize.
    ///
    /// Returns the parsed options and the arguments that were ignored.
    /// `--help` and `--version` still print and exit through clap.
    pub fn parse_lenient<I, S>(args: I) -> (Self, Vec<String>)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (kept, dropped) = split_known(args.into_iter().map(Into::into).collect());
        (Self::parse_from(kept), dropped)
    }
}

/// A flag clap knows about and whether it consumes a value.
struct KnownFlag {
    long: Option<String>,
    short: Option<char>,
    takes_value: bool,
}

fn known_flags() -> Vec<KnownFlag> {
    let mut cmd = Cli::command();
    cmd.build();
    cmd.get_arguments()
        .filter(|a| !a.is_positional())
        .map(|a| KnownFlag {
            long: a.get_long().map(str::to_string),
            short: a.get_short(),
            takes_value: a.get_action().takes_values(),
        })
        .collect()
}

/// Split raw arguments into the ones clap should see and the ones to drop.
///
/// The first argument (program name) is always kept. Values following a
/// known value-taking flag are kept with it. Short clusters keep only their
/// known letters.
fn split_known(args: Vec<String>) -> (Vec<String>, Vec<String>) {
    let flags = known_flags();
    let by_long = |name: &str| flags.iter().find(|f| f.long.as_deref() == Some(name));
    let by_short = |c: char| flags.iter().find(|f| f.short == Some(c));

    let mut kept = Vec::with_capacity(args.len());
    let mut dropped = Vec::new();
    let mut iter = args.into_iter();
    if let Some(program) = iter.next() {
        kept.push(program);
    }

    while let Some(arg) = iter.next() {
        if arg == "--" {
            dropped.extend(iter.by_ref());
            break;
        }
        if let Some(body) = arg.strip_prefix("--") {
            let (name, inline_value) = match body.split_once('=') {
                Some((name, _)) => (name, true),
                None => (body, false),
            };
            match by_long(name) {
                Some(flag) if flag.takes_value && !inline_value => {
                    kept.push(arg);
                    if let Some(value) = iter.next() {
                        kept.push(value);
                    }
                }
                Some(flag) if flag.takes_value || !inline_value => kept.push(arg),
                _ => dropped.push(arg),
            }
        } else if let Some(letters) = arg.strip_prefix('-').filter(|l| !l.is_empty()) {
            let cluster: String = letters.chars().filter(|c| by_short(*c).is_some()).collect();
            if cluster.len() != letters.len() {
                dropped.push(arg.clone());
            }
            if cluster.is_empty() {
                continue;
            }
            let wants_value = letters
                .chars()
                .last()
                .and_then(by_short)
                .is_some_and(|f| f.takes_value);
            kept.push(format!("-{cluster}"));
            if wants_value && let Some(value) = iter.next() {
                kept.push(value);
            }
        } else {
            dropped.push(arg);
        }
    }
    (kept, dropped)
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn lenient(args: &[&str]) -> (Cli, Vec<String>) {
        Cli::parse_lenient(std::iter::once("dotfiles").chain(args.iter().copied()))
    }

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_dry_run_short() {
        let cli = Cli::parse_from(["dotfiles", "-d"]);
        assert!(cli.dry_run);
    }

    #[test]
    fn parse_sync_flags() {
        let cli = Cli::parse_from(["dotfiles", "--sync-local", "--merge", "--no-progress"]);
        assert!(cli.sync_local);
        assert!(cli.merge);
        assert!(cli.no_progress);
        assert!(!cli.dry_run);
    }

    #[test]
    fn parse_package_filters() {
        let cli = Cli::parse_from(["dotfiles", "--only", "git,zsh", "--skip", "ssh"]);
        assert_eq!(cli.only, vec!["git", "zsh"]);
        assert_eq!(cli.skip, vec!["ssh"]);
    }

    #[test]
    fn parse_path_overrides() {
        let cli = Cli::parse_from([
            "dotfiles",
            "--root",
            "/src/dotfiles",
            "--home",
            "/home/me",
            "--rollback-dir=/tmp/rb",
        ]);
        assert_eq!(cli.root, Some(PathBuf::from("/src/dotfiles")));
        assert_eq!(cli.home, Some(PathBuf::from("/home/me")));
        assert_eq!(cli.rollback_dir, Some(PathBuf::from("/tmp/rb")));
    }

    #[test]
    fn defaults_are_all_off() {
        let cli = Cli::parse_from(["dotfiles"]);
        assert!(!cli.dry_run && !cli.verbose && !cli.sync_local && !cli.merge);
        assert!(!cli.backup && !cli.no_progress);
        assert!(cli.only.is_empty() && cli.root.is_none());
    }

    #[test]
    fn lenient_drops_unknown_long_flags() {
        let (cli, dropped) = lenient(&["--profile=arch", "--dry-run", "--install-packages"]);
        assert!(cli.dry_run);
        assert_eq!(dropped, vec!["--profile=arch", "--install-packages"]);
    }

    #[test]
    fn lenient_keeps_values_of_known_flags() {
        let (cli, dropped) = lenient(&["--root", "/src/dotfiles", "--only", "git", "stray"]);
        assert_eq!(cli.root, Some(PathBuf::from("/src/dotfiles")));
        assert_eq!(cli.only, vec!["git"]);
        assert_eq!(dropped, vec!["stray"]);
    }

    #[test]
    fn lenient_filters_short_clusters() {
        let (cli, dropped) = lenient(&["-dvx"]);
        assert!(cli.dry_run);
        assert!(cli.verbose);
        assert_eq!(dropped, vec!["-dvx"]);

        let (cli, dropped) = lenient(&["-q"]);
        assert!(!cli.dry_run);
        assert_eq!(dropped, vec!["-q"]);
    }

    #[test]
    fn lenient_drops_inline_value_on_boolean_flag() {
        let (cli, dropped) = lenient(&["--merge=yes", "--sync-local"]);
        assert!(!cli.merge);
        assert!(cli.sync_local);
        assert_eq!(dropped, vec!["--merge=yes"]);
    }

    #[test]
    fn lenient_drops_everything_after_separator() {
        let (cli, dropped) = lenient(&["-d", "--", "--verbose"]);
        assert!(cli.dry_run);
        assert!(!cli.verbose);
        assert_eq!(dropped, vec!["--verbose"]);
    }
}
