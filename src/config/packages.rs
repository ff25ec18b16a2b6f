//! Package list: the fixed default order, or `conf/packages.toml`.
use serde::Deserialize;
use std::path::{Component, Path, PathBuf};

use super::toml_loader;
use crate::error::ConfigError;
use crate::paths::{PathTransformer, TransformKind};
use crate::platform::{Os, Platform};

/// Target base of the macOS VS Code package, relative to `$HOME`.
pub const VSCODE_TARGET: &str = "Library/Application Support/Code/User";

/// A named configuration bundle stowed from `stow/<name>/`.
#[derive(Debug, Clone)]
pub struct Package {
    /// Package name (`zsh`, `git`, ...).
    pub name: String,
    /// Source directory inside the repository.
    pub source_dir: PathBuf,
    /// Directory the package's files are linked into.
    pub target_base: PathBuf,
    /// Path mapping rule between source and target.
    pub transform: TransformKind,
    /// Home-side file names never pulled into the repository.
    pub sync_ignore: Vec<glob::Pattern>,
}

impl Package {
    /// Return the transformer for this package.
    #[must_use]
    pub fn transformer(&self) -> Box<dyn PathTransformer> {
        self.transform.transformer()
    }

    /// `true` if `file_name` matches one of the `sync_ignore` patterns.
    #[must_use]
    pub fn ignores(&self, file_name: &str) -> bool {
        self.sync_ignore.iter().any(|p| p.matches(file_name))
    }
}

/// A single `[[packages]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct PackageSpec {
    /// Package name; also the directory under `stow/`.
    pub name: String,
    /// Target base relative to `$HOME` (default: `$HOME` itself).
    #[serde(default)]
    pub target: Option<String>,
    /// Apply the `dot-` convention (default `true`).
    #[serde(default = "default_true")]
    pub dotfiles: bool,
    /// Restrict the package to one operating system.
    #[serde(default)]
    pub os: Option<Os>,
    /// Transform rule when `dotfiles` is enabled.
    #[serde(default)]
    pub transform: Option<TransformKind>,
    /// Glob patterns excluded from new-file discovery.
    #[serde(default)]
    pub sync_ignore: Vec<String>,
}

const fn default_true() -> bool {
    true
}

impl PackageSpec {
    fn simple(name: &str) -> Self {
        Self {
            name: name.to_string(),
            target: None,
            dotfiles: true,
            os: None,
            transform: None,
            sync_ignore: Vec::new(),
        }
    }

    /// Resolve this entry against the stow directory and home.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidSyntax`] if a `sync_ignore` pattern is
    /// not a valid glob, or `target` is absolute or climbs with `..`.
    pub fn resolve(self, stow_dir: &Path, home: &Path) -> Result<Package, ConfigError> {
        let transform = if self.dotfiles {
            self.transform.unwrap_or_default()
        } else {
            TransformKind::Verbatim
        };
        let sync_ignore = self
            .sync_ignore
            .iter()
            .map(|p| {
                glob::Pattern::new(p).map_err(|e| ConfigError::InvalidSyntax {
                    file: "packages.toml".to_string(),
                    message: format!("package '{}': bad sync_ignore pattern '{p}': {e}", self.name),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let target_base = match self.target.as_deref() {
            None => home.to_path_buf(),
            Some(t) if is_home_relative(Path::new(t)) => home.join(t),
            Some(t) => {
                return Err(ConfigError::InvalidSyntax {
                    file: "packages.toml".to_string(),
                    message: format!(
                        "package '{}': target '{t}' must be a path below the home directory",
                        self.name
                    ),
                });
            }
        };
        Ok(Package {
            source_dir: stow_dir.join(&self.name),
            name: self.name,
            target_base,
            transform,
            sync_ignore,
        })
    }
}

/// Only plain names: no root, drive prefix or `..`.
fn is_home_relative(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Top-level shape of `conf/packages.toml`.
#[derive(Debug, Default, Deserialize)]
struct PackagesFile {
    #[serde(default)]
    packages: Vec<PackageSpec>,
}

/// The built-in package order: shells, git, ssh, terminals, editors, and the
/// macOS-only VS Code package last.
#[must_use]
pub fn default_specs() -> Vec<PackageSpec> {
    let mut specs: Vec<PackageSpec> = [
        "zsh", "bash", "git", "ssh", "tmux", "alacritty", "kitty", "nvim", "vim",
    ]
    .iter()
    .map(|name| PackageSpec::simple(name))
    .collect();

    if let Some(ssh) = specs.iter_mut().find(|s| s.name == "ssh") {
        ssh.sync_ignore = ["id_*", "*.pem", "*.key", "known_hosts*", "authorized_keys"]
            .iter()
            .map(ToString::to_string)
            .collect();
    }

    specs.push(PackageSpec {
        target: Some(VSCODE_TARGET.to_string()),
        dotfiles: false,
        os: Some(Os::Macos),
        ..PackageSpec::simple("vscode")
    });
    specs
}

/// Load the package list for `platform`, in processing order.
///
/// Uses `conf_file` when it exists and lists at least one package, otherwise
/// the built-in defaults. Packages restricted to another OS are dropped.
///
/// # Errors
///
/// Returns an error if `conf_file` exists but cannot be read or parsed.
pub fn load(
    conf_file: &Path,
    stow_dir: &Path,
    home: &Path,
    platform: &Platform,
) -> Result<Vec<Package>, ConfigError> {
    let file: PackagesFile = toml_loader::load_config(conf_file)?;
    let specs = if file.packages.is_empty() {
        default_specs()
    } else {
        file.packages
    };

    specs
        .into_iter()
        .filter(|s| platform.supports(s.os))
        .map(|s| s.resolve(stow_dir, home))
        .collect()
}
