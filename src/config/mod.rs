//! Repository layout and package list.
pub mod packages;
pub mod toml_loader;

use std::path::{Path, PathBuf};

pub use packages::Package;

use crate::error::ConfigError;
use crate::platform::Platform;

/// Directory under the repository root holding one subdirectory per package.
pub const STOW_DIR: &str = "stow";

/// Optional package list override, relative to the repository root.
pub const PACKAGES_FILE: &str = "conf/packages.toml";

/// All configuration for a run.
#[derive(Debug, Clone)]
pub struct Config {
    /// Repository root.
    pub root: PathBuf,
    /// `<root>/stow`.
    pub stow_dir: PathBuf,
    /// Packages in processing order, already filtered for the platform.
    pub packages: Vec<Package>,
}

impl Config {
    /// Load configuration for the repository at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingDirectory`] if `<root>/stow` does not
    /// exist, or a parse error from `conf/packages.toml`.
    pub fn load(root: &Path, home: &Path, platform: &Platform) -> Result<Self, ConfigError> {
        let stow_dir = root.join(STOW_DIR);
        if !stow_dir.is_dir() {
            return Err(ConfigError::MissingDirectory { path: stow_dir });
        }
        let packages = packages::load(&root.join(PACKAGES_FILE), &stow_dir, home, platform)?;
        Ok(Self {
            root: root.to_path_buf(),
            stow_dir,
            packages,
        })
    }

    /// Keep only the packages selected by `--only` / `--skip`.
    ///
    /// An empty `only` list selects every package.
    pub fn retain_selected(&mut self, only: &[String], skip: &[String]) {
        self.packages.retain(|p| {
            (only.is_empty() || only.iter().any(|n| *n == p.name))
                && !skip.iter().any(|n| *n == p.name)
        });
    }
}
