//! Enumerate the link entries of a package.
use anyhow::{Context as _, Result};
use std::path::{Path, PathBuf};

use crate::config::Package;
use crate::paths::rel_to_string;

/// File name never linked or synced.
pub const IGNORED_FILE: &str = ".DS_Store";

/// One repository file and the home path it is linked at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEntry {
    /// Absolute path of the repository file.
    pub source_file: PathBuf,
    /// Path relative to the package source directory, `/`-separated.
    pub repo_relative_path: String,
    /// `repo_relative_path` after the package's path transform.
    pub transformed_relative_path: String,
    /// Always `target_base / transformed_relative_path`.
    pub target_path: PathBuf,
}

/// List every regular file under `package.source_dir`, sorted by path.
///
/// Symlinks in the source tree are neither followed nor linked, and
/// `.DS_Store` files are skipped.
///
/// # Errors
///
/// Returns an error if a directory of the source tree cannot be read.
pub fn enumerate(package: &Package) -> Result<Vec<LinkEntry>> {
    let transformer = package.transformer();
    let mut files = Vec::new();
    collect_files(&package.source_dir, &mut files)?;
    files.sort();

    let mut entries = Vec::with_capacity(files.len());
    for source_file in files {
        let Ok(rel) = source_file.strip_prefix(&package.source_dir) else {
            continue;
        };
        let repo_relative_path = rel_to_string(rel);
        let transformed_relative_path = transformer.to_home(&repo_relative_path);
        let target_path = package.target_base.join(&transformed_relative_path);
        entries.push(LinkEntry {
            source_file,
            repo_relative_path,
            transformed_relative_path,
            target_path,
        });
    }
    Ok(entries)
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let read = std::fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))?;
    for entry in read {
        let entry = entry.with_context(|| format!("reading {}", dir.display()))?;
        let file_type = entry
            .file_type()
            .with_context(|| format!("stat {}", entry.path().display()))?;
        if file_type.is_dir() {
            collect_files(&entry.path(), out)?;
        } else if file_type.is_file() && entry.file_name() != IGNORED_FILE {
            out.push(entry.path());
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::paths::TransformKind;

    fn package(root: &Path, transform: TransformKind) -> Package {
        Package {
            name: "nvim".to_string(),
            source_dir: root.join("stow/nvim"),
            target_base: root.join("home"),
            transform,
            sync_ignore: vec![],
        }
    }

    #[test]
    fn entries_map_through_transform_in_sorted_order() {
        let tmp = tempfile::tempdir().unwrap();
        let pkg = package(tmp.path(), TransformKind::Legacy);
        std::fs::create_dir_all(pkg.source_dir.join("dot-config/nvim")).unwrap();
        std::fs::write(pkg.source_dir.join("dot-config/nvim/init.lua"), "").unwrap();
        std::fs::write(pkg.source_dir.join("dot-vimrc"), "").unwrap();
        std::fs::write(pkg.source_dir.join(".DS_Store"), "").unwrap();

        let entries = enumerate(&pkg).unwrap();
        let rels: Vec<&str> = entries.iter().map(|e| e.repo_relative_path.as_str()).collect();
        assert_eq!(rels, vec!["dot-config/nvim/init.lua", "dot-vimrc"]);
        assert_eq!(entries[0].transformed_relative_path, ".config/nvim/init.lua");
        assert_eq!(
            entries[0].target_path,
            pkg.target_base.join(".config/nvim/init.lua")
        );
        for e in &entries {
            assert_eq!(
                e.target_path,
                pkg.target_base.join(&e.transformed_relative_path)
            );
        }
    }

    #[test]
    fn verbatim_package_keeps_names() {
        let tmp = tempfile::tempdir().unwrap();
        let pkg = package(tmp.path(), TransformKind::Verbatim);
        std::fs::create_dir_all(&pkg.source_dir).unwrap();
        std::fs::write(pkg.source_dir.join("settings.json"), "{}").unwrap();
        let entries = enumerate(&pkg).unwrap();
        assert_eq!(entries[0].target_path, pkg.target_base.join("settings.json"));
    }

    #[cfg(unix)]
    #[test]
    fn source_symlinks_are_not_followed() {
        let tmp = tempfile::tempdir().unwrap();
        let pkg = package(tmp.path(), TransformKind::Legacy);
        std::fs::create_dir_all(pkg.source_dir.join("real")).unwrap();
        std::fs::write(pkg.source_dir.join("real/file"), "").unwrap();
        std::os::unix::fs::symlink(pkg.source_dir.join("real"), pkg.source_dir.join("dir_link"))
            .unwrap();
        std::os::unix::fs::symlink(
            pkg.source_dir.join("real/file"),
            pkg.source_dir.join("file_link"),
        )
        .unwrap();

        let entries = enumerate(&pkg).unwrap();
        let rels: Vec<&str> = entries.iter().map(|e| e.repo_relative_path.as_str()).collect();
        assert_eq!(rels, vec!["real/file"]);
    }

    #[test]
    fn missing_source_dir_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(enumerate(&package(tmp.path(), TransformKind::Legacy)).is_err());
    }
}
