//! Link state of a single home-side target.
//!
//! Classification is computed fresh on every run and never cached. Both
//! sides of every path comparison are canonicalized, so trailing slashes,
//! `..` components and symlink chains never produce a false conflict.
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::config::Package;
use crate::error::ResourceError;
use crate::paths::normalize_lexically;

/// State of a target path relative to its expected repository source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Nothing exists at the target.
    Absent,
    /// The target is a symlink resolving to the expected source.
    CorrectLink,
    /// The target is a symlink resolving elsewhere. Holds the absolute link
    /// destination.
    WrongLink(PathBuf),
    /// The target exists and is not a symlink (regular file or directory).
    ForeignObject,
    /// An ancestor directory of the target is a symlink to the matching
    /// package subdirectory. Holds that ancestor.
    CoveredByAncestorSymlink(PathBuf),
}

/// Classify `target` against `expected_source`, a file under
/// `package.source_dir`.
///
/// # Errors
///
/// Returns [`ResourceError::Classify`] if the target or its ancestors cannot
/// be stat-ed, or the link cannot be read. A missing target is not an error.
pub fn classify(
    target: &Path,
    expected_source: &Path,
    package: &Package,
) -> Result<Classification, ResourceError> {
    let classify_err = |source| ResourceError::Classify {
        path: target.to_path_buf(),
        source,
    };

    let meta = match std::fs::symlink_metadata(target) {
        Ok(meta) => Some(meta),
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => return Err(classify_err(e)),
    };

    // A target that is not itself a link may be reached through a linked
    // parent directory; that case must win over ForeignObject.
    if meta.as_ref().is_none_or(|m| !m.file_type().is_symlink())
        && let Some(ancestor) =
            find_ancestor_package_symlink(target, expected_source, package).map_err(classify_err)?
    {
        return Ok(Classification::CoveredByAncestorSymlink(ancestor));
    }

    let Some(meta) = meta else {
        return Ok(Classification::Absent);
    };

    if !meta.file_type().is_symlink() {
        return Ok(Classification::ForeignObject);
    }

    let destination = link_destination(target).map_err(classify_err)?;
    if paths_equivalent(&destination, expected_source) {
        Ok(Classification::CorrectLink)
    } else {
        Ok(Classification::WrongLink(destination))
    }
}

/// Walk from `dirname(target)` up to `package.target_base` looking for a
/// directory symlink whose resolved destination is the corresponding
/// subdirectory of `package.source_dir`.
///
/// The corresponding subdirectory is found by component count: the path
/// transform never adds or removes `/`, so the k-th ancestor of the target
/// maps to the first k components of the repository-relative path.
///
/// # Errors
///
/// Returns an I/O error if an ancestor exists but cannot be stat-ed.
pub fn find_ancestor_package_symlink(
    target: &Path,
    expected_source: &Path,
    package: &Package,
) -> io::Result<Option<PathBuf>> {
    let (Ok(rel_target), Ok(rel_source)) = (
        target.strip_prefix(&package.target_base),
        expected_source.strip_prefix(&package.source_dir),
    ) else {
        return Ok(None);
    };
    let target_parts: Vec<Component<'_>> = rel_target.components().collect();
    let source_parts: Vec<Component<'_>> = rel_source.components().collect();
    if target_parts.len() != source_parts.len() {
        return Ok(None);
    }

    for depth in (0..target_parts.len()).rev() {
        let ancestor: PathBuf = target_parts
            .iter()
            .take(depth)
            .fold(package.target_base.clone(), |acc, c| acc.join(c));
        let meta = match std::fs::symlink_metadata(&ancestor) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };
        if !meta.file_type().is_symlink() {
            continue;
        }
        let subdir: PathBuf = source_parts
            .iter()
            .take(depth)
            .fold(package.source_dir.clone(), |acc, c| acc.join(c));
        if let (Ok(resolved), Ok(expected)) =
            (dunce::canonicalize(&ancestor), dunce::canonicalize(&subdir))
            && resolved == expected
        {
            return Ok(Some(ancestor));
        }
    }
    Ok(None)
}

/// Absolute destination of the symlink at `link`. A relative destination is
/// resolved against the link's own directory.
///
/// # Errors
///
/// Returns an I/O error if the link cannot be read.
pub fn link_destination(link: &Path) -> io::Result<PathBuf> {
    let raw = std::fs::read_link(link)?;
    if raw.is_absolute() {
        return Ok(normalize_lexically(&raw));
    }
    let base = link.parent().unwrap_or_else(|| Path::new(""));
    Ok(normalize_lexically(&base.join(raw)))
}

/// Compare two paths after resolving them through the real filesystem.
/// A path that cannot be canonicalized (dangling) is compared in its
/// lexically normalized form.
#[must_use]
pub fn paths_equivalent(a: &Path, b: &Path) -> bool {
    canonical_or_lexical(a) == canonical_or_lexical(b)
}

fn canonical_or_lexical(path: &Path) -> PathBuf {
    dunce::canonicalize(path).unwrap_or_else(|_| normalize_lexically(path))
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::paths::TransformKind;

    struct Fixture {
        _tmp: tempfile::TempDir,
        home: PathBuf,
        package: Package,
    }

    fn fixture() -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let home = tmp.path().join("home");
        let source_dir = tmp.path().join("repo/stow/git");
        std::fs::create_dir_all(&home).unwrap();
        std::fs::create_dir_all(source_dir.join("dot-config/git")).unwrap();
        std::fs::write(source_dir.join("dot-gitconfig"), "A").unwrap();
        std::fs::write(source_dir.join("dot-config/git/ignore"), "*.swp").unwrap();
        let package = Package {
            name: "git".to_string(),
            source_dir,
            target_base: home.clone(),
            transform: TransformKind::Legacy,
            sync_ignore: Vec::new(),
        };
        Fixture {
            _tmp: tmp,
            home,
            package,
        }
    }

    #[test]
    fn absent_when_nothing_exists() {
        let f = fixture();
        let source = f.package.source_dir.join("dot-gitconfig");
        assert_eq!(
            classify(&f.home.join(".gitconfig"), &source, &f.package).unwrap(),
            Classification::Absent
        );
    }

    #[test]
    fn foreign_object_for_file_and_directory() {
        let f = fixture();
        let source = f.package.source_dir.join("dot-gitconfig");
        std::fs::write(f.home.join(".gitconfig"), "B").unwrap();
        assert_eq!(
            classify(&f.home.join(".gitconfig"), &source, &f.package).unwrap(),
            Classification::ForeignObject
        );

        let nested = f.package.source_dir.join("dot-config/git/ignore");
        std::fs::create_dir_all(f.home.join(".config/git/ignore")).unwrap();
        assert_eq!(
            classify(&f.home.join(".config/git/ignore"), &nested, &f.package).unwrap(),
            Classification::ForeignObject
        );
    }

    #[cfg(unix)]
    #[test]
    fn correct_link_through_canonicalization() {
        let f = fixture();
        let source = f.package.source_dir.join("dot-gitconfig");
        // Non-canonical spelling of the same file.
        let spelled = f.package.source_dir.join("dot-config/../dot-gitconfig");
        std::os::unix::fs::symlink(&spelled, f.home.join(".gitconfig")).unwrap();
        assert_eq!(
            classify(&f.home.join(".gitconfig"), &source, &f.package).unwrap(),
            Classification::CorrectLink
        );
    }

    #[cfg(unix)]
    #[test]
    fn relative_link_resolved_against_link_dir() {
        let f = fixture();
        let source = f.package.source_dir.join("dot-gitconfig");
        std::os::unix::fs::symlink("../repo/stow/git/dot-gitconfig", f.home.join(".gitconfig"))
            .unwrap();
        assert_eq!(
            classify(&f.home.join(".gitconfig"), &source, &f.package).unwrap(),
            Classification::CorrectLink
        );
    }

    #[cfg(unix)]
    #[test]
    fn wrong_link_carries_destination() {
        let f = fixture();
        let source = f.package.source_dir.join("dot-gitconfig");
        let other = f.home.join("other");
        std::fs::write(&other, "x").unwrap();
        std::os::unix::fs::symlink(&other, f.home.join(".gitconfig")).unwrap();
        assert_eq!(
            classify(&f.home.join(".gitconfig"), &source, &f.package).unwrap(),
            Classification::WrongLink(other)
        );
    }

    #[cfg(unix)]
    #[test]
    fn dangling_link_is_wrong_link() {
        let f = fixture();
        let source = f.package.source_dir.join("dot-gitconfig");
        std::os::unix::fs::symlink("/nonexistent/x", f.home.join(".gitconfig")).unwrap();
        assert_eq!(
            classify(&f.home.join(".gitconfig"), &source, &f.package).unwrap(),
            Classification::WrongLink(PathBuf::from("/nonexistent/x"))
        );
    }

    #[cfg(unix)]
    #[test]
    fn covered_by_linked_parent_directory() {
        let f = fixture();
        let nested = f.package.source_dir.join("dot-config/git/ignore");
        std::fs::create_dir_all(f.home.join(".config")).unwrap();
        std::os::unix::fs::symlink(
            f.package.source_dir.join("dot-config/git"),
            f.home.join(".config/git"),
        )
        .unwrap();

        // The target exists (through the linked parent) and must not be
        // mistaken for a foreign object.
        assert_eq!(
            classify(&f.home.join(".config/git/ignore"), &nested, &f.package).unwrap(),
            Classification::CoveredByAncestorSymlink(f.home.join(".config/git"))
        );
    }

    #[cfg(unix)]
    #[test]
    fn parent_linked_elsewhere_is_not_covered() {
        let f = fixture();
        let nested = f.package.source_dir.join("dot-config/git/ignore");
        let elsewhere = f.home.join("elsewhere");
        std::fs::create_dir_all(&elsewhere).unwrap();
        std::fs::create_dir_all(f.home.join(".config")).unwrap();
        std::os::unix::fs::symlink(&elsewhere, f.home.join(".config/git")).unwrap();

        assert_eq!(
            find_ancestor_package_symlink(&f.home.join(".config/git/ignore"), &nested, &f.package)
                .unwrap(),
            None
        );
        assert_eq!(
            classify(&f.home.join(".config/git/ignore"), &nested, &f.package).unwrap(),
            Classification::Absent
        );
    }

    #[test]
    fn ancestor_walk_ignores_paths_outside_package() {
        let f = fixture();
        assert_eq!(
            find_ancestor_package_symlink(
                Path::new("/elsewhere/.gitconfig"),
                &f.package.source_dir.join("dot-gitconfig"),
                &f.package
            )
            .unwrap(),
            None
        );
    }

    #[cfg(unix)]
    #[test]
    fn stat_failure_is_a_classify_error() {
        let f = fixture();
        // A regular file used as a directory yields ENOTDIR.
        std::fs::write(f.home.join(".config"), "file").unwrap();
        let nested = f.package.source_dir.join("dot-config/git/ignore");
        let err = classify(&f.home.join(".config/git/ignore"), &nested, &f.package).unwrap_err();
        assert!(matches!(err, ResourceError::Classify { .. }));
    }
}
