//! Repository ↔ home path mapping.
//!
//! Package source trees spell hidden files with a `dot-` marker
//! (`dot-gitconfig`) so they stay visible in the repository. The
//! [`PathTransformer`] trait isolates how that marker is rewritten.
//!
//! [`LegacyDotTransformer`] is the default and replaces every `dot-` substring
//! with `.`; its inverse replaces every `.` with `dot-`. The two are not exact
//! inverses for names containing a literal dot (`init.lua` ↦ `initdot-lua`),
//! which is the inherited behavior. [`SegmentPrefixTransformer`] only rewrites
//! a leading marker per path segment and round-trips exactly.
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Marker that stands in for a leading `.` in the repository.
pub const DOT_MARKER: &str = "dot-";

/// Maps repository-relative paths to home-relative paths and back.
pub trait PathTransformer: std::fmt::Debug + Send + Sync {
    /// Map a repository-relative path to its home-relative equivalent.
    fn to_home(&self, rel: &str) -> String;

    /// Map a home-relative path back to a repository-relative path.
    fn to_repo(&self, rel: &str) -> String;
}

/// Substring replacement: `dot-` ↔ `.` anywhere in the path.
#[derive(Debug, Clone, Copy, Default)]
pub struct LegacyDotTransformer;

impl PathTransformer for LegacyDotTransformer {
    fn to_home(&self, rel: &str) -> String {
        rel.replace(DOT_MARKER, ".")
    }

    fn to_repo(&self, rel: &str) -> String {
        rel.replace('.', DOT_MARKER)
    }
}

/// Only a leading `dot-` (or `.`) of each `/`-separated segment is rewritten.
#[derive(Debug, Clone, Copy, Default)]
pub struct SegmentPrefixTransformer;

impl PathTransformer for SegmentPrefixTransformer {
    fn to_home(&self, rel: &str) -> String {
        map_segments(rel, |seg| {
            seg.strip_prefix(DOT_MARKER)
                .map_or_else(|| seg.to_string(), |rest| format!(".{rest}"))
        })
    }

    fn to_repo(&self, rel: &str) -> String {
        map_segments(rel, |seg| {
            seg.strip_prefix('.')
                .map_or_else(|| seg.to_string(), |rest| format!("{DOT_MARKER}{rest}"))
        })
    }
}

/// Identity mapping for packages stowed verbatim (no dot convention).
#[derive(Debug, Clone, Copy, Default)]
pub struct VerbatimTransformer;

impl PathTransformer for VerbatimTransformer {
    fn to_home(&self, rel: &str) -> String {
        rel.to_string()
    }

    fn to_repo(&self, rel: &str) -> String {
        rel.to_string()
    }
}

fn map_segments(rel: &str, f: impl Fn(&str) -> String) -> String {
    rel.split('/').map(f).collect::<Vec<_>>().join("/")
}

/// Transform rule selectable per package in `conf/packages.toml`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformKind {
    /// [`LegacyDotTransformer`].
    #[default]
    Legacy,
    /// [`SegmentPrefixTransformer`].
    Prefix,
    /// [`VerbatimTransformer`].
    Verbatim,
}

impl TransformKind {
    /// Return the transformer implementing this rule.
    #[must_use]
    pub fn transformer(self) -> Box<dyn PathTransformer> {
        match self {
            Self::Legacy => Box::new(LegacyDotTransformer),
            Self::Prefix => Box::new(SegmentPrefixTransformer),
            Self::Verbatim => Box::new(VerbatimTransformer),
        }
    }
}

/// Convert a relative [`Path`] to a `/`-separated string.
#[must_use]
pub fn rel_to_string(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Render `path` relative to `home` as `~/...` for log messages.
///
/// Paths outside `home` are returned unchanged.
#[must_use]
pub fn display_relative(path: &Path, home: &Path) -> String {
    path.strip_prefix(home).map_or_else(
        |_| path.display().to_string(),
        |rel| {
            if rel.as_os_str().is_empty() {
                "~".to_string()
            } else {
                format!("~/{}", rel_to_string(rel))
            }
        },
    )
}

/// Lexically normalize `path`: drop `.` components and fold `..` into the
/// preceding component. Never touches the filesystem.
#[must_use]
pub fn normalize_lexically(path: &Path) -> PathBuf {
    use std::path::Component;

    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }
    out
}
