//! File-system resource helpers.
use anyhow::{Context as _, Result};
use sha2::{Digest as _, Sha256};
use std::io::Read as _;
use std::path::{Path, PathBuf};

/// Bytes inspected by [`is_binary`].
pub const BINARY_SNIFF_LEN: usize = 8000;

/// Ensure the parent directory of `path` exists, creating it (and any
/// ancestors) if necessary.
///
/// Returns the directories that did not exist before, deepest first, so the
/// caller can record them for rollback.
///
/// # Errors
///
/// Returns an error if the directory cannot be created.
pub fn ensure_parent_dir(path: &Path) -> Result<Vec<PathBuf>> {
    let Some(parent) = path.parent() else {
        return Ok(Vec::new());
    };
    let mut missing = Vec::new();
    let mut cursor = Some(parent);
    while let Some(dir) = cursor {
        if dir.as_os_str().is_empty() || dir.symlink_metadata().is_ok() {
            break;
        }
        missing.push(dir.to_path_buf());
        cursor = dir.parent();
    }
    if !missing.is_empty() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create parent: {}", parent.display()))?;
    }
    Ok(missing)
}

/// Remove whatever lives at `path` without following a final symlink:
/// a link or file is unlinked, a real directory is removed recursively.
///
/// # Errors
///
/// Returns an error if the path cannot be stat-ed or removed.
pub fn remove_path(path: &Path) -> Result<()> {
    let meta = std::fs::symlink_metadata(path)
        .with_context(|| format!("reading metadata: {}", path.display()))?;
    if meta.is_dir() {
        std::fs::remove_dir_all(path)
            .with_context(|| format!("removing directory: {}", path.display()))
    } else if is_dir_link(&meta) {
        std::fs::remove_dir(path).with_context(|| format!("removing link: {}", path.display()))
    } else {
        std::fs::remove_file(path).with_context(|| format!("removing file: {}", path.display()))
    }
}

/// On Windows a directory symlink must be removed with `remove_dir`.
#[cfg(windows)]
fn is_dir_link(meta: &std::fs::Metadata) -> bool {
    use std::os::windows::fs::MetadataExt;
    meta.is_symlink() && meta.file_attributes() & 0x10 != 0 // FILE_ATTRIBUTE_DIRECTORY
}

#[cfg(not(windows))]
const fn is_dir_link(_meta: &std::fs::Metadata) -> bool {
    false
}

/// `true` if the first [`BINARY_SNIFF_LEN`] bytes of `path` contain a NUL.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or read.
pub fn is_binary(path: &Path) -> Result<bool> {
    let file = std::fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut head = Vec::with_capacity(BINARY_SNIFF_LEN);
    file.take(BINARY_SNIFF_LEN as u64)
        .read_to_end(&mut head)
        .with_context(|| format!("reading {}", path.display()))?;
    Ok(head.contains(&0))
}

/// Byte-for-byte comparison of two files.
///
/// # Errors
///
/// Returns an error if either file cannot be read.
pub fn files_equal(a: &Path, b: &Path) -> Result<bool> {
    let len_a = std::fs::metadata(a)
        .with_context(|| format!("reading metadata: {}", a.display()))?
        .len();
    let len_b = std::fs::metadata(b)
        .with_context(|| format!("reading metadata: {}", b.display()))?
        .len();
    if len_a != len_b {
        return Ok(false);
    }
    let content_a = std::fs::read(a).with_context(|| format!("reading {}", a.display()))?;
    let content_b = std::fs::read(b).with_context(|| format!("reading {}", b.display()))?;
    Ok(content_a == content_b)
}

/// Hex-encoded SHA-256 of a file's content.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn sha256_hex(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let digest = Sha256::digest(&bytes);
    Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
}
