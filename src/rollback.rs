//! Undo script generation.
//!
//! Every mutation of a run is recorded as an [`Operation`] whose inverse
//! shell command is appended to `rollback-<timestamp>.sh` immediately, so a
//! run interrupted half way still leaves a usable script behind. The engine
//! only ever writes this script; the operator runs it.
use anyhow::{Context as _, Result};
use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};

/// Kind of recorded mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// A symlink was created; undo removes it.
    RemoveSymlink,
    /// A file was removed or added; see the description.
    RemoveFile,
    /// A backup was taken; undo copies it back into place.
    RestoreBackup,
    /// A directory was created; undo removes it if empty.
    RemoveDirectoryIfEmpty,
}

/// One recorded mutation and its inverse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    /// Kind of mutation.
    pub kind: OperationKind,
    /// Path the mutation touched.
    pub path: PathBuf,
    /// Human-readable description, written as a comment.
    pub description: String,
    /// Idempotent shell command undoing the mutation.
    pub inverse_command: String,
}

impl Operation {
    /// A link was created at `link`.
    #[must_use]
    pub fn link_created(link: &Path) -> Self {
        let q = shell_quote(link);
        Self {
            kind: OperationKind::RemoveSymlink,
            path: link.to_path_buf(),
            description: format!("created symlink {}", link.display()),
            inverse_command: format!("if [ -L {q} ]; then rm -f {q}; fi"),
        }
    }

    /// A foreign object at `path` was removed without a backup.
    ///
    /// `sha256` is the content hash for regular files.
    #[must_use]
    pub fn object_removed(path: &Path, sha256: Option<&str>) -> Self {
        let hash = sha256.map_or_else(String::new, |h| format!(" (sha256 {h})"));
        Self {
            kind: OperationKind::RemoveFile,
            path: path.to_path_buf(),
            description: format!(
                "removed {}{hash}; recreate not possible, no backup was taken",
                path.display()
            ),
            inverse_command: format!(": not restorable {}", shell_quote(path)),
        }
    }

    /// A stale link at `link` pointing to `destination` was removed.
    #[must_use]
    pub fn link_removed(link: &Path, destination: &Path) -> Self {
        let (l, d) = (shell_quote(link), shell_quote(destination));
        Self {
            kind: OperationKind::RemoveFile,
            path: link.to_path_buf(),
            description: format!(
                "removed symlink {} -> {}",
                link.display(),
                destination.display()
            ),
            inverse_command: format!("if [ ! -e {l} ] && [ ! -L {l} ]; then ln -s {d} {l}; fi"),
        }
    }

    /// A file was added to the repository at `path`.
    #[must_use]
    pub fn file_added(path: &Path) -> Self {
        Self {
            kind: OperationKind::RemoveFile,
            path: path.to_path_buf(),
            description: format!("added {}", path.display()),
            inverse_command: format!("rm -f {}", shell_quote(path)),
        }
    }

    /// `original` was copied to `backup` before being replaced.
    #[must_use]
    pub fn backup_taken(original: &Path, backup: &Path) -> Self {
        let (o, b) = (shell_quote(original), shell_quote(backup));
        Self {
            kind: OperationKind::RestoreBackup,
            path: original.to_path_buf(),
            description: format!("backed up {} to {}", original.display(), backup.display()),
            inverse_command: format!(
                "if [ -e {b} ] || [ -L {b} ]; then rm -rf {o}; cp -pPR {b} {o}; fi"
            ),
        }
    }

    /// The directory `dir` was created.
    #[must_use]
    pub fn directory_created(dir: &Path) -> Self {
        Self {
            kind: OperationKind::RemoveDirectoryIfEmpty,
            path: dir.to_path_buf(),
            description: format!("created directory {}", dir.display()),
            inverse_command: format!("rmdir {} 2>/dev/null || true", shell_quote(dir)),
        }
    }
}

/// Quote `path` for a POSIX shell: single quotes, with embedded `'`
/// written as `'\''`.
#[must_use]
pub fn shell_quote(path: &Path) -> String {
    quote(&path.to_string_lossy())
}

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Accumulates operations and mirrors them into the rollback script.
#[derive(Debug)]
pub struct RollbackRecorder {
    operations: Vec<Operation>,
    script: Option<(PathBuf, File)>,
}

impl RollbackRecorder {
    /// Create `<dir>/rollback-<timestamp>.sh` (owner-only permissions) and
    /// write its header.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be created.
    pub fn create(dir: &Path, timestamp: &str) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating rollback directory {}", dir.display()))?;
        let path = dir.join(format!("rollback-{timestamp}.sh"));
        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt as _;
            options.mode(0o700);
        }
        let mut file = options
            .open(&path)
            .with_context(|| format!("creating rollback script {}", path.display()))?;
        write!(
            file,
            "#!/bin/sh\n\
             # Rollback script generated by dotfiles at {timestamp}\n\
             # Commands undo the run top to bottom; every command is safe to re-run.\n\n"
        )
        .with_context(|| format!("writing {}", path.display()))?;
        Ok(Self {
            operations: Vec::new(),
            script: Some((path, file)),
        })
    }

    /// A recorder that keeps operations in memory only (dry-run).
    #[must_use]
    pub const fn in_memory() -> Self {
        Self {
            operations: Vec::new(),
            script: None,
        }
    }

    /// A recorder appending to an already open `file`, without a header.
    #[cfg(test)]
    pub(crate) const fn writing_to(path: PathBuf, file: File) -> Self {
        Self {
            operations: Vec::new(),
            script: Some((path, file)),
        }
    }

    /// Append `op` to the list and to the script.
    ///
    /// # Errors
    ///
    /// Returns an error if the script cannot be written. The operation is
    /// still kept in memory.
    pub fn record(&mut self, op: Operation) -> Result<()> {
        let line = format!("# {}\n{}\n", op.description, op.inverse_command);
        self.operations.push(op);
        if let Some((path, file)) = &mut self.script {
            file.write_all(line.as_bytes())
                .with_context(|| format!("writing {}", path.display()))?;
        }
        Ok(())
    }

    /// Operations recorded so far, in order.
    #[must_use]
    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// Path of the script, `None` for an in-memory recorder.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.script.as_ref().map(|(p, _)| p.as_path())
    }

    /// Write the trailer and return the script path.
    ///
    /// The trailer retries every created-directory removal deepest first,
    /// since a directory only becomes empty once all links inside it are
    /// gone, then prints `message` and the script's own path.
    ///
    /// # Errors
    ///
    /// Returns an error if the trailer cannot be written.
    pub fn finalize(self, message: &str) -> Result<Option<PathBuf>> {
        let Some((path, mut file)) = self.script else {
            return Ok(None);
        };
        let mut dirs: Vec<&Operation> = self
            .operations
            .iter()
            .filter(|op| op.kind == OperationKind::RemoveDirectoryIfEmpty)
            .collect();
        dirs.sort_by_key(|op| std::cmp::Reverse(op.path.components().count()));

        let mut trailer = String::from("\n");
        if !dirs.is_empty() {
            trailer.push_str("# retry directory removals, deepest first\n");
            for op in dirs {
                trailer.push_str(&op.inverse_command);
                trailer.push('\n');
            }
        }
        trailer.push_str(&format!(
            "echo {}\necho \"rollback script: \"{}\n",
            quote(message),
            shell_quote(&path)
        ));
        file.write_all(trailer.as_bytes())
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(Some(path))
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote(Path::new("/h/it's")), r"'/h/it'\''s'");
        assert_eq!(shell_quote(Path::new("/h/a b")), "'/h/a b'");
    }

    #[test]
    fn operation_commands() {
        let link = Operation::link_created(Path::new("/h/.gitconfig"));
        assert_eq!(link.kind, OperationKind::RemoveSymlink);
        assert_eq!(
            link.inverse_command,
            "if [ -L '/h/.gitconfig' ]; then rm -f '/h/.gitconfig'; fi"
        );

        let removed = Operation::object_removed(Path::new("/h/.zshrc"), Some("abc"));
        assert!(removed.description.contains("sha256 abc"));
        assert!(removed.description.contains("recreate not possible"));
        assert!(removed.inverse_command.starts_with(':'));

        let relinked = Operation::link_removed(Path::new("/h/.vimrc"), Path::new("/old/vimrc"));
        assert_eq!(
            relinked.inverse_command,
            "if [ ! -e '/h/.vimrc' ] && [ ! -L '/h/.vimrc' ]; then ln -s '/old/vimrc' '/h/.vimrc'; fi"
        );

        let dir = Operation::directory_created(Path::new("/h/.config"));
        assert_eq!(dir.inverse_command, "rmdir '/h/.config' 2>/dev/null || true");
    }

    #[test]
    fn in_memory_recorder_writes_nothing() {
        let mut rec = RollbackRecorder::in_memory();
        rec.record(Operation::link_created(Path::new("/h/.x"))).unwrap();
        assert_eq!(rec.operations().len(), 1);
        assert!(rec.path().is_none());
        assert_eq!(rec.finalize("done").unwrap(), None);
    }

    #[test]
    fn script_is_appended_as_operations_are_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let mut rec = RollbackRecorder::create(dir.path(), "20260101-120000").unwrap();
        let path = rec.path().unwrap().to_path_buf();
        assert_eq!(path, dir.path().join("rollback-20260101-120000.sh"));

        rec.record(Operation::link_created(Path::new("/h/.gitconfig")))
            .unwrap();
        // Visible on disk before finalize.
        let partial = std::fs::read_to_string(&path).unwrap();
        assert!(partial.contains("rm -f '/h/.gitconfig'"));
    }

    #[test]
    fn finalized_script_body() {
        let dir = tempfile::tempdir().unwrap();
        let mut rec = RollbackRecorder::create(dir.path(), "20260101-120000").unwrap();
        rec.record(Operation::link_created(Path::new("/h/.config/git/config")))
            .unwrap();
        rec.record(Operation::directory_created(Path::new("/h/.config/git")))
            .unwrap();
        rec.record(Operation::directory_created(Path::new("/h/.config")))
            .unwrap();
        rec.record(Operation::link_created(Path::new("/h/.config/git/ignore")))
            .unwrap();
        let path = rec.finalize("rollback complete").unwrap().unwrap();

        let body = std::fs::read_to_string(&path).unwrap();
        let body = body.replace(&path.display().to_string(), "<script>");
        insta::assert_snapshot!(body, @r#"
        #!/bin/sh
        # Rollback script generated by dotfiles at 20260101-120000
        # Commands undo the run top to bottom; every command is safe to re-run.

        # created symlink /h/.config/git/config
        if [ -L '/h/.config/git/config' ]; then rm -f '/h/.config/git/config'; fi
        # created directory /h/.config/git
        rmdir '/h/.config/git' 2>/dev/null || true
        # created directory /h/.config
        rmdir '/h/.config' 2>/dev/null || true
        # created symlink /h/.config/git/ignore
        if [ -L '/h/.config/git/ignore' ]; then rm -f '/h/.config/git/ignore'; fi

        # retry directory removals, deepest first
        rmdir '/h/.config/git' 2>/dev/null || true
        rmdir '/h/.config' 2>/dev/null || true
        echo 'rollback complete'
        echo "rollback script: "'<script>'
        "#);
    }

    #[cfg(unix)]
    #[test]
    fn script_is_owner_only_executable() {
        use std::os::unix::fs::PermissionsExt as _;
        let dir = tempfile::tempdir().unwrap();
        let rec = RollbackRecorder::create(dir.path(), "ts").unwrap();
        let path = rec.finalize("done").unwrap().unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[cfg(unix)]
    #[test]
    fn rollback_script_restores_previous_state() {
        let tmp = tempfile::tempdir().unwrap();
        let home = tmp.path().join("home");
        let source = tmp.path().join("source");
        std::fs::create_dir_all(&home).unwrap();
        std::fs::write(&source, "repo").unwrap();

        // Simulate a run: back up and replace a file, create a nested link.
        let target = home.join(".zshrc");
        std::fs::write(&target, "mine").unwrap();
        let backup = home.join(".zshrc.dotfiles-backup-ts");
        std::fs::copy(&target, &backup).unwrap();
        std::fs::remove_file(&target).unwrap();
        std::os::unix::fs::symlink(&source, &target).unwrap();
        let nested_dir = home.join(".config/app");
        std::fs::create_dir_all(&nested_dir).unwrap();
        let nested = nested_dir.join("conf");
        std::os::unix::fs::symlink(&source, &nested).unwrap();

        let mut rec = RollbackRecorder::create(&tmp.path().join("cache"), "ts").unwrap();
        rec.record(Operation::backup_taken(&target, &backup)).unwrap();
        rec.record(Operation::link_created(&target)).unwrap();
        rec.record(Operation::link_created(&nested)).unwrap();
        rec.record(Operation::directory_created(&nested_dir)).unwrap();
        rec.record(Operation::directory_created(&home.join(".config")))
            .unwrap();
        let script = rec.finalize("done").unwrap().unwrap();

        for _ in 0..2 {
            let status = std::process::Command::new("sh")
                .arg(&script)
                .stdout(std::process::Stdio::null())
                .status()
                .unwrap();
            assert!(status.success(), "rollback must succeed when re-run");
        }

        assert!(!target.symlink_metadata().unwrap().file_type().is_symlink());
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "mine");
        assert!(!home.join(".config").exists());
        assert_eq!(std::fs::read_to_string(&source).unwrap(), "repo");
    }
}
