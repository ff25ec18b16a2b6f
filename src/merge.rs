//! Three-way merge capability used by reverse sync.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::MergeError;
use crate::exec::Executor;

/// Result of a three-way merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Merged without conflicts.
    Clean(Vec<u8>),
    /// Merged with conflict markers that must be resolved by hand.
    Conflicted(Vec<u8>),
}

/// Performs a three-way merge of file contents.
#[cfg_attr(test, mockall::automock)]
pub trait Merger {
    /// Merge `theirs` (home) into `ours` (repository) relative to `base`.
    ///
    /// # Errors
    ///
    /// Returns [`MergeError::Failed`] if the merge could not be performed.
    /// A conflicted merge is not an error.
    fn merge(&self, base: &[u8], ours: &[u8], theirs: &[u8]) -> Result<MergeOutcome, MergeError>;
}

/// [`Merger`] backed by `git merge-file`.
///
/// Inputs are staged as files in a fresh directory under `scratch`, which is
/// removed after each merge.
pub struct GitMergeFile {
    executor: Arc<dyn Executor>,
    scratch: PathBuf,
}

impl std::fmt::Debug for GitMergeFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitMergeFile")
            .field("executor", &"<dyn Executor>")
            .field("scratch", &self.scratch)
            .finish()
    }
}

impl GitMergeFile {
    /// Use `git` through `executor`, staging inputs under `scratch`.
    ///
    /// # Errors
    ///
    /// Returns [`MergeError::Unavailable`] if `git` is not on `PATH`.
    pub fn detect(executor: Arc<dyn Executor>, scratch: &Path) -> Result<Self, MergeError> {
        if !executor.which("git") {
            return Err(MergeError::Unavailable("git not found on PATH".to_string()));
        }
        Ok(Self {
            executor,
            scratch: scratch.to_path_buf(),
        })
    }
}

impl Merger for GitMergeFile {
    fn merge(&self, base: &[u8], ours: &[u8], theirs: &[u8]) -> Result<MergeOutcome, MergeError> {
        let failed = |reason: String| MergeError::Failed {
            path: "git merge-file".to_string(),
            reason,
        };

        std::fs::create_dir_all(&self.scratch).map_err(|e| failed(e.to_string()))?;
        let work = tempfile::Builder::new()
            .prefix("merge-")
            .tempdir_in(&self.scratch)
            .map_err(|e| failed(e.to_string()))?;
        for (name, content) in [("ours", ours), ("base", base), ("theirs", theirs)] {
            std::fs::write(work.path().join(name), content).map_err(|e| failed(e.to_string()))?;
        }

        // Without -p, git writes the result into the first file.
        let result = self
            .executor
            .run_unchecked_in(
                work.path(),
                "git",
                &[
                    "merge-file", "-L", "repo", "-L", "base", "-L", "home", "ours", "base",
                    "theirs",
                ],
            )
            .map_err(|e| failed(format!("{e:#}")))?;

        // Exit status is the number of conflicts (capped at 127); other
        // values are errors.
        let code = result.code.unwrap_or(-1);
        if !(0..=127).contains(&code) {
            return Err(failed(format!("exit {code}: {}", result.stderr.trim())));
        }
        let merged = std::fs::read(work.path().join("ours")).map_err(|e| failed(e.to_string()))?;
        if code == 0 {
            Ok(MergeOutcome::Clean(merged))
        } else {
            Ok(MergeOutcome::Conflicted(merged))
        }
    }
}

/// Content of `file` as committed at `HEAD` of the git work tree containing
/// `repo_root`.
///
/// Returns `None` when there is no repository, no `HEAD` commit, or the file
/// is not tracked there.
#[must_use]
pub fn head_content(repo_root: &Path, file: &Path) -> Option<Vec<u8>> {
    let repo = git2::Repository::discover(repo_root).ok()?;
    let workdir = dunce::canonicalize(repo.workdir()?).ok()?;
    let file = dunce::canonicalize(file).ok()?;
    let rel = file.strip_prefix(&workdir).ok()?;
    let tree = repo.head().ok()?.peel_to_tree().ok()?;
    let entry = tree.get_path(rel).ok()?;
    let blob = entry.to_object(&repo).ok()?.peel_to_blob().ok()?;
    Some(blob.content().to_vec())
}

#[cfg(test)]
#[allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use super::*;
    use crate::exec::{ExecResult, SystemExecutor};

    #[derive(Debug)]
    struct NoGit;

    impl Executor for NoGit {
        fn run_unchecked_in(&self, _: &Path, _: &str, _: &[&str]) -> anyhow::Result<ExecResult> {
            anyhow::bail!("unexpected executor call in test")
        }

        fn which(&self, _: &str) -> bool {
            false
        }
    }

    /// Executor that reports a fixed exit code and leaves files untouched.
    #[derive(Debug)]
    struct FixedExit(Option<i32>);

    impl Executor for FixedExit {
        fn run_unchecked_in(&self, _: &Path, _: &str, _: &[&str]) -> anyhow::Result<ExecResult> {
            Ok(ExecResult {
                stdout: String::new(),
                stderr: "boom".to_string(),
                success: self.0 == Some(0),
                code: self.0,
            })
        }

        fn which(&self, _: &str) -> bool {
            true
        }
    }

    #[test]
    fn detect_fails_closed_without_git() {
        let scratch = tempfile::tempdir().unwrap();
        let err = GitMergeFile::detect(Arc::new(NoGit), scratch.path()).unwrap_err();
        assert!(matches!(err, MergeError::Unavailable(_)));
    }

    #[test]
    fn exit_code_maps_to_outcome() {
        let scratch = tempfile::tempdir().unwrap();
        let clean = GitMergeFile::detect(Arc::new(FixedExit(Some(0))), scratch.path()).unwrap();
        assert_eq!(
            clean.merge(b"base", b"ours", b"theirs").unwrap(),
            MergeOutcome::Clean(b"ours".to_vec())
        );

        let conflicted =
            GitMergeFile::detect(Arc::new(FixedExit(Some(2))), scratch.path()).unwrap();
        assert!(matches!(
            conflicted.merge(b"b", b"o", b"t").unwrap(),
            MergeOutcome::Conflicted(_)
        ));

        let broken = GitMergeFile::detect(Arc::new(FixedExit(Some(255))), scratch.path()).unwrap();
        assert!(matches!(
            broken.merge(b"b", b"o", b"t").unwrap_err(),
            MergeError::Failed { .. }
        ));

        let killed = GitMergeFile::detect(Arc::new(FixedExit(None)), scratch.path()).unwrap();
        assert!(killed.merge(b"b", b"o", b"t").is_err());
    }

    #[test]
    fn scratch_is_cleaned_after_merge() {
        let scratch = tempfile::tempdir().unwrap();
        let merger = GitMergeFile::detect(Arc::new(FixedExit(Some(0))), scratch.path()).unwrap();
        merger.merge(b"b", b"o", b"t").unwrap();
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[test]
    fn real_git_merges_disjoint_edits() {
        if !SystemExecutor.which("git") {
            return;
        }
        let scratch = tempfile::tempdir().unwrap();
        let merger = GitMergeFile::detect(Arc::new(SystemExecutor), scratch.path()).unwrap();
        let base = b"one\ntwo\nthree\nfour\nfive\n";
        let ours = b"ONE\ntwo\nthree\nfour\nfive\n";
        let theirs = b"one\ntwo\nthree\nfour\nFIVE\n";
        assert_eq!(
            merger.merge(base, ours, theirs).unwrap(),
            MergeOutcome::Clean(b"ONE\ntwo\nthree\nfour\nFIVE\n".to_vec())
        );
    }

    #[test]
    fn real_git_reports_conflict_markers() {
        if !SystemExecutor.which("git") {
            return;
        }
        let scratch = tempfile::tempdir().unwrap();
        let merger = GitMergeFile::detect(Arc::new(SystemExecutor), scratch.path()).unwrap();
        let MergeOutcome::Conflicted(merged) = merger.merge(b"A\n", b"R\n", b"H\n").unwrap() else {
            panic!("expected a conflict");
        };
        let text = String::from_utf8(merged).unwrap();
        assert!(text.contains("<<<<<<< repo"));
        assert!(text.contains(">>>>>>> home"));
    }

    fn commit_all(dir: &Path, files: &[&str]) {
        let repo = git2::Repository::init(dir).unwrap();
        let mut index = repo.index().unwrap();
        for file in files {
            index.add_path(Path::new(file)).unwrap();
        }
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = git2::Signature::now("dotfiles", "dotfiles@example.com").unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[])
            .unwrap();
    }

    #[test]
    fn head_content_reads_committed_blob() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("stow/git")).unwrap();
        let file = tmp.path().join("stow/git/dot-gitconfig");
        std::fs::write(&file, "committed\n").unwrap();
        commit_all(tmp.path(), &["stow/git/dot-gitconfig"]);
        std::fs::write(&file, "edited\n").unwrap();

        assert_eq!(
            head_content(tmp.path(), &file),
            Some(b"committed\n".to_vec())
        );
    }

    #[test]
    fn head_content_is_none_for_untracked_or_non_repo() {
        let tmp = tempfile::tempdir().unwrap();
        let tracked = tmp.path().join("a");
        let untracked = tmp.path().join("b");
        std::fs::write(&tracked, "a").unwrap();
        std::fs::write(&untracked, "b").unwrap();
        assert_eq!(head_content(tmp.path(), &tracked), None);

        commit_all(tmp.path(), &["a"]);
        assert_eq!(head_content(tmp.path(), &untracked), None);
    }

    #[test]
    fn mock_merger_is_usable_as_trait_object() {
        let mut mock = MockMerger::new();
        mock.expect_merge()
            .withf(|base, ours, theirs| {
                base.to_vec() == b"b" && ours.to_vec() == b"o" && theirs.to_vec() == b"t"
            })
            .returning(|_, _, theirs| Ok(MergeOutcome::Clean(theirs.to_vec())));
        let merger: &dyn Merger = &mock;
        assert_eq!(
            merger.merge(b"b", b"o", b"t").unwrap(),
            MergeOutcome::Clean(b"t".to_vec())
        );
    }
}
