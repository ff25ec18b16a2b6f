// Shared helpers for integration tests.
//
// A repository (`repo/stow/<package>`), a home directory and a cache
// directory live side by side in one temp dir. Contexts are built through
// the public API with an in-memory log so tests can assert on messages.
//
// Used by all integration test binaries that declare `mod common;`.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dotfiles_stow::config::Config;
use dotfiles_stow::logging::{BufferedLog, Log};
use dotfiles_stow::platform::{Os, Platform};
use dotfiles_stow::rollback::RollbackRecorder;
use dotfiles_stow::safety::SafetyGate;
use dotfiles_stow::tasks::{Context, RunOptions, SyncMode};

/// Fixed run timestamp so backup and script names are predictable.
pub const TIMESTAMP: &str = "20260101-120000";

/// An isolated repository and home directory backed by a
/// [`tempfile::TempDir`], deleted on drop.
pub struct Fixture {
    _tmp: tempfile::TempDir,
    /// Repository root.
    pub root: PathBuf,
    /// Home directory.
    pub home: PathBuf,
    /// Cache directory (backups and rollback scripts).
    pub cache: PathBuf,
}

impl Fixture {
    /// Create the empty layout.
    pub fn new() -> Self {
        let tmp = tempfile::tempdir().expect("create temp dir");
        let base = dunce::canonicalize(tmp.path()).expect("canonicalize temp dir");
        let root = base.join("repo");
        let home = base.join("home");
        let cache = base.join("cache");
        std::fs::create_dir_all(root.join("stow")).expect("create stow dir");
        std::fs::create_dir_all(&home).expect("create home dir");
        Self {
            _tmp: tmp,
            root,
            home,
            cache,
        }
    }

    /// Write `stow/<package>/<rel>` and return its path.
    pub fn repo_file(&self, package: &str, rel: &str, content: &str) -> PathBuf {
        let path = self.root.join("stow").join(package).join(rel);
        write(&path, content);
        path
    }

    /// Write `<home>/<rel>` and return its path.
    pub fn home_file(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.home.join(rel);
        write(&path, content);
        path
    }

    /// Write `conf/packages.toml`.
    pub fn packages_toml(&self, content: &str) {
        write(&self.root.join("conf/packages.toml"), content);
    }

    /// Configuration as a Linux run would load it.
    pub fn config(&self) -> Config {
        Config::load(&self.root, &self.home, &Platform::new(Os::Linux)).expect("load config")
    }

    /// Options for a run.
    pub fn opts(&self, dry_run: bool, sync_local: bool) -> RunOptions {
        RunOptions {
            dry_run,
            sync_local,
            backup_conflicts: false,
            timestamp: TIMESTAMP.to_string(),
            sync_backup_dir: self.cache.join("backups").join(TIMESTAMP),
        }
    }

    /// Context with an in-memory rollback recorder, plus its log.
    pub fn context(&self, opts: RunOptions, mode: SyncMode) -> (Context, Arc<BufferedLog>) {
        self.context_with_recorder(opts, mode, RollbackRecorder::in_memory())
    }

    /// Context whose rollback script is written under the cache directory.
    pub fn recording_context(&self, opts: RunOptions) -> (Context, Arc<BufferedLog>) {
        let recorder = RollbackRecorder::create(&self.cache, TIMESTAMP).expect("create script");
        self.context_with_recorder(opts, SyncMode::Overwrite, recorder)
    }

    fn context_with_recorder(
        &self,
        opts: RunOptions,
        mode: SyncMode,
        recorder: RollbackRecorder,
    ) -> (Context, Arc<BufferedLog>) {
        let log = Arc::new(BufferedLog::new());
        let ctx = Context::new(
            self.config(),
            Arc::clone(&log) as Arc<dyn Log>,
            self.home.clone(),
            SafetyGate::new(&self.home, &self.root).expect("safety gate"),
            opts,
            mode,
            recorder,
        );
        (ctx, log)
    }

    /// Every path under home with what it is: `link -> dest`, `file: content`
    /// or `dir`. Used to prove a run changed nothing.
    pub fn home_state(&self) -> BTreeMap<String, String> {
        let mut state = BTreeMap::new();
        walk(&self.home, &self.home, &mut state);
        state
    }
}

fn write(path: &Path, content: &str) {
    std::fs::create_dir_all(path.parent().expect("parent")).expect("create parent dirs");
    std::fs::write(path, content).expect("write file");
}

fn walk(base: &Path, dir: &Path, state: &mut BTreeMap<String, String>) {
    for entry in std::fs::read_dir(dir).expect("read dir") {
        let path = entry.expect("dir entry").path();
        let rel = path
            .strip_prefix(base)
            .expect("under base")
            .to_string_lossy()
            .into_owned();
        let meta = std::fs::symlink_metadata(&path).expect("stat");
        if meta.file_type().is_symlink() {
            let dest = std::fs::read_link(&path).expect("read link");
            state.insert(rel, format!("link -> {}", dest.display()));
        } else if meta.is_dir() {
            state.insert(rel, "dir".to_string());
            walk(base, &path, state);
        } else {
            let content = std::fs::read_to_string(&path).unwrap_or_default();
            state.insert(rel, format!("file: {content}"));
        }
    }
}
