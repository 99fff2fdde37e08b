//! Repository facade
//!
//! Ties the store, index, staging area, commit log, and pack manager
//! together behind the operations a client drives: init/open, add, commit,
//! status, history, gc. Mutating operations hold an exclusive byte-range
//! lock on `.fox/lock` so overlapping invocations against the same working
//! copy serialize instead of corrupting shared state.

use file_guard::{FileGuard, Lock};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File, OpenOptions};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

use crate::commit_log::CommitLog;
use crate::config::{RemoteState, RepoConfig, normalize_origin_url};
use crate::delta::DeltaCache;
use crate::error::{FoxError, Result};
use crate::index::{
    ChangeKind, Index, WorkingChange, fs_path, is_ignored_path, is_safe_rel_path, scan_worktree,
};
use crate::object::{Commit, FileEntry};
use crate::packfile::{PackManager, PackMode, PackSummary, StoreStats};
use crate::staging::{StagedEntry, StagingArea};
use crate::store::ObjectStore;

/// Name of the hidden metadata directory
pub const FOX_DIR: &str = ".fox";

/// File layout inside the metadata directory
#[derive(Debug)]
pub(crate) struct RepoLayout {
    fox_dir: PathBuf,
}

impl RepoLayout {
    fn new(root: &Path) -> Self {
        Self {
            fox_dir: root.join(FOX_DIR),
        }
    }

    pub(crate) fn fox_dir(&self) -> &Path {
        &self.fox_dir
    }

    pub(crate) fn config_path(&self) -> PathBuf {
        self.fox_dir.join("config.json")
    }

    pub(crate) fn head_path(&self) -> PathBuf {
        self.fox_dir.join("HEAD")
    }

    pub(crate) fn log_path(&self) -> PathBuf {
        self.fox_dir.join("commits.json")
    }

    pub(crate) fn index_path(&self) -> PathBuf {
        self.fox_dir.join("index.json")
    }

    pub(crate) fn delta_path(&self) -> PathBuf {
        self.fox_dir.join("delta_cache.json")
    }

    pub(crate) fn staging_dir(&self) -> PathBuf {
        self.fox_dir.join("staging")
    }

    pub(crate) fn objects_dir(&self) -> PathBuf {
        self.fox_dir.join("objects")
    }

    pub(crate) fn packs_dir(&self) -> PathBuf {
        self.fox_dir.join("packs")
    }

    pub(crate) fn lock_path(&self) -> PathBuf {
        self.fox_dir.join("lock")
    }
}

/// Exclusive lock over a working copy's mutating operations
///
/// Held for the duration of the mutation and released on drop, on every
/// exit path. Acquisition blocks until any concurrent holder releases.
pub(crate) struct RepoLock {
    _guard: FileGuard<Box<File>>,
}

impl RepoLock {
    fn acquire(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;
        let guard = file_guard::lock(Box::new(file), Lock::Exclusive, 0, 1)?;
        Ok(Self { _guard: guard })
    }
}

/// Outcome of `add`/`add_all`
#[derive(Debug, Clone, Default)]
pub struct AddReport {
    /// Paths staged, with their stored hashes
    pub staged: Vec<StagedEntry>,
    /// Paths skipped: missing, ignored, or outside the working tree
    pub skipped: Vec<String>,
    /// Tracked paths found deleted; reported but never staged
    pub deleted: Vec<String>,
}

/// Working-copy classification for status callers to render
#[derive(Debug, Clone, Default)]
pub struct StatusReport {
    /// Currently staged entries
    pub staged: Vec<StagedEntry>,
    /// Unstaged modifications and deletions of tracked paths
    pub changes: Vec<WorkingChange>,
    /// Scannable files that are neither tracked nor staged
    pub untracked: Vec<String>,
    /// Current HEAD commit id, if any
    pub head: Option<String>,
}

/// One working copy rooted at a directory containing `.fox/`
#[derive(Debug)]
pub struct Repository {
    root: PathBuf,
    layout: RepoLayout,
    store: ObjectStore,
    staging: StagingArea,
    log: CommitLog,
    packs: PackManager,
}

impl Repository {
    /// Create a fresh working copy at `root`
    pub fn init(root: impl Into<PathBuf>, username: &str, repo_name: &str) -> Result<Self> {
        let root = root.into();
        let layout = RepoLayout::new(&root);
        if layout.fox_dir().exists() {
            return Err(FoxError::RepositoryExists(root));
        }
        fs::create_dir_all(layout.fox_dir())?;
        fs::create_dir_all(layout.objects_dir())?;
        fs::create_dir_all(layout.packs_dir())?;
        fs::create_dir_all(layout.staging_dir())?;

        let config = RepoConfig::new(username.to_string(), repo_name.to_string());
        config.save(&layout.config_path())?;

        let log = CommitLog::open(layout.log_path(), layout.head_path());
        log.replace_all(&[])?;

        info!(root = %root.display(), username, repo_name, "initialized repository");
        Self::open(root)
    }

    /// Open an existing working copy at `root`
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let layout = RepoLayout::new(&root);
        if !layout.fox_dir().is_dir() {
            return Err(FoxError::NotARepository(root));
        }
        let store = ObjectStore::open(layout.objects_dir(), layout.packs_dir())?;
        let staging = StagingArea::open(layout.staging_dir())?;
        let log = CommitLog::open(layout.log_path(), layout.head_path());
        let packs = PackManager::open(layout.objects_dir(), layout.packs_dir())?;
        Ok(Self {
            root,
            layout,
            store,
            staging,
            log,
            packs,
        })
    }

    /// Working-copy root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Object store for this working copy
    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    /// Commit log for this working copy
    pub fn commit_log(&self) -> &CommitLog {
        &self.log
    }

    /// Load the configuration; `init` guarantees it exists
    pub fn config(&self) -> Result<RepoConfig> {
        RepoConfig::load(&self.layout.config_path())?
            .ok_or_else(|| FoxError::NotARepository(self.root.clone()))
    }

    /// Configured origin URL, if any
    pub fn origin(&self) -> Result<Option<String>> {
        Ok(self.config()?.origin_url)
    }

    /// Position in the no-origin / origin-set / remote-linked progression
    pub fn remote_state(&self) -> Result<RemoteState> {
        Ok(self.config()?.remote_state())
    }

    pub(crate) fn save_config(&self, config: &RepoConfig) -> Result<()> {
        config.save(&self.layout.config_path())
    }

    pub(crate) fn layout(&self) -> &RepoLayout {
        &self.layout
    }

    pub(crate) fn lock_exclusive(&self) -> Result<RepoLock> {
        RepoLock::acquire(&self.layout.lock_path())
    }

    /// Normalize and store the origin URL, returning the stored form
    pub fn set_origin(&self, url: &str) -> Result<String> {
        let _lock = self.lock_exclusive()?;
        let normalized = normalize_origin_url(url);
        let mut config = self.config()?;
        config.origin_url = Some(normalized.clone());
        self.save_config(&config)?;
        info!(origin = %normalized, "origin configured");
        Ok(normalized)
    }

    /// Stage explicit paths for the next commit
    ///
    /// Per-path problems (missing files, ignored locations) skip that path
    /// with a warning; only infrastructure failures abort the operation.
    pub fn add<P: AsRef<Path>>(&self, paths: &[P]) -> Result<AddReport> {
        let _lock = self.lock_exclusive()?;
        let mut report = AddReport::default();
        let mut delta = DeltaCache::load(&self.layout.delta_path())?;

        for path in paths {
            let Some(rel) = self.normalize_rel(path.as_ref()) else {
                warn!(path = %path.as_ref().display(), "path is outside the working copy");
                report.skipped.push(path.as_ref().display().to_string());
                continue;
            };
            if is_ignored_path(&rel) {
                warn!(path = %rel, "path is ignored");
                report.skipped.push(rel);
                continue;
            }
            self.stage_one(&rel, &mut delta, &mut report)?;
        }

        delta.save(&self.layout.delta_path())?;
        info!(staged = report.staged.len(), skipped = report.skipped.len(), "add complete");
        Ok(report)
    }

    /// Stage everything the working tree shows as changed or untracked
    ///
    /// With an empty index every scannable file is staged; otherwise the
    /// comprehensive detector picks modifications, and untracked files are
    /// added on top. Deletions are reported, not staged.
    pub fn add_all(&self) -> Result<AddReport> {
        let _lock = self.lock_exclusive()?;
        let mut report = AddReport::default();
        let mut delta = DeltaCache::load(&self.layout.delta_path())?;
        let index = self.load_index()?;

        let mut to_stage;
        if index.is_empty() {
            to_stage = scan_worktree(&self.root)?;
        } else {
            to_stage = Vec::new();
            for change in index.comprehensive_detect(&self.root)? {
                match change.kind {
                    ChangeKind::Modified => to_stage.push(change.path),
                    ChangeKind::Deleted => report.deleted.push(change.path),
                }
            }
            for path in scan_worktree(&self.root)? {
                if !index.is_tracked(&path) {
                    to_stage.push(path);
                }
            }
            to_stage.sort();
            to_stage.dedup();
        }

        for rel in to_stage {
            self.stage_one(&rel, &mut delta, &mut report)?;
        }

        delta.save(&self.layout.delta_path())?;
        info!(
            staged = report.staged.len(),
            deleted = report.deleted.len(),
            "add --all complete"
        );
        Ok(report)
    }

    /// Consume the staging area into a new commit
    ///
    /// Ordering: objects are already stored by `add`; the commit record is
    /// appended, then HEAD moves, then the index is rebuilt and staging
    /// cleared. Automatic packing runs last, inside the same lock.
    pub fn commit(&self, message: &str, author: Option<&str>) -> Result<Commit> {
        let _lock = self.lock_exclusive()?;
        let staged = self.staging.list()?;
        if staged.is_empty() {
            return Err(FoxError::EmptyCommit);
        }

        let config = self.config()?;
        let author = author.unwrap_or(&config.username).to_string();

        let mut files = BTreeMap::new();
        for entry in &staged {
            let content = self.store.get(entry.hash)?;
            let file = FileEntry::from_bytes(entry.path.clone(), &content);
            if let Some(previous) = files.insert(entry.hash, file) {
                if previous.path != entry.path {
                    warn!(
                        hash = %entry.hash,
                        kept = %entry.path,
                        dropped = %previous.path,
                        "identical content staged under multiple paths"
                    );
                }
            }
        }

        let parent = self.log.head()?;
        let commit = Commit::new(message.to_string(), author, parent, files);
        self.log.append(&commit)?;
        self.log.set_head(&commit.id)?;
        self.rebuild_index(&commit)?;
        self.staging.clear()?;
        info!(id = %commit.id, files = commit.files.len(), "commit created");

        self.packs.pack_objects(PackMode::Automatic)?;
        Ok(commit)
    }

    /// Classify the working copy for display
    pub fn status(&self) -> Result<StatusReport> {
        let staged = self.staging.list()?;
        let staged_paths: BTreeSet<&str> = staged.iter().map(|e| e.path.as_str()).collect();
        let index = self.load_index()?;

        let changes = index
            .comprehensive_detect(&self.root)?
            .into_iter()
            .filter(|c| !staged_paths.contains(c.path.as_str()))
            .collect();

        let untracked = scan_worktree(&self.root)?
            .into_iter()
            .filter(|p| !index.is_tracked(p) && !staged_paths.contains(p.as_str()))
            .collect();

        Ok(StatusReport {
            staged,
            changes,
            untracked,
            head: self.log.head()?,
        })
    }

    /// Commits most-recent-first, optionally truncated
    pub fn history(&self, limit: Option<usize>) -> Result<Vec<Commit>> {
        self.log.history(limit)
    }

    /// Manually pack loose objects, regardless of the threshold
    pub fn gc(&self) -> Result<Option<PackSummary>> {
        let _lock = self.lock_exclusive()?;
        self.packs.pack_objects(PackMode::Manual)
    }

    /// Storage occupancy across the loose and packed tiers
    pub fn stats(&self) -> Result<StoreStats> {
        self.packs.stats()
    }

    /// Rebuild and persist the index from one commit's file set
    pub(crate) fn rebuild_index(&self, commit: &Commit) -> Result<()> {
        let index = Index::from_commit(commit, &self.root)?;
        index.save(&self.layout.index_path())
    }

    /// Materialize a commit's files into the working tree
    ///
    /// Entries with empty paths or paths that would escape the root
    /// (absolute, `..`) are skipped. Returns the number written.
    pub(crate) fn extract_commit(&self, commit: &Commit) -> Result<usize> {
        let mut extracted = 0;
        for entry in commit.files.values() {
            if !is_safe_rel_path(&entry.path) {
                warn!(path = %entry.path, "skipping unsafe path during extraction");
                continue;
            }
            let content = entry.decode_content().map_err(|e| {
                FoxError::CorruptState(format!("commit {} file {}: {}", commit.id, entry.path, e))
            })?;
            let full = self.root.join(fs_path(&entry.path));
            if let Some(parent) = full.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&full, &content)?;
            extracted += 1;
        }
        Ok(extracted)
    }

    /// Index with lazy bootstrap from the last commit when absent
    fn load_index(&self) -> Result<Index> {
        if let Some(index) = Index::load(&self.layout.index_path())? {
            return Ok(index);
        }
        let commits = self.log.load()?;
        match commits.last() {
            Some(commit) => {
                debug!(id = %commit.id, "bootstrapping index from last commit");
                let index = Index::from_commit(commit, &self.root)?;
                index.save(&self.layout.index_path())?;
                Ok(index)
            }
            None => Ok(Index::default()),
        }
    }

    /// Hash, store, and stage one normalized path
    ///
    /// An unreadable file is skipped and recorded in the report.
    fn stage_one(&self, rel: &str, delta: &mut DeltaCache, report: &mut AddReport) -> Result<()> {
        let full = self.root.join(fs_path(rel));
        let content = match fs::read(&full) {
            Ok(content) => content,
            Err(e) => {
                warn!(path = %rel, error = %e, "cannot read file, skipping");
                report.skipped.push(rel.to_string());
                return Ok(());
            }
        };
        let hash = self.store.put(&content)?;
        let entry = self.staging.stage(rel, hash)?;
        delta.record(rel, hash);
        debug!(path = %rel, %hash, "staged");
        report.staged.push(entry);
        Ok(())
    }

    /// Resolve a caller-supplied path to a `/`-separated path inside the
    /// working copy, or `None` when it escapes it
    fn normalize_rel(&self, path: &Path) -> Option<String> {
        let rel = if path.is_absolute() {
            path.strip_prefix(&self.root).ok()?
        } else {
            path
        };
        let mut parts = Vec::new();
        for component in rel.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_str()?),
                Component::CurDir => {}
                _ => return None,
            }
        }
        if parts.is_empty() {
            return None;
        }
        Some(parts.join("/"))
    }
}
