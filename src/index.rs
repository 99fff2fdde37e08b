//! Working-tree index and change detection
//!
//! The index records the last committed `(hash, mtime, size)` per tracked
//! path. Detection is two-tier: the fast path stats every tracked file and
//! rehashes only on a mismatch, the comprehensive path rehashes everything
//! present. Either way the verdict comes from the content hash, never from
//! metadata alone.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::error::Result;
use crate::object::{Commit, ContentHash};

/// Directory and file names excluded from working-tree scans, in addition
/// to anything whose name starts with a dot
const IGNORED_NAMES: &[&str] = &[
    "venv",
    "env",
    "node_modules",
    "__pycache__",
    "dist",
    "build",
    "Thumbs.db",
];

/// Last committed state of one tracked path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Content hash at the last commit
    pub hash: ContentHash,
    /// Modification time, milliseconds since the Unix epoch
    pub mtime: i64,
    /// File size in bytes
    pub size: u64,
}

/// What happened to a tracked path since the last commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChangeKind {
    Modified,
    Deleted,
}

/// One detected working-tree change
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct WorkingChange {
    pub path: String,
    pub kind: ChangeKind,
}

/// Snapshot of tracked paths as of the last commit
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Index {
    entries: BTreeMap<String, IndexEntry>,
}

impl Index {
    /// Load from disk
    ///
    /// `None` when the file does not exist (callers bootstrap from the
    /// last commit). An unparseable index degrades to an empty one with a
    /// warning instead of failing the command.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read_to_string(path)?;
        match serde_json::from_str(&data) {
            Ok(index) => Ok(Some(index)),
            Err(e) => {
                warn!(error = %e, "index unreadable, treating as empty");
                Ok(Some(Index::default()))
            }
        }
    }

    /// Persist atomically (temp file, then rename)
    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_string_pretty(self)?;
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, &data)?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    }

    /// Rebuild from a commit's file set, statting what exists on disk
    ///
    /// Entries with empty or escaping paths (legacy bare payloads, hostile
    /// commits) or paths missing from the working tree are skipped.
    pub fn from_commit(commit: &Commit, root: &Path) -> Result<Self> {
        let mut index = Index::default();
        for (hash, entry) in &commit.files {
            if !is_safe_rel_path(&entry.path) {
                continue;
            }
            let full = root.join(fs_path(&entry.path));
            let Ok(metadata) = fs::metadata(&full) else {
                continue;
            };
            index.entries.insert(
                entry.path.clone(),
                IndexEntry {
                    hash: *hash,
                    mtime: mtime_millis(&metadata)?,
                    size: metadata.len(),
                },
            );
        }
        Ok(index)
    }

    /// Record the current on-disk state of one path
    pub fn record(&mut self, path: String, hash: ContentHash, metadata: &fs::Metadata) -> Result<()> {
        self.entries.insert(
            path,
            IndexEntry {
                hash,
                mtime: mtime_millis(metadata)?,
                size: metadata.len(),
            },
        );
        Ok(())
    }

    /// Entry for a tracked path
    pub fn get(&self, path: &str) -> Option<&IndexEntry> {
        self.entries.get(path)
    }

    /// Whether a path was present in the last commit
    pub fn is_tracked(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Tracked paths in sorted order
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stat-first change detection over tracked paths
    ///
    /// Missing files are deletions. A `(size, mtime)` mismatch triggers a
    /// rehash; only a hash mismatch makes the file modified, so touch-only
    /// changes are filtered out.
    pub fn fast_detect(&self, root: &Path) -> Result<Vec<WorkingChange>> {
        let mut changes = Vec::new();
        for (path, entry) in &self.entries {
            let full = root.join(fs_path(path));
            let Ok(metadata) = fs::metadata(&full) else {
                changes.push(WorkingChange {
                    path: path.clone(),
                    kind: ChangeKind::Deleted,
                });
                continue;
            };
            if metadata.len() == entry.size && mtime_millis(&metadata)? == entry.mtime {
                continue;
            }
            match hash_file(&full) {
                Ok(hash) if hash == entry.hash => {
                    debug!(path, "stat mismatch but content unchanged");
                }
                Ok(_) => changes.push(WorkingChange {
                    path: path.clone(),
                    kind: ChangeKind::Modified,
                }),
                // Deleted between the stat and the read.
                Err(_) => changes.push(WorkingChange {
                    path: path.clone(),
                    kind: ChangeKind::Deleted,
                }),
            }
        }
        changes.sort();
        Ok(changes)
    }

    /// Hash-everything change detection over the whole working tree
    pub fn comprehensive_detect(&self, root: &Path) -> Result<Vec<WorkingChange>> {
        let mut changes = Vec::new();
        let mut seen = Vec::new();
        for path in scan_worktree(root)? {
            let Some(entry) = self.entries.get(&path) else {
                continue;
            };
            seen.push(path.clone());
            let hash = hash_file(&root.join(fs_path(&path)))?;
            if hash != entry.hash {
                changes.push(WorkingChange {
                    path,
                    kind: ChangeKind::Modified,
                });
            }
        }
        for path in self.entries.keys() {
            if !seen.contains(path) {
                changes.push(WorkingChange {
                    path: path.clone(),
                    kind: ChangeKind::Deleted,
                });
            }
        }
        changes.sort();
        Ok(changes)
    }
}

/// Hash a file's current content
pub fn hash_file(path: &Path) -> io::Result<ContentHash> {
    Ok(ContentHash::from_data(&fs::read(path)?))
}

/// Enumerate scannable working-tree files as sorted `/`-separated paths
pub fn scan_worktree(root: &Path) -> Result<Vec<String>> {
    let mut paths = Vec::new();
    let walker = WalkDir::new(root).min_depth(1).into_iter();
    for entry in walker.filter_entry(|e| !is_ignored(e)) {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        match relative_slash_path(root, entry.path()) {
            Some(path) => paths.push(path),
            None => warn!(path = %entry.path().display(), "skipping non-UTF-8 path"),
        }
    }
    paths.sort();
    Ok(paths)
}

/// Convert a stored `/`-separated path to a platform path
pub(crate) fn fs_path(path: &str) -> PathBuf {
    path.split('/').collect()
}

fn is_ignored(entry: &DirEntry) -> bool {
    let Some(name) = entry.file_name().to_str() else {
        return true;
    };
    name.starts_with('.') || IGNORED_NAMES.contains(&name)
}

/// Same ignore rules as the scan, applied to a stored `/`-separated path
pub(crate) fn is_ignored_path(rel: &str) -> bool {
    rel.split('/')
        .any(|part| part.starts_with('.') || IGNORED_NAMES.contains(&part))
}

/// True when a stored path stays inside the working tree
pub(crate) fn is_safe_rel_path(path: &str) -> bool {
    if path.is_empty() {
        return false;
    }
    fs_path(path)
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
}

fn relative_slash_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in rel.components() {
        parts.push(component.as_os_str().to_str()?);
    }
    Some(parts.join("/"))
}

fn mtime_millis(metadata: &fs::Metadata) -> io::Result<i64> {
    let modified = metadata.modified()?;
    Ok(modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0))
}
