//! Append-only commit log and HEAD pointer
//!
//! The log is one JSON array rewritten atomically on every append; HEAD is
//! a plain-text id updated only after the append lands. History is never
//! rewritten, except when adopting a remote repository wholesale.

use std::fs;
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::error::Result;
use crate::object::Commit;

/// Ordered commit history plus the HEAD pointer
#[derive(Debug)]
pub struct CommitLog {
    log_path: PathBuf,
    head_path: PathBuf,
}

impl CommitLog {
    /// Open over the log and HEAD file paths
    pub fn open(log_path: PathBuf, head_path: PathBuf) -> Self {
        Self {
            log_path,
            head_path,
        }
    }

    /// All commits, oldest first
    ///
    /// A missing log is empty; an unreadable one degrades to empty with a
    /// warning instead of failing the command.
    pub fn load(&self) -> Result<Vec<Commit>> {
        if !self.log_path.exists() {
            return Ok(Vec::new());
        }
        let data = fs::read_to_string(&self.log_path)?;
        match serde_json::from_str(&data) {
            Ok(commits) => Ok(commits),
            Err(e) => {
                warn!(error = %e, "commit log unreadable, treating as empty");
                Ok(Vec::new())
            }
        }
    }

    /// Append one commit atomically (rewrite to a temp file, then rename)
    pub fn append(&self, commit: &Commit) -> Result<()> {
        let mut commits = self.load()?;
        commits.push(commit.clone());
        self.write(&commits)?;
        debug!(id = %commit.id, total = commits.len(), "commit appended");
        Ok(())
    }

    /// Replace the whole history; used only when adopting a remote
    pub fn replace_all(&self, commits: &[Commit]) -> Result<()> {
        self.write(commits)?;
        debug!(total = commits.len(), "commit log replaced");
        Ok(())
    }

    /// Commits most-recent-first, optionally truncated
    pub fn history(&self, limit: Option<usize>) -> Result<Vec<Commit>> {
        let mut commits = self.load()?;
        commits.reverse();
        if let Some(limit) = limit {
            commits.truncate(limit);
        }
        Ok(commits)
    }

    /// Every commit id, oldest first
    pub fn commit_ids(&self) -> Result<Vec<String>> {
        Ok(self.load()?.into_iter().map(|c| c.id).collect())
    }

    /// Number of commits in the log
    pub fn len(&self) -> Result<usize> {
        Ok(self.load()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Current HEAD commit id, if any
    pub fn head(&self) -> Result<Option<String>> {
        if !self.head_path.exists() {
            return Ok(None);
        }
        let id = fs::read_to_string(&self.head_path)?.trim().to_string();
        if id.is_empty() {
            return Ok(None);
        }
        Ok(Some(id))
    }

    /// Atomic HEAD update, performed only after a successful append
    pub fn set_head(&self, commit_id: &str) -> Result<()> {
        let tmp_path = self.head_path.with_extension("tmp");
        fs::write(&tmp_path, commit_id)?;
        fs::rename(&tmp_path, &self.head_path)?;
        Ok(())
    }

    fn write(&self, commits: &[Commit]) -> Result<()> {
        let data = serde_json::to_string_pretty(commits)?;
        let tmp_path = self.log_path.with_extension("tmp");
        fs::write(&tmp_path, &data)?;
        fs::rename(&tmp_path, &self.log_path)?;
        Ok(())
    }
}
