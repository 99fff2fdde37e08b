//! Staging area
//!
//! One ephemeral JSON record per path queued for the next commit. Records
//! are named by a hash of the full relative path, so same-named files in
//! different directories never collide.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::warn;

use crate::error::Result;
use crate::object::ContentHash;

/// One path queued for the next commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedEntry {
    /// Working-tree path, `/`-separated, relative to the repository root
    pub path: String,
    /// Content hash stored for this path at staging time
    pub hash: ContentHash,
    /// Staging time, RFC 3339
    pub staged_at: String,
}

/// Directory of staged-path records, consumed wholesale by commit
#[derive(Debug)]
pub struct StagingArea {
    dir: PathBuf,
}

impl StagingArea {
    /// Open the staging directory, creating it if needed
    pub fn open(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Queue a path; re-staging the same path replaces its record
    pub fn stage(&self, path: &str, hash: ContentHash) -> Result<StagedEntry> {
        let entry = StagedEntry {
            path: path.to_string(),
            hash,
            staged_at: chrono::Utc::now().to_rfc3339(),
        };
        let record_path = self.record_path(path);
        let data = serde_json::to_string_pretty(&entry)?;
        let tmp_path = record_path.with_extension("json.tmp");
        fs::write(&tmp_path, &data)?;
        fs::rename(&tmp_path, &record_path)?;
        Ok(entry)
    }

    /// All current records, sorted by path
    ///
    /// Unreadable records are skipped with a warning rather than failing
    /// the listing.
    pub fn list(&self) -> Result<Vec<StagedEntry>> {
        let mut entries = Vec::new();
        for item in fs::read_dir(&self.dir)? {
            let item = item?;
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let data = fs::read_to_string(&path)?;
            match serde_json::from_str::<StagedEntry>(&data) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable staging record"),
            }
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    /// Drop one path from staging; true when a record existed
    pub fn remove(&self, path: &str) -> Result<bool> {
        let record_path = self.record_path(path);
        if record_path.exists() {
            fs::remove_file(&record_path)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Remove every record; called only after a successful commit
    pub fn clear(&self) -> Result<()> {
        for item in fs::read_dir(&self.dir)? {
            let item = item?;
            let path = item.path();
            if path.is_file() {
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.list()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.list()?.is_empty())
    }

    fn record_path(&self, path: &str) -> PathBuf {
        let key = ContentHash::from_data(path.as_bytes()).to_hex();
        self.dir.join(format!("{}.json", key))
    }
}
