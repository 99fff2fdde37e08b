//! Per-path delta lineage
//!
//! Tracks, for every path that passes through `add`, the hash staged now
//! and the hash staged before it. The pairs record lineage for future
//! delta transport; no storage or wire decision reads them today.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::warn;

use crate::error::Result;
use crate::object::ContentHash;

/// Lineage of one path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaEntry {
    /// Hash recorded by the most recent `add`
    pub current_hash: ContentHash,
    /// Hash recorded by the `add` before that, if any
    pub base_hash: Option<ContentHash>,
}

/// Path → lineage map, persisted as `delta_cache.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeltaCache {
    entries: BTreeMap<String, DeltaEntry>,
}

impl DeltaCache {
    /// Load from disk; missing or unreadable files degrade to empty
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(DeltaCache::default());
        }
        let data = fs::read_to_string(path)?;
        match serde_json::from_str(&data) {
            Ok(cache) => Ok(cache),
            Err(e) => {
                warn!(error = %e, "delta cache unreadable, treating as empty");
                Ok(DeltaCache::default())
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

    /// Shift the path's current hash to base and record the new current
    pub fn record(&mut self, path: &str, hash: ContentHash) {
        let base_hash = self.entries.get(path).map(|e| e.current_hash);
        self.entries.insert(
            path.to_string(),
            DeltaEntry {
                current_hash: hash,
                base_hash,
            },
        );
    }

    /// Lineage for one path
    pub fn get(&self, path: &str) -> Option<&DeltaEntry> {
        self.entries.get(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
