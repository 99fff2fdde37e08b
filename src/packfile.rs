//! Packfile compaction for the object store
//!
//! Garbage collection gathers loose objects into one compressed payload
//! plus an uncompressed manifest, then deletes the loose copies. Members
//! keep their loose-format (already compressed) bytes inside the payload,
//! and the whole aggregate is compressed again; membership checks read
//! only the manifest.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::object::ContentHash;
use crate::store::compress;

/// Loose-object count that triggers packing after a commit
pub const PACK_THRESHOLD: usize = 20;

/// How a packing run was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackMode {
    /// Post-commit housekeeping; packs only at or above [`PACK_THRESHOLD`]
    Automatic,
    /// Explicit GC; packs whenever any loose object exists
    Manual,
}

/// Uncompressed sidecar describing one pack's members
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackManifest {
    /// Payload file name within the packs directory
    pub pack_file: String,
    /// Hex hashes of the members, sorted
    pub objects: Vec<String>,
    /// Member count
    pub object_count: usize,
    /// Creation time, RFC 3339
    pub created_at: String,
}

impl PackManifest {
    /// Membership check against the hex form of a hash
    pub fn contains(&self, hex: &str) -> bool {
        self.objects.iter().any(|h| h == hex)
    }

    /// Persist next to the payload it describes
    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_string_pretty(self)?;
        let tmp_path = path.with_extension("idx.tmp");
        fs::write(&tmp_path, &data)?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    }

    /// Load every readable manifest in the packs directory
    ///
    /// Unparseable manifests are skipped with a warning; their payloads
    /// simply stop resolving, which the caller reports as missing objects
    /// rather than a failed command.
    pub fn load_all(packs_dir: &Path) -> Result<Vec<PackManifest>> {
        let mut manifests = Vec::new();
        if !packs_dir.exists() {
            return Ok(manifests);
        }
        for entry in fs::read_dir(packs_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("idx") {
                continue;
            }
            let data = fs::read_to_string(&path)?;
            match serde_json::from_str::<PackManifest>(&data) {
                Ok(manifest) => manifests.push(manifest),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable pack manifest")
                }
            }
        }
        manifests.sort_by(|a, b| a.pack_file.cmp(&b.pack_file));
        Ok(manifests)
    }
}

/// Outcome of a packing run
#[derive(Debug, Clone)]
pub struct PackSummary {
    /// Identifier embedded in the pack and manifest file names
    pub pack_id: String,
    /// Loose objects relocated into the pack
    pub object_count: usize,
    /// Compressed payload size on disk
    pub payload_bytes: u64,
}

/// Storage occupancy across both tiers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Loose objects, sharded and legacy flat
    pub loose_objects: usize,
    /// Bytes held by loose objects
    pub loose_bytes: u64,
    /// Pack payloads on disk
    pub pack_count: usize,
    /// Objects referenced by pack manifests
    pub packed_objects: usize,
    /// Bytes held by pack payloads
    pub pack_bytes: u64,
}

/// Compacts loose objects into packs and reports storage occupancy
#[derive(Debug)]
pub struct PackManager {
    objects_dir: PathBuf,
    packs_dir: PathBuf,
}

impl PackManager {
    /// Create a manager over the store's directories
    pub fn open(objects_dir: PathBuf, packs_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&objects_dir)?;
        fs::create_dir_all(&packs_dir)?;
        Ok(Self {
            objects_dir,
            packs_dir,
        })
    }

    /// Enumerate sharded loose objects as (hash, path) pairs
    ///
    /// The legacy flat tier is left alone: those files are uncompressed
    /// and packing them would break the loose-format member invariant.
    pub fn loose_objects(&self) -> Result<Vec<(ContentHash, PathBuf)>> {
        let mut loose = Vec::new();
        if !self.objects_dir.exists() {
            return Ok(loose);
        }
        for shard in fs::read_dir(&self.objects_dir)? {
            let shard = shard?;
            let shard_path = shard.path();
            if !shard_path.is_dir() {
                continue;
            }
            let Some(prefix) = shard_path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if prefix.len() != 2 {
                continue;
            }
            for entry in fs::read_dir(&shard_path)? {
                let entry = entry?;
                let path = entry.path();
                if !path.is_file() {
                    continue;
                }
                let Some(rest) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                match ContentHash::from_hex(&format!("{}{}", prefix, rest)) {
                    Ok(hash) => loose.push((hash, path)),
                    // Temp files and strays are not objects.
                    Err(_) => debug!(path = %path.display(), "ignoring non-object file in shard"),
                }
            }
        }
        loose.sort_by_key(|(hash, _)| *hash);
        Ok(loose)
    }

    /// Count of sharded loose objects
    pub fn loose_count(&self) -> Result<usize> {
        Ok(self.loose_objects()?.len())
    }

    /// Relocate loose objects into a new pack
    ///
    /// Write order is payload, then manifest, then loose deletion: a crash
    /// leaves either an unreferenced payload or a pack shadowed by its
    /// still-present loose copies, both of which read correctly.
    pub fn pack_objects(&self, mode: PackMode) -> Result<Option<PackSummary>> {
        let loose = self.loose_objects()?;
        if loose.is_empty() {
            return Ok(None);
        }
        if mode == PackMode::Automatic && loose.len() < PACK_THRESHOLD {
            debug!(loose = loose.len(), threshold = PACK_THRESHOLD, "below pack threshold");
            return Ok(None);
        }

        let pack_id = uuid::Uuid::new_v4().to_string();
        let pack_file = format!("pack-{}.pack", pack_id);

        let mut members = BTreeMap::new();
        for (hash, path) in &loose {
            members.insert(hash.to_hex(), BASE64.encode(fs::read(path)?));
        }

        let payload = compress(&serde_json::to_vec(&members)?)?;
        let payload_path = self.packs_dir.join(&pack_file);
        let tmp_path = payload_path.with_extension("pack.tmp");
        fs::write(&tmp_path, &payload)?;
        fs::rename(&tmp_path, &payload_path)?;

        let manifest = PackManifest {
            pack_file: pack_file.clone(),
            objects: members.keys().cloned().collect(),
            object_count: members.len(),
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        manifest.save(&self.packs_dir.join(format!("pack-{}.idx", pack_id)))?;

        for (_, path) in &loose {
            fs::remove_file(path)?;
        }
        self.prune_empty_shards()?;

        info!(
            pack = %pack_file,
            objects = members.len(),
            bytes = payload.len(),
            "packed loose objects"
        );
        Ok(Some(PackSummary {
            pack_id,
            object_count: members.len(),
            payload_bytes: payload.len() as u64,
        }))
    }

    /// Occupancy of both tiers, legacy flat files included
    pub fn stats(&self) -> Result<StoreStats> {
        let mut stats = StoreStats::default();

        if self.objects_dir.exists() {
            for entry in fs::read_dir(&self.objects_dir)? {
                let entry = entry?;
                let path = entry.path();
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                if path.is_file() {
                    if ContentHash::from_hex(name).is_ok() {
                        stats.loose_objects += 1;
                        stats.loose_bytes += entry.metadata()?.len();
                    }
                } else if path.is_dir() && name.len() == 2 {
                    for file in fs::read_dir(&path)? {
                        let file = file?;
                        let file_path = file.path();
                        if !file_path.is_file() {
                            continue;
                        }
                        let Some(rest) = file_path.file_name().and_then(|n| n.to_str()) else {
                            continue;
                        };
                        // Temp files and strays are not objects.
                        if ContentHash::from_hex(&format!("{}{}", name, rest)).is_ok() {
                            stats.loose_objects += 1;
                            stats.loose_bytes += file.metadata()?.len();
                        }
                    }
                }
            }
        }

        for manifest in PackManifest::load_all(&self.packs_dir)? {
            stats.pack_count += 1;
            stats.packed_objects += manifest.object_count;
            let payload = self.packs_dir.join(&manifest.pack_file);
            if payload.exists() {
                stats.pack_bytes += fs::metadata(&payload)?.len();
            }
        }

        Ok(stats)
    }

    fn prune_empty_shards(&self) -> Result<()> {
        for entry in fs::read_dir(&self.objects_dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            if fs::read_dir(&path)?.next().is_none() {
                fs::remove_dir(&path)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ObjectStore;
    use tempfile::TempDir;

    fn open_pair(dir: &TempDir) -> (ObjectStore, PackManager) {
        let objects = dir.path().join("objects");
        let packs = dir.path().join("packs");
        let store = ObjectStore::open(objects.clone(), packs.clone()).unwrap();
        let manager = PackManager::open(objects, packs).unwrap();
        (store, manager)
    }

    #[test]
    fn test_automatic_below_threshold_is_noop() {
        let dir = TempDir::new().unwrap();
        let (store, manager) = open_pair(&dir);
        for i in 0..5 {
            store.put(format!("content {}", i).as_bytes()).unwrap();
        }

        assert!(manager.pack_objects(PackMode::Automatic).unwrap().is_none());
        assert_eq!(manager.loose_count().unwrap(), 5);
    }

    #[test]
    fn test_manual_pack_ignores_threshold() {
        let dir = TempDir::new().unwrap();
        let (store, manager) = open_pair(&dir);
        let hashes: Vec<_> = (0..3)
            .map(|i| store.put(format!("content {}", i).as_bytes()).unwrap())
            .collect();

        let summary = manager.pack_objects(PackMode::Manual).unwrap().unwrap();
        assert_eq!(summary.object_count, 3);
        assert_eq!(manager.loose_count().unwrap(), 0);

        for (i, hash) in hashes.iter().enumerate() {
            assert_eq!(store.get(*hash).unwrap(), format!("content {}", i).as_bytes());
        }
    }

    #[test]
    fn test_automatic_pack_fires_at_threshold() {
        let dir = TempDir::new().unwrap();
        let (store, manager) = open_pair(&dir);
        for i in 0..PACK_THRESHOLD {
            store.put(format!("threshold content {}", i).as_bytes()).unwrap();
        }

        let summary = manager.pack_objects(PackMode::Automatic).unwrap().unwrap();
        assert_eq!(summary.object_count, PACK_THRESHOLD);
        assert_eq!(manager.loose_count().unwrap(), 0);
    }

    #[test]
    fn test_manual_pack_on_empty_store_is_noop() {
        let dir = TempDir::new().unwrap();
        let (_store, manager) = open_pair(&dir);
        assert!(manager.pack_objects(PackMode::Manual).unwrap().is_none());
    }

    #[test]
    fn test_pack_writes_payload_and_manifest_pair() {
        let dir = TempDir::new().unwrap();
        let (store, manager) = open_pair(&dir);
        store.put(b"only object").unwrap();

        let summary = manager.pack_objects(PackMode::Manual).unwrap().unwrap();
        let packs = dir.path().join("packs");
        assert!(packs.join(format!("pack-{}.pack", summary.pack_id)).exists());
        assert!(packs.join(format!("pack-{}.idx", summary.pack_id)).exists());

        let manifests = PackManifest::load_all(&packs).unwrap();
        assert_eq!(manifests.len(), 1);
        assert_eq!(manifests[0].object_count, 1);
        assert!(manifests[0].contains(&ContentHash::from_data(b"only object").to_hex()));
    }

    #[test]
    fn test_empty_shard_dirs_are_pruned() {
        let dir = TempDir::new().unwrap();
        let (store, manager) = open_pair(&dir);
        let hash = store.put(b"prune me").unwrap();
        let shard_dir = dir.path().join("objects").join(&hash.to_hex()[..2]);
        assert!(shard_dir.exists());

        manager.pack_objects(PackMode::Manual).unwrap().unwrap();
        assert!(!shard_dir.exists());
    }

    #[test]
    fn test_second_pack_contains_only_new_objects() {
        let dir = TempDir::new().unwrap();
        let (store, manager) = open_pair(&dir);
        let old = store.put(b"first generation").unwrap();
        manager.pack_objects(PackMode::Manual).unwrap().unwrap();

        let new = store.put(b"second generation").unwrap();
        let summary = manager.pack_objects(PackMode::Manual).unwrap().unwrap();
        assert_eq!(summary.object_count, 1);

        assert_eq!(store.get(old).unwrap(), b"first generation");
        assert_eq!(store.get(new).unwrap(), b"second generation");
    }

    #[test]
    fn test_unreadable_manifest_is_skipped() {
        let dir = TempDir::new().unwrap();
        let (store, manager) = open_pair(&dir);
        store.put(b"real object").unwrap();
        manager.pack_objects(PackMode::Manual).unwrap().unwrap();
        fs::write(dir.path().join("packs").join("pack-junk.idx"), "{broken").unwrap();

        let manifests = PackManifest::load_all(&dir.path().join("packs")).unwrap();
        assert_eq!(manifests.len(), 1);
    }

    #[test]
    fn test_stats_track_both_tiers() {
        let dir = TempDir::new().unwrap();
        let (store, manager) = open_pair(&dir);
        for i in 0..4 {
            store.put(format!("stat content {}", i).as_bytes()).unwrap();
        }
        let before = manager.stats().unwrap();
        assert_eq!(before.loose_objects, 4);
        assert_eq!(before.pack_count, 0);
        assert!(before.loose_bytes > 0);

        manager.pack_objects(PackMode::Manual).unwrap().unwrap();
        let after = manager.stats().unwrap();
        assert_eq!(after.loose_objects, 0);
        assert_eq!(after.pack_count, 1);
        assert_eq!(after.packed_objects, 4);
        assert!(after.pack_bytes > 0);
    }

    #[test]
    fn test_stats_skip_stray_shard_files() {
        let dir = TempDir::new().unwrap();
        let (store, manager) = open_pair(&dir);
        let hash = store.put(b"real object").unwrap();

        // What an interrupted put leaves behind.
        let hex = hash.to_hex();
        let shard_dir = dir.path().join("objects").join(&hex[..2]);
        fs::write(shard_dir.join(format!("{}.tmp", &hex[2..])), b"partial").unwrap();

        let stats = manager.stats().unwrap();
        assert_eq!(stats.loose_objects, 1);
        assert_eq!(stats.loose_objects, manager.loose_count().unwrap());
        let object_len = fs::metadata(shard_dir.join(&hex[2..])).unwrap().len();
        assert_eq!(stats.loose_bytes, object_len);
    }
}
