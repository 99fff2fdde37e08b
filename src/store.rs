//! Content-addressable object storage
//!
//! Blobs live in one of three on-disk tiers: zstd-compressed loose files
//! sharded by hash prefix, a legacy flat tier of uncompressed files, and
//! pack files produced by garbage collection. Lookup falls through the
//! tiers in that order, so a hash stays resolvable while GC relocates it.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use lru::LruCache;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::error::{FoxError, Result};
use crate::object::ContentHash;
use crate::packfile::PackManifest;

/// zstd level for loose objects and pack payloads
pub const COMPRESSION_LEVEL: i32 = 3;

/// Decompressed pack member maps kept in memory
const PACK_CACHE_CAPACITY: usize = 4;

/// Compress raw bytes into the loose on-disk form
pub(crate) fn compress(data: &[u8]) -> io::Result<Vec<u8>> {
    zstd::encode_all(data, COMPRESSION_LEVEL)
}

/// Decompress loose on-disk bytes back to raw content
pub(crate) fn decompress(data: &[u8]) -> io::Result<Vec<u8>> {
    zstd::decode_all(data)
}

/// Content-addressed blob store over the loose and packed tiers
#[derive(Debug)]
pub struct ObjectStore {
    /// Loose tier root: sharded directories plus legacy flat files
    objects_dir: PathBuf,
    /// Pack tier root: payloads and their manifests
    packs_dir: PathBuf,
    /// Decoded pack member maps, keyed by pack file name
    pack_cache: Mutex<LruCache<String, Arc<HashMap<String, String>>>>,
}

impl ObjectStore {
    /// Open the store rooted at the repository metadata directory
    pub fn open(objects_dir: PathBuf, packs_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&objects_dir)?;
        fs::create_dir_all(&packs_dir)?;
        let capacity = NonZeroUsize::new(PACK_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            objects_dir,
            packs_dir,
            pack_cache: Mutex::new(LruCache::new(capacity)),
        })
    }

    /// Store raw content, returning its hash
    ///
    /// Idempotent: if the hash already resolves in any tier, nothing is
    /// written and the same hash comes back.
    pub fn put(&self, content: &[u8]) -> Result<ContentHash> {
        let hash = ContentHash::from_data(content);
        if self.contains(hash)? {
            debug!(%hash, "object already stored");
            return Ok(hash);
        }

        let path = self.shard_path(hash);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let compressed = compress(content)?;
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, &compressed)?;
        fs::rename(&tmp_path, &path)?;

        debug!(%hash, size = content.len(), "stored loose object");
        Ok(hash)
    }

    /// Fetch raw content by hash, whichever tier currently holds it
    pub fn get(&self, hash: ContentHash) -> Result<Vec<u8>> {
        let shard = self.shard_path(hash);
        if shard.exists() {
            let compressed = fs::read(&shard)?;
            let content = decompress(&compressed)
                .map_err(|e| FoxError::CorruptState(format!("loose object {}: {}", hash, e)))?;
            debug!(%hash, tier = "loose", "object read");
            return Ok(content);
        }

        // Legacy flat objects predate compression and sharding.
        let flat = self.flat_path(hash);
        if flat.exists() {
            debug!(%hash, tier = "flat", "object read");
            return Ok(fs::read(&flat)?);
        }

        if let Some(content) = self.get_packed(hash)? {
            debug!(%hash, tier = "packed", "object read");
            return Ok(content);
        }

        Err(FoxError::ObjectNotFound(hash))
    }

    /// Check whether a hash resolves in any tier without reading payloads
    pub fn contains(&self, hash: ContentHash) -> Result<bool> {
        if self.shard_path(hash).exists() || self.flat_path(hash).exists() {
            return Ok(true);
        }
        let hex = hash.to_hex();
        for manifest in PackManifest::load_all(&self.packs_dir)? {
            if manifest.contains(&hex) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Loose tier root
    pub fn objects_dir(&self) -> &Path {
        &self.objects_dir
    }

    /// Pack tier root
    pub fn packs_dir(&self) -> &Path {
        &self.packs_dir
    }

    fn shard_path(&self, hash: ContentHash) -> PathBuf {
        let hex = hash.to_hex();
        self.objects_dir.join(&hex[..2]).join(&hex[2..])
    }

    fn flat_path(&self, hash: ContentHash) -> PathBuf {
        self.objects_dir.join(hash.to_hex())
    }

    fn get_packed(&self, hash: ContentHash) -> Result<Option<Vec<u8>>> {
        let hex = hash.to_hex();
        for manifest in PackManifest::load_all(&self.packs_dir)? {
            if !manifest.contains(&hex) {
                continue;
            }
            let members = self.pack_members(&manifest)?;
            let Some(encoded) = members.get(&hex) else {
                warn!(%hash, pack = %manifest.pack_file, "manifest lists object missing from payload");
                continue;
            };
            let loose_bytes = BASE64.decode(encoded).map_err(|e| {
                FoxError::CorruptState(format!("pack member {} in {}: {}", hex, manifest.pack_file, e))
            })?;
            let content = decompress(&loose_bytes).map_err(|e| {
                FoxError::CorruptState(format!("pack member {} in {}: {}", hex, manifest.pack_file, e))
            })?;
            return Ok(Some(content));
        }
        Ok(None)
    }

    /// Decode a pack payload into its member map, through the LRU cache
    fn pack_members(&self, manifest: &PackManifest) -> Result<Arc<HashMap<String, String>>> {
        {
            let mut cache = self.pack_cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(members) = cache.get(&manifest.pack_file) {
                return Ok(Arc::clone(members));
            }
        }

        let payload = fs::read(self.packs_dir.join(&manifest.pack_file))?;
        let json = decompress(&payload)
            .map_err(|e| FoxError::CorruptState(format!("pack {}: {}", manifest.pack_file, e)))?;
        let members: HashMap<String, String> = serde_json::from_slice(&json)
            .map_err(|e| FoxError::CorruptState(format!("pack {}: {}", manifest.pack_file, e)))?;
        let members = Arc::new(members);

        let mut cache = self.pack_cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.put(manifest.pack_file.clone(), Arc::clone(&members));
        Ok(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir) -> ObjectStore {
        ObjectStore::open(dir.path().join("objects"), dir.path().join("packs")).unwrap()
    }

    #[test]
    fn test_put_get_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let hash = store.put(b"hello world").unwrap();
        assert_eq!(store.get(hash).unwrap(), b"hello world");
    }

    #[test]
    fn test_put_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let first = store.put(b"same bytes").unwrap();
        let second = store.put(b"same bytes").unwrap();
        assert_eq!(first, second);

        let shard_dir = dir.path().join("objects").join(&first.to_hex()[..2]);
        assert_eq!(fs::read_dir(&shard_dir).unwrap().count(), 1);
    }

    #[test]
    fn test_loose_objects_are_compressed_on_disk() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let content = vec![7u8; 64 * 1024];
        let hash = store.put(&content).unwrap();

        let hex = hash.to_hex();
        let on_disk = fs::read(dir.path().join("objects").join(&hex[..2]).join(&hex[2..])).unwrap();
        assert!(on_disk.len() < content.len());
        assert_eq!(store.get(hash).unwrap(), content);
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let absent = ContentHash::from_data(b"never stored");
        match store.get(absent) {
            Err(FoxError::ObjectNotFound(hash)) => assert_eq!(hash, absent),
            other => panic!("expected ObjectNotFound, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_legacy_flat_objects_are_read_uncompressed() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let content = b"flat legacy bytes";
        let hash = ContentHash::from_data(content);
        fs::write(dir.path().join("objects").join(hash.to_hex()), content).unwrap();

        assert!(store.contains(hash).unwrap());
        assert_eq!(store.get(hash).unwrap(), content);
    }

    #[test]
    fn test_put_skips_rewriting_legacy_flat_objects() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let content = b"flat legacy bytes";
        let hash = ContentHash::from_data(content);
        let flat = dir.path().join("objects").join(hash.to_hex());
        fs::write(&flat, content).unwrap();

        store.put(content).unwrap();
        let hex = hash.to_hex();
        assert!(!dir.path().join("objects").join(&hex[..2]).join(&hex[2..]).exists());
        assert!(flat.exists());
    }

    #[test]
    fn test_corrupt_loose_object_is_reported() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let hash = ContentHash::from_data(b"will corrupt");
        let hex = hash.to_hex();
        let shard_dir = dir.path().join("objects").join(&hex[..2]);
        fs::create_dir_all(&shard_dir).unwrap();
        fs::write(shard_dir.join(&hex[2..]), b"not zstd data").unwrap();

        match store.get(hash) {
            Err(FoxError::CorruptState(_)) => {}
            other => panic!("expected CorruptState, got {:?}", other.map(|_| ())),
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_get_put_roundtrip(content in proptest::collection::vec(any::<u8>(), 0..4096)) {
            let dir = TempDir::new().unwrap();
            let store = open_store(&dir);
            let hash = store.put(&content).unwrap();
            prop_assert_eq!(store.get(hash).unwrap(), content);
        }
    }
}
