//! Object model for the FoxNest client core
//!
//! Blobs are addressed by a truncated SHA-256 digest. Commits form a linear
//! parent-linked chain and carry their file payloads inline, so a commit can
//! cross the wire or rebuild a working tree without consulting the store.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Number of hex characters in a content hash
pub const HASH_HEX_LEN: usize = 16;

/// Content address of a stored blob
///
/// The first 8 bytes of the SHA-256 digest of the raw content, rendered as
/// 16 lowercase hex characters. Equal hashes are treated as equal content;
/// the store never re-verifies bytes on write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash([u8; 8]);

impl ContentHash {
    /// Compute the hash of raw content
    pub fn from_data(data: &[u8]) -> Self {
        let digest = Sha256::digest(data);
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        Self(bytes)
    }

    /// Convert to the 16-character hex form
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from the 16-character hex form
    pub fn from_hex(hex_str: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(hex_str)?;
        if bytes.len() != 8 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 8];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl TryFrom<String> for ContentHash {
    type Error = hex::FromHexError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.to_hex()
    }
}

/// One file carried by a commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Working-tree path, `/`-separated, relative to the repository root.
    /// Empty for entries recovered from legacy bare payloads.
    pub path: String,
    /// Base64 of the blob's raw (uncompressed) bytes. Older producers used
    /// the field name `content`.
    #[serde(alias = "content")]
    pub content_ref: String,
}

impl FileEntry {
    /// Create an entry from a path and raw bytes
    pub fn from_bytes(path: String, data: &[u8]) -> Self {
        Self {
            path,
            content_ref: BASE64.encode(data),
        }
    }

    /// Decode the inline payload back to raw bytes
    pub fn decode_content(&self) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64.decode(&self.content_ref)
    }
}

/// One entry in the commit chain
///
/// Immutable once appended. `files` maps each blob's content hash to its
/// path and inline payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commit {
    /// Commit identifier: 16 hex chars of sha256(message ++ timestamp).
    /// Derived from metadata, not content; two commits with identical
    /// message and timestamp would collide, which is accepted.
    pub id: String,
    /// Commit message
    pub message: String,
    /// Author name
    pub author: String,
    /// Creation time, RFC 3339
    pub timestamp: String,
    /// Parent commit id (none for the initial commit)
    pub parent: Option<String>,
    /// Files captured by this commit, keyed by content hash
    pub files: BTreeMap<ContentHash, FileEntry>,
}

impl Commit {
    /// Build a commit stamped with the current time
    pub fn new(
        message: String,
        author: String,
        parent: Option<String>,
        files: BTreeMap<ContentHash, FileEntry>,
    ) -> Self {
        let timestamp = chrono::Utc::now().to_rfc3339();
        let id = derive_commit_id(&message, &timestamp);
        Self {
            id,
            message,
            author,
            timestamp,
            parent,
            files,
        }
    }

    /// Check if this is the initial commit (no parent)
    pub fn is_initial(&self) -> bool {
        self.parent.is_none()
    }
}

/// Derive a commit id from its message and timestamp
pub fn derive_commit_id(message: &str, timestamp: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(message.as_bytes());
    hasher.update(timestamp.as_bytes());
    hex::encode(hasher.finalize())[..HASH_HEX_LEN].to_string()
}
