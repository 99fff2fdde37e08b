//! Repository configuration
//!
//! Identity, origin URL, and remote linkage for one working copy, persisted
//! as pretty-printed JSON and rewritten atomically.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{FoxError, Result};

/// Port assumed when an origin URL does not name one
pub const DEFAULT_ORIGIN_PORT: u16 = 5000;

/// Per-working-copy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoConfig {
    /// Owner identity used for remote calls and commit authorship fallback
    pub username: String,
    /// Logical repository name
    pub repo_name: String,
    /// Normalized origin URL of the remote service, if configured
    pub origin_url: Option<String>,
    /// Remote repository id, once linked by a successful create or adopt
    pub repo_id: Option<String>,
    /// Initialization time, RFC 3339
    pub created_at: String,
}

/// A repository's relation to its remote
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteState {
    /// No origin URL configured
    NoOrigin,
    /// Origin configured but no remote id adopted yet
    OriginSet { url: String },
    /// Origin configured and remote repository id known
    Linked { url: String, repo_id: String },
}

impl RepoConfig {
    /// Create a fresh configuration stamped with the current time
    pub fn new(username: String, repo_name: String) -> Self {
        Self {
            username,
            repo_name,
            origin_url: None,
            repo_id: None,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Load from disk, returning `None` when the file does not exist
    ///
    /// Unlike the index or commit log, a config that fails to parse is a
    /// hard error: without an identity no operation can proceed.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read_to_string(path)?;
        let config = serde_json::from_str(&data)
            .map_err(|e| FoxError::CorruptState(format!("config.json: {}", e)))?;
        Ok(Some(config))
    }

    /// Persist to disk atomically (write to a temp file, then rename)
    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_string_pretty(self)?;
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, &data)?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    }

    /// Current position in the remote state machine
    pub fn remote_state(&self) -> RemoteState {
        match (&self.origin_url, &self.repo_id) {
            (Some(url), Some(repo_id)) => RemoteState::Linked {
                url: url.clone(),
                repo_id: repo_id.clone(),
            },
            (Some(url), None) => RemoteState::OriginSet { url: url.clone() },
            (None, _) => RemoteState::NoOrigin,
        }
    }

    /// Origin URL or the configuration error callers expect
    pub fn require_origin(&self) -> Result<&str> {
        self.origin_url
            .as_deref()
            .ok_or(FoxError::NoOriginConfigured)
    }
}

/// Normalize a user-supplied origin URL
///
/// Prepends `http://` when no scheme is present and appends the default
/// port when the authority does not name one. Trailing slashes are dropped.
pub fn normalize_origin_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    let with_scheme = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    };

    let (scheme, rest) = match with_scheme.split_once("://") {
        Some((scheme, rest)) => (scheme, rest),
        None => ("http", with_scheme.as_str()),
    };
    let (authority, path) = match rest.split_once('/') {
        Some((authority, path)) => (authority, Some(path)),
        None => (rest, None),
    };

    let authority = if authority.contains(':') {
        authority.to_string()
    } else {
        format!("{}:{}", authority, DEFAULT_ORIGIN_PORT)
    };

    match path {
        Some(path) => format!("{}://{}/{}", scheme, authority, path),
        None => format!("{}://{}", scheme, authority),
    }
}
