//! HTTP client for the remote repository service
//!
//! Speaks the JSON contract: create and list repositories, push one commit
//! at a time, pull commits after a cut point, and list remote history.
//! File payloads cross the wire as base64 of raw bytes inside each commit.
//! Historical shape drift in file entries is normalized here, at the
//! boundary, so nothing downstream branches on wire shapes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{FoxError, Result};
use crate::object::{Commit, ContentHash, FileEntry};

/// Timeout applied to every remote call
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Commit file entry as it appears on the wire
///
/// Two historical shapes: the canonical `{path, content_ref}` object
/// (field name `content` also accepted) and a bare base64 string.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireFileEntry {
    Entry(FileEntry),
    Bare(String),
}

impl WireFileEntry {
    /// Collapse to the canonical form; bare payloads get an empty path
    pub fn normalize(self) -> FileEntry {
        match self {
            WireFileEntry::Entry(entry) => entry,
            WireFileEntry::Bare(content_ref) => FileEntry {
                path: String::new(),
                content_ref,
            },
        }
    }
}

/// Commit file collection as it appears on the wire
///
/// Full commits key entries by hex hash; metadata-only listings collapse
/// the collection to a bare array of path strings. The array form carries
/// no payloads and normalizes to no entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireFiles {
    Map(BTreeMap<String, WireFileEntry>),
    List(Vec<String>),
}

impl Default for WireFiles {
    fn default() -> Self {
        WireFiles::Map(BTreeMap::new())
    }
}

impl WireFiles {
    /// True when neither shape carries an entry
    pub fn is_empty(&self) -> bool {
        match self {
            WireFiles::Map(map) => map.is_empty(),
            WireFiles::List(list) => list.is_empty(),
        }
    }
}

/// Commit as it crosses the wire
///
/// `files` arrives as a hash-keyed map on full commits and as a path
/// array on metadata-only listings; keys are validated during
/// normalization rather than at parse time, so one malformed entry cannot
/// fail a whole pull.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireCommit {
    pub id: String,
    pub message: String,
    pub author: String,
    pub timestamp: String,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub files: WireFiles,
}

impl WireCommit {
    /// Normalize into the local commit model, dropping malformed entries
    pub fn normalize(self) -> Commit {
        let mut files = BTreeMap::new();
        if let WireFiles::Map(entries) = self.files {
            for (key, value) in entries {
                match ContentHash::from_hex(&key) {
                    Ok(hash) => {
                        files.insert(hash, value.normalize());
                    }
                    Err(_) => {
                        warn!(commit = %self.id, key, "dropping file entry with malformed hash")
                    }
                }
            }
        }
        Commit {
            id: self.id,
            message: self.message,
            author: self.author,
            timestamp: self.timestamp,
            parent: self.parent,
            files,
        }
    }
}

impl From<&Commit> for WireCommit {
    fn from(commit: &Commit) -> Self {
        Self {
            id: commit.id.clone(),
            message: commit.message.clone(),
            author: commit.author.clone(),
            timestamp: commit.timestamp.clone(),
            parent: commit.parent.clone(),
            files: WireFiles::Map(
                commit
                    .files
                    .iter()
                    .map(|(hash, entry)| (hash.to_hex(), WireFileEntry::Entry(entry.clone())))
                    .collect(),
            ),
        }
    }
}

/// One repository as listed by the remote
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteRepo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Commits plus the remote head, as returned by pull
#[derive(Debug, Clone)]
pub struct PullBatch {
    /// Commits strictly after the cut point, oldest first
    pub commits: Vec<WireCommit>,
    /// Remote head after those commits, when the remote reports one
    pub head: Option<String>,
}

#[derive(Serialize)]
struct CreateRequest<'a> {
    username: &'a str,
    repo_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
}

#[derive(Serialize)]
struct PushRequest<'a> {
    commit: &'a WireCommit,
    archive: bool,
}

#[derive(Deserialize)]
struct CreateResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    repo_id: Option<String>,
}

#[derive(Deserialize)]
struct ListResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    repositories: Vec<RemoteRepo>,
}

#[derive(Deserialize)]
struct PushResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    commit_id: Option<String>,
}

#[derive(Deserialize)]
struct PullResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    commits: Vec<WireCommit>,
    #[serde(default)]
    head: Option<String>,
}

#[derive(Deserialize)]
struct CommitsResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    commits: Vec<WireCommit>,
}

/// Blocking HTTP client bound to one origin URL
pub struct RemoteClient {
    base_url: String,
    http: reqwest::blocking::Client,
}

impl RemoteClient {
    /// Create a client targeting `base_url` (e.g. `http://server:5000`)
    pub fn new(base_url: &str) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    /// Origin this client talks to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST /api/repository/create
    ///
    /// A name-already-exists refusal surfaces as [`FoxError::RemoteConflict`]
    /// so callers can fall back to adopting the existing repository.
    pub fn create_repository(
        &self,
        username: &str,
        repo_name: &str,
        description: Option<&str>,
    ) -> Result<String> {
        let url = format!("{}/api/repository/create", self.base_url);
        let resp = self
            .http
            .post(&url)
            .json(&CreateRequest {
                username,
                repo_name,
                description,
            })
            .send()?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let detail = extract_detail(&resp.text().unwrap_or_default());
            if detail.to_lowercase().contains("already exists") {
                return Err(FoxError::RemoteConflict(detail));
            }
            return Err(FoxError::RemoteRejected { status, detail });
        }

        let body: CreateResponse = resp.json()?;
        if !body.success {
            return Err(FoxError::RemoteRejected {
                status: 200,
                detail: "create reported failure".to_string(),
            });
        }
        body.repo_id.ok_or_else(|| FoxError::RemoteRejected {
            status: 200,
            detail: "create response missing repo_id".to_string(),
        })
    }

    /// GET /api/repository/list
    pub fn list_repositories(
        &self,
        username: &str,
        repo_name: Option<&str>,
    ) -> Result<Vec<RemoteRepo>> {
        let url = format!("{}/api/repository/list", self.base_url);
        let mut query = vec![("username", username)];
        if let Some(name) = repo_name {
            query.push(("repo_name", name));
        }
        let resp = self.http.get(&url).query(&query).send()?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let detail = extract_detail(&resp.text().unwrap_or_default());
            return Err(FoxError::RemoteRejected { status, detail });
        }

        let body: ListResponse = resp.json()?;
        if !body.success {
            return Err(FoxError::RemoteRejected {
                status: 200,
                detail: "list reported failure".to_string(),
            });
        }
        Ok(body.repositories)
    }

    /// POST /api/repository/{repo_id}/push
    ///
    /// Sends one commit with its inline payloads; returns the commit id
    /// the remote acknowledged.
    pub fn push_commit(&self, repo_id: &str, commit: &WireCommit, archive: bool) -> Result<String> {
        let url = format!("{}/api/repository/{}/push", self.base_url, repo_id);
        let resp = self
            .http
            .post(&url)
            .json(&PushRequest { commit, archive })
            .send()?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let detail = extract_detail(&resp.text().unwrap_or_default());
            return Err(FoxError::RemoteRejected { status, detail });
        }

        let body: PushResponse = resp.json()?;
        if !body.success {
            return Err(FoxError::RemoteRejected {
                status: 200,
                detail: format!("push of {} reported failure", commit.id),
            });
        }
        debug!(id = %commit.id, "commit accepted by remote");
        Ok(body.commit_id.unwrap_or_else(|| commit.id.clone()))
    }

    /// GET /api/repository/{repo_id}/pull
    ///
    /// Commits strictly after `since_commit` (all of them when `None`),
    /// oldest first; the cut point is resolved by the remote walking its
    /// own order.
    pub fn pull_commits(&self, repo_id: &str, since_commit: Option<&str>) -> Result<PullBatch> {
        let url = format!("{}/api/repository/{}/pull", self.base_url, repo_id);
        let mut request = self.http.get(&url);
        if let Some(since) = since_commit {
            request = request.query(&[("since_commit", since)]);
        }
        let resp = request.send()?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let detail = extract_detail(&resp.text().unwrap_or_default());
            return Err(FoxError::RemoteRejected { status, detail });
        }

        let body: PullResponse = resp.json()?;
        if !body.success {
            return Err(FoxError::RemoteRejected {
                status: 200,
                detail: "pull reported failure".to_string(),
            });
        }
        Ok(PullBatch {
            commits: body.commits,
            head: body.head,
        })
    }

    /// GET /api/repository/{repo_id}/commits
    ///
    /// Remote history most-recent-first; metadata-only unless `full`.
    pub fn list_commits(&self, repo_id: &str, full: bool) -> Result<Vec<WireCommit>> {
        let url = format!("{}/api/repository/{}/commits", self.base_url, repo_id);
        let resp = self
            .http
            .get(&url)
            .query(&[("full", if full { "true" } else { "false" })])
            .send()?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let detail = extract_detail(&resp.text().unwrap_or_default());
            return Err(FoxError::RemoteRejected { status, detail });
        }

        let body: CommitsResponse = resp.json()?;
        if !body.success {
            return Err(FoxError::RemoteRejected {
                status: 200,
                detail: "commits listing reported failure".to_string(),
            });
        }
        Ok(body.commits)
    }
}

/// Pull the human-readable detail out of an error body
///
/// The remote wraps refusals as `{"detail": "..."}`; anything else is
/// passed through as-is.
fn extract_detail(text: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        detail: String,
    }
    match serde_json::from_str::<ErrorBody>(text) {
        Ok(body) => body.detail,
        Err(_) => text.to_string(),
    }
}
