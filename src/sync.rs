//! Push/pull orchestration against the remote repository service
//!
//! Owns the create-or-adopt handshake that links a working copy to its
//! remote, the missing-commit push walk, and the incremental pull that
//! appends remote commits behind the local HEAD. Network calls run
//! outside the repository lock; only the local-state updates that follow
//! them take it.

use std::collections::BTreeSet;
use tracing::{debug, info};

use crate::config::RepoConfig;
use crate::error::{FoxError, Result};
use crate::object::Commit;
use crate::remote::{RemoteClient, WireCommit};
use crate::repository::Repository;

/// Outcome of a push
#[derive(Debug, Clone)]
pub struct PushReport {
    /// Remote repository id the push targeted
    pub repo_id: String,
    /// Ids of commits the remote accepted this run, oldest first
    pub pushed: Vec<String>,
    /// True when the remote already had every local commit
    pub up_to_date: bool,
}

/// Outcome of a pull
#[derive(Debug, Clone)]
pub struct PullReport {
    /// Remote repository id the pull targeted
    pub repo_id: String,
    /// Commits appended to the local log
    pub commits: usize,
    /// Payload objects written to the store
    pub objects: usize,
    /// HEAD after the pull
    pub head: Option<String>,
}

/// Sync driver bound to one repository and its configured origin
pub struct SyncClient<'a> {
    repo: &'a Repository,
    remote: RemoteClient,
}

impl<'a> SyncClient<'a> {
    /// Bind to the repository's configured origin
    pub fn new(repo: &'a Repository) -> Result<Self> {
        let config = repo.config()?;
        let origin = config.require_origin()?;
        let remote = RemoteClient::new(origin)?;
        Ok(Self { repo, remote })
    }

    /// Make sure a remote repository backs this working copy
    ///
    /// Creates one under the configured owner and name; when that name is
    /// already taken, adopts the existing repository instead, replacing
    /// local history with the remote's (the adopted side wins). Returns
    /// the remote id, which is also persisted in the config.
    pub fn ensure_remote_repository(&self, description: Option<&str>) -> Result<String> {
        let mut config = self.repo.config()?;
        if let Some(repo_id) = &config.repo_id {
            return Ok(repo_id.clone());
        }

        match self
            .remote
            .create_repository(&config.username, &config.repo_name, description)
        {
            Ok(repo_id) => {
                let _lock = self.repo.lock_exclusive()?;
                config.repo_id = Some(repo_id.clone());
                self.repo.save_config(&config)?;
                info!(repo_id = %repo_id, "remote repository created");
                Ok(repo_id)
            }
            Err(FoxError::RemoteConflict(detail)) => {
                debug!(detail = %detail, "remote name taken, adopting existing repository");
                self.adopt_existing(&mut config)
            }
            Err(e) => Err(e),
        }
    }

    /// Send local commits the remote does not have yet, oldest first
    ///
    /// Not atomic: a mid-run failure leaves the already-sent prefix
    /// accepted remotely and surfaces as [`FoxError::PushIncomplete`]
    /// carrying those ids. A retry resumes where the failure cut in,
    /// because the pre-push existence check filters them out.
    pub fn push(&self, archive: bool) -> Result<PushReport> {
        let repo_id = self.ensure_remote_repository(None)?;
        let local = self.repo.commit_log().load()?;
        let remote_ids: BTreeSet<String> = self
            .remote
            .list_commits(&repo_id, false)?
            .into_iter()
            .map(|c| c.id)
            .collect();

        let missing: Vec<&Commit> = local
            .iter()
            .filter(|c| !remote_ids.contains(&c.id))
            .collect();
        if missing.is_empty() {
            info!(repo_id = %repo_id, "remote already has every local commit");
            return Ok(PushReport {
                repo_id,
                pushed: Vec::new(),
                up_to_date: true,
            });
        }

        let mut pushed = Vec::new();
        for commit in missing {
            let wire = WireCommit::from(commit);
            match self.remote.push_commit(&repo_id, &wire, archive) {
                Ok(id) => pushed.push(id),
                Err(e) => {
                    return Err(FoxError::PushIncomplete {
                        sent: pushed,
                        source: Box::new(e),
                    });
                }
            }
        }
        info!(repo_id = %repo_id, commits = pushed.len(), "push complete");
        Ok(PushReport {
            repo_id,
            pushed,
            up_to_date: false,
        })
    }

    /// Fetch and append commits the remote has behind our HEAD
    ///
    /// The remote decides the cut point by walking its own order; commits
    /// arrive oldest-first so plain appends preserve the chain. HEAD moves
    /// only when the response names a new one. An empty response leaves
    /// local state untouched.
    pub fn pull(&self) -> Result<PullReport> {
        let repo_id = self.ensure_remote_repository(None)?;
        let head = self.repo.commit_log().head()?;
        let batch = self.remote.pull_commits(&repo_id, head.as_deref())?;

        if batch.commits.is_empty() {
            debug!(repo_id = %repo_id, "already up to date");
            return Ok(PullReport {
                repo_id,
                commits: 0,
                objects: 0,
                head,
            });
        }

        let _lock = self.repo.lock_exclusive()?;
        let mut objects = 0;
        let mut applied = 0;
        for wire in batch.commits {
            let commit = wire.normalize();
            objects += self.store_payloads(&commit)?;
            self.repo.commit_log().append(&commit)?;
            applied += 1;
        }
        if let Some(new_head) = &batch.head {
            self.repo.commit_log().set_head(new_head)?;
        }
        info!(repo_id = %repo_id, commits = applied, objects, "pull complete");
        Ok(PullReport {
            repo_id,
            commits: applied,
            objects,
            head: batch.head.or(head),
        })
    }

    /// Adopt the remote repository that already owns our name
    ///
    /// Replays the full remote history into the local store and log,
    /// aligns HEAD, the working tree, and the index to the remote tip,
    /// and links the config to the adopted id. Local unpushed commits are
    /// superseded; their objects stay in the store.
    fn adopt_existing(&self, config: &mut RepoConfig) -> Result<String> {
        let repos = self
            .remote
            .list_repositories(&config.username, Some(&config.repo_name))?;
        let adopted = repos
            .iter()
            .find(|r| r.name == config.repo_name)
            .or_else(|| repos.first())
            .ok_or_else(|| FoxError::RemoteRejected {
                status: 200,
                detail: format!(
                    "{}/{} reported as existing but absent from listing",
                    config.username, config.repo_name
                ),
            })?;
        let repo_id = adopted.id.clone();

        // Wire order is most-recent-first; the local log is oldest-first.
        let mut commits: Vec<Commit> = self
            .remote
            .list_commits(&repo_id, true)?
            .into_iter()
            .map(WireCommit::normalize)
            .collect();
        commits.reverse();

        let _lock = self.repo.lock_exclusive()?;
        let mut objects = 0;
        for commit in &commits {
            objects += self.store_payloads(commit)?;
        }
        self.repo.commit_log().replace_all(&commits)?;
        if let Some(tip) = commits.last() {
            self.repo.commit_log().set_head(&tip.id)?;
            let extracted = self.repo.extract_commit(tip)?;
            self.repo.rebuild_index(tip)?;
            debug!(tip = %tip.id, extracted, "working tree aligned to adopted tip");
        }
        config.repo_id = Some(repo_id.clone());
        self.repo.save_config(config)?;
        info!(
            repo_id = %repo_id,
            commits = commits.len(),
            objects,
            "adopted existing remote repository"
        );
        Ok(repo_id)
    }

    /// Decode one commit's inline payloads into the object store
    fn store_payloads(&self, commit: &Commit) -> Result<usize> {
        let mut stored = 0;
        for entry in commit.files.values() {
            let content = entry.decode_content().map_err(|e| {
                FoxError::CorruptState(format!(
                    "commit {} file {}: {}",
                    commit.id, entry.path, e
                ))
            })?;
            self.repo.store().put(&content)?;
            stored += 1;
        }
        Ok(stored)
    }
}

impl Repository {
    /// Push local commits to the configured origin
    pub fn push(&self, archive: bool) -> Result<PushReport> {
        SyncClient::new(self)?.push(archive)
    }

    /// Pull new commits from the configured origin
    pub fn pull(&self) -> Result<PullReport> {
        SyncClient::new(self)?.pull()
    }
}
