//! FoxNest Client Core
//!
//! Local-first version control client library:
//! - Object model (content-hashed blobs, inline-payload commits)
//! - Content-addressable store (loose sharded, legacy flat, packed tiers)
//! - Working-tree index with two-tier change detection
//! - Staging area and append-only commit log with HEAD
//! - Packfile garbage collection over loose objects
//! - Push/pull sync against the remote repository service

pub mod commit_log;
pub mod config;
pub mod delta;
pub mod error;
pub mod index;
pub mod object;
pub mod packfile;
pub mod remote;
pub mod repository;
pub mod staging;
pub mod store;
pub mod sync;

pub use commit_log::CommitLog;
pub use config::{DEFAULT_ORIGIN_PORT, RemoteState, RepoConfig, normalize_origin_url};
pub use delta::{DeltaCache, DeltaEntry};
pub use error::{FoxError, Result};
pub use index::{ChangeKind, Index, IndexEntry, WorkingChange};
pub use object::{Commit, ContentHash, FileEntry, HASH_HEX_LEN};
pub use packfile::{PACK_THRESHOLD, PackManager, PackManifest, PackMode, PackSummary, StoreStats};
pub use remote::{PullBatch, RemoteClient, RemoteRepo, WireCommit, WireFileEntry, WireFiles};
pub use repository::{AddReport, Repository, StatusReport};
pub use staging::{StagedEntry, StagingArea};
pub use store::ObjectStore;
pub use sync::{PullReport, PushReport, SyncClient};
