//! Error taxonomy for the FoxNest client core
//!
//! Every fallible operation in the crate returns [`Result`]. Variants
//! distinguish retryable failures (network) from configuration problems
//! (missing origin, remote conflict) and from corrupt local state.

use std::path::PathBuf;

use crate::object::ContentHash;

/// Result type for all FoxNest operations
pub type Result<T> = std::result::Result<T, FoxError>;

/// Errors that can occur while operating on a FoxNest working copy
#[derive(Debug, thiserror::Error)]
pub enum FoxError {
    #[error("not a FoxNest repository: {}", .0.display())]
    NotARepository(PathBuf),

    #[error("repository already initialized: {}", .0.display())]
    RepositoryExists(PathBuf),

    #[error("no origin configured for this repository")]
    NoOriginConfigured,

    #[error("nothing staged for commit")]
    EmptyCommit,

    #[error("object not found: {0}")]
    ObjectNotFound(ContentHash),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("remote conflict: {0}")]
    RemoteConflict(String),

    #[error("remote rejected request ({status}): {detail}")]
    RemoteRejected { status: u16, detail: String },

    #[error("corrupt state: {0}")]
    CorruptState(String),

    #[error("push interrupted after {} accepted commit(s)", .sent.len())]
    PushIncomplete {
        /// Ids of the commits the remote accepted before the failure.
        sent: Vec<String>,
        #[source]
        source: Box<FoxError>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FoxError {
    /// True for failures worth retrying without any local change.
    ///
    /// Transport faults (timeouts, refused connections) qualify; a body
    /// that fails to decode is a contract mismatch and does not.
    pub fn is_retryable(&self) -> bool {
        match self {
            FoxError::Network(e) => !e.is_decode(),
            _ => false,
        }
    }
}
