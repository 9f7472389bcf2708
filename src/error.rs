use std::fmt;

use thiserror::Error;

use crate::files::BatchError;
use crate::host::CommitId;

/// Failure reported by a hosting provider call
#[derive(Debug, Error)]
pub enum HostError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("non-fast-forward update rejected: {0}")]
    Conflict(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("malformed response: {0}")]
    Decode(String),

    #[error("rejected: {0}")]
    Rejected(String),

    #[error("task aborted: {0}")]
    Aborted(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HostError {
    /// Whether the same call may succeed if simply issued again
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            HostError::Timeout(_) | HostError::Transport(_) | HostError::Server { .. }
        )
    }
}

/// The steps of one publish, in protocol order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    ReadBranch,
    ReadCommit,
    CreateBlobs,
    CreateTree,
    CreateCommit,
    UpdateBranch,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::ReadBranch,
        Stage::ReadCommit,
        Stage::CreateBlobs,
        Stage::CreateTree,
        Stage::CreateCommit,
        Stage::UpdateBranch,
    ];
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::ReadBranch => "read-branch",
            Stage::ReadCommit => "read-commit",
            Stage::CreateBlobs => "create-blobs",
            Stage::CreateTree => "create-tree",
            Stage::CreateCommit => "create-commit",
            Stage::UpdateBranch => "update-branch",
        };
        f.write_str(name)
    }
}

/// Failure of a publish, tagged with the stage that failed
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("invalid file batch: {0}")]
    InvalidInput(#[from] BatchError),

    /// A step before the branch update failed; the branch is untouched
    #[error("{stage} failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: HostError,
    },

    /// The branch moved away from `base` while the commit was being built
    #[error("branch '{branch}' moved away from {base}; commit {commit} was not published")]
    Conflict {
        branch: String,
        base: CommitId,
        commit: CommitId,
    },

    /// The branch update failed for a reason other than a conflict.
    /// `commit` is fully built and can be resumed.
    #[error("update-branch failed for commit {commit} (base {base}): {source}")]
    PointerUpdate {
        base: CommitId,
        commit: CommitId,
        #[source]
        source: HostError,
    },
}

impl PublishError {
    pub(crate) fn at(stage: Stage) -> impl FnOnce(HostError) -> PublishError {
        move |source| PublishError::Stage { stage, source }
    }

    /// The stage that failed, or `None` for input validation errors
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PublishError::InvalidInput(_) => None,
            PublishError::Stage { stage, .. } => Some(*stage),
            PublishError::Conflict { .. } | PublishError::PointerUpdate { .. } => {
                Some(Stage::UpdateBranch)
            }
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, PublishError::Conflict { .. })
    }

    /// Whether re-running the whole publish from scratch is safe and may help
    ///
    /// A failed branch update is never retry-safe this way: the pointer may
    /// already have moved, so it has to be resumed instead.
    pub fn is_retry_safe(&self) -> bool {
        match self {
            PublishError::Stage { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    /// The commit that was built but not confirmed on the branch, if any
    pub fn built_commit(&self) -> Option<&CommitId> {
        match self {
            PublishError::Conflict { commit, .. } | PublishError::PointerUpdate { commit, .. } => {
                Some(commit)
            }
            _ => None,
        }
    }
}
