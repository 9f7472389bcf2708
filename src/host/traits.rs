use async_trait::async_trait;

use super::types::{
    BlobId, BranchTarget, CommitId, CommitInfo, FlatTree, NewRepository, RepoRef, TreeId,
    TreeOverride,
};
use crate::{encoding::EncodedContent, error::HostError};

/// Capabilities of a version-control hosting API
///
/// Every method is an independent remote call with no transactional
/// guarantee across calls. Only [`HostingApi::update_branch`] mutates state
/// that other readers can observe.
#[async_trait]
pub trait HostingApi: Send + Sync {
    /// Read the commit a branch currently points to
    async fn branch_tip(&self, target: &BranchTarget) -> Result<CommitId, HostError>;

    /// Read a commit's tree and parents
    async fn commit(&self, repo: &RepoRef, id: &CommitId) -> Result<CommitInfo, HostError>;

    /// Store one blob. Blobs are content-addressed and unreferenced until a
    /// tree points at them.
    async fn create_blob(
        &self,
        repo: &RepoRef,
        content: &EncodedContent,
    ) -> Result<BlobId, HostError>;

    /// Create a tree equal to `base` with `overrides` laid on top.
    /// Paths not overridden are inherited from `base` unchanged.
    async fn create_tree(
        &self,
        repo: &RepoRef,
        base: &TreeId,
        overrides: &[TreeOverride],
    ) -> Result<TreeId, HostError>;

    async fn create_commit(
        &self,
        repo: &RepoRef,
        message: &str,
        tree: &TreeId,
        parents: &[CommitId],
    ) -> Result<CommitId, HostError>;

    /// Move a branch to `commit`.
    ///
    /// Without `force` the host must reject an update that is not a
    /// fast-forward with [`HostError::Conflict`].
    async fn update_branch(
        &self,
        target: &BranchTarget,
        commit: &CommitId,
        force: bool,
    ) -> Result<(), HostError>;

    /// List every file under a tree, recursively
    async fn read_tree(&self, repo: &RepoRef, tree: &TreeId) -> Result<FlatTree, HostError>;

    async fn read_blob(&self, repo: &RepoRef, blob: &BlobId) -> Result<EncodedContent, HostError>;

    /// Create a repository with one initial commit on its default branch.
    /// Fails with [`HostError::AlreadyExists`] if the name is taken.
    async fn create_repository(
        &self,
        repo: &RepoRef,
        options: &NewRepository,
    ) -> Result<(), HostError>;
}
