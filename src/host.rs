mod filesystem;
mod github;
mod objects;
mod state;
mod traits;
mod types;

pub use filesystem::{FilesystemHost, Signature};
pub use github::{GitHubClient, GitHubSettings};
pub use traits::HostingApi;
pub use types::{
    BlobId, BranchTarget, CommitId, CommitInfo, FlatTree, InvalidRepoRef, NewRepository, RepoRef,
    TreeEntry, TreeId, TreeOverride, REGULAR_FILE_MODE,
};
