//! Publish a batch of files to a branch as one atomic commit
//!
//! The [`Publisher`] drives a hosting provider's git data API through a fixed
//! sequence of calls: resolve the branch, build blobs, a tree and a commit,
//! then fast-forward the branch. The branch is the only shared state touched,
//! and only in the last step.
#![deny(clippy::mod_module_files)]

pub mod config;
pub mod encoding;
pub mod error;
pub mod files;
pub mod host;
pub mod publisher;
pub mod repository;

pub use error::{HostError, PublishError, Stage};
pub use files::{BatchError, FileBatch, FileChange};
pub use host::{BranchTarget, CommitId, FilesystemHost, GitHubClient, HostingApi, RepoRef};
pub use publisher::{PublishOptions, PublishOutcome, Publisher};
