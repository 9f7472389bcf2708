//! Subcommands of the git-publish binary

pub mod init;
pub mod publish;
pub mod resume;
pub mod tree;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Args;
use git_publish::{
    config::PublishConfig,
    encoding::EncodedContent,
    host::{
        BlobId, BranchTarget, CommitId, CommitInfo, FilesystemHost, FlatTree, GitHubClient,
        HostingApi, NewRepository, RepoRef, TreeId, TreeOverride,
    },
    FileBatch, FileChange, HostError,
};

/// The hosting backend selected on the command line
pub enum Host {
    GitHub(GitHubClient),
    Local(FilesystemHost),
}

impl Host {
    pub fn from_config(config: &PublishConfig, local: bool) -> Result<Self> {
        if local {
            std::fs::create_dir_all(&config.store_dir).with_context(|| {
                format!("Failed to create store directory: {:?}", config.store_dir)
            })?;
            tracing::info!("Using local store: {:?}", config.store_dir);
            return Ok(Host::Local(FilesystemHost::with_author(
                &config.store_dir,
                config.signature(),
            )));
        }

        if config.token.is_none() {
            tracing::warn!("GITHUB_TOKEN is not set; requests are unauthenticated");
        }
        let client = GitHubClient::new(&config.github_settings())
            .context("Failed to create GitHub client")?;
        Ok(Host::GitHub(client))
    }
}

// Delegate HostingApi to the selected backend
#[async_trait]
impl HostingApi for Host {
    async fn branch_tip(&self, target: &BranchTarget) -> Result<CommitId, HostError> {
        match self {
            Host::GitHub(h) => h.branch_tip(target).await,
            Host::Local(h) => h.branch_tip(target).await,
        }
    }

    async fn commit(&self, repo: &RepoRef, id: &CommitId) -> Result<CommitInfo, HostError> {
        match self {
            Host::GitHub(h) => h.commit(repo, id).await,
            Host::Local(h) => h.commit(repo, id).await,
        }
    }

    async fn create_blob(
        &self,
        repo: &RepoRef,
        content: &EncodedContent,
    ) -> Result<BlobId, HostError> {
        match self {
            Host::GitHub(h) => h.create_blob(repo, content).await,
            Host::Local(h) => h.create_blob(repo, content).await,
        }
    }

    async fn create_tree(
        &self,
        repo: &RepoRef,
        base: &TreeId,
        overrides: &[TreeOverride],
    ) -> Result<TreeId, HostError> {
        match self {
            Host::GitHub(h) => h.create_tree(repo, base, overrides).await,
            Host::Local(h) => h.create_tree(repo, base, overrides).await,
        }
    }

    async fn create_commit(
        &self,
        repo: &RepoRef,
        message: &str,
        tree: &TreeId,
        parents: &[CommitId],
    ) -> Result<CommitId, HostError> {
        match self {
            Host::GitHub(h) => h.create_commit(repo, message, tree, parents).await,
            Host::Local(h) => h.create_commit(repo, message, tree, parents).await,
        }
    }

    async fn update_branch(
        &self,
        target: &BranchTarget,
        commit: &CommitId,
        force: bool,
    ) -> Result<(), HostError> {
        match self {
            Host::GitHub(h) => h.update_branch(target, commit, force).await,
            Host::Local(h) => h.update_branch(target, commit, force).await,
        }
    }

    async fn read_tree(&self, repo: &RepoRef, tree: &TreeId) -> Result<FlatTree, HostError> {
        match self {
            Host::GitHub(h) => h.read_tree(repo, tree).await,
            Host::Local(h) => h.read_tree(repo, tree).await,
        }
    }

    async fn read_blob(&self, repo: &RepoRef, blob: &BlobId) -> Result<EncodedContent, HostError> {
        match self {
            Host::GitHub(h) => h.read_blob(repo, blob).await,
            Host::Local(h) => h.read_blob(repo, blob).await,
        }
    }

    async fn create_repository(
        &self,
        repo: &RepoRef,
        options: &NewRepository,
    ) -> Result<(), HostError> {
        match self {
            Host::GitHub(h) => h.create_repository(repo, options).await,
            Host::Local(h) => h.create_repository(repo, options).await,
        }
    }
}

/// Where the files of a batch come from
#[derive(Debug, Args)]
pub struct FileSource {
    /// Publish every file under this directory (.git is skipped)
    #[arg(long)]
    pub dir: Option<PathBuf>,

    /// Place all files under this repository directory
    #[arg(long)]
    pub prefix: Option<String>,

    /// Individual files, published at their relative path
    pub files: Vec<PathBuf>,
}

impl FileSource {
    pub fn load(&self) -> Result<FileBatch> {
        let mut found = Vec::new();
        if let Some(dir) = &self.dir {
            walk(dir, dir, &mut found)?;
        }
        for file in &self.files {
            found.push((file.clone(), repo_path(file)?));
        }

        let mut changes = Vec::with_capacity(found.len());
        for (disk_path, rel) in found {
            let path = match &self.prefix {
                Some(prefix) => format!("{}/{}", prefix.trim_matches('/'), rel),
                None => rel,
            };
            let bytes = std::fs::read(&disk_path)
                .with_context(|| format!("Failed to read {:?}", disk_path))?;
            changes.push(FileChange::from_bytes(path, bytes)?);
        }

        Ok(FileBatch::new(changes)?)
    }
}

/// Repository path for a relative file path, with '/' separators
fn repo_path(rel: &Path) -> Result<String> {
    let parts: Vec<&str> = rel
        .components()
        .map(|c| {
            c.as_os_str()
                .to_str()
                .with_context(|| format!("Path is not valid UTF-8: {:?}", rel))
        })
        .collect::<Result<_>>()?;
    Ok(parts.join("/"))
}

fn walk(root: &Path, dir: &Path, out: &mut Vec<(PathBuf, String)>) -> Result<()> {
    let mut entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory {:?}", dir))?
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            if entry.file_name() != ".git" {
                walk(root, &path, out)?;
            }
        } else {
            let rel = path.strip_prefix(root).unwrap_or(&path);
            out.push((path.clone(), repo_path(rel)?));
        }
    }
    Ok(())
}
