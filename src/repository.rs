//! Create-or-reuse a repository, then publish into it

use std::time::Duration;

use thiserror::Error;

use crate::{
    error::{HostError, PublishError},
    files::FileBatch,
    host::{BranchTarget, HostingApi, NewRepository, RepoRef},
    publisher::{PublishOutcome, Publisher},
};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("repository {0} already exists and reuse is disabled")]
    AlreadyExists(RepoRef),

    #[error("could not create repository {repo}: {source}")]
    Create {
        repo: RepoRef,
        #[source]
        source: HostError,
    },

    #[error("branch {target} is not available after creating the repository: {source}")]
    BranchNotReady {
        target: BranchTarget,
        #[source]
        source: HostError,
    },

    #[error(transparent)]
    Publish(#[from] PublishError),
}

/// Whether [`ensure_repository`] created the repository or found it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoCreation {
    Created,
    Reused,
}

#[derive(Debug, Clone)]
pub struct RepositoryOptions {
    pub private: bool,
    pub description: Option<String>,
    /// Treat an existing repository as success instead of an error
    pub reuse_existing: bool,
    /// Polls for the default branch after creation; hosts create the
    /// initial commit asynchronously
    pub branch_wait_attempts: u32,
    pub branch_wait_delay: Duration,
}

impl Default for RepositoryOptions {
    fn default() -> Self {
        Self {
            private: true,
            description: None,
            reuse_existing: true,
            branch_wait_attempts: 5,
            branch_wait_delay: Duration::from_secs(1),
        }
    }
}

/// Create `repo`, or reuse it if it already exists and reuse is allowed
pub async fn ensure_repository<H: HostingApi + ?Sized>(
    host: &H,
    repo: &RepoRef,
    default_branch: &str,
    options: &RepositoryOptions,
) -> Result<RepoCreation, RepositoryError> {
    let new_repo = NewRepository {
        default_branch: default_branch.to_string(),
        private: options.private,
        description: options.description.clone(),
    };

    match host.create_repository(repo, &new_repo).await {
        Ok(()) => {
            tracing::info!("Created repository {}", repo);
            Ok(RepoCreation::Created)
        }
        Err(HostError::AlreadyExists(_)) if options.reuse_existing => {
            // An existing name can also belong to someone else; a later
            // permission failure will surface from the publish itself.
            tracing::warn!("Repository {} already exists, reusing it", repo);
            Ok(RepoCreation::Reused)
        }
        Err(HostError::AlreadyExists(_)) => Err(RepositoryError::AlreadyExists(repo.clone())),
        Err(source) => Err(RepositoryError::Create {
            repo: repo.clone(),
            source,
        }),
    }
}

/// Errors a freshly created repository gives until its first commit exists
///
/// GitHub answers 409 "Git Repository is empty" on its git data endpoints
/// while `auto_init` is still running.
fn branch_pending(err: &HostError) -> bool {
    matches!(
        err,
        HostError::NotFound(_) | HostError::Api { status: 409, .. }
    )
}

async fn wait_for_branch<H: HostingApi + ?Sized>(
    host: &H,
    target: &BranchTarget,
    options: &RepositoryOptions,
) -> Result<(), RepositoryError> {
    let mut attempt = 1;
    loop {
        match host.branch_tip(target).await {
            Ok(_) => return Ok(()),
            Err(e) if branch_pending(&e) && attempt < options.branch_wait_attempts => {
                tracing::debug!(
                    "Waiting for {} to appear ({}; attempt {}/{})",
                    target,
                    e,
                    attempt,
                    options.branch_wait_attempts
                );
                tokio::time::sleep(options.branch_wait_delay).await;
                attempt += 1;
            }
            Err(source) => {
                return Err(RepositoryError::BranchNotReady {
                    target: target.clone(),
                    source,
                })
            }
        }
    }
}

/// Ensure the repository exists, then publish `batch` onto `target`
pub async fn initialize_and_publish<H: HostingApi + 'static>(
    publisher: &Publisher<H>,
    target: &BranchTarget,
    batch: FileBatch,
    message: &str,
    options: &RepositoryOptions,
) -> Result<(RepoCreation, PublishOutcome), RepositoryError> {
    let creation =
        ensure_repository(publisher.host(), &target.repo, &target.branch, options).await?;
    if creation == RepoCreation::Created {
        wait_for_branch(publisher.host(), target, options).await?;
    }

    let outcome = publisher.publish(target, batch, message).await?;
    Ok((creation, outcome))
}
