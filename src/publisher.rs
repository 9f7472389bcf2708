//! Atomic multi-file publish
//!
//! One publish turns a [`FileBatch`] into exactly one new commit on a branch:
//!
//! 1. read the branch tip (`base`)
//! 2. read `base`'s tree
//! 3. create one blob per file, concurrently
//! 4. create a tree: `base`'s tree with every file overlaid
//! 5. create a commit of that tree with `base` as its only parent
//! 6. move the branch from `base` to the new commit (fast-forward only)
//!
//! Steps 1-5 only create new, unreferenced objects. Nothing another reader
//! can see changes until step 6, and step 6 is a single host-side move.

mod blobs;

use std::{
    collections::{HashSet, VecDeque},
    fmt::Display,
    future::Future,
    sync::Arc,
    time::Duration,
};

use crate::{
    error::{HostError, PublishError, Stage},
    files::{FileBatch, FileChange},
    host::{BranchTarget, CommitId, HostingApi, RepoRef, TreeId, TreeOverride},
};

/// Tuning knobs for [`Publisher`]
#[derive(Debug, Clone)]
pub struct PublishOptions {
    /// Upper bound on blob uploads in flight at once
    pub max_concurrent_blobs: usize,
    /// Timeout applied to every individual host call
    pub call_timeout: Duration,
    /// How many times a transiently failed branch update is resumed
    pub pointer_update_retries: u32,
    /// Base delay between branch update attempts, multiplied by the attempt
    pub retry_backoff: Duration,
    /// Draw a progress bar while uploading blobs
    pub show_progress: bool,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            max_concurrent_blobs: 8,
            call_timeout: Duration::from_secs(30),
            pointer_update_retries: 2,
            retry_backoff: Duration::from_millis(500),
            show_progress: false,
        }
    }
}

/// Result of a successful publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOutcome {
    /// Branch tip the commit was built on
    pub base: CommitId,
    pub tree: TreeId,
    /// New branch tip
    pub commit: CommitId,
}

/// Commits inspected below a moved tip when looking for an applied update
const LANDED_SEARCH_LIMIT: usize = 64;

/// Publishes file batches onto branches of one hosting API
pub struct Publisher<H> {
    host: Arc<H>,
    options: PublishOptions,
}

/// Run one host call under a timeout
pub(crate) async fn with_timeout<T, F>(
    limit: Duration,
    what: impl Display,
    call: F,
) -> Result<T, HostError>
where
    F: Future<Output = Result<T, HostError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(HostError::Timeout(format!("{} after {:?}", what, limit))),
    }
}

fn pointer_error(
    target: &BranchTarget,
    base: &CommitId,
    commit: &CommitId,
    source: HostError,
) -> PublishError {
    match source {
        HostError::Conflict(_) => PublishError::Conflict {
            branch: target.branch.clone(),
            base: base.clone(),
            commit: commit.clone(),
        },
        source => PublishError::PointerUpdate {
            base: base.clone(),
            commit: commit.clone(),
            source,
        },
    }
}

impl<H: HostingApi + 'static> Publisher<H> {
    pub fn new(host: H) -> Self {
        Self::with_options(host, PublishOptions::default())
    }

    pub fn with_options(host: H, options: PublishOptions) -> Self {
        Self {
            host: Arc::new(host),
            options,
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn options(&self) -> &PublishOptions {
        &self.options
    }

    async fn step<T, F>(&self, stage: Stage, call: F) -> Result<T, PublishError>
    where
        F: Future<Output = Result<T, HostError>>,
    {
        with_timeout(self.options.call_timeout, stage, call)
            .await
            .map_err(PublishError::at(stage))
    }

    /// Validate `files` and publish them
    ///
    /// Invalid input is rejected before any host call is made.
    pub async fn publish_files(
        &self,
        target: &BranchTarget,
        files: Vec<FileChange>,
        message: &str,
    ) -> Result<PublishOutcome, PublishError> {
        let batch = FileBatch::new(files)?;
        self.publish(target, batch, message).await
    }

    /// Publish `batch` onto `target` as a single commit
    pub async fn publish(
        &self,
        target: &BranchTarget,
        batch: FileBatch,
        message: &str,
    ) -> Result<PublishOutcome, PublishError> {
        let repo = &target.repo;
        tracing::info!("Publishing {} file(s) to {}", batch.len(), target);

        let base = self
            .step(Stage::ReadBranch, self.host.branch_tip(target))
            .await?;
        tracing::debug!("{} is at {}", target, base);

        let base_commit = self
            .step(Stage::ReadCommit, self.host.commit(repo, &base))
            .await?;
        tracing::debug!("Base tree is {}", base_commit.tree);

        let blobs = blobs::create_blobs(Arc::clone(&self.host), repo, batch, &self.options)
            .await
            .map_err(PublishError::at(Stage::CreateBlobs))?;
        tracing::info!("Created {} blob(s)", blobs.len());

        let overrides: Vec<TreeOverride> = blobs
            .into_iter()
            .map(|(path, blob)| TreeOverride { path, blob })
            .collect();
        let tree = self
            .step(
                Stage::CreateTree,
                self.host.create_tree(repo, &base_commit.tree, &overrides),
            )
            .await?;

        let commit = self
            .step(
                Stage::CreateCommit,
                self.host
                    .create_commit(repo, message, &tree, std::slice::from_ref(&base)),
            )
            .await?;
        tracing::info!("Created commit {} (tree {})", commit, tree);

        self.advance(target, &base, &commit).await?;
        tracing::info!("{} moved from {} to {}", target, base, commit);

        Ok(PublishOutcome { base, tree, commit })
    }

    /// Step 6 with bounded resumption on transient failures
    async fn advance(
        &self,
        target: &BranchTarget,
        base: &CommitId,
        commit: &CommitId,
    ) -> Result<(), PublishError> {
        let mut result = with_timeout(
            self.options.call_timeout,
            Stage::UpdateBranch,
            self.host.update_branch(target, commit, false),
        )
        .await
        .map_err(|e| pointer_error(target, base, commit, e));

        for attempt in 1..=self.options.pointer_update_retries {
            match &result {
                Err(PublishError::PointerUpdate { source, .. }) if source.is_transient() => {
                    tracing::warn!(
                        "Branch update for {} failed ({}), resuming (attempt {}/{})",
                        target,
                        source,
                        attempt,
                        self.options.pointer_update_retries
                    );
                }
                _ => break,
            }
            tokio::time::sleep(self.options.retry_backoff * attempt).await;
            result = self.resume(target, base, commit).await;
        }

        result
    }

    /// Finish a branch update that failed or timed out
    ///
    /// Re-reads the tip first since the earlier move may have been applied:
    /// tip == `commit` means done, tip == `base` means the move is retried.
    /// Any other tip is searched for `commit`, which is there when the move
    /// landed and another writer built on top of it; otherwise it is a
    /// conflict.
    pub async fn resume(
        &self,
        target: &BranchTarget,
        base: &CommitId,
        commit: &CommitId,
    ) -> Result<(), PublishError> {
        let tip = with_timeout(
            self.options.call_timeout,
            "re-read branch tip",
            self.host.branch_tip(target),
        )
        .await
        .map_err(|e| pointer_error(target, base, commit, e))?;

        if &tip == commit {
            tracing::info!("{} already points at {}", target, commit);
            return Ok(());
        }
        if &tip != base {
            let landed = self
                .contains_commit(&target.repo, &tip, base, commit)
                .await
                .map_err(|e| pointer_error(target, base, commit, e))?;
            if landed {
                tracing::info!(
                    "{} already contains {} (tip is now {})",
                    target,
                    commit,
                    tip
                );
                return Ok(());
            }
            tracing::warn!(
                "{} moved to {} while publishing on top of {}",
                target,
                tip,
                base
            );
            return Err(pointer_error(
                target,
                base,
                commit,
                HostError::Conflict(format!("tip is {}", tip)),
            ));
        }

        with_timeout(
            self.options.call_timeout,
            Stage::UpdateBranch,
            self.host.update_branch(target, commit, false),
        )
        .await
        .map_err(|e| pointer_error(target, base, commit, e))
    }

    /// Whether `commit` is reachable from `tip` without passing `base`
    ///
    /// Gives up (returning false) after [`LANDED_SEARCH_LIMIT`] commits.
    async fn contains_commit(
        &self,
        repo: &RepoRef,
        tip: &CommitId,
        base: &CommitId,
        commit: &CommitId,
    ) -> Result<bool, HostError> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([tip.clone()]);

        while let Some(id) = queue.pop_front() {
            if &id == commit {
                return Ok(true);
            }
            if &id == base || !seen.insert(id.clone()) {
                continue;
            }
            if seen.len() > LANDED_SEARCH_LIMIT {
                tracing::debug!(
                    "Stopped looking for {} after {} commits",
                    commit,
                    LANDED_SEARCH_LIMIT
                );
                return Ok(false);
            }
            let info = with_timeout(
                self.options.call_timeout,
                format!("read commit {}", id),
                self.host.commit(repo, &id),
            )
            .await?;
            queue.extend(info.parents);
        }

        Ok(false)
    }
}
