//! Test doubles wrapping the filesystem host
#![allow(dead_code)]

use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use git_publish::{
    encoding::EncodedContent,
    host::{
        BlobId, BranchTarget, CommitId, CommitInfo, FilesystemHost, FlatTree, HostingApi,
        NewRepository, RepoRef, TreeId, TreeOverride,
    },
    FileChange, HostError, PublishOptions, Publisher, Stage,
};

/// How a branch update misbehaves
#[derive(Debug, Clone, Copy)]
pub enum UpdateFault {
    /// Fail with a transient error without moving the branch
    Transient,
    /// Move the branch, then report a timeout anyway
    ApplyThenTimeout,
    /// Move the branch, let another writer commit `follow-up.txt` on top,
    /// then report a timeout
    ApplyThenBuiltOnThenTimeout,
    Unauthorized,
}

/// Filesystem host with fault injection and a call log
pub struct TestHost {
    pub inner: FilesystemHost,
    log: Mutex<Vec<String>>,
    fail_at: Mutex<Option<Stage>>,
    fail_blob_content: Mutex<Option<String>>,
    blob_delays: Mutex<HashMap<String, Duration>>,
    update_faults: Mutex<VecDeque<UpdateFault>>,
    racer: Mutex<Option<(BranchTarget, Vec<FileChange>)>>,
    empty_answers: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl TestHost {
    pub fn new(root: &Path) -> Self {
        Self {
            inner: FilesystemHost::new(root),
            log: Mutex::new(Vec::new()),
            fail_at: Mutex::new(None),
            fail_blob_content: Mutex::new(None),
            blob_delays: Mutex::new(HashMap::new()),
            update_faults: Mutex::new(VecDeque::new()),
            racer: Mutex::new(None),
            empty_answers: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn fail_at(&self, stage: Option<Stage>) {
        *self.fail_at.lock().unwrap() = stage;
    }

    pub fn fail_blob_with_content(&self, content: &str) {
        *self.fail_blob_content.lock().unwrap() = Some(content.to_string());
    }

    pub fn delay_blob(&self, content: &str, delay: Duration) {
        self.blob_delays
            .lock()
            .unwrap()
            .insert(content.to_string(), delay);
    }

    pub fn push_update_fault(&self, fault: UpdateFault) {
        self.update_faults.lock().unwrap().push_back(fault);
    }

    pub fn clear_update_faults(&self) {
        self.update_faults.lock().unwrap().clear();
    }

    /// Publish `files` from another writer right before the next branch update
    pub fn race_next_update(&self, target: &BranchTarget, files: Vec<FileChange>) {
        *self.racer.lock().unwrap() = Some((target.clone(), files));
    }

    /// Answer the next `count` branch reads like a repository with no commits
    pub fn answer_empty_repository(&self, count: usize) {
        self.empty_answers.store(count, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == call).count()
    }

    pub fn clear_calls(&self) {
        self.log.lock().unwrap().clear();
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn record(&self, call: &str) {
        self.log.lock().unwrap().push(call.to_string());
    }

    fn check(&self, stage: Stage) -> Result<(), HostError> {
        if *self.fail_at.lock().unwrap() == Some(stage) {
            return Err(HostError::Server {
                status: 500,
                message: format!("injected failure at {}", stage),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl HostingApi for TestHost {
    async fn branch_tip(&self, target: &BranchTarget) -> Result<CommitId, HostError> {
        self.record("branch_tip");
        self.check(Stage::ReadBranch)?;
        let empty = self
            .empty_answers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if empty {
            return Err(HostError::Api {
                status: 409,
                message: format!("branch {}: Git Repository is empty.", target),
            });
        }
        self.inner.branch_tip(target).await
    }

    async fn commit(&self, repo: &RepoRef, id: &CommitId) -> Result<CommitInfo, HostError> {
        self.record("commit");
        self.check(Stage::ReadCommit)?;
        self.inner.commit(repo, id).await
    }

    async fn create_blob(
        &self,
        repo: &RepoRef,
        content: &EncodedContent,
    ) -> Result<BlobId, HostError> {
        self.record("blob:start");
        self.check(Stage::CreateBlobs)?;
        let text = content.decode().unwrap_or_default();
        if self.fail_blob_content.lock().unwrap().as_deref() == Some(text.as_str()) {
            return Err(HostError::Transport("injected blob failure".into()));
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let delay = self.blob_delays.lock().unwrap().get(&text).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let result = self.inner.create_blob(repo, content).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.record(&format!("blob:done:{}", text));
        result
    }

    async fn create_tree(
        &self,
        repo: &RepoRef,
        base: &TreeId,
        overrides: &[TreeOverride],
    ) -> Result<TreeId, HostError> {
        self.record("tree");
        self.check(Stage::CreateTree)?;
        self.inner.create_tree(repo, base, overrides).await
    }

    async fn create_commit(
        &self,
        repo: &RepoRef,
        message: &str,
        tree: &TreeId,
        parents: &[CommitId],
    ) -> Result<CommitId, HostError> {
        self.record("create_commit");
        self.check(Stage::CreateCommit)?;
        self.inner.create_commit(repo, message, tree, parents).await
    }

    async fn update_branch(
        &self,
        target: &BranchTarget,
        commit: &CommitId,
        force: bool,
    ) -> Result<(), HostError> {
        self.record("update_branch");
        self.check(Stage::UpdateBranch)?;

        let racer = self.racer.lock().unwrap().take();
        if let Some((race_target, files)) = racer {
            let other = Publisher::new(self.inner.clone());
            other
                .publish_files(&race_target, files, "concurrent writer")
                .await
                .map_err(|e| HostError::Rejected(e.to_string()))?;
        }

        let fault = self.update_faults.lock().unwrap().pop_front();
        match fault {
            None => self.inner.update_branch(target, commit, force).await,
            Some(UpdateFault::Transient) => Err(HostError::Transport("connection reset".into())),
            Some(UpdateFault::ApplyThenTimeout) => {
                self.inner.update_branch(target, commit, force).await?;
                Err(HostError::Timeout("update branch".into()))
            }
            Some(UpdateFault::ApplyThenBuiltOnThenTimeout) => {
                self.inner.update_branch(target, commit, force).await?;
                Publisher::new(self.inner.clone())
                    .publish_files(
                        target,
                        vec![FileChange::new("follow-up.txt", "later")],
                        "follow-up",
                    )
                    .await
                    .map_err(|e| HostError::Rejected(e.to_string()))?;
                Err(HostError::Timeout("update branch".into()))
            }
            Some(UpdateFault::Unauthorized) => {
                Err(HostError::Unauthorized("token lacks contents:write".into()))
            }
        }
    }

    async fn read_tree(&self, repo: &RepoRef, tree: &TreeId) -> Result<FlatTree, HostError> {
        self.inner.read_tree(repo, tree).await
    }

    async fn read_blob(&self, repo: &RepoRef, blob: &BlobId) -> Result<EncodedContent, HostError> {
        self.inner.read_blob(repo, blob).await
    }

    async fn create_repository(
        &self,
        repo: &RepoRef,
        options: &NewRepository,
    ) -> Result<(), HostError> {
        self.inner.create_repository(repo, options).await
    }
}

pub fn quick_options() -> PublishOptions {
    PublishOptions {
        max_concurrent_blobs: 8,
        call_timeout: Duration::from_secs(10),
        pointer_update_retries: 2,
        retry_backoff: Duration::from_millis(1),
        show_progress: false,
    }
}

/// Create `octo/site` and commit `files` over its initial README
pub async fn seed_repo(host: &FilesystemHost, files: &[(&str, &str)]) -> BranchTarget {
    let repo = RepoRef::new("octo", "site");
    host.create_repository(&repo, &NewRepository::default())
        .await
        .unwrap();
    let target = BranchTarget::new(repo, "main");

    let tip = host.branch_tip(&target).await.unwrap();
    let base_tree = host.commit(&target.repo, &tip).await.unwrap().tree;
    let mut overrides = Vec::new();
    for (path, content) in files {
        let blob = host
            .create_blob(&target.repo, &git_publish::encoding::encode(content))
            .await
            .unwrap();
        overrides.push(TreeOverride {
            path: path.to_string(),
            blob,
        });
    }
    let tree = host
        .create_tree(&target.repo, &base_tree, &overrides)
        .await
        .unwrap();
    let commit = host
        .create_commit(&target.repo, "seed", &tree, &[tip])
        .await
        .unwrap();
    host.update_branch(&target, &commit, false).await.unwrap();
    target
}

/// Path → text content of every file at the branch tip
pub async fn files_at_tip<H: HostingApi>(host: &H, target: &BranchTarget) -> BTreeMap<String, String> {
    let tip = host.branch_tip(target).await.unwrap();
    files_at_commit(host, &target.repo, &tip).await
}

pub async fn files_at_commit<H: HostingApi>(
    host: &H,
    repo: &RepoRef,
    commit: &CommitId,
) -> BTreeMap<String, String> {
    let tree = host.commit(repo, commit).await.unwrap().tree;
    let mut files = BTreeMap::new();
    for (path, entry) in host.read_tree(repo, &tree).await.unwrap() {
        let content = host.read_blob(repo, &entry.blob).await.unwrap();
        files.insert(path, content.decode().unwrap());
    }
    files
}
