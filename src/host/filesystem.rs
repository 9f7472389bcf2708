use std::{
    collections::{BTreeMap, HashSet, VecDeque},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use gix_object::Kind;

use super::{
    objects::{
        decode_commit, decode_tree, encode_commit, encode_tree, read_loose_object,
        write_loose_object, GitObject, RawCommit, RawTreeEntry, TREE_MODE,
    },
    state::RepoState,
    traits::HostingApi,
    types::{
        BlobId, BranchTarget, CommitId, CommitInfo, FlatTree, NewRepository, RepoRef, TreeEntry,
        TreeId, TreeOverride,
    },
};
use crate::{
    encoding::{self, EncodedContent},
    error::HostError,
};

/// Identity recorded as author and committer of local commits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub name: String,
    pub email: String,
}

impl Default for Signature {
    fn default() -> Self {
        Self {
            name: "git-publish".to_string(),
            email: "git-publish@localhost".to_string(),
        }
    }
}

/// Hosting API backed by a local directory of git objects
///
/// Layout: `<root>/<owner>/<repo>/objects/` holds loose objects and
/// `<root>/<owner>/<repo>/state.yaml` holds the refs.
#[derive(Clone)]
pub struct FilesystemHost {
    root: PathBuf,
    author: Signature,
    /// Serializes compare-and-move on refs within this process
    ref_lock: Arc<Mutex<()>>,
}

impl FilesystemHost {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self::with_author(root, Signature::default())
    }

    pub fn with_author<P: AsRef<Path>>(root: P, author: Signature) -> Self {
        FilesystemHost {
            root: root.as_ref().to_path_buf(),
            author,
            ref_lock: Arc::new(Mutex::new(())),
        }
    }

    fn repo_dir(&self, repo: &RepoRef) -> PathBuf {
        self.root.join(&repo.owner).join(&repo.name)
    }

    fn state_path(&self, repo: &RepoRef) -> PathBuf {
        self.repo_dir(repo).join("state.yaml")
    }

    /// Objects directory of an existing repository
    fn objects_dir(&self, repo: &RepoRef) -> Result<PathBuf, HostError> {
        if !self.state_path(repo).exists() {
            return Err(HostError::NotFound(format!("repository {}", repo)));
        }
        Ok(self.repo_dir(repo).join("objects"))
    }

    fn read_state(&self, repo: &RepoRef) -> Result<RepoState, HostError> {
        let path = self.state_path(repo);
        if !path.exists() {
            return Err(HostError::NotFound(format!("repository {}", repo)));
        }
        RepoState::load(&path)
    }

    fn read_kind(objects: &Path, id: &str, kind: Kind) -> Result<GitObject, HostError> {
        let obj = read_loose_object(objects, id)?;
        if obj.kind != kind {
            return Err(HostError::NotFound(format!("{:?} {}", kind, id).to_lowercase()));
        }
        Ok(obj)
    }

    fn read_commit(objects: &Path, id: &str) -> Result<RawCommit, HostError> {
        decode_commit(&Self::read_kind(objects, id, Kind::Commit)?.data)
    }

    fn flatten_tree(
        objects: &Path,
        tree_id: &str,
        prefix: &str,
        out: &mut FlatTree,
    ) -> Result<(), HostError> {
        let tree = Self::read_kind(objects, tree_id, Kind::Tree)?;
        for entry in decode_tree(&tree.data)? {
            let path = format!("{}{}", prefix, entry.name);
            if entry.is_tree() {
                Self::flatten_tree(objects, &entry.id, &format!("{}/", path), out)?;
            } else {
                out.insert(
                    path,
                    TreeEntry {
                        mode: entry.mode,
                        blob: BlobId::new(entry.id),
                    },
                );
            }
        }
        Ok(())
    }

    /// Write nested tree objects for a flat listing, returning the root id
    fn write_tree(objects: &Path, files: &FlatTree) -> Result<String, HostError> {
        let mut entries = Vec::new();
        let mut dirs: BTreeMap<&str, FlatTree> = BTreeMap::new();

        for (path, entry) in files {
            match path.split_once('/') {
                Some((dir, rest)) => {
                    dirs.entry(dir)
                        .or_default()
                        .insert(rest.to_string(), entry.clone());
                }
                None => entries.push(RawTreeEntry {
                    mode: entry.mode.clone(),
                    name: path.clone(),
                    id: entry.blob.as_str().to_string(),
                }),
            }
        }
        for (name, children) in dirs {
            entries.push(RawTreeEntry {
                mode: TREE_MODE.to_string(),
                name: name.to_string(),
                id: Self::write_tree(objects, &children)?,
            });
        }

        let tree = GitObject::from_raw(Kind::Tree, encode_tree(entries)?);
        write_loose_object(objects, &tree)?;
        Ok(tree.id)
    }

    fn overlay(base: &mut FlatTree, overrides: &[TreeOverride]) -> Result<(), HostError> {
        for item in overrides {
            let as_dir = format!("{}/", item.path);
            if base.keys().any(|path| path.starts_with(&as_dir)) {
                return Err(HostError::Rejected(format!(
                    "'{}' is a directory in the base tree",
                    item.path
                )));
            }
            let mut parent = item.path.as_str();
            while let Some((dir, _)) = parent.rsplit_once('/') {
                if base.contains_key(dir) {
                    return Err(HostError::Rejected(format!(
                        "'{}' is a file in the base tree",
                        dir
                    )));
                }
                parent = dir;
            }
            base.insert(item.path.clone(), TreeEntry::regular(item.blob.clone()));
        }
        Ok(())
    }

    /// Whether `ancestor` is reachable from `descendant` through parent links
    fn is_ancestor(objects: &Path, ancestor: &str, descendant: &str) -> Result<bool, HostError> {
        let mut queue = VecDeque::from([descendant.to_string()]);
        let mut seen = HashSet::new();
        while let Some(id) = queue.pop_front() {
            if id == ancestor {
                return Ok(true);
            }
            if !seen.insert(id.clone()) {
                continue;
            }
            queue.extend(Self::read_commit(objects, &id)?.parents);
        }
        Ok(false)
    }

    fn author_line(&self) -> String {
        format!(
            "{} <{}> {} +0000",
            self.author.name,
            self.author.email,
            chrono::Utc::now().timestamp()
        )
    }

    fn do_create_tree(
        &self,
        repo: &RepoRef,
        base: &TreeId,
        overrides: &[TreeOverride],
    ) -> Result<TreeId, HostError> {
        let objects = self.objects_dir(repo)?;
        let mut files = FlatTree::new();
        Self::flatten_tree(&objects, base.as_str(), "", &mut files)?;
        for item in overrides {
            Self::read_kind(&objects, item.blob.as_str(), Kind::Blob)?;
        }
        Self::overlay(&mut files, overrides)?;
        Ok(TreeId::new(Self::write_tree(&objects, &files)?))
    }

    fn do_create_commit(
        &self,
        repo: &RepoRef,
        message: &str,
        tree: &TreeId,
        parents: &[CommitId],
    ) -> Result<CommitId, HostError> {
        let objects = self.objects_dir(repo)?;
        Self::read_kind(&objects, tree.as_str(), Kind::Tree)?;
        for parent in parents {
            Self::read_kind(&objects, parent.as_str(), Kind::Commit)?;
        }

        let raw = RawCommit {
            tree: tree.as_str().to_string(),
            parents: parents.iter().map(|p| p.as_str().to_string()).collect(),
            author: self.author_line(),
            message: message.to_string(),
        };
        let commit = GitObject::from_raw(Kind::Commit, encode_commit(&raw));
        write_loose_object(&objects, &commit)?;
        Ok(CommitId::new(commit.id))
    }

    fn do_update_branch(
        &self,
        target: &BranchTarget,
        commit: &CommitId,
        force: bool,
    ) -> Result<(), HostError> {
        let objects = self.objects_dir(&target.repo)?;
        Self::read_kind(&objects, commit.as_str(), Kind::Commit)?;

        let _guard = self
            .ref_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut state = self.read_state(&target.repo)?;
        let ref_name = target.ref_name();
        let current = state
            .refs
            .get(&ref_name)
            .cloned()
            .ok_or_else(|| HostError::NotFound(format!("branch {}", target)))?;

        if current == commit.as_str() {
            return Ok(());
        }
        if !force && !Self::is_ancestor(&objects, &current, commit.as_str())? {
            return Err(HostError::Conflict(format!(
                "{} is at {}, which is not an ancestor of {}",
                target, current, commit
            )));
        }

        tracing::debug!("Moving {} from {} to {}", target, current, commit);
        state.refs.insert(ref_name, commit.as_str().to_string());
        state.save(&self.state_path(&target.repo))
    }

    fn do_create_repository(
        &self,
        repo: &RepoRef,
        options: &NewRepository,
    ) -> Result<(), HostError> {
        let _guard = self
            .ref_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if self.state_path(repo).exists() {
            return Err(HostError::AlreadyExists(format!("repository {}", repo)));
        }
        let objects = self.repo_dir(repo).join("objects");
        std::fs::create_dir_all(&objects)?;

        let readme = GitObject::from_raw(Kind::Blob, format!("# {}\n", repo.name).into_bytes());
        write_loose_object(&objects, &readme)?;
        let mut files = FlatTree::new();
        files.insert(
            "README.md".to_string(),
            TreeEntry::regular(BlobId::new(readme.id)),
        );
        let tree = Self::write_tree(&objects, &files)?;

        let raw = RawCommit {
            tree,
            parents: vec![],
            author: self.author_line(),
            message: "Initial commit".to_string(),
        };
        let commit = GitObject::from_raw(Kind::Commit, encode_commit(&raw));
        write_loose_object(&objects, &commit)?;

        let mut state = RepoState {
            default_branch: Some(options.default_branch.clone()),
            ..RepoState::default()
        };
        state
            .refs
            .insert(format!("refs/heads/{}", options.default_branch), commit.id);
        state.save(&self.state_path(repo))
    }
}

#[async_trait]
impl HostingApi for FilesystemHost {
    async fn branch_tip(&self, target: &BranchTarget) -> Result<CommitId, HostError> {
        let state = self.read_state(&target.repo)?;
        state
            .refs
            .get(&target.ref_name())
            .map(|id| CommitId::new(id.clone()))
            .ok_or_else(|| HostError::NotFound(format!("branch {}", target)))
    }

    async fn commit(&self, repo: &RepoRef, id: &CommitId) -> Result<CommitInfo, HostError> {
        let objects = self.objects_dir(repo)?;
        let raw = Self::read_commit(&objects, id.as_str())?;
        Ok(CommitInfo {
            id: id.clone(),
            tree: TreeId::new(raw.tree),
            parents: raw.parents.into_iter().map(CommitId::new).collect(),
            message: raw.message.trim_end_matches('\n').to_string(),
        })
    }

    async fn create_blob(
        &self,
        repo: &RepoRef,
        content: &EncodedContent,
    ) -> Result<BlobId, HostError> {
        let objects = self.objects_dir(repo)?;
        let bytes = content
            .decode_bytes()
            .map_err(|e| HostError::Rejected(e.to_string()))?;
        let blob = GitObject::from_raw(Kind::Blob, bytes);
        write_loose_object(&objects, &blob)?;
        Ok(BlobId::new(blob.id))
    }

    async fn create_tree(
        &self,
        repo: &RepoRef,
        base: &TreeId,
        overrides: &[TreeOverride],
    ) -> Result<TreeId, HostError> {
        self.do_create_tree(repo, base, overrides)
    }

    async fn create_commit(
        &self,
        repo: &RepoRef,
        message: &str,
        tree: &TreeId,
        parents: &[CommitId],
    ) -> Result<CommitId, HostError> {
        self.do_create_commit(repo, message, tree, parents)
    }

    async fn update_branch(
        &self,
        target: &BranchTarget,
        commit: &CommitId,
        force: bool,
    ) -> Result<(), HostError> {
        self.do_update_branch(target, commit, force)
    }

    async fn read_tree(&self, repo: &RepoRef, tree: &TreeId) -> Result<FlatTree, HostError> {
        let objects = self.objects_dir(repo)?;
        let mut files = FlatTree::new();
        Self::flatten_tree(&objects, tree.as_str(), "", &mut files)?;
        Ok(files)
    }

    async fn read_blob(&self, repo: &RepoRef, blob: &BlobId) -> Result<EncodedContent, HostError> {
        let objects = self.objects_dir(repo)?;
        let obj = Self::read_kind(&objects, blob.as_str(), Kind::Blob)?;
        Ok(encoding::encode_bytes(&obj.data))
    }

    async fn create_repository(
        &self,
        repo: &RepoRef,
        options: &NewRepository,
    ) -> Result<(), HostError> {
        self.do_create_repository(repo, options)
    }
}
