use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Git file mode for a regular, non-executable file
pub const REGULAR_FILE_MODE: &str = "100644";

macro_rules! object_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

object_id!(
    /// Id of an immutable commit
    CommitId
);
object_id!(
    /// Id of an immutable tree
    TreeId
);
object_id!(
    /// Id of an immutable, content-addressed blob
    BlobId
);

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid repository '{0}', expected <owner>/<name>")]
pub struct InvalidRepoRef(String);

/// A repository on a hosting provider
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }
}

impl FromStr for RepoRef {
    type Err = InvalidRepoRef;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid = |part: &str| {
            !part.is_empty()
                && part != "."
                && part != ".."
                && part
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        };
        match s.split_once('/') {
            Some((owner, name)) if valid(owner) && valid(name) => Ok(Self::new(owner, name)),
            _ => Err(InvalidRepoRef(s.to_string())),
        }
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// A named branch of a repository
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BranchTarget {
    pub repo: RepoRef,
    pub branch: String,
}

impl BranchTarget {
    pub fn new(repo: RepoRef, branch: impl Into<String>) -> Self {
        Self {
            repo,
            branch: branch.into(),
        }
    }

    pub fn ref_name(&self) -> String {
        format!("refs/heads/{}", self.branch)
    }
}

impl fmt::Display for BranchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.repo, self.branch)
    }
}

/// What a host reports about a commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub id: CommitId,
    pub tree: TreeId,
    pub parents: Vec<CommitId>,
    pub message: String,
}

/// A path → blob override applied on top of a base tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeOverride {
    pub path: String,
    pub blob: BlobId,
}

/// A file entry in a flattened tree listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub mode: String,
    pub blob: BlobId,
}

impl TreeEntry {
    pub fn regular(blob: BlobId) -> Self {
        Self {
            mode: REGULAR_FILE_MODE.to_string(),
            blob,
        }
    }
}

/// Recursive tree listing: full path → file entry. Directories are implied.
pub type FlatTree = BTreeMap<String, TreeEntry>;

/// Parameters for creating a repository
#[derive(Debug, Clone)]
pub struct NewRepository {
    /// Branch that receives the initial commit. GitHub ignores this and uses
    /// the account's default branch name.
    pub default_branch: String,
    pub private: bool,
    pub description: Option<String>,
}

impl Default for NewRepository {
    fn default() -> Self {
        Self {
            default_branch: "main".to_string(),
            private: true,
            description: None,
        }
    }
}
