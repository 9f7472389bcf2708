//! GitHub REST implementation of [`HostingApi`]
//!
//! Uses the low-level git data endpoints (`/git/refs`, `/git/commits`,
//! `/git/blobs`, `/git/trees`) so a batch of files lands as a single commit.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT},
    RequestBuilder, StatusCode,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::{
    traits::HostingApi,
    types::{
        BlobId, BranchTarget, CommitId, CommitInfo, FlatTree, NewRepository, RepoRef, TreeEntry,
        TreeId, TreeOverride, REGULAR_FILE_MODE,
    },
};
use crate::{
    encoding::{self, EncodedContent},
    error::HostError,
};

const API_VERSION: &str = "2022-11-28";

/// Connection settings for [`GitHubClient`]
#[derive(Debug, Clone)]
pub struct GitHubSettings {
    pub api_url: String,
    pub token: Option<String>,
    pub user_agent: String,
    pub timeout: Duration,
}

/// Client for the GitHub REST API
pub struct GitHubClient {
    http: reqwest::Client,
    api_url: String,
}

#[derive(Debug, Deserialize)]
struct ShaRef {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct RefResponse {
    object: ShaRef,
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    sha: String,
    tree: ShaRef,
    #[serde(default)]
    parents: Vec<ShaRef>,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct TreeItem {
    path: String,
    mode: String,
    #[serde(rename = "type")]
    kind: String,
    sha: String,
}

#[derive(Debug, Deserialize)]
struct TreeResponse {
    tree: Vec<TreeItem>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Debug, Deserialize)]
struct BlobResponse {
    content: String,
    encoding: String,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    login: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    message: String,
}

#[derive(Debug, Serialize)]
struct CreateBlobRequest<'a> {
    content: &'a str,
    encoding: &'static str,
}

#[derive(Debug, Serialize)]
struct TreeItemRequest<'a> {
    path: &'a str,
    mode: &'static str,
    #[serde(rename = "type")]
    kind: &'static str,
    sha: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateTreeRequest<'a> {
    base_tree: &'a str,
    tree: Vec<TreeItemRequest<'a>>,
}

#[derive(Debug, Serialize)]
struct CreateCommitRequest<'a> {
    message: &'a str,
    tree: &'a str,
    parents: Vec<&'a str>,
}

#[derive(Debug, Serialize)]
struct UpdateRefRequest<'a> {
    sha: &'a str,
    force: bool,
}

#[derive(Debug, Serialize)]
struct CreateRepoRequest<'a> {
    name: &'a str,
    private: bool,
    auto_init: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
}

impl GitHubClient {
    pub fn new(settings: &GitHubSettings) -> Result<Self, HostError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static(API_VERSION),
        );
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&settings.user_agent)
                .map_err(|_| HostError::Rejected("user agent is not a valid header".into()))?,
        );
        if let Some(token) = &settings.token {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| HostError::Rejected("token is not a valid header".into()))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(settings.timeout)
            .build()
            .map_err(|e| HostError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            api_url: settings.api_url.trim_end_matches('/').to_string(),
        })
    }

    fn repo_url(&self, repo: &RepoRef, rest: &str) -> String {
        format!(
            "{}/repos/{}/{}/{}",
            self.api_url, repo.owner, repo.name, rest
        )
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        what: &str,
    ) -> Result<T, HostError> {
        let response = request.send().await.map_err(|e| transport_error(e, what))?;
        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| HostError::Decode(format!("{}: {}", what, e)));
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify(status, &body, what))
    }

    /// List a tree one level at a time, for trees too large to list recursively
    async fn walk_tree(&self, repo: &RepoRef, root: &TreeId) -> Result<FlatTree, HostError> {
        let mut files = FlatTree::new();
        let mut pending = vec![(String::new(), root.as_str().to_string())];

        while let Some((prefix, sha)) = pending.pop() {
            let url = self.repo_url(repo, &format!("git/trees/{}", sha));
            tracing::debug!("GET {}", url);
            let response: TreeResponse = self
                .send(self.http.get(&url), &format!("tree {}", sha))
                .await?;
            if response.truncated {
                return Err(HostError::Rejected(format!(
                    "tree {} has more entries than the host will list",
                    sha
                )));
            }

            for item in response.tree {
                let path = if prefix.is_empty() {
                    item.path
                } else {
                    format!("{}/{}", prefix, item.path)
                };
                match item.kind.as_str() {
                    "blob" => {
                        files.insert(
                            path,
                            TreeEntry {
                                mode: item.mode,
                                blob: BlobId::new(item.sha),
                            },
                        );
                    }
                    "tree" => pending.push((path, item.sha)),
                    // submodule commits
                    _ => {}
                }
            }
        }

        Ok(files)
    }

    async fn authenticated_login(&self) -> Result<String, HostError> {
        let url = format!("{}/user", self.api_url);
        let user: UserResponse = self.send(self.http.get(&url), "authenticated user").await?;
        Ok(user.login)
    }
}

fn transport_error(err: reqwest::Error, what: &str) -> HostError {
    if err.is_timeout() {
        HostError::Timeout(what.to_string())
    } else {
        HostError::Transport(format!("{}: {}", what, err))
    }
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorResponse>(body)
        .map(|e| e.message)
        .unwrap_or_else(|_| body.trim().to_string())
}

/// Map a non-success response to a [`HostError`]
fn classify(status: StatusCode, body: &str, what: &str) -> HostError {
    let message = format!("{}: {}", what, error_message(body));
    match status.as_u16() {
        401 | 403 => HostError::Unauthorized(message),
        404 => HostError::NotFound(message),
        429 => HostError::Server {
            status: 429,
            message,
        },
        code @ 500..=599 => HostError::Server {
            status: code,
            message,
        },
        code => HostError::Api {
            status: code,
            message,
        },
    }
}

/// Ref updates report a rejected non-fast-forward as 422 (or 409)
fn classify_ref_update(status: StatusCode, body: &str, what: &str) -> HostError {
    let lowered = error_message(body).to_lowercase();
    match status.as_u16() {
        409 => HostError::Conflict(format!("{}: {}", what, error_message(body))),
        422 if lowered.contains("fast forward") || lowered.contains("fast-forward") => {
            HostError::Conflict(format!("{}: {}", what, error_message(body)))
        }
        422 if lowered.contains("does not exist") => {
            HostError::NotFound(format!("{}: {}", what, error_message(body)))
        }
        _ => classify(status, body, what),
    }
}

/// Repository creation reports a taken name as 422 with a detailed error list
fn classify_create_repo(status: StatusCode, body: &str, what: &str) -> HostError {
    if status == StatusCode::UNPROCESSABLE_ENTITY && body.contains("already exists") {
        return HostError::AlreadyExists(what.to_string());
    }
    classify(status, body, what)
}

fn flatten_tree_response(response: TreeResponse) -> FlatTree {
    response
        .tree
        .into_iter()
        .filter(|item| item.kind == "blob")
        .map(|item| {
            (
                item.path,
                TreeEntry {
                    mode: item.mode,
                    blob: BlobId::new(item.sha),
                },
            )
        })
        .collect()
}

fn blob_content(response: BlobResponse) -> Result<EncodedContent, HostError> {
    match response.encoding.as_str() {
        "base64" => Ok(EncodedContent::from_base64(response.content)),
        "utf-8" | "utf8" => Ok(encoding::encode(&response.content)),
        other => Err(HostError::Decode(format!("unknown blob encoding {}", other))),
    }
}

#[async_trait]
impl HostingApi for GitHubClient {
    async fn branch_tip(&self, target: &BranchTarget) -> Result<CommitId, HostError> {
        let url = self.repo_url(&target.repo, &format!("git/ref/heads/{}", target.branch));
        tracing::debug!("GET {}", url);
        let response: RefResponse = self
            .send(self.http.get(&url), &format!("branch {}", target))
            .await?;
        Ok(CommitId::new(response.object.sha))
    }

    async fn commit(&self, repo: &RepoRef, id: &CommitId) -> Result<CommitInfo, HostError> {
        let url = self.repo_url(repo, &format!("git/commits/{}", id));
        tracing::debug!("GET {}", url);
        let response: CommitResponse = self
            .send(self.http.get(&url), &format!("commit {}", id))
            .await?;
        Ok(CommitInfo {
            id: CommitId::new(response.sha),
            tree: TreeId::new(response.tree.sha),
            parents: response
                .parents
                .into_iter()
                .map(|p| CommitId::new(p.sha))
                .collect(),
            message: response.message,
        })
    }

    async fn create_blob(
        &self,
        repo: &RepoRef,
        content: &EncodedContent,
    ) -> Result<BlobId, HostError> {
        let url = self.repo_url(repo, "git/blobs");
        let body = CreateBlobRequest {
            content: content.as_str(),
            encoding: "base64",
        };
        tracing::debug!("POST {} ({} base64 bytes)", url, content.as_str().len());
        let response: ShaRef = self
            .send(self.http.post(&url).json(&body), "create blob")
            .await?;
        Ok(BlobId::new(response.sha))
    }

    async fn create_tree(
        &self,
        repo: &RepoRef,
        base: &TreeId,
        overrides: &[TreeOverride],
    ) -> Result<TreeId, HostError> {
        let url = self.repo_url(repo, "git/trees");
        let body = CreateTreeRequest {
            base_tree: base.as_str(),
            tree: overrides
                .iter()
                .map(|item| TreeItemRequest {
                    path: &item.path,
                    mode: REGULAR_FILE_MODE,
                    kind: "blob",
                    sha: item.blob.as_str(),
                })
                .collect(),
        };
        tracing::debug!("POST {} ({} entries over {})", url, overrides.len(), base);
        let response: ShaRef = self
            .send(self.http.post(&url).json(&body), "create tree")
            .await?;
        Ok(TreeId::new(response.sha))
    }

    async fn create_commit(
        &self,
        repo: &RepoRef,
        message: &str,
        tree: &TreeId,
        parents: &[CommitId],
    ) -> Result<CommitId, HostError> {
        let url = self.repo_url(repo, "git/commits");
        let body = CreateCommitRequest {
            message,
            tree: tree.as_str(),
            parents: parents.iter().map(CommitId::as_str).collect(),
        };
        tracing::debug!("POST {} (tree {})", url, tree);
        let response: ShaRef = self
            .send(self.http.post(&url).json(&body), "create commit")
            .await?;
        Ok(CommitId::new(response.sha))
    }

    async fn update_branch(
        &self,
        target: &BranchTarget,
        commit: &CommitId,
        force: bool,
    ) -> Result<(), HostError> {
        let url = self.repo_url(&target.repo, &format!("git/refs/heads/{}", target.branch));
        let body = UpdateRefRequest {
            sha: commit.as_str(),
            force,
        };
        let what = format!("update {}", target);
        tracing::debug!("PATCH {} -> {} (force: {})", url, commit, force);

        let response = self
            .http
            .patch(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(e, &what))?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let text = response.text().await.unwrap_or_default();
        Err(classify_ref_update(status, &text, &what))
    }

    async fn read_tree(&self, repo: &RepoRef, tree: &TreeId) -> Result<FlatTree, HostError> {
        let url = self.repo_url(repo, &format!("git/trees/{}?recursive=1", tree));
        tracing::debug!("GET {}", url);
        let response: TreeResponse = self
            .send(self.http.get(&url), &format!("tree {}", tree))
            .await?;
        if !response.truncated {
            return Ok(flatten_tree_response(response));
        }
        tracing::debug!("Recursive listing of {} was truncated, walking subtrees", tree);
        self.walk_tree(repo, tree).await
    }

    async fn read_blob(&self, repo: &RepoRef, blob: &BlobId) -> Result<EncodedContent, HostError> {
        let url = self.repo_url(repo, &format!("git/blobs/{}", blob));
        tracing::debug!("GET {}", url);
        let response: BlobResponse = self
            .send(self.http.get(&url), &format!("blob {}", blob))
            .await?;
        blob_content(response)
    }

    async fn create_repository(
        &self,
        repo: &RepoRef,
        options: &NewRepository,
    ) -> Result<(), HostError> {
        let login = self.authenticated_login().await?;
        let url = if login.eq_ignore_ascii_case(&repo.owner) {
            format!("{}/user/repos", self.api_url)
        } else {
            format!("{}/orgs/{}/repos", self.api_url, repo.owner)
        };
        let body = CreateRepoRequest {
            name: &repo.name,
            private: options.private,
            auto_init: true,
            description: options.description.as_deref(),
        };
        let what = format!("repository {}", repo);
        tracing::debug!("POST {}", url);

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(e, &what))?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let text = response.text().await.unwrap_or_default();
        Err(classify_create_repo(status, &text, &what))
    }
}
