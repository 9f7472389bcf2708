use std::{
    env,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    host::{GitHubSettings, Signature},
    publisher::PublishOptions,
};

/// Expand tilde (~) in path to user's home directory
fn expand_tilde(path: &Path) -> PathBuf {
    if let Some(s) = path.to_str() {
        if let Some(stripped) = s.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(stripped);
            }
        } else if s == "~" {
            if let Some(home) = dirs::home_dir() {
                return home;
            }
        }
    }
    path.to_path_buf()
}

/// Configuration for git-publish
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PublishConfig {
    /// Base URL of the GitHub REST API
    #[serde(default = "defaults::api_url")]
    pub api_url: String,
    /// Bearer token; usually supplied through GITHUB_TOKEN instead
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,
    /// Timeout for each individual API call
    #[serde(default = "defaults::request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "defaults::max_concurrent_blobs")]
    pub max_concurrent_blobs: usize,
    /// Resumptions of a branch update after a transient failure
    #[serde(default = "defaults::pointer_update_retries")]
    pub pointer_update_retries: u32,
    #[serde(default = "defaults::retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Root of the local object store used with --local
    #[serde(default = "defaults::store_dir")]
    pub store_dir: PathBuf,
    /// Author of commits created by the local store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_email: Option<String>,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            api_url: defaults::api_url(),
            token: None,
            user_agent: defaults::user_agent(),
            request_timeout_secs: defaults::request_timeout_secs(),
            max_concurrent_blobs: defaults::max_concurrent_blobs(),
            pointer_update_retries: defaults::pointer_update_retries(),
            retry_backoff_ms: defaults::retry_backoff_ms(),
            store_dir: expand_tilde(&defaults::store_dir()),
            author_name: None,
            author_email: None,
        }
    }
}

impl PublishConfig {
    /// Load configuration from the config file (if any) and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::config_file_path()?,
        };
        tracing::debug!("loading git-publish config from {:?}", config_path);

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else if path.is_some() {
            anyhow::bail!("config file not found at {:?}", config_path);
        } else {
            Self::default()
        };

        config.apply_overrides(|key| env::var(key).ok())?;
        Ok(config)
    }

    /// Load configuration from a file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: PublishConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.store_dir = expand_tilde(&config.store_dir);
        config
            .validate()
            .with_context(|| format!("Invalid config file: {:?}", path))?;

        Ok(config)
    }

    /// Apply environment overrides, looked up through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("GIT_PUBLISH_API_URL") {
            self.api_url = url;
        }

        if let Some(token) = lookup("GITHUB_TOKEN").filter(|t| !t.is_empty()) {
            self.token = Some(token);
        }

        if let Some(secs) = lookup("GIT_PUBLISH_TIMEOUT_SECS") {
            self.request_timeout_secs = secs
                .parse()
                .context("Failed to parse GIT_PUBLISH_TIMEOUT_SECS as u64")?;
        }

        if let Some(limit) = lookup("GIT_PUBLISH_MAX_CONCURRENT_BLOBS") {
            self.max_concurrent_blobs = limit
                .parse()
                .context("Failed to parse GIT_PUBLISH_MAX_CONCURRENT_BLOBS as usize")?;
        }

        if let Some(dir) = lookup("GIT_PUBLISH_STORE_DIR") {
            self.store_dir = expand_tilde(&PathBuf::from(dir));
        }

        self.validate()
    }

    /// Reject settings under which no publish could succeed
    fn validate(&self) -> Result<()> {
        if self.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be at least 1");
        }
        if self.max_concurrent_blobs == 0 {
            anyhow::bail!("max_concurrent_blobs must be at least 1");
        }
        Ok(())
    }

    /// Get default config file path
    pub fn config_file_path() -> Result<PathBuf> {
        dirs::home_dir()
            .map(|home| home.join(".config/git-publish/config.yaml"))
            .context("Could not determine home directory for config file")
    }

    pub fn github_settings(&self) -> GitHubSettings {
        GitHubSettings {
            api_url: self.api_url.clone(),
            token: self.token.clone(),
            user_agent: self.user_agent.clone(),
            timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }

    pub fn publish_options(&self) -> PublishOptions {
        PublishOptions {
            max_concurrent_blobs: self.max_concurrent_blobs,
            call_timeout: Duration::from_secs(self.request_timeout_secs),
            pointer_update_retries: self.pointer_update_retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            show_progress: false,
        }
    }

    pub fn signature(&self) -> Signature {
        let default = Signature::default();
        Signature {
            name: self.author_name.clone().unwrap_or(default.name),
            email: self.author_email.clone().unwrap_or(default.email),
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    pub(crate) fn api_url() -> String {
        "https://api.github.com".to_string()
    }

    pub(crate) fn user_agent() -> String {
        concat!("git-publish/", env!("CARGO_PKG_VERSION")).to_string()
    }

    pub(crate) fn request_timeout_secs() -> u64 {
        30
    }

    pub(crate) fn max_concurrent_blobs() -> usize {
        8
    }

    pub(crate) fn pointer_update_retries() -> u32 {
        2
    }

    pub(crate) fn retry_backoff_ms() -> u64 {
        500
    }

    pub(crate) fn store_dir() -> PathBuf {
        PathBuf::from("~/.local/share/git-publish")
    }
}
