//! Source client abstraction
//!
//! One contract for repository info, skill file listing, file content and
//! license lookups, satisfied by a remote-API backend ([`GitHubClient`]) and
//! a local-clone backend ([`CloneClient`]). Repository search is an optional
//! secondary capability exposed through [`SourceClient::searcher`].

mod api;
mod clone;
mod rate_limit;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::model::{LicenseFile, RepoHandle, RepositoryMetadata};
use crate::repository::RepoError;

pub use api::GitHubClient;
pub use clone::CloneClient;
pub use rate_limit::RateLimiter;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("unexpected response from {url}: {message}")]
    Decode { url: String, message: String },
    #[error("not found: {0}")]
    NotFound(String),
}

/// Backend selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Hosting platform REST API, no local clones
    Api,
    /// Local working-copy clones
    #[default]
    Clone,
}

/// Request and cache counters of one client
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientStats {
    pub requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub errors: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounter {
    requests: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    errors: AtomicU64,
}

impl StatsCounter {
    pub(crate) fn request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an error when `result` is one, passing it through
    pub(crate) fn track<T, E>(&self, result: Result<T, E>) -> Result<T, E> {
        if result.is_err() {
            self.error();
        }
        result
    }

    pub(crate) fn snapshot(&self) -> ClientStats {
        ClientStats {
            requests: self.requests.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn reset(&self) {
        self.requests.store(0, Ordering::Relaxed);
        self.cache_hits.store(0, Ordering::Relaxed);
        self.cache_misses.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
    }
}

/// Read access to source repositories, independent of the backend
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Current metadata, including the commit the other calls will observe
    async fn repository_info(&self, repo: &RepoHandle) -> Result<RepositoryMetadata, ClientError>;

    /// Sorted paths of every skill file at `git_ref`, limited to `scope` when given
    async fn list_skill_files(
        &self,
        repo: &RepoHandle,
        scope: Option<&str>,
        git_ref: &str,
    ) -> Result<Vec<String>, ClientError>;

    async fn file_content(&self, repo: &RepoHandle, path: &str, git_ref: &str) -> Result<String, ClientError>;

    /// Repository license file; `None` when there is none
    async fn license_file(&self, repo: &RepoHandle) -> Result<Option<LicenseFile>, ClientError>;

    fn stats(&self) -> ClientStats;

    fn reset_stats(&self);

    fn clear_cache(&self);

    /// Repository search, when the backend supports it
    fn searcher(&self) -> Option<&dyn RepoSearcher> {
        None
    }
}

/// Discovery of repositories matching a free-text query
#[async_trait]
pub trait RepoSearcher: Send + Sync {
    async fn search_repositories(&self, query: &str, limit: usize) -> Result<Vec<RepositoryMetadata>, ClientError>;
}

/// Run a search through `client`, treating a backend without search as no results.
pub async fn search(
    client: &dyn SourceClient,
    query: &str,
    limit: usize,
) -> Result<Vec<RepositoryMetadata>, ClientError> {
    match client.searcher() {
        Some(searcher) => searcher.search_repositories(query, limit).await,
        None => Ok(Vec::new()),
    }
}
