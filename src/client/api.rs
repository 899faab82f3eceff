//! Remote-API backend talking to the GitHub REST API

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::cache::TtlCache;
use crate::model::{LicenseFile, RepoHandle, RepositoryMetadata};
use crate::util::path::{is_skill_file, within_scope};

use super::rate_limit::RateLimiter;
use super::{ClientError, ClientStats, RepoSearcher, SourceClient, StatsCounter};

const JSON_MEDIA_TYPE: &str = "application/vnd.github+json";
const RAW_MEDIA_TYPE: &str = "application/vnd.github.raw+json";
const SEARCH_PAGE_SIZE: usize = 100;
/// The search API never returns results past this many
const SEARCH_RESULT_CAP: usize = 1000;

#[derive(Debug, Deserialize)]
struct ApiRepo {
    name: String,
    owner: ApiOwner,
    description: Option<String>,
    #[serde(default)]
    stargazers_count: u64,
    #[serde(default)]
    forks_count: u64,
    default_branch: String,
    clone_url: String,
    updated_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiOwner {
    login: String,
}

#[derive(Debug, Deserialize)]
struct ApiBranch {
    commit: ApiCommit,
}

#[derive(Debug, Deserialize)]
struct ApiCommit {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct ApiTree {
    tree: Vec<ApiTreeEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Debug, Deserialize)]
struct ApiTreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct ApiLicense {
    name: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiSearch {
    items: Vec<ApiRepo>,
}

impl ApiRepo {
    fn into_metadata(self, commit_sha: String) -> RepositoryMetadata {
        let updated_at = self
            .updated_at
            .as_deref()
            .and_then(|s| OffsetDateTime::parse(s, &Rfc3339).ok())
            .unwrap_or_else(OffsetDateTime::now_utc);
        RepositoryMetadata {
            owner: self.owner.login,
            name: self.name,
            description: self.description.filter(|d| !d.trim().is_empty()),
            stars: self.stargazers_count,
            forks: self.forks_count,
            default_branch: self.default_branch,
            commit_sha,
            clone_url: self.clone_url,
            updated_at,
        }
    }
}

/// Rate-limited, caching client for the hosting platform's REST API.
pub struct GitHubClient {
    http: reqwest::Client,
    base_url: String,
    limiter: RateLimiter,
    stats: StatsCounter,
    info: TtlCache<String, RepositoryMetadata>,
    listings: TtlCache<String, Vec<String>>,
    contents: TtlCache<String, String>,
    licenses: TtlCache<String, Option<LicenseFile>>,
    searches: TtlCache<String, Vec<RepositoryMetadata>>,
}

impl GitHubClient {
    /// Client for `base_url` (e.g. `https://api.github.com`), authenticating
    /// with `token` when one is given.
    pub fn new(base_url: &str, token: Option<&str>, cache_ttl: Duration) -> Result<Self, ClientError> {
        let mut headers = HeaderMap::new();
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            let value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|e| ClientError::Decode {
                url: base_url.to_string(),
                message: format!("invalid token: {e}"),
            })?;
            headers.insert(reqwest::header::AUTHORIZATION, value);
        }
        let authenticated = !headers.is_empty();

        let http = reqwest::Client::builder()
            .user_agent("skillsync")
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            limiter: RateLimiter::for_auth(authenticated),
            stats: StatsCounter::default(),
            info: TtlCache::new(cache_ttl),
            listings: TtlCache::new(cache_ttl),
            contents: TtlCache::new(cache_ttl),
            licenses: TtlCache::new(cache_ttl),
            searches: TtlCache::new(cache_ttl),
        })
    }

    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    fn repo_url(&self, repo: &RepoHandle, rest: &str) -> String {
        format!(
            "{}/repos/{}/{}{}",
            self.base_url,
            urlencoding::encode(&repo.owner),
            urlencoding::encode(&repo.name),
            rest
        )
    }

    async fn send(&self, url: &str, accept: &str) -> Result<reqwest::Response, ClientError> {
        self.limiter.acquire().await;
        self.stats.request();
        tracing::debug!(%url, "api request");

        let response = self.http.get(url).header(ACCEPT, accept).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound(url.to_string()));
        }
        if !status.is_success() {
            return Err(ClientError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ClientError> {
        let response = self.stats.track(self.send(url, JSON_MEDIA_TYPE).await)?;
        let body = self.stats.track(response.bytes().await.map_err(ClientError::from))?;
        self.stats.track(serde_json::from_slice(&body).map_err(|e| ClientError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        }))
    }

    async fn get_text(&self, url: &str) -> Result<String, ClientError> {
        let response = self.stats.track(self.send(url, RAW_MEDIA_TYPE).await)?;
        self.stats.track(response.text().await.map_err(ClientError::from))
    }

    async fn fetch_info(&self, repo: &RepoHandle) -> Result<RepositoryMetadata, ClientError> {
        let api_repo: ApiRepo = self.get_json(&self.repo_url(repo, "")).await?;
        let branch_url = self.repo_url(
            repo,
            &format!("/branches/{}", urlencoding::encode(&api_repo.default_branch)),
        );
        let branch: ApiBranch = self.get_json(&branch_url).await?;
        Ok(api_repo.into_metadata(branch.commit.sha))
    }

    async fn fetch_listing(
        &self,
        repo: &RepoHandle,
        scope: Option<&str>,
        git_ref: &str,
    ) -> Result<Vec<String>, ClientError> {
        let url = self.repo_url(
            repo,
            &format!("/git/trees/{}?recursive=1", urlencoding::encode(git_ref)),
        );
        let tree: ApiTree = self.get_json(&url).await?;
        if tree.truncated {
            tracing::warn!(%repo, git_ref, "tree listing truncated by the API");
        }

        let mut files: Vec<String> = tree
            .tree
            .into_iter()
            .filter(|entry| entry.kind == "blob")
            .map(|entry| entry.path)
            .filter(|p| is_skill_file(p) && within_scope(p, scope))
            .collect();
        files.sort();
        Ok(files)
    }

    async fn fetch_license(&self, repo: &RepoHandle) -> Result<Option<LicenseFile>, ClientError> {
        let url = self.repo_url(repo, "/license");
        let license: ApiLicense = match self.get_json(&url).await {
            Ok(license) => license,
            Err(ClientError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        let encoded: String = license.content.split_whitespace().collect();
        let bytes = STANDARD.decode(encoded).map_err(|e| ClientError::Decode {
            url,
            message: e.to_string(),
        })?;
        Ok(Some(LicenseFile {
            file_name: license.name,
            content: String::from_utf8_lossy(&bytes).into_owned(),
        }))
    }

    async fn fetch_search(&self, query: &str, limit: usize) -> Result<Vec<RepositoryMetadata>, ClientError> {
        let limit = limit.min(SEARCH_RESULT_CAP);
        let per_page = limit.clamp(1, SEARCH_PAGE_SIZE);
        let mut results = Vec::new();
        let mut page = 1;

        while results.len() < limit {
            let url = format!(
                "{}/search/repositories?q={}&per_page={}&page={}",
                self.base_url,
                urlencoding::encode(query),
                per_page,
                page
            );
            let body: ApiSearch = self.get_json(&url).await?;
            let received = body.items.len();
            results.extend(body.items.into_iter().map(|repo| repo.into_metadata(String::new())));

            if received < per_page || page * per_page >= SEARCH_RESULT_CAP {
                break;
            }
            page += 1;
        }

        results.truncate(limit);
        Ok(results)
    }
}

#[async_trait]
impl SourceClient for GitHubClient {
    async fn repository_info(&self, repo: &RepoHandle) -> Result<RepositoryMetadata, ClientError> {
        let key = format!("info:{repo}");
        if let Some(meta) = self.info.get(&key) {
            self.stats.hit();
            return Ok(meta);
        }
        self.stats.miss();
        let meta = self.fetch_info(repo).await?;
        self.info.set(key, meta.clone());
        Ok(meta)
    }

    async fn list_skill_files(
        &self,
        repo: &RepoHandle,
        scope: Option<&str>,
        git_ref: &str,
    ) -> Result<Vec<String>, ClientError> {
        let key = format!("files:{repo}:{}:{git_ref}", scope.unwrap_or(""));
        if let Some(files) = self.listings.get(&key) {
            self.stats.hit();
            return Ok(files);
        }
        self.stats.miss();
        let files = self.fetch_listing(repo, scope, git_ref).await?;
        self.listings.set(key, files.clone());
        Ok(files)
    }

    async fn file_content(&self, repo: &RepoHandle, path: &str, git_ref: &str) -> Result<String, ClientError> {
        let key = format!("content:{repo}:{path}:{git_ref}");
        if let Some(content) = self.contents.get(&key) {
            self.stats.hit();
            return Ok(content);
        }
        self.stats.miss();

        let encoded_path: Vec<String> = path
            .trim_start_matches('/')
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        let url = self.repo_url(
            repo,
            &format!(
                "/contents/{}?ref={}",
                encoded_path.join("/"),
                urlencoding::encode(git_ref)
            ),
        );
        let content = self.get_text(&url).await?;
        self.contents.set(key, content.clone());
        Ok(content)
    }

    async fn license_file(&self, repo: &RepoHandle) -> Result<Option<LicenseFile>, ClientError> {
        let key = format!("license:{repo}");
        if let Some(license) = self.licenses.get(&key) {
            self.stats.hit();
            return Ok(license);
        }
        self.stats.miss();
        let license = self.fetch_license(repo).await?;
        self.licenses.set(key, license.clone());
        Ok(license)
    }

    fn stats(&self) -> ClientStats {
        self.stats.snapshot()
    }

    fn reset_stats(&self) {
        self.stats.reset();
    }

    fn clear_cache(&self) {
        self.info.clear();
        self.listings.clear();
        self.contents.clear();
        self.licenses.clear();
        self.searches.clear();
    }

    fn searcher(&self) -> Option<&dyn RepoSearcher> {
        Some(self)
    }
}

#[async_trait]
impl RepoSearcher for GitHubClient {
    async fn search_repositories(&self, query: &str, limit: usize) -> Result<Vec<RepositoryMetadata>, ClientError> {
        if limit == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let key = format!("search:{query}:{limit}");
        if let Some(results) = self.searches.get(&key) {
            self.stats.hit();
            return Ok(results);
        }
        self.stats.miss();
        let results = self.fetch_search(query, limit).await?;
        self.searches.set(key, results.clone());
        Ok(results)
    }
}
