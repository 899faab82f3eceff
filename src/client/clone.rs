//! Local-clone backend built on the repository store

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::TtlCache;
use crate::model::{LicenseFile, RepoHandle, RepositoryMetadata};
use crate::repository::{RepoError, RepoStore};

use super::{ClientError, ClientStats, SourceClient, StatsCounter};

/// Serves every query from a working-copy clone.
///
/// Each call first brings the clone up to date (a no-op inside the store's
/// recency window), then reads at the checked-out commit; the `git_ref`
/// argument is therefore advisory and only part of the cache key.
pub struct CloneClient {
    store: Arc<RepoStore>,
    stats: StatsCounter,
    info: TtlCache<String, RepositoryMetadata>,
    listings: TtlCache<String, Vec<String>>,
    contents: TtlCache<String, String>,
    licenses: TtlCache<String, Option<LicenseFile>>,
}

impl CloneClient {
    pub fn new(store: Arc<RepoStore>, cache_ttl: Duration) -> Self {
        Self {
            store,
            stats: StatsCounter::default(),
            info: TtlCache::new(cache_ttl),
            listings: TtlCache::new(cache_ttl),
            contents: TtlCache::new(cache_ttl),
            licenses: TtlCache::new(cache_ttl),
        }
    }

    pub fn store(&self) -> &Arc<RepoStore> {
        &self.store
    }

    async fn ensure_clone(&self, repo: &RepoHandle) -> Result<(), RepoError> {
        self.stats.request();
        self.stats.track(self.store.clone_or_update(repo).await)?;
        Ok(())
    }
}

#[async_trait]
impl SourceClient for CloneClient {
    async fn repository_info(&self, repo: &RepoHandle) -> Result<RepositoryMetadata, ClientError> {
        let key = format!("clone:info:{repo}");
        if let Some(meta) = self.info.get(&key) {
            self.stats.hit();
            return Ok(meta);
        }
        self.stats.miss();

        self.ensure_clone(repo).await?;
        let meta = self.stats.track(self.store.repository_info(repo).await)?;
        self.info.set(key, meta.clone());
        Ok(meta)
    }

    async fn list_skill_files(
        &self,
        repo: &RepoHandle,
        scope: Option<&str>,
        git_ref: &str,
    ) -> Result<Vec<String>, ClientError> {
        let key = format!("clone:files:{repo}:{}:{git_ref}", scope.unwrap_or(""));
        if let Some(files) = self.listings.get(&key) {
            self.stats.hit();
            return Ok(files);
        }
        self.stats.miss();

        self.ensure_clone(repo).await?;
        let files = self.stats.track(self.store.list_skill_files(repo, scope).await)?;
        self.listings.set(key, files.clone());
        Ok(files)
    }

    async fn file_content(&self, repo: &RepoHandle, path: &str, git_ref: &str) -> Result<String, ClientError> {
        let key = format!("clone:content:{repo}:{path}:{git_ref}");
        if let Some(content) = self.contents.get(&key) {
            self.stats.hit();
            return Ok(content);
        }
        self.stats.miss();

        self.ensure_clone(repo).await?;
        let content = match self.store.read_file(repo, path).await {
            Ok(content) => content,
            Err(e) if e.is_not_found() => {
                self.stats.error();
                return Err(ClientError::NotFound(format!("{repo}:{path}")));
            }
            Err(e) => {
                self.stats.error();
                return Err(e.into());
            }
        };
        self.contents.set(key, content.clone());
        Ok(content)
    }

    async fn license_file(&self, repo: &RepoHandle) -> Result<Option<LicenseFile>, ClientError> {
        let key = format!("clone:license:{repo}");
        if let Some(license) = self.licenses.get(&key) {
            self.stats.hit();
            return Ok(license);
        }
        self.stats.miss();

        self.ensure_clone(repo).await?;
        let license = self.stats.track(self.store.license_file(repo).await)?;
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
    }
}
