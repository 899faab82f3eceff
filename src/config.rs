use anyhow::{Context, Result, bail};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::client::{Backend, CloneClient, GitHubClient, SourceClient};
use crate::model::SourceConfig;
use crate::repository::{HtmlStarScraper, RepoStore, RepoStoreConfig};

/// Settings loaded from `config.toml`; every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root for clones and the database; defaults to the user cache directory
    pub data_dir: Option<PathBuf>,
    /// Defaults to `<data_dir>/skills.db`
    pub database: Option<PathBuf>,
    pub backend: Backend,
    /// Falls back to the `GITHUB_TOKEN` environment variable
    pub github_token: Option<String>,
    pub api_base_url: String,
    pub git_base_url: String,
    pub max_concurrency: usize,
    pub recency_window_secs: u64,
    pub operation_timeout_secs: u64,
    /// 0 clones full history
    pub clone_depth: u32,
    pub cache_ttl_secs: u64,
    pub max_slug_attempts: usize,
    pub fetch_star_counts: bool,
    pub sources: Vec<SourceConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            database: None,
            backend: Backend::default(),
            github_token: None,
            api_base_url: "https://api.github.com".to_string(),
            git_base_url: "https://github.com".to_string(),
            max_concurrency: 5,
            recency_window_secs: 60,
            operation_timeout_secs: 120,
            clone_depth: 1,
            cache_ttl_secs: 900,
            max_slug_attempts: 100,
            fetch_star_counts: true,
            sources: seed_sources(),
        }
    }
}

/// Built-in list of public skill repositories
pub fn seed_sources() -> Vec<SourceConfig> {
    vec![
        SourceConfig::new("anthropics", "skills"),
        SourceConfig::new("obra", "superpowers").with_path("skills"),
        SourceConfig::new("ComposioHQ", "awesome-claude-skills"),
        SourceConfig::new("K-Dense-AI", "claude-scientific-skills"),
    ]
}

impl Config {
    /// `<config_dir>/skillsync/config.toml`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("skillsync")
            .join("config.toml")
    }

    /// Load from `path` (or the default location), falling back to defaults
    /// when the file does not exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(Self::default_path);
        let mut config = if path.exists() {
            tracing::debug!(path = %path.display(), "loading configuration");
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("Could not read {}", path.display()))?;
            Self::parse(&raw).with_context(|| format!("Invalid configuration in {}", path.display()))?
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };

        if config.github_token.is_none() {
            config.github_token = std::env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty());
        }
        config.validate()?;
        Ok(config)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            bail!("max_concurrency must be at least 1");
        }
        if self.max_slug_attempts == 0 {
            bail!("max_slug_attempts must be at least 1");
        }
        if self.operation_timeout_secs == 0 {
            bail!("operation_timeout_secs must be at least 1");
        }
        let mut seen = FxHashSet::default();
        for source in &self.sources {
            if !source.handle().is_valid() {
                bail!("invalid source '{}/{}'", source.owner, source.repo);
            }
            if !seen.insert(source.id()) {
                bail!("source '{}' is configured more than once", source.id());
            }
        }
        Ok(())
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(dirs::cache_dir()
                .context("Could not determine cache directory")?
                .join("skillsync")),
        }
    }

    pub fn clones_dir(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join("repos"))
    }

    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.database {
            Some(path) => Ok(path.clone()),
            None => Ok(self.data_dir()?.join("skills.db")),
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn repo_store_config(&self) -> Result<RepoStoreConfig> {
        let mut store = RepoStoreConfig::new(self.clones_dir()?);
        store.git_base_url = self.git_base_url.clone();
        store.recency_window = Duration::from_secs(self.recency_window_secs);
        store.operation_timeout = Duration::from_secs(self.operation_timeout_secs);
        store.clone_depth = (self.clone_depth > 0).then_some(self.clone_depth);
        Ok(store)
    }

    pub fn repo_store(&self) -> Result<RepoStore> {
        let mut store = RepoStore::new(self.repo_store_config()?);
        if self.fetch_star_counts {
            store = store.with_star_counter(Arc::new(HtmlStarScraper::new(&self.git_base_url)));
        }
        Ok(store)
    }

    /// Client for `backend`; the clone backend works on `repos`.
    pub fn source_client(&self, backend: Backend, repos: Arc<RepoStore>) -> Result<Arc<dyn SourceClient>> {
        Ok(match backend {
            Backend::Clone => Arc::new(CloneClient::new(repos, self.cache_ttl())),
            Backend::Api => Arc::new(
                GitHubClient::new(&self.api_base_url, self.github_token.as_deref(), self.cache_ttl())
                    .context("Could not create API client")?,
            ),
        })
    }
}
