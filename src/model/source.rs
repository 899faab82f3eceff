use serde::{Deserialize, Serialize};

use super::repo::{RepoHandle, RepositoryMetadata};

/// A configured source repository from which skills are scraped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub owner: String,
    pub repo: String,
    /// Restricts the skill file listing to this subdirectory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl SourceConfig {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            path: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Stable source id: `owner/repo`, or `owner/repo:scope` for a scoped source.
    ///
    /// Each scope of a repository keeps its own sync state.
    pub fn id(&self) -> String {
        match self.scope() {
            Some(scope) => format!("{}/{}:{}", self.owner, self.repo, scope),
            None => format!("{}/{}", self.owner, self.repo),
        }
    }

    pub fn handle(&self) -> RepoHandle {
        RepoHandle::new(&self.owner, &self.repo)
    }

    /// Scope path with surrounding slashes removed; `None` when it covers the whole tree.
    pub fn scope(&self) -> Option<&str> {
        self.path
            .as_deref()
            .map(|p| p.trim_matches('/'))
            .filter(|p| !p.is_empty())
    }
}

/// Persisted row for one configured source.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceRecord {
    pub id: String,
    pub owner: String,
    pub repo: String,
    pub path: Option<String>,
    pub description: Option<String>,
    pub stars: i64,
    pub forks: i64,
    pub default_branch: String,
    pub clone_url: String,
    /// Commit seen by the last completed scrape
    pub last_commit: Option<String>,
    pub skill_count: i64,
    /// Unix seconds
    pub last_scraped_at: Option<i64>,
    /// Unix seconds
    pub updated_at: i64,
}

impl SourceRecord {
    /// Build the row for `source` from fresh metadata, carrying over the
    /// sync state (`last_commit`, `skill_count`) of the previously stored row.
    pub fn refreshed(
        source: &SourceConfig,
        meta: &RepositoryMetadata,
        previous: Option<&SourceRecord>,
        now: i64,
    ) -> Self {
        Self {
            id: source.id(),
            owner: source.owner.clone(),
            repo: source.repo.clone(),
            path: source.scope().map(str::to_string),
            description: meta.description.clone(),
            stars: meta.stars as i64,
            forks: meta.forks as i64,
            default_branch: meta.default_branch.clone(),
            clone_url: meta.clone_url.clone(),
            last_commit: previous.and_then(|p| p.last_commit.clone()),
            skill_count: previous.map(|p| p.skill_count).unwrap_or(0),
            last_scraped_at: Some(now),
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn meta(commit: &str) -> RepositoryMetadata {
        RepositoryMetadata {
            owner: "acme".to_string(),
            name: "skills".to_string(),
            description: Some("Skills".to_string()),
            stars: 12,
            forks: 3,
            default_branch: "main".to_string(),
            commit_sha: commit.to_string(),
            clone_url: "https://github.com/acme/skills".to_string(),
            updated_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn test_scope_trims_slashes() {
        assert_eq!(SourceConfig::new("a", "b").with_path("/skills/").scope(), Some("skills"));
        assert_eq!(SourceConfig::new("a", "b").with_path("/").scope(), None);
        assert_eq!(SourceConfig::new("a", "b").scope(), None);
    }

    #[test]
    fn test_id_includes_scope() {
        assert_eq!(SourceConfig::new("acme", "mono").id(), "acme/mono");
        assert_eq!(SourceConfig::new("acme", "mono").with_path("/").id(), "acme/mono");
        assert_eq!(
            SourceConfig::new("acme", "mono").with_path("/skills/").id(),
            "acme/mono:skills"
        );
        assert_ne!(
            SourceConfig::new("acme", "mono").with_path("skills").id(),
            SourceConfig::new("acme", "mono").with_path("experimental").id()
        );
    }

    #[test]
    fn test_refreshed_keeps_sync_state() {
        let source = SourceConfig::new("acme", "skills");
        let previous = SourceRecord {
            last_commit: Some("old".to_string()),
            skill_count: 4,
            last_scraped_at: Some(10),
            ..SourceRecord::default()
        };

        let record = SourceRecord::refreshed(&source, &meta("new"), Some(&previous), 99);
        assert_eq!(record.id, "acme/skills");
        assert_eq!(record.last_commit.as_deref(), Some("old"));
        assert_eq!(record.skill_count, 4);
        assert_eq!(record.last_scraped_at, Some(99));
        assert_eq!(record.stars, 12);

        let first = SourceRecord::refreshed(&source, &meta("new"), None, 99);
        assert_eq!(first.last_commit, None);
        assert_eq!(first.skill_count, 0);
    }
}
