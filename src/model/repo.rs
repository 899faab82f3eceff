use std::fmt;
use std::path::{Path, PathBuf};

use time::OffsetDateTime;

/// Identifies one remote repository by owner and name.
///
/// Every handle maps to exactly one working-copy path under a store root
/// (`<root>/<owner>/<name>`), so the two components are restricted to
/// characters that cannot escape that directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RepoHandle {
    pub owner: String,
    pub name: String,
}

impl RepoHandle {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Parse an `owner/name` string.
    pub fn parse(full_name: &str) -> Option<Self> {
        let (owner, name) = full_name.trim().trim_end_matches(".git").split_once('/')?;
        let handle = Self::new(owner, name);
        handle.is_valid().then_some(handle)
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    /// Both components are non-empty and safe to use as a single path segment.
    pub fn is_valid(&self) -> bool {
        is_safe_segment(&self.owner) && is_safe_segment(&self.name)
    }

    /// Local working-copy directory for this handle under `root`.
    pub fn local_path(&self, root: &Path) -> PathBuf {
        root.join(&self.owner).join(&self.name)
    }
}

impl fmt::Display for RepoHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

fn is_safe_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Snapshot of a repository, recomputed after every successful update.
#[derive(Debug, Clone, PartialEq)]
pub struct RepositoryMetadata {
    pub owner: String,
    pub name: String,
    /// First prose line of the README, if one was found
    pub description: Option<String>,
    /// Best effort; zero when unknown
    pub stars: u64,
    /// Best effort; zero when unknown
    pub forks: u64,
    pub default_branch: String,
    pub commit_sha: String,
    pub clone_url: String,
    pub updated_at: OffsetDateTime,
}

impl RepositoryMetadata {
    pub fn handle(&self) -> RepoHandle {
        RepoHandle::new(&self.owner, &self.name)
    }
}

/// One immediate child of a directory in a repository tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
}

/// A license file found at the repository root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicenseFile {
    pub file_name: String,
    pub content: String,
}

/// Star and fork counts scraped from a public page; zero means unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StarCounts {
    pub stars: u64,
    pub forks: u64,
}
