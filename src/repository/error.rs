use std::fmt;
use std::time::Duration;

use crate::model::RepoHandle;

/// Repository store operation that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoOp {
    Clone,
    Update,
    Open,
    Info,
    ListFiles,
    ReadFile,
    ListDirectory,
    Remove,
    Cleanup,
}

impl fmt::Display for RepoOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RepoOp::Clone => "clone",
            RepoOp::Update => "update",
            RepoOp::Open => "open",
            RepoOp::Info => "info",
            RepoOp::ListFiles => "list files",
            RepoOp::ReadFile => "read file",
            RepoOp::ListDirectory => "list directory",
            RepoOp::Remove => "remove",
            RepoOp::Cleanup => "cleanup",
        };
        f.write_str(name)
    }
}

/// Underlying cause of a [`RepoError`]
#[derive(Debug, thiserror::Error)]
pub enum GitFailure {
    #[error(transparent)]
    Git(#[from] git2::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("object database: {0}")]
    Objects(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid repository handle")]
    InvalidHandle,

    #[error("no local clone")]
    NotCloned,

    #[error("path not found: {0}")]
    NotFound(String),

    #[error("background task failed: {0}")]
    Task(String),
}

/// Failure of a repository store operation.
///
/// Carries the repository and operation so callers can aggregate failures
/// without parsing messages.
#[derive(Debug, thiserror::Error)]
#[error("{op} {owner}/{repo}: {source}")]
pub struct RepoError {
    pub owner: String,
    pub repo: String,
    pub op: RepoOp,
    #[source]
    pub source: GitFailure,
}

impl RepoError {
    pub fn new(handle: &RepoHandle, op: RepoOp, source: impl Into<GitFailure>) -> Self {
        Self {
            owner: handle.owner.clone(),
            repo: handle.name.clone(),
            op,
            source: source.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.source, GitFailure::Timeout(_))
    }

    pub fn is_not_found(&self) -> bool {
        match &self.source {
            GitFailure::NotFound(_) => true,
            GitFailure::Git(e) => e.code() == git2::ErrorCode::NotFound,
            _ => false,
        }
    }
}

/// Attach repository and operation context to a fallible result
pub(crate) trait RepoContext<T> {
    fn repo_context(self, handle: &RepoHandle, op: RepoOp) -> Result<T, RepoError>;
}

impl<T, E: Into<GitFailure>> RepoContext<T> for Result<T, E> {
    fn repo_context(self, handle: &RepoHandle, op: RepoOp) -> Result<T, RepoError> {
        self.map_err(|e| RepoError::new(handle, op, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_names_repo_and_op() {
        let handle = RepoHandle::new("acme", "tools");
        let err = RepoError::new(&handle, RepoOp::Clone, GitFailure::Timeout(Duration::from_secs(2)));
        assert_eq!(err.to_string(), "clone acme/tools: timed out after 2s");
        assert!(err.is_timeout());
        assert_eq!(err.owner, "acme");
        assert_eq!(err.op, RepoOp::Clone);
    }

    #[test]
    fn test_not_found_detection() {
        let handle = RepoHandle::new("acme", "tools");
        let err = RepoError::new(&handle, RepoOp::ReadFile, GitFailure::NotFound("x.md".into()));
        assert!(err.is_not_found());

        let git = git2::Error::new(git2::ErrorCode::NotFound, git2::ErrorClass::Tree, "missing");
        let err = RepoError::new(&handle, RepoOp::ReadFile, git);
        assert!(err.is_not_found());
    }
}
