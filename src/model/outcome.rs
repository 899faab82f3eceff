use std::fmt;
use std::time::Duration;

/// One recorded failure during a scrape run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeFailure {
    pub source: String,
    /// File inside the source, `None` for source-level failures
    pub path: Option<String>,
    pub message: String,
}

impl fmt::Display for ScrapeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{}:{}: {}", self.source, path, self.message),
            None => write!(f, "{}: {}", self.source, self.message),
        }
    }
}

/// Aggregate result of one orchestration run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScrapeOutcome {
    pub sources_processed: usize,
    /// Sources whose commit was unchanged since the last run
    pub sources_skipped: usize,
    pub sources_failed: usize,
    pub skills_found: usize,
    pub skills_new: usize,
    pub skills_updated: usize,
    /// Candidates discarded because identical content was already persisted
    pub skills_duplicate: usize,
    pub errors: Vec<ScrapeFailure>,
    pub duration: Duration,
}

impl ScrapeOutcome {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}
