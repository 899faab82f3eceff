//! Scrape orchestration
//!
//! `Scraper::scrape_all` runs one task per source, at most `max_concurrency`
//! at a time. Each task reports back over a channel; the run collects the
//! reports once every task has finished. Failures stay inside the source (or
//! file) they happened in. Only cancellation ends the run early.

mod dedup;
mod progress;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use rustc_hash::FxHashSet;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::client::{ClientError, SourceClient};
use crate::model::{
    RepoHandle, ScrapeFailure, ScrapeOutcome, Skill, SkillLocation, SourceConfig, SourceRecord,
};
use crate::parser::{detect_license, parse_skill};
use crate::repository::SkillStore;
use crate::util::format::now_unix;

pub use dedup::{Claim, DEFAULT_MAX_SLUG_ATTEMPTS, DedupError, Deduplicator};
pub use progress::{IndicatifProgress, NoopProgress, ProgressSink};

pub const DEFAULT_MAX_CONCURRENCY: usize = 5;

/// Sync meta key holding the Unix time of the last completed run
pub const LAST_SYNC_KEY: &str = "last_sync";

#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    #[error("scrape cancelled")]
    Cancelled { partial: ScrapeOutcome },
    #[error("invalid scrape options: {0}")]
    InvalidOptions(String),
}

#[derive(Clone)]
pub struct ScrapeOptions {
    /// Re-list and re-parse sources whose commit did not change
    pub force: bool,
    pub max_concurrency: usize,
    pub on_progress: Option<Arc<dyn ProgressSink>>,
}

impl Default for ScrapeOptions {
    fn default() -> Self {
        Self {
            force: false,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            on_progress: None,
        }
    }
}

impl ScrapeOptions {
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n;
        self
    }

    pub fn on_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.on_progress = Some(sink);
        self
    }
}

/// Drives scraping of configured sources into a [`SkillStore`].
pub struct Scraper<S: SkillStore> {
    client: Arc<dyn SourceClient>,
    store: Arc<S>,
    max_slug_attempts: usize,
}

impl<S: SkillStore> Scraper<S> {
    pub fn new(client: Arc<dyn SourceClient>, store: Arc<S>) -> Self {
        Self {
            client,
            store,
            max_slug_attempts: DEFAULT_MAX_SLUG_ATTEMPTS,
        }
    }

    pub fn with_max_slug_attempts(mut self, attempts: usize) -> Self {
        self.max_slug_attempts = attempts;
        self
    }

    pub fn client(&self) -> &Arc<dyn SourceClient> {
        &self.client
    }

    /// Scrape every source in `sources`.
    ///
    /// Returns the aggregated outcome, including per-source and per-file
    /// errors. When `cancel` fires the run stops starting new work, abandons
    /// in-flight sources and returns [`ScrapeError::Cancelled`] carrying what
    /// was collected so far.
    pub async fn scrape_all(
        &self,
        sources: &[SourceConfig],
        options: ScrapeOptions,
        cancel: CancellationToken,
    ) -> Result<ScrapeOutcome, ScrapeError> {
        validate(sources, &options)?;

        let start = Instant::now();
        let total = sources.len();
        tracing::info!(sources = total, force = options.force, concurrency = options.max_concurrency, "starting scrape");

        let run = Arc::new(Run {
            client: Arc::clone(&self.client),
            store: Arc::clone(&self.store),
            dedup: Deduplicator::new(self.max_slug_attempts),
            force: options.force,
        });
        let semaphore = Arc::new(Semaphore::new(options.max_concurrency));
        let completed = Arc::new(AtomicUsize::new(0));
        let (tx, mut rx) = mpsc::unbounded_channel::<SourceReport>();
        let mut tasks = JoinSet::new();

        for source in sources.iter().cloned() {
            let run = Arc::clone(&run);
            let semaphore = Arc::clone(&semaphore);
            let completed = Arc::clone(&completed);
            let progress = options.on_progress.clone();
            let cancel = cancel.clone();
            let tx = tx.clone();

            tasks.spawn(async move {
                if cancel.is_cancelled() {
                    return;
                }
                let _permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    permit = semaphore.acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => return,
                    },
                };
                if cancel.is_cancelled() {
                    return;
                }

                let report = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    report = run.scrape_source(&source) => report,
                };

                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                if let Some(progress) = &progress {
                    progress.source_done(done, total, &report.source_id);
                }
                // The receiver outlives every task
                let _ = tx.send(report);
            });
        }
        drop(tx);

        let mut outcome = ScrapeOutcome::default();
        let mut finished = 0;
        while let Some(report) = rx.recv().await {
            report.merge_into(&mut outcome);
            finished += 1;
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                if e.is_panic() {
                    finished += 1;
                    outcome.sources_failed += 1;
                    outcome.errors.push(ScrapeFailure {
                        source: "<task>".to_string(),
                        path: None,
                        message: format!("scrape task panicked: {e}"),
                    });
                }
            }
        }
        outcome.duration = start.elapsed();

        // A signal arriving after the last source finished does not void the run
        if finished < total {
            tracing::warn!(finished, total, "scrape cancelled");
            return Err(ScrapeError::Cancelled { partial: outcome });
        }

        if let Err(e) = self.store.set_sync_meta(LAST_SYNC_KEY, &now_unix().to_string()).await {
            tracing::warn!(error = %e, "failed to record sync time");
        }
        tracing::info!(
            processed = outcome.sources_processed,
            skipped = outcome.sources_skipped,
            failed = outcome.sources_failed,
            new = outcome.skills_new,
            updated = outcome.skills_updated,
            errors = outcome.errors.len(),
            elapsed_ms = outcome.duration.as_millis() as u64,
            "scrape finished"
        );
        Ok(outcome)
    }
}

fn validate(sources: &[SourceConfig], options: &ScrapeOptions) -> Result<(), ScrapeError> {
    if options.max_concurrency == 0 {
        return Err(ScrapeError::InvalidOptions("max_concurrency must be at least 1".to_string()));
    }
    if let Some(bad) = sources.iter().find(|s| !s.handle().is_valid()) {
        return Err(ScrapeError::InvalidOptions(format!(
            "invalid source '{}/{}'",
            bad.owner, bad.repo
        )));
    }
    let mut seen = FxHashSet::default();
    if let Some(dup) = sources.iter().find(|s| !seen.insert(s.id())) {
        return Err(ScrapeError::InvalidOptions(format!(
            "source '{}' listed more than once",
            dup.id()
        )));
    }
    Ok(())
}

/// State shared by the tasks of one run
struct Run<S> {
    client: Arc<dyn SourceClient>,
    store: Arc<S>,
    dedup: Deduplicator,
    force: bool,
}

enum SourceStatus {
    Processed {
        found: usize,
        new: usize,
        updated: usize,
        duplicate: usize,
    },
    Skipped,
    Failed,
}

struct SourceReport {
    source_id: String,
    status: SourceStatus,
    errors: Vec<ScrapeFailure>,
}

impl SourceReport {
    fn failed(source_id: String, message: String) -> Self {
        Self {
            errors: vec![ScrapeFailure {
                source: source_id.clone(),
                path: None,
                message,
            }],
            source_id,
            status: SourceStatus::Failed,
        }
    }

    fn merge_into(self, outcome: &mut ScrapeOutcome) {
        match self.status {
            SourceStatus::Processed {
                found,
                new,
                updated,
                duplicate,
            } => {
                outcome.sources_processed += 1;
                outcome.skills_found += found;
                outcome.skills_new += new;
                outcome.skills_updated += updated;
                outcome.skills_duplicate += duplicate;
            }
            SourceStatus::Skipped => outcome.sources_skipped += 1,
            SourceStatus::Failed => outcome.sources_failed += 1,
        }
        outcome.errors.extend(self.errors);
    }
}

/// Why a single file produced no skill
enum FileFailure {
    /// Fetching failed; the file may succeed on a later run
    Fetch(ClientError),
    Parse(String),
}

impl<S: SkillStore> Run<S> {
    async fn scrape_source(&self, source: &SourceConfig) -> SourceReport {
        let source_id = source.id();
        let repo = source.handle();
        let start = Instant::now();

        let meta = match self.client.repository_info(&repo).await {
            Ok(meta) => meta,
            Err(e) => {
                tracing::warn!(source = %source_id, error = %e, "repository unavailable");
                return SourceReport::failed(source_id, e.to_string());
            }
        };

        let previous = match self.store.source_by_id(&source_id).await {
            Ok(previous) => previous,
            Err(e) => return SourceReport::failed(source_id, format!("{e:#}")),
        };
        let mut record = SourceRecord::refreshed(source, &meta, previous.as_ref(), now_unix());

        let unchanged = previous
            .as_ref()
            .and_then(|p| p.last_commit.as_deref())
            .is_some_and(|commit| commit == meta.commit_sha);
        if unchanged && !self.force {
            tracing::debug!(source = %source_id, commit = %meta.commit_sha, "commit unchanged, skipping");
            if let Err(e) = self.store.upsert_source(&record).await {
                return SourceReport::failed(source_id, format!("{e:#}"));
            }
            return SourceReport {
                source_id,
                status: SourceStatus::Skipped,
                errors: Vec::new(),
            };
        }

        let files = match self
            .client
            .list_skill_files(&repo, source.scope(), &meta.commit_sha)
            .await
        {
            Ok(files) => files,
            Err(e) => return SourceReport::failed(source_id, e.to_string()),
        };
        let repo_license = self.repo_license(&repo).await;

        let mut errors = Vec::new();
        let mut accepted = Vec::new();
        let mut found = 0;
        let mut duplicate = 0;
        // Set when some file may succeed on a later run at the same commit
        let mut retry_needed = false;

        for path in &files {
            let location = SkillLocation::new(&source_id, path);
            let mut skill = match self.load_skill(&repo, &location, &meta.commit_sha).await {
                Ok(skill) => skill,
                Err(failure) => {
                    let message = match failure {
                        FileFailure::Fetch(e) => {
                            retry_needed = true;
                            e.to_string()
                        }
                        FileFailure::Parse(message) => message,
                    };
                    tracing::debug!(source = %source_id, %path, error = %message, "skipping skill file");
                    errors.push(ScrapeFailure {
                        source: source_id.clone(),
                        path: Some(path.clone()),
                        message,
                    });
                    continue;
                }
            };
            found += 1;
            if skill.license.is_none() {
                skill.license = repo_license.clone();
            }

            match self.dedup.claim(self.store.as_ref(), skill).await {
                Ok(Claim::Accepted(skill)) => accepted.push(skill),
                Ok(Claim::Duplicate { .. }) => duplicate += 1,
                Err(e) => {
                    if matches!(e, DedupError::Store(_)) {
                        retry_needed = true;
                    }
                    tracing::debug!(source = %source_id, %path, error = %e, "slug not claimed");
                    errors.push(ScrapeFailure {
                        source: source_id.clone(),
                        path: Some(path.clone()),
                        message: e.to_string(),
                    });
                }
            }
        }

        // Files that failed to download or claim a slug are retried next run
        if !retry_needed {
            record.last_commit = Some(meta.commit_sha.clone());
        }

        let batch = match self.store.apply_source_scan(&record, &accepted).await {
            Ok(batch) => batch,
            Err(e) => {
                let mut report = SourceReport::failed(source_id, format!("{e:#}"));
                report.errors.extend(errors);
                return report;
            }
        };

        tracing::info!(
            source = %source_id,
            files = files.len(),
            new = batch.new,
            updated = batch.updated,
            duplicate,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "source scraped"
        );
        SourceReport {
            source_id,
            status: SourceStatus::Processed {
                found,
                new: batch.new,
                updated: batch.updated,
                duplicate,
            },
            errors,
        }
    }

    async fn load_skill(
        &self,
        repo: &RepoHandle,
        location: &SkillLocation,
        git_ref: &str,
    ) -> Result<Skill, FileFailure> {
        let raw = self
            .client
            .file_content(repo, &location.path, git_ref)
            .await
            .map_err(FileFailure::Fetch)?;
        parse_skill(&raw, location).map_err(|e| FileFailure::Parse(e.to_string()))
    }

    /// SPDX id of the repository license, if it can be detected
    async fn repo_license(&self, repo: &RepoHandle) -> Option<String> {
        match self.client.license_file(repo).await {
            Ok(Some(license)) => detect_license(&license.content).map(str::to_string),
            Ok(None) => None,
            Err(e) => {
                tracing::debug!(%repo, error = %e, "license lookup failed");
                None
            }
        }
    }
}
