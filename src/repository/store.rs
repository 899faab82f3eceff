//! Skill store trait for persistence abstraction
//!
//! Decouples the scraper from database implementation details.

use anyhow::Result;
use std::future::Future;

use crate::model::{Skill, SourceRecord};

use super::database::BatchOutcome;

/// Persistence layer used by the scraper
///
/// Futures are `Send` so scraping tasks holding a store can be spawned
/// onto the multi-threaded runtime.
pub trait SkillStore: Send + Sync + 'static {
    /// Stored row of a source, if it was scraped before
    fn source_by_id(&self, id: &str) -> impl Future<Output = Result<Option<SourceRecord>>> + Send;

    /// Insert or update a source row
    fn upsert_source(&self, source: &SourceRecord) -> impl Future<Output = Result<()>> + Send;

    /// Skill currently holding `slug`, if any
    fn skill_by_slug(&self, slug: &str) -> impl Future<Output = Result<Option<Skill>>> + Send;

    /// Persist a source together with its accepted skills.
    ///
    /// Database-backed stores do this in one transaction.
    fn apply_source_scan(
        &self,
        source: &SourceRecord,
        skills: &[Skill],
    ) -> impl Future<Output = Result<BatchOutcome>> + Send;

    /// Write a sync metadata value
    fn set_sync_meta(&self, key: &str, value: &str) -> impl Future<Output = Result<()>> + Send;
}
