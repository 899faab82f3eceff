//! Database implementation of SkillStore

use anyhow::Result;

use crate::model::{Skill, SourceRecord};

use super::database::{BatchOutcome, Database};
use super::store::SkillStore;

impl SkillStore for Database {
    async fn source_by_id(&self, id: &str) -> Result<Option<SourceRecord>> {
        self.get_source_by_id(id).await
    }

    async fn upsert_source(&self, source: &SourceRecord) -> Result<()> {
        Database::upsert_source(self, source).await
    }

    async fn skill_by_slug(&self, slug: &str) -> Result<Option<Skill>> {
        self.get_skill_by_slug(slug).await
    }

    async fn apply_source_scan(&self, source: &SourceRecord, skills: &[Skill]) -> Result<BatchOutcome> {
        Database::apply_source_scan(self, source, skills).await
    }

    async fn set_sync_meta(&self, key: &str, value: &str) -> Result<()> {
        Database::set_sync_meta(self, key, value).await
    }
}
