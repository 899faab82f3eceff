// Deduplicator tests against a real in-memory database

mod common;

use anyhow::{Result, bail};
use common::setup_db;
use skillsync::model::{Skill, SourceRecord};
use skillsync::repository::{BatchOutcome, Database, SkillStore};
use skillsync::scraper::{Claim, DedupError, Deduplicator};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Database wrapper that slows slug lookups to widen race windows
struct SlowStore {
    db: Database,
    delay: Duration,
}

impl SkillStore for SlowStore {
    async fn source_by_id(&self, id: &str) -> Result<Option<SourceRecord>> {
        self.db.get_source_by_id(id).await
    }

    async fn upsert_source(&self, source: &SourceRecord) -> Result<()> {
        self.db.upsert_source(source).await
    }

    async fn skill_by_slug(&self, slug: &str) -> Result<Option<Skill>> {
        tokio::time::sleep(self.delay).await;
        self.db.get_skill_by_slug(slug).await
    }

    async fn apply_source_scan(&self, source: &SourceRecord, skills: &[Skill]) -> Result<BatchOutcome> {
        self.db.apply_source_scan(source, skills).await
    }

    async fn set_sync_meta(&self, key: &str, value: &str) -> Result<()> {
        self.db.set_sync_meta(key, value).await
    }
}

/// Store whose lookups always fail
struct BrokenStore;

impl SkillStore for BrokenStore {
    async fn source_by_id(&self, _id: &str) -> Result<Option<SourceRecord>> {
        Ok(None)
    }

    async fn upsert_source(&self, _source: &SourceRecord) -> Result<()> {
        Ok(())
    }

    async fn skill_by_slug(&self, _slug: &str) -> Result<Option<Skill>> {
        bail!("database is locked")
    }

    async fn apply_source_scan(&self, _source: &SourceRecord, _skills: &[Skill]) -> Result<BatchOutcome> {
        Ok(BatchOutcome::default())
    }

    async fn set_sync_meta(&self, _key: &str, _value: &str) -> Result<()> {
        Ok(())
    }
}

const SOURCE: &str = "acme/skills";

fn candidate(id: &str, slug: &str, hash: &str) -> Skill {
    Skill {
        id: id.to_string(),
        slug: slug.to_string(),
        source_id: SOURCE.to_string(),
        file_path: format!("{id}/SKILL.md"),
        title: slug.to_string(),
        content: format!("content {hash}"),
        content_hash: hash.to_string(),
        ..Skill::default()
    }
}

async fn db_with(persisted: &[Skill]) -> Database {
    let db = setup_db().await;
    let source = SourceRecord {
        id: SOURCE.to_string(),
        owner: "acme".to_string(),
        repo: "skills".to_string(),
        ..SourceRecord::default()
    };
    db.apply_source_scan(&source, persisted).await.unwrap();
    db
}

fn accepted(claim: Claim) -> Skill {
    match claim {
        Claim::Accepted(skill) => skill,
        other => panic!("expected accepted claim, got {other:?}"),
    }
}

#[tokio::test]
async fn test_free_slug_is_accepted_unchanged() {
    let db = db_with(&[]).await;
    let dedup = Deduplicator::default();

    let skill = accepted(dedup.claim(&db, candidate("a", "pdf", "h1")).await.unwrap());
    assert_eq!(skill.slug, "pdf");
    assert_eq!(dedup.claimed_count().await, 1);
}

#[tokio::test]
async fn test_persisted_slug_with_other_content_gets_suffix() {
    let db = db_with(&[candidate("old", "pdf", "h-old")]).await;
    let dedup = Deduplicator::default();

    let skill = accepted(dedup.claim(&db, candidate("new", "pdf", "h-new")).await.unwrap());
    assert_eq!(skill.slug, "pdf-2");
}

#[tokio::test]
async fn test_persisted_identical_content_is_duplicate() {
    let db = db_with(&[candidate("old", "pdf", "same")]).await;
    let dedup = Deduplicator::default();

    let claim = dedup.claim(&db, candidate("copy", "pdf", "same")).await.unwrap();
    assert_eq!(
        claim,
        Claim::Duplicate {
            slug: "pdf".to_string(),
            existing_id: "old".to_string(),
        }
    );
    assert_eq!(dedup.claimed_count().await, 0);
}

#[tokio::test]
async fn test_rescraped_skill_keeps_its_slug() {
    let db = db_with(&[candidate("a", "pdf", "v1")]).await;
    let dedup = Deduplicator::default();

    // Same id, changed content: an update, not a conflict
    let skill = accepted(dedup.claim(&db, candidate("a", "pdf", "v2")).await.unwrap());
    assert_eq!(skill.slug, "pdf");
}

#[tokio::test]
async fn test_in_flight_identical_content_is_duplicate() {
    let db = db_with(&[]).await;
    let dedup = Deduplicator::default();

    accepted(dedup.claim(&db, candidate("first", "pdf", "same")).await.unwrap());
    let claim = dedup.claim(&db, candidate("second", "pdf", "same")).await.unwrap();
    assert_eq!(
        claim,
        Claim::Duplicate {
            slug: "pdf".to_string(),
            existing_id: "first".to_string(),
        }
    );
}

#[tokio::test]
async fn test_in_flight_claims_are_skipped() {
    let db = db_with(&[candidate("p", "pdf-2", "h-p")]).await;
    let dedup = Deduplicator::default();

    accepted(dedup.claim(&db, candidate("a", "pdf", "h-a")).await.unwrap());
    // pdf is claimed in flight, pdf-2 is persisted
    let skill = accepted(dedup.claim(&db, candidate("b", "pdf", "h-b")).await.unwrap());
    assert_eq!(skill.slug, "pdf-3");
}

#[tokio::test]
async fn test_exhausted_attempts() {
    let db = db_with(&[
        candidate("a", "pdf", "h-a"),
        candidate("b", "pdf-2", "h-b"),
        candidate("c", "pdf-3", "h-c"),
    ])
    .await;
    let dedup = Deduplicator::new(3);

    let err = dedup.claim(&db, candidate("d", "pdf", "h-d")).await.unwrap_err();
    match err {
        DedupError::Exhausted { slug, attempts } => {
            assert_eq!(slug, "pdf");
            assert_eq!(attempts, 3);
        }
        other => panic!("expected exhaustion, got {other:?}"),
    }
}

#[tokio::test]
async fn test_store_failure_is_reported() {
    let dedup = Deduplicator::default();
    let err = dedup.claim(&BrokenStore, candidate("a", "pdf", "h")).await.unwrap_err();
    assert!(matches!(err, DedupError::Store(_)));
    assert!(err.to_string().contains("database is locked"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claims_never_share_a_slug() {
    const TASKS: usize = 12;
    let store = Arc::new(SlowStore {
        db: db_with(&[]).await,
        delay: Duration::from_millis(5),
    });
    let dedup = Arc::new(Deduplicator::default());

    let mut handles = Vec::new();
    for i in 0..TASKS {
        let store = Arc::clone(&store);
        let dedup = Arc::clone(&dedup);
        handles.push(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis((i % 3) as u64)).await;
            let skill = candidate(&format!("id-{i}"), "pdf", &format!("hash-{i}"));
            accepted(dedup.claim(store.as_ref(), skill).await.unwrap()).slug
        }));
    }

    let mut slugs = HashSet::new();
    for handle in handles {
        assert!(slugs.insert(handle.await.unwrap()), "slug claimed twice");
    }

    let expected: HashSet<String> = std::iter::once("pdf".to_string())
        .chain((2..=TASKS).map(|n| format!("pdf-{n}")))
        .collect();
    assert_eq!(slugs, expected);
    assert_eq!(dedup.claimed_count().await, TASKS);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_identical_content_accepted_once() {
    let store = Arc::new(SlowStore {
        db: db_with(&[]).await,
        delay: Duration::from_millis(5),
    });
    let dedup = Arc::new(Deduplicator::default());

    let mut handles = Vec::new();
    for i in 0..6 {
        let store = Arc::clone(&store);
        let dedup = Arc::clone(&dedup);
        handles.push(tokio::spawn(async move {
            let skill = candidate(&format!("fork-{i}"), "pdf", "same-content");
            dedup.claim(store.as_ref(), skill).await.unwrap()
        }));
    }

    let mut accepted_count = 0;
    for handle in handles {
        if let Claim::Accepted(skill) = handle.await.unwrap() {
            assert_eq!(skill.slug, "pdf");
            accepted_count += 1;
        }
    }
    assert_eq!(accepted_count, 1);
}
