//! Slug deduplication across concurrently scraped skills
//!
//! Every decision runs under one async mutex owned by the deduplicator, so
//! the check of the claimed table, the lookup of the persisted slug and the
//! claim itself happen as one step. One deduplicator belongs to one scrape
//! run; its table of claimed slugs lives as long as the run.

use rustc_hash::FxHashMap;
use tokio::sync::Mutex;

use crate::model::Skill;
use crate::parser::suffixed_slug;
use crate::repository::SkillStore;

pub const DEFAULT_MAX_SLUG_ATTEMPTS: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum DedupError {
    #[error("no free slug for '{slug}' after {attempts} attempts")]
    Exhausted { slug: String, attempts: usize },
    #[error("slug lookup failed: {0:#}")]
    Store(anyhow::Error),
}

/// Decision for one candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// The candidate owns its (possibly suffixed) slug and may be persisted
    Accepted(Skill),
    /// Identical content already holds `slug`; the candidate is discarded
    Duplicate { slug: String, existing_id: String },
}

#[derive(Debug)]
struct Claimant {
    id: String,
    content_hash: String,
}

pub struct Deduplicator {
    claimed: Mutex<FxHashMap<String, Claimant>>,
    max_attempts: usize,
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SLUG_ATTEMPTS)
    }
}

impl Deduplicator {
    pub fn new(max_attempts: usize) -> Self {
        Self {
            claimed: Mutex::new(FxHashMap::default()),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Number of slugs claimed so far in this run
    pub async fn claimed_count(&self) -> usize {
        self.claimed.lock().await.len()
    }

    /// Resolve the slug of `skill` against in-flight claims and persisted skills.
    ///
    /// Tries `slug`, `slug-2`, `slug-3`, ... A slug is skipped when another
    /// candidate claimed it or a different persisted skill holds it; when the
    /// holder has the same content hash the candidate is a duplicate instead.
    pub async fn claim<S: SkillStore>(&self, store: &S, mut skill: Skill) -> Result<Claim, DedupError> {
        let mut claimed = self.claimed.lock().await;
        let base = skill.slug.clone();

        for attempt in 1..=self.max_attempts {
            let slug = if attempt == 1 {
                base.clone()
            } else {
                suffixed_slug(&base, attempt)
            };

            if let Some(owner) = claimed.get(&slug) {
                if owner.id != skill.id {
                    if owner.content_hash == skill.content_hash {
                        return Ok(Claim::Duplicate {
                            slug,
                            existing_id: owner.id.clone(),
                        });
                    }
                    continue;
                }
            }

            match store.skill_by_slug(&slug).await.map_err(DedupError::Store)? {
                Some(existing) if existing.id != skill.id => {
                    if existing.content_hash == skill.content_hash {
                        tracing::debug!(%slug, existing = %existing.id, candidate = %skill.id, "duplicate skill content");
                        return Ok(Claim::Duplicate {
                            slug,
                            existing_id: existing.id,
                        });
                    }
                }
                _ => {
                    if slug != base {
                        tracing::debug!(%base, %slug, "slug taken, using suffix");
                    }
                    claimed.insert(
                        slug.clone(),
                        Claimant {
                            id: skill.id.clone(),
                            content_hash: skill.content_hash.clone(),
                        },
                    );
                    skill.slug = slug;
                    return Ok(Claim::Accepted(skill));
                }
            }
        }

        Err(DedupError::Exhausted {
            slug: base,
            attempts: self.max_attempts,
        })
    }
}
