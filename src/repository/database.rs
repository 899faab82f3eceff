use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite, Transaction};
use std::str::FromStr;

use crate::model::{Skill, SourceRecord, Stats};
use crate::util::format::now_unix;

use super::SCHEMA_VERSION;

/// Counts from persisting one source batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub new: usize,
    pub updated: usize,
}

/// Database abstraction for SQLite operations
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Create a new database connection
    pub async fn new(db_path: &str) -> Result<Self> {
        // Configure connection options with PRAGMAs applied to every connection
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", db_path))?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            .pragma("temp_store", "MEMORY")
            .pragma("cache_size", "-16000"); // 16MB cache

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        Ok(Self { pool })
    }

    /// Initialize database schema, returns true if schema was rebuilt
    pub async fn init_schema(&self) -> Result<bool> {
        // Create metadata table first (needed to check version)
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        let stored_version: Option<String> =
            sqlx::query("SELECT value FROM metadata WHERE key = 'schema_version'")
                .fetch_optional(&self.pool)
                .await?
                .map(|row| row.get("value"));

        let needs_rebuild = stored_version.as_deref() != Some(SCHEMA_VERSION);

        if needs_rebuild {
            if let Some(old) = &stored_version {
                tracing::warn!(from = %old, to = SCHEMA_VERSION, "schema version changed, rebuilding database");
            }
            sqlx::query("DROP TABLE IF EXISTS skill_tags").execute(&self.pool).await?;
            sqlx::query("DROP TABLE IF EXISTS tags").execute(&self.pool).await?;
            sqlx::query("DROP TABLE IF EXISTS skills").execute(&self.pool).await?;
            sqlx::query("DROP TABLE IF EXISTS sources").execute(&self.pool).await?;
            sqlx::query("DELETE FROM metadata").execute(&self.pool).await?;
        }

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sources (
                id TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                repo TEXT NOT NULL,
                path TEXT,
                description TEXT,
                stars INTEGER NOT NULL DEFAULT 0,
                forks INTEGER NOT NULL DEFAULT 0,
                default_branch TEXT NOT NULL DEFAULT '',
                clone_url TEXT NOT NULL DEFAULT '',
                last_commit TEXT,
                skill_count INTEGER NOT NULL DEFAULT 0,
                last_scraped_at INTEGER,
                updated_at INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS skills (
                id TEXT PRIMARY KEY,
                slug TEXT NOT NULL UNIQUE,
                source_id TEXT NOT NULL REFERENCES sources(id) ON DELETE CASCADE,
                file_path TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT,
                version TEXT,
                author TEXT,
                license TEXT,
                content TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_skills_source ON skills(source_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_skills_hash ON skills(content_hash)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS tags (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS skill_tags (
                skill_id TEXT NOT NULL REFERENCES skills(id) ON DELETE CASCADE,
                tag_id INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
                PRIMARY KEY (skill_id, tag_id)
            )",
        )
        .execute(&self.pool)
        .await?;

        if needs_rebuild {
            sqlx::query("INSERT OR REPLACE INTO metadata (key, value) VALUES ('schema_version', ?)")
                .bind(SCHEMA_VERSION)
                .execute(&self.pool)
                .await?;
        }

        Ok(needs_rebuild)
    }

    /// Get sync metadata value by key
    pub async fn get_sync_meta(&self, key: &str) -> Option<String> {
        sqlx::query("SELECT value FROM metadata WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .ok()
            .flatten()
            .map(|row| row.get("value"))
    }

    /// Set sync metadata value
    pub async fn set_sync_meta(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO metadata (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_source_by_id(&self, id: &str) -> Result<Option<SourceRecord>> {
        let row = sqlx::query("SELECT * FROM sources WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(source_from_row))
    }

    pub async fn list_sources(&self) -> Result<Vec<SourceRecord>> {
        let rows = sqlx::query("SELECT * FROM sources ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(source_from_row).collect())
    }

    pub async fn upsert_source(&self, source: &SourceRecord) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        upsert_source_in_tx(&mut tx, source).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn get_skill_by_slug(&self, slug: &str) -> Result<Option<Skill>> {
        let row = sqlx::query("SELECT * FROM skills WHERE slug = ?")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(self.skill_with_tags(&row).await?)),
            None => Ok(None),
        }
    }

    pub async fn get_skill_by_id(&self, id: &str) -> Result<Option<Skill>> {
        let row = sqlx::query("SELECT * FROM skills WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(self.skill_with_tags(&row).await?)),
            None => Ok(None),
        }
    }

    /// All skills of one source, ordered by slug
    pub async fn list_skills(&self, source_id: &str) -> Result<Vec<Skill>> {
        let rows = sqlx::query("SELECT * FROM skills WHERE source_id = ? ORDER BY slug")
            .bind(source_id)
            .fetch_all(&self.pool)
            .await?;
        let mut skills = Vec::with_capacity(rows.len());
        for row in &rows {
            skills.push(self.skill_with_tags(row).await?);
        }
        Ok(skills)
    }

    /// Insert or update one skill and replace its tags.
    /// Returns true when the skill did not exist before.
    pub async fn upsert_skill_with_tags(&self, skill: &Skill) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let created = upsert_skill_in_tx(&mut tx, skill, now_unix()).await?;
        tx.commit().await?;
        Ok(created)
    }

    /// Recount a source's skills and store the count on its row
    pub async fn update_source_skill_count(&self, source_id: &str) -> Result<i64> {
        let mut tx = self.pool.begin().await?;
        let count = update_skill_count_in_tx(&mut tx, source_id).await?;
        tx.commit().await?;
        Ok(count)
    }

    /// Persist a scraped source in ONE transaction: the source row (with its
    /// new last commit), every skill of the batch with tags, and the
    /// recomputed skill count.
    pub async fn apply_source_scan(&self, source: &SourceRecord, skills: &[Skill]) -> Result<BatchOutcome> {
        let now = now_unix();
        let mut outcome = BatchOutcome::default();
        let mut tx = self.pool.begin().await?;

        upsert_source_in_tx(&mut tx, source).await?;
        for skill in skills {
            let created = upsert_skill_in_tx(&mut tx, skill, now)
                .await
                .with_context(|| format!("saving skill {} ({})", skill.slug, skill.file_path))?;
            if created {
                outcome.new += 1;
            } else {
                outcome.updated += 1;
            }
        }
        update_skill_count_in_tx(&mut tx, &source.id).await?;

        tx.commit().await?;
        Ok(outcome)
    }

    pub async fn get_stats(&self) -> Result<Stats> {
        let sources: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sources")
            .fetch_one(&self.pool)
            .await?;
        let skills: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM skills")
            .fetch_one(&self.pool)
            .await?;
        let tags: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tags")
            .fetch_one(&self.pool)
            .await?;
        Ok(Stats { sources, skills, tags })
    }

    async fn skill_with_tags(&self, row: &SqliteRow) -> Result<Skill> {
        let mut skill = skill_from_row(row);
        skill.tags = sqlx::query_scalar(
            "SELECT t.name FROM tags t
             JOIN skill_tags st ON st.tag_id = t.id
             WHERE st.skill_id = ?
             ORDER BY t.name",
        )
        .bind(&skill.id)
        .fetch_all(&self.pool)
        .await?;
        Ok(skill)
    }
}

async fn upsert_source_in_tx(tx: &mut Transaction<'_, Sqlite>, source: &SourceRecord) -> Result<()> {
    sqlx::query(
        "INSERT INTO sources (id, owner, repo, path, description, stars, forks, default_branch,
                              clone_url, last_commit, skill_count, last_scraped_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
            owner = excluded.owner,
            repo = excluded.repo,
            path = excluded.path,
            description = excluded.description,
            stars = excluded.stars,
            forks = excluded.forks,
            default_branch = excluded.default_branch,
            clone_url = excluded.clone_url,
            last_commit = excluded.last_commit,
            skill_count = excluded.skill_count,
            last_scraped_at = excluded.last_scraped_at,
            updated_at = excluded.updated_at",
    )
    .bind(&source.id)
    .bind(&source.owner)
    .bind(&source.repo)
    .bind(&source.path)
    .bind(&source.description)
    .bind(source.stars)
    .bind(source.forks)
    .bind(&source.default_branch)
    .bind(&source.clone_url)
    .bind(&source.last_commit)
    .bind(source.skill_count)
    .bind(source.last_scraped_at)
    .bind(source.updated_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn upsert_skill_in_tx(tx: &mut Transaction<'_, Sqlite>, skill: &Skill, now: i64) -> Result<bool> {
    let exists = sqlx::query("SELECT 1 FROM skills WHERE id = ?")
        .bind(&skill.id)
        .fetch_optional(&mut **tx)
        .await?
        .is_some();

    sqlx::query(
        "INSERT INTO skills (id, slug, source_id, file_path, title, description, version, author,
                             license, content, content_hash, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
            slug = excluded.slug,
            source_id = excluded.source_id,
            file_path = excluded.file_path,
            title = excluded.title,
            description = excluded.description,
            version = excluded.version,
            author = excluded.author,
            license = excluded.license,
            content = excluded.content,
            content_hash = excluded.content_hash,
            updated_at = excluded.updated_at",
    )
    .bind(&skill.id)
    .bind(&skill.slug)
    .bind(&skill.source_id)
    .bind(&skill.file_path)
    .bind(&skill.title)
    .bind(&skill.description)
    .bind(&skill.version)
    .bind(&skill.author)
    .bind(&skill.license)
    .bind(&skill.content)
    .bind(&skill.content_hash)
    .bind(now)
    .bind(now)
    .execute(&mut **tx)
    .await?;

    sqlx::query("DELETE FROM skill_tags WHERE skill_id = ?")
        .bind(&skill.id)
        .execute(&mut **tx)
        .await?;

    for tag in &skill.tags {
        sqlx::query("INSERT INTO tags (name) VALUES (?) ON CONFLICT(name) DO NOTHING")
            .bind(tag)
            .execute(&mut **tx)
            .await?;
        sqlx::query(
            "INSERT OR IGNORE INTO skill_tags (skill_id, tag_id)
             SELECT ?, id FROM tags WHERE name = ?",
        )
        .bind(&skill.id)
        .bind(tag)
        .execute(&mut **tx)
        .await?;
    }

    Ok(!exists)
}

async fn update_skill_count_in_tx(tx: &mut Transaction<'_, Sqlite>, source_id: &str) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM skills WHERE source_id = ?")
        .bind(source_id)
        .fetch_one(&mut **tx)
        .await?;
    sqlx::query("UPDATE sources SET skill_count = ? WHERE id = ?")
        .bind(count)
        .bind(source_id)
        .execute(&mut **tx)
        .await?;
    Ok(count)
}

fn source_from_row(row: &SqliteRow) -> SourceRecord {
    SourceRecord {
        id: row.get("id"),
        owner: row.get("owner"),
        repo: row.get("repo"),
        path: row.get("path"),
        description: row.get("description"),
        stars: row.get("stars"),
        forks: row.get("forks"),
        default_branch: row.get("default_branch"),
        clone_url: row.get("clone_url"),
        last_commit: row.get("last_commit"),
        skill_count: row.get("skill_count"),
        last_scraped_at: row.get("last_scraped_at"),
        updated_at: row.get("updated_at"),
    }
}

fn skill_from_row(row: &SqliteRow) -> Skill {
    Skill {
        id: row.get("id"),
        slug: row.get("slug"),
        source_id: row.get("source_id"),
        file_path: row.get("file_path"),
        title: row.get("title"),
        description: row.get("description"),
        version: row.get("version"),
        author: row.get("author"),
        license: row.get("license"),
        tags: Vec::new(),
        content: row.get("content"),
        content_hash: row.get("content_hash"),
    }
}
