/// Where a skill document was read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkillLocation {
    pub source_id: String,
    /// Path of the file inside its repository
    pub path: String,
}

impl SkillLocation {
    pub fn new(source_id: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            path: path.into(),
        }
    }
}

/// A parsed skill.
///
/// The same shape is used for in-flight candidates and persisted rows: a
/// candidate becomes persisted once its slug has been claimed and its
/// source batch committed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Skill {
    /// Content-addressed id derived from source and file path
    pub id: String,
    /// Human-readable unique identifier derived from the title
    pub slug: String,
    pub source_id: String,
    pub file_path: String,
    pub title: String,
    pub description: Option<String>,
    pub version: Option<String>,
    pub author: Option<String>,
    pub license: Option<String>,
    pub tags: Vec<String>,
    pub content: String,
    /// Hex SHA-256 of the raw document
    pub content_hash: String,
}

/// Aggregate counts from the persistence layer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stats {
    pub sources: i64,
    pub skills: i64,
    pub tags: i64,
}
