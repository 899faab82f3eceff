// Shared benchmark helpers
// Functions here are used across different benchmark files
#![allow(dead_code)]

use skillsync::model::{Skill, SourceRecord};
use skillsync::repository::Database;

pub const SOURCE_ID: &str = "bench/skills";

/// Generate a skill document with front matter
pub fn skill_document(i: usize) -> String {
    format!(
        "---\nname: Skill {i}\ndescription: Benchmark skill number {i}\nversion: 1.0.{i}\ntags: [bench, group-{}]\n---\n\n# Skill {i}\n\n{}\n",
        i % 10,
        "Step by step instructions for the agent. ".repeat(20)
    )
}

/// Generate skills where every `collide_every` candidates share a base slug
pub fn generate_skills(num_skills: usize, collide_every: usize) -> Vec<Skill> {
    (0..num_skills)
        .map(|i| {
            let group = i / collide_every.max(1);
            Skill {
                id: format!("{:064x}", i),
                slug: format!("skill-{group}"),
                source_id: SOURCE_ID.to_string(),
                file_path: format!("skills/{i}/SKILL.md"),
                title: format!("Skill {group}"),
                content: skill_document(i),
                content_hash: format!("{:064x}", i * 31 + 7),
                tags: vec!["bench".to_string(), format!("group-{}", i % 10)],
                ..Skill::default()
            }
        })
        .collect()
}

pub fn bench_source() -> SourceRecord {
    SourceRecord {
        id: SOURCE_ID.to_string(),
        owner: "bench".to_string(),
        repo: "skills".to_string(),
        default_branch: "main".to_string(),
        clone_url: "https://github.com/bench/skills".to_string(),
        ..SourceRecord::default()
    }
}

/// Setup in-memory database for benchmarks
pub async fn setup_bench_db() -> Database {
    let db = Database::new(":memory:").await.unwrap();
    db.init_schema().await.unwrap();
    db.upsert_source(&bench_source()).await.unwrap();
    db
}
