mod outcome;
mod repo;
mod skill;
mod source;

pub use outcome::{ScrapeFailure, ScrapeOutcome};
pub use repo::{DirEntry, LicenseFile, RepoHandle, RepositoryMetadata, StarCounts};
pub use skill::{Skill, SkillLocation, Stats};
pub use source::{SourceConfig, SourceRecord};
