mod database;
mod db_store;
mod error;
mod repo_store;
mod stars;
mod store;
mod transport;

pub use database::{BatchOutcome, Database};
pub use error::{GitFailure, RepoError, RepoOp};
pub use repo_store::{
    CleanupReport, DEFAULT_OPERATION_TIMEOUT, DEFAULT_RECENCY_WINDOW, LICENSE_FILE_NAMES, RepoStore,
    RepoStoreConfig,
};
pub use stars::{HtmlStarScraper, StarCounter, parse_abbreviated, parse_counts};
pub use store::SkillStore;
pub use transport::{Git2Transport, GitTransport};

/// Version stored under `schema_version` in sync metadata
pub const SCHEMA_VERSION: &str = "1";
