// Shared test fixtures for integration tests
// Functions here are used across different test files
#![allow(dead_code)]

use git2::{Repository, RepositoryInitOptions, Signature};
use skillsync::repository::{Database, Git2Transport, GitTransport, RepoStore, RepoStoreConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

pub const MIT_LICENSE: &str = "MIT License\n\nCopyright (c) 2025 Acme\n\nPermission is hereby granted, free of charge, to any person obtaining a copy\n";

/// Create an in-memory test database
pub async fn create_test_db() -> Database {
    Database::new(":memory:").await.unwrap()
}

/// In-memory database with initialized schema
pub async fn setup_db() -> Database {
    let db = create_test_db().await;
    db.init_schema().await.unwrap();
    db
}

/// Directory of fixture "remote" repositories laid out as `<root>/<owner>/<name>`.
///
/// `base_url()` can be used as the store's git base URL, so clone URLs
/// resolve to these local repositories.
pub struct Remotes {
    dir: TempDir,
}

impl Remotes {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn base_url(&self) -> String {
        self.dir.path().to_string_lossy().into_owned()
    }

    pub fn path(&self, owner: &str, name: &str) -> PathBuf {
        self.dir.path().join(owner).join(name)
    }

    /// Create an empty repository with `main` as its initial branch
    pub fn create(&self, owner: &str, name: &str) -> Repository {
        let path = self.path(owner, name);
        std::fs::create_dir_all(&path).unwrap();
        let mut opts = RepositoryInitOptions::new();
        opts.initial_head("main");
        let repo = Repository::init_opts(&path, &opts).unwrap();

        // Configure git user for commits
        let mut config = repo.config().unwrap();
        config.set_str("user.name", "Test User").unwrap();
        config.set_str("user.email", "test@example.com").unwrap();

        repo
    }
}

/// Store configuration for clones under `root` pulling from `remotes`.
///
/// Shallow clones are disabled: the local transport does not support them.
pub fn store_config(root: &Path, remotes: &Remotes) -> RepoStoreConfig {
    let mut config = RepoStoreConfig::new(root);
    config.git_base_url = remotes.base_url();
    config.clone_depth = None;
    config
}

pub fn create_store(root: &Path, remotes: &Remotes) -> RepoStore {
    RepoStore::new(store_config(root, remotes))
}

/// Add files to the repository and create a commit
pub fn add_commit(repo: &Repository, files: &[(&str, &[u8])], message: &str) -> git2::Oid {
    let sig = Signature::now("Test User", "test@example.com").unwrap();

    let mut index = repo.index().unwrap();

    for (path, content) in files {
        // Write file to working directory
        let full_path = repo.workdir().unwrap().join(path);
        if let Some(parent) = full_path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&full_path, content).unwrap();

        // Add to index
        index.add_path(Path::new(path)).unwrap();
    }

    index.write().unwrap();
    let tree_id = index.write_tree().unwrap();
    let tree = repo.find_tree(tree_id).unwrap();

    // Get parent commit if exists
    let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
    let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();

    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
        .unwrap()
}

/// Remove a file from the repository and create a commit
pub fn remove_file_commit(repo: &Repository, path: &str, message: &str) -> git2::Oid {
    let sig = Signature::now("Test User", "test@example.com").unwrap();

    // Remove from working directory
    let full_path = repo.workdir().unwrap().join(path);
    if full_path.exists() {
        std::fs::remove_file(&full_path).unwrap();
    }

    // Remove from index
    let mut index = repo.index().unwrap();
    index.remove_path(Path::new(path)).unwrap();
    index.write().unwrap();

    let tree_id = index.write_tree().unwrap();
    let tree = repo.find_tree(tree_id).unwrap();

    let parent = repo.head().unwrap().peel_to_commit().unwrap();

    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &[&parent])
        .unwrap()
}

/// Skill document with front matter
pub fn skill_doc(name: &str, description: &str) -> String {
    format!("---\nname: {name}\ndescription: {description}\n---\n\n# {name}\n\nInstructions.\n")
}

/// Transport wrapper counting calls, tracking overlap and adding a delay
#[derive(Default)]
pub struct CountingTransport {
    pub clones: AtomicUsize,
    pub fetches: AtomicUsize,
    active: AtomicUsize,
    pub max_active: AtomicUsize,
    delay: Duration,
}

impl CountingTransport {
    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::default()
        })
    }

    pub fn clones(&self) -> usize {
        self.clones.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    fn run<T>(&self, f: impl FnOnce() -> T) -> T {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        let result = f();
        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

impl GitTransport for CountingTransport {
    fn clone_repo(
        &self,
        url: &str,
        dest: &Path,
        depth: Option<u32>,
        cancel: &AtomicBool,
    ) -> Result<(), git2::Error> {
        self.clones.fetch_add(1, Ordering::SeqCst);
        self.run(|| Git2Transport.clone_repo(url, dest, depth, cancel))
    }

    fn fetch_and_reset(
        &self,
        path: &Path,
        depth: Option<u32>,
        cancel: &AtomicBool,
    ) -> Result<(), git2::Error> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.run(|| Git2Transport.fetch_and_reset(path, depth, cancel))
    }
}
