//! Local working-copy clones of remote repositories
//!
//! # Locking
//!
//! - Every repository has its own async mutex, created lazily. Clone,
//!   update and delete hold it; operations on different repositories never
//!   contend.
//! - The mutex map and the recency marks live behind separate `RwLock`s.
//!   Looking up an existing mutex takes the read side; only inserting a new
//!   key takes the write side.
//! - A recency mark younger than the recency window lets `clone_or_update`
//!   return without taking the repository mutex or touching the network.
//!
//! Read operations (`list_skill_files`, `read_file`, ...) go through the
//! object database at `HEAD` and take no lock.

use git2::{ObjectType, Repository};
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant, SystemTime};
use time::OffsetDateTime;
use tokio::sync::Mutex;

use crate::model::{DirEntry, LicenseFile, RepoHandle, RepositoryMetadata, StarCounts};
use crate::util::markdown::first_paragraph;
use crate::util::path::{is_skill_file, within_scope};

use super::error::{GitFailure, RepoContext, RepoError, RepoOp};
use super::stars::StarCounter;
use super::transport::{Git2Transport, GitTransport};

pub const DEFAULT_RECENCY_WINDOW: Duration = Duration::from_secs(60);
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(120);

const README_NAMES: [&str; 7] = [
    "README.md",
    "readme.md",
    "Readme.md",
    "README.markdown",
    "README",
    "README.txt",
    "README.rst",
];

/// License file names tried in order
pub const LICENSE_FILE_NAMES: [&str; 9] = [
    "LICENSE",
    "LICENSE.md",
    "LICENSE.txt",
    "LICENCE",
    "LICENCE.md",
    "COPYING",
    "license",
    "license.md",
    "License.md",
];

/// Settings for a [`RepoStore`]
#[derive(Debug, Clone)]
pub struct RepoStoreConfig {
    /// Clones live at `<root>/<owner>/<name>`
    pub root: PathBuf,
    /// Clone URLs are `<git_base_url>/<owner>/<name>`
    pub git_base_url: String,
    pub recency_window: Duration,
    /// Upper bound for one clone or update
    pub operation_timeout: Duration,
    /// Shallow clone depth; `None` clones full history
    pub clone_depth: Option<u32>,
}

impl RepoStoreConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            git_base_url: "https://github.com".to_string(),
            recency_window: DEFAULT_RECENCY_WINDOW,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            clone_depth: Some(1),
        }
    }
}

/// Result of [`RepoStore::cleanup_old_repos`]
#[derive(Debug, Default)]
pub struct CleanupReport {
    pub removed: Vec<RepoHandle>,
    pub failed: Vec<RepoError>,
}

type RepoLock = Arc<Mutex<()>>;

/// Manages clone, update, inspection and removal of local working copies.
pub struct RepoStore {
    config: RepoStoreConfig,
    transport: Arc<dyn GitTransport>,
    stars: Option<Arc<dyn StarCounter>>,
    locks: RwLock<FxHashMap<RepoHandle, RepoLock>>,
    recent: RwLock<FxHashMap<RepoHandle, Instant>>,
}

impl RepoStore {
    pub fn new(config: RepoStoreConfig) -> Self {
        Self {
            config,
            transport: Arc::new(Git2Transport),
            stars: None,
            locks: RwLock::new(FxHashMap::default()),
            recent: RwLock::new(FxHashMap::default()),
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn GitTransport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_star_counter(mut self, stars: Arc<dyn StarCounter>) -> Self {
        self.stars = Some(stars);
        self
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    pub fn config(&self) -> &RepoStoreConfig {
        &self.config
    }

    pub fn clone_url(&self, repo: &RepoHandle) -> String {
        format!(
            "{}/{}/{}",
            self.config.git_base_url.trim_end_matches('/'),
            repo.owner,
            repo.name
        )
    }

    /// Working-copy path for `repo`, whether or not it exists yet
    pub fn local_path(&self, repo: &RepoHandle) -> Result<PathBuf, RepoError> {
        if !repo.is_valid() {
            return Err(RepoError::new(repo, RepoOp::Open, GitFailure::InvalidHandle));
        }
        Ok(repo.local_path(&self.config.root))
    }

    pub fn is_cloned(&self, repo: &RepoHandle) -> bool {
        self.local_path(repo)
            .map(|path| has_clone(&path))
            .unwrap_or(false)
    }

    /// Ensure a current working copy of `repo` exists and return its path.
    ///
    /// Clones on first use, otherwise fetches and hard-resets to the remote
    /// head. Within the recency window of a previous success the call
    /// returns immediately. Each clone/update is bounded by the configured
    /// operation timeout; callers wanting a shorter bound can wrap the call
    /// in their own timeout.
    pub async fn clone_or_update(&self, repo: &RepoHandle) -> Result<PathBuf, RepoError> {
        let path = self.local_path(repo)?;
        if self.is_fresh(repo, &path) {
            tracing::trace!(%repo, "recently updated, skipping fetch");
            return Ok(path);
        }

        let guard = self.repo_lock(repo).lock_owned().await;

        // Another caller may have finished an update while we waited
        if self.is_fresh(repo, &path) {
            return Ok(path);
        }

        let exists = has_clone(&path);
        let op = if exists { RepoOp::Update } else { RepoOp::Clone };
        let cancel = Arc::new(AtomicBool::new(false));
        let _abort = AbortOnDrop(Arc::clone(&cancel));

        let job = {
            let transport = Arc::clone(&self.transport);
            let cancel = Arc::clone(&cancel);
            let url = self.clone_url(repo);
            let path = path.clone();
            let depth = self.config.clone_depth;
            tokio::task::spawn_blocking(move || {
                // The repository lock lives as long as the blocking work, so a
                // timed-out caller never lets another writer into the directory.
                let result = if exists {
                    transport
                        .fetch_and_reset(&path, depth, &cancel)
                        .map_err(GitFailure::from)
                } else {
                    clone_fresh(transport.as_ref(), &url, &path, depth, &cancel)
                };
                if result.is_ok() {
                    touch(&path);
                }
                (result, guard)
            })
        };

        let start = Instant::now();
        let timeout = self.config.operation_timeout;
        let guard = match tokio::time::timeout(timeout, job).await {
            Err(_) => return Err(RepoError::new(repo, op, GitFailure::Timeout(timeout))),
            Ok(Err(join)) => return Err(RepoError::new(repo, op, GitFailure::Task(join.to_string()))),
            Ok(Ok((result, guard))) => {
                result.repo_context(repo, op)?;
                guard
            }
        };

        // Mark before releasing the lock so waiters take the fast path
        self.mark_updated(repo);
        drop(guard);
        tracing::info!(
            %repo,
            op = %op,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "working copy ready"
        );
        Ok(path)
    }

    /// Metadata for an existing clone: head commit, branch, README
    /// description and (best effort) star counts.
    pub async fn repository_info(&self, repo: &RepoHandle) -> Result<RepositoryMetadata, RepoError> {
        let path = self.existing_clone(repo, RepoOp::Info)?;
        let fallback_url = self.clone_url(repo);

        let (commit_sha, default_branch, clone_url, description, modified) =
            run_blocking(repo, RepoOp::Info, move || {
                let git = Repository::open(&path)?;
                let head = git.head()?;
                let branch = head.shorthand().unwrap_or("HEAD").to_string();
                let commit = head.peel_to_commit()?;
                let url = git
                    .find_remote("origin")
                    .ok()
                    .and_then(|remote| remote.url().map(str::to_string))
                    .unwrap_or(fallback_url);
                let tree = commit.tree()?;
                let description = readme_description(&git, &tree);
                let modified = std::fs::metadata(&path).and_then(|m| m.modified()).ok();
                Ok((commit.id().to_string(), branch, url, description, modified))
            })
            .await?;

        let counts = match &self.stars {
            Some(stars) => stars.counts(repo).await,
            None => StarCounts::default(),
        };

        Ok(RepositoryMetadata {
            owner: repo.owner.clone(),
            name: repo.name.clone(),
            description,
            stars: counts.stars,
            forks: counts.forks,
            default_branch,
            commit_sha,
            clone_url,
            updated_at: modified
                .map(OffsetDateTime::from)
                .unwrap_or_else(OffsetDateTime::now_utc),
        })
    }

    /// Every skill file at the current commit, optionally limited to `scope`.
    ///
    /// Walks the commit tree rather than the working tree; paths are sorted.
    pub async fn list_skill_files(
        &self,
        repo: &RepoHandle,
        scope: Option<&str>,
    ) -> Result<Vec<String>, RepoError> {
        let path = self.existing_clone(repo, RepoOp::ListFiles)?;
        let scope = scope.map(str::to_string);

        run_blocking(repo, RepoOp::ListFiles, move || {
            let git = gix::open(&path).map_err(objects)?;
            let commit = git.head_commit().map_err(objects)?;
            let tree = commit.tree().map_err(objects)?;

            let mut recorder = gix::traverse::tree::Recorder::default();
            tree.traverse()
                .breadthfirst(&mut recorder)
                .map_err(objects)?;

            let mut files: Vec<String> = recorder
                .records
                .into_iter()
                .filter(|entry| entry.mode.is_blob())
                .map(|entry| entry.filepath.to_string())
                .filter(|p| is_skill_file(p) && within_scope(p, scope.as_deref()))
                .collect();
            files.sort();
            Ok(files)
        })
        .await
    }

    /// Raw content of `file` at the current commit
    pub async fn read_file_bytes(&self, repo: &RepoHandle, file: &str) -> Result<Vec<u8>, RepoError> {
        let path = self.existing_clone(repo, RepoOp::ReadFile)?;
        let file = file.trim_start_matches('/').to_string();

        run_blocking(repo, RepoOp::ReadFile, move || {
            let git = Repository::open(&path)?;
            let tree = git.head()?.peel_to_tree()?;
            let entry = match tree.get_path(Path::new(&file)) {
                Ok(entry) => entry,
                Err(e) if e.code() == git2::ErrorCode::NotFound => {
                    return Err(GitFailure::NotFound(file));
                }
                Err(e) => return Err(e.into()),
            };
            let blob = entry.to_object(&git)?.peel_to_blob()?;
            Ok(blob.content().to_vec())
        })
        .await
    }

    /// Content of `file` at the current commit, decoded lossily as UTF-8
    pub async fn read_file(&self, repo: &RepoHandle, file: &str) -> Result<String, RepoError> {
        let bytes = self.read_file_bytes(repo, file).await?;
        Ok(String::from_utf8(bytes)
            .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned()))
    }

    /// Immediate children of `dir` at the current commit.
    ///
    /// A missing directory (or a path naming a file) yields an empty list.
    pub async fn list_directory(&self, repo: &RepoHandle, dir: &str) -> Result<Vec<DirEntry>, RepoError> {
        let path = self.existing_clone(repo, RepoOp::ListDirectory)?;
        let dir = dir.trim_matches('/').to_string();

        run_blocking(repo, RepoOp::ListDirectory, move || {
            let git = Repository::open(&path)?;
            let root = git.head()?.peel_to_tree()?;
            let tree = if dir.is_empty() {
                root
            } else {
                match root.get_path(Path::new(&dir)) {
                    Ok(entry) if entry.kind() == Some(ObjectType::Tree) => git.find_tree(entry.id())?,
                    Ok(_) => return Ok(Vec::new()),
                    Err(e) if e.code() == git2::ErrorCode::NotFound => return Ok(Vec::new()),
                    Err(e) => return Err(e.into()),
                }
            };

            let mut entries: Vec<DirEntry> = tree
                .iter()
                .map(|entry| {
                    let is_dir = entry.kind() == Some(ObjectType::Tree);
                    let size = if entry.kind() == Some(ObjectType::Blob) {
                        git.find_blob(entry.id()).map(|b| b.size() as u64).unwrap_or(0)
                    } else {
                        0
                    };
                    DirEntry {
                        name: entry.name().unwrap_or_default().to_string(),
                        is_dir,
                        size,
                    }
                })
                .collect();
            entries.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(entries)
        })
        .await
    }

    /// First conventional license file at the repository root, if any
    pub async fn license_file(&self, repo: &RepoHandle) -> Result<Option<LicenseFile>, RepoError> {
        let path = self.existing_clone(repo, RepoOp::ReadFile)?;

        run_blocking(repo, RepoOp::ReadFile, move || {
            let git = Repository::open(&path)?;
            let tree = git.head()?.peel_to_tree()?;
            for name in LICENSE_FILE_NAMES {
                let Some(entry) = tree.get_name(name) else {
                    continue;
                };
                if let Ok(blob) = entry.to_object(&git).and_then(|o| o.peel_to_blob()) {
                    return Ok(Some(LicenseFile {
                        file_name: name.to_string(),
                        content: String::from_utf8_lossy(blob.content()).into_owned(),
                    }));
                }
            }
            Ok(None)
        })
        .await
    }

    /// Handles of every clone currently on disk
    pub async fn list_clones(&self) -> Vec<RepoHandle> {
        match scan_clones(&self.config.root).await {
            Ok(handles) => handles,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(root = %self.config.root.display(), error = %e, "cannot read clone directory");
                }
                Vec::new()
            }
        }
    }

    /// Remove every clone whose directory was last modified more than
    /// `max_age` ago, then drop owner directories left empty.
    pub async fn cleanup_old_repos(&self, max_age: Duration) -> CleanupReport {
        let cutoff = SystemTime::now()
            .checked_sub(max_age)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut report = CleanupReport::default();

        for repo in self.list_clones().await {
            let path = repo.local_path(&self.config.root);
            if !modified_before(&path, cutoff).await {
                continue;
            }

            let lock = self.repo_lock(&repo);
            let _guard = lock.lock().await;
            // An update may have refreshed the clone while we waited for the lock
            if !modified_before(&path, cutoff).await {
                continue;
            }

            match tokio::fs::remove_dir_all(&path).await {
                Ok(()) => {
                    self.forget(&repo);
                    self.release_lock(&repo, &lock);
                    tracing::info!(%repo, "removed stale clone");
                    report.removed.push(repo);
                }
                Err(e) => report.failed.push(RepoError::new(&repo, RepoOp::Cleanup, e)),
            }
        }

        for repo in &report.removed {
            remove_if_empty(&self.config.root.join(&repo.owner)).await;
        }
        report
    }

    /// Delete the clone of `repo`. Returns whether anything was removed.
    pub async fn remove_repository(&self, repo: &RepoHandle) -> Result<bool, RepoError> {
        let path = self.local_path(repo)?;
        let lock = self.repo_lock(repo);
        let _guard = lock.lock().await;

        self.forget(repo);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            self.release_lock(repo, &lock);
            return Ok(false);
        }
        tokio::fs::remove_dir_all(&path)
            .await
            .repo_context(repo, RepoOp::Remove)?;
        self.release_lock(repo, &lock);
        remove_if_empty(&self.config.root.join(&repo.owner)).await;
        tracing::info!(%repo, "removed clone");
        Ok(true)
    }

    fn existing_clone(&self, repo: &RepoHandle, op: RepoOp) -> Result<PathBuf, RepoError> {
        let path = self.local_path(repo)?;
        if !has_clone(&path) {
            return Err(RepoError::new(repo, op, GitFailure::NotCloned));
        }
        Ok(path)
    }

    fn repo_lock(&self, repo: &RepoHandle) -> RepoLock {
        if let Some(lock) = self
            .locks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(repo)
        {
            return Arc::clone(lock);
        }
        let mut locks = self.locks.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(repo.clone()).or_default())
    }

    /// Drop the map entry for `repo` unless someone besides the caller still
    /// holds its mutex. `held` is the caller's handle to that mutex.
    fn release_lock(&self, repo: &RepoHandle, held: &RepoLock) {
        let mut locks = self.locks.write().unwrap_or_else(PoisonError::into_inner);
        let unshared = locks
            .get(repo)
            .is_some_and(|lock| Arc::ptr_eq(lock, held) && Arc::strong_count(lock) == 2);
        if unshared {
            locks.remove(repo);
        }
    }

    fn is_fresh(&self, repo: &RepoHandle, path: &Path) -> bool {
        let recent = self
            .recent
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(repo)
            .is_some_and(|at| at.elapsed() < self.config.recency_window);
        recent && has_clone(path)
    }

    fn mark_updated(&self, repo: &RepoHandle) {
        self.recent
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(repo.clone(), Instant::now());
    }

    fn forget(&self, repo: &RepoHandle) {
        self.recent
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(repo);
    }
}

/// Sets the shared cancel flag when the owning future goes away
struct AbortOnDrop(Arc<AtomicBool>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

fn objects(e: impl std::fmt::Display) -> GitFailure {
    GitFailure::Objects(e.to_string())
}

fn has_clone(path: &Path) -> bool {
    path.join(".git").exists()
}

fn clone_fresh(
    transport: &dyn GitTransport,
    url: &str,
    path: &Path,
    depth: Option<u32>,
    cancel: &AtomicBool,
) -> Result<(), GitFailure> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    // Leftover of an interrupted clone
    if path.exists() {
        std::fs::remove_dir_all(path)?;
    }

    match transport.clone_repo(url, path, depth, cancel) {
        Ok(()) => Ok(()),
        Err(e) => {
            if path.exists() {
                if let Err(rm) = std::fs::remove_dir_all(path) {
                    tracing::warn!(path = %path.display(), error = %rm, "failed to remove partial clone");
                }
            }
            Err(e.into())
        }
    }
}

/// Bump the clone directory's mtime; cleanup ages clones by it
fn touch(path: &Path) {
    let result = std::fs::File::open(path).and_then(|dir| dir.set_modified(SystemTime::now()));
    if let Err(e) = result {
        tracing::debug!(path = %path.display(), error = %e, "could not update clone mtime");
    }
}

fn readme_description(repo: &Repository, tree: &git2::Tree<'_>) -> Option<String> {
    README_NAMES.iter().find_map(|name| {
        let entry = tree.get_name(name)?;
        let blob = entry.to_object(repo).ok()?.peel_to_blob().ok()?;
        first_paragraph(&String::from_utf8_lossy(blob.content()))
    })
}

async fn run_blocking<T, F>(repo: &RepoHandle, op: RepoOp, f: F) -> Result<T, RepoError>
where
    F: FnOnce() -> Result<T, GitFailure> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| RepoError::new(repo, op, GitFailure::Task(e.to_string())))?
        .repo_context(repo, op)
}

async fn scan_clones(root: &Path) -> std::io::Result<Vec<RepoHandle>> {
    let mut handles = Vec::new();
    let mut owners = tokio::fs::read_dir(root).await?;
    while let Some(owner) = owners.next_entry().await? {
        if !owner.file_type().await?.is_dir() {
            continue;
        }
        let owner_name = owner.file_name().to_string_lossy().into_owned();
        let mut repos = tokio::fs::read_dir(owner.path()).await?;
        while let Some(repo) = repos.next_entry().await? {
            if !repo.file_type().await?.is_dir() {
                continue;
            }
            let handle = RepoHandle::new(&owner_name, repo.file_name().to_string_lossy());
            if handle.is_valid() {
                handles.push(handle);
            }
        }
    }
    handles.sort();
    Ok(handles)
}

async fn modified_before(path: &Path, cutoff: SystemTime) -> bool {
    match tokio::fs::metadata(path).await.and_then(|m| m.modified()) {
        Ok(modified) => modified < cutoff,
        Err(_) => false,
    }
}

async fn remove_if_empty(dir: &Path) {
    let empty = match tokio::fs::read_dir(dir).await {
        Ok(mut entries) => matches!(entries.next_entry().await, Ok(None)),
        Err(_) => false,
    };
    if empty {
        let _ = tokio::fs::remove_dir(dir).await;
    }
}
